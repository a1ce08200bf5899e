pub mod completions;
pub mod demo;
pub mod replay;
pub mod sim;
