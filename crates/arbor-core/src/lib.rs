//! arbor-core library.
//!
//! A live tree projection over an object graph that other threads create,
//! destroy and re-parent concurrently.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums with an [`ErrorCode`] in the library;
//!   `anyhow::Result` only at config-loading edges.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
//! - **Locking**: [`ObjectLock`] first, then any internal lock.

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod handle;
pub mod index;
pub mod lock;
pub mod observer;
pub mod pump;
pub mod registry;
pub mod source;

pub use engine::{ApplyOutcome, ApplyStats, IgnoreReason, TreeProjection};
pub use error::ErrorCode;
pub use format::{AddressFormatter, NodeData, NodeFormatter};
pub use handle::NodeHandle;
pub use index::{ConsistencyError, Position, TreeIndex};
pub use lock::ObjectLock;
pub use observer::{ChangeRecorder, StructuralChange, TreeObserver};
pub use pump::{EventPump, PumpReport};
pub use registry::{ObjectRegistry, RegistryError};
pub use source::{LifecycleEvent, SourceGraph};
