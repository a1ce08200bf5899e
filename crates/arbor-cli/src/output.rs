//! Shared output layer for pretty/text/JSON parity across CLI commands.
//!
//! Precedence (highest wins): `--json`, then `FORMAT`, then the `output` key in
//! the user config, then pretty on a TTY and text when piped. Resolution
//! itself lives in [`arbor_core::config::resolve_config`]; this module only
//! maps the resolved name onto [`OutputMode`] and renders.

use std::io::{self, Write};

use serde::Serialize;

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<14} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Sections and aligned key/value lines.
    Pretty,
    /// One `key=value` record per line, for pipes.
    Text,
    Json,
}

impl OutputMode {
    /// Map a resolved output name (`pretty`, `text`, `json`) onto a mode.
    /// Unknown names fall back to text.
    pub fn from_resolved(name: &str) -> Self {
        match name {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Text,
        }
    }
}

/// Render a serializable value with explicit pretty/text renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_names_map_to_modes() {
        assert_eq!(OutputMode::from_resolved("json"), OutputMode::Json);
        assert_eq!(OutputMode::from_resolved("pretty"), OutputMode::Pretty);
        assert_eq!(OutputMode::from_resolved("text"), OutputMode::Text);
        assert_eq!(OutputMode::from_resolved("yaml"), OutputMode::Text);
    }

    #[test]
    fn kv_lines_are_aligned() {
        let mut buf = Vec::new();
        pretty_kv(&mut buf, "Seeds", "100").expect("write");
        assert_eq!(String::from_utf8(buf).expect("utf8"), "Seeds:         100\n");
    }

    #[test]
    fn section_has_rule() {
        let mut buf = Vec::new();
        pretty_section(&mut buf, "Tree").expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.starts_with("Tree\n"));
        assert!(text.ends_with(&format!("{}\n", "-".repeat(PRETTY_RULE_WIDTH))));
    }
}
