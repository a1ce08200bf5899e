use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::Path;

use crate::error::ErrorCode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProjectionConfig {
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VerifyConfig {
    /// Run the full index consistency check after every applied event.
    /// Always on in debug builds.
    #[serde(default)]
    pub after_each_event: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Text shown in non-address columns of indexed-but-dead nodes.
    #[serde(default = "default_deleted_placeholder")]
    pub deleted_placeholder: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            deleted_placeholder: default_deleted_placeholder(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub projection: ProjectionConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

/// Load `.arbor/config.toml` under `project_root`, falling back to defaults
/// when the file does not exist. `ARBOR_VERIFY` forces per-event checks on.
pub fn load_project_config(project_root: &Path) -> Result<ProjectionConfig> {
    let path = project_root.join(".arbor/config.toml");
    let mut config = if path.exists() {
        load_config_file(&path)?
    } else {
        ProjectionConfig::default()
    };

    if verify_forced_from_env() {
        config.verify.after_each_event = true;
    }
    Ok(config)
}

/// Parse a projection config from an explicit path.
pub fn load_config_file(path: &Path) -> Result<ProjectionConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectionConfig>(&content)
        .with_context(|| format!("{}: failed to parse {}", ErrorCode::ConfigParseError, path.display()))
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("arbor/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("{}: failed to parse {}", ErrorCode::ConfigParseError, path.display()))
}

pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let projection = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.as_deref(), env_format.as_deref());

    Ok(EffectiveConfig {
        projection,
        user,
        resolved_output,
    })
}

fn resolve_output(cli_json: bool, user_output: Option<&str>, env_format: Option<&str>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "plain" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

fn verify_forced_from_env() -> bool {
    env::var("ARBOR_VERIFY")
        .ok()
        .is_some_and(|value| is_truthy(&value))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn default_deleted_placeholder() -> String {
    "<deleted>".to_string()
}
