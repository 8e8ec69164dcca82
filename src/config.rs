//! Bridge configuration loading.
//!
//! Reads `mcp-bridge.yaml` (or `.json`) and resolves environment variables.
//! The `servers` map is the single source of truth for the server catalog.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::mcp_client::{ServerCatalog, ServerConfig};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MCP_BRIDGE_CONFIG";

/// Config files looked up in the working directory, in order.
const DEFAULT_CONFIG_FILES: [&str; 2] = ["mcp-bridge.yaml", "mcp-bridge.json"];

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5100";

/// Overrides `logging.dir`.
pub const LOG_DIR_ENV_VAR: &str = "MCP_BRIDGE_LOG_DIR";

/// Overrides `logging.format` (`text` or `json`).
pub const LOG_FORMAT_ENV_VAR: &str = "MCP_BRIDGE_LOG_FORMAT";

const DEFAULT_LOG_FILES_KEPT: u32 = 3;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found (set {CONFIG_ENV_VAR} or create one of: {searched})")]
    NotFound { searched: String },

    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    ParseFailed { path: String, reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Address the REST surface binds to.
    #[serde(default = "default_listen_addr", alias = "listenAddr")]
    pub listen_addr: String,
    /// Invocation history database. Defaults to `~/.mcp-bridge/logs.db`.
    #[serde(default, alias = "logDbPath")]
    pub log_db_path: Option<String>,
    /// Server descriptors by name.
    #[serde(default, alias = "mcpServers", alias = "McpServers")]
    pub servers: HashMap<String, ServerConfig>,
    /// Where and how the bridge writes its own logs.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Output format of the bridge's own logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging section of the config file.
///
/// Without a `dir`, logs go to stderr.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default, alias = "logDir")]
    pub dir: Option<PathBuf>,
    /// Rotated generations kept next to the current log file.
    #[serde(default = "default_log_files_kept", alias = "filesKept")]
    pub files_kept: u32,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_files_kept() -> u32 {
    DEFAULT_LOG_FILES_KEPT
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            files_kept: DEFAULT_LOG_FILES_KEPT,
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Apply `MCP_BRIDGE_LOG_DIR` and `MCP_BRIDGE_LOG_FORMAT` on top of the
    /// file settings.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var_os(LOG_DIR_ENV_VAR).map(PathBuf::from),
            std::env::var(LOG_FORMAT_ENV_VAR).ok(),
        )
    }

    fn with_overrides(mut self, dir: Option<PathBuf>, format: Option<String>) -> Self {
        if let Some(dir) = dir.filter(|d| !d.as_os_str().is_empty()) {
            self.dir = Some(dir);
        }
        if let Some(format) = format.as_deref().and_then(LogFormat::parse) {
            self.format = format;
        }
        self
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

impl BridgeConfig {
    /// The server catalog described by this configuration.
    pub fn catalog(&self) -> ServerCatalog {
        ServerCatalog::new(self.servers.clone())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file: `$MCP_BRIDGE_CONFIG` if set, else the first of
/// `mcp-bridge.yaml`, `mcp-bridge.json` present in `dir`.
pub fn find_config_path(dir: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    DEFAULT_CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| ConfigError::NotFound {
            searched: DEFAULT_CONFIG_FILES.join(", "),
        })
}

/// Load and parse a config file. `.json` files are parsed as JSON, anything
/// else as YAML.
///
/// `${VAR}` and `${VAR:-fallback}` references are expanded from the process
/// environment before parsing.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let interpolated = expand_env_refs(&raw, |name| std::env::var(name).ok());
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let parsed = if is_json {
        serde_json::from_str::<BridgeConfig>(&interpolated).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str::<BridgeConfig>(&interpolated).map_err(|e| e.to_string())
    };

    parsed.map_err(|reason| ConfigError::ParseFailed {
        path: path.display().to_string(),
        reason,
    })
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Expand `${VAR}` and `${VAR:-fallback}` references using `lookup`.
///
/// The fallback applies when the variable is unset or empty. An unset
/// variable without a fallback expands to nothing. An unterminated `${` is
/// kept as written.
fn expand_env_refs(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        let Some(end) = body.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let (name, fallback) = match body[..end].split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (&body[..end], None),
        };
        let value = lookup(name).filter(|v| !v.is_empty() || fallback.is_none());
        out.push_str(value.as_deref().or(fallback).unwrap_or_default());

        rest = &body[end + 1..];
    }

    out.push_str(rest);
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::TransportKind;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "mcp-bridge.yaml",
            r#"
listen_addr: "0.0.0.0:8080"
servers:
  files:
    command: npx
    args: ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
    env:
      LOG_LEVEL: debug
  remote:
    transport: sse
    url: https://tools.example.com/sse
    headers:
      X-Team: search
    api_key_env_var: REMOTE_TOOLS_KEY
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert!(config.log_db_path.is_none());

        let catalog = config.catalog();
        assert_eq!(catalog.names(), vec!["files", "remote"]);
        let files = catalog.get("files").unwrap();
        assert_eq!(files.name, "files");
        assert_eq!(files.transport, TransportKind::Stdio);
        assert_eq!(files.args.len(), 3);
        assert_eq!(files.env["LOG_LEVEL"], "debug");
        let remote = catalog.get("remote").unwrap();
        assert_eq!(remote.transport, TransportKind::Sse);
        assert_eq!(remote.api_key_env_var.as_deref(), Some("REMOTE_TOOLS_KEY"));
    }

    #[test]
    fn test_load_json_config_with_defaults_and_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "bridge.json",
            r#"{
                "mcpServers": {
                    "echo": {
                        "command": "node",
                        "args": ["echo.js"],
                        "environment": {"A": "1"},
                        "workingDirectory": "/srv/echo"
                    }
                }
            }"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        let echo = &config.servers["echo"];
        assert_eq!(echo.env["A"], "1");
        assert_eq!(echo.cwd.as_deref(), Some("/srv/echo"));
    }

    #[test]
    fn test_env_refs_expand_with_fallbacks() {
        let lookup = |name: &str| match name {
            "PORT" => Some("9001".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        };
        assert_eq!(
            expand_env_refs("addr: 127.0.0.1:${PORT} db: ${DB:-/tmp/logs.db}", lookup),
            "addr: 127.0.0.1:9001 db: /tmp/logs.db"
        );
        assert_eq!(expand_env_refs("[${EMPTY:-x}] [${EMPTY}] [${UNSET}]", lookup), "[x] [] []");
        assert_eq!(expand_env_refs("cost: $5 ${PORT", lookup), "cost: $5 ${PORT");
    }

    #[test]
    fn test_load_config_reads_environment() {
        std::env::set_var("MCP_BRIDGE_TEST_CFG_PORT", "9001");
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "mcp-bridge.yaml",
            "listen_addr: \"127.0.0.1:${MCP_BRIDGE_TEST_CFG_PORT}\"\n",
        );
        assert_eq!(load_config(&path).unwrap().listen_addr, "127.0.0.1:9001");
    }

    #[test]
    fn test_logging_section_and_overrides() {
        let config: BridgeConfig = serde_yaml::from_str(
            "logging:\n  dir: /var/log/mcp-bridge\n  files_kept: 5\n  format: json\n",
        )
        .unwrap();
        assert_eq!(
            config.logging,
            LoggingConfig {
                dir: Some(PathBuf::from("/var/log/mcp-bridge")),
                files_kept: 5,
                format: LogFormat::Json,
            }
        );

        let defaults: BridgeConfig = serde_yaml::from_str("servers: {}").unwrap();
        assert_eq!(defaults.logging, LoggingConfig::default());

        let overridden = defaults
            .logging
            .with_overrides(Some(PathBuf::from("/tmp/bridge-logs")), Some("JSON".into()));
        assert_eq!(overridden.dir, Some(PathBuf::from("/tmp/bridge-logs")));
        assert_eq!(overridden.format, LogFormat::Json);
        assert_eq!(overridden.files_kept, DEFAULT_LOG_FILES_KEPT);

        let ignored = LoggingConfig::default().with_overrides(Some(PathBuf::new()), Some("xml".into()));
        assert_eq!(ignored, LoggingConfig::default());
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "broken.json", "{ not json");
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_find_config_prefers_yaml_then_json() {
        // Only meaningful when the override variable is not set in the test env.
        if std::env::var_os(CONFIG_ENV_VAR).is_some() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_config_path(dir.path()),
            Err(ConfigError::NotFound { .. })
        ));

        write_file(dir.path(), "mcp-bridge.json", "{}");
        assert!(find_config_path(dir.path()).unwrap().ends_with("mcp-bridge.json"));

        write_file(dir.path(), "mcp-bridge.yaml", "servers: {}");
        assert!(find_config_path(dir.path()).unwrap().ends_with("mcp-bridge.yaml"));
    }
}
