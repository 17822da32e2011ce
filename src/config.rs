//! # Configuration Management
//!
//! Loads the service configuration once at startup from several sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary's working directory
//! - Environment variables with the `APP_` prefix (`__` separates nested keys)
//! - A handful of well-known deployment variables
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `GGWAVE_BIN_DIR`, `GGWAVE_CLI`, `HOST`, `PORT`
//! 2. `APP_` variables, e.g. `APP_PROCESS__TIMEOUT_SECS=30`
//! 3. `config.toml`
//! 4. Default values
//!
//! The resulting [`AppConfig`] is immutable for the lifetime of the process.
//! It is handed to [`crate::state::AppState`] and from there to every handler,
//! so nothing below `main` ever reads the environment directly.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Name of the encode tool inside `GGWAVE_BIN_DIR`.
pub const TO_FILE_BINARY: &str = "ggwave-to-file";

/// Name of the decode tool inside `GGWAVE_BIN_DIR`.
pub const FROM_FILE_BINARY: &str = "ggwave-from-file";

/// Main application configuration.
///
/// ## Sections:
/// - `server`: where to listen and how long to wait on shutdown
/// - `tools`: locations of the external ggwave executables and ffmpeg
/// - `process`: limits applied to every spawned tool
/// - `cors`: which browser origins may call the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub process: ProcessConfig,
    pub cors: CorsConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds in-flight requests get to finish after SIGINT/SIGTERM.
    pub shutdown_timeout_secs: u64,
}

/// Locations of the external executables.
///
/// ## Resolution:
/// `to_file` and `from_file` win when set explicitly. Otherwise they are
/// derived from `bin_dir` using the standard ggwave binary names. When neither
/// is set the tool is simply "not configured" and every request that needs it
/// fails with a configuration error.
///
/// `ffmpeg` is a bare program name by default and is looked up on `PATH` by the
/// operating system at spawn time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub bin_dir: Option<PathBuf>,
    pub to_file: Option<PathBuf>,
    pub from_file: Option<PathBuf>,
    pub cli: Option<PathBuf>,
    /// Arguments for the interactive session tool (`-t1` selects protocol 1, "Fast").
    pub cli_args: Vec<String>,
    pub ffmpeg: String,
}

/// Limits applied to every unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Watchdog for one-shot tool runs. `0` disables it.
    pub timeout_secs: u64,
    /// Largest accepted multipart upload, in bytes.
    pub max_upload_bytes: usize,
    /// Parent directory for per-request scratch directories.
    /// Defaults to the system temp directory.
    pub workspace_root: Option<PathBuf>,
}

/// CORS settings. An empty list allows any origin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5055,
                shutdown_timeout_secs: 10,
            },
            tools: ToolsConfig {
                bin_dir: None,
                to_file: None,
                from_file: None,
                cli: None,
                cli_args: vec!["-t1".to_string()],
                ffmpeg: "ffmpeg".to_string(),
            },
            process: ProcessConfig {
                timeout_secs: 60,
                max_upload_bytes: 25 * 1024 * 1024,
                workspace_root: None,
            },
            cors: CorsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `GGWAVE_BIN_DIR=/opt/ggwave/bin`: directory with `ggwave-to-file` and `ggwave-from-file`
    /// - `GGWAVE_CLI=/opt/ggwave/bin/ggwave-cli`: interactive session tool
    /// - `APP_TOOLS__FFMPEG=/usr/local/bin/ffmpeg`: explicit converter path
    /// - `APP_CORS__ALLOWED_ORIGINS=https://example.org`: comma separated origins
    /// - `PORT=8080`: platform-provided listen port
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("tools.cli_args")
                    .with_list_parse_key("cors.allowed_origins")
                    .try_parsing(true),
            );

        if let Ok(bin_dir) = env::var("GGWAVE_BIN_DIR") {
            settings = settings.set_override("tools.bin_dir", bin_dir)?;
        }

        if let Ok(cli) = env::var("GGWAVE_CLI") {
            settings = settings.set_override("tools.cli", cli)?;
        }

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Missing tool paths are *not* an error here: the service starts anyway
    /// and reports the gap through `/health`.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.process.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.tools.ffmpeg.trim().is_empty() {
            return Err(anyhow::anyhow!("ffmpeg program name cannot be empty"));
        }

        Ok(())
    }
}

impl ToolsConfig {
    /// Resolved path of the encode tool, if configured.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        self.to_file
            .clone()
            .or_else(|| self.bin_dir.as_ref().map(|dir| dir.join(TO_FILE_BINARY)))
    }

    /// Resolved path of the decode tool, if configured.
    pub fn from_file_path(&self) -> Option<PathBuf> {
        self.from_file
            .clone()
            .or_else(|| self.bin_dir.as_ref().map(|dir| dir.join(FROM_FILE_BINARY)))
    }
}

impl ProcessConfig {
    /// Watchdog duration, `None` when disabled.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_secs > 0).then(|| std::time::Duration::from_secs(self.timeout_secs))
    }

    /// Directory under which scratch workspaces are created.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root.clone().unwrap_or_else(env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5055);
        assert_eq!(config.tools.cli_args, vec!["-t1".to_string()]);
        assert_eq!(config.tools.ffmpeg, "ffmpeg");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.process.max_upload_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tools.ffmpeg = "  ".to_string();
        assert!(config.validate().is_err());
    }

    /// Tool paths come from the bin dir unless set explicitly.
    #[test]
    fn test_tool_path_resolution() {
        let mut tools = AppConfig::default().tools;
        assert!(tools.to_file_path().is_none());
        assert!(tools.from_file_path().is_none());

        tools.bin_dir = Some(PathBuf::from("/opt/ggwave/bin"));
        assert_eq!(
            tools.to_file_path(),
            Some(PathBuf::from("/opt/ggwave/bin/ggwave-to-file"))
        );
        assert_eq!(
            tools.from_file_path(),
            Some(PathBuf::from("/opt/ggwave/bin/ggwave-from-file"))
        );

        tools.to_file = Some(PathBuf::from("/custom/encoder"));
        assert_eq!(tools.to_file_path(), Some(PathBuf::from("/custom/encoder")));
    }

    #[test]
    fn test_timeout_can_be_disabled() {
        let mut process = AppConfig::default().process;
        assert_eq!(process.timeout(), Some(std::time::Duration::from_secs(60)));
        process.timeout_secs = 0;
        assert_eq!(process.timeout(), None);
    }
}
