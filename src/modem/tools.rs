//! # Tool Pipelines
//!
//! Binds the configured ggwave executables to the three one-shot units of work
//! the HTTP API offers:
//!
//! | unit of work   | steps                                                       |
//! |----------------|-------------------------------------------------------------|
//! | encode         | `ggwave-to-file -f<out.wav>` fed the message on stdin       |
//! | decode         | write `in.wav`, run `ggwave-from-file in.wav`               |
//! | decode-webm    | write `in.webm`, `ffmpeg` → `in.wav`, then decode           |
//!
//! Every pipeline checks its executable first, so a missing tool never costs a
//! workspace. The workspace is destroyed before the outcome is returned.

use super::extract::DecodeReport;
use super::process::{self, is_executable, Invocation, ProcessError};
use super::workspace::Workspace;
use crate::config::{AppConfig, FROM_FILE_BINARY, TO_FILE_BINARY};
use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The external ggwave executables the service knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ToFile,
    FromFile,
    Cli,
}

impl Tool {
    pub fn binary_name(&self) -> &'static str {
        match self {
            Tool::ToFile => TO_FILE_BINARY,
            Tool::FromFile => FROM_FILE_BINARY,
            Tool::Cli => "ggwave-cli",
        }
    }

    fn not_configured(&self) -> AppError {
        AppError::Configuration(format!(
            "{} binary not found or not configured.",
            self.binary_name()
        ))
    }
}

/// Presence of each ggwave executable, as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAvailability {
    pub to_file: bool,
    pub from_file: bool,
    pub cli: bool,
}

/// Validated `/encode` input. Optional values are already rendered as the
/// text that follows their flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeOptions {
    pub message: String,
    pub volume: Option<String>,
    pub sample_rate: Option<String>,
    pub protocol: Option<String>,
}

/// Resolved tool locations plus the limits every run gets.
#[derive(Debug, Clone)]
pub struct Toolkit {
    to_file: Option<PathBuf>,
    from_file: Option<PathBuf>,
    cli: Option<PathBuf>,
    cli_args: Vec<String>,
    ffmpeg: PathBuf,
    workspace_root: PathBuf,
    timeout: Option<Duration>,
}

impl Toolkit {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            to_file: config.tools.to_file_path(),
            from_file: config.tools.from_file_path(),
            cli: config.tools.cli.clone(),
            cli_args: config.tools.cli_args.clone(),
            ffmpeg: PathBuf::from(&config.tools.ffmpeg),
            workspace_root: config.process.workspace_root(),
            timeout: config.process.timeout(),
        }
    }

    fn configured_path(&self, tool: Tool) -> Option<&Path> {
        match tool {
            Tool::ToFile => self.to_file.as_deref(),
            Tool::FromFile => self.from_file.as_deref(),
            Tool::Cli => self.cli.as_deref(),
        }
    }

    /// Path of `tool` if it exists and is executable right now.
    pub fn locate(&self, tool: Tool) -> Option<&Path> {
        self.configured_path(tool).filter(|path| is_executable(path))
    }

    fn require(&self, tool: Tool) -> AppResult<&Path> {
        self.locate(tool).ok_or_else(|| tool.not_configured())
    }

    pub fn availability(&self) -> ToolAvailability {
        ToolAvailability {
            to_file: self.locate(Tool::ToFile).is_some(),
            from_file: self.locate(Tool::FromFile).is_some(),
            cli: self.locate(Tool::Cli).is_some(),
        }
    }

    /// Program and arguments for a WebSocket session, if the session tool is present.
    pub fn session_command(&self) -> Option<(&Path, &[String])> {
        self.locate(Tool::Cli).map(|path| (path, self.cli_args.as_slice()))
    }

    pub fn converter(&self) -> &Path {
        &self.ffmpeg
    }

    fn workspace(&self) -> AppResult<Workspace> {
        Ok(Workspace::create(&self.workspace_root)?)
    }

    /// Encode `options.message` into WAV bytes.
    pub async fn encode(&self, options: &EncodeOptions) -> AppResult<Vec<u8>> {
        let program = self.require(Tool::ToFile)?.to_path_buf();
        let workspace = self.workspace()?;
        info!(
            workspace = %workspace.path().display(),
            message_len = options.message.len(),
            "encoding message"
        );

        let result = self.encode_in(&workspace, program, options).await;
        workspace.destroy().await;
        result
    }

    async fn encode_in(
        &self,
        workspace: &Workspace,
        program: PathBuf,
        options: &EncodeOptions,
    ) -> AppResult<Vec<u8>> {
        let wav = workspace.file("out.wav");
        let invocation = Invocation::new(program)
            .args(encode_args(&wav, options))
            .stdin(options.message.as_bytes())
            .timeout(self.timeout);

        process::run(invocation)
            .await
            .map_err(|err| tool_failure(Tool::ToFile, "encode failed", err))?;

        tokio::fs::read(&wav).await.map_err(|err| AppError::Io {
            error: "read wav failed".to_string(),
            details: Some(err.to_string()),
        })
    }

    /// Decode an uploaded WAV. Any tool failure is a hard error.
    pub async fn decode_wav(&self, wav: &[u8]) -> AppResult<DecodeReport> {
        let program = self.require(Tool::FromFile)?.to_path_buf();
        let workspace = self.workspace()?;
        info!(workspace = %workspace.path().display(), bytes = wav.len(), "decoding wav upload");

        let result = self.decode_in(&workspace, program, wav).await;
        workspace.destroy().await;
        result
    }

    async fn decode_in(
        &self,
        workspace: &Workspace,
        program: PathBuf,
        wav: &[u8],
    ) -> AppResult<DecodeReport> {
        let input = workspace.file("in.wav");
        tokio::fs::write(&input, wav).await?;

        let output = process::run(self.decode_invocation(program, &input))
            .await
            .map_err(|err| tool_failure(Tool::FromFile, "decode failed", err))?;

        Ok(DecodeReport::from_output(output.stdout))
    }

    /// Convert an uploaded WEBM/Opus clip to WAV, then decode it.
    ///
    /// Conversion failures are hard errors. Decode failures after a successful
    /// conversion only mean "nothing heard" and yield an empty message.
    pub async fn decode_webm(&self, webm: &[u8]) -> AppResult<DecodeReport> {
        let program = self.require(Tool::FromFile)?.to_path_buf();
        let workspace = self.workspace()?;
        info!(workspace = %workspace.path().display(), bytes = webm.len(), "decoding webm upload");

        let result = self.convert_and_decode(&workspace, program, webm).await;
        workspace.destroy().await;
        result
    }

    async fn convert_and_decode(
        &self,
        workspace: &Workspace,
        program: PathBuf,
        webm: &[u8],
    ) -> AppResult<DecodeReport> {
        let webm_path = workspace.file("in.webm");
        let wav_path = workspace.file("in.wav");
        tokio::fs::write(&webm_path, webm).await?;

        let conversion = Invocation::new(&self.ffmpeg)
            .args(conversion_args(&webm_path, &wav_path))
            .timeout(self.timeout);
        process::run(conversion).await.map_err(conversion_failure)?;
        debug!(wav = %wav_path.display(), "webm converted");

        match process::run(self.decode_invocation(program, &wav_path)).await {
            Ok(output) => Ok(DecodeReport::from_output(output.stdout)),
            Err(err) => {
                warn!(error = %err, "decode after conversion failed, reporting no message");
                Ok(DecodeReport::empty(err.stdout().to_string()))
            }
        }
    }

    fn decode_invocation(&self, program: PathBuf, wav: &Path) -> Invocation {
        Invocation::new(program).arg(wav).timeout(self.timeout)
    }
}

fn flag(name: &str, value: impl AsRef<OsStr>) -> OsString {
    let mut arg = OsString::from(name);
    arg.push(value);
    arg
}

/// `ggwave-to-file` arguments: output path first, then the optional tuning flags.
pub fn encode_args(wav: &Path, options: &EncodeOptions) -> Vec<OsString> {
    let mut args = vec![flag("-f", wav)];
    if let Some(volume) = &options.volume {
        args.push(flag("-v", volume));
    }
    if let Some(sample_rate) = &options.sample_rate {
        args.push(flag("-s", sample_rate));
    }
    if let Some(protocol) = &options.protocol {
        args.push(flag("-p", protocol));
    }
    args
}

/// ffmpeg arguments producing 48 kHz mono WAV, overwriting the target.
pub fn conversion_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-v", "error", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(input.as_os_str().to_os_string());
    args.extend(
        ["-ar", "48000", "-ac", "1", "-f", "wav"]
            .iter()
            .map(OsString::from),
    );
    args.push(output.as_os_str().to_os_string());
    args
}

fn tool_failure(tool: Tool, failed: &str, err: ProcessError) -> AppError {
    match err {
        ProcessError::Failed { stderr, .. } => AppError::Process {
            error: failed.to_string(),
            details: Some(stderr),
        },
        ProcessError::Launch { .. } => AppError::Process {
            error: format!("{} not found or failed to launch", tool.binary_name()),
            details: Some(err.to_string()),
        },
        ProcessError::Timeout(_) => AppError::Timeout(format!("{}: {}", tool.binary_name(), err)),
        ProcessError::Io(_) => AppError::Io {
            error: failed.to_string(),
            details: Some(err.to_string()),
        },
    }
}

fn conversion_failure(err: ProcessError) -> AppError {
    match err {
        ProcessError::Launch { .. } => AppError::Conversion {
            error: "ffmpeg not found or failed".to_string(),
            details: Some(err.to_string()),
        },
        ProcessError::Failed { stderr, .. } => AppError::Conversion {
            error: "ffmpeg failed".to_string(),
            details: Some(stderr),
        },
        ProcessError::Timeout(_) => AppError::Timeout(format!("ffmpeg: {}", err)),
        ProcessError::Io(_) => AppError::Conversion {
            error: "ffmpeg failed".to_string(),
            details: Some(err.to_string()),
        },
    }
}
