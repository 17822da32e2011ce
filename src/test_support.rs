//! Fake ggwave tools for tests.
//!
//! The scripts mimic the real binaries closely enough for the service:
//! - `ggwave-to-file` writes `RIFF` followed by its stdin to the `-f<path>` file
//! - `ggwave-from-file` prints the ggwave "Decoded message" line for that payload
//! - `ggwave-cli` echoes every stdin line back as a decoded message, and
//!   acknowledges it on stderr
//! - `ffmpeg` copies its `-i` input to its last argument

use crate::config::AppConfig;
use crate::state::AppState;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

const TO_FILE: &str = r#"out=""
for arg in "$@"; do
  case "$arg" in
    -f*) out="${arg#-f}" ;;
  esac
done
if [ -z "$out" ]; then
  echo "missing output file" >&2
  exit 2
fi
msg=$(cat)
printf 'RIFF%s' "$msg" > "$out"
"#;

const FROM_FILE: &str = r#"msg=$(tail -c +5 "$1")
if [ "$msg" = "fail" ]; then
  echo "partial output"
  echo "decoder crashed" >&2
  exit 1
fi
echo "Receiving sound data ..."
if [ -n "$msg" ]; then
  echo "Decoded message with length ${#msg}: '$msg'"
fi
"#;

const CLI: &str = r#"case "$1" in
  --exit)
    echo "bye"
    exit "$2"
    ;;
  --pidfile)
    echo $$ > "$2"
    ;;
esac
while IFS= read -r line; do
  echo "Decoded message with length ${#line}: '$line'"
  echo "received $line" >&2
done
"#;

const FFMPEG: &str = r#"in=""
prev=""
last=""
for a in "$@"; do
  if [ "$prev" = "-i" ]; then
    in="$a"
  fi
  prev="$a"
  last="$a"
done
if [ ! -s "$in" ]; then
  echo "$in: Invalid data found when processing input" >&2
  exit 1
fi
cp "$in" "$last"
"#;

/// A directory of fake tools plus an isolated workspace root.
pub struct FakeTools {
    pub bin: TempDir,
    pub workspace_root: TempDir,
}

impl FakeTools {
    pub fn new() -> Self {
        let bin = tempfile::tempdir().unwrap();
        write_script(bin.path(), "ggwave-to-file", TO_FILE);
        write_script(bin.path(), "ggwave-from-file", FROM_FILE);
        write_script(bin.path(), "ggwave-cli", CLI);
        write_script(bin.path(), "ffmpeg", FFMPEG);

        Self {
            bin,
            workspace_root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.bin.path().join(name)
    }

    pub fn config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.tools.bin_dir = Some(self.bin.path().to_path_buf());
        config.tools.cli = Some(self.path("ggwave-cli"));
        config.tools.cli_args = Vec::new();
        config.tools.ffmpeg = self.path("ffmpeg").to_string_lossy().into_owned();
        config.process.workspace_root = Some(self.workspace_root.path().to_path_buf());
        config.process.timeout_secs = 10;
        config
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.config())
    }

    /// Scratch directories currently alive under the workspace root.
    pub fn workspace_count(&self) -> usize {
        std::fs::read_dir(self.workspace_root.path()).unwrap().count()
    }
}

/// A single-field `multipart/form-data` body and its content type.
pub fn multipart_body(field: &str, filename: &str, content_type: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary = "ggwave-test-boundary";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}
