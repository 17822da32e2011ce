//! # Modem Orchestration
//!
//! Everything needed to drive the external ggwave toolset for one unit of work.
//! The acoustic encoding itself happens inside the external executables; this
//! module owns their lifecycle.
//!
//! ## Key Components:
//! - **Workspace**: per-request scratch directory with guaranteed cleanup
//! - **Process**: spawn, feed, drain and reap one tool run, with a watchdog
//! - **Extract**: finds the decoded payload in the tool's text output
//! - **Guard**: first-completion-wins latch shared by racing completion sources
//! - **Tools**: the encode / decode / decode-webm pipelines built from the above
//!
//! The long-lived WebSocket variant lives in `crate::websocket` and reuses the
//! extractor and the latch.

pub mod extract;
pub mod guard;
pub mod process;
pub mod tools;
pub mod workspace;

pub use extract::extract;
pub use guard::CompletionLatch;
pub use tools::{EncodeOptions, ToolAvailability, Toolkit};
