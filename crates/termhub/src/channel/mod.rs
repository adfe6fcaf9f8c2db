//! Child-process channels.
//!
//! A channel owns one child process together with its I/O endpoints. The two
//! implementations differ in how the child's standard streams are attached:
//!
//! - [`PtyChannel`]: a pseudo-terminal pair. The child believes it is on an
//!   interactive terminal, so line discipline, resize notifications, and
//!   signal delivery all work. Stdout and stderr are merged by the kernel.
//! - [`PipeChannel`]: three plain pipes. No terminal semantics and no
//!   resize, but stderr arrives on its own stream.
//!
//! The variant is chosen once at construction via [`ChannelKind`]; nothing
//! downstream branches on the platform or channel type again.

pub mod pipe;
pub mod pty;

use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use pipe::PipeChannel;
pub use pty::PtyChannel;

/// Errors from channel operations.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Channel allocation or child spawn failed.
    #[error("failed to spawn child: {0}")]
    Spawn(String),

    /// Resize was requested on a channel without terminal semantics.
    #[error("resize is not supported by this channel")]
    ResizeUnsupported,

    /// The kernel rejected the new window geometry.
    #[error("failed to resize terminal: {0}")]
    Resize(String),

    /// Sending a termination signal failed.
    #[error("failed to signal child: {0}")]
    Signal(String),

    /// I/O error talking to the child.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which kind of channel backs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Pseudo-terminal backed (default).
    #[default]
    Pty,
    /// Plain pipe backed, with a separate error stream.
    Pipe,
}

/// Everything needed to spawn a child on a channel.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    /// Command line, split on whitespace into program and arguments. When
    /// absent or blank, the default shell is launched interactively.
    pub command: Option<String>,
    /// Working directory for the child. Inherited from the parent when
    /// absent.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Initial terminal width in columns.
    pub cols: u16,
    /// Initial terminal height in rows.
    pub rows: u16,
}

impl SpawnSpec {
    /// Splits the command line into program and arguments, or `None` when
    /// the default shell should be launched instead.
    pub(crate) fn argv(&self) -> Option<(String, Vec<String>)> {
        let command = self.command.as_deref()?.trim();
        if command.is_empty() {
            return None;
        }
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some((program, parts.collect()))
    }
}

/// One child process plus its I/O endpoints, with platform and stream
/// differences resolved at construction.
///
/// The reader/writer endpoints are taken out exactly once each, to be moved
/// onto the session's dedicated I/O threads. The channel itself keeps the
/// child handle (and terminal master, where applicable) for resize, status
/// polling, and termination.
pub trait ChildChannel: Send {
    /// Takes the child's output stream. Returns `None` after the first call.
    fn take_output_reader(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Takes the child's error stream. `None` for channels that merge
    /// streams, and after the first call.
    fn take_error_reader(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Takes the child's input stream. Returns `None` after the first call.
    fn take_writer(&mut self) -> Option<Box<dyn Write + Send>>;

    /// OS process identifier of the child, while known.
    fn process_id(&self) -> Option<u32>;

    /// Propagates new window geometry to the channel.
    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), ChannelError>;

    /// Checks whether the child has exited, without blocking. Returns the
    /// exit code once it has.
    fn try_wait(&mut self) -> Result<Option<i32>, ChannelError>;

    /// Requests graceful termination (SIGTERM on Unix). Falls back to
    /// forceful termination where graceful signaling is unavailable.
    fn terminate(&mut self) -> Result<(), ChannelError>;

    /// Terminates the child forcefully.
    fn kill(&mut self) -> Result<(), ChannelError>;
}

/// Opens a channel of the requested kind and spawns the child into it.
pub fn open(kind: ChannelKind, spec: &SpawnSpec) -> Result<Box<dyn ChildChannel>, ChannelError> {
    match kind {
        ChannelKind::Pty => Ok(Box::new(PtyChannel::spawn(spec)?)),
        ChannelKind::Pipe => Ok(Box::new(PipeChannel::spawn(spec)?)),
    }
}

/// The platform's default interactive shell: `$SHELL`, falling back to
/// `/bin/sh` (`cmd.exe` on Windows).
pub fn default_shell() -> String {
    #[cfg(windows)]
    {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
    #[cfg(not(windows))]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

/// Sends a graceful termination signal to `pid`. Returns false when the
/// platform has no graceful signal, so the caller can fall back to a
/// forceful kill.
pub(crate) fn signal_terminate(pid: u32) -> Result<bool, ChannelError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if pid == 0 || pid > i32::MAX as u32 {
            return Err(ChannelError::Signal(format!("pid {pid} out of range")));
        }
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(true),
            // Already gone; nothing left to signal.
            Err(nix::errno::Errno::ESRCH) => Ok(true),
            Err(e) => Err(ChannelError::Signal(e.to_string())),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_default_is_pty() {
        assert_eq!(ChannelKind::default(), ChannelKind::Pty);
    }

    #[test]
    fn test_channel_kind_serialization() {
        assert_eq!(serde_json::to_string(&ChannelKind::Pty).unwrap(), r#""pty""#);
        assert_eq!(
            serde_json::to_string(&ChannelKind::Pipe).unwrap(),
            r#""pipe""#
        );
        let kind: ChannelKind = serde_json::from_str(r#""pipe""#).unwrap();
        assert_eq!(kind, ChannelKind::Pipe);
    }

    #[test]
    fn test_spawn_spec_argv_split() {
        let spec = SpawnSpec {
            command: Some("echo hello world".to_string()),
            ..Default::default()
        };
        let (program, args) = spec.argv().unwrap();
        assert_eq!(program, "echo");
        assert_eq!(args, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn test_spawn_spec_argv_blank_means_shell() {
        let spec = SpawnSpec {
            command: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(spec.argv().is_none());
        assert!(SpawnSpec::default().argv().is_none());
    }

    #[test]
    fn test_default_shell_is_absolute() {
        let shell = default_shell();
        assert!(!shell.is_empty());
        #[cfg(unix)]
        assert!(shell.starts_with('/'), "expected absolute path, got {shell}");
    }
}
