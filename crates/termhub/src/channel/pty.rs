//! Pseudo-terminal backed channel.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use super::{default_shell, signal_terminate, ChannelError, ChildChannel, SpawnSpec};

/// A channel backed by a pseudo-terminal pair.
///
/// The child runs attached to the slave side; the parent reads and writes
/// through the master. Stdout and stderr are merged by the terminal, so this
/// channel has no separate error stream.
pub struct PtyChannel {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    pid: Option<u32>,
}

impl PtyChannel {
    /// Allocates a pseudo-terminal pair and spawns the child into it.
    pub fn spawn(spec: &SpawnSpec) -> Result<Self, ChannelError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ChannelError::Spawn(format!("failed to open PTY: {e}")))?;

        let mut cmd = match spec.argv() {
            Some((program, args)) => {
                let mut cmd = CommandBuilder::new(program);
                cmd.args(args);
                cmd
            }
            None => CommandBuilder::new(default_shell()),
        };
        if let Some(ref dir) = spec.working_dir {
            cmd.cwd(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ChannelError::Spawn(e.to_string()))?;
        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ChannelError::Spawn(format!("failed to clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ChannelError::Spawn(format!("failed to take writer: {e}")))?;

        Ok(Self {
            master: pair.master,
            child,
            reader: Some(reader),
            writer: Some(writer),
            pid,
        })
    }
}

impl ChildChannel for PtyChannel {
    fn take_output_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    fn take_error_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        // The terminal merges stderr into the output stream.
        None
    }

    fn take_writer(&mut self) -> Option<Box<dyn Write + Send>> {
        self.writer.take()
    }

    fn process_id(&self) -> Option<u32> {
        self.pid
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), ChannelError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ChannelError::Resize(e.to_string()))
    }

    fn try_wait(&mut self) -> Result<Option<i32>, ChannelError> {
        match self.child.try_wait() {
            Ok(Some(status)) => Ok(Some(status.exit_code() as i32)),
            Ok(None) => Ok(None),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }

    fn terminate(&mut self) -> Result<(), ChannelError> {
        if let Some(pid) = self.pid {
            if signal_terminate(pid)? {
                return Ok(());
            }
        }
        self.kill()
    }

    fn kill(&mut self) -> Result<(), ChannelError> {
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited; nothing to do.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }
}
