//! Pipe-backed channel.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};

use super::{default_shell, signal_terminate, ChannelError, ChildChannel, SpawnSpec};

/// A channel backed by three plain pipes.
///
/// No terminal semantics: the child sees non-tty standard streams and resize
/// is unsupported. Unlike the PTY variant, stderr arrives on its own stream,
/// so sessions on this channel deliver `Error` messages.
pub struct PipeChannel {
    child: Child,
    reader: Option<Box<dyn Read + Send>>,
    err_reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
}

impl PipeChannel {
    /// Spawns the child with all three standard streams piped.
    pub fn spawn(spec: &SpawnSpec) -> Result<Self, ChannelError> {
        let mut cmd = match spec.argv() {
            Some((program, args)) => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            None => Command::new(default_shell()),
        };
        if let Some(ref dir) = spec.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ChannelError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChannelError::Spawn("child stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ChannelError::Spawn("child stderr was not captured".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChannelError::Spawn("child stdin was not captured".to_string()))?;

        Ok(Self {
            child,
            reader: Some(Box::new(stdout)),
            err_reader: Some(Box::new(stderr)),
            writer: Some(Box::new(stdin)),
        })
    }
}

/// Maps an exit status to the code delivered in `Exit` messages. Children
/// killed by a signal report `128 + signo`, matching shell convention.
fn exit_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

impl ChildChannel for PipeChannel {
    fn take_output_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    fn take_error_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.err_reader.take()
    }

    fn take_writer(&mut self) -> Option<Box<dyn Write + Send>> {
        self.writer.take()
    }

    fn process_id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn resize(&mut self, _cols: u16, _rows: u16) -> Result<(), ChannelError> {
        Err(ChannelError::ResizeUnsupported)
    }

    fn try_wait(&mut self) -> Result<Option<i32>, ChannelError> {
        match self.child.try_wait() {
            Ok(Some(status)) => Ok(Some(exit_code(status))),
            Ok(None) => Ok(None),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }

    fn terminate(&mut self) -> Result<(), ChannelError> {
        if signal_terminate(self.child.id())? {
            return Ok(());
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
