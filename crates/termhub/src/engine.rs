//! Session engine: one child process and its I/O machinery.
//!
//! An engine owns exactly one child, spawned onto a [`ChildChannel`], plus
//! the dedicated OS threads that move bytes in and out of it: one reader
//! thread for the output stream (and a second one for the error stream on
//! pipe channels), and one writer thread draining a FIFO input queue. The
//! engine knows nothing about other sessions.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::channel::{self, ChannelError, ChannelKind, ChildChannel};
use crate::config::Config;
use crate::message::Message;

/// Errors from session engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Channel allocation or child spawn failed; no partial state retained.
    #[error("failed to spawn session: {0}")]
    SpawnFailed(String),

    /// `start` was called on a session that is already running.
    #[error("session is already running")]
    AlreadyRunning,

    /// The operation requires a running session.
    #[error("session is not running")]
    NotRunning,

    /// The bounded input queue is at capacity.
    #[error("input queue is full")]
    InputQueueFull,

    /// The session's channel has no terminal semantics.
    #[error("resize is not supported by this session's channel")]
    ResizeUnsupported,

    /// The kernel rejected the new window geometry.
    #[error("failed to resize session: {0}")]
    ResizeFailed(String),
}

/// Which path a [`SessionEngine::kill`] took to stop the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The child exited within the grace period after a graceful signal.
    Graceful,
    /// The child was terminated forcefully, either on request or after
    /// ignoring the graceful signal.
    Forced,
    /// The session was already stopped; the call had no effect.
    AlreadyExited,
}

/// Construction-time parameters for a session engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Initial terminal width in columns.
    pub cols: u16,
    /// Initial terminal height in rows.
    pub rows: u16,
    /// Which channel kind backs the session.
    pub channel: ChannelKind,
    /// Maximum number of pending input entries.
    pub max_input_queue: usize,
    /// How long to wait for the child to exit before escalating.
    pub grace_period: Duration,
    /// How long to wait for an I/O thread before abandoning its join.
    pub join_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineOptions {
    /// Derives engine options from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            env: Vec::new(),
            cols: config.session.cols,
            rows: config.session.rows,
            channel: config.session.channel,
            max_input_queue: config.session.max_input_queue,
            grace_period: config.shutdown.grace_period(),
            join_timeout: config.shutdown.join_timeout(),
        }
    }
}

/// Sink invoked with every message a session produces. Called from the
/// session's reader-thread context, never the caller's.
pub type EngineSink = Arc<dyn Fn(Message) + Send + Sync>;

/// Read buffer size for the output and error streams.
const READ_BUFFER_SIZE: usize = 4096;

/// How long the writer thread waits for input before re-checking shutdown.
const WRITER_WAIT: Duration = Duration::from_millis(100);

/// Poll interval while waiting for the child to be reaped or a thread to
/// finish.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long the output reader waits for the error stream to drain before
/// delivering the terminal event.
const ERROR_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Exit code reported when the child's real status could not be collected.
const FALLBACK_EXIT_CODE: i32 = -1;

/// Bounded FIFO queue of pending input, drained by the writer thread.
struct InputQueue {
    entries: Mutex<VecDeque<Message>>,
    available: Condvar,
    capacity: usize,
}

impl InputQueue {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Enqueues one entry, rejecting when the queue is at capacity.
    fn push(&self, message: Message) -> Result<(), EngineError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            return Err(EngineError::InputQueueFull);
        }
        entries.push_back(message);
        self.available.notify_one();
        Ok(())
    }

    /// Blocks until input arrives, shutdown is requested, or `wait`
    /// elapses, then drains everything pending in FIFO order.
    fn drain_or_wait(&self, wait: Duration, should_stop: &AtomicBool) -> Vec<Message> {
        let entries = self.entries.lock().unwrap();
        let (mut entries, _) = self
            .available
            .wait_timeout_while(entries, wait, |entries| {
                entries.is_empty() && !should_stop.load(Ordering::SeqCst)
            })
            .unwrap();
        entries.drain(..).collect()
    }

    fn wake(&self) {
        self.available.notify_all();
    }

    fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

/// Single registered delivery target. Replacement is synchronized against
/// in-flight deliveries; the callback itself runs outside the lock.
struct SinkSlot {
    slot: RwLock<Option<EngineSink>>,
}

impl SinkSlot {
    fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    fn set(&self, sink: EngineSink) {
        *self.slot.write().unwrap() = Some(sink);
    }

    fn emit(&self, message: Message) {
        let sink = self.slot.read().unwrap().clone();
        if let Some(sink) = sink {
            sink(message);
        }
    }
}

/// Per-run I/O state: the channel and the thread handles. Present from a
/// successful `start` until `kill` tears it down.
struct IoState {
    channel: Arc<Mutex<Box<dyn ChildChannel>>>,
    reader: Option<JoinHandle<()>>,
    err_reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// One child process plus its I/O threads.
///
/// Created idle; `start` transitions to running (or fails with nothing
/// retained), `kill` stops the child and releases every owned resource.
/// Dropping a running engine force-kills it.
///
/// All methods take `&self`; engines are shared as `Arc<SessionEngine>`
/// between the registry and the tagging adapters.
pub struct SessionEngine {
    options: EngineOptions,
    running: Arc<AtomicBool>,
    should_stop: Arc<AtomicBool>,
    exit_emitted: Arc<AtomicBool>,
    pid: AtomicU32,
    input: Arc<InputQueue>,
    sink: Arc<SinkSlot>,
    io: Mutex<Option<IoState>>,
}

impl SessionEngine {
    /// Creates an idle engine.
    pub fn new(options: EngineOptions) -> Self {
        let capacity = options.max_input_queue;
        Self {
            options,
            running: Arc::new(AtomicBool::new(false)),
            should_stop: Arc::new(AtomicBool::new(false)),
            exit_emitted: Arc::new(AtomicBool::new(false)),
            pid: AtomicU32::new(0),
            input: Arc::new(InputQueue::new(capacity)),
            sink: Arc::new(SinkSlot::new()),
            io: Mutex::new(None),
        }
    }

    /// Registers the delivery target for this session's messages. Last
    /// registration wins. Must be installed before `start` to observe all
    /// messages reliably.
    pub fn set_output_callback<F>(&self, callback: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.sink.set(Arc::new(callback));
    }

    /// Spawns the child and launches the I/O threads.
    ///
    /// `command` is split on whitespace into program and arguments; when
    /// absent, the default shell is launched interactively. Fails with
    /// [`EngineError::AlreadyRunning`] on a live session and
    /// [`EngineError::SpawnFailed`] when the OS rejects the spawn; a failed
    /// start retains no state and the engine can be started again.
    pub fn start(
        &self,
        command: Option<&str>,
        working_dir: Option<&Path>,
    ) -> Result<(), EngineError> {
        let mut io_guard = self.io.lock().unwrap();
        if io_guard.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let spec = channel::SpawnSpec {
            command: command.map(str::to_string),
            working_dir: working_dir.map(Path::to_path_buf),
            env: self.options.env.clone(),
            cols: self.options.cols,
            rows: self.options.rows,
        };
        let mut channel = channel::open(self.options.channel, &spec)
            .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;

        let reader = channel
            .take_output_reader()
            .ok_or_else(|| EngineError::SpawnFailed("output stream unavailable".to_string()))?;
        let err_reader = channel.take_error_reader();
        let writer = channel
            .take_writer()
            .ok_or_else(|| EngineError::SpawnFailed("input stream unavailable".to_string()))?;

        let pid = channel.process_id().unwrap_or(0);
        self.pid.store(pid, Ordering::SeqCst);
        self.should_stop.store(false, Ordering::SeqCst);
        self.exit_emitted.store(false, Ordering::SeqCst);
        self.input.clear();
        self.running.store(true, Ordering::SeqCst);

        let channel = Arc::new(Mutex::new(channel));

        // Error stream first: the output reader waits on err_done before
        // delivering the terminal event, so no Error message trails it.
        let err_done = Arc::new(AtomicBool::new(err_reader.is_none()));
        let err_handle = err_reader.map(|r| self.spawn_error_reader(r, Arc::clone(&err_done)));
        let reader_handle = self.spawn_output_reader(reader, Arc::clone(&channel), err_done);
        let writer_handle = self.spawn_input_writer(writer);

        *io_guard = Some(IoState {
            channel,
            reader: Some(reader_handle),
            err_reader: err_handle,
            writer: Some(writer_handle),
        });

        tracing::info!(pid, channel = ?self.options.channel, "session started");
        Ok(())
    }

    /// Enqueues `text` verbatim for the child's input stream and wakes the
    /// writer. Delivery is asynchronous; a successful return does not
    /// confirm the child has read it.
    pub fn send_input(&self, text: impl Into<String>) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        self.input.push(Message::input(text))
    }

    /// `send_input` with a trailing newline.
    pub fn send_command(&self, command: &str) -> Result<(), EngineError> {
        self.send_input(format!("{command}\n"))
    }

    /// Stops the session: two-phase shutdown, bounded at every step.
    ///
    /// Requests cooperative stop, signals the child (gracefully unless
    /// `force`), waits up to the grace period, escalates to a forceful kill
    /// if the child ignores the request, then joins the I/O threads and
    /// releases the channel. The terminal `Exit` message is delivered
    /// exactly once per session, whether the child stopped here or exited
    /// on its own earlier. Idempotent: a second call reports
    /// [`KillOutcome::AlreadyExited`].
    pub fn kill(&self, force: bool) -> Result<KillOutcome, EngineError> {
        // Hold the slot for the whole teardown so a concurrent start cannot
        // interleave.
        let mut io_guard = self.io.lock().unwrap();
        let Some(mut io) = io_guard.take() else {
            return Ok(KillOutcome::AlreadyExited);
        };

        let was_running = self.running.load(Ordering::SeqCst);
        self.should_stop.store(true, Ordering::SeqCst);
        self.input.wake();

        let mut outcome = KillOutcome::AlreadyExited;
        if was_running {
            let request = {
                let mut channel = io.channel.lock().unwrap();
                if force {
                    channel.kill()
                } else {
                    channel.terminate()
                }
            };
            if let Err(e) = request {
                tracing::debug!(error = %e, "termination request failed");
            }

            if self.await_stopped(self.options.grace_period) {
                outcome = if force {
                    KillOutcome::Forced
                } else {
                    KillOutcome::Graceful
                };
            } else {
                tracing::warn!(
                    pid = self.pid.load(Ordering::SeqCst),
                    "child did not exit within grace period, escalating"
                );
                if let Err(e) = io.channel.lock().unwrap().kill() {
                    tracing::debug!(error = %e, "forced kill failed");
                }
                self.await_stopped(self.options.grace_period);
                outcome = KillOutcome::Forced;
            }
        }

        join_bounded(io.reader.take(), self.options.join_timeout, "reader");
        join_bounded(io.err_reader.take(), self.options.join_timeout, "error-reader");
        join_bounded(io.writer.take(), self.options.join_timeout, "writer");

        self.running.store(false, Ordering::SeqCst);
        self.input.clear();
        if !self.exit_emitted.swap(true, Ordering::SeqCst) {
            // The reader never got to report; synthesize the terminal event.
            self.sink.emit(Message::exit(FALLBACK_EXIT_CODE));
        }

        tracing::info!(
            pid = self.pid.load(Ordering::SeqCst),
            outcome = ?outcome,
            "session stopped"
        );
        Ok(outcome)
    }

    /// Whether the session currently reports running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// OS process identifier of the child, while known.
    pub fn process_id(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Propagates new window geometry to the channel. Fails with
    /// [`EngineError::ResizeUnsupported`] on pipe-backed sessions.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), EngineError> {
        let io_guard = self.io.lock().unwrap();
        let Some(io) = io_guard.as_ref() else {
            return Err(EngineError::NotRunning);
        };
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        let result = io.channel
            .lock()
            .unwrap()
            .resize(cols, rows)
            .map_err(|e| match e {
                ChannelError::ResizeUnsupported => EngineError::ResizeUnsupported,
                other => EngineError::ResizeFailed(other.to_string()),
            });
        result
    }

    /// Polls the running flag until cleared or `timeout` elapses.
    fn await_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.running.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
        true
    }

    fn spawn_output_reader(
        &self,
        mut reader: Box<dyn Read + Send>,
        channel: Arc<Mutex<Box<dyn ChildChannel>>>,
        err_done: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let should_stop = Arc::clone(&self.should_stop);
        let exit_emitted = Arc::clone(&self.exit_emitted);
        let sink = Arc::clone(&self.sink);
        let input = Arc::clone(&self.input);
        let grace_period = self.options.grace_period;

        thread::spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                if should_stop.load(Ordering::SeqCst) {
                    break;
                }
                match reader.read(&mut buf) {
                    // EOF: the child closed its side.
                    Ok(0) => break,
                    Ok(n) => {
                        if exit_emitted.load(Ordering::SeqCst) {
                            break;
                        }
                        sink.emit(Message::output(
                            String::from_utf8_lossy(&buf[..n]).into_owned(),
                        ));
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        if !should_stop.load(Ordering::SeqCst) {
                            tracing::debug!(error = %e, "session output stream closed");
                        }
                        break;
                    }
                }
            }

            // The stream is gone: the child exited or shutdown was
            // requested. Reap it, let the error stream drain, and deliver
            // the terminal event exactly once.
            let code = wait_for_exit(&channel, grace_period).unwrap_or(FALLBACK_EXIT_CODE);
            let drain_deadline = Instant::now() + ERROR_DRAIN_TIMEOUT;
            while !err_done.load(Ordering::SeqCst) && Instant::now() < drain_deadline {
                thread::sleep(Duration::from_millis(5));
            }

            running.store(false, Ordering::SeqCst);
            should_stop.store(true, Ordering::SeqCst);
            input.wake();
            if !exit_emitted.swap(true, Ordering::SeqCst) {
                sink.emit(Message::exit(code));
            }
        })
    }

    fn spawn_error_reader(
        &self,
        mut reader: Box<dyn Read + Send>,
        err_done: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let should_stop = Arc::clone(&self.should_stop);
        let exit_emitted = Arc::clone(&self.exit_emitted);
        let sink = Arc::clone(&self.sink);

        thread::spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                if should_stop.load(Ordering::SeqCst) {
                    break;
                }
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if exit_emitted.load(Ordering::SeqCst) {
                            break;
                        }
                        sink.emit(Message::error(
                            String::from_utf8_lossy(&buf[..n]).into_owned(),
                        ));
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            err_done.store(true, Ordering::SeqCst);
        })
    }

    fn spawn_input_writer(&self, mut writer: Box<dyn Write + Send>) -> JoinHandle<()> {
        let should_stop = Arc::clone(&self.should_stop);
        let input = Arc::clone(&self.input);

        thread::spawn(move || loop {
            if should_stop.load(Ordering::SeqCst) {
                break;
            }
            let batch = input.drain_or_wait(WRITER_WAIT, &should_stop);
            if should_stop.load(Ordering::SeqCst) {
                // Shutdown has begun; pending input is discarded.
                break;
            }
            for entry in batch {
                if let Message::Input { payload } = entry {
                    let result = writer
                        .write_all(payload.as_bytes())
                        .and_then(|_| writer.flush());
                    if let Err(e) = result {
                        tracing::debug!(error = %e, "input write failed, stopping writer");
                        return;
                    }
                }
            }
        })
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        let live = self.io.lock().map(|io| io.is_some()).unwrap_or(false);
        if live {
            let _ = self.kill(true);
        }
    }
}

/// Polls the child's status until it is reaped or `timeout` elapses.
fn wait_for_exit(channel: &Arc<Mutex<Box<dyn ChildChannel>>>, timeout: Duration) -> Option<i32> {
    let deadline = Instant::now() + timeout;
    loop {
        {
            let mut channel = channel.lock().unwrap();
            match channel.try_wait() {
                Ok(Some(code)) => return Some(code),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "child status poll failed");
                    return None;
                }
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Joins a thread, abandoning it with a warning when `timeout` elapses, so
/// a reader stuck in a non-interruptible syscall cannot block the caller
/// indefinitely.
fn join_bounded(handle: Option<JoinHandle<()>>, timeout: Duration, name: &str) {
    let Some(handle) = handle else {
        return;
    };
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(thread = name, "I/O thread did not stop in time, abandoning join");
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        tracing::error!(thread = name, "I/O thread panicked");
    }
}
