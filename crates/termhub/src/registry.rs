//! Session registry: identifier-keyed access to many session engines.
//!
//! The registry is the hub the embedding layer talks to. It generates
//! session identifiers, routes by-id commands to the matching engine, and
//! funnels every session's output through one aggregated sink, each message
//! tagged with its session identifier. Construct it at the application's
//! composition root and call [`SessionRegistry::shutdown`] when done;
//! dropping the registry also closes everything.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use thiserror::Error;

use crate::channel::ChannelKind;
use crate::config::Config;
use crate::engine::{EngineError, EngineOptions, KillOutcome, SessionEngine};
use crate::message::{SessionId, TaggedMessage};

/// Errors from registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No session with the given identifier is registered.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The matching engine rejected the operation.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Sink receiving every session's messages, tagged by session identifier.
/// Invoked from reader-thread context, never the caller's.
pub type OutputSink = Arc<dyn Fn(TaggedMessage) + Send + Sync>;

/// Textual prefix of generated session identifiers.
const SESSION_ID_PREFIX: &str = "term-";

/// Per-session creation parameters. Everything left unset falls back to the
/// registry's configuration.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Command line for the child; the configured shell when absent.
    pub command: Option<String>,
    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Initial terminal size, `(cols, rows)`.
    pub size: Option<(u16, u16)>,
    /// Channel kind override.
    pub channel: Option<ChannelKind>,
}

/// Maps opaque session identifiers to running engines.
pub struct SessionRegistry {
    config: Config,
    sessions: DashMap<SessionId, Arc<SessionEngine>>,
    sink: Arc<RwLock<Option<OutputSink>>>,
}

impl SessionRegistry {
    /// Creates an empty registry with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            sink: Arc::new(RwLock::new(None)),
        }
    }

    /// Registers the aggregated output sink. Single slot, last registration
    /// wins; replacement is synchronized against in-flight deliveries.
    pub fn set_output_sink<F>(&self, sink: F)
    where
        F: Fn(TaggedMessage) + Send + Sync + 'static,
    {
        *self.sink.write().unwrap() = Some(Arc::new(sink));
    }

    /// Removes the aggregated output sink; subsequent messages are dropped.
    pub fn clear_output_sink(&self) {
        *self.sink.write().unwrap() = None;
    }

    /// Creates and starts a new session, returning its identifier.
    ///
    /// When `start` fails the engine is discarded and nothing is
    /// registered, so every identifier in the registry refers to an engine
    /// that was successfully started.
    pub fn create(
        &self,
        command: Option<&str>,
        working_dir: Option<&Path>,
    ) -> Result<SessionId, RegistryError> {
        self.create_with_options(CreateOptions {
            command: command.map(str::to_string),
            working_dir: working_dir.map(Path::to_path_buf),
            ..Default::default()
        })
    }

    /// [`SessionRegistry::create`] with environment, size, and channel
    /// overrides.
    pub fn create_with_options(&self, options: CreateOptions) -> Result<SessionId, RegistryError> {
        let (cols, rows) = options
            .size
            .unwrap_or((self.config.session.cols, self.config.session.rows));
        let engine_options = EngineOptions {
            env: options.env,
            cols,
            rows,
            channel: options.channel.unwrap_or(self.config.session.channel),
            ..EngineOptions::from_config(&self.config)
        };
        let engine = Arc::new(SessionEngine::new(engine_options));

        let id = self.generate_id();
        let sink = Arc::clone(&self.sink);
        let session_id = id.clone();
        // Tag every message with the session identifier before it reaches
        // the aggregated sink.
        engine.set_output_callback(move |message| {
            let sink = sink.read().unwrap().clone();
            if let Some(sink) = sink {
                sink(TaggedMessage::new(session_id.clone(), message));
            }
        });

        let command = options
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.config.session.default_shell.clone());
        engine.start(Some(&command), options.working_dir.as_deref())?;

        self.sessions.insert(id.clone(), engine);
        tracing::info!(session_id = %id, command = %command, "created session");
        Ok(id)
    }

    /// Thread-safe lookup of a session engine.
    pub fn get(&self, id: &str) -> Option<Arc<SessionEngine>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Force-kills a session and removes it. A second call on the same
    /// identifier reports [`RegistryError::UnknownSession`].
    pub fn close(&self, id: &str) -> Result<KillOutcome, RegistryError> {
        let (id, engine) = self
            .sessions
            .remove(id)
            .ok_or_else(|| RegistryError::UnknownSession(id.to_string()))?;
        let outcome = engine.kill(true)?;
        tracing::info!(session_id = %id, outcome = ?outcome, "closed session");
        Ok(outcome)
    }

    /// Queues input for a session's child.
    pub fn send_input(&self, id: &str, text: &str) -> Result<(), RegistryError> {
        let engine = self
            .get(id)
            .ok_or_else(|| RegistryError::UnknownSession(id.to_string()))?;
        engine.send_input(text).map_err(RegistryError::from)
    }

    /// Queues input with a trailing newline.
    pub fn send_command(&self, id: &str, command: &str) -> Result<(), RegistryError> {
        let engine = self
            .get(id)
            .ok_or_else(|| RegistryError::UnknownSession(id.to_string()))?;
        engine.send_command(command).map_err(RegistryError::from)
    }

    /// Propagates new window geometry to a session.
    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), RegistryError> {
        let engine = self
            .get(id)
            .ok_or_else(|| RegistryError::UnknownSession(id.to_string()))?;
        engine.resize(cols, rows).map_err(RegistryError::from)
    }

    /// Snapshot of identifiers whose engine currently reports running.
    /// Best-effort: may be stale immediately after return.
    pub fn list_active(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_running())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of registered sessions, running or not.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Force-kills and discards every registered session. Bounded by each
    /// engine's own shutdown timeouts; does not block indefinitely.
    pub fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((id, engine)) = self.sessions.remove(&id) {
                if let Err(e) = engine.kill(true) {
                    tracing::warn!(session_id = %id, error = %e, "failed to kill session during shutdown");
                }
            }
        }
        tracing::debug!("registry shut down");
    }

    /// Draws `term-` plus 8 random hex digits, re-drawing on the
    /// negligible chance of a collision with a live session.
    fn generate_id(&self) -> SessionId {
        loop {
            let id = format!("{SESSION_ID_PREFIX}{:08x}", rand::random::<u32>());
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
