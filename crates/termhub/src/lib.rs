//! # TermHub
//!
//! Terminal process multiplexer: creates, drives, and tears down multiple
//! concurrently running interactive shell sessions, each backed by a
//! pseudo-terminal or a pipe channel, and streams their output
//! asynchronously to one consumer-registered sink, tagged by session
//! identifier.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     SessionRegistry                      │
//! │  id ──► Arc<SessionEngine>          aggregated sink      │
//! │             │                            ▲               │
//! │             │ per-session callback ──────┘ (id-tagged)   │
//! ├─────────────┼────────────────────────────────────────────┤
//! │        SessionEngine (one per session)                   │
//! │   reader thread(s) ◄── ChildChannel ◄── writer thread    │
//! │                      PtyChannel | PipeChannel            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use termhub::{Config, Message, SessionRegistry};
//!
//! fn main() -> anyhow::Result<()> {
//!     let registry = SessionRegistry::new(Config::default());
//!     registry.set_output_sink(|tagged| {
//!         if let Message::Output { payload } = &tagged.message {
//!             print!("[{}] {payload}", tagged.session_id);
//!         }
//!     });
//!
//!     let id = registry.create(None, None)?;
//!     registry.send_command(&id, "echo hello")?;
//!     // ...
//!     registry.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: child-process channels (PTY or pipes)
//! - [`engine`]: one session's lifecycle and I/O threads
//! - [`registry`]: identifier-keyed session hub and aggregated sink
//! - [`global`]: lazy process-wide registry accessor
//! - [`config`]: configuration loading and defaults
//! - [`message`]: output delivery types

pub mod channel;
pub mod config;
pub mod engine;
pub mod global;
pub mod message;
pub mod registry;

// Re-export channel types for convenience
pub use channel::{ChannelError, ChannelKind, ChildChannel, PipeChannel, PtyChannel};

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export engine types for convenience
pub use engine::{EngineError, EngineOptions, KillOutcome, SessionEngine};

// Re-export message types for convenience
pub use message::{Message, SessionId, TaggedMessage};

// Re-export registry types for convenience
pub use registry::{CreateOptions, OutputSink, RegistryError, SessionRegistry};
