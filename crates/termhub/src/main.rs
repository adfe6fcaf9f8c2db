//! TermHub CLI
//!
//! Small driver for the multiplexer: runs a single command or an
//! interactive session through the registry, streaming tagged output to the
//! terminal. This is the in-repo stand-in for an embedding application.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use termhub::config::Config;
use termhub::message::Message;
use termhub::registry::{CreateOptions, SessionRegistry};
use termhub::ChannelKind;

/// TermHub - terminal process multiplexer.
#[derive(Parser, Debug)]
#[command(name = "termhub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run one command to completion, streaming its output
    Exec {
        /// Command line to run
        command: String,

        /// Working directory for the child
        #[arg(long, value_name = "DIR")]
        cwd: Option<PathBuf>,

        /// Use a pipe channel instead of a pseudo-terminal
        #[arg(long)]
        pipe: bool,
    },

    /// Drive an interactive shell session, line by line
    Shell {
        /// Working directory for the child
        #[arg(long, value_name = "DIR")]
        cwd: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_or_default()?
    };
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.log.level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Exec { command, cwd, pipe } => exec(config, &command, cwd, pipe),
        Commands::Shell { cwd } => shell(config, cwd),
    }
}

/// Runs one command to completion and exits with the child's exit code.
fn exec(
    config: Config,
    command: &str,
    cwd: Option<PathBuf>,
    pipe: bool,
) -> anyhow::Result<()> {
    let registry = SessionRegistry::new(config);
    let (tx, rx) = mpsc::channel();
    registry.set_output_sink(move |tagged| {
        let _ = tx.send(tagged.message);
    });

    let channel = pipe.then_some(ChannelKind::Pipe);
    let id = registry.create_with_options(CreateOptions {
        command: Some(command.to_string()),
        working_dir: cwd,
        channel,
        ..Default::default()
    })?;
    tracing::debug!(session_id = %id, "session created");

    let exit_code = loop {
        match rx.recv() {
            Ok(Message::Output { payload }) => {
                print!("{payload}");
                std::io::stdout().flush().ok();
            }
            Ok(Message::Error { payload }) => {
                eprint!("{payload}");
                std::io::stderr().flush().ok();
            }
            Ok(Message::Exit { exit_code }) => break exit_code,
            Ok(Message::Input { .. }) => {}
            Err(_) => break -1,
        }
    };

    registry.shutdown();
    std::process::exit(exit_code);
}

/// Drives an interactive shell: stdin lines become session commands,
/// session output goes to stdout. EOF on stdin closes the session.
fn shell(config: Config, cwd: Option<PathBuf>) -> anyhow::Result<()> {
    let registry = SessionRegistry::new(config);
    let (tx, rx) = mpsc::channel();
    registry.set_output_sink(move |tagged| {
        let _ = tx.send(tagged.message);
    });

    let id = registry.create(None, cwd.as_deref())?;
    eprintln!("session {id} started (EOF to quit)");

    // Output pump: print until the session reports exit.
    let printer = std::thread::spawn(move || loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Message::Output { payload }) | Ok(Message::Error { payload }) => {
                print!("{payload}");
                std::io::stdout().flush().ok();
            }
            Ok(Message::Exit { exit_code }) => return exit_code,
            Ok(Message::Input { .. }) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return -1,
        }
    });

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if registry.send_command(&id, &line).is_err() {
            break;
        }
    }

    let _ = registry.close(&id);
    let exit_code = printer.join().unwrap_or(-1);
    registry.shutdown();
    std::process::exit(exit_code);
}
