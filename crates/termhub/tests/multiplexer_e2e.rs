//! End-to-end tests for the terminal multiplexer.
//!
//! These tests drive real child processes through the registry and verify
//! the full delivery path: creation, tagged output, input ordering, resize,
//! termination, and bulk shutdown.

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use termhub::config::Config;
use termhub::message::{Message, TaggedMessage};
use termhub::registry::{CreateOptions, SessionRegistry};
use termhub::ChannelKind;

fn registry_with_sink() -> (SessionRegistry, mpsc::Receiver<TaggedMessage>) {
    let registry = SessionRegistry::new(Config::default());
    let (tx, rx) = mpsc::channel();
    registry.set_output_sink(move |tagged| {
        let _ = tx.send(tagged);
    });
    (registry, rx)
}

/// Collects output text for `id` until the predicate holds or the deadline
/// passes.
fn collect_output_until(
    rx: &mpsc::Receiver<TaggedMessage>,
    id: &str,
    timeout: Duration,
    predicate: impl Fn(&str) -> bool,
) -> String {
    let deadline = Instant::now() + timeout;
    let mut output = String::new();
    while Instant::now() < deadline && !predicate(&output) {
        if let Ok(tagged) = rx.recv_timeout(Duration::from_millis(100)) {
            if tagged.session_id == id {
                if let Message::Output { payload } = &tagged.message {
                    output.push_str(payload);
                }
            }
        }
    }
    output
}

/// Waits for the terminal `Exit` message of `id`.
fn wait_for_exit(rx: &mpsc::Receiver<TaggedMessage>, id: &str, timeout: Duration) -> Option<i32> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(tagged) = rx.recv_timeout(Duration::from_millis(100)) {
            if tagged.session_id == id {
                if let Message::Exit { exit_code } = tagged.message {
                    return Some(exit_code);
                }
            }
        }
    }
    None
}

// =============================================================================
// Creation and Liveness
// =============================================================================

#[test]
fn test_create_echo_streams_output_then_exit() {
    let (registry, rx) = registry_with_sink();

    let id = registry
        .create(Some("echo hello"), Some(Path::new("/tmp")))
        .unwrap();
    assert!(!id.is_empty());

    let output = collect_output_until(&rx, &id, Duration::from_secs(10), |o| o.contains("hello"));
    assert!(output.contains("hello"), "got: {output}");

    let exit_code = wait_for_exit(&rx, &id, Duration::from_secs(10));
    assert_eq!(exit_code, Some(0));
}

#[test]
fn test_create_applies_working_directory() {
    let (registry, rx) = registry_with_sink();
    let temp_dir = TempDir::new().unwrap();
    let dir_name = temp_dir
        .path()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();

    let id = registry
        .create(Some("pwd"), Some(temp_dir.path()))
        .unwrap();
    let output =
        collect_output_until(&rx, &id, Duration::from_secs(10), |o| o.contains(&dir_name));
    assert!(
        output.contains(&dir_name),
        "expected {dir_name} in: {output}"
    );
}

#[test]
fn test_nonexistent_binary_leaves_registry_unchanged() {
    let (registry, _rx) = registry_with_sink();
    let existing = registry.create(Some("sleep 30"), None).unwrap();

    assert!(registry.create(Some("/nonexistent/binary"), None).is_err());

    let active = registry.list_active();
    assert_eq!(active, vec![existing.clone()]);
    registry.close(&existing).unwrap();
}

#[test]
fn test_concurrent_creates_yield_unique_ids() {
    let registry = Arc::new(SessionRegistry::new(Config::default()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.create(Some("sleep 30"), None).unwrap())
        })
        .collect();

    let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);

    let active = registry.list_active();
    for id in &ids {
        assert!(active.contains(id));
    }
    registry.shutdown();
    assert!(registry.list_active().is_empty());
}

// =============================================================================
// Input Ordering
// =============================================================================

#[test]
fn test_input_bytes_arrive_in_call_order() {
    let (registry, rx) = registry_with_sink();

    // `cat` over a pipe channel echoes stdin back without terminal
    // interference, so the output is exactly the bytes the child read.
    let id = registry
        .create_with_options(CreateOptions {
            command: Some("cat".to_string()),
            channel: Some(ChannelKind::Pipe),
            ..Default::default()
        })
        .unwrap();

    for i in 0..20 {
        registry.send_input(&id, &format!("line-{i:02}\n")).unwrap();
    }

    let output = collect_output_until(&rx, &id, Duration::from_secs(10), |o| {
        o.contains("line-19")
    });

    let mut last = None;
    for i in 0..20 {
        let pos = output
            .find(&format!("line-{i:02}"))
            .unwrap_or_else(|| panic!("line-{i:02} missing from: {output}"));
        if let Some(last) = last {
            assert!(pos > last, "line-{i:02} out of order in: {output}");
        }
        last = Some(pos);
    }

    registry.close(&id).unwrap();
}

// =============================================================================
// Resize
// =============================================================================

#[test]
fn test_resize_is_observable_via_stty() {
    let (registry, rx) = registry_with_sink();

    let id = registry.create(None, None).unwrap();
    registry.resize(&id, 120, 40).unwrap();
    registry.send_command(&id, "stty size").unwrap();

    let output =
        collect_output_until(&rx, &id, Duration::from_secs(10), |o| o.contains("40 120"));
    assert!(
        output.contains("40 120"),
        "expected kernel-reported size 40 120 in: {output}"
    );

    registry.close(&id).unwrap();
}

// =============================================================================
// Termination
// =============================================================================

#[test]
fn test_close_is_bounded_and_idempotent() {
    let (registry, rx) = registry_with_sink();
    let id = registry.create(Some("sleep 30"), None).unwrap();

    let started = Instant::now();
    registry.close(&id).unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!registry.list_active().contains(&id));
    assert!(wait_for_exit(&rx, &id, Duration::from_secs(2)).is_some());

    assert!(registry.close(&id).is_err());
}

#[test]
fn test_close_after_natural_exit_succeeds() {
    let (registry, rx) = registry_with_sink();
    let id = registry.create(Some("true"), None).unwrap();

    assert!(wait_for_exit(&rx, &id, Duration::from_secs(10)).is_some());

    // The session already stopped on its own; closing still removes it.
    registry.close(&id).unwrap();
    assert!(registry.list_active().is_empty());
}

#[test]
fn test_closing_one_session_leaves_the_other_running() {
    let (registry, rx) = registry_with_sink();

    let a = registry.create(None, None).unwrap();
    let b = registry.create(None, None).unwrap();

    registry.close(&a).unwrap();

    registry.send_command(&b, "echo survivor_marker").unwrap();
    let output = collect_output_until(&rx, &b, Duration::from_secs(10), |o| {
        o.contains("survivor_marker")
    });
    assert!(output.contains("survivor_marker"), "got: {output}");
    assert_eq!(registry.list_active(), vec![b.clone()]);

    registry.close(&b).unwrap();
}

#[test]
fn test_no_output_after_exit_message() {
    let (registry, rx) = registry_with_sink();
    let id = registry.create(Some("sleep 30"), None).unwrap();
    registry.close(&id).unwrap();

    assert!(wait_for_exit(&rx, &id, Duration::from_secs(2)).is_some());

    // Nothing for this session may follow the terminal event.
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline {
        if let Ok(tagged) = rx.recv_timeout(Duration::from_millis(100)) {
            assert_ne!(tagged.session_id, id, "message after Exit: {tagged:?}");
        }
    }
}

// =============================================================================
// Pipe Channel Error Stream
// =============================================================================

#[test]
fn test_pipe_session_tags_error_stream() {
    let (registry, rx) = registry_with_sink();

    let id = registry
        .create_with_options(CreateOptions {
            command: Some("ls /nonexistent-termhub-path".to_string()),
            channel: Some(ChannelKind::Pipe),
            ..Default::default()
        })
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut saw_error = false;
    let mut exit_code = None;
    while Instant::now() < deadline && exit_code.is_none() {
        if let Ok(tagged) = rx.recv_timeout(Duration::from_millis(100)) {
            if tagged.session_id != id {
                continue;
            }
            match tagged.message {
                Message::Error { .. } => saw_error = true,
                Message::Exit { exit_code: code } => exit_code = Some(code),
                _ => {}
            }
        }
    }

    assert!(saw_error, "expected an Error message from stderr");
    assert_ne!(exit_code, Some(0));
    assert!(exit_code.is_some());
}

// =============================================================================
// Environment Overrides
// =============================================================================

#[test]
fn test_create_with_env_override() {
    let (registry, rx) = registry_with_sink();

    let id = registry
        .create_with_options(CreateOptions {
            command: Some("env".to_string()),
            env: vec![("TERMHUB_E2E_VAR".to_string(), "e2e_value".to_string())],
            channel: Some(ChannelKind::Pipe),
            ..Default::default()
        })
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut output = String::new();
    while Instant::now() < deadline && !output.contains("TERMHUB_E2E_VAR=e2e_value") {
        if let Ok(tagged) = rx.recv_timeout(Duration::from_millis(100)) {
            if tagged.session_id == id {
                if let Message::Output { payload } = &tagged.message {
                    output.push_str(payload);
                }
            }
        }
    }
    assert!(
        output.contains("TERMHUB_E2E_VAR=e2e_value"),
        "missing env var in: {output}"
    );
}
