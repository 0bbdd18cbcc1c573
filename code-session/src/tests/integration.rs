//! End-to-end runs on a real pseudo-terminal. Each test skips itself when
//! the toolchain it needs is not installed.

use super::{
    fixtures::code_samples::*,
    utils::{collect_until_exit, entries, next_output},
};
use crate::{
    languages::skip_if_not_available, ConnectionId, LanguageTable, Outbound, Result,
    ServerEvent, SessionConfig, SessionManager, EXIT_NOTICE,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

fn real_manager(root: &TempDir) -> Arc<SessionManager> {
    let config = SessionConfig::default().with_workspace_root(root.path());
    Arc::new(SessionManager::new(LanguageTable::builtin(), config))
}

#[tokio::test]
async fn test_python_prints() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }

    let root = TempDir::new()?;
    let manager = real_manager(&root);
    let (outbound, mut rx) = Outbound::channel();

    manager
        .start_run(ConnectionId::new(), &outbound, Some("python"), PYTHON_HELLO)
        .await?;

    let events = collect_until_exit(&mut rx).await;
    assert_eq!(events.last().map(String::as_str), Some(EXIT_NOTICE));
    assert!(events.concat().contains("hi"), "got {:?}", events);
    Ok(())
}

#[tokio::test]
async fn test_python_reads_input() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }

    let root = TempDir::new()?;
    let manager = real_manager(&root);
    let (outbound, mut rx) = Outbound::channel();
    let conn = ConnectionId::new();

    manager
        .start_run(conn, &outbound, Some("python"), PYTHON_ECHO_NAME)
        .await?;
    manager.forward_input(conn, b"World\r".to_vec()).await;

    let events = collect_until_exit(&mut rx).await;
    assert!(events.concat().contains("Hello, World"), "got {:?}", events);
    Ok(())
}

#[tokio::test]
async fn test_python_waits_for_delayed_answer() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }

    let root = TempDir::new()?;
    let manager = real_manager(&root);
    let (outbound, mut rx) = Outbound::channel();
    let conn = ConnectionId::new();

    manager
        .start_run(conn, &outbound, Some("python"), PYTHON_PROMPT)
        .await?;

    let mut seen = String::new();
    while !seen.contains("Name: ") {
        match next_output(&mut rx).await {
            Some(text) => seen.push_str(&text),
            None => panic!("no prompt, got {:?}", seen),
        }
    }

    sleep(Duration::from_secs(1)).await;
    while let Ok(ServerEvent::Output(text)) = rx.try_recv() {
        assert_ne!(text, EXIT_NOTICE, "program reported exited while waiting for input");
        seen.push_str(&text);
    }
    assert!(manager.registry().active_session(conn).await.is_some());

    manager.forward_input(conn, b"Bob\r".to_vec()).await;

    let events = collect_until_exit(&mut rx).await;
    assert_eq!(events.last().map(String::as_str), Some(EXIT_NOTICE));
    assert!(events.concat().contains("Hello, Bob"), "got {:?}", events);
    Ok(())
}

#[tokio::test]
async fn test_c_compiles_and_runs() -> Result<()> {
    if skip_if_not_available(&["gcc"]) {
        return Ok(());
    }

    let root = TempDir::new()?;
    let manager = real_manager(&root);
    let (outbound, mut rx) = Outbound::channel();

    manager
        .start_run(ConnectionId::new(), &outbound, Some("c"), C_HELLO)
        .await?;

    let events = collect_until_exit(&mut rx).await;
    assert!(events.concat().contains("hello from c"), "got {:?}", events);
    Ok(())
}

#[tokio::test]
async fn test_c_syntax_error_is_reported() -> Result<()> {
    if skip_if_not_available(&["gcc"]) {
        return Ok(());
    }

    let root = TempDir::new()?;
    let manager = real_manager(&root);
    let (outbound, mut rx) = Outbound::channel();

    let result = manager
        .start_run(ConnectionId::new(), &outbound, Some("c"), C_SYNTAX_ERROR)
        .await;
    assert!(result.is_err());

    let message = next_output(&mut rx).await.unwrap_or_default();
    assert!(message.contains("error"), "got {:?}", message);
    assert!(entries(root.path()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rerun_replaces_sleeping_program() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }

    let root = TempDir::new()?;
    let manager = real_manager(&root);
    let (outbound, mut rx) = Outbound::channel();
    let conn = ConnectionId::new();

    manager
        .start_run(conn, &outbound, Some("python"), PYTHON_SLEEP)
        .await?;
    manager
        .start_run(conn, &outbound, Some("python"), PYTHON_HELLO)
        .await?;

    // The sleeping run's notice comes first, then the new run's output.
    assert_eq!(collect_until_exit(&mut rx).await, vec![EXIT_NOTICE]);
    let events = collect_until_exit(&mut rx).await;
    assert!(events.concat().contains("hi"), "got {:?}", events);
    assert!(entries(root.path()).len() <= 1);

    manager.disconnect(conn).await;
    assert!(entries(root.path()).is_empty());
    Ok(())
}
