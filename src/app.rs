//! Minimal keyboard-driven loop. Rendering is out of scope (no
//! concrete widget toolkit is specified); this just demonstrates the
//! wiring a real TUI front end would drive: polling the cluster
//! snapshot, reacting to cluster-changed/task-event notifications, and
//! translating key presses into engine calls until quit.

use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use pvetui_core::Engine;
use tracing::info;

/// Runs until `q` is pressed or stdin is closed. Polls terminal input
/// with a short timeout so the loop can also react to background
/// cluster-changed notifications without blocking on keys forever.
pub async fn run(engine: &Engine) -> anyhow::Result<()> {
    let mut changed = engine.subscribe_cluster_changes();
    let mut tasks = engine.subscribe_task_events();

    loop {
        tokio::select! {
            _ = changed.changed() => {
                let snapshot = engine.cluster_snapshot();
                info!(nodes = snapshot.nodes.len(), "cluster snapshot updated");
            }
            event = tasks.recv() => {
                if let Ok(event) = event {
                    info!(task_id = %event.task_id, status = %event.status, "task event");
                }
            }
            key = poll_key() => {
                match key? {
                    Some(KeyCode::Char('q')) => break,
                    Some(KeyCode::Char('r')) => {
                        engine.cluster.refresh(&engine.shutdown_token()).await.ok();
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

async fn poll_key() -> anyhow::Result<Option<KeyCode>> {
    tokio::task::spawn_blocking(|| {
        if event::poll(Duration::from_millis(200))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            return Ok(Some(key.code));
        }
        Ok(None)
    })
    .await?
}
