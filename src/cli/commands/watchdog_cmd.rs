//! Watchdog command: one-shot or daemon recovery.

use std::time::Duration;

use crate::config::Settings;
use crate::pipeline::watchdog::{Watchdog, WatchdogRunResult};
use crate::repository::{EventLogRepository, TaskRepository};

fn print_result(result: &WatchdogRunResult) {
    println!("Queue watchdog run summary");
    println!("  started_at: {}", result.started_at.to_rfc3339());
    println!("  finished_at: {}", result.finished_at.to_rfc3339());
    println!("  dry_run: {}", result.dry_run);
    println!("  move_transcribe: {}", result.moved_transcribe.touched_count);
    println!(
        "  requeue_stale_transcribe: {}",
        result.requeued_transcribe.touched_count
    );
    println!(
        "  requeue_stale_process_content: {}",
        result.requeued_process_content.touched_count
    );
    println!("  total_touched: {}", result.total_touched());
}

pub async fn cmd_watchdog(
    settings: Settings,
    loop_mode: bool,
    interval_seconds: u64,
    dry_run: bool,
    limit: Option<u32>,
) -> anyhow::Result<()> {
    let db_path = settings.database_path();
    let watchdog = Watchdog::new(
        TaskRepository::new(&db_path)?,
        EventLogRepository::new(&db_path)?,
        settings.watchdog.clone(),
    );

    if !loop_mode {
        let result = watchdog.run_once(dry_run, limit).await?;
        print_result(&result);
        return Ok(());
    }

    let interval = interval_seconds.max(30);
    tracing::info!(interval_seconds = interval, "starting watchdog loop");

    loop {
        match watchdog.run_once(dry_run, limit).await {
            Ok(result) => print_result(&result),
            Err(e) => tracing::error!(error = %e, "watchdog cycle failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("watchdog loop interrupted");
                return Ok(());
            }
        }
    }
}
