//! Queue inspection and manual intervention commands.

use crate::cli::open_state;
use crate::config::Settings;
use crate::models::TaskQueue;
use crate::pipeline::watchdog::Watchdog;
use crate::repository::{ContentRepository, EventLogRepository, TaskRepository};
use crate::services::checkout::CheckoutManager;

fn print_counts(title: &str, counts: &std::collections::HashMap<String, u64>) {
    println!("\n== {title} ==");
    if counts.is_empty() {
        println!("None");
        return;
    }
    let mut rows: Vec<_> = counts.iter().collect();
    rows.sort();
    for (key, count) in rows {
        println!("{key:16} {count:6}");
    }
}

pub fn cmd_status(settings: Settings) -> anyhow::Result<()> {
    let state = open_state(settings)?;
    let stats = state.queue.queue_stats()?;

    print_counts("Tasks by Status", &stats.by_status);
    print_counts("Pending by Type", &stats.pending_by_type);
    print_counts("Pending by Queue", &stats.pending_by_queue);

    println!("\n== Pending by Queue/Type ==");
    if stats.pending_by_queue_type.is_empty() {
        println!("None");
    }
    let mut queues: Vec<_> = stats.pending_by_queue_type.iter().collect();
    queues.sort_by(|a, b| a.0.cmp(b.0));
    for (queue, types) in queues {
        let mut rows: Vec<_> = types.iter().collect();
        rows.sort();
        for (task_type, count) in rows {
            println!("{queue:12} {task_type:20} {count:6}");
        }
    }

    println!("\nFailures in the last hour: {}", stats.recent_failures);

    let checkouts = state.contents.checkout_counts()?;
    print_counts("Content Checkouts by Worker", &checkouts);
    Ok(())
}

pub fn cmd_clear(settings: Settings, queue: Option<String>, yes: bool) -> anyhow::Result<()> {
    let queue_name = match queue {
        Some(name) => Some(
            TaskQueue::parse(&name)
                .ok_or_else(|| anyhow::anyhow!("unknown queue partition: {name}"))?,
        ),
        None => None,
    };

    if !yes {
        anyhow::bail!("refusing to clear pending tasks without --yes");
    }

    let state = open_state(settings)?;
    let deleted = state.queue.tasks().clear_pending(queue_name)?;
    println!("Deleted {deleted} pending tasks");
    Ok(())
}

pub async fn cmd_requeue_stale(
    settings: Settings,
    dry_run: bool,
    limit: Option<u32>,
) -> anyhow::Result<()> {
    let db_path = settings.database_path();
    let watchdog = Watchdog::new(
        TaskRepository::new(&db_path)?,
        EventLogRepository::new(&db_path)?,
        settings.watchdog.clone(),
    );

    let result = watchdog.run_once(dry_run, limit).await?;
    println!(
        "Requeued {} transcribe and {} process_content tasks{}",
        result.requeued_transcribe.touched_count,
        result.requeued_process_content.touched_count,
        if dry_run { " (dry run)" } else { "" },
    );

    // Content-level reservations time out on the same pass.
    if !dry_run {
        let checkout = CheckoutManager::new(
            ContentRepository::new(&db_path)?,
            settings.checkout_timeout_minutes,
        );
        let released = checkout.release_stale_checkouts()?;
        println!("Released {released} stale content checkouts");
    }
    Ok(())
}

pub async fn cmd_move_transcribe(settings: Settings, dry_run: bool) -> anyhow::Result<()> {
    let db_path = settings.database_path();
    let tasks = TaskRepository::new(&db_path)?;

    let ids = tasks.misqueued_transcribe_ids(None)?;
    if dry_run {
        println!("Would move {} tasks to the transcribe queue", ids.len());
        return Ok(());
    }

    let moved = tasks.move_to_transcribe_queue(&ids)?;
    println!("Moved {moved} tasks to the transcribe queue");
    Ok(())
}

pub fn cmd_cleanup(settings: Settings, days: Option<u32>) -> anyhow::Result<()> {
    let days = days.unwrap_or(settings.cleanup_days);
    let state = open_state(settings)?;
    let deleted = state.queue.cleanup_old_tasks(days)?;
    println!("Deleted {deleted} completed tasks older than {days} days");
    Ok(())
}
