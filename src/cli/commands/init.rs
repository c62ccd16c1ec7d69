//! Database and data directory initialization.

use crate::cli::open_state;
use crate::config::Settings;
use crate::repository;

pub fn cmd_init(settings: Settings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.data_dir)?;
    std::fs::create_dir_all(settings.audio_dir())?;

    let db_path = settings.database_path();
    repository::init_all(&db_path)?;

    // Opening the state validates the schema end to end.
    let state = open_state(settings)?;
    let stats = state.queue.queue_stats()?;

    println!("Initialized database at {}", db_path.display());
    println!("Data directory: {}", state.settings.data_dir.display());
    println!(
        "Tasks: {}",
        stats.by_status.values().sum::<u64>()
    );
    Ok(())
}
