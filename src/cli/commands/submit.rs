//! Submission and scrape producer commands.

use serde_json::{json, Map, Value};

use crate::cli::open_state;
use crate::config::Settings;
use crate::models::TaskType;
use crate::services::queue::EnqueueRequest;
use crate::services::submission::submit_url;

pub fn cmd_submit(
    settings: Settings,
    url: String,
    subscribe_feed: bool,
    instruction: Option<String>,
    crawl_links: bool,
) -> anyhow::Result<()> {
    let state = open_state(settings)?;

    let mut payload = Map::new();
    if subscribe_feed {
        payload.insert("subscribe_to_feed".into(), json!(true));
    }
    if let Some(instruction) = instruction {
        payload.insert("instruction".into(), json!(instruction));
    }
    if crawl_links {
        payload.insert("crawl_links".into(), json!(true));
    }

    let submission = submit_url(&state.contents, &state.queue, &url, payload)?;
    println!(
        "{} content {} (task {})",
        if submission.created {
            "Submitted"
        } else {
            "Re-submitted existing"
        },
        submission.content_id,
        submission.task_id,
    );
    Ok(())
}

pub fn cmd_scrape(settings: Settings, sources: Vec<String>) -> anyhow::Result<()> {
    let state = open_state(settings)?;

    let sources: Vec<Value> = if sources.is_empty() {
        vec![json!("all")]
    } else {
        sources.into_iter().map(Value::String).collect()
    };
    let payload = Map::from_iter([("sources".to_string(), Value::Array(sources))]);

    let task_id = state
        .queue
        .enqueue(EnqueueRequest::new(TaskType::Scrape).payload(payload))?;
    println!("Enqueued scrape task {task_id}");
    Ok(())
}
