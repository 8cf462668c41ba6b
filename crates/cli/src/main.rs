mod args;
mod dispatch;

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use hookq_events::Subscription;
use hookq_infra::config::QueueConfig;
use hookq_infra::jobs::{JobSpec, PriorityClassifier, QueueError, QueueEventEnvelope, QueueManager};

use crate::args::{Args, Command};

fn main() -> anyhow::Result<()> {
    hookq_observability::init();

    let args = Args::parse();
    match args.command {
        Command::Run {
            input,
            wait_secs,
            shutdown_secs,
        } => run(input, Duration::from_secs(wait_secs), Duration::from_secs(shutdown_secs)),
        Command::Classify { text, json } => classify(&text, json),
    }
}

fn run(input: Option<PathBuf>, wait: Duration, grace: Duration) -> anyhow::Result<()> {
    let config = QueueConfig::from_env().context("loading queue configuration")?;
    let dispatcher = Arc::new(dispatch::logging_dispatcher());
    let manager = QueueManager::start_new(config, dispatcher).context("starting workers")?;

    let events = manager.subscribe();
    let event_logger = thread::Builder::new()
        .name("hookq-events".to_string())
        .spawn(move || log_events(events))
        .context("spawning event logger")?;

    let reader: Box<dyn BufRead> = match &input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut accepted = 0usize;
    let mut rejected = 0usize;
    for (n, line) in reader.lines().enumerate() {
        let line = line.context("reading input")?;
        if line.trim().is_empty() {
            continue;
        }
        let spec: JobSpec = serde_json::from_str(&line)
            .with_context(|| format!("line {}: malformed job", n + 1))?;
        match manager.enqueue(spec) {
            Ok(_) => accepted += 1,
            Err(err @ (QueueError::UnsupportedJobType(_) | QueueError::InvalidMaxAttempts(_))) => {
                tracing::warn!(line = n + 1, error = %err, "job rejected");
                rejected += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    if !manager.wait_for_drain(wait) {
        tracing::warn!(wait_secs = wait.as_secs(), "queue did not drain in time");
    }

    let report = json!({
        "accepted": accepted,
        "rejected": rejected,
        "stats": manager.get_stats(),
        "depths": manager.get_queue_depths(),
    });
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report)?;
    writeln!(stdout)?;

    manager.shutdown(grace)?;
    drop(manager);
    if event_logger.join().is_err() {
        tracing::warn!("event logger panicked");
    }
    Ok(())
}

/// Runs until the manager (and with it the event bus) is dropped.
fn log_events(events: Subscription<QueueEventEnvelope>) {
    loop {
        match events.recv_timeout(Duration::from_secs(1)) {
            Ok(env) => {
                let job = env.payload().job();
                tracing::debug!(
                    event = env.payload().name(),
                    sequence = env.sequence_number(),
                    job_id = %job.id,
                    priority = %job.priority,
                    attempt = job.attempts,
                    "queue event"
                );
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn classify(text: &str, as_json: bool) -> anyhow::Result<()> {
    let config = QueueConfig::from_env().context("loading queue configuration")?;
    let classifier = PriorityClassifier::new(config.classifier);

    let payload = if as_json {
        serde_json::from_str(text).context("parsing payload")?
    } else {
        serde_json::Value::String(text.to_string())
    };

    println!("{}", classifier.classify(&payload));
    Ok(())
}
