use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use snafu::ResultExt;

use syllabus::app::{self, App};
use syllabus::error::{ApplicationError, OpenQueueSnafu, OpenStoreSnafu, ReplSnafu};
use syllabus::event::TracingEvents;
use syllabus::repl::{self, Repl};
use syllabus::service::notification::ConsoleSink;
use syllabus::service::queue::TimerQueue;
use syllabus::service::Collaborators;
use syllabus::store::PlannerStore;
use syllabus::time::{self, SystemClock};
use syllabus::{config, logger, Located};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        tracing::error!(location = %error.location(), "{}", error);
        eprintln!("{error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApplicationError> {
    dotenv().ok();

    let config = config::load()?;

    let _guard = logger::init(&config)?;

    let clock = Arc::new(SystemClock);
    let store = Arc::new(PlannerStore::open(&config.store_path).context(OpenStoreSnafu)?);
    let queue = Arc::new(TimerQueue::open(&config.queue_path, clock.clone()).context(OpenQueueSnafu)?);

    let deps = Collaborators::new(queue.clone(), Arc::new(ConsoleSink::default()), clock)
        .with_events(Arc::new(TracingEvents));
    let app = app::create_app(store, deps, config.lecture_notification_offset);

    app.restore();
    if config.reconcile_every().is_some() {
        app.reconcile();
    }

    let (due_jobs, incoming) = tokio::sync::mpsc::unbounded_channel();
    let driver = tokio::spawn(queue.run(due_jobs, config.max_poll_interval));
    let dispatcher = tokio::spawn(app.reminders.clone().dispatch_all(incoming));
    let reconciler = config
        .reconcile_every()
        .map(|period| tokio::spawn(reconcile_periodically(app.clone(), period)));

    let shell = app.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut repl = Repl::new()?;
        repl::start(&mut repl, &shell)
    })
    .await;

    tracing::info!("shutting down");
    if let Some(reconciler) = reconciler {
        reconciler.abort();
    }
    driver.abort();
    dispatcher.await.ok();

    match outcome {
        Ok(result) => result.context(ReplSnafu),
        Err(error) => {
            tracing::error!(%error, "the prompt stopped unexpectedly");
            Ok(())
        }
    }
}

async fn reconcile_periodically(app: App, period: Duration) {
    tracing::info!(?period, "check weekly reminders periodically");
    let mut timer = time::timer(period);

    loop {
        timer.tick().await;

        let rearmed = app.reconcile();
        if !rearmed.is_empty() {
            tracing::warn!(?rearmed, "re-armed weekly reminders that went missing");
        }
    }
}
