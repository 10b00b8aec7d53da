use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    fetch_project, spawn_session, AnnotationRef, HostEvent, HttpGateway, RemoteGateway,
    SessionController, SessionHandle, SessionMode, SessionOptions, SessionSnapshot, TaskSource,
    TaskStore,
};
use engine_integration::{EngineHook, InMemoryEngine};
use shared::{
    domain::{AnnotationId, TaskId},
    protocol::Task,
};
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(name = "labeler", about = "Drive an annotation session against a labeling server")]
struct Args {
    #[arg(long, default_value = "labeler.toml")]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    project: Option<i64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open one task and show the annotation that gets selected.
    Explore {
        #[arg(long)]
        task: i64,
        #[arg(long)]
        annotation: Option<i64>,
    },
    /// Walk the label stream.
    Stream {
        #[arg(long)]
        review: bool,
        #[arg(long, default_value_t = 1)]
        limit: usize,
        /// Skip each task to advance instead of stopping at the first one.
        #[arg(long)]
        skip: bool,
    },
}

impl Command {
    fn mode(&self) -> SessionMode {
        match self {
            Self::Explore { .. } => SessionMode::explorer(),
            Self::Stream { review: true, .. } => SessionMode::stream_review(),
            Self::Stream { .. } => SessionMode::label_stream(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config);
    settings.apply_overrides(args.server_url, args.token, args.project);
    info!(server = %settings.server_url, project_id = ?settings.project_id, "labeler: starting");

    let gateway: Arc<dyn RemoteGateway> = Arc::new(HttpGateway::new(settings.gateway_config())?);
    let project = fetch_project(gateway.as_ref())
        .await
        .context("failed to load project settings")?;
    info!(project_id = project.id.0, title = %project.title, "labeler: project loaded");

    let store = Arc::new(TaskStore::new(Arc::clone(&gateway)));
    let controller = SessionController::new(
        InMemoryEngine::new(),
        SessionOptions::new(project, args.command.mode()),
        gateway,
        Arc::clone(&store) as Arc<dyn TaskSource>,
    )?;
    let (handle, session) = spawn_session(controller);
    let mut events = handle.events().subscribe();
    handle.hook(EngineHook::Load)?;

    let outcome = match args.command {
        Command::Explore { task, annotation } => {
            let annotation = annotation.map(AnnotationId);
            explore(&handle, &store, &mut events, TaskId(task), annotation).await
        }
        Command::Stream { limit, skip, .. } => {
            stream(&handle, &store, &mut events, limit, skip).await
        }
    };

    handle.shutdown()?;
    session.await.context("session task failed")?;
    outcome
}

async fn explore(
    handle: &SessionHandle,
    store: &TaskStore,
    events: &mut broadcast::Receiver<HostEvent>,
    task: TaskId,
    annotation: Option<AnnotationId>,
) -> Result<()> {
    handle
        .load_task(Some(task), annotation.map(AnnotationRef::Pk), false)
        .await?;
    let snapshot = handle.snapshot().await?;
    check_events(events)?;

    if snapshot.task_id != Some(task) {
        bail!("task {} was not found", task.0);
    }
    print_snapshot(&snapshot);
    print_task_data(store.task(task).await.as_ref());
    Ok(())
}

async fn stream(
    handle: &SessionHandle,
    store: &TaskStore,
    events: &mut broadcast::Receiver<HostEvent>,
    limit: usize,
    skip: bool,
) -> Result<()> {
    let mut previous = None;
    for _ in 0..limit.max(1) {
        let snapshot = handle.snapshot().await?;
        check_events(events)?;

        // an exhausted stream leaves the last task in place
        if snapshot.task_id.is_none() || snapshot.task_id == previous {
            println!("label stream is empty");
            return Ok(());
        }
        print_snapshot(&snapshot);
        print_task_data(store.selected().await.as_ref());

        if !skip {
            break;
        }
        previous = snapshot.task_id;
        handle.hook(EngineHook::SkipTask)?;
    }
    Ok(())
}

/// Fails on the first queued operation that reported an error.
fn check_events(events: &mut broadcast::Receiver<HostEvent>) -> Result<()> {
    loop {
        match events.try_recv() {
            Ok(HostEvent::Error { operation, message }) => {
                bail!("{operation} failed: {message}")
            }
            Ok(event) => debug!(event = event.name(), "labeler: host event"),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                debug!(skipped, "labeler: host events dropped");
            }
            Err(_) => return Ok(()),
        }
    }
}

fn print_task_data(task: Option<&Task>) {
    if let Some(task) = task {
        println!("  data {}", task.data);
    }
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    let task = snapshot
        .task_id
        .map(|id| id.0.to_string())
        .unwrap_or_else(|| "-".into());
    println!("task {task}: {} annotation(s)", snapshot.annotations.len());
    match &snapshot.selected {
        Some(annotation) => {
            let pk = annotation
                .pk
                .map(|pk| pk.0.to_string())
                .unwrap_or_else(|| "unsaved".into());
            println!("  selected {} (pk {pk})", annotation.id);
            if let Some(draft) = annotation.draft_id {
                println!("  draft {}", draft.0);
            }
            println!("  result {}", annotation.result);
        }
        None => println!("  nothing selected"),
    }
}
