mod doctor;
mod sim;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use podwire_core::config::AppConfig;
use podwire_core::error::PodwireError;
use podwire_core::event::EventBus;
use podwire_core::traits::PodRunner;
use podwire_core::types::{FireRequest, PodId, TriggerMode, WorkflowEvent};
use podwire_engine::{compute_terminal_set, Collaborators, MemoryGraph, TriggerDispatcher};

use sim::{FirstLineSummarizer, LoggingCleaner, SimulatedApprover, SimulatedRunner};

#[derive(Parser)]
#[command(name = "podwire", version, about = "Workflow triggers and completion tracking for canvas pods")]
struct Cli {
    /// Path to canvas config file
    #[arg(short, long, default_value = "podwire.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the terminal pods and expected completions of a run
    Terminals {
        /// Pod the run starts from
        origin: String,
    },
    /// Run the canvas from a pod with simulated collaborators
    Simulate {
        /// Pod to start manually
        origin: String,
        /// Input handed to the origin pod
        #[arg(long, default_value = "start")]
        input: String,
    },
    /// Show current configuration
    Config,
    /// Check the canvas for problems
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;

    // RUST_LOG wins over the config file
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            config
                .log
                .filter
                .as_deref()
                .and_then(|f| EnvFilter::try_new(f).ok())
                .unwrap_or_else(|| EnvFilter::new("podwire=info,warn"))
        }))
        .with_target(false)
        .init();

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Doctor => {
            doctor::run_doctor(&config);
        }
        Commands::Terminals { origin } => {
            print_terminals(&config, &PodId(origin))?;
        }
        Commands::Simulate { origin, input } => {
            simulate(config, PodId(origin), input).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = dirs_home().map(|h| h.join(".podwire").join("config.toml")) {
        if home.exists() {
            return Ok(AppConfig::load(&home)?);
        }
    }
    eprintln!("Warning: No config file found at {}; using an empty canvas.", path.display());
    Ok(AppConfig::default())
}

fn print_terminals(config: &AppConfig, origin: &PodId) -> anyhow::Result<()> {
    let (pods, connections) = config.canvas()?;
    let pod = pods
        .iter()
        .find(|p| p.id == *origin)
        .ok_or_else(|| PodwireError::PodNotFound(origin.to_string()))?;

    let scoped: Vec<_> = connections
        .into_iter()
        .filter(|c| {
            pods.iter()
                .find(|p| p.id == c.source)
                .map_or(true, |p| p.canvas_id == pod.canvas_id)
        })
        .collect();
    let plan = compute_terminal_set(&scoped, origin);

    if plan.is_empty() {
        println!("{} reaches no terminal pods over auto connections", origin);
        return Ok(());
    }

    let mut terminals: Vec<_> = plan.terminals.iter().collect();
    terminals.sort();
    println!("Run from {} on canvas {}:", origin, pod.canvas_id);
    for (terminal, expected) in terminals {
        println!("  {:<24} expects {}", terminal.as_str(), expected);
    }
    let visited: Vec<&str> = plan.visited.iter().map(|p| p.as_str()).collect();
    println!("  reached: {}", visited.join(" -> "));
    println!("  total completions: {}", plan.expected_total());
    Ok(())
}

async fn simulate(config: AppConfig, origin: PodId, input: String) -> anyhow::Result<()> {
    let (pods, connections) = config.canvas()?;
    let canvas_id = pods
        .iter()
        .find(|p| p.id == origin)
        .map(|p| p.canvas_id.clone())
        .ok_or_else(|| PodwireError::PodNotFound(origin.to_string()))?;

    let graph = Arc::new(MemoryGraph::new(pods, connections));
    let runner = Arc::new(SimulatedRunner::new(config.simulation.run_delay_ms));
    let event_bus = Arc::new(EventBus::new(config.engine.event_capacity));

    let mut collaborators = Collaborators::new(
        graph,
        runner.clone(),
        Arc::new(SimulatedApprover::from_config(&config)),
        Arc::new(LoggingCleaner),
    );
    if config.engine.summarize_handoff {
        collaborators = collaborators.with_summarizer(Arc::new(FirstLineSummarizer));
    }

    // Spawn event printer
    let mut rx = event_bus.subscribe();
    let print_handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => println!("{}", describe(&event)),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let engine = TriggerDispatcher::new(config.engine.clone(), collaborators, event_bus);

    info!(pod_id = %origin, "Starting manual run");
    runner
        .fire(FireRequest {
            canvas_id: canvas_id.clone(),
            pod_id: origin.clone(),
            content: input,
            mode: TriggerMode::Direct,
        })
        .await?;
    engine.on_pod_completed(&canvas_id, &origin).await?;
    engine.on_pod_idle(&origin).await;
    engine.settle().await;

    // Dropping the engine closes the event bus and ends the printer
    drop(engine);
    print_handle.await?;
    Ok(())
}

fn describe(event: &WorkflowEvent) -> String {
    match event {
        WorkflowEvent::JoinPending {
            target,
            completed,
            pending,
            ..
        } => format!(
            "[join] {} waiting: {} done, pending {}",
            target,
            completed.len(),
            join_ids(pending)
        ),
        WorkflowEvent::JoinAbandoned { target, .. } => format!("[join] {} abandoned", target),
        WorkflowEvent::DecidePending {
            source,
            connection_ids,
            ..
        } => format!("[decide] {} asks about {}", source, join_ids(connection_ids)),
        WorkflowEvent::DecideResolved {
            connection_id,
            status,
            reason,
            ..
        } => format!("[decide] {} {:?}: {}", connection_id, status, reason),
        WorkflowEvent::DecideFailed {
            connection_id,
            reason,
            ..
        } => format!("[decide] {} error: {}", connection_id, reason),
        WorkflowEvent::TriggerQueued {
            target, queue_len, ..
        } => format!("[queue] {} busy, {} waiting", target, queue_len),
        WorkflowEvent::TriggerFired {
            source, target, mode, ..
        } => format!("[fire] {} -> {} ({})", source, target, mode),
        WorkflowEvent::TriggerFailed { target, error, .. } => {
            format!("[fire] {} failed: {}", target, error)
        }
        WorkflowEvent::RunComplete { origin, pods, .. } => {
            format!("[run] {} complete, cleared {}", origin, join_ids(pods))
        }
        WorkflowEvent::PodCleared { pod, .. } => format!("[run] {} cleared", pod),
    }
}

fn join_ids<T: std::fmt::Display>(ids: &[T]) -> String {
    ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
