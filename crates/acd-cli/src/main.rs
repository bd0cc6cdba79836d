use acd_client::{
    DashboardSnapshot, HubClient, Notification, NotificationKind, Poller, PollerConfig,
    StatusEndpoint, DEFAULT_HUB_URL,
};
use acd_core::{AgentStatus, DisplayMetrics, MemoryRecord};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "acd")]
#[command(about = "Agent companion dashboard CLI", long_about = None)]
struct Cli {
    /// Hub base URL
    #[arg(long, env = "ACD_HUB_URL", default_value = DEFAULT_HUB_URL)]
    hub: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent process
    Start,
    /// Stop the agent process
    Stop,
    /// Show whether the agent runs and its last reported score
    Status {
        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },
    /// List repositories known to the agent
    Repos,
    /// Show the memory recorded for one repository
    Memory { repo_id: String },
    /// Poll the hub and print changes until interrupted
    Watch {
        /// Poll only the agent status route
        #[arg(long)]
        agent_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let client = HubClient::new(&cli.hub).context("Failed to build hub client")?;

    match cli.command {
        Commands::Start => {
            client.start().await.context("Failed to start agent")?;
            println!("Agent started");
        }
        Commands::Stop => {
            let response = client.stop().await.context("Failed to stop agent")?;
            match response.message {
                Some(message) => println!("{message}"),
                None => println!("Agent stopped"),
            }
        }
        Commands::Status { json } => {
            let status = client
                .hub_status()
                .await
                .with_context(|| format!("Failed to query {}", client.base_url()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", render_status(&status));
            }
        }
        Commands::Repos => {
            let repos = client.repos().await.context("Failed to list repos")?;
            if repos.is_empty() {
                println!("No repos recorded yet");
            }
            for (id, path) in &repos {
                println!("{id}  {path}");
            }
        }
        Commands::Memory { repo_id } => {
            let memory = client
                .memory(&repo_id)
                .await
                .with_context(|| format!("Failed to read memory for {repo_id}"))?;
            print!("{}", render_memory(&memory));
        }
        Commands::Watch { agent_only } => {
            let config = PollerConfig {
                status_endpoint: if agent_only {
                    StatusEndpoint::Agent
                } else {
                    StatusEndpoint::Hub
                },
                ..PollerConfig::default()
            };
            watch(client, config).await;
        }
    }

    Ok(())
}

async fn watch(client: HubClient, config: PollerConfig) {
    let handle = Poller::spawn(client, config);
    let mut snapshots = handle.subscribe();
    let mut notifications = handle.notifications();
    let mut last_line = String::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = render_snapshot(&snapshots.borrow_and_update());
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
            }
            received = notifications.recv() => match received {
                Ok(notification) => println!("{}", render_notification(&notification)),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await;
}

fn render_status(status: &AgentStatus) -> String {
    let metrics = DisplayMetrics::from_status(Some(status));
    let mut lines = vec![
        format!("running:    {}", status.running),
        format!("confidence: {}", metrics.confidence_label()),
        format!("updated:    {}", render_update(&metrics)),
        format!("repos:      {}", metrics.repos_count),
    ];
    if let Some(root) = status.data_root() {
        lines.push(format!("data root:  {root}"));
    }
    lines.join("\n")
}

fn render_update(metrics: &DisplayMetrics) -> String {
    metrics
        .last_update
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn render_snapshot(snapshot: &DashboardSnapshot) -> String {
    if snapshot.status.is_none() {
        return match &snapshot.status_error {
            Some(err) => format!("hub unreachable: {err}"),
            None => "waiting for hub".to_string(),
        };
    }
    let metrics = snapshot.metrics();
    let mut line = format!(
        "{} | confidence {} | repos {} | updated {}",
        if snapshot.is_running() { "running" } else { "stopped" },
        metrics.confidence_label(),
        metrics.repos_count,
        render_update(&metrics),
    );
    if let Some(err) = &snapshot.status_error {
        line.push_str(&format!(" | stale: {err}"));
    }
    line
}

fn render_notification(notification: &Notification) -> String {
    let marker = match notification.kind {
        NotificationKind::Info => "*",
        NotificationKind::Destructive => "!",
    };
    format!(
        "{marker} {}: {}",
        notification.title, notification.description
    )
}

fn render_memory(memory: &MemoryRecord) -> String {
    if memory.is_empty() {
        return "No memory recorded\n".to_string();
    }
    let mut out = String::new();
    for (name, journal) in [
        ("failures", &memory.failures),
        ("decisions", &memory.decisions),
        ("attempts", &memory.attempts),
    ] {
        out.push_str(&format!(
            "## {name} ({} entries)\n",
            MemoryRecord::entry_count(journal)
        ));
        if !journal.trim().is_empty() {
            out.push_str(journal.trim_end());
            out.push('\n');
        }
    }
    if !memory.signatures.is_empty() {
        out.push_str(&format!("## signatures ({})\n", memory.signatures.len()));
        for signature in &memory.signatures {
            out.push_str(&format!("- {signature}\n"));
        }
    }
    out
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(std::env::var("ACD_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string()))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
