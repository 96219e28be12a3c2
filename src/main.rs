//! Command-line entry point for the swarm kernel.
//!
//! State between invocations lives in the file-backed memory provider
//! under the configured storage root, so `swarm register` and friends
//! compose across separate runs.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use swarmflow::core::{AgentInfo, Placement, SwarmCoordinator, TopologyMode};
use swarmflow::memory::{FileMemoryProvider, MemoryProvider};
use swarmflow::patterns::PatternStorage;
use swarmflow::resource::TokenBudget;
use swarmflow::utils::error::ErrorClass;
use swarmflow::{ConsensusManager, SwarmConfig, SwarmError};

const EXIT_RECOVERABLE: u8 = 1;
const EXIT_INVALID_INPUT: u8 = 2;
const EXIT_IO: u8 = 3;
const EXIT_POSTCONDITION: u8 = 4;

/// Default swarm id for single-swarm CLI sessions.
const CLI_SWARM: &str = "default";
const REGISTRY_NAMESPACE: &str = "registry";

#[derive(Parser)]
#[command(name = "swarmflow", version, about = "Swarm coordination kernel")]
struct Cli {
    /// Path to a JSON config file (falls back to SWARMFLOW_CONFIG, then
    /// defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the swarm topology and agent registry
    Swarm {
        #[command(subcommand)]
        command: SwarmCommand,
    },
    /// Drive consensus decisions
    Consensus {
        #[command(subcommand)]
        command: ConsensusCommand,
    },
    /// Inspect token budgets
    Budget {
        #[command(subcommand)]
        command: BudgetCommand,
    },
    /// Health reporting
    Health {
        #[command(subcommand)]
        command: HealthCommand,
    },
    /// Learned-pattern analysis
    Patterns {
        #[command(subcommand)]
        command: PatternsCommand,
    },
}

#[derive(Subcommand)]
enum SwarmCommand {
    /// Initialize a fresh topology, clearing the registry
    Init { topology: String },
    /// Register an agent
    Register {
        id: String,
        agent_type: String,
        /// Parent agent id (hierarchical mode)
        #[arg(long)]
        parent: Option<String>,
    },
    /// Unregister an agent
    Unregister { id: String },
    /// Show topology status
    Status,
}

#[derive(Subcommand)]
enum ConsensusCommand {
    /// Submit a proposal payload (JSON) for a vote
    Propose {
        payload: String,
        #[arg(long)]
        algorithm: Option<String>,
        #[arg(long, default_value_t = 1_000)]
        timeout_ms: u64,
    },
}

#[derive(Subcommand)]
enum BudgetCommand {
    /// Show global budget status, or one swarm's allocation
    Show { swarm: Option<String> },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum HealthCommand {
    /// Produce a health report for registered agents
    Report {
        #[arg(long, value_enum, default_value = "markdown")]
        format: ReportFormat,
    },
}

#[derive(Subcommand)]
enum PatternsCommand {
    /// Summarize learned patterns, optionally limited to recent days
    Analyze {
        #[arg(long)]
        days: Option<u32>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_INVALID_INPUT);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start runtime: {err}");
            return ExitCode::from(EXIT_IO);
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn load_config(cli: &Cli) -> Result<SwarmConfig, SwarmError> {
    match &cli.config {
        Some(path) => SwarmConfig::from_file(path),
        None => SwarmConfig::from_env(),
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<SwarmError>() {
        Some(swarm_err) => match swarm_err.class() {
            ErrorClass::InvalidArgument | ErrorClass::Duplicate => EXIT_INVALID_INPUT,
            ErrorClass::Transient => EXIT_IO,
            ErrorClass::Fatal => EXIT_POSTCONDITION,
            _ => EXIT_RECOVERABLE,
        },
        None => EXIT_RECOVERABLE,
    }
}

async fn run(cli: Cli, config: SwarmConfig) -> Result<()> {
    let memory = Arc::new(FileMemoryProvider::new(&config.patterns_storage.root)?);

    match cli.command {
        Command::Swarm { command } => run_swarm(command, &config, memory).await,
        Command::Consensus { command } => run_consensus(command, &config, memory).await,
        Command::Budget { command } => run_budget(command, &config).await,
        Command::Health { command } => run_health(command, &config, memory).await,
        Command::Patterns { command } => run_patterns(command, &config).await,
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone)]
struct RegistryEntry {
    id: String,
    agent_type: String,
    parent: Option<String>,
}

async fn load_registry(
    memory: &Arc<FileMemoryProvider>,
) -> Result<(TopologyMode, Vec<RegistryEntry>)> {
    let mode = memory
        .retrieve(CLI_SWARM, REGISTRY_NAMESPACE, "topology")
        .await?
        .and_then(|v| v.as_str().map(ToString::to_string))
        .unwrap_or_else(|| "mesh".to_string())
        .parse::<TopologyMode>()?;
    let agents: Vec<RegistryEntry> = memory
        .retrieve(CLI_SWARM, REGISTRY_NAMESPACE, "agents")
        .await?
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    Ok((mode, agents))
}

async fn save_registry(
    memory: &Arc<FileMemoryProvider>,
    mode: TopologyMode,
    agents: &[RegistryEntry],
) -> Result<()> {
    memory
        .store(
            CLI_SWARM,
            REGISTRY_NAMESPACE,
            "topology",
            json!(mode.as_str()),
            true,
        )
        .await?;
    memory
        .store(
            CLI_SWARM,
            REGISTRY_NAMESPACE,
            "agents",
            serde_json::to_value(agents)?,
            true,
        )
        .await?;
    Ok(())
}

/// Rebuild a coordinator from the persisted registry.
async fn build_coordinator(
    mode: TopologyMode,
    agents: &[RegistryEntry],
) -> Result<SwarmCoordinator> {
    let coordinator = SwarmCoordinator::new(mode);
    for entry in agents {
        let placement = Placement {
            parent_id: entry.parent.clone(),
            layer: None,
        };
        let inbox = coordinator
            .register_agent(AgentInfo::new(&entry.id, &entry.agent_type), placement)
            .await?;
        drop(inbox);
    }
    Ok(coordinator)
}

async fn run_swarm(
    command: SwarmCommand,
    _config: &SwarmConfig,
    memory: Arc<FileMemoryProvider>,
) -> Result<()> {
    match command {
        SwarmCommand::Init { topology } => {
            let mode: TopologyMode = topology.parse()?;
            save_registry(&memory, mode, &[]).await?;
            println!("initialized {} topology", mode.as_str());
        }
        SwarmCommand::Register {
            id,
            agent_type,
            parent,
        } => {
            let (mode, mut agents) = load_registry(&memory).await?;
            if agents.iter().any(|a| a.id == id) {
                return Err(SwarmError::DuplicateAgent { id }.into());
            }
            agents.push(RegistryEntry {
                id: id.clone(),
                agent_type,
                parent,
            });

            // Validate the registry still builds before persisting.
            let coordinator = build_coordinator(mode, &agents).await?;
            if coordinator.agent_info(&id).await.is_none() {
                return Err(SwarmError::InvariantViolation {
                    reason: format!("agent {id} missing after registration"),
                }
                .into());
            }
            save_registry(&memory, mode, &agents).await?;
            println!("registered {id}");
        }
        SwarmCommand::Unregister { id } => {
            let (mode, mut agents) = load_registry(&memory).await?;
            let before = agents.len();
            agents.retain(|a| a.id != id);
            if agents.len() == before {
                return Err(SwarmError::AgentNotFound { id }.into());
            }
            // Orphans are reparented to the root on rebuild.
            for agent in &mut agents {
                if agent.parent.as_deref() == Some(id.as_str()) {
                    agent.parent = None;
                }
            }
            build_coordinator(mode, &agents).await?;
            save_registry(&memory, mode, &agents).await?;
            println!("unregistered {id}");
        }
        SwarmCommand::Status => {
            let (mode, agents) = load_registry(&memory).await?;
            let coordinator = build_coordinator(mode, &agents).await?;
            let info = coordinator.get_topology_info().await;
            println!(
                "topology: {} ({} agents, {} edges)",
                info.mode.as_str(),
                info.agent_count,
                info.edge_count
            );
            println!("{}", coordinator.visualize().await);
        }
    }
    Ok(())
}

async fn run_consensus(
    command: ConsensusCommand,
    config: &SwarmConfig,
    memory: Arc<FileMemoryProvider>,
) -> Result<()> {
    match command {
        ConsensusCommand::Propose {
            payload,
            algorithm,
            timeout_ms,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).map_err(|e| SwarmError::InvalidArgument {
                    reason: format!("payload must be JSON: {e}"),
                })?;

            let (mode, agents) = load_registry(&memory).await?;
            let coordinator = Arc::new(build_coordinator(mode, &agents).await?);
            let manager = ConsensusManager::new(coordinator, &config.consensus)?;

            let outcome = manager
                .request_consensus(payload, algorithm.as_deref(), Some(timeout_ms))
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }
    Ok(())
}

async fn run_budget(command: BudgetCommand, config: &SwarmConfig) -> Result<()> {
    match command {
        BudgetCommand::Show { swarm } => {
            let budget = TokenBudget::new(config.token_budget.clone());
            let status = budget.global_status().await;
            match swarm {
                Some(swarm_id) => match status.swarms.get(&swarm_id) {
                    Some(allocation) => {
                        println!("{}", serde_json::to_string_pretty(allocation)?);
                    }
                    None => {
                        return Err(SwarmError::SwarmNotAllocated { swarm_id }.into());
                    }
                },
                None => println!("{}", serde_json::to_string_pretty(&status)?),
            }
        }
    }
    Ok(())
}

async fn run_health(
    command: HealthCommand,
    _config: &SwarmConfig,
    memory: Arc<FileMemoryProvider>,
) -> Result<()> {
    match command {
        HealthCommand::Report { format } => {
            let (mode, agents) = load_registry(&memory).await?;
            match format {
                ReportFormat::Json => {
                    let report = json!({
                        "topology": mode.as_str(),
                        "agent_count": agents.len(),
                        "agents": agents
                            .iter()
                            .map(|a| json!({
                                "agent_id": a.id,
                                "agent_type": a.agent_type,
                                "state": "unknown",
                            }))
                            .collect::<Vec<_>>(),
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                ReportFormat::Markdown => {
                    println!("# Swarm health report\n");
                    println!("- topology: {}", mode.as_str());
                    println!("- agents: {}\n", agents.len());
                    println!("| agent | type | state |");
                    println!("|-------|------|-------|");
                    for agent in &agents {
                        println!("| {} | {} | unknown |", agent.id, agent.agent_type);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn run_patterns(command: PatternsCommand, config: &SwarmConfig) -> Result<()> {
    match command {
        PatternsCommand::Analyze { days } => {
            let storage = PatternStorage::new(
                &config.patterns_storage.root,
                config.patterns_storage.compression_threshold_days,
                config.patterns_storage.retention_days,
            )?;
            let since = days.map(|d| chrono::Utc::now() - chrono::Duration::days(i64::from(d)));
            let patterns = storage.query(None, since)?;

            let mut by_kind: HashMap<&str, usize> = HashMap::new();
            for pattern in &patterns {
                *by_kind.entry(pattern.pattern_type.as_str()).or_insert(0) += 1;
            }

            println!("{} patterns stored", patterns.len());
            for (kind, count) in by_kind {
                println!("  {kind}: {count}");
            }
            for pattern in patterns.iter().take(10) {
                println!(
                    "  [{:.2}] {} ({} occurrences)",
                    pattern.confidence, pattern.description, pattern.occurrences
                );
            }

            let (compressed, deleted) = storage.run_maintenance()?;
            if compressed > 0 || deleted > 0 {
                println!("maintenance: {compressed} compressed, {deleted} deleted");
            }
        }
    }
    Ok(())
}
