//! `spire-warden` — provision and reconcile SPIRE installations
//!
//! Declared parameters come from a YAML file; outcomes are printed as JSON.
//! `plan` detects and diffs without mutating anything; `apply` drives the
//! target to the declared state and verifies convergence.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spire_exec::LocalExecutor;
use spire_model::server_entry::EntryParams;
use spire_reconcile::params::{AgentParams, ServerParams};
use spire_reconcile::reconciler::{AgentReconciler, Mode, ServerReconciler};
use spire_system::clock::SystemClock;
use spire_system::fs::LocalFileStore;
use spire_system::info::{AgentInfo, ServerInfo};
use spire_system::server_cmd::ServerCommands;
use spire_model::agent_entry::AgentEntryFilter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "spire-warden", version, about = "Provision and reconcile SPIRE installations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage a SPIRE agent installation
    Agent {
        #[command(subcommand)]
        command: ComponentCommand,
    },
    /// Manage a SPIRE server installation
    Server {
        #[command(subcommand)]
        command: ComponentCommand,
    },
    /// Manage registration entries on the server
    Entry {
        #[command(subcommand)]
        command: EntryCommand,
    },
    /// List attested agents known to the server
    Registrations {
        /// Install dir of the server to query
        #[arg(long)]
        server_install_dir: Option<PathBuf>,
        /// Registration API socket path
        #[arg(long)]
        registration_uds_path: Option<String>,
        /// Only agents with this SPIFFE ID
        #[arg(long)]
        spiffe_id: Option<String>,
        /// Only agents with this attestation type
        #[arg(long)]
        attestation_type: Option<String>,
    },
}

#[derive(Subcommand)]
enum ComponentCommand {
    /// Apply the declared state to the target
    Apply {
        /// YAML file with the declared parameters
        #[arg(long)]
        params: PathBuf,
        /// Include per-resource before/after headers in the outcome
        #[arg(long)]
        diff: bool,
    },
    /// Detect and diff without mutating anything
    Plan {
        /// YAML file with the declared parameters
        #[arg(long)]
        params: PathBuf,
        /// Include per-resource before/after headers in the outcome
        #[arg(long)]
        diff: bool,
    },
    /// Detect and print the current snapshot
    Info {
        /// YAML file with the declared parameters
        #[arg(long)]
        params: PathBuf,
    },
}

#[derive(Subcommand)]
enum EntryCommand {
    /// Drive the declared entry to its target state by identity
    Ensure {
        /// YAML file with the declared entry parameters
        #[arg(long)]
        params: PathBuf,
        /// Install dir of the server to address
        #[arg(long)]
        server_install_dir: Option<PathBuf>,
    },
    /// Show entries matching the declared identity
    Show {
        /// YAML file with the declared entry parameters
        #[arg(long)]
        params: PathBuf,
        /// Install dir of the server to address
        #[arg(long)]
        server_install_dir: Option<PathBuf>,
    },
    /// Create the declared entry
    Create {
        /// YAML file with the declared entry parameters
        #[arg(long)]
        params: PathBuf,
        /// Install dir of the server to address
        #[arg(long)]
        server_install_dir: Option<PathBuf>,
    },
    /// Update the declared entry by entry id
    Update {
        /// YAML file with the declared entry parameters
        #[arg(long)]
        params: PathBuf,
        /// Install dir of the server to address
        #[arg(long)]
        server_install_dir: Option<PathBuf>,
    },
    /// Delete the declared entry by entry id
    Delete {
        /// YAML file with the declared entry parameters
        #[arg(long)]
        params: PathBuf,
        /// Install dir of the server to address
        #[arg(long)]
        server_install_dir: Option<PathBuf>,
    },
}

fn read_params<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read params file {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse params file {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn server_commands(
    install_dir: Option<&Path>,
    registration_uds_path: Option<String>,
) -> ServerCommands {
    ServerCommands::new(
        Arc::new(LocalExecutor::new()),
        install_dir,
        registration_uds_path,
    )
}

async fn run_agent(command: ComponentCommand) -> Result<()> {
    let executor = Arc::new(LocalExecutor::new());
    let store = Arc::new(LocalFileStore::new());
    let clock = Arc::new(SystemClock::new());

    let (params_path, mode, diff) = match command {
        ComponentCommand::Apply { params, diff } => (params, Mode::Apply, diff),
        ComponentCommand::Plan { params, diff } => (params, Mode::Plan, diff),
        ComponentCommand::Info { params } => {
            let params: AgentParams = read_params(&params)?;
            let dirs = params.dirs()?;
            let info = AgentInfo::new(
                executor,
                dirs,
                Some(params.socket_path.clone()),
                Some(params.version.clone()),
                params.service_scope.clone(),
            );
            let snapshot = info.snapshot(store.as_ref()).await;
            return print_json(&snapshot);
        }
    };

    let params: AgentParams = read_params(&params_path)?;
    let reconciler =
        AgentReconciler::new(params, executor.clone(), executor, store, clock).with_diff(diff);
    let outcome = reconciler.run(mode).await?;
    print_json(&outcome)?;
    if outcome.failed {
        anyhow::bail!("reconciliation did not converge");
    }
    Ok(())
}

async fn run_server(command: ComponentCommand) -> Result<()> {
    let executor = Arc::new(LocalExecutor::new());
    let store = Arc::new(LocalFileStore::new());
    let clock = Arc::new(SystemClock::new());

    let (params_path, mode, diff) = match command {
        ComponentCommand::Apply { params, diff } => (params, Mode::Apply, diff),
        ComponentCommand::Plan { params, diff } => (params, Mode::Plan, diff),
        ComponentCommand::Info { params } => {
            let params: ServerParams = read_params(&params)?;
            let dirs = params.dirs()?;
            let info = ServerInfo::new(
                executor,
                dirs,
                params.registration_uds_path.clone(),
                Some(params.version.clone()),
                params.service_scope.clone(),
            );
            let snapshot = info.snapshot(store.as_ref()).await;
            return print_json(&snapshot);
        }
    };

    let params: ServerParams = read_params(&params_path)?;
    let reconciler = ServerReconciler::new(params, executor, store, clock).with_diff(diff);
    let outcome = reconciler.run(mode).await?;
    print_json(&outcome)?;
    if outcome.failed {
        anyhow::bail!("reconciliation did not converge");
    }
    Ok(())
}

async fn run_entry(command: EntryCommand) -> Result<()> {
    match command {
        EntryCommand::Ensure {
            params,
            server_install_dir,
        } => {
            let params: EntryParams = read_params(&params)?;
            let commands = server_commands(
                server_install_dir.as_deref(),
                params.registration_uds_path.clone(),
            );
            let changed = commands.entry_ensure(&params).await?;
            println!("{{\"changed\": {changed}}}");
            Ok(())
        }
        EntryCommand::Show {
            params,
            server_install_dir,
        } => {
            let params: EntryParams = read_params(&params)?;
            let commands = server_commands(
                server_install_dir.as_deref(),
                params.registration_uds_path.clone(),
            );
            let outcome = commands.entry_show(&params).await?;
            print_json(&outcome)
        }
        EntryCommand::Create {
            params,
            server_install_dir,
        } => {
            let params: EntryParams = read_params(&params)?;
            let commands = server_commands(
                server_install_dir.as_deref(),
                params.registration_uds_path.clone(),
            );
            commands.entry_create(&params).await?;
            println!("{{\"changed\": true}}");
            Ok(())
        }
        EntryCommand::Update {
            params,
            server_install_dir,
        } => {
            let params: EntryParams = read_params(&params)?;
            let commands = server_commands(
                server_install_dir.as_deref(),
                params.registration_uds_path.clone(),
            );
            commands.entry_update(&params).await?;
            println!("{{\"changed\": true}}");
            Ok(())
        }
        EntryCommand::Delete {
            params,
            server_install_dir,
        } => {
            let params: EntryParams = read_params(&params)?;
            let commands = server_commands(
                server_install_dir.as_deref(),
                params.registration_uds_path.clone(),
            );
            commands.entry_delete(&params).await?;
            println!("{{\"changed\": true}}");
            Ok(())
        }
    }
}

async fn run_registrations(
    server_install_dir: Option<PathBuf>,
    registration_uds_path: Option<String>,
    spiffe_id: Option<String>,
    attestation_type: Option<String>,
) -> Result<()> {
    let commands = server_commands(server_install_dir.as_deref(), registration_uds_path);
    let filter = AgentEntryFilter {
        spiffe_ids: spiffe_id.into_iter().collect(),
        attestation_types: attestation_type.into_iter().collect(),
        serial_numbers: Vec::new(),
    };
    let entries = commands.agent_list(&filter).await?;
    print_json(&entries)
}


fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    smol::block_on(async {
        match cli.command {
            Commands::Agent { command } => run_agent(command).await,
            Commands::Server { command } => run_server(command).await,
            Commands::Entry { command } => run_entry(command).await,
            Commands::Registrations {
                server_install_dir,
                registration_uds_path,
                spiffe_id,
                attestation_type,
            } => {
                run_registrations(
                    server_install_dir,
                    registration_uds_path,
                    spiffe_id,
                    attestation_type,
                )
                .await
            }
        }
    })
}
