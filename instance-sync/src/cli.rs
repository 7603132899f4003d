///
/// This module implements the CLI interface for instance-sync: command
/// parsing, the `sync` and `resume` entrypoints, and user-visible failure
/// notices.
///
/// All synchronisation logic lives in the [`instance-sync-core`] crate. This
/// module only wires configuration, clients and the run record together.
///
/// ## How To Use
/// - For command-line users: use the installed `instance-sync` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`instance-sync-core`]: ../../instance-sync-core/
use crate::client::ApiClient;
use crate::load_config::{context_for, load_config, require_env, validate_token, DST_TOKEN_ENV};
use anyhow::Result;
use clap::{Parser, Subcommand};
use instance_sync_core::progress::TracingProgress;
use instance_sync_core::run_record::{run as run_record, RunRecord, RunReport};
use std::path::{Path, PathBuf};

/// CLI for instance-sync: copy teams, workspaces, projects and members
/// from one instance to another.
#[derive(Parser)]
#[clap(
    name = "instance-sync",
    version,
    about = "Migrate teams, workspaces, projects, datasets and members between two instances"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronise the selection in the config file into the destination
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Re-run a previously recorded synchronisation without prompting
    Resume {
        /// Path to the run record written by an earlier `sync`
        #[clap(long)]
        record: PathBuf,
        /// Destination server address
        #[clap(long)]
        destination: String,
        /// Scratch directory for in-flight downloads
        #[clap(long, default_value = "storage")]
        scratch_dir: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config } => {
            let config = load_config(config)?;
            config.trace_loaded();
            tracing::info!(command = "sync", "Starting synchronisation");

            let record = config.to_record();
            if let Some(path) = &config.record_path {
                record.persist(path).await;
            }
            execute(
                &record,
                &config.destination.server,
                &config.secrets.dst_token,
                &config.scratch_dir,
            )
            .await
        }
        Commands::Resume {
            record,
            destination,
            scratch_dir,
        } => {
            let loaded = RunRecord::load(&record).await.map_err(|e| {
                tracing::error!(command = "resume", error = %e, "Failed to load run record");
                anyhow::Error::new(e)
            })?;
            loaded.trace_loaded();
            let dst_token = require_env(DST_TOKEN_ENV)?;
            validate_token(DST_TOKEN_ENV, &dst_token)?;
            tracing::info!(command = "resume", "Resuming synchronisation");
            execute(&loaded, &destination, &dst_token, &scratch_dir).await
        }
    }
}

async fn execute(
    record: &RunRecord,
    dst_server: &str,
    dst_token: &str,
    scratch_dir: &Path,
) -> Result<()> {
    let src = ApiClient::new(&record.src_server, &record.src_token)?;
    let dst = ApiClient::new(dst_server, dst_token)?;
    let ctx = context_for(record, scratch_dir);
    ctx.trace_loaded();

    match run_record(&dst, &src, record, &ctx, &TracingProgress).await {
        Ok(report) => summarise(&report),
        Err(e) => {
            tracing::error!(error = %e, "Synchronisation stopped");
            Err(anyhow::anyhow!(
                "Synchronisation stopped: {e}. Re-run the same command to continue; \
                 items already copied are skipped."
            ))
        }
    }
}

fn summarise(report: &RunReport) -> Result<()> {
    let ws = &report.workspaces;
    let members = &report.members;
    tracing::info!(
        workspaces = ws.workspaces,
        projects = ws.projects,
        projects_skipped = ws.projects_skipped,
        projects_recreated = ws.projects_recreated,
        datasets = ws.datasets,
        transferred = ws.transferred,
        reused = ws.reused,
        skipped = ws.skipped,
        members_created = members.created,
        members_added = members.added,
        members_updated = members.role_updated,
        "Synchronisation report"
    );
    for failure in &ws.failures {
        tracing::error!(
            workspace = %failure.workspace,
            project = %failure.project,
            dataset = %failure.dataset,
            error = %failure.error,
            "Dataset failed"
        );
    }
    if report.is_complete() {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "{} datasets and {} members failed. Re-run the same command to retry them.",
        ws.failures.len(),
        members.failed.len()
    ))
}
