use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vote_bribes::balances::{apply_balance_overrides, Erc20BalanceClient};
use vote_bribes::config::{load_config, SnapshotConfig, DEFAULT_SNAPSHOT_ENDPOINT};
use vote_bribes::engine::aggregate::count_votes;
use vote_bribes::engine::{AllocationEngine, AllocationReport, ReflectionOutcome};
use vote_bribes::model::RoundInput;
use vote_bribes::report;
use vote_bribes::snapshot::SnapshotClient;

// ========= CLI =========

#[derive(Parser, Debug)]
#[command(name = "vote-bribes", version, about = "Governance vote bribe allocator")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print per-choice vote totals for a proposal
    Totals {
        #[arg(long)]
        proposal: String,

        /// GraphQL hub endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Fetch a proposal's choices and votes into a round file for offline runs
    Freeze {
        #[arg(long)]
        proposal: String,

        #[arg(long)]
        out: PathBuf,

        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Run the full allocation for a configured round
    Allocate {
        /// Path to the allocation config (TOML)
        #[arg(long, default_value = "bribes.toml")]
        config: PathBuf,

        /// Frozen primary round (fetched from the hub when omitted)
        #[arg(long)]
        round: Option<PathBuf>,

        /// Frozen reflection round (fetched when omitted and [reflection] is set)
        #[arg(long = "reflection-round")]
        reflection_round: Option<PathBuf>,

        /// Print the full report as JSON instead of tables
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Write address=amount lines to this file
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

fn snapshot_config(endpoint: Option<String>) -> SnapshotConfig {
    let endpoint = endpoint
        .or_else(|| std::env::var("BRIBES_SNAPSHOT_ENDPOINT").ok())
        .unwrap_or_else(|| DEFAULT_SNAPSHOT_ENDPOINT.to_string());
    SnapshotConfig {
        endpoint,
        ..SnapshotConfig::default()
    }
}

fn read_round(path: &Path) -> Result<RoundInput> {
    let raw = fs::read_to_string(path).with_context(|| format!("read round {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse round {}", path.display()))
}

async fn load_round(client: &SnapshotClient, file: Option<&Path>, proposal_id: &str) -> Result<RoundInput> {
    match file {
        Some(path) => read_round(path),
        None => client.fetch_round(proposal_id).await,
    }
}

async fn allocate(
    config: PathBuf,
    round: Option<PathBuf>,
    reflection_round: Option<PathBuf>,
    json: bool,
    export: Option<PathBuf>,
) -> Result<()> {
    let cfg = load_config(&config)?;
    let client = SnapshotClient::new(&cfg.snapshot)?;

    let mut primary = load_round(&client, round.as_deref(), &cfg.proposal_id).await?;
    if let Some(balances) = &cfg.balances {
        let voters: Vec<String> = primary.votes.iter().map(|v| v.voter.clone()).collect();
        let snapshot = Erc20BalanceClient::new(balances.clone())?
            .fetch_snapshot(&voters)
            .await?;
        apply_balance_overrides(&mut primary.votes, &snapshot);
    }

    let engine = AllocationEngine::new(cfg.clone())?;
    let report = engine.run(&primary)?;

    let reflection = match &cfg.reflection {
        Some(rcfg) => {
            let round = load_round(&client, reflection_round.as_deref(), &rcfg.proposal_id).await?;
            let outcome = engine.reflect(&report, &round)?;
            if outcome.is_pending() {
                warn!("reflection round {} is pending; its payouts are not exported", rcfg.proposal_id);
            }
            Some(outcome)
        }
        None => None,
    };

    if json {
        let body = serde_json::json!({ "report": report, "reflection": reflection });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print_tables(&report, reflection.as_ref());
    }

    if let Some(path) = export {
        let lines = report::disbursement_lines(&report, reflection.as_ref());
        let mut body = lines.join("\n");
        body.push('\n');
        fs::write(&path, body).with_context(|| format!("write export {}", path.display()))?;
        info!("wrote {} disbursement lines to {}", lines.len(), path.display());
    }
    Ok(())
}

fn print_tables(report: &AllocationReport, reflection: Option<&ReflectionOutcome>) {
    println!("{}", report::render_choice_table(&report.choice_totals));
    println!("{}", report::render_chain_table(&report.chain_totals));
    println!("{}", report::render_payout_table(report));
    if let Some(outcome) = reflection {
        println!("{}", report::render_reflection(outcome));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // init tracing from env BRIBES_LOG or RUST_LOG, written to stderr
    let filter = std::env::var("BRIBES_LOG")
        .unwrap_or_else(|_| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Totals { proposal, endpoint } => {
            let client = SnapshotClient::new(&snapshot_config(endpoint))?;
            let round = client.fetch_round(&proposal).await?;
            let counts = count_votes(&round.choices, &round.votes)?;
            println!("{}", report::render_count_table(&counts.choices));
            if let Some(chains) = &counts.chains {
                println!("{}", report::render_chain_table(chains));
            }
        }

        Commands::Freeze { proposal, out, endpoint } => {
            let client = SnapshotClient::new(&snapshot_config(endpoint))?;
            let round = client.fetch_round(&proposal).await?;
            fs::write(&out, serde_json::to_vec_pretty(&round)?)
                .with_context(|| format!("write round {}", out.display()))?;
            info!("froze {} votes for {} into {}", round.votes.len(), proposal, out.display());
        }

        Commands::Allocate {
            config,
            round,
            reflection_round,
            json,
            export,
        } => allocate(config, round, reflection_round, json, export).await?,
    }
    Ok(())
}
