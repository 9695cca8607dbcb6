//! Claim trie CLI.
//!
//! # Commands
//! ```text
//! claimtrie replay  --blocks <blocks.json> --params <params.json> [--stop-height N] [--sqlite <db> [--resume]]
//! claimtrie resolve --blocks <blocks.json> --params <params.json> <name>...
//! claimtrie params  --params <params.json>
//! claimtrie info
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use claimtrie_core::{BlockProcessor, ChangeSet, CheckpointStore, ClaimName, NetworkParams};
use claimtrie_storage::{InMemoryStorage, SqliteStorage};
use claimtrie_sync::{MemoryBlockSource, SyncBuilder};
use tracing::info;

mod tracing_setup;

use tracing_setup::{init_tracing, LogConfig};

/// Sync id under which `replay` checkpoints are stored.
const REPLAY_ID: &str = "replay";

#[derive(Parser)]
#[command(
    name = "claimtrie",
    about = "Claim trie consensus: replay blocks and resolve name controllers",
    long_about = "
Replays a JSON block file through the claim trie state machine and reports
which claim controls each name.

Block files are JSON arrays of consecutive blocks:
  [{ \"height\": 1, \"hash\": \"..\", \"prev_hash\": \"..\", \"transactions\": [..] }, ..]
",
    version
)]
struct Cli {
    /// Global log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Per-crate log level override, e.g. `claimtrie-sync=info` (repeatable)
    #[arg(long = "log", global = true)]
    log_overrides: Vec<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a block file and print the resulting change sets
    Replay {
        /// JSON array of blocks
        #[arg(long)]
        blocks: String,
        /// Network parameters (JSON)
        #[arg(long)]
        params: String,
        /// Network slug recorded with checkpoints and stored change sets
        #[arg(long, default_value = "mainnet")]
        network: String,
        /// Stop after this height (default: last block in the file)
        #[arg(long)]
        stop_height: Option<u32>,
        /// Also persist change sets and takeovers to this SQLite database
        #[arg(long)]
        sqlite: Option<String>,
        /// Continue from the checkpoint saved in the SQLite database instead
        /// of replaying from the first block
        #[arg(long, requires = "sqlite")]
        resume: bool,
        /// Print only blocks with takeovers
        #[arg(long)]
        takeovers_only: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay a block file and show who controls the given names
    Resolve {
        /// JSON array of blocks
        #[arg(long)]
        blocks: String,
        /// Network parameters (JSON)
        #[arg(long)]
        params: String,
        /// Names to resolve
        #[arg(required = true, num_args = 1..)]
        names: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a network parameter file
    Params {
        /// Network parameters (JSON)
        #[arg(long)]
        params: String,
    },

    /// Show version and capabilities
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log = LogConfig {
        level: cli.log_level.clone(),
        json: cli.json_logs,
        ..LogConfig::default()
    }
    .with_overrides(&cli.log_overrides);
    init_tracing(&log);

    match cli.command {
        Commands::Replay { blocks, params, network, stop_height, sqlite, resume, takeovers_only, json } => {
            let output = ReplayOutput { takeovers_only, json };
            cmd_replay(&blocks, &params, &network, stop_height, sqlite.as_deref(), resume, output).await
        }

        Commands::Resolve { blocks, params, names, json } => cmd_resolve(&blocks, &params, &names, json).await,

        Commands::Params { params } => cmd_params(&params),

        Commands::Info => cmd_info(),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn load_params(path: &str) -> Result<NetworkParams> {
    let json = std::fs::read_to_string(path).with_context(|| format!("cannot read params file: {path}"))?;
    NetworkParams::from_json(&json).with_context(|| format!("invalid params file: {path}"))
}

fn load_blocks(path: &str) -> Result<MemoryBlockSource> {
    let json = std::fs::read_to_string(path).with_context(|| format!("cannot read block file: {path}"))?;
    let source = MemoryBlockSource::from_json(&json).with_context(|| format!("invalid block file: {path}"))?;
    if source.is_empty() {
        bail!("block file {} contains no blocks", Path::new(path).display());
    }
    Ok(source)
}

/// Height range `(first, last)` covered by `source`, capped at `stop_height`.
fn replay_range(source: &MemoryBlockSource, stop_height: Option<u32>) -> Result<(u32, u32)> {
    let first = source.first_height().context("block file is empty")?;
    let last = first + (source.len() as u32 - 1);
    let stop = stop_height.map_or(last, |s| s.min(last));
    if stop < first {
        bail!("stop height {stop} is below the first block height {first}");
    }
    Ok((first, stop))
}

struct ReplayOutput {
    takeovers_only: bool,
    json: bool,
}

fn print_change_set(cs: &ChangeSet) {
    println!("block {} ({})", cs.height, cs.block_hash);
    for change in &cs.changed_names {
        println!(
            "  {:<24} {} -> {}",
            change.name.to_string(),
            change.previous_controller.as_deref().unwrap_or("-"),
            change.new_controller.as_deref().unwrap_or("-"),
        );
    }
    for claim_id in &cs.newly_activated {
        println!("  activated {claim_id}");
    }
    for takeover in &cs.takeovers {
        println!("  takeover  {} by {}", takeover.name, takeover.claim_hash.claim_id());
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_replay(
    blocks: &str,
    params: &str,
    network: &str,
    stop_height: Option<u32>,
    sqlite: Option<&str>,
    resume: bool,
    output: ReplayOutput,
) -> Result<()> {
    let params = load_params(params)?;
    let source = load_blocks(blocks)?;
    let (first, stop) = replay_range(&source, stop_height)?;
    info!(first, stop, network, "Replaying block file");

    let memory = Arc::new(InMemoryStorage::new());
    let mut builder = SyncBuilder::new()
        .id(REPLAY_ID)
        .network(network)
        .start_height(first)
        .stop_height(stop)
        .on_change_set(memory.clone())
        .on_reorg(memory.clone());

    let db = match sqlite {
        Some(path) => {
            let db = Arc::new(
                SqliteStorage::open(path)
                    .await
                    .with_context(|| format!("cannot open SQLite database: {path}"))?,
            );
            match db.load(network, REPLAY_ID).await? {
                Some(cp) if resume => {
                    info!(height = cp.height, hash = %cp.block_hash, "Resuming from checkpoint");
                    // Rows written after the checkpoint are replayed again.
                    db.rollback_after(network, cp.height).await?;
                }
                _ => {
                    db.delete(network, REPLAY_ID).await?;
                    // Rows from an earlier replay of the same range would be duplicated.
                    if let Some(before) = first.checked_sub(1) {
                        db.rollback_after(network, before).await?;
                    }
                }
            }
            builder = builder
                .on_change_set(db.clone())
                .on_reorg(db.clone())
                .checkpoint_store(Box::new(db.clone()));
            Some(db)
        }
        None => {
            builder = builder.checkpoint_store(Box::new(memory.clone()));
            None
        }
    };

    let processor = BlockProcessor::in_memory(params)?;
    let mut sync = builder.build(source, processor);
    sync.run().await.context("replay failed")?;

    let change_sets: Vec<ChangeSet> = memory
        .change_sets()
        .into_iter()
        .filter(|cs| !output.takeovers_only || !cs.takeovers.is_empty())
        .collect();
    info!(committed = memory.change_set_count(), reorgs = memory.reorg_count(), "Replay finished");

    if output.json {
        println!("{}", serde_json::to_string_pretty(&change_sets)?);
    } else {
        for cs in change_sets.iter().filter(|cs| !cs.is_empty()) {
            print_change_set(cs);
        }
        let tip = sync.processor().tip();
        println!();
        println!("Replayed:   {} blocks (up to {stop})", memory.change_set_count());
        if let Some(tip) = tip {
            println!("Tip:        {} ({})", tip.height, tip.hash);
        }
        println!("Reorgs:     {}", memory.reorg_count());
        if let Some(db) = db {
            println!("Stored:     {} change sets in SQLite", db.change_set_count(network).await?);
        }
    }
    Ok(())
}

async fn cmd_resolve(blocks: &str, params: &str, names: &[String], json: bool) -> Result<()> {
    let params = load_params(params)?;
    let source = load_blocks(blocks)?;
    let (first, stop) = replay_range(&source, None)?;
    info!(first, stop, names = names.len(), "Replaying block file before resolving");

    let processor = BlockProcessor::in_memory(params)?;
    let mut sync = SyncBuilder::new().start_height(first).stop_height(stop).build(source, processor);
    sync.run().await.context("replay failed")?;
    let processor = sync.into_processor();

    let mut report = Vec::with_capacity(names.len());
    for raw in names {
        let name = ClaimName::from(raw.as_str());
        let controller = processor.resolve(&name);
        let claims: Vec<serde_json::Value> = processor
            .get_claims_for_name(&name)
            .into_iter()
            .map(|claim| {
                let effective = processor.effective_amount(&claim.claim_hash).unwrap_or(0);
                serde_json::json!({
                    "claim_id": claim.claim_id(),
                    "amount": claim.amount,
                    "effective_amount": effective,
                    "height": claim.height,
                    "activation_height": claim.activation_height,
                    "expiration_height": claim.expiration_height,
                    "controlling": controller.as_deref() == Some(claim.claim_id().as_str()),
                })
            })
            .collect();
        report.push(serde_json::json!({
            "name": raw,
            "controller": controller,
            "claims": claims,
        }));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let tip = processor.tip().map(|t| t.height).unwrap_or(first);
    println!("As of height {tip}");
    for entry in &report {
        println!();
        println!("{}: {}", entry["name"].as_str().unwrap_or("?"), entry["controller"].as_str().unwrap_or("(none)"));
        for claim in entry["claims"].as_array().into_iter().flatten() {
            println!(
                "  {} {}  amount={} effective={} active_from={} expires={}",
                if claim["controlling"].as_bool().unwrap_or(false) { "*" } else { " " },
                claim["claim_id"].as_str().unwrap_or("?"),
                claim["amount"],
                claim["effective_amount"],
                claim["activation_height"],
                claim["expiration_height"],
            );
        }
    }
    Ok(())
}

fn cmd_params(path: &str) -> Result<()> {
    let params = load_params(path)?;
    println!("✓ {path} is valid");
    println!("{}", serde_json::to_string_pretty(&params)?);
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("claimtrie v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Capabilities:");
    println!("  ✓ Claim / support / update / abandon tracking");
    println!("  ✓ Proportional activation delay   (with per-network exception windows)");
    println!("  ✓ Takeover resolution             (effective amount, then tx position)");
    println!("  ✓ Expiration                      (original and extended windows)");
    println!("  ✓ Name normalization              (NFD + case folding)");
    println!("  ✓ Rollback and replay             (bounded undo journal)");
    println!("  ✓ Reorg detection                 (block tracker + common ancestor search)");
    println!();
    println!("Storage:    memory, SQLite (sqlx)");
    Ok(())
}
