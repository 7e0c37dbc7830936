//! Command line tools for committee key generation.
//!
//! - `keygen` derives a miner's keys from a private seed
//! - `inspect-era` shows the round windows a height falls in
//! - `simulate` runs group creation for a set of in-process nodes on the
//!   mock chain

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use committee_crypto::{Id, Pubkey};
use committee_dkg::{Era, Group, Round, RoundRange, SelfMinerInfo};
use committee_mock_chain::{EraReport, Simulation, SimulationConfig};
use committee_types::ProtocolParams;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Parser)]
#[command(name = "validator")]
#[command(about = "Committee key generation tools")]
struct Cli {
    /// JSON file overriding the default protocol parameters
    #[arg(long, global = true)]
    params: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive miner keys from a private seed
    Keygen {
        /// Hex-encoded private seed
        #[arg(long)]
        seed: String,

        /// Stake recorded in the key file
        #[arg(long, default_value = "100")]
        stake: u64,

        /// Also write the key file here
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print the era and round windows for a height
    InspectEra {
        #[arg(long)]
        height: u64,
    },

    /// Run group creation for in-process nodes on the mock chain
    Simulate {
        /// Number of miners
        #[arg(long, default_value = "9")]
        members: usize,

        /// Stake added per miner index on top of 100
        #[arg(long, default_value = "10")]
        stake_spread: u64,

        /// Number of miners that tamper with a share piece
        #[arg(long, default_value = "0")]
        evil: usize,

        /// Number of eras to run
        #[arg(long, default_value = "1")]
        eras: usize,
    },
}

/// Public part of a miner's keys.
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    id: Id,
    pubkey: Pubkey,
    stake: u64,
}

impl KeyFile {
    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RoundView {
    round: Round,
    #[serde(flatten)]
    range: RoundRange,
}

#[derive(Debug, Serialize)]
struct EraView {
    height: u64,
    seed_height: u64,
    era_window: u64,
    epoch: u64,
    current_round: Option<Round>,
    rounds: Vec<RoundView>,
    group_work_height: u64,
    group_dismiss_height: u64,
}

#[derive(Debug, Serialize)]
struct SimulationView {
    eras: Vec<EraReport>,
    groups: Vec<Group>,
}

fn load_params(path: Option<&Path>) -> Result<Option<ProtocolParams>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let params: ProtocolParams =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    params.validate()?;
    Ok(Some(params))
}

fn parse_seed(seed: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(seed.trim_start_matches("0x")).context("seed is not hex")?;
    if bytes.is_empty() {
        return Err(anyhow!("seed is empty"));
    }
    Ok(bytes)
}

fn inspect_era(params: &ProtocolParams, height: u64) -> EraView {
    let seed_height = params.seed_height(height);
    let era = Era::new(seed_height, None, params);
    let rounds = [Round::EncryptedPiece, Round::Mpk, Round::OriginPiece, Round::End]
        .into_iter()
        .map(|round| RoundView {
            round,
            range: era.range(round),
        })
        .collect();
    EraView {
        height,
        seed_height,
        era_window: params.era_window(),
        epoch: params.epoch_at(height),
        current_round: era.round_at(height),
        rounds,
        group_work_height: params.group_work_height(seed_height),
        group_dismiss_height: params.group_dismiss_height(seed_height),
    }
}

async fn simulate(config: SimulationConfig, eras: usize) -> Result<SimulationView> {
    let sim = Simulation::new(config)?.with_key_expiry(64);
    let (sim, reports) = tokio::task::spawn_blocking(move || {
        let mut sim = sim;
        let reports: Vec<EraReport> = (0..eras).map(|_| sim.run_era()).collect();
        (sim, reports)
    })
    .await?;

    for report in &reports {
        info!(
            seed_height = report.seed_height,
            candidates = report.candidates.len(),
            code = ?report.result.as_ref().map(|r| r.code),
            punished = report.punishment.as_ref().map_or(0, |p| p.penalty_targets.len()),
            "Era finished"
        );
    }
    let groups = sim.chain().groups();
    sim.shutdown().await;
    Ok(SimulationView {
        eras: reports,
        groups,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("validator=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let params = load_params(cli.params.as_deref())?;

    match cli.command {
        Commands::Keygen { seed, stake, out } => {
            let miner = SelfMinerInfo::from_private_seed(&parse_seed(&seed)?, stake, 0);
            let key_file = KeyFile {
                id: miner.id(),
                pubkey: miner.info.pubkey,
                stake,
            };
            if let Some(path) = out {
                key_file.save(&path)?;
                info!("Key file saved to {:?}", path);
            }
            println!("{}", serde_json::to_string_pretty(&key_file)?);
        }

        Commands::InspectEra { height } => {
            let params = params.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&inspect_era(&params, height))?);
        }

        Commands::Simulate {
            members,
            stake_spread,
            evil,
            eras,
        } => {
            let mut config = SimulationConfig {
                members,
                stake_spread,
                evil,
                ..SimulationConfig::default()
            };
            if let Some(params) = params {
                config.params = params;
            }
            info!(members, evil, eras, "Starting simulation");
            let view = simulate(config, eras).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}
