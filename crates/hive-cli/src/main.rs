//! Beehive CLI
//!
//! Command-line interface for running the membership engine and querying
//! its ledger.

use anyhow::Context;
use clap::{Parser, Subcommand};
use hive_core::{base_bcc_unlock, base_price, format_amount, Address, ClaimId, Tier, MAX_LEVEL};
use hive_node::config::LoggingSettings;
use hive_node::{HiveConfig, HiveNode, InboundEvent};
use hive_rewards::ClaimView;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hive")]
#[command(version = "0.1.0")]
#[command(about = "Beehive membership matrix and reward engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "hive.toml")]
    config: PathBuf,

    /// Data directory, overrides `storage.data_dir`
    #[arg(short, long, global = true, env = "HIVE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Print query results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the expiry sweep and metrics endpoint until Ctrl+C
    Node,

    /// Apply ActivateMember / UpgradeLevel events from a JSON array
    Replay {
        /// Events file
        events: PathBuf,
    },

    /// Claim a reward on behalf of its payee
    Claim {
        /// Claim ID
        id: ClaimId,
        /// Payee address
        payee: String,
    },

    /// Run one expiry sweep pass
    Sweep,

    /// Show a member's matrix
    Matrix {
        /// Matrix root address
        root: String,
        /// Only this layer
        #[arg(short, long)]
        layer: Option<u8>,
    },

    /// Show a member's claimable and pending rewards
    Rewards {
        /// Member address
        address: String,
        /// Also list this many past claims, newest first
        #[arg(long)]
        history: Option<usize>,
    },

    /// Show a member's balance
    Balance {
        /// Member address
        address: String,
    },

    /// Tier and amounts for an activation sequence
    Tier {
        /// Activation sequence number
        sequence: u64,
        /// Print the level price and unlock table at this tier
        #[arg(long)]
        levels: bool,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "hive.toml")]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Version information
    Version,
}

fn init_logging(verbose: bool, logging: &LoggingSettings) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false),
            )
            .init();
    }
}

fn expand_path(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(rest) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
    }
    path.to_path_buf()
}

fn load_config(cli: &Cli) -> anyhow::Result<HiveConfig> {
    let config_path = expand_path(&cli.config);
    let mut config = HiveConfig::load(Some(config_path.as_path()))
        .with_context(|| format!("loading {}", config_path.display()))?;

    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = expand_path(data_dir).to_string_lossy().into_owned();
    } else {
        config.storage.data_dir = expand_path(Path::new(&config.storage.data_dir))
            .to_string_lossy()
            .into_owned();
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_claims(title: &str, claims: &[ClaimView]) {
    println!("{} ({}):", title, claims.len());
    for view in claims {
        let claim = &view.claim;
        println!(
            "  {}  {:>10}  level {:<2} from {}  {}h left",
            claim.id,
            format_amount(claim.amount),
            claim.trigger_level,
            claim.triggered_by,
            view.hours_left
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { output, force } = &cli.command {
        let output = expand_path(output);
        if output.exists() && !force {
            anyhow::bail!("{} exists, pass --force to overwrite", output.display());
        }
        std::fs::write(&output, HiveConfig::default().to_toml()?)?;
        println!("Configuration written to {}", output.display());
        return Ok(());
    }

    if let Commands::Version = &cli.command {
        println!("Beehive v{}", env!("CARGO_PKG_VERSION"));
        println!("Rust: {}", rustc_version_runtime::version());
        println!();
        println!("Components:");
        println!("  - 3x3 forced matrix placement (19 layers)");
        println!("  - 72h reward claims with referral rollup");
        println!("  - Activation tiers and BCC level unlocks");
        return Ok(());
    }

    if let Commands::Tier { sequence, levels } = &cli.command {
        let tier = Tier::from_sequence(*sequence);
        if cli.json {
            return print_json(&serde_json::json!({
                "sequence": sequence,
                "tier": tier.number(),
                "multiplier": tier.multiplier(),
            }));
        }
        println!("Sequence {}: {}", sequence, tier);
        if *levels {
            println!("{:>5}  {:>10}  {:>10}", "level", "reward", "bcc unlock");
            for level in 1..=MAX_LEVEL {
                println!(
                    "{:>5}  {:>10}  {:>10}",
                    level,
                    format_amount(tier.apply(base_price(level)?)),
                    format_amount(tier.apply(base_bcc_unlock(level)?))
                );
            }
        }
        return Ok(());
    }

    let config = load_config(&cli)?;
    init_logging(cli.verbose, &config.logging);

    match cli.command {
        Commands::Node => {
            std::fs::create_dir_all(&config.storage.data_dir)?;
            info!("Data directory: {}", config.storage.data_dir);
            let node = HiveNode::new(config)?;
            node.run().await?;
        }

        Commands::Replay { events } => {
            let events_path = expand_path(&events);
            let content = std::fs::read_to_string(&events_path)
                .with_context(|| format!("reading {}", events_path.display()))?;
            let events: Vec<InboundEvent> = serde_json::from_str(&content)?;

            let node = HiveNode::new(config)?;
            let summary = node.engine().replay(&events);
            node.save_snapshot()?;
            if !summary.failed.is_empty() {
                warn!("{} of {} events failed", summary.failed.len(), events.len());
            }

            println!("Applied {} of {} events", summary.applied, events.len());
            for (index, err) in &summary.failed {
                println!("  #{}: {} ({})", index, err, err.kind());
            }
        }

        Commands::Claim { id, payee } => {
            let node = HiveNode::new(config)?;
            match node.engine().claim(&id, &Address::new(&payee)) {
                Ok(result) => {
                    node.save_snapshot()?;
                    if cli.json {
                        print_json(&result)?;
                    } else {
                        println!(
                            "Claimed {} USDT, claimable total now {}",
                            format_amount(result.amount),
                            format_amount(result.new_balance)
                        );
                    }
                }
                Err(err) => {
                    if cli.json {
                        print_json(&serde_json::json!({
                            "success": false,
                            "code": err.code(),
                            "kind": err.kind(),
                            "reason": err.not_claimable_reason(),
                            "message": err.to_string(),
                        }))?;
                    }
                    return Err(err.into());
                }
            }
        }

        Commands::Sweep => {
            let node = HiveNode::new(config)?;
            let report = node.engine().sweep_once();
            node.save_snapshot()?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Scanned {}: {} rolled up, {} forfeited, {} skipped, {} errors, {} reminders",
                    report.scanned,
                    report.rolled_up,
                    report.forfeited,
                    report.skipped,
                    report.errors,
                    report.reminders
                );
            }
        }

        Commands::Matrix { root, layer } => {
            let node = HiveNode::new(config)?;
            let root = Address::new(&root);
            match layer {
                Some(layer) => {
                    let slots = node.engine().matrix_view(&root, layer)?;
                    if cli.json {
                        print_json(&slots)?;
                    } else {
                        println!("Matrix of {}, layer {}:", root, layer);
                        for slot in slots {
                            println!(
                                "  {:<12} {}  {:?}",
                                slot.position.to_string(),
                                slot.occupant,
                                slot.placement_type
                            );
                        }
                    }
                }
                None => {
                    let stats = node.engine().matrix_stats(&root)?;
                    if cli.json {
                        print_json(&stats)?;
                    } else {
                        println!("Matrix of {}", root);
                        println!("  Team size: {}", stats.team_size);
                        println!("  Direct referrals: {}", stats.direct_referrals);
                        for layer in &stats.layers {
                            println!(
                                "  Layer {:>2}: {}/{}",
                                layer.layer, layer.occupied, layer.capacity
                            );
                        }
                    }
                }
            }
        }

        Commands::Rewards { address, history } => {
            let node = HiveNode::new(config)?;
            let address = Address::new(&address);
            let claimable = node.engine().claimable_rewards(&address)?;
            let pending = node.engine().pending_rewards(&address)?;
            let past = match history {
                Some(limit) => node.engine().reward_history(&address, limit)?,
                None => Vec::new(),
            };

            if cli.json {
                print_json(&serde_json::json!({
                    "claimable": claimable,
                    "pending": pending,
                    "history": past,
                }))?;
            } else {
                print_claims("Claimable", &claimable);
                print_claims("Pending", &pending);
                if history.is_some() {
                    println!("History ({}):", past.len());
                    for claim in past {
                        println!(
                            "  {}  {:>10}  {:<10} from {}",
                            claim.id,
                            format_amount(claim.amount),
                            claim.status,
                            claim.triggered_by
                        );
                    }
                }
            }
        }

        Commands::Balance { address } => {
            let node = HiveNode::new(config)?;
            let balance = node.engine().balance(&Address::new(&address))?;
            if cli.json {
                print_json(&balance)?;
            } else {
                println!("Balance of {}", balance.address);
                println!("  Transferable BCC: {}", format_amount(balance.transferable_bcc));
                println!("  Locked BCC:       {}", format_amount(balance.locked_bcc));
                println!(
                    "  Claimed USDT:     {}",
                    format_amount(balance.claimable_usdt_total)
                );
                println!("  Unlocked levels:  {:?}", balance.unlocked_levels);
            }
        }

        Commands::InitConfig { .. } | Commands::Version | Commands::Tier { .. } => {}
    }

    Ok(())
}
