//! routed-daemon: Launch a simulated daemon fleet over the routing trees,
//! or inspect the plan a single daemon would compute.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use routed_core::routing::compute_plan;
use routed_core::{EventBus, Rank, TopologyKind};
use routed_daemon::{CliOverrides, Fleet, FleetOptions, resolve_config};

#[derive(Parser, Debug)]
#[command(name = "routed-daemon")]
#[command(about = "Routing trees and launch rollup for daemon fleets")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a fleet of in-process daemons and report the rollup
    Simulate(SimulateArgs),
    /// Print the routing plan of one rank
    Plan(PlanArgs),
}

#[derive(Args, Debug)]
struct TreeArgs {
    /// Number of daemons, root included
    #[arg(short = 'n', long, default_value_t = 8)]
    daemons: u32,

    /// Routing tree to use (binomial, radix or direct)
    #[arg(short, long)]
    topology: Option<TopologyKind>,

    /// Fan-out of the radix tree
    #[arg(long)]
    radix: Option<u32>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[command(flatten)]
    tree: TreeArgs,

    /// Daemons wait for the node map from their static parent
    #[arg(long)]
    warmup: bool,

    /// Ranks that never start (repeatable)
    #[arg(long = "kill")]
    kill: Vec<u32>,

    /// Upper bound of the random delay before each self report, in ms
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,

    /// Seconds to wait for the fleet to shut down
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Deliver every message directly instead of over the tree
    #[arg(long)]
    no_routing: bool,

    /// Print every event as a JSON line
    #[arg(long)]
    events: bool,
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[command(flatten)]
    tree: TreeArgs,

    /// Rank whose plan to print
    #[arg(short, long, default_value_t = 0)]
    rank: u32,
}

fn overrides(tree: &TreeArgs, no_routing: bool) -> CliOverrides {
    CliOverrides {
        topology: tree.topology,
        radix: tree.radix,
        no_routing,
    }
}

async fn simulate(args: SimulateArgs) -> Result<()> {
    let config = resolve_config(
        args.tree.config.as_deref(),
        |key| std::env::var(key).ok(),
        &overrides(&args.tree, args.no_routing),
    )?;

    let events = Arc::new(EventBus::new());
    let _subscription = args.events.then(|| {
        events.subscribe(|event| match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to encode event: {}", e),
        })
    });

    let options = FleetOptions {
        daemons: args.tree.daemons,
        config,
        warmup: args.warmup,
        kill: args.kill.into_iter().map(Rank::new).collect(),
        jitter: Duration::from_millis(args.jitter_ms),
        timeout: Duration::from_secs(args.timeout),
    };
    let report = Fleet::launch(options, events).await?;

    info!(
        "{} tree: {:?}, {} reported, {} missing, {} aborted",
        report.topology,
        report.state,
        report.reported.len(),
        report.missing.len(),
        report.aborted.len()
    );
    for (rank, hostname) in &report.hostnames {
        let hops = report
            .probe_hops
            .get(rank)
            .map(|h| h.to_string())
            .unwrap_or_else(|| "-".into());
        println!("{:>6}  {:<16} hops {}", rank, hostname, hops);
    }
    if !report.missing.is_empty() {
        let missing: Vec<String> = report.missing.iter().map(Rank::to_string).collect();
        println!("missing: {}", missing.join(" "));
    }
    Ok(())
}

fn plan(args: PlanArgs) -> Result<()> {
    let config = resolve_config(
        args.tree.config.as_deref(),
        |key| std::env::var(key).ok(),
        &overrides(&args.tree, false),
    )?;
    let kind = config.topology.unwrap_or_else(TopologyKind::highest_priority);
    let rank = Rank::new(args.rank);
    let plan = compute_plan(kind, rank, args.tree.daemons, config.radix)?;

    println!("{} tree, rank {} of {}", kind, rank, args.tree.daemons);
    match plan.parent {
        Some(parent) => println!("parent: {}", parent),
        None => println!("parent: none"),
    }
    for child in &plan.children {
        let relatives: Vec<String> = child.relatives.iter().map(|r| r.to_string()).collect();
        println!(
            "child {:>6}  relatives [{}]  {}",
            child.rank,
            relatives.join(" "),
            child.relatives.to_debug_string()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if cli.verbose {
        "debug,routed_daemon=debug,routed_core=debug"
    } else {
        "info,routed_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Simulate(args) => simulate(args).await,
        Command::Plan(args) => plan(args),
    }
}
