// vim: tw=80

use std::{path::PathBuf, process::exit, sync::Arc};

use clap::{crate_version, Parser};
use futures::future;
use paritygen_core::{
    comm::{mem, Comm},
    runner::{self, OperationMode, RunConfig},
    Result, COORDINATOR,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone, Debug)]
/// Regenerate parity for every chunk on every target
struct Complete {}

#[derive(Parser, Clone, Debug)]
/// Regenerate parity for chunks modified within a timestamp range
struct Partial {
    /// Lower bound, in seconds since the epoch
    #[clap(long)]
    from: u64,
    /// Upper bound, in seconds since the epoch
    #[clap(long)]
    to:   u64,
}

#[derive(Parser, Clone, Debug)]
/// Skip scanning; replan and execute from persisted metadata only
struct Empty {}

#[derive(Parser, Clone, Debug)]
enum SubCommand {
    Complete(Complete),
    Partial(Partial),
    Empty(Empty),
}

#[derive(Parser, Clone, Debug)]
#[clap(version = crate_version!())]
struct Cli {
    /// A storage target's root directory.  Give once per target; each root
    /// must hold a targetID file and a chunks/ directory.
    #[clap(long = "store", required(true))]
    stores:          Vec<PathBuf>,
    /// Chunk transfer window, in bytes
    #[clap(long)]
    transfer_buffer: Option<usize>,
    /// Upper bound on worklist entries per collector
    #[clap(long)]
    max_work_items:  Option<usize>,
    #[clap(subcommand)]
    cmd:             SubCommand,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli: Cli = Cli::parse();
    let mode = match cli.cmd {
        SubCommand::Complete(_) => OperationMode::Complete,
        SubCommand::Partial(p) => {
            OperationMode::Partial { from: p.from, to: p.to }
        }
        SubCommand::Empty(_) => OperationMode::Empty,
    };
    let mut config = RunConfig { mode, ..RunConfig::default() };
    if let Some(tb) = cli.transfer_buffer {
        config.transfer_buffer = tb;
    }
    if let Some(mw) = cli.max_work_items {
        config.max_work_items = mw;
    }
    let config = Arc::new(config);

    let mut tasks = Vec::new();
    for ep in mem::cluster(1 + 2 * cli.stores.len()) {
        let config = config.clone();
        let root = (ep.rank() != COORDINATOR).then(|| {
            cli.stores[(ep.rank() as usize - 1) / 2].clone()
        });
        tasks.push(tokio::spawn(runner::run_rank(ep, config, root)));
    }

    let mut outcome = None;
    for (rank, joined) in future::join_all(tasks).await
        .into_iter()
        .enumerate()
    {
        match joined.unwrap() {
            Ok(o) if rank == COORDINATOR as usize => outcome = Some(o),
            Ok(_) => (),
            Err(e) => {
                eprintln!("Error: rank {rank} failed: {e}");
                exit(1);
            }
        }
    }
    if let Some(o) = outcome {
        if o.scan_failures > 0 {
            eprintln!("Warning: {} target scan(s) failed; their chunks were \
                       not refreshed", o.scan_failures);
        }
    }
    Ok(())
}
