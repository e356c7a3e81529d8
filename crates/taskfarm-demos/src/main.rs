//! Taskfarm demo applications.
//!
//! Consumers of the library, not part of it: a number-crunching farm over an
//! in-process cluster, and a round-trip timing loop between two ranks.

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskfarm_core::{Error, Farm, FarmConfig, JsonCodec};
use taskfarm_proto::Tag;
use taskfarm_transport::{ClusterConfig, LocalCluster, NngTransport, Source, Transport};

#[derive(Parser, Debug)]
#[command(name = "taskfarm-demos")]
#[command(version, about = "Taskfarm demo applications", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Farm a batch of numbers across an in-process cluster.
    Farm(FarmArgs),
    /// Measure message round-trip time between two ranks.
    Pingpong(PingpongArgs),
}

#[derive(clap::Args, Debug)]
struct FarmArgs {
    /// Number of worker ranks.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Number of items to farm out.
    #[arg(long, default_value_t = 100)]
    items: u64,

    /// Wall-clock limit in minutes for the dispatch phase.
    #[arg(long)]
    time_limit_mins: Option<u64>,
}

impl FarmArgs {
    fn into_config(self) -> (usize, u64, FarmConfig) {
        let mut config = FarmConfig::new();
        if let Some(mins) = self.time_limit_mins {
            config = config.with_time_limit(Duration::from_secs(mins * 60));
        }
        (self.workers.max(1), self.items, config)
    }
}

#[derive(clap::Args, Debug)]
struct PingpongArgs {
    /// Number of round trips to time.
    #[arg(long, default_value_t = 1000)]
    rounds: u32,

    /// This process's rank in a two-rank socket mesh (requires --peers).
    #[arg(long, requires = "peers")]
    rank: Option<u32>,

    /// Comma-separated listen addresses of both ranks. When omitted the
    /// demo runs both ranks in-process.
    #[arg(long, value_delimiter = ',')]
    peers: Option<Vec<String>>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskfarm=info,taskfarm_demos=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let outcome = match args.command {
        Command::Farm(farm_args) => run_farm(farm_args),
        Command::Pingpong(pingpong_args) => run_pingpong(pingpong_args),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "demo failed");
            ExitCode::from(exit_code(&error))
        }
    }
}

fn exit_code(error: &Error) -> u8 {
    match error {
        Error::Transport(_) => 2,
        Error::Codec(_) => 3,
        Error::DeadlineExceeded => 4,
        _ => 1,
    }
}

fn run_farm(args: FarmArgs) -> Result<(), Error> {
    let (workers, items, config) = args.into_config();
    let size = workers + 1;
    tracing::info!(workers, items, "farming squares over a local cluster");

    let delivered = Arc::new(AtomicU64::new(0));
    let sum = Arc::new(AtomicU64::new(0));

    let outputs = {
        let delivered = delivered.clone();
        let sum = sum.clone();
        let config = config.clone();
        LocalCluster::run(size, move |transport| {
            let delivered = delivered.clone();
            let sum = sum.clone();
            Farm::builder(JsonCodec)
                .with_config(config.clone())
                .with_items(0..items)
                .with_job(|item: u64| Ok(item * item))
                .on_result(move |square: u64| {
                    delivered.fetch_add(1, Ordering::Relaxed);
                    sum.fetch_add(square, Ordering::Relaxed);
                    Ok(())
                })
                .on_error(|error| {
                    tracing::warn!(error = %error, "job failed");
                    Ok(())
                })
                .build()?
                .run(&transport)
        })
        .map_err(taskfarm_core::Error::Transport)?
    };

    for outcome in outputs {
        let report = outcome?;
        if report.role == taskfarm_core::Role::Controller {
            tracing::info!(
                dispatched = report.items_dispatched,
                results = delivered.load(Ordering::Relaxed),
                sum_of_squares = sum.load(Ordering::Relaxed),
                deadline_expired = report.deadline_expired,
                "farm complete"
            );
        }
    }
    Ok(())
}

fn run_pingpong(args: PingpongArgs) -> Result<(), Error> {
    match (args.rank, args.peers) {
        (Some(rank), Some(peers)) => {
            if peers.len() != 2 {
                return Err(Error::Config(format!(
                    "pingpong needs exactly two peers, got {}",
                    peers.len()
                )));
            }
            let transport = NngTransport::connect(ClusterConfig::new(rank, peers))
                .map_err(taskfarm_core::Error::Transport)?;
            pingpong(&transport, args.rounds).map_err(taskfarm_core::Error::Transport)
        }
        _ => {
            let rounds = args.rounds;
            let outputs = LocalCluster::run(2, move |transport| pingpong(&transport, rounds))
                .map_err(taskfarm_core::Error::Transport)?;
            for outcome in outputs {
                outcome.map_err(taskfarm_core::Error::Transport)?;
            }
            Ok(())
        }
    }
}

/// Time `rounds` float round trips between ranks 0 and 1.
fn pingpong<T: Transport>(transport: &T, rounds: u32) -> Result<(), taskfarm_transport::Error> {
    let tag = Tag::user(101)?;
    transport.barrier()?;

    let mut buf = [0f64; 1];
    if transport.rank() == 0 {
        let start = transport.wall_time();
        for round in 0..rounds {
            transport.send_floats(&[round as f64], 1, tag)?;
            transport.recv_floats(&mut buf, Source::Rank(1), tag)?;
        }
        let elapsed = transport.wall_time() - start;
        tracing::info!(
            rounds,
            total_secs = elapsed,
            mean_usecs = elapsed / f64::from(rounds.max(1)) * 1e6,
            "round trip timing complete"
        );
    } else {
        for _ in 0..rounds {
            let status = transport.recv_floats(&mut buf, Source::Rank(0), tag)?;
            transport.send_floats(&buf[..status.len], 0, tag)?;
        }
    }
    Ok(())
}
