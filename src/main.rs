//! Command-line front end: race one query across the configured replicas and
//! print the fastest answer as a tab-separated table.

mod env;

use std::time::Duration;

use clap::Parser;
use color_eyre::Result;
use env::{build_dispatcher, parse_target};
use hedged_query::config::TargetConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hedged-query", version, about)]
struct Cli {
    /// Replica to race, as NAME=URL. Repeat for each replica.
    #[arg(short, long = "replica", value_name = "NAME=URL", value_parser = parse_target)]
    replicas: Vec<TargetConfig>,

    /// Give up after this many milliseconds; 0 waits for every replica.
    #[arg(long, env = "HEDGED_QUERY_DEADLINE_MS", default_value_t = 2000)]
    deadline_ms: u64,

    /// Print per-replica statistics to stderr after the race.
    #[arg(long)]
    stats: bool,

    /// Read query to race.
    query: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let deadline = (cli.deadline_ms > 0).then(|| Duration::from_millis(cli.deadline_ms));

    let dispatcher = build_dispatcher(cli.replicas, deadline).await?;
    let result = dispatcher.race(&cli.query).await?;

    print!("{result}");

    if cli.stats {
        let mut stats: Vec<_> = dispatcher.target_stats().into_iter().collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, s) in stats {
            eprintln!(
                "replica {:>10}: wins = {:3}, avg_latency = {:8.3} ms, errors = {:3}",
                id, s.wins, s.avg_latency_ms, s.errors
            );
        }
    }

    dispatcher.drain().await;

    Ok(())
}
