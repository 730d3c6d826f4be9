//! Replica list assembly from flags and environment variables.

use std::{env, time::Duration};

use color_eyre::Result;
use hedged_query::{config::TargetConfig, db, Dispatcher, RaceConfig};
use tracing::{info, warn};

/// Comma-separated `name=url` list used when no `--replica` flag is given.
pub const REPLICAS_ENV: &str = "HEDGED_QUERY_REPLICAS";

/// Parses a `name=url` command-line value.
pub fn parse_target(pair: &str) -> std::result::Result<TargetConfig, String> {
    TargetConfig::parse_pair(pair).ok_or_else(|| format!("expected NAME=URL, got {pair:?}"))
}

/// Reads replicas from `HEDGED_QUERY_REPLICAS`.
///
/// Returns an empty list if the variable is not set.
pub fn replicas_from_env() -> Vec<TargetConfig> {
    env::var(REPLICAS_ENV)
        .map(|raw| parse_replica_list(&raw))
        .unwrap_or_default()
}

/// Parses a comma-separated `name=url` list, skipping malformed entries with a warning.
fn parse_replica_list(raw: &str) -> Vec<TargetConfig> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let parsed = TargetConfig::parse_pair(pair);
            if parsed.is_none() {
                warn!("ignoring malformed {REPLICAS_ENV} entry {pair:?}");
            }
            parsed
        })
        .collect()
}

/// Flags win outright; the environment is only read when no flag was given.
fn resolve_configs(
    from_flags: Vec<TargetConfig>,
    from_env: impl FnOnce() -> Vec<TargetConfig>,
) -> Vec<TargetConfig> {
    if from_flags.is_empty() {
        from_env()
    } else {
        from_flags
    }
}

/// Connects every configured replica and builds a dispatcher over those that opened.
///
/// Flags take precedence over the environment. Returns an error if nothing is
/// configured or no replica could be opened.
pub async fn build_dispatcher(
    from_flags: Vec<TargetConfig>,
    deadline: Option<Duration>,
) -> Result<Dispatcher> {
    let configs = resolve_configs(from_flags, replicas_from_env);

    if configs.is_empty() {
        color_eyre::eyre::bail!(
            "No replicas configured.\n\
             Pass --replica NAME=URL (repeatable) or set {REPLICAS_ENV}=name=url,name=url"
        );
    }

    let mut targets = Vec::with_capacity(configs.len());
    for cfg in &configs {
        match db::connect(cfg).await {
            Ok(target) => {
                info!("connected replica {}", cfg.id);
                targets.push(target);
            }
            Err(e) => warn!("skipping replica {}: {e}", cfg.id),
        }
    }

    if targets.is_empty() {
        color_eyre::eyre::bail!(
            "none of the {} configured replicas could be opened",
            configs.len()
        );
    }

    let cfg = RaceConfig::default().with_deadline(deadline);
    Ok(Dispatcher::new(targets, cfg)?)
}
