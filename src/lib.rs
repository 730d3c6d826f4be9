//! Race a read query across equivalent database replicas and keep the fastest answer.
//!
//! The same query is sent to every replica at once. The first replica to
//! return its full result set wins; every other attempt is told to stop
//! through a cancellation scope shared by that race, and its cursor is
//! released as it unwinds.
//!
//! # Quick Start
//!
//! ```no_run
//! use hedged_query::{db, Dispatcher, RaceConfig, TargetConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let configs = [
//!     TargetConfig::parse_pair("primary=postgres://app@db-1/app").unwrap(),
//!     TargetConfig::parse_pair("replica=postgres://app@db-2/app").unwrap(),
//! ];
//!
//! let mut targets = Vec::new();
//! for cfg in &configs {
//!     targets.push(db::connect(cfg).await?);
//! }
//!
//! let dispatcher = Dispatcher::new(targets, RaceConfig::low_latency())?;
//! let result = dispatcher.race("SELECT id, name FROM users LIMIT 10").await?;
//! println!("{} answered with {} rows", result.source(), result.row_count());
//! # Ok(())
//! # }
//! ```
//!
//! # Outcomes
//!
//! - The first success wins. When several replicas finish together the
//!   winner is whichever reports first; no other tie-break is applied.
//! - A failing replica never aborts the race. Only when every replica has
//!   failed, or the deadline elapsed first, does the race return
//!   [`RaceError::AllFailed`] with one entry per replica.
//! - Cancellation is cooperative: `race` returns as soon as it has a winner
//!   and does not wait for losers to unwind. Use [`Dispatcher::drain`] when
//!   that matters.
//! - Cells are text; SQL NULL becomes the empty string.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod errors;
pub mod executor;
pub mod replica;
pub mod result;
pub mod scope;

pub use config::{RaceConfig, TargetConfig, TargetId};
pub use dispatcher::{race, Dispatcher, TargetStatsSnapshot};
pub use errors::{ExecutionError, QueryError, RaceError};
pub use replica::{Replica, RowCursor, Target};
pub use result::{QueryResult, RawRow};
pub use scope::CancellationScope;
