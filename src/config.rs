use std::{fmt, sync::Arc, time::Duration};

/// Unique identifier for a replica taking part in a race.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(Arc<str>);

impl TargetId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TargetId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Configuration for a single replica.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Unique identifier for this replica.
    pub id: TargetId,
    /// Connection URL, e.g. `postgres://...` or `sqlite://...`.
    pub url: String,
}

impl TargetConfig {
    /// Parses a `name=url` pair.
    ///
    /// Returns `None` if either side of the `=` is empty.
    pub fn parse_pair(pair: &str) -> Option<Self> {
        let (name, url) = pair.split_once('=')?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return None;
        }
        Some(Self {
            id: TargetId::new(name),
            url: url.to_string(),
        })
    }
}

/// Race configuration.
///
/// Every race fans out to all targets at once; the only knob is how long the
/// caller is willing to wait for the first success.
#[derive(Debug, Clone)]
pub struct RaceConfig {
    /// Maximum time to wait for any target to succeed.
    ///
    /// When it elapses the shared scope is cancelled and the race fails with
    /// every unreported target marked as having missed the deadline.
    /// `None` waits until every target has either succeeded or failed.
    pub deadline: Option<Duration>,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            deadline: Some(Duration::from_secs(2)),
        }
    }
}

impl RaceConfig {
    /// No deadline: the race ends on the first success or when every target failed.
    pub fn unbounded() -> Self {
        Self { deadline: None }
    }

    /// Tight deadline for interactive lookups (500ms).
    pub fn low_latency() -> Self {
        Self {
            deadline: Some(Duration::from_millis(500)),
        }
    }

    /// Generous deadline for reporting queries (5s).
    pub fn conservative() -> Self {
        Self {
            deadline: Some(Duration::from_secs(5)),
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}
