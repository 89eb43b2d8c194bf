use serde::{Deserialize, Deserializer, Serialize};

/// What happens when a store is mutated while its own watchers are running
///
/// Depth is counted per thread: only a mutation made from inside one of the
/// store's own watchers is nested. Another thread writing the same store is
/// never re-entrant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reentrancy {
    /// Reject the nested mutation with `StoreError::Reentrant`
    #[default]
    Forbid,
    /// Allow nesting until `max_depth` dispatches of the same store are active
    ///
    /// `max_depth` must be at least 1; a zero depth is rejected when a
    /// config is read, and behaves as 1 when built in code.
    Limit {
        #[serde(deserialize_with = "positive_depth")]
        max_depth: usize,
    },
}

fn positive_depth<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let depth = usize::deserialize(deserializer)?;
    if depth == 0 {
        return Err(serde::de::Error::custom("max_depth must be at least 1"));
    }
    Ok(depth)
}

impl Reentrancy {
    /// Returns true if one more dispatch may start at the given active depth
    pub(crate) fn permits(self, active: usize) -> bool {
        match self {
            Reentrancy::Forbid => active == 0,
            Reentrancy::Limit { max_depth } => active < max_depth.max(1),
        }
    }
}

/// Manager settings
///
/// ```
/// use sovran_store::{Reentrancy, StoreConfig};
///
/// let config = StoreConfig::from_json(r#"{"reentrancy":{"limit":{"max_depth":4}}}"#).unwrap();
/// assert_eq!(config.reentrancy, Reentrancy::Limit { max_depth: 4 });
/// assert!(config.log_watcher_failures);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub reentrancy: Reentrancy,
    /// Emit an `error!` event for every failed watcher
    pub log_watcher_failures: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reentrancy: Reentrancy::Forbid,
            log_watcher_failures: true,
        }
    }
}

impl StoreConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
