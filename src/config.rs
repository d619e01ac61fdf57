//! Serializable knobs for the rebuild and sync protocols.

use serde::{Deserialize, Serialize};

use crate::algs::communicator::CommTag;

/// Tag of the full-rebuild exchange.
pub const REBUILD_TAG: CommTag = CommTag::new(333);
/// Tag of the incremental sync exchange.
pub const SYNC_TAG: CommTag = CommTag::new(345);

/// How a rebuild discovers which processes share indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStrategy {
    /// Neighbours if a neighbour set is known, otherwise the ring.
    #[default]
    Auto,
    /// Pass every published index set around a ring of all processes.
    Ring,
    /// Exchange directly with the declared neighbours only.
    Neighbours,
}

/// Configuration of a [`RemoteIndexTable`](crate::remote::RemoteIndexTable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteIndexConfig {
    pub strategy: ExchangeStrategy,
    /// Create loop-back entries when source and destination are the same set.
    pub include_self: bool,
    pub rebuild_tag: CommTag,
    /// Allow `Auto` to fall back to the ring when no neighbours are known.
    pub allow_ring: bool,
    /// Warn when the ring runs on more processes than this.
    pub ring_warn_threshold: usize,
}

impl Default for RemoteIndexConfig {
    fn default() -> Self {
        Self {
            strategy: ExchangeStrategy::Auto,
            include_self: false,
            rebuild_tag: REBUILD_TAG,
            allow_ring: true,
            ring_warn_threshold: 64,
        }
    }
}

/// Configuration of an [`IndicesSyncer`](crate::sync::IndicesSyncer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub tag: CommTag,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { tag: SYNC_TAG }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_and_partial_input() {
        let cfg = RemoteIndexConfig {
            strategy: ExchangeStrategy::Neighbours,
            include_self: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"neighbours\""));
        let back: RemoteIndexConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);

        let partial: RemoteIndexConfig = serde_json::from_str(r#"{"allow_ring": false}"#).unwrap();
        assert!(!partial.allow_ring);
        assert_eq!(partial.rebuild_tag, REBUILD_TAG);

        let sync: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(sync.tag.as_u16(), 345);
    }
}
