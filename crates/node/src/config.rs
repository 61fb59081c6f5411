//! Node configuration.

use crate::NodeError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Configuration for a Meridian node.
///
/// Loadable from a JSON file; unspecified fields fall back to defaults.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Base-2 logarithm of the lane count.
    pub log2_num_lanes: u8,
    /// Number of slices every block carries.
    pub num_slices: usize,
    /// Size of the executor worker pool.
    pub num_executors: usize,
    /// Proof-of-work difficulty for mined blocks (leading zero bits).
    pub block_difficulty: u64,
    /// Minimum interval between mined blocks, in milliseconds.
    pub block_period_ms: u64,
    /// Whether this node mines.
    pub mining: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log2_num_lanes: 3,
            num_slices: 4,
            num_executors: 4,
            block_difficulty: 8,
            block_period_ms: 1_000,
            mining: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Number of execution lanes.
    pub fn num_lanes(&self) -> u32 {
        1u32 << self.log2_num_lanes
    }

    /// The block period as a duration.
    pub fn block_period(&self) -> Duration {
        Duration::from_millis(self.block_period_ms)
    }

    /// Check the configuration for nonsensical values.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.log2_num_lanes > 16 {
            return Err(NodeError::InvalidConfig(format!(
                "log2_num_lanes must be at most 16, got {}",
                self.log2_num_lanes
            )));
        }
        if self.num_slices == 0 {
            return Err(NodeError::InvalidConfig(
                "num_slices must be at least 1".into(),
            ));
        }
        if self.num_executors == 0 {
            return Err(NodeError::InvalidConfig(
                "num_executors must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        NodeConfig::default().validate().unwrap();
        assert_eq!(NodeConfig::default().num_lanes(), 8);
    }

    #[test]
    fn test_rejects_zero_slices() {
        let config = NodeConfig {
            num_slices: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(NodeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_parses_partial_json() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"mining": true, "block_difficulty": 4}"#).unwrap();
        assert!(config.mining);
        assert_eq!(config.block_difficulty, 4);
        assert_eq!(config.num_slices, NodeConfig::default().num_slices);
    }
}
