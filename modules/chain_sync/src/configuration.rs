use anyhow::Result;
use config::Config;

use crate::fork_tree::HashPolicy;

/// Name of the table holding chain sync settings.
pub const SECTION: &str = "chain-sync";

#[derive(Debug, Clone, serde::Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SyncConfig {
    pub event_queue_size: usize,
    pub output_queue_size: usize,
    #[serde(default)]
    pub hash_policy: HashPolicy,
    pub request_missing_chains: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            event_queue_size: 1024,
            output_queue_size: 1024,
            hash_policy: HashPolicy::Trusted,
            request_missing_chains: true,
        }
    }
}

impl SyncConfig {
    /// Load settings from the `[chain-sync]` table of `config`, falling back
    /// to the embedded defaults for anything unset.
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        Ok(full_config.get(SECTION)?)
    }
}
