//! Hashchain block injector module
//! Reads blocks from JSON files and feeds them into chain sync

use anyhow::{Context as _, Result};
use config::{Config, ConfigError};
use glob::glob;
use hashchain_common::{Block, BlockEnvelope, PeerId, SyncEvent};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Name of the table holding block injector settings.
pub const SECTION: &str = "block-injector";

#[derive(Debug, Clone, Default, serde::Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct InjectorConfig {
    /// Glob pattern of JSON block files.
    #[serde(default)]
    pub block_files: Option<String>,
    /// Peer tag to attach to every injected block.
    #[serde(default)]
    pub sender: Option<String>,
}

impl InjectorConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        match full_config.get(SECTION) {
            Ok(cfg) => Ok(cfg),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Block injector
pub struct BlockInjector {
    config: InjectorConfig,
    sink: mpsc::Sender<SyncEvent>,
}

impl BlockInjector {
    pub fn new(config: InjectorConfig, sink: mpsc::Sender<SyncEvent>) -> Self {
        Self { config, sink }
    }

    /// Files matching `pattern`, in lexicographic order.
    pub fn block_files(pattern: &str) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = glob(pattern)
            .with_context(|| format!("Bad block-files pattern '{pattern}'"))?
            .collect::<Result<_, _>>()?;

        files.sort();
        Ok(files)
    }

    /// Read the blocks in one file.
    ///
    /// A file holds either a single block or an array of them. Blocks
    /// without a hash get one computed from their fields.
    pub fn read_blocks(path: &Path) -> Result<Vec<Block>> {
        let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let mut blocks = Block::decode_json_list(&bytes)
            .with_context(|| format!("Failed to decode blocks in {}", path.display()))?;

        for block in blocks.iter_mut().filter(|block| block.hash.is_empty()) {
            block.compute_hash();
        }
        Ok(blocks)
    }

    /// Inject every configured block, in file order then array order.
    ///
    /// Returns how many blocks were sent.
    pub async fn run(self) -> Result<usize> {
        let Some(pattern) = self.config.block_files.as_deref() else {
            info!("No block-files pattern given, nothing to inject");
            return Ok(0);
        };

        let sender = self.config.sender.as_deref().map(PeerId::new);
        let files = Self::block_files(pattern)?;
        if files.is_empty() {
            warn!("No files match '{pattern}'");
        }

        let mut injected = 0;
        for path in files {
            info!("  {}", path.display());
            for block in Self::read_blocks(&path)? {
                debug!("  -> block {} at height {}", block.hash, block.height);
                let envelope = BlockEnvelope::new(block, sender.clone());
                self.sink
                    .send(SyncEvent::BlockReceived(envelope))
                    .await
                    .context("Chain sync has shut down")?;
                injected += 1;
            }
        }

        info!("Injected {injected} blocks");
        Ok(injected)
    }
}
