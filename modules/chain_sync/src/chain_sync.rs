//! Hashchain chain sync module
//! Keeps the fork tree of every known block and reconciles it with peers

pub mod configuration;
pub mod fork_tree;
pub mod reconcile;
pub mod tree_block;
pub mod tree_error;
pub mod tree_observer;

use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use hashchain_common::{Block, BlockEnvelope, BlockHash, PeerId, SyncEvent, SyncOutput};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub use configuration::SyncConfig;
pub use fork_tree::{ForkTree, HashPolicy, Insertion};
pub use reconcile::ChainDiff;
pub use tree_block::{BlockRef, TreeBlock};
pub use tree_error::ForkTreeError;
pub use tree_observer::ForkTreeObserver;

/// Events emitted by the fork tree observer, drained after each insertion.
#[derive(Debug)]
enum ObserverEvent {
    Inserted { height: u32, hash: BlockHash },
    TopExtended { height: u32, hash: BlockHash },
}

/// Shared event queue between the observer and the coordinator loop.
type EventQueue = Arc<Mutex<Vec<ObserverEvent>>>;

/// Observer that queues tree events for the coordinator to report.
struct QueueObserver {
    events: EventQueue,
}

impl QueueObserver {
    fn push(&self, event: ObserverEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ForkTreeObserver for QueueObserver {
    fn block_inserted(&self, height: u32, hash: &BlockHash) {
        self.push(ObserverEvent::Inserted {
            height,
            hash: hash.clone(),
        });
    }

    fn top_extended(&self, height: u32, hash: &BlockHash) {
        self.push(ObserverEvent::TopExtended {
            height,
            hash: hash.clone(),
        });
    }
}

/// Single writer of the fork tree.
///
/// Producers send [`SyncEvent`]s on the inbound channel; the coordinator
/// applies them one at a time and hands [`SyncOutput`]s to the network layer.
pub struct ChainSync {
    config: SyncConfig,
    tree: ForkTree,
    events: mpsc::Receiver<SyncEvent>,
    /// Our own inbound channel, for replaying backfilled blocks. Weak so
    /// that the loop still ends once every producer has gone.
    resubmit: mpsc::WeakSender<SyncEvent>,
    outputs: mpsc::Sender<SyncOutput>,
    observed: EventQueue,
}

impl ChainSync {
    /// Create a coordinator with a fresh tree.
    ///
    /// Returns the coordinator, the sender producers use to feed it, and the
    /// receiver the network layer reads outputs from.
    pub fn new(config: SyncConfig) -> (Self, mpsc::Sender<SyncEvent>, mpsc::Receiver<SyncOutput>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_size.max(1));
        let (outputs_tx, outputs_rx) = mpsc::channel(config.output_queue_size.max(1));

        let observed: EventQueue = Arc::new(Mutex::new(Vec::new()));
        let observer = Box::new(QueueObserver {
            events: observed.clone(),
        });
        let tree = ForkTree::new(config.hash_policy, observer);

        let sync = Self {
            config,
            tree,
            events: events_rx,
            resubmit: events_tx.downgrade(),
            outputs: outputs_tx,
            observed,
        };
        (sync, events_tx, outputs_rx)
    }

    pub fn tree(&self) -> &ForkTree {
        &self.tree
    }

    /// Process events until shutdown, then hand back the tree.
    pub async fn run(mut self) -> ForkTree {
        info!(
            "Chain sync running, hash policy {:?}",
            self.tree.hash_policy()
        );

        while let Some(event) = self.events.recv().await {
            if let SyncEvent::Shutdown = event {
                info!("Shutdown requested");
                break;
            }

            let span = info_span!("chain_sync", event = event_name(&event));
            if let Err(e) = self.on_sync_event(event).instrument(span).await {
                error!("Chain sync event failed: {e:#}");
            }
        }

        info!(
            "Chain sync stopped at height {} with {} blocks",
            self.tree.height(),
            self.tree.len()
        );
        self.tree
    }

    async fn on_sync_event(&mut self, event: SyncEvent) -> Result<()> {
        match event {
            SyncEvent::BlockReceived(envelope) => self.handle_block(envelope).await,
            SyncEvent::ChainRequested { peer, tip } => self.handle_chain_request(peer, tip).await,
            SyncEvent::ChainReceived { peer, tip, chain } => {
                self.handle_chain_received(peer, tip, chain);
                Ok(())
            }
            SyncEvent::Shutdown => Ok(()),
        }
    }

    async fn handle_block(&mut self, envelope: BlockEnvelope) -> Result<()> {
        let BlockEnvelope { block, sender } = envelope;

        let result = self.tree.try_insert(&block, None);
        self.report_observed();

        match result {
            Ok(insertion) if insertion.is_new() => {
                send_output(
                    &self.outputs,
                    SyncOutput::Broadcast {
                        block,
                        except: sender,
                    },
                )
                .await?;
            }
            Ok(_) => {
                debug!("Ignoring known block {} at height {}", block.hash, block.height);
            }
            Err(e) if e.is_orphan() => match sender {
                Some(peer) if self.config.request_missing_chains => {
                    debug!("Orphan block {} from {peer}: {e}", block.hash);
                    send_output(&self.outputs, SyncOutput::RequestChain { peer, tip: block }).await?;
                }
                Some(peer) => {
                    debug!("Dropping orphan block {} from {peer}: {e}", block.hash);
                }
                None => {
                    debug!("Dropping orphan block {} with no sender: {e}", block.hash);
                }
            },
            Err(e @ ForkTreeError::HashMismatch { .. }) => {
                warn!("Rejected block at height {}: {e}", block.height);
            }
            Err(e) => {
                debug!("Rejected block {}: {e}", block.hash);
            }
        }

        Ok(())
    }

    async fn handle_chain_request(&mut self, peer: PeerId, tip: Block) -> Result<()> {
        let chain = reconcile::locate_and_trace(&self.tree, &tip);
        debug!("Sending {} blocks behind {} to {peer}", chain.len(), tip.hash);
        send_output(&self.outputs, SyncOutput::SendChain { peer, tip, chain }).await
    }

    fn handle_chain_received(&mut self, peer: PeerId, tip: Block, chain: Vec<Block>) {
        if self.tree.contains(&tip) {
            debug!("Chain from {peer} ends at known block {}", tip.hash);
            return;
        }

        let mut replay = match reconcile::diff_chain(&self.tree, &chain) {
            ChainDiff::NoCommonAncestor => {
                warn!(
                    "Chain from {peer} behind {} shares no block with ours",
                    tip.hash
                );
                return;
            }
            diff => diff.into_replay_order(),
        };
        replay.push(tip);

        let Some(sink) = self.resubmit.upgrade() else {
            debug!("Inbound channel closed, not replaying chain from {peer}");
            return;
        };

        info!("Replaying {} blocks from {peer}", replay.len());
        let span = info_span!("backfill", %peer);
        tokio::spawn(
            async move {
                if let Err(e) = reconcile::resubmit_missing(replay, &sink).await {
                    warn!("Backfill abandoned: {e:#}");
                }
            }
            .instrument(span),
        );
    }

    /// Log what the tree reported during the last operation.
    fn report_observed(&self) {
        let events = match self.observed.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => return,
        };

        for event in events {
            match event {
                ObserverEvent::Inserted { height, hash } => {
                    debug!("Stored block {hash} at height {height}");
                }
                ObserverEvent::TopExtended { height, hash } => {
                    info!("New top {hash} at height {height}");
                }
            }
        }
    }

}

async fn send_output(outputs: &mpsc::Sender<SyncOutput>, output: SyncOutput) -> Result<()> {
    outputs.send(output).await.context("network output channel closed")
}

fn event_name(event: &SyncEvent) -> &'static str {
    match event {
        SyncEvent::BlockReceived(_) => "block",
        SyncEvent::ChainRequested { .. } => "chain-request",
        SyncEvent::ChainReceived { .. } => "chain",
        SyncEvent::Shutdown => "shutdown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinHandle;

    fn child(parent: &Block, payload: &str) -> Block {
        Block::child_of(parent, payload).unwrap().with_hash()
    }

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    fn received(block: &Block, sender: Option<&str>) -> SyncEvent {
        SyncEvent::BlockReceived(BlockEnvelope::new(block.clone(), sender.map(PeerId::new)))
    }

    /// Spawn a coordinator; returns its inbound sender, output receiver and task.
    fn start(
        config: SyncConfig,
    ) -> (
        mpsc::Sender<SyncEvent>,
        mpsc::Receiver<SyncOutput>,
        JoinHandle<ForkTree>,
    ) {
        let (sync, events, outputs) = ChainSync::new(config);
        let handle = tokio::spawn(sync.run());
        (events, outputs, handle)
    }

    /// Stop the coordinator and collect whatever outputs are left.
    async fn finish(
        events: mpsc::Sender<SyncEvent>,
        mut outputs: mpsc::Receiver<SyncOutput>,
        handle: JoinHandle<ForkTree>,
    ) -> (ForkTree, Vec<SyncOutput>) {
        events.send(SyncEvent::Shutdown).await.unwrap();
        let tree = handle.await.unwrap();
        let mut rest = Vec::new();
        while let Some(output) = outputs.recv().await {
            rest.push(output);
        }
        (tree, rest)
    }

    #[test]
    fn test_new_coordinator_starts_from_genesis() {
        let config = SyncConfig {
            hash_policy: HashPolicy::Verify,
            ..SyncConfig::default()
        };
        let (sync, _events, _outputs) = ChainSync::new(config);

        assert_eq!(sync.tree().len(), 1);
        assert_eq!(sync.tree().hash_policy(), HashPolicy::Verify);
    }

    #[tokio::test]
    async fn test_valid_block_is_broadcast_except_to_sender() {
        let (events, mut outputs, handle) = start(SyncConfig::default());
        let a = child(&Block::genesis(), "A");

        events.send(received(&a, Some("alice"))).await.unwrap();

        assert_eq!(
            outputs.recv().await,
            Some(SyncOutput::Broadcast {
                block: a.clone(),
                except: Some(peer("alice")),
            })
        );

        // Second copy changes nothing and is not relayed again
        events.send(received(&a, Some("bob"))).await.unwrap();
        let (tree, rest) = finish(events, outputs, handle).await;

        assert!(rest.is_empty());
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.top(), &a);
    }

    #[tokio::test]
    async fn test_local_block_is_broadcast_to_everyone() {
        let (events, mut outputs, handle) = start(SyncConfig::default());
        let a = child(&Block::genesis(), "A");

        events.send(received(&a, None)).await.unwrap();

        assert_eq!(
            outputs.recv().await,
            Some(SyncOutput::Broadcast {
                block: a,
                except: None,
            })
        );
        finish(events, outputs, handle).await;
    }

    #[tokio::test]
    async fn test_orphan_from_peer_requests_chain() {
        let (events, mut outputs, handle) = start(SyncConfig::default());
        let a = child(&Block::genesis(), "A");
        let b = child(&a, "B");

        events.send(received(&b, Some("alice"))).await.unwrap();

        assert_eq!(
            outputs.recv().await,
            Some(SyncOutput::RequestChain {
                peer: peer("alice"),
                tip: b,
            })
        );
        let (tree, _) = finish(events, outputs, handle).await;
        assert_eq!(tree.len(), 1);
    }

    #[tokio::test]
    async fn test_orphan_without_sender_is_dropped() {
        let (events, outputs, handle) = start(SyncConfig::default());
        let a = child(&Block::genesis(), "A");
        let b = child(&a, "B");

        events.send(received(&b, None)).await.unwrap();
        let (tree, rest) = finish(events, outputs, handle).await;

        assert!(rest.is_empty());
        assert_eq!(tree.len(), 1);
    }

    #[tokio::test]
    async fn test_orphan_not_requested_when_disabled() {
        let config = SyncConfig {
            request_missing_chains: false,
            ..SyncConfig::default()
        };
        let (events, outputs, handle) = start(config);
        let a = child(&Block::genesis(), "A");
        let b = child(&a, "B");

        events.send(received(&b, Some("alice"))).await.unwrap();
        let (_, rest) = finish(events, outputs, handle).await;

        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_forged_block_rejected_under_verify() {
        let config = SyncConfig {
            hash_policy: HashPolicy::Verify,
            ..SyncConfig::default()
        };
        let (events, outputs, handle) = start(config);
        let mut forged = child(&Block::genesis(), "A");
        forged.hash = BlockHash::new(vec![3; 32]);

        events.send(received(&forged, Some("mallory"))).await.unwrap();
        let (tree, rest) = finish(events, outputs, handle).await;

        assert!(rest.is_empty());
        assert_eq!(tree.len(), 1);
    }

    #[tokio::test]
    async fn test_chain_request_is_answered_with_trace() {
        let (events, mut outputs, handle) = start(SyncConfig::default());
        let genesis = Block::genesis();
        let a = child(&genesis, "A");
        let b = child(&a, "B");

        events.send(received(&a, None)).await.unwrap();
        events.send(received(&b, None)).await.unwrap();
        outputs.recv().await.unwrap();
        outputs.recv().await.unwrap();

        events
            .send(SyncEvent::ChainRequested {
                peer: peer("carol"),
                tip: b.clone(),
            })
            .await
            .unwrap();

        assert_eq!(
            outputs.recv().await,
            Some(SyncOutput::SendChain {
                peer: peer("carol"),
                tip: b,
                chain: vec![a, genesis],
            })
        );
        finish(events, outputs, handle).await;
    }

    #[tokio::test]
    async fn test_chain_request_for_unknown_tip_is_empty() {
        let (events, mut outputs, handle) = start(SyncConfig::default());
        let stranger = Block::new(4, BlockHash::new(vec![8; 32]), "X").with_hash();

        events
            .send(SyncEvent::ChainRequested {
                peer: peer("carol"),
                tip: stranger.clone(),
            })
            .await
            .unwrap();

        assert_eq!(
            outputs.recv().await,
            Some(SyncOutput::SendChain {
                peer: peer("carol"),
                tip: stranger,
                chain: vec![],
            })
        );
        finish(events, outputs, handle).await;
    }

    #[tokio::test]
    async fn test_received_chain_backfills_orphan() {
        let (events, mut outputs, handle) = start(SyncConfig::default());
        let genesis = Block::genesis();
        let a = child(&genesis, "A");
        let b = child(&a, "B");
        let c = child(&b, "C");

        events.send(received(&c, Some("alice"))).await.unwrap();
        assert_eq!(
            outputs.recv().await,
            Some(SyncOutput::RequestChain {
                peer: peer("alice"),
                tip: c.clone(),
            })
        );

        events
            .send(SyncEvent::ChainReceived {
                peer: peer("alice"),
                tip: c.clone(),
                chain: vec![b.clone(), a.clone(), genesis.clone()],
            })
            .await
            .unwrap();

        for expected in [&a, &b, &c] {
            assert_eq!(
                outputs.recv().await,
                Some(SyncOutput::Broadcast {
                    block: expected.clone(),
                    except: None,
                })
            );
        }

        let (tree, rest) = finish(events, outputs, handle).await;
        assert!(rest.is_empty());
        assert_eq!(tree.top(), &c);
        assert_eq!(tree.height(), 3);
    }

    #[tokio::test]
    async fn test_disjoint_chain_is_not_replayed() {
        let (events, outputs, handle) = start(SyncConfig::default());
        let x = Block::new(2, BlockHash::new(vec![1; 32]), "X").with_hash();
        let y = Block::new(1, BlockHash::new(vec![2; 32]), "Y").with_hash();

        events
            .send(SyncEvent::ChainReceived {
                peer: peer("alice"),
                tip: x,
                chain: vec![y],
            })
            .await
            .unwrap();
        let (tree, rest) = finish(events, outputs, handle).await;

        assert!(rest.is_empty());
        assert_eq!(tree.len(), 1);
    }

    #[tokio::test]
    async fn test_run_ends_when_producers_drop() {
        let (events, outputs, handle) = start(SyncConfig::default());
        let a = child(&Block::genesis(), "A");
        events.send(received(&a, None)).await.unwrap();

        drop(events);
        let tree = handle.await.unwrap();

        assert!(tree.contains(&a));
        drop(outputs);
    }
}
