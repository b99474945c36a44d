//! Multi-node execution
//!
//! Ranks are split across nodes round-robin; each node runs its share and
//! the coordinator (node 0) gathers every node's report, merges them and
//! restores ascending rank order. Transport is abstracted behind
//! [`Communicator`]; [`LocalCluster`] provides an in-process implementation.

use crate::experiment::{CollectedFactors, RankSummary};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex};
use tracing::debug;

/// Collective operations between the nodes of a run
pub trait Communicator: Send + Sync {
    /// This node's index in `0..size`
    fn rank(&self) -> usize;

    /// Number of nodes
    fn size(&self) -> usize;

    /// Block until every node reaches the barrier
    ///
    /// # Errors
    /// Returns [`Error::Transport`] if the collective fails
    fn barrier(&self) -> Result<()>;

    /// Collect one payload from every node at `root`
    ///
    /// The root receives all payloads ordered by node rank; other nodes
    /// receive `None`.
    ///
    /// # Errors
    /// Returns [`Error::Transport`] if the collective fails
    fn gather(&self, payload: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>>;
}

impl fmt::Debug for dyn Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}

/// Round-robin partition of `ks` into `n_nodes` chunks
///
/// Chunk `i` holds the ranks at positions `i, i + n_nodes, …`; when there
/// are fewer ranks than nodes the trailing chunks are empty.
#[must_use]
pub fn chunk_ranks(ks: &[usize], n_nodes: usize) -> Vec<Vec<usize>> {
    let n_nodes = n_nodes.max(1);
    let mut chunks = vec![Vec::new(); n_nodes];
    for (position, &k) in ks.iter().enumerate() {
        chunks[position % n_nodes].push(k);
    }
    chunks
}

/// What one node sends to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Sending node
    pub node: usize,
    /// Statistics rows for the node's ranks
    pub rows: Vec<RankSummary>,
    /// Consensus factors, when collected
    pub factors: Vec<CollectedFactors>,
}

/// Merge node reports into rank-ascending rows and factors
///
/// # Errors
/// Returns [`Error::Transport`] if two nodes report the same rank
pub fn merge_reports(reports: Vec<NodeReport>) -> Result<(Vec<RankSummary>, Vec<CollectedFactors>)> {
    let mut rows: BTreeMap<usize, RankSummary> = BTreeMap::new();
    let mut factors: BTreeMap<usize, CollectedFactors> = BTreeMap::new();

    for report in reports {
        for row in report.rows {
            let k = row.k;
            if rows.insert(k, row).is_some() {
                return Err(Error::Transport(format!(
                    "rank k={k} reported twice (again by node {})",
                    report.node
                )));
            }
        }
        for entry in report.factors {
            factors.insert(entry.k, entry);
        }
    }

    Ok((rows.into_values().collect(), factors.into_values().collect()))
}

type Envelope = (usize, Vec<u8>);

/// One node of an in-process cluster
#[derive(Debug)]
pub struct LocalNode {
    rank: usize,
    size: usize,
    barrier: Arc<Barrier>,
    peers: Vec<Option<Sender<Envelope>>>,
    inbox: Mutex<Receiver<Envelope>>,
}

/// In-process cluster of nodes connected by channels
///
/// Each node is meant to run on its own thread; collectives block until
/// every node takes part.
#[derive(Debug)]
pub struct LocalCluster;

impl LocalCluster {
    /// Create `size` connected nodes, indexed by rank
    #[must_use]
    pub fn spawn(size: usize) -> Vec<LocalNode> {
        let size = size.max(1);
        let barrier = Arc::new(Barrier::new(size));
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalNode {
                rank,
                size,
                barrier: Arc::clone(&barrier),
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (peer != rank).then(|| tx.clone()))
                    .collect(),
                inbox: Mutex::new(inbox),
            })
            .collect()
    }
}

impl Communicator for LocalNode {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<()> {
        self.barrier.wait();
        Ok(())
    }

    fn gather(&self, payload: Vec<u8>, root: usize) -> Result<Option<Vec<Vec<u8>>>> {
        if root >= self.size {
            return Err(Error::Transport(format!(
                "gather root {root} outside a {}-node cluster",
                self.size
            )));
        }

        if self.rank != root {
            let Some(Some(tx)) = self.peers.get(root) else {
                return Err(Error::Transport(format!("node {} has no link to root {root}", self.rank)));
            };
            tx.send((self.rank, payload))
                .map_err(|_| Error::Transport(format!("root {root} hung up")))?;
            return Ok(None);
        }

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; self.size];
        slots[root] = Some(payload);
        let inbox = self
            .inbox
            .lock()
            .map_err(|_| Error::Transport("inbox lock poisoned".to_string()))?;
        for _ in 1..self.size {
            let (from, bytes) = inbox
                .recv()
                .map_err(|_| Error::Transport("a node left before gather completed".to_string()))?;
            debug!(from, bytes = bytes.len(), "gathered node payload");
            match slots.get_mut(from) {
                Some(slot) if slot.is_none() => *slot = Some(bytes),
                _ => return Err(Error::Transport(format!("unexpected payload from node {from}"))),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(node, slot)| slot.ok_or_else(|| Error::Transport(format!("node {node} sent nothing"))))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}
