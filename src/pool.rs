//! Fixed set of aggregation workers fed by bounded queues.
//!
//! A (direction, wallet) key always hashes to the same lane, so updates for
//! one key are applied in the order they were submitted. A full lane blocks
//! `submit`, and that wait propagates back to the websocket reader.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::aggregator::Aggregate;
use crate::alchemy::MinedTxEvent;
use crate::domain::Direction;

type Job = (MinedTxEvent, Direction);

pub struct AggregationPool {
    lanes: Vec<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl AggregationPool {
    pub fn new(aggregate: Arc<dyn Aggregate>, lanes: usize, depth: usize) -> Self {
        let lanes = lanes.max(1);
        let depth = depth.max(1);

        let (senders, workers): (Vec<_>, Vec<_>) = (0..lanes)
            .map(|lane| {
                let (tx, rx) = mpsc::channel(depth);
                (tx, tokio::spawn(run_lane(lane, rx, Arc::clone(&aggregate))))
            })
            .unzip();

        Self {
            lanes: senders,
            workers,
        }
    }

    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Queues a job on the key's lane, waiting while that lane is full.
    /// Returns the job back if the lane worker is gone.
    pub async fn submit(&self, event: MinedTxEvent, direction: Direction) -> Result<(), MinedTxEvent> {
        let wallet = event.transaction.wallet(direction).unwrap_or_default();
        let lane = self.lane_for(direction, &wallet);

        self.lanes[lane]
            .send((event, direction))
            .await
            .map_err(|rejected| rejected.0 .0)
    }

    fn lane_for(&self, direction: Direction, wallet: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        direction.hash(&mut hasher);
        wallet.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }

    /// Stops accepting jobs and waits up to `grace` for queued ones to finish.
    /// Returns `false` if the workers were still busy when time ran out.
    pub async fn drain(self, grace: Duration) -> bool {
        let Self { lanes, workers } = self;
        drop(lanes);

        match tokio::time::timeout(grace, join_all(workers)).await {
            Ok(_) => true,
            Err(_) => {
                warn!("Aggregation lanes still busy after {:?}", grace);
                false
            }
        }
    }
}

async fn run_lane(lane: usize, mut jobs: mpsc::Receiver<Job>, aggregate: Arc<dyn Aggregate>) {
    while let Some((event, direction)) = jobs.recv().await {
        aggregate.process(&event, direction).await;
    }
    debug!(lane, "aggregation lane drained");
}
