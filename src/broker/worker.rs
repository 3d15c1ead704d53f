//! Worker pool with per-connection lane affinity.
//!
//! A fixed array of single-consumer FIFO queues, one thread per lane. Each
//! connection is pinned to one lane by `id % lanes` for its whole lifetime,
//! so all decode/protocol work for that connection runs strictly in
//! submission order while different connections proceed concurrently on
//! other lanes. There is no shared unordered queue and no lock per
//! connection.

use crate::protocol::ConnectionId;
use crate::Result;
use crossbeam_channel::{unbounded, Sender};
use std::thread::JoinHandle;
use tracing::debug;

type Task = Box<dyn FnOnce() + Send>;

pub struct WorkerPool {
    lanes: Vec<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `num_lanes` lane threads. `num_lanes` must be at least 1,
    /// which [`crate::config::BrokerConfig::validate`] guarantees.
    pub fn new(num_lanes: usize) -> Result<Self> {
        let mut lanes = Vec::with_capacity(num_lanes);
        let mut handles = Vec::with_capacity(num_lanes);
        for lane in 0..num_lanes {
            let (tx, rx) = unbounded::<Task>();
            let handle = std::thread::Builder::new()
                .name(format!("lane-{}", lane))
                .spawn(move || {
                    // Runs until the reactor drops the sender on shutdown.
                    for task in rx {
                        task();
                    }
                    debug!("lane {} drained and stopped", lane);
                })?;
            lanes.push(tx);
            handles.push(handle);
        }
        Ok(Self { lanes, handles })
    }

    /// Queue a task on the lane owning `connection_id`. Tasks submitted for
    /// one connection execute in submission order.
    pub fn submit(&self, connection_id: ConnectionId, task: Task) {
        let lane = (connection_id as usize) % self.lanes.len();
        // A send error means the lane stopped, which only happens during
        // shutdown; the task is dropped with it.
        let _ = self.lanes[lane].send(task);
    }

    /// Stop accepting work and wait for every lane to drain.
    pub fn shutdown(self) {
        drop(self.lanes);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}
