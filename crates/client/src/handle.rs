use tokio::task::JoinHandle;
use tracing::{error, info};
use unilink_primitives::ChainRef;

/// Handle over one chain's spawned worker tasks.
#[derive(Debug)]
pub struct ChainClientHandle {
    chain: ChainRef,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ChainClientHandle {
    pub(crate) fn new(chain: ChainRef) -> Self {
        Self {
            chain,
            tasks: Vec::new(),
        }
    }

    pub fn chain(&self) -> &ChainRef {
        &self.chain
    }

    pub(crate) fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    /// Waits for every worker to wind down (after shutdown was triggered).
    pub async fn join(self) {
        for (name, handle) in self.tasks {
            if let Err(err) = handle.await {
                error!(chain = %self.chain, worker = name, %err, "worker task panicked");
            }
        }
        info!(chain = %self.chain, "chain client stopped");
    }
}
