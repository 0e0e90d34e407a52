use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};
use unilink_chain::{GatewayOperations, OutboundTxBuilder};
use unilink_common::Shutdown;
use unilink_primitives::ChainRef;
use unilink_types::GasPriceVote;
use unilink_uchain::UniversalClient;

use crate::errors::ObserverError;

/// Periodically samples the destination chain's gas price and votes it to
/// the universal chain for weighted-median aggregation.
#[derive(Debug)]
pub struct GasPriceReporter<B, G, U> {
    chain: ChainRef,
    builder: Arc<B>,
    adapter: Arc<G>,
    universal: Arc<U>,
    interval: Duration,
}

impl<B, G, U> GasPriceReporter<B, G, U>
where
    B: OutboundTxBuilder,
    G: GatewayOperations,
    U: UniversalClient,
{
    pub fn new(
        chain: ChainRef,
        builder: Arc<B>,
        adapter: Arc<G>,
        universal: Arc<U>,
        interval: Duration,
    ) -> Self {
        Self {
            chain,
            builder,
            adapter,
            universal,
            interval,
        }
    }

    /// One sample-and-vote pass.
    pub async fn report_once(&self) -> Result<(), ObserverError> {
        let price = self.builder.gas_price().await?;
        let block_number = self.adapter.latest_block().await?;
        self.universal
            .vote_gas_price(GasPriceVote {
                chain: self.chain.clone(),
                price,
                block_number,
            })
            .await?;
        debug!(price, block_number, "voted gas price");
        Ok(())
    }

    /// Runs the reporter loop until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("gas price reporter stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.report_once().await {
                warn!(%err, "gas price vote failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use unilink_chain::{MockGatewayOperations, MockOutboundTxBuilder};
    use unilink_uchain::MockUniversalClient;

    use super::*;

    #[tokio::test]
    async fn votes_sampled_price_at_current_block() {
        let mut builder = MockOutboundTxBuilder::new();
        builder.expect_gas_price().returning(|| Ok(42_000_000_000));

        let mut adapter = MockGatewayOperations::new();
        adapter.expect_latest_block().returning(|| Ok(1_234));

        let mut universal = MockUniversalClient::new();
        universal
            .expect_vote_gas_price()
            .withf(|vote| {
                vote.chain.to_string() == "eip155:1"
                    && vote.price == 42_000_000_000
                    && vote.block_number == 1_234
            })
            .times(1)
            .returning(|_| Ok("0xvote".to_owned()));

        let reporter = GasPriceReporter::new(
            "eip155:1".parse().unwrap(),
            Arc::new(builder),
            Arc::new(adapter),
            Arc::new(universal),
            Duration::from_secs(60),
        );

        reporter.report_once().await.unwrap();
    }
}
