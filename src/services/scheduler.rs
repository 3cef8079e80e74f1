use crate::config::SchedulerConfig;
use crate::error::AppResult;
use crate::services::investment_engine::{InvestmentPositionEngine, PayoutCycleReport};
use crate::services::oracle::ReferencePriceOracle;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

/// Background task that advances the reference price hourly and runs the
/// payout cycle daily
pub struct Scheduler {
    oracle: Arc<ReferencePriceOracle>,
    engine: Arc<InvestmentPositionEngine>,
    price_interval: Duration,
    payout_interval: Duration,
}

impl Scheduler {
    /// Create a new scheduler
    ///
    /// # Arguments
    /// * `oracle` - Oracle whose series is advanced on each price tick
    /// * `engine` - Engine whose payout cycle runs on each payout tick
    /// * `config` - Tick intervals (default: 1 hour and 24 hours)
    pub fn new(
        oracle: Arc<ReferencePriceOracle>,
        engine: Arc<InvestmentPositionEngine>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            oracle,
            engine,
            price_interval: config.price_update_interval(),
            payout_interval: config.payout_interval(),
        }
    }

    /// Start the scheduler loop. Errors are logged and the loop continues.
    pub async fn start(self) {
        let mut price_tick = time::interval(self.price_interval);
        let mut payout_tick = time::interval(self.payout_interval);
        price_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        payout_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Scheduler started: price every {:?}, payouts every {:?}",
            self.price_interval, self.payout_interval
        );

        loop {
            tokio::select! {
                _ = price_tick.tick() => {
                    if let Err(e) = self.update_price().await {
                        error!("Reference price update failed: {}", e);
                    }
                }
                _ = payout_tick.tick() => {
                    match self.run_payouts().await {
                        Ok(report) if !report.failures.is_empty() => {
                            warn!("{} positions failed this payout cycle", report.failures.len());
                        }
                        Ok(_) => {}
                        Err(e) => error!("Payout cycle failed: {}", e),
                    }
                }
            }
        }
    }

    /// One price tick
    pub async fn update_price(&self) -> AppResult<()> {
        self.oracle.update().await.map(|_| ())
    }

    /// One payout tick
    pub async fn run_payouts(&self) -> AppResult<PayoutCycleReport> {
        self.engine.run_payout_cycle().await
    }

    /// Set the price tick interval
    pub fn with_price_interval(mut self, interval: Duration) -> Self {
        self.price_interval = interval;
        self
    }

    /// Set the payout tick interval
    pub fn with_payout_interval(mut self, interval: Duration) -> Self {
        self.payout_interval = interval;
        self
    }
}
