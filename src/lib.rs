//! Bullion Ledger Library
//!
//! Custodial ledger for a gold-pegged investment platform: two balances per
//! account, conversions at a simulated reference price, processor-settled
//! deposits and withdrawals, and fixed-term positions with daily payouts.

pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod payments;
pub mod repositories;
pub mod services;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult};

use clock::Clock;
use payments::PaymentGateway;
use repositories::*;
use services::*;
use std::sync::Arc;

/// The four stores every service is built from
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub prices: Arc<dyn PriceStore>,
    pub positions: Arc<dyn PositionStore>,
}

impl Stores {
    /// PostgreSQL repositories sharing one pool
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            accounts: Arc::new(AccountRepository::new(pool.clone())),
            transactions: Arc::new(TransactionRepository::new(pool.clone())),
            prices: Arc::new(PriceRepository::new(pool.clone())),
            positions: Arc::new(PositionRepository::new(pool)),
        }
    }

    /// One in-process store behind every trait
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            accounts: store.clone(),
            transactions: store.clone(),
            prices: store.clone(),
            positions: store,
        }
    }
}

/// Application state containing all stores and services
pub struct AppState {
    pub stores: Stores,
    pub clock: Arc<dyn Clock>,
    pub audit: Option<Arc<AuditTrail>>,
    pub oracle: Arc<ReferencePriceOracle>,
    pub ledger: Arc<Ledger>,
    pub accounts: Arc<AccountService>,
    pub engine: Arc<InvestmentPositionEngine>,
    pub portfolio: Arc<PortfolioValuation>,
    pub reconciler: Arc<SettlementReconciler>,
}

impl AppState {
    /// Wire every service over `stores`
    pub fn new(
        stores: Stores,
        clock: Arc<dyn Clock>,
        sampler: Arc<dyn NormalSampler>,
        audit: Option<Arc<AuditTrail>>,
        config: &AppConfig,
    ) -> Self {
        let oracle = Arc::new(ReferencePriceOracle::new(
            stores.prices.clone(),
            sampler,
            clock.clone(),
            config.oracle.clone(),
        ));
        let prices: Arc<dyn PriceFeed> = oracle.clone();

        let ledger = Arc::new(Ledger::new(
            stores.accounts.clone(),
            stores.transactions.clone(),
            prices.clone(),
            clock.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            stores.accounts.clone(),
            clock.clone(),
            audit.clone(),
        ));
        let engine = Arc::new(InvestmentPositionEngine::new(
            ledger.clone(),
            stores.positions.clone(),
            prices.clone(),
            clock.clone(),
            audit.clone(),
        ));
        let portfolio = Arc::new(PortfolioValuation::new(
            stores.accounts.clone(),
            stores.positions.clone(),
            prices,
            clock.clone(),
        ));
        let reconciler = Arc::new(SettlementReconciler::new(
            ledger.clone(),
            stores.transactions.clone(),
            audit.clone(),
            config.reconciler.clone(),
        ));

        Self {
            stores,
            clock,
            audit,
            oracle,
            ledger,
            accounts,
            engine,
            portfolio,
            reconciler,
        }
    }

    /// Deposit/withdrawal flows through `gateway`
    pub fn funding(&self, gateway: Arc<dyn PaymentGateway>) -> FundingService {
        FundingService::new(self.ledger.clone(), gateway, self.audit.clone())
    }

    /// Background price and payout schedule
    pub fn scheduler(&self, config: &config::SchedulerConfig) -> Scheduler {
        Scheduler::new(self.oracle.clone(), self.engine.clone(), config)
    }
}
