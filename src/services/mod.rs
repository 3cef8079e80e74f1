pub mod accounts;
pub mod audit;
pub mod funding;
pub mod investment_engine;
pub mod ledger;
pub mod oracle;
pub mod portfolio;
pub mod reconciler;
pub mod scheduler;

pub use accounts::AccountService;
pub use audit::AuditTrail;
pub use funding::{DepositInitiation, FundingService};
pub use investment_engine::{InvestmentPositionEngine, OpenedPosition, PayoutCycleReport};
pub use ledger::{ConversionReceipt, Ledger, Resolution};
pub use oracle::{
    FixedSampler, NormalSampler, PriceFeed, ReferencePriceOracle, SeededSampler, ThreadRngSampler,
};
pub use portfolio::{PortfolioSnapshot, PortfolioValuation, PositionSummary};
pub use reconciler::{ReconcileOutcome, SettlementReconciler};
pub use scheduler::Scheduler;
