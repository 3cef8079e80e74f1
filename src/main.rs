//! Bullion Ledger Service
//!
//! Main entry point for the custodial ledger. This service runs:
//! - the hourly reference price update
//! - the daily investment payout cycle
//!
//! Deposits, withdrawals and webhook settlement are driven by the outer API
//! layer through the library.

use bullion_ledger::clock::SystemClock;
use bullion_ledger::config::{AppConfig, StorageBackend};
use bullion_ledger::database::{create_pool, run_migrations};
use bullion_ledger::services::{AuditTrail, ThreadRngSampler};
use bullion_ledger::{AppError, AppResult, AppState, Stores};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load environment variables first
    dotenv::dotenv().ok();

    // Load configuration
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    // Initialize tracing/logging with config
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("bullion_ledger={},sqlx=warn", config.log_level).into()
            }),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Bullion Ledger Service Starting                ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);
    info!("Storage backend: {:?}", config.storage);

    // =========================================================================
    // STORAGE SETUP
    // =========================================================================
    let stores = match config.storage {
        StorageBackend::Postgres => {
            info!("Connecting to database...");
            let pool = create_pool(&config.database).await.map_err(|e| {
                error!("Failed to create database pool: {}", e);
                AppError::Database(e)
            })?;
            info!("Database connection pool created successfully");
            info!("Max connections: {}", config.database.max_connections);

            info!("Running database migrations...");
            run_migrations(&pool, None).await.map_err(|e| {
                error!("Database migration failed: {}", e);
                AppError::Database(e)
            })?;
            info!("Database migrations completed successfully");

            Stores::postgres(pool)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; state is lost on shutdown");
            Stores::in_memory()
        }
    };

    // =========================================================================
    // CORE SERVICES INITIALIZATION
    // =========================================================================
    info!("Initializing core services...");

    let audit = Arc::new(AuditTrail::new(config.audit_log_dir.as_str()).map_err(|e| {
        error!("Failed to initialize audit trail: {}", e);
        AppError::Message(format!("Audit trail initialization failed: {}", e))
    })?);
    info!("✓ Audit trail initialized in {}", audit.log_directory().display());

    let app_state = AppState::new(
        stores,
        Arc::new(SystemClock),
        Arc::new(ThreadRngSampler),
        Some(audit),
        &config,
    );
    info!("✓ Application state initialized");

    if let Some(point) = app_state.oracle.seed_initial().await? {
        info!("✓ Reference price seeded at {}", point.price);
    }
    let tiers = app_state.engine.seed_default_tiers().await?;
    info!("✓ {} investment tiers available", tiers.len());

    if config.webhook.secret.is_empty() {
        warn!("WEBHOOK_SECRET not configured - webhook events will be rejected");
    }

    // =========================================================================
    // BACKGROUND TASKS
    // =========================================================================
    let scheduler = app_state.scheduler(&config.scheduler);
    let scheduler_handle = tokio::spawn(async move {
        scheduler.start().await;
    });
    info!(
        "✓ Scheduler started (price every {}s, payouts every {}s)",
        config.scheduler.price_update_interval_secs, config.scheduler.payout_interval_secs
    );

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Bullion Ledger Service Ready!                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Press Ctrl+C to shutdown gracefully");

    // =========================================================================
    // SHUTDOWN HANDLING
    // =========================================================================
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down gracefully...");
        }
        _ = scheduler_handle => {
            error!("Scheduler task exited unexpectedly");
        }
    }

    info!("Bullion ledger service shutdown complete");
    Ok(())
}
