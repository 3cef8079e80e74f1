//! Reference price oracle.
//!
//! The series advances by one step of geometric Brownian motion with a mean
//! reversion term:
//!
//! `new = latest * exp((mu - sigma^2/2)*dt + sigma*sqrt(dt)*Z + k*(mean - latest)*dt)`
//!
//! quantized to cents and never below the configured floor. Consumers hold a
//! [`PriceFeed`]; nothing reads a global price.

use crate::clock::Clock;
use crate::config::OracleConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    quantize, NewPricePoint, ReferencePricePoint, SOURCE_INITIAL_SEED, SOURCE_SIMULATION,
};
use crate::repositories::PriceStore;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Read access to the current reference price
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest point, or `PriceUnavailable` if none has been published
    async fn current(&self) -> AppResult<ReferencePricePoint>;
}

/// Source of standard normal draws
pub trait NormalSampler: Send + Sync {
    fn sample(&self) -> f64;
}

/// Draws from the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSampler;

impl NormalSampler for ThreadRngSampler {
    fn sample(&self) -> f64 {
        rand::thread_rng().sample(StandardNormal)
    }
}

/// Reproducible draws for simulations
#[derive(Debug)]
pub struct SeededSampler {
    rng: Mutex<StdRng>,
}

impl SeededSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl NormalSampler for SeededSampler {
    fn sample(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.sample(StandardNormal)
    }
}

/// Always returns the same value
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub f64);

impl NormalSampler for FixedSampler {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// One model step from `latest` with standard normal draw `z`.
///
/// A non-finite draw counts as zero and a non-finite result keeps the latest
/// price, so the output is always a positive, finite, 2 dp value.
pub fn next_price(latest: Decimal, z: f64, config: &OracleConfig) -> Decimal {
    let floor = quantize(config.floor_price).max(Decimal::new(1, 2));
    let Some(s) = latest.to_f64() else {
        return latest.max(floor);
    };
    let mean = config.long_term_mean.to_f64().unwrap_or(s);
    let z = if z.is_finite() { z } else { 0.0 };
    let dt = config.dt_years;
    let sigma = config.sigma;

    let drift = (config.mu - sigma * sigma / 2.0) * dt;
    let shock = sigma * dt.sqrt() * z;
    let reversion = config.reversion_strength * (mean - s) * dt;
    let raw = s * (drift + shock + reversion).exp();

    let next = if raw.is_finite() {
        Decimal::from_f64(raw).map(quantize).unwrap_or(latest)
    } else {
        latest
    };

    if next <= Decimal::ZERO || next < floor {
        floor
    } else {
        next
    }
}

/// Signed percentage change from `previous` to `current`, 2 dp
pub fn percent_change(previous: Decimal, current: Decimal) -> Decimal {
    if previous.is_zero() {
        return Decimal::ZERO;
    }
    quantize((current - previous) / previous * Decimal::ONE_HUNDRED)
}

/// Owns the reference price series
pub struct ReferencePriceOracle {
    prices: Arc<dyn PriceStore>,
    sampler: Arc<dyn NormalSampler>,
    clock: Arc<dyn Clock>,
    config: OracleConfig,
}

impl ReferencePriceOracle {
    pub fn new(
        prices: Arc<dyn PriceStore>,
        sampler: Arc<dyn NormalSampler>,
        clock: Arc<dyn Clock>,
        config: OracleConfig,
    ) -> Self {
        Self {
            prices,
            sampler,
            clock,
            config,
        }
    }

    /// Advance the series by one model step and append the new point
    pub async fn update(&self) -> AppResult<ReferencePricePoint> {
        let latest = self.prices.latest().await?;
        let base = latest
            .as_ref()
            .map(|p| p.price)
            .unwrap_or(self.config.long_term_mean);

        let z = self.sampler.sample();
        let price = next_price(base, z, &self.config);
        if price == self.config.floor_price && base > price {
            warn!("Reference price clamped to floor {} (from {})", price, base);
        }

        let point = NewPricePoint::new(
            price,
            self.clock.now(),
            percent_change(base, price),
            SOURCE_SIMULATION,
        )?;
        let point = self.prices.insert(point).await?;

        info!(
            "Reference price updated: {} ({}%)",
            point.price, point.change_24h
        );
        Ok(point)
    }

    /// Write the long-term mean as the first point when the series is empty
    pub async fn seed_initial(&self) -> AppResult<Option<ReferencePricePoint>> {
        if self.prices.latest().await?.is_some() {
            debug!("Reference price series already seeded");
            return Ok(None);
        }

        let point = NewPricePoint::new(
            quantize(self.config.long_term_mean),
            self.clock.now(),
            Decimal::ZERO,
            SOURCE_INITIAL_SEED,
        )?;
        let point = self.prices.insert(point).await?;
        info!("Seeded reference price at {}", point.price);
        Ok(Some(point))
    }

    /// Append a point supplied by an external feed
    pub async fn record_external(
        &self,
        price: Decimal,
        source: &str,
    ) -> AppResult<ReferencePricePoint> {
        if price <= Decimal::ZERO {
            return Err(AppError::InvalidPrice(format!(
                "external price must be positive, got {}",
                price
            )));
        }
        let price = quantize(price);
        if price.is_zero() {
            return Err(AppError::InvalidPrice(
                "external price rounds to zero".to_string(),
            ));
        }

        let change = match self.prices.latest().await? {
            Some(previous) => percent_change(previous.price, price),
            None => Decimal::ZERO,
        };
        let point = NewPricePoint::new(price, self.clock.now(), change, source)?;
        let point = self.prices.insert(point).await?;

        info!("Recorded external price {} from {}", point.price, point.source);
        Ok(point)
    }

    /// Newest-first history
    pub async fn recent(&self, limit: i64) -> AppResult<Vec<ReferencePricePoint>> {
        Ok(self.prices.recent(limit).await?)
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }
}

#[async_trait]
impl PriceFeed for ReferencePriceOracle {
    async fn current(&self) -> AppResult<ReferencePricePoint> {
        self.prices.latest().await?.ok_or(AppError::PriceUnavailable)
    }
}
