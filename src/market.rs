//! Cached upstream market data (spot gold + currency rates).
//!
//! The projection engine has no dependency on these feeds; they only feed
//! the dashboard ticker. Upstream failures therefore degrade — first to
//! the last cached snapshot, then to hard-coded defaults — and never
//! surface to callers.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_MARKET_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRates {
    #[serde(rename = "AED")]
    pub aed: f64,
    #[serde(rename = "RUB")]
    pub rub: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub gold_price: f64,
    pub yearly_growth: f64,
    pub currency_rates: CurrencyRates,
    pub timestamp: DateTime<Utc>,
}

impl MarketData {
    /// Last-resort defaults when the upstream feed has never answered.
    pub fn fallback() -> Self {
        Self {
            gold_price: 2050.5,
            yearly_growth: 8.4,
            currency_rates: CurrencyRates {
                aed: 3.67,
                rub: 98.5,
            },
            timestamp: Utc::now(),
        }
    }
}

/// A fetched value with an explicit freshness policy, so cache behavior is
/// testable without any storage behind it.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl<T> Cached<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.duration_since(self.fetched_at) < self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }
}

pub struct MarketDataCache {
    ttl: Duration,
    slot: RwLock<Option<Cached<MarketData>>>,
}

impl MarketDataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Serve the cached snapshot while fresh; refetch on expiry; keep
    /// serving the stale snapshot when the upstream fails, and hard-coded
    /// defaults when it has never succeeded.
    pub async fn get_or_fetch(&self, client: &reqwest::Client) -> MarketData {
        if let Some(cached) = self.slot.read().as_ref() {
            if cached.is_fresh() {
                return cached.value.clone();
            }
        }

        match fetch_gold_data(client).await {
            Ok(data) => {
                *self.slot.write() = Some(Cached::new(data.clone(), self.ttl));
                data
            }
            Err(err) => {
                warn!(error = %err, "market data fetch failed, serving degraded snapshot");
                if let Some(cached) = self.slot.read().as_ref() {
                    return cached.value.clone();
                }
                MarketData::fallback()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetalPriceResponse {
    success: bool,
    #[serde(default)]
    rates: Option<MetalPriceRates>,
}

#[derive(Debug, Deserialize)]
struct MetalPriceRates {
    #[serde(rename = "XAU")]
    xau: Option<f64>,
    #[serde(rename = "AED")]
    aed: Option<f64>,
    #[serde(rename = "RUB")]
    rub: Option<f64>,
}

async fn fetch_gold_data(client: &reqwest::Client) -> anyhow::Result<MarketData> {
    let api_key =
        std::env::var("METAL_PRICE_API_KEY").context("METAL_PRICE_API_KEY is not set")?;
    let url = format!(
        "https://api.metalpriceapi.com/v1/latest?api_key={api_key}&base=USD&currencies=XAU,AED,RUB"
    );

    let response: MetalPriceResponse = client.get(&url).send().await?.json().await?;
    let rates = response
        .rates
        .filter(|_| response.success)
        .ok_or_else(|| anyhow!("invalid metalprice response"))?;

    let xau = rates
        .xau
        .filter(|v| *v > 0.0)
        .ok_or_else(|| anyhow!("missing XAU rate"))?;

    Ok(MarketData {
        gold_price: round2(1.0 / xau),
        yearly_growth: 8.4,
        currency_rates: CurrencyRates {
            aed: rates.aed.map(round2).unwrap_or(3.67),
            rub: rates.rub.map(round2).unwrap_or(98.5),
        },
        timestamp: Utc::now(),
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
