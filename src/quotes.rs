// ===============================
// src/quotes.rs (quote-source adapters)
// ===============================
//
// All DEX-side price sources sit behind one capability interface so the
// decision pipeline never cares which adapter is live. Each adapter carries
// a confidence tag; scraped sources are tagged distinctly and must never be
// mixed in as equivalent to on-chain-verified ones.
//
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trust level of a quote source. Ordering matters: consumers may discount
/// or refuse `Scraped` quotes where a verified source is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteConfidence {
    OnChain,
    Aggregator,
    Scraped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteResult {
    pub price: f64,
    pub confidence: QuoteConfidence,
    pub source: String,
}

/// One sampled point of the execution-price curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LadderPoint {
    pub size_usdt: f64,
    pub exec_price: f64,
}

/// Discrete (size, execution price) samples from a quoting source, plus the
/// live venue costs it reported, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteLadder {
    pub points: Vec<LadderPoint>,
    #[serde(default)]
    pub lp_fee_bps: Option<f64>,
    #[serde(default)]
    pub gas_cost_usdt: Option<f64>,
    pub ts_ms: i64,
    pub source: String,
    pub confidence: QuoteConfidence,
}

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("quote fetch failed: {0}")]
    Fetch(String),
    #[error("quote payload malformed: {0}")]
    Malformed(String),
    #[error("quote source returned empty ladder")]
    Empty,
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn confidence(&self) -> QuoteConfidence;

    /// Expected execution price for a clip of `size_usdt`.
    async fn quote(&self, size_usdt: f64) -> Result<QuoteResult, QuoteError>;

    /// Full sampled ladder, used for target-price inversion.
    async fn ladder(&self) -> Result<QuoteLadder, QuoteError>;
}

// -----------------------------------------------------------------------------
// Mock adapter: synthesized ladder around a configured mid. Used in mock feed
// mode and in tests; price impact grows linearly with clip size.
// -----------------------------------------------------------------------------
pub struct MockQuoteSource {
    pub mid_price: f64,
    pub lp_fee_bps: f64,
    /// Price impact in bps per 1000 USDT of size.
    pub impact_bps_per_1k: f64,
}

impl MockQuoteSource {
    pub fn new(mid_price: f64, lp_fee_bps: f64) -> Self {
        Self {
            mid_price,
            lp_fee_bps,
            impact_bps_per_1k: 8.0,
        }
    }

    fn synth_ladder(&self, now_ms: i64) -> QuoteLadder {
        let sizes = [100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0];
        let points = sizes
            .iter()
            .map(|&size_usdt| {
                let impact = size_usdt / 1_000.0 * self.impact_bps_per_1k / 10_000.0;
                LadderPoint {
                    size_usdt,
                    exec_price: self.mid_price * (1.0 + impact),
                }
            })
            .collect();
        QuoteLadder {
            points,
            lp_fee_bps: Some(self.lp_fee_bps),
            gas_cost_usdt: Some(0.5),
            ts_ms: now_ms,
            source: "mock".to_string(),
            confidence: QuoteConfidence::Aggregator,
        }
    }
}

#[async_trait]
impl QuoteSource for MockQuoteSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn confidence(&self) -> QuoteConfidence {
        QuoteConfidence::Aggregator
    }

    async fn quote(&self, size_usdt: f64) -> Result<QuoteResult, QuoteError> {
        let impact = size_usdt / 1_000.0 * self.impact_bps_per_1k / 10_000.0;
        Ok(QuoteResult {
            price: self.mid_price * (1.0 + impact),
            confidence: self.confidence(),
            source: self.name().to_string(),
        })
    }

    async fn ladder(&self) -> Result<QuoteLadder, QuoteError> {
        Ok(self.synth_ladder(chrono::Utc::now().timestamp_millis()))
    }
}

// -----------------------------------------------------------------------------
// HTTP adapter: fetches an already-normalized ladder from a configured URL.
// Expected payload:
//   {"points":[{"size_usdt":100.0,"exec_price":1.001}, ...],
//    "lp_fee_bps":25.0, "gas_cost_usdt":0.42}
// No AMM math, no pool lookups — that happens upstream of this endpoint.
// -----------------------------------------------------------------------------
pub struct HttpQuoteSource {
    client: reqwest::Client,
    url: String,
    confidence: QuoteConfidence,
}

#[derive(Debug, Deserialize)]
struct LadderPayload {
    points: Vec<LadderPoint>,
    #[serde(default)]
    lp_fee_bps: Option<f64>,
    #[serde(default)]
    gas_cost_usdt: Option<f64>,
}

impl HttpQuoteSource {
    pub fn new(url: String, confidence: QuoteConfidence) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            confidence,
        }
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    fn name(&self) -> &'static str {
        "http"
    }

    fn confidence(&self) -> QuoteConfidence {
        self.confidence
    }

    async fn quote(&self, size_usdt: f64) -> Result<QuoteResult, QuoteError> {
        let ladder = self.ladder().await?;
        // Nearest sampled size; the solver interpolates when it needs better.
        let point = ladder
            .points
            .iter()
            .min_by(|a, b| {
                (a.size_usdt - size_usdt)
                    .abs()
                    .total_cmp(&(b.size_usdt - size_usdt).abs())
            })
            .ok_or(QuoteError::Empty)?;
        Ok(QuoteResult {
            price: point.exec_price,
            confidence: self.confidence,
            source: self.name().to_string(),
        })
    }

    async fn ladder(&self) -> Result<QuoteLadder, QuoteError> {
        let rsp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| QuoteError::Fetch(e.to_string()))?;
        if !rsp.status().is_success() {
            return Err(QuoteError::Fetch(format!("status {}", rsp.status())));
        }
        let payload: LadderPayload = rsp
            .json()
            .await
            .map_err(|e| QuoteError::Malformed(e.to_string()))?;
        if payload.points.is_empty() {
            return Err(QuoteError::Empty);
        }
        Ok(QuoteLadder {
            points: payload.points,
            lp_fee_bps: payload.lp_fee_bps,
            gas_cost_usdt: payload.gas_cost_usdt,
            ts_ms: chrono::Utc::now().timestamp_millis(),
            source: self.name().to_string(),
            confidence: self.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_ladder_prices_rise_with_size() {
        let src = MockQuoteSource::new(1.0, 30.0);
        let ladder = src.ladder().await.unwrap();
        assert!(!ladder.points.is_empty());
        for pair in ladder.points.windows(2) {
            assert!(pair[0].size_usdt < pair[1].size_usdt);
            assert!(pair[0].exec_price <= pair[1].exec_price);
        }
        assert_eq!(ladder.lp_fee_bps, Some(30.0));
    }

    #[tokio::test]
    async fn mock_quote_includes_impact() {
        let src = MockQuoteSource::new(2.0, 30.0);
        let q = src.quote(10_000.0).await.unwrap();
        assert!(q.price > 2.0);
        assert_eq!(q.confidence, QuoteConfidence::Aggregator);
    }
}
