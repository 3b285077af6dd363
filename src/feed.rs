// ===============================
// src/feed.rs
// ===============================
//
// Normalized tick producers:
// - run_mock : correlated CEX/DEX random walk for dev & paper runs
// - run_ws   : ingress for an endpoint that already emits the normalized
//              MarketTick JSON schema (reconnect with backoff + jitter)
//
// No exchange-specific parsing lives here. A frame either deserializes as a
// MarketTick or it is dropped with a logged reason — venue adapters are
// external producers.
//
use chrono::Utc;
use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use url::Url;

use crate::bus::{Bus, TOPIC_MARKET_DATA};
use crate::domain::{BusMessage, MarketTick};
use crate::metrics::FEED_FRAMES_DROPPED;

/// Correlated mock walk: one mid for the pair, a slow premium walk for the
/// DEX side so divergence actually crosses the bands now and then.
pub async fn run_mock(
    bus: Bus,
    symbol: String,
    cex_venue: String,
    dex_venue: String,
    shutdown_rx: watch::Receiver<bool>,
) {
    info!(%symbol, %cex_venue, %dex_venue, "mock feed started");
    let mut mid: f64 = 1.0;
    let mut premium: f64 = 0.0; // fractional DEX premium over the CEX mid

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        {
            // jangan simpan ThreadRng melewati .await
            let mut rng = rand::thread_rng();
            mid = (mid + rng.gen_range(-0.0005..=0.0005)).max(0.5);
            premium = (premium + rng.gen_range(-0.0002..=0.0002)).clamp(-0.03, 0.03);
        }

        let ts_ms = Utc::now().timestamp_millis();
        let half_spread = mid * 0.0002;
        let cex_tick = MarketTick {
            symbol: symbol.clone(),
            venue: cex_venue.clone(),
            ts_ms,
            bid: Some(mid - half_spread),
            ask: Some(mid + half_spread),
            last: Some(mid),
            price: None,
            source_ts_ms: Some(ts_ms),
        };
        let dex_tick = MarketTick {
            symbol: symbol.clone(),
            venue: dex_venue.clone(),
            ts_ms,
            bid: None,
            ask: None,
            last: None,
            price: Some(mid * (1.0 + premium)),
            source_ts_ms: Some(ts_ms),
        };

        bus.publish(TOPIC_MARKET_DATA, BusMessage::Tick(cex_tick));
        bus.publish(TOPIC_MARKET_DATA, BusMessage::Tick(dex_tick));

        sleep(Duration::from_millis(250)).await;
    }
    info!("mock feed stopped");
}

/// WS ingress for pre-normalized ticks. The producer owns venue parsing;
/// this loop only deserializes, stamps arrival when the producer didn't,
/// and publishes.
pub async fn run_ws(bus: Bus, ws_url: String, shutdown_rx: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        if let Err(e) = Url::parse(&ws_url) {
            error!(?e, %ws_url, "bad tick ws url");
            return;
        }

        info!(%ws_url, "connecting normalized tick stream");
        match tokio_tungstenite::connect_async(ws_url.as_str()).await {
            Ok((mut ws, _resp)) => {
                info!("tick stream connected");
                attempt = 0; // reset backoff

                while let Some(frame) = ws.next().await {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    match frame {
                        Ok(m) if m.is_text() => {
                            let txt = match m.into_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    warn!(?e, "failed to read text frame");
                                    continue;
                                }
                            };
                            match serde_json::from_str::<MarketTick>(&txt) {
                                Ok(mut tick) => {
                                    if tick.ts_ms == 0 {
                                        tick.ts_ms = Utc::now().timestamp_millis();
                                    }
                                    bus.publish(TOPIC_MARKET_DATA, BusMessage::Tick(tick));
                                }
                                Err(e) => {
                                    FEED_FRAMES_DROPPED.inc();
                                    warn!(error = %e, "frame is not a normalized tick, dropped");
                                }
                            }
                        }
                        Ok(_) => {
                            // ignore non-text frames
                        }
                        Err(e) => {
                            error!(?e, "tick ws read error");
                            break;
                        }
                    }
                }
                info!("tick stream disconnected, will reconnect…");
            }
            Err(e) => {
                error!(?e, "tick ws connect failed");
            }
        }

        // Exponential backoff + jitter
        attempt = attempt.saturating_add(1);
        let shift = attempt.min(6);
        let factor = 1u64 << shift; // 2,4,...,64
        let base_ms = 250u64.saturating_mul(factor); // 0.5s..16s
        let jitter = rand::thread_rng().gen_range(0..=250);
        sleep(Duration::from_millis(base_ms + jitter)).await;
    }
    info!("tick ws ingress stopped");
}
