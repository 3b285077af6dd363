// ===============================
// src/api.rs (status HTTP surface)
// ===============================
//
// Small collaborator-facing JSON API. Reads only snapshots published over
// watch channels plus ledger aggregates — no handler ever touches pipeline
// state directly.
//
//   GET /health    liveness only
//   GET /ready     healthy | degraded (stale inputs) | unhealthy (no feed)
//   GET /decision  last strategy decision (404 before the first)
//   GET /state     per-venue snapshot + staleness flags
//   GET /status    execution engine: mode, kill switch, limits, counters
//   GET /stats     paper ledger aggregates
//
use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info};

use crate::domain::StrategyDecision;
use crate::executor::ExecStatusSnapshot;
use crate::ledger::PaperLedger;
use crate::strategy::PipelineSnapshot;

#[derive(Clone)]
pub struct ApiContext {
    pub decision_rx: watch::Receiver<Option<StrategyDecision>>,
    pub state_rx: watch::Receiver<PipelineSnapshot>,
    pub status_rx: watch::Receiver<ExecStatusSnapshot>,
    pub ledger: PaperLedger,
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn readiness(ctx: &ApiContext) -> Response<Body> {
    let state = ctx.state_rx.borrow().clone();
    if state.venues.is_empty() {
        return json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({
                "status": "unhealthy",
                "reason": "no market data received yet",
            }),
        );
    }
    let stale: Vec<_> = state
        .venues
        .iter()
        .filter(|v| v.stale)
        .map(|v| json!({ "venue": v.venue, "age_secs": v.age_secs }))
        .collect();
    if !stale.is_empty() {
        return json_response(
            StatusCode::OK,
            &json!({ "status": "degraded", "stale_inputs": stale }),
        );
    }
    json_response(StatusCode::OK, &json!({ "status": "healthy" }))
}

async fn handle(ctx: ApiContext, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let resp = match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => json_response(StatusCode::OK, &json!({ "status": "ok" })),
        (&Method::GET, "/ready") => readiness(&ctx),
        (&Method::GET, "/decision") => match ctx.decision_rx.borrow().clone() {
            Some(decision) => json_response(StatusCode::OK, &decision),
            None => json_response(
                StatusCode::NOT_FOUND,
                &json!({ "error": "no decision yet" }),
            ),
        },
        (&Method::GET, "/state") => {
            let state = ctx.state_rx.borrow().clone();
            json_response(StatusCode::OK, &state)
        }
        (&Method::GET, "/status") => {
            let status = ctx.status_rx.borrow().clone();
            json_response(StatusCode::OK, &status)
        }
        (&Method::GET, "/stats") => match ctx.ledger.stats() {
            Ok(stats) => json_response(StatusCode::OK, &stats),
            Err(e) => {
                error!(error = %e, "ledger stats query failed");
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({ "error": "ledger unavailable" }),
                )
            }
        },
        _ => json_response(StatusCode::NOT_FOUND, &json!({ "error": "not found" })),
    };
    Ok(resp)
}

pub async fn run(port: u16, ctx: ApiContext, mut shutdown_rx: watch::Receiver<bool>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(move |_conn| {
        let ctx = ctx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(ctx.clone(), req)))
        }
    });

    info!(%addr, "status api listening");
    let server = Server::bind(&addr).serve(make_svc);
    let graceful = server.with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    });
    if let Err(e) = graceful.await {
        error!(?e, "status api server error");
    }
}
