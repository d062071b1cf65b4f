//! Live low-stock stream and audit log retrieval.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::HeaderName;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use common::SellerId;
use domain::EventType;
use futures_util::stream::{self, Stream, StreamExt};
use notifications::{AuditEntry, AuditQuery, Subscription};
use serde::Deserialize;

use crate::error::ApiError;
use crate::seller::SellerContext;
use crate::{ApiResponse, AppState};

/// Entries returned by the audit log endpoint when no limit is given.
pub const DEFAULT_LOG_LIMIT: usize = 100;
pub const MAX_LOG_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(rename = "sellerId")]
    pub seller_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

/// GET /events/stream?sellerId=: Server-Sent Events of the seller's
/// low-stock warnings.
///
/// Opens with `event: ready`, then sends one `data:` frame per warning, each
/// the event's wire JSON. The subscription lives as long as the response
/// stream, so a client disconnect unregisters it.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    params: Result<Query<StreamParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let seller_id = params
        .seller_id
        .as_deref()
        .and_then(SellerId::parse)
        .ok_or_else(|| ApiError::BadRequest("Missing sellerId".to_string()))?;

    let subscription = state.registry.open(&seller_id, state.live.queue_capacity);
    tracing::info!(%seller_id, subscription_id = %subscription.id(), "live stream opened");

    let sse = Sse::new(alert_stream(subscription)).keep_alive(
        KeepAlive::new()
            .interval(state.live.heartbeat)
            .text("hb"),
    );
    Ok((
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        sse,
    ))
}

fn alert_stream(
    subscription: Subscription,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let ready = stream::once(async {
        Ok::<_, Infallible>(Event::default().event("ready").data("\"ok\""))
    });

    let alerts = stream::unfold(subscription, |mut subscription| async move {
        let text = subscription.recv().await?;
        Some((Ok::<_, Infallible>(Event::default().data(text)), subscription))
    });

    ready.chain(alerts)
}

/// GET /events/log?type=&limit=: the seller's audit log, oldest first.
///
/// Returns the most recent `limit` entries (default 100, at most 1000),
/// optionally restricted to one event type.
#[tracing::instrument(skip_all, fields(seller_id = %seller))]
pub async fn log(
    State(state): State<Arc<AppState>>,
    SellerContext(seller): SellerContext,
    params: Result<Query<LogParams>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<AuditEntry>>>, ApiError> {
    let Query(params) = params?;
    let event_type = params
        .event_type
        .as_deref()
        .map(str::parse::<EventType>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);

    let entries = state
        .audit
        .query(
            &seller,
            AuditQuery {
                event_type,
                limit: Some(limit),
            },
        )
        .await?;
    Ok(ApiResponse::ok(entries))
}
