//! `/logs` (list) and `/logs/stream` (SSE tail). Both top-level, private
//! routes gated by `RequireAuth`.

use std::collections::HashMap;
use std::time::Duration;

use actix_web::{web, HttpResponse};
use obs_common::{ApiEnvelope, Metadata};
use obs_db::models::Log;
use obs_db::{ListParams, Order};
use futures::stream;

use obs_web::{ApiError, ApiErrorKind};

use crate::server::ServerState;

const SHORTCUTS: &[(&str, &str)] = &[
    ("level", "level__eq"),
    ("source", "source__eq"),
    ("startDate", "created_at__gte"),
    ("endDate", "created_at__lte"),
];

pub async fn list(
    state: web::Data<ServerState>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let params = super::list_params(&query, SHORTCUTS);
    let limit = params.limit;
    let offset = params.offset;
    let (rows, total) = state.logs.list::<Log>(params).await?;
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok_paginated(
        rows,
        Metadata { limit, offset, total },
    )))
}

/// The stream's first event is the last 50 rows newest-first (a client
/// reconnecting gets recent history instead of an empty screen); every
/// event after that is a poll for rows newer than the last one seen.
enum StreamState {
    Initial,
    Polling(i64),
}

fn render(rows: &[Log]) -> String {
    let mut text = String::new();
    for row in rows {
        if let Ok(json) = serde_json::to_string(row) {
            text.push_str("data: ");
            text.push_str(&json);
            text.push_str("\n\n");
        }
    }
    text
}

/// Polls for new rows every two seconds and pushes them as SSE `data:`
/// frames, rather than a push-based subscription — there's no broker
/// between the capture middleware and the database to subscribe to.
pub async fn stream(state: web::Data<ServerState>) -> HttpResponse {
    let logs = state.logs.clone();

    let body = stream::unfold((logs, StreamState::Initial), |(logs, state)| async move {
        match state {
            StreamState::Initial => {
                let params = ListParams {
                    limit: 50,
                    order_by: "id".to_owned(),
                    order: Order::Desc,
                    ..Default::default()
                };
                let (rows, last_id) = match logs.list::<Log>(params).await {
                    Ok((rows, _)) => {
                        let last_id = rows.iter().map(|r| r.base.id).max().unwrap_or(0);
                        (rows, last_id)
                    }
                    Err(e) => {
                        warn!("log stream initial fetch failed: {:?}", e);
                        (Vec::new(), 0)
                    }
                };
                let text = render(&rows);
                Some((
                    Ok::<_, actix_web::Error>(web::Bytes::from(text)),
                    (logs, StreamState::Polling(last_id)),
                ))
            }
            StreamState::Polling(last_id) => {
                tokio::time::delay_for(Duration::from_secs(2)).await;

                let mut filters = HashMap::new();
                filters.insert("id__gt".to_owned(), serde_json::json!(last_id));
                let params = ListParams {
                    limit: 100,
                    order_by: "id".to_owned(),
                    order: Order::Asc,
                    filters,
                    ..Default::default()
                };

                let (text, next_id) = match logs.list::<Log>(params).await {
                    Ok((rows, _)) => {
                        let next_id = rows.last().map(|r| r.base.id).unwrap_or(last_id);
                        (render(&rows), next_id)
                    }
                    Err(e) => {
                        warn!("log stream poll failed: {:?}", e);
                        (String::new(), last_id)
                    }
                };

                Some((
                    Ok::<_, actix_web::Error>(web::Bytes::from(text)),
                    (logs, StreamState::Polling(next_id)),
                ))
            }
        }
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .header("Cache-Control", "no-cache")
        .streaming(body)
}
