use serde_json::json;

use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(method = %req.method, id = %req.id, "dispatch");

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::school_years::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::groups::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::payments::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::license::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::watch::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::exchange::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

/// Re-evaluates live watch subscriptions and returns one event line per
/// changed snapshot. Called by the main loop after every request; unchanged
/// result sets produce nothing, so a read-only request is a no-op here.
pub fn drain_watch_events(state: &mut AppState) -> Vec<serde_json::Value> {
    if state.subs.is_empty() {
        return Vec::new();
    }
    let Some(conn) = state.db.as_ref() else {
        return Vec::new();
    };
    match state.subs.refresh(conn) {
        Ok(changed) => changed
            .into_iter()
            .map(|(id, snapshot)| {
                json!({
                    "event": "watch.update",
                    "subscriptionId": id,
                    "snapshot": snapshot,
                })
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "watch refresh failed");
            Vec::new()
        }
    }
}
