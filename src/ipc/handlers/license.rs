use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::license::{self, ClaimRequest, LicenseError};
use serde_json::json;

fn license_err(id: &str, e: &LicenseError) -> serde_json::Value {
    err(
        id,
        e.wire_code(),
        e.to_string(),
        Some(json!({ "retryable": e.is_retryable() })),
    )
}

/// Device identity defaults to the one minted at workspace open; an explicit
/// `device` param (another install's id, for status checks) overrides it.
fn resolve_device(
    conn: &rusqlite::Connection,
    params: &serde_json::Value,
) -> anyhow::Result<Option<String>> {
    if let Some(device) = params.get("device").and_then(|v| v.as_str()) {
        return Ok(Some(device.to_string()));
    }
    Ok(db::settings_get_json(conn, "device")?
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(|s| s.to_string())))
}

fn handle_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(key) = req.params.get("key").and_then(|v| v.as_str()) else {
        return err(&req.id, "invalid-argument", "missing key", None);
    };
    match license::add_key(conn, key) {
        Ok(()) => ok(&req.id, json!({ "key": key })),
        Err(e) => license_err(&req.id, &e),
    }
}

fn handle_claim(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let params = req.params.clone();
    let Some(key) = params.get("key").and_then(|v| v.as_str()) else {
        return err(&req.id, "invalid-argument", "missing key", None);
    };
    let device = match resolve_device(conn, &params) {
        Ok(Some(d)) => d,
        Ok(None) => return err(&req.id, "invalid-argument", "missing device", None),
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };

    let claim = ClaimRequest {
        key,
        device: &device,
        app_version: params.get("appVersion").and_then(|v| v.as_str()),
        device_model: params.get("deviceModel").and_then(|v| v.as_str()),
    };
    match license::claim(conn, &claim) {
        Ok(outcome) => {
            tracing::info!(key, device = %device, result = outcome.wire_result(), "license claimed");
            ok(&req.id, json!({ "result": outcome.wire_result() }))
        }
        Err(e) => {
            tracing::warn!(key, error = %e, "license claim failed");
            license_err(&req.id, &e)
        }
    }
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(key) = req.params.get("key").and_then(|v| v.as_str()) else {
        return err(&req.id, "invalid-argument", "missing key", None);
    };
    let device = match resolve_device(conn, &req.params) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };

    match license::status(conn, key, device.as_deref()) {
        Ok(report) => match serde_json::to_value(&report) {
            Ok(v) => ok(&req.id, v),
            Err(e) => err(&req.id, "internal", e.to_string(), None),
        },
        Err(e) => license_err(&req.id, &e),
    }
}

fn handle_revoke(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let params = req.params.clone();
    let Some(key) = params.get("key").and_then(|v| v.as_str()) else {
        return err(&req.id, "invalid-argument", "missing key", None);
    };
    // Administrative revoke passes no device and bypasses the ownership check.
    let device = params
        .get("device")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    match license::revoke(conn, key, device.as_deref()) {
        Ok(()) => ok(&req.id, json!({ "success": true })),
        Err(e) => license_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "license.add" => Some(handle_add(state, req)),
        "license.claim" => Some(handle_claim(state, req)),
        "license.status" => Some(handle_status(state, req)),
        "license.revoke" => Some(handle_revoke(state, req)),
        _ => None,
    }
}
