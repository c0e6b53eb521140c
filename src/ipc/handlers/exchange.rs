use crate::backup;
use crate::db;
use crate::exchange::{self, ImportError};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn get_path(req: &Request) -> Result<PathBuf, serde_json::Value> {
    req.params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| err(&req.id, "bad_params", "missing params.path", None))
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match get_path(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let doc = match exchange::export_snapshot(conn) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let text = match serde_json::to_string_pretty(&doc) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };
    if let Err(e) = std::fs::write(&path, text) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "path": path.to_string_lossy(),
            "version": exchange::SNAPSHOT_VERSION,
            "users": doc["users"].as_array().map(|u| u.len()).unwrap_or(0),
        }),
    )
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match get_path(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "io_failed", e.to_string(), None),
    };
    let doc: serde_json::Value = match serde_json::from_str(&text) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "bad_snapshot", e.to_string(), None),
    };

    match exchange::import_snapshot(conn, &doc) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "schoolYears": summary.school_years,
                "groups": summary.groups,
                "users": summary.users,
                "payments": summary.payments,
            }),
        ),
        Err(ImportError::VersionMismatch { found }) => err(
            &req.id,
            "version_mismatch",
            ImportError::VersionMismatch { found }.to_string(),
            Some(json!({
                "found": found,
                "expected": exchange::SNAPSHOT_VERSION,
            })),
        ),
        Err(e @ ImportError::Malformed(_)) => err(&req.id, "bad_snapshot", e.to_string(), None),
        Err(e @ ImportError::Storage(_)) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match get_path(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match backup::export_workspace_bundle(&workspace, &path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "path": path.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "dbSha256": summary.db_sha256,
            }),
        ),
        Err(e) => err(&req.id, "backup_failed", format!("{e:?}"), None),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match get_path(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    // The live connection holds the database file; release it before the
    // bundle swaps the file in, then reopen (which re-runs migrations).
    state.db = None;
    let restored = backup::import_workspace_bundle(&path, &workspace);
    let reopened = db::open_db(&workspace);
    match (restored, reopened) {
        (Ok(summary), Ok(conn)) => {
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "bundleFormat": summary.bundle_format_detected }),
            )
        }
        (Err(e), Ok(conn)) => {
            state.db = Some(conn);
            err(&req.id, "backup_failed", format!("{e:?}"), None)
        }
        (_, Err(e)) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exchange.export" => Some(handle_export(state, req)),
        "exchange.import" => Some(handle_import(state, req)),
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
