use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::watch::WatchSpec;
use serde_json::json;

fn handle_subscribe(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let kind = match req.params.get("kind").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing kind", None),
    };
    let spec = match kind {
        "groupRoster" => {
            let Some(group_id) = req.params.get("groupId").and_then(|v| v.as_str()) else {
                return err(&req.id, "bad_params", "missing groupId", None);
            };
            WatchSpec::GroupRoster {
                group_id: group_id.to_string(),
            }
        }
        "groups" => {
            let Some(year_id) = req.params.get("schoolYearId").and_then(|v| v.as_str()) else {
                return err(&req.id, "bad_params", "missing schoolYearId", None);
            };
            WatchSpec::Groups {
                school_year_id: year_id.to_string(),
            }
        }
        other => {
            return err(
                &req.id,
                "bad_params",
                format!("unknown watch kind: {}", other),
                None,
            )
        }
    };

    match state.subs.subscribe(conn, spec) {
        Ok((subscription_id, snapshot)) => ok(
            &req.id,
            json!({ "subscriptionId": subscription_id, "snapshot": snapshot }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_unsubscribe(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(sub_id) = req.params.get("subscriptionId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing subscriptionId", None);
    };
    if state.subs.unsubscribe(sub_id) {
        ok(&req.id, json!({ "ok": true }))
    } else {
        err(&req.id, "not_found", "subscription not found", None)
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "watch.subscribe" => Some(handle_subscribe(state, req)),
        "watch.unsubscribe" => Some(handle_unsubscribe(state, req)),
        _ => None,
    }
}
