use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "schoolYears": [] }));
    };

    // Include group/student counts so the UI can show a useful dashboard.
    let mut stmt = match conn.prepare(
        "SELECT
           y.id,
           y.label,
           (SELECT COUNT(*) FROM groups g WHERE g.school_year_id = y.id) AS group_count,
           (SELECT COUNT(*) FROM students s
              JOIN groups g ON g.id = s.group_id
              WHERE g.school_year_id = y.id) AS student_count
         FROM school_years y
         ORDER BY y.label",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let label: String = row.get(1)?;
            let group_count: i64 = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "label": label,
                "groupCount": group_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(school_years) => ok(&req.id, json!({ "schoolYears": school_years })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let label = match req.params.get("label").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing label", None),
    };
    if label.is_empty() {
        return err(&req.id, "bad_params", "label must not be empty", None);
    }

    let year_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO school_years(id, label) VALUES(?, ?)",
        (&year_id, &label),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "school_years" })),
        );
    }

    ok(&req.id, json!({ "schoolYearId": year_id, "label": label }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let year_id = match req.params.get("schoolYearId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing schoolYearId", None),
    };
    let label = match req.params.get("label").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing label", None),
    };
    if label.is_empty() {
        return err(&req.id, "bad_params", "label must not be empty", None);
    }

    match conn.execute(
        "UPDATE school_years SET label = ? WHERE id = ?",
        (&label, &year_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "school year not found", None),
        Ok(_) => ok(&req.id, json!({ "schoolYearId": year_id, "label": label })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "school_years" })),
        ),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let year_id = match req.params.get("schoolYearId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing schoolYearId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM school_years WHERE id = ?", [&year_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "school year not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Cascade by hand, leaf tables first.
    if let Err(e) = tx.execute(
        "DELETE FROM payments
         WHERE student_id IN (
           SELECT s.id FROM students s
           JOIN groups g ON g.id = s.group_id
           WHERE g.school_year_id = ?
         )",
        [&year_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "payments" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM students
         WHERE group_id IN (SELECT id FROM groups WHERE school_year_id = ?)",
        [&year_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM groups WHERE school_year_id = ?", [&year_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM school_years WHERE id = ?", [&year_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "school_years" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schoolYears.list" => Some(handle_list(state, req)),
        "schoolYears.create" => Some(handle_create(state, req)),
        "schoolYears.update" => Some(handle_update(state, req)),
        "schoolYears.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
