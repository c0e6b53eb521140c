use crate::calendar;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::query::{self, StudentFilter};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 200;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn query(e: impl ToString) -> Self {
        Self {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn group_exists(conn: &Connection, group_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn parse_filter(params: &serde_json::Value) -> Result<StudentFilter, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;

    let month = match params.get("month") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => {
            let m = v
                .as_u64()
                .filter(|m| (1..=12).contains(m))
                .ok_or_else(|| HandlerErr::bad_params("month must be 1..12"))?;
            Some(m as u32)
        }
    };

    // The payment state is keyed by academic year; default to the one
    // covering today when the client filters by month without naming it.
    let year_label = get_optional_str(params, "yearLabel")
        .or_else(|| month.map(|_| calendar::current_label(Local::now().date_naive())));

    let paid = match params.get("paid") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            v.as_bool()
                .ok_or_else(|| HandlerErr::bad_params("paid must be boolean"))?,
        ),
    };

    let page = params.get("page").and_then(|v| v.as_u64()).unwrap_or(0);
    let page_size = params
        .get("pageSize")
        .and_then(|v| v.as_u64())
        .unwrap_or(u64::from(DEFAULT_PAGE_SIZE));
    if page_size == 0 || page_size > u64::from(MAX_PAGE_SIZE) {
        return Err(HandlerErr::bad_params(format!(
            "pageSize must be 1..{}",
            MAX_PAGE_SIZE
        )));
    }

    Ok(StudentFilter {
        group_id,
        text: get_optional_str(params, "query"),
        year_label,
        month,
        paid,
        page: page as u32,
        page_size: page_size as u32,
    })
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let filter = parse_filter(params)?;
    if !group_exists(conn, &filter.group_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "group not found".to_string(),
            details: None,
        });
    }

    let page = query::list_students(conn, &filter).map_err(HandlerErr::query)?;
    let items: Vec<serde_json::Value> = page
        .items
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "lastName": s.last_name,
                "firstName": s.first_name,
                "guardianPhone": s.guardian_phone,
                "studentNo": s.student_no,
                "enrolledOn": s.enrolled_on,
                "sortOrder": s.sort_order,
            })
        })
        .collect();

    Ok(json!({
        "students": items,
        "page": page.page,
        "pageSize": page.page_size,
        "hasMore": page.has_more,
    }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    if last_name.trim().is_empty() || first_name.trim().is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "group not found".to_string(),
            details: None,
        });
    }

    let enrolled_on = get_optional_str(params, "enrolledOn")
        .unwrap_or_else(|| Local::now().date_naive().to_string());

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE group_id = ?",
            [&group_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, group_id, last_name, first_name, guardian_phone,
                              student_no, enrolled_on, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &group_id,
            last_name.trim(),
            first_name.trim(),
            get_optional_str(params, "guardianPhone"),
            get_optional_str(params, "studentNo"),
            &enrolled_on,
            next_sort,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "studentId": student_id, "groupId": group_id }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    // Partial update: only the fields present in params change.
    let mut sets: Vec<&str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    for (param, column) in [
        ("lastName", "last_name"),
        ("firstName", "first_name"),
        ("guardianPhone", "guardian_phone"),
        ("studentNo", "student_no"),
        ("enrolledOn", "enrolled_on"),
        ("groupId", "group_id"),
    ] {
        let Some(v) = params.get(param) else { continue };
        match (param, v) {
            ("guardianPhone" | "studentNo", serde_json::Value::Null) => {
                sets.push(match column {
                    "guardian_phone" => "guardian_phone = NULL",
                    _ => "student_no = NULL",
                });
            }
            (_, serde_json::Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() && matches!(param, "lastName" | "firstName" | "groupId") {
                    return Err(HandlerErr::bad_params(format!("{} must not be empty", param)));
                }
                if param == "groupId" && !group_exists(conn, trimmed)? {
                    return Err(HandlerErr {
                        code: "not_found",
                        message: "group not found".to_string(),
                        details: None,
                    });
                }
                sets.push(match column {
                    "last_name" => "last_name = ?",
                    "first_name" => "first_name = ?",
                    "guardian_phone" => "guardian_phone = ?",
                    "student_no" => "student_no = ?",
                    "enrolled_on" => "enrolled_on = ?",
                    _ => "group_id = ?",
                });
                binds.push(rusqlite::types::Value::Text(trimmed.to_string()));
            }
            _ => return Err(HandlerErr::bad_params(format!("{} must be a string", param))),
        }
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("no fields to update"));
    }

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    binds.push(rusqlite::types::Value::Text(student_id.clone()));
    conn.execute(&sql, rusqlite::params_from_iter(binds))
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;

    Ok(json!({ "studentId": student_id }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute("DELETE FROM payments WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "payments" })),
        })?;
    let removed = tx
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;
    if removed == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
