use crate::calendar;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

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

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "not_found",
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

fn parse_year_label(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let label = get_required_str(params, "yearLabel")?;
    // Validate up front so a typo fails loudly instead of querying nothing.
    calendar::months_of(&label).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    Ok(label)
}

fn payments_year_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let year_label = parse_year_label(params)?;
    let slots = calendar::months_of(&year_label).map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let group_exists = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [&group_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !group_exists {
        return Err(HandlerErr::not_found("group not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, sort_order
             FROM students WHERE group_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&group_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    // (student, month) -> (paid, paid_on); missing rows read as unpaid.
    let mut cells: HashMap<(String, i64), (bool, Option<String>)> = HashMap::new();
    let mut pay_stmt = conn
        .prepare(
            "SELECT p.student_id, p.month, p.paid, p.paid_on
             FROM payments p
             JOIN students s ON s.id = p.student_id
             WHERE s.group_id = ? AND p.year_label = ?",
        )
        .map_err(HandlerErr::query)?;
    let rows = pay_stmt
        .query_map((&group_id, &year_label), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)? != 0,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    for (student_id, month, paid, paid_on) in rows {
        cells.insert((student_id, month), (paid, paid_on));
    }

    let months_json: Vec<serde_json::Value> = slots
        .iter()
        .map(|slot| json!({ "month": slot.month, "calendarYear": slot.year }))
        .collect();
    let rows_json: Vec<serde_json::Value> = students
        .iter()
        .map(|(id, last, first, sort_order)| {
            let cells_json: Vec<serde_json::Value> = slots
                .iter()
                .map(|slot| {
                    let (paid, paid_on) = cells
                        .get(&(id.clone(), i64::from(slot.month)))
                        .cloned()
                        .unwrap_or((false, None));
                    json!({
                        "month": slot.month,
                        "calendarYear": slot.year,
                        "paid": paid,
                        "paidOn": paid_on,
                    })
                })
                .collect();
            json!({
                "studentId": id,
                "displayName": format!("{}, {}", last, first),
                "sortOrder": sort_order,
                "months": cells_json,
            })
        })
        .collect();

    Ok(json!({
        "yearLabel": year_label,
        "months": months_json,
        "rows": rows_json,
    }))
}

fn payments_set_paid(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let year_label = parse_year_label(params)?;
    let month = params
        .get("month")
        .and_then(|v| v.as_u64())
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| HandlerErr::bad_params("month must be 1..12"))? as u32;
    let paid = params
        .get("paid")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing paid"))?;
    let paid_on = params
        .get("paidOn")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    let calendar_year = calendar::calendar_year_of(&year_label, month)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    conn.execute(
        "INSERT INTO payments(student_id, year_label, month, paid, paid_on, calendar_year)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, year_label, month) DO UPDATE SET
           paid = excluded.paid,
           paid_on = excluded.paid_on",
        (
            &student_id,
            &year_label,
            month,
            paid as i64,
            &paid_on,
            calendar_year,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "payments" })),
    })?;

    Ok(json!({
        "studentId": student_id,
        "yearLabel": year_label,
        "month": month,
        "calendarYear": calendar_year,
        "paid": paid,
    }))
}

fn payments_student_year(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let year_label = parse_year_label(params)?;
    let slots = calendar::months_of(&year_label).map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    let mut by_month: HashMap<i64, (bool, Option<String>)> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT month, paid, paid_on FROM payments
             WHERE student_id = ? AND year_label = ?",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&student_id, &year_label), |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)? != 0,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    for (month, paid, paid_on) in rows {
        by_month.insert(month, (paid, paid_on));
    }

    let months: Vec<serde_json::Value> = slots
        .iter()
        .map(|slot| {
            let (paid, paid_on) = by_month
                .get(&i64::from(slot.month))
                .cloned()
                .unwrap_or((false, None));
            json!({
                "month": slot.month,
                "calendarYear": slot.year,
                "paid": paid,
                "paidOn": paid_on,
            })
        })
        .collect();

    Ok(json!({
        "studentId": student_id,
        "yearLabel": year_label,
        "months": months,
    }))
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
        "payments.yearOpen" => Some(with_conn(state, req, payments_year_open)),
        "payments.setPaid" => Some(with_conn(state, req, payments_set_paid)),
        "payments.studentYear" => Some(with_conn(state, req, payments_student_year)),
        _ => None,
    }
}
