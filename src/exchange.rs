use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use thiserror::Error;

/// Snapshot document version this build reads and writes.
pub const SNAPSHOT_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported snapshot version {found} (expected {SNAPSHOT_VERSION})")]
    VersionMismatch { found: i64 },

    #[error("malformed snapshot: {0}")]
    Malformed(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub school_years: usize,
    pub groups: usize,
    pub users: usize,
    pub payments: usize,
}

/// Serializes the whole local store into one snapshot document. Student
/// records keep the original wire name `users`, with their payment rows
/// inlined.
pub fn export_snapshot(conn: &Connection) -> anyhow::Result<serde_json::Value> {
    let mut stmt = conn.prepare("SELECT id, label FROM school_years ORDER BY label")?;
    let school_years = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "label": r.get::<_, String>(1)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt =
        conn.prepare("SELECT id, school_year_id, name FROM groups ORDER BY name")?;
    let groups = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "schoolYearId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut pay_stmt = conn.prepare(
        "SELECT year_label, month, paid, paid_on, calendar_year
         FROM payments WHERE student_id = ? ORDER BY year_label, month",
    )?;
    let mut stmt = conn.prepare(
        "SELECT id, group_id, last_name, first_name, guardian_phone, student_no,
                enrolled_on, sort_order
         FROM students ORDER BY group_id, sort_order",
    )?;
    let mut users = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let payments = pay_stmt
            .query_map([&id], |r| {
                Ok(json!({
                    "yearLabel": r.get::<_, String>(0)?,
                    "month": r.get::<_, i64>(1)?,
                    "paid": r.get::<_, i64>(2)? != 0,
                    "paidOn": r.get::<_, Option<String>>(3)?,
                    "calendarYear": r.get::<_, i64>(4)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        users.push(json!({
            "id": id,
            "groupId": row.get::<_, String>(1)?,
            "lastName": row.get::<_, String>(2)?,
            "firstName": row.get::<_, String>(3)?,
            "guardianPhone": row.get::<_, Option<String>>(4)?,
            "studentNo": row.get::<_, Option<String>>(5)?,
            "enrolledOn": row.get::<_, String>(6)?,
            "sortOrder": row.get::<_, i64>(7)?,
            "payments": payments,
        }));
    }

    Ok(json!({
        "version": SNAPSHOT_VERSION,
        "exportedAt": Utc::now().to_rfc3339(),
        "schoolYears": school_years,
        "groups": groups,
        "users": users,
    }))
}

/// Destructive replace: on version match all four tables are cleared and
/// repopulated from the document, inside one transaction. On any failure
/// (wrong version, malformed record, storage error) the transaction rolls
/// back and existing data is untouched.
pub fn import_snapshot(
    conn: &Connection,
    doc: &serde_json::Value,
) -> Result<ImportSummary, ImportError> {
    let found = doc
        .get("version")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ImportError::Malformed("missing version".to_string()))?;
    if found != SNAPSHOT_VERSION {
        return Err(ImportError::VersionMismatch { found });
    }

    let school_years = as_array(doc, "schoolYears")?;
    let groups = as_array(doc, "groups")?;
    let users = as_array(doc, "users")?;

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM payments", [])?;
    tx.execute("DELETE FROM students", [])?;
    tx.execute("DELETE FROM groups", [])?;
    tx.execute("DELETE FROM school_years", [])?;

    for sy in school_years {
        tx.execute(
            "INSERT INTO school_years(id, label) VALUES(?, ?)",
            (req_str(sy, "id")?, req_str(sy, "label")?),
        )?;
    }
    for g in groups {
        tx.execute(
            "INSERT INTO groups(id, school_year_id, name) VALUES(?, ?, ?)",
            (req_str(g, "id")?, req_str(g, "schoolYearId")?, req_str(g, "name")?),
        )?;
    }
    let mut payment_count = 0usize;
    for u in users {
        let id = req_str(u, "id")?;
        tx.execute(
            "INSERT INTO students(id, group_id, last_name, first_name, guardian_phone,
                                  student_no, enrolled_on, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                id,
                req_str(u, "groupId")?,
                req_str(u, "lastName")?,
                req_str(u, "firstName")?,
                opt_str(u, "guardianPhone"),
                opt_str(u, "studentNo"),
                req_str(u, "enrolledOn")?,
                u.get("sortOrder").and_then(|v| v.as_i64()).unwrap_or(0),
            ),
        )?;
        if let Some(payments) = u.get("payments").and_then(|v| v.as_array()) {
            for p in payments {
                let month = p
                    .get("month")
                    .and_then(|v| v.as_i64())
                    .filter(|m| (1..=12).contains(m))
                    .ok_or_else(|| ImportError::Malformed("bad payment month".to_string()))?;
                tx.execute(
                    "INSERT INTO payments(student_id, year_label, month, paid, paid_on,
                                          calendar_year)
                     VALUES(?, ?, ?, ?, ?, ?)",
                    (
                        id,
                        req_str(p, "yearLabel")?,
                        month,
                        p.get("paid").and_then(|v| v.as_bool()).unwrap_or(false) as i64,
                        opt_str(p, "paidOn"),
                        p.get("calendarYear")
                            .and_then(|v| v.as_i64())
                            .ok_or_else(|| {
                                ImportError::Malformed("missing calendarYear".to_string())
                            })?,
                    ),
                )?;
                payment_count += 1;
            }
        }
    }
    tx.commit()?;

    Ok(ImportSummary {
        school_years: school_years.len(),
        groups: groups.len(),
        users: users.len(),
        payments: payment_count,
    })
}

fn as_array<'a>(
    doc: &'a serde_json::Value,
    key: &str,
) -> Result<&'a Vec<serde_json::Value>, ImportError> {
    doc.get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ImportError::Malformed(format!("missing array {}", key)))
}

fn req_str<'a>(obj: &'a serde_json::Value, key: &str) -> Result<&'a str, ImportError> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ImportError::Malformed(format!("missing field {}", key)))
}

fn opt_str(obj: &serde_json::Value, key: &str) -> Option<String> {
    obj.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}
