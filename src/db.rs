use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

use crate::calendar;

pub const DB_FILE_NAME: &str = "tuition.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates/migrates the schema on an already-open connection. Split out of
/// `open_db` so tests can run against a throwaway database.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Concurrent claimers (license transactions from a second connection)
    // block instead of failing immediately.
    conn.busy_timeout(Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_years(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            school_year_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_year_id) REFERENCES school_years(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_groups_school_year ON groups(school_year_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            guardian_phone TEXT,
            student_no TEXT,
            enrolled_on TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_group ON students(group_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_group_sort ON students(group_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            student_id TEXT NOT NULL,
            year_label TEXT NOT NULL,
            month INTEGER NOT NULL,
            paid INTEGER NOT NULL,
            paid_on TEXT,
            calendar_year INTEGER NOT NULL,
            PRIMARY KEY(student_id, year_label, month),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_year_month ON payments(year_label, month)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS license_keys(
            key TEXT PRIMARY KEY,
            active INTEGER NOT NULL DEFAULT 1,
            used INTEGER NOT NULL DEFAULT 0,
            device_id TEXT,
            activated_at TEXT,
            app_version TEXT,
            device_model TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Fold the legacy per-calendar-month paid flags (paid_1..paid_12 on the
    // student row, no year dimension) into payments rows, then drop them.
    migrate_legacy_paid_flags(conn)?;

    Ok(())
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(match raw {
        Some(s) => Some(serde_json::from_str(&s)?),
        None => None,
    })
}

fn migrate_legacy_paid_flags(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "paid_1")? {
        return Ok(());
    }

    // The flag model never recorded a year, so flags are attributed to the
    // academic year current at migration time.
    let label = calendar::current_label(Local::now().date_naive());
    let today = Local::now().date_naive().to_string();

    let tx = conn.unchecked_transaction()?;
    for month in 1u32..=12 {
        let col = format!("paid_{}", month);
        if !table_has_column(&tx, "students", &col)? {
            continue;
        }
        let year = calendar::calendar_year_of(&label, month)?;
        let sql = format!(
            "INSERT INTO payments(student_id, year_label, month, paid, paid_on, calendar_year)
             SELECT id, ?1, ?2, 1, ?3, ?4 FROM students WHERE {} = 1
             ON CONFLICT(student_id, year_label, month) DO NOTHING",
            col
        );
        tx.execute(&sql, (&label, month, &today, year))?;
    }
    for month in 1u32..=12 {
        let col = format!("paid_{}", month);
        if table_has_column(&tx, "students", &col)? {
            tx.execute(&format!("ALTER TABLE students DROP COLUMN {}", col), [])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
