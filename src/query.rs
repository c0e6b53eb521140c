use rusqlite::{types::Value, Connection};

/// Filter for the paginated group roster. `month`/`paid` scope the listing
/// by payment state within `year_label`; `text` matches the student number
/// exactly when all digits, otherwise first/last name as a substring.
#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub group_id: String,
    pub text: Option<String>,
    pub year_label: Option<String>,
    pub month: Option<u32>,
    pub paid: Option<bool>,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub last_name: String,
    pub first_name: String,
    pub guardian_phone: Option<String>,
    pub student_no: Option<String>,
    pub enrolled_on: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct StudentPage {
    pub items: Vec<StudentRow>,
    pub page: u32,
    pub page_size: u32,
    /// False once a page comes back shorter than `page_size`.
    pub has_more: bool,
}

pub fn list_students(conn: &Connection, filter: &StudentFilter) -> anyhow::Result<StudentPage> {
    let mut sql = String::from(
        "SELECT s.id, s.last_name, s.first_name, s.guardian_phone, s.student_no,
                s.enrolled_on, s.sort_order
         FROM students s
         WHERE s.group_id = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(filter.group_id.clone())];

    if let Some(text) = filter.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        if text.chars().all(|c| c.is_ascii_digit()) {
            sql.push_str(" AND s.student_no = ?");
            binds.push(Value::Text(text.to_string()));
        } else {
            sql.push_str(" AND (s.first_name LIKE ? OR s.last_name LIKE ?)");
            let pattern = format!("%{}%", text);
            binds.push(Value::Text(pattern.clone()));
            binds.push(Value::Text(pattern));
        }
    }

    if let Some(month) = filter.month {
        let year_label = filter.year_label.as_deref().unwrap_or_default();
        let paid = filter.paid.unwrap_or(true);
        if paid {
            sql.push_str(
                " AND EXISTS (
                    SELECT 1 FROM payments p
                    WHERE p.student_id = s.id AND p.year_label = ? AND p.month = ? AND p.paid = 1
                  )",
            );
        } else {
            // Absence of a payment row reads as unpaid.
            sql.push_str(
                " AND NOT EXISTS (
                    SELECT 1 FROM payments p
                    WHERE p.student_id = s.id AND p.year_label = ? AND p.month = ? AND p.paid = 1
                  )",
            );
        }
        binds.push(Value::Text(year_label.to_string()));
        binds.push(Value::Integer(i64::from(month)));
    }

    sql.push_str(" ORDER BY s.sort_order LIMIT ? OFFSET ?");
    binds.push(Value::Integer(i64::from(filter.page_size)));
    binds.push(Value::Integer(i64::from(filter.page) * i64::from(filter.page_size)));

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(rusqlite::params_from_iter(binds), |row| {
            Ok(StudentRow {
                id: row.get(0)?,
                last_name: row.get(1)?,
                first_name: row.get(2)?,
                guardian_phone: row.get(3)?,
                student_no: row.get(4)?,
                enrolled_on: row.get(5)?,
                sort_order: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let has_more = items.len() as u32 == filter.page_size && filter.page_size > 0;
    Ok(StudentPage {
        items,
        page: filter.page,
        page_size: filter.page_size,
        has_more,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seeded_conn(count: usize) -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn.execute(
            "INSERT INTO school_years(id, label) VALUES('y1', '2025/2026')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO groups(id, school_year_id, name) VALUES('g1', 'y1', 'Monday A')",
            [],
        )
        .unwrap();
        for i in 0..count {
            conn.execute(
                "INSERT INTO students(id, group_id, last_name, first_name, student_no,
                                      enrolled_on, sort_order)
                 VALUES(?, 'g1', ?, ?, ?, '2025-09-01', ?)",
                (
                    format!("s{:03}", i),
                    format!("Last{:03}", i),
                    format!("First{:03}", i),
                    format!("{}", 1000 + i),
                    i as i64,
                ),
            )
            .unwrap();
        }
        conn
    }

    fn base_filter() -> StudentFilter {
        StudentFilter {
            group_id: "g1".to_string(),
            page_size: 20,
            ..Default::default()
        }
    }

    #[test]
    fn pages_of_45_students_split_20_20_5_then_empty() {
        let conn = seeded_conn(45);
        let mut seen = std::collections::HashSet::new();
        let mut filter = base_filter();

        for (page, expected_len, expected_more) in
            [(0u32, 20usize, true), (1, 20, true), (2, 5, false), (3, 0, false)]
        {
            filter.page = page;
            let got = list_students(&conn, &filter).expect("list page");
            assert_eq!(got.items.len(), expected_len, "page {}", page);
            assert_eq!(got.has_more, expected_more, "page {}", page);
            for row in &got.items {
                assert!(seen.insert(row.id.clone()), "duplicate {}", row.id);
            }
        }
        assert_eq!(seen.len(), 45);
    }

    #[test]
    fn digit_query_matches_student_number_exactly() {
        let conn = seeded_conn(10);
        let mut filter = base_filter();
        filter.text = Some("1003".to_string());
        let got = list_students(&conn, &filter).expect("list");
        assert_eq!(got.items.len(), 1);
        assert_eq!(got.items[0].id, "s003");
    }

    #[test]
    fn text_query_matches_name_substring() {
        let conn = seeded_conn(10);
        let mut filter = base_filter();
        filter.text = Some("st00".to_string());
        let got = list_students(&conn, &filter).expect("list");
        // LIKE is case-insensitive for ASCII: First000..First009 all match.
        assert_eq!(got.items.len(), 10);
    }

    #[test]
    fn month_filter_splits_paid_and_unpaid() {
        let conn = seeded_conn(5);
        for sid in ["s000", "s002"] {
            conn.execute(
                "INSERT INTO payments(student_id, year_label, month, paid, paid_on, calendar_year)
                 VALUES(?, '2025/2026', 9, 1, '2025-09-05', 2025)",
                [sid],
            )
            .unwrap();
        }
        // An explicit unpaid row must also land on the unpaid side.
        conn.execute(
            "INSERT INTO payments(student_id, year_label, month, paid, calendar_year)
             VALUES('s001', '2025/2026', 9, 0, 2025)",
            [],
        )
        .unwrap();

        let mut filter = base_filter();
        filter.year_label = Some("2025/2026".to_string());
        filter.month = Some(9);
        filter.paid = Some(true);
        let paid = list_students(&conn, &filter).expect("paid list");
        assert_eq!(
            paid.items.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["s000", "s002"]
        );

        filter.paid = Some(false);
        let unpaid = list_students(&conn, &filter).expect("unpaid list");
        assert_eq!(
            unpaid.items.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["s001", "s003", "s004"]
        );
    }

    #[test]
    fn month_and_text_filters_combine() {
        let conn = seeded_conn(5);
        conn.execute(
            "INSERT INTO payments(student_id, year_label, month, paid, calendar_year)
             VALUES('s004', '2025/2026', 9, 1, 2025)",
            [],
        )
        .unwrap();

        let mut filter = base_filter();
        filter.year_label = Some("2025/2026".to_string());
        filter.month = Some(9);
        filter.paid = Some(true);
        filter.text = Some("First004".to_string());
        let got = list_students(&conn, &filter).expect("list");
        assert_eq!(got.items.len(), 1);
        assert_eq!(got.items[0].id, "s004");

        filter.text = Some("First001".to_string());
        let got = list_students(&conn, &filter).expect("list");
        assert!(got.items.is_empty());
    }
}
