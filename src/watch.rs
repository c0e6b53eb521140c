use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// A live query a client has subscribed to. Snapshots are immutable JSON
/// values; a subscriber gets the current one on subscribe and a fresh one
/// whenever a mutation changes the result set.
#[derive(Debug, Clone)]
pub enum WatchSpec {
    GroupRoster { group_id: String },
    Groups { school_year_id: String },
}

struct WatchEntry {
    spec: WatchSpec,
    last: serde_json::Value,
}

#[derive(Default)]
pub struct Subscriptions {
    subs: HashMap<String, WatchEntry>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription and returns its id plus the initial snapshot.
    pub fn subscribe(
        &mut self,
        conn: &Connection,
        spec: WatchSpec,
    ) -> anyhow::Result<(String, serde_json::Value)> {
        let snapshot = eval(conn, &spec)?;
        let id = Uuid::new_v4().to_string();
        self.subs.insert(
            id.clone(),
            WatchEntry {
                spec,
                last: snapshot.clone(),
            },
        );
        Ok((id, snapshot))
    }

    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subs.remove(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Re-evaluates every live subscription and returns (id, snapshot) for
    /// those whose result set changed since last delivery.
    pub fn refresh(&mut self, conn: &Connection) -> anyhow::Result<Vec<(String, serde_json::Value)>> {
        let mut changed = Vec::new();
        for (id, entry) in &mut self.subs {
            let snapshot = eval(conn, &entry.spec)?;
            if snapshot != entry.last {
                entry.last = snapshot.clone();
                changed.push((id.clone(), snapshot));
            }
        }
        Ok(changed)
    }
}

fn eval(conn: &Connection, spec: &WatchSpec) -> anyhow::Result<serde_json::Value> {
    match spec {
        WatchSpec::GroupRoster { group_id } => {
            let mut stmt = conn.prepare(
                "SELECT id, last_name, first_name, student_no, sort_order
                 FROM students WHERE group_id = ? ORDER BY sort_order",
            )?;
            let rows = stmt
                .query_map([group_id], |r| {
                    Ok(json!({
                        "id": r.get::<_, String>(0)?,
                        "lastName": r.get::<_, String>(1)?,
                        "firstName": r.get::<_, String>(2)?,
                        "studentNo": r.get::<_, Option<String>>(3)?,
                        "sortOrder": r.get::<_, i64>(4)?,
                    }))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(json!({ "kind": "groupRoster", "groupId": group_id, "students": rows }))
        }
        WatchSpec::Groups { school_year_id } => {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name,
                        (SELECT COUNT(*) FROM students s WHERE s.group_id = g.id)
                 FROM groups g WHERE g.school_year_id = ? ORDER BY g.name",
            )?;
            let rows = stmt
                .query_map([school_year_id], |r| {
                    Ok(json!({
                        "id": r.get::<_, String>(0)?,
                        "name": r.get::<_, String>(1)?,
                        "studentCount": r.get::<_, i64>(2)?,
                    }))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(json!({ "kind": "groups", "schoolYearId": school_year_id, "groups": rows }))
        }
    }
}
