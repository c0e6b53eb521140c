use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;

/// License operation errors. Logical conflicts are terminal for the call;
/// only storage failures are safe to retry (claiming is idempotent per
/// device, so re-issuing the same request cannot double-bind a key).
#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("license key not found")]
    NotFound,

    #[error("license key is inactive")]
    Inactive,

    #[error("license key already claimed by another device")]
    ClaimedElsewhere,

    #[error("license key already exists")]
    KeyExists,

    #[error("license key is bound to a different device")]
    DeviceMismatch,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl LicenseError {
    /// Structured code carried on the wire, matching the claim API.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::Inactive | Self::DeviceMismatch => "permission-denied",
            Self::ClaimedElsewhere | Self::KeyExists => "already-exists",
            Self::InvalidArgument(_) => "invalid-argument",
            Self::Storage(_) => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

pub type LicenseResult<T> = Result<T, LicenseError>;

/// Read-only projection of a key's state for a given device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Available,
    Inactive,
    UsedByThisDevice,
    UsedByOtherDevice,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// First claim: this call bound the key.
    Claimed,
    /// The key was already bound to this device; metadata was refreshed.
    AlreadyYours,
}

impl ClaimOutcome {
    pub fn wire_result(self) -> &'static str {
        match self {
            Self::Claimed => "success",
            Self::AlreadyYours => "ok",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClaimRequest<'a> {
    pub key: &'a str,
    pub device: &'a str,
    pub app_version: Option<&'a str>,
    pub device_model: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: KeyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
}

struct KeyRow {
    active: bool,
    used: bool,
    device_id: Option<String>,
    activated_at: Option<String>,
    app_version: Option<String>,
    device_model: Option<String>,
}

fn fetch_key(conn: &Connection, key: &str) -> LicenseResult<Option<KeyRow>> {
    let row = conn
        .query_row(
            "SELECT active, used, device_id, activated_at, app_version, device_model
             FROM license_keys WHERE key = ?",
            [key],
            |r| {
                Ok(KeyRow {
                    active: r.get::<_, i64>(0)? != 0,
                    used: r.get::<_, i64>(1)? != 0,
                    device_id: r.get(2)?,
                    activated_at: r.get(3)?,
                    app_version: r.get(4)?,
                    device_model: r.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn require_nonempty(value: &str, name: &str) -> LicenseResult<()> {
    if value.trim().is_empty() {
        return Err(LicenseError::InvalidArgument(format!("{} must not be empty", name)));
    }
    Ok(())
}

/// Seeds an available key. Admin-side counterpart of `claim`.
pub fn add_key(conn: &Connection, key: &str) -> LicenseResult<()> {
    require_nonempty(key, "key")?;
    if fetch_key(conn, key)?.is_some() {
        return Err(LicenseError::KeyExists);
    }
    conn.execute(
        "INSERT INTO license_keys(key, active, used) VALUES(?, 1, 0)",
        [key],
    )?;
    Ok(())
}

/// Binds `key` to `device`, atomically. The IMMEDIATE transaction takes the
/// write lock up front, so of two devices racing on an unused key exactly
/// one observes the unused row and wins; the other blocks on the busy
/// timeout, re-reads, and gets `ClaimedElsewhere`.
pub fn claim(conn: &mut Connection, req: &ClaimRequest) -> LicenseResult<ClaimOutcome> {
    require_nonempty(req.key, "key")?;
    require_nonempty(req.device, "device")?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let row = fetch_key(&tx, req.key)?.ok_or(LicenseError::NotFound)?;
    if !row.active {
        return Err(LicenseError::Inactive);
    }

    let outcome = if !row.used {
        ClaimOutcome::Claimed
    } else if row.device_id.as_deref() == Some(req.device) {
        ClaimOutcome::AlreadyYours
    } else {
        return Err(LicenseError::ClaimedElsewhere);
    };

    tx.execute(
        "UPDATE license_keys
         SET used = 1, device_id = ?, activated_at = ?, app_version = ?, device_model = ?
         WHERE key = ?",
        (
            req.device,
            Utc::now().to_rfc3339(),
            req.app_version,
            req.device_model,
            req.key,
        ),
    )?;
    tx.commit()?;
    Ok(outcome)
}

/// Side-effect-free projection of the claim state machine.
pub fn status(conn: &Connection, key: &str, device: Option<&str>) -> LicenseResult<StatusReport> {
    require_nonempty(key, "key")?;
    let Some(row) = fetch_key(conn, key)? else {
        return Ok(StatusReport {
            status: KeyStatus::Invalid,
            activated_at: None,
            app_version: None,
            device_model: None,
        });
    };

    let status = if !row.active {
        KeyStatus::Inactive
    } else if !row.used {
        KeyStatus::Available
    } else if device.is_some() && row.device_id.as_deref() == device {
        KeyStatus::UsedByThisDevice
    } else {
        KeyStatus::UsedByOtherDevice
    };

    Ok(StatusReport {
        status,
        activated_at: row.activated_at,
        app_version: row.app_version,
        device_model: row.device_model,
    })
}

/// Deactivates a key and releases its device binding. With a device given,
/// only the owning device may deactivate; without one the transition is
/// administrative and unconditional.
pub fn revoke(conn: &mut Connection, key: &str, device: Option<&str>) -> LicenseResult<()> {
    require_nonempty(key, "key")?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let row = fetch_key(&tx, key)?.ok_or(LicenseError::NotFound)?;
    if let Some(device) = device {
        if row.used && row.device_id.as_deref() != Some(device) {
            return Err(LicenseError::DeviceMismatch);
        }
    }
    tx.execute(
        "UPDATE license_keys SET active = 0, used = 0, device_id = NULL WHERE key = ?",
        [key],
    )?;
    tx.commit()?;
    Ok(())
}
