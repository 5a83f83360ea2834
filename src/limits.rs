use std::time::Duration;

use crate::model::Ms;

// ── Tenants ──────────────────────────────────────────────────────
pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

// ── Catalog ──────────────────────────────────────────────────────
pub const MAX_CATALOG_ENTRIES: usize = 10_000;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_CONTACT_LEN: usize = 254;
pub const MAX_SERVICES_PER_STAFF: usize = 500;
pub const MAX_SERVICE_DURATION_MINUTES: u32 = 24 * 60;
pub const MAX_BUFFER_MINUTES: u32 = 240;
pub const MAX_SLOT_GRANULARITY_MINUTES: u32 = 24 * 60;
pub const MAX_ADVANCE_DAYS: u32 = 3_660;
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

// ── Appointments ─────────────────────────────────────────────────
pub const MAX_APPOINTMENTS_PER_STAFF: usize = 200_000;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_TRANSACTION_REF_LEN: usize = 128;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

// ── Locking ──────────────────────────────────────────────────────
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(2);
pub const LOCK_RETRY_ATTEMPTS: u32 = 3;
pub const LOCK_RETRY_BASE_BACKOFF: Duration = Duration::from_millis(25);
/// Re-resolve attempts when an appointment moves to another staff member
/// between index lookup and lock acquisition.
pub const MAX_RELOCK_ATTEMPTS: usize = 4;
