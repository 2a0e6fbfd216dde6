use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Strict on both sides: touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Identity a client claims at connect time. Ownership is decided by
/// comparing names, never by which connection carried the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientName(String);

impl ClientName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A booking of one resource by one client. Used both for the pending
/// intent lock and for committed reservations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub owner: ClientName,
    pub span: Span,
}

impl Reservation {
    pub fn is_owned_by(&self, client: &ClientName) -> bool {
        &self.owner == client
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    /// Committed reservations keyed by reservation id.
    pub reservations: HashMap<Ulid, Reservation>,
    /// At most one uncommitted intent lock. Never also present in `reservations`.
    pub pending_lock: Option<Reservation>,
}

impl ResourceState {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            reservations: HashMap::new(),
            pending_lock: None,
        }
    }

    /// Committed reservations overlapping `span`, skipping `exclude`.
    pub fn overlapping<'a>(
        &'a self,
        span: &'a Span,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &'a Reservation> {
        self.reservations
            .values()
            .filter(move |r| Some(r.id) != exclude && r.span.overlaps(span))
    }

    /// Committed reservations ordered by start time.
    pub fn sorted_reservations(&self) -> Vec<&Reservation> {
        let mut all: Vec<&Reservation> = self.reservations.values().collect();
        all.sort_by_key(|r| (r.span.start, r.id));
        all
    }
}

// ── Change notifications ─────────────────────────────────────────

/// A committed state change on a resource. Its `Display` form is the
/// human-readable text broadcast to every connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Locked {
        resource_id: Ulid,
        resource_name: String,
        owner: ClientName,
        lock_id: Ulid,
        span: Span,
    },
    Unlocked {
        resource_id: Ulid,
        resource_name: String,
        owner: ClientName,
        lock_id: Ulid,
    },
    LockExpired {
        resource_id: Ulid,
        resource_name: String,
        owner: ClientName,
        lock_id: Ulid,
    },
    Reserved {
        resource_id: Ulid,
        resource_name: String,
        owner: ClientName,
        reservation_id: Ulid,
        span: Span,
    },
    Updated {
        resource_id: Ulid,
        resource_name: String,
        owner: ClientName,
        reservation_id: Ulid,
        previous: Span,
        span: Span,
    },
    Cancelled {
        resource_id: Ulid,
        resource_name: String,
        owner: ClientName,
        reservation_id: Ulid,
        span: Span,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Locked { resource_name, owner, span, .. } => write!(
                f,
                "{owner} locked {resource_name} until {}",
                format_instant(span.end)
            ),
            Event::Unlocked { resource_name, owner, .. } => {
                write!(f, "{owner} unlocked {resource_name}")
            }
            Event::LockExpired { resource_name, owner, .. } => {
                write!(f, "lock on {resource_name} held by {owner} expired")
            }
            Event::Reserved { resource_name, owner, span, .. } => write!(
                f,
                "{owner} reserved {resource_name} from {} to {}",
                format_instant(span.start),
                format_instant(span.end)
            ),
            Event::Updated { resource_name, owner, previous, span, .. } => write!(
                f,
                "{owner} moved their reservation of {resource_name} from {} - {} to {} - {}",
                format_instant(previous.start),
                format_instant(previous.end),
                format_instant(span.start),
                format_instant(span.end)
            ),
            Event::Cancelled { resource_name, owner, span, .. } => write!(
                f,
                "{owner} cancelled their reservation of {resource_name} from {} to {}",
                format_instant(span.start),
                format_instant(span.end)
            ),
        }
    }
}

// ── Dates ────────────────────────────────────────────────────────

/// Midnight UTC of a calendar day, in unix milliseconds.
pub fn day_start_ms(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Render a timestamp as `YYYY-MM-DD` when it falls on midnight UTC,
/// otherwise with minute precision.
pub fn format_instant(ms: Ms) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) if dt.time() == NaiveTime::MIN => dt.format("%Y-%m-%d").to_string(),
        Some(dt) if dt.second() == 0 => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => ms.to_string(),
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub owner: ClientName,
    pub start: Ms,
    pub end: Ms,
}

impl ReservationInfo {
    pub fn new(resource_id: Ulid, r: &Reservation) -> Self {
        Self {
            id: r.id,
            resource_id,
            owner: r.owner.clone(),
            start: r.span.start,
            end: r.span.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub locked: bool,
    pub reservations: Vec<ReservationInfo>,
}

impl ResourceInfo {
    pub fn new(rs: &ResourceState) -> Self {
        Self {
            id: rs.id,
            name: rs.name.clone(),
            locked: rs.pending_lock.is_some(),
            reservations: rs
                .sorted_reservations()
                .into_iter()
                .map(|r| ReservationInfo::new(rs.id, r))
                .collect(),
        }
    }
}
