use serde::Serialize;
use ulid::Ulid;

use crate::model::Ms;

/// Class of a rejected operation. All classes are equally severe: the
/// client may correct its input and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidSpan { start: Ms, end: Ms },
    LimitExceeded(&'static str),
    ResourceNotFound(Ulid),
    ReservationNotFound(Ulid),
    AlreadyLocked(Ulid),
    NotLockedByClient(Ulid),
    NotOwner(Ulid),
    Overlap(Ulid),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidSpan { .. } | EngineError::LimitExceeded(_) => {
                ErrorKind::Validation
            }
            EngineError::ResourceNotFound(_) | EngineError::ReservationNotFound(_) => {
                ErrorKind::NotFound
            }
            EngineError::AlreadyLocked(_)
            | EngineError::NotLockedByClient(_)
            | EngineError::NotOwner(_)
            | EngineError::Overlap(_) => ErrorKind::Conflict,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidSpan { start, end } => {
                write!(f, "start ({start}) must be before end ({end})")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::ResourceNotFound(id) => write!(f, "resource does not exist: {id}"),
            EngineError::ReservationNotFound(id) => {
                write!(f, "reservation does not exist: {id}")
            }
            EngineError::AlreadyLocked(id) => write!(f, "resource is already locked: {id}"),
            EngineError::NotLockedByClient(id) => {
                write!(f, "resource is not locked by client: {id}")
            }
            EngineError::NotOwner(id) => {
                write!(f, "reservation is not owned by client: {id}")
            }
            EngineError::Overlap(id) => {
                write!(f, "overlaps existing reservation: {id}")
            }
        }
    }
}

impl std::error::Error for EngineError {}
