use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;

use super::conflict::now_ms;
use super::{Change, Engine, EngineError, LockExpiryPolicy};

impl Engine {
    /// Take the intent lock on a resource.
    pub async fn lock(&self, client: &ClientName, resource_id: Ulid) -> Result<Change, EngineError> {
        self.lock_at(client, resource_id, now_ms()).await
    }

    pub(crate) async fn lock_at(
        &self,
        client: &ClientName,
        resource_id: Ulid,
        now: Ms,
    ) -> Result<Change, EngineError> {
        let window = self.config.lock_window_ms;
        let policy = self.config.lock_expiry;
        let result = self
            .with_resource(resource_id, |rs| {
                // Release an enforced lock past its window before taking over.
                let displaced = match policy {
                    LockExpiryPolicy::Enforced => rs
                        .pending_lock
                        .as_ref()
                        .map(|l| l.id)
                        .and_then(|id| rs.expire_lock(id, now)),
                    LockExpiryPolicy::Advisory => None,
                };
                let lock = rs.lock(client, now, window, policy)?;
                Ok(Change {
                    reservation: ReservationInfo::new(rs.id, &lock),
                    expired: displaced.map(|old| Event::LockExpired {
                        resource_id: rs.id,
                        resource_name: rs.name.clone(),
                        owner: old.owner,
                        lock_id: old.id,
                    }),
                    event: Event::Locked {
                        resource_id: rs.id,
                        resource_name: rs.name.clone(),
                        owner: client.clone(),
                        lock_id: lock.id,
                        span: lock.span,
                    },
                })
            })
            .await;
        if let Ok(Change { expired: Some(expired), .. }) = &result {
            info!("lock on {resource_id} taken over: {expired}");
            metrics::counter!(crate::observability::LOCKS_REAPED_TOTAL).increment(1);
        }
        log_outcome("lock", client, resource_id, &result);
        result
    }

    /// Release the intent lock. Without `lock_id` the caller's own pending
    /// lock is released, if it holds one.
    pub async fn unlock(
        &self,
        client: &ClientName,
        resource_id: Ulid,
        lock_id: Option<Ulid>,
    ) -> Result<Change, EngineError> {
        let result = self
            .with_resource(resource_id, |rs| {
                let lock_id = match lock_id {
                    Some(id) => id,
                    None => rs
                        .pending_lock
                        .as_ref()
                        .filter(|l| l.is_owned_by(client))
                        .map(|l| l.id)
                        .ok_or(EngineError::NotLockedByClient(rs.id))?,
                };
                let lock = rs.unlock(client, lock_id)?;
                Ok(Change {
                    reservation: ReservationInfo::new(rs.id, &lock),
                    expired: None,
                    event: Event::Unlocked {
                        resource_id: rs.id,
                        resource_name: rs.name.clone(),
                        owner: client.clone(),
                        lock_id: lock.id,
                    },
                })
            })
            .await;
        log_outcome("unlock", client, resource_id, &result);
        result
    }

    /// Commit the pending lock `reservation_id` as a reservation of
    /// `[start, end)`.
    pub async fn reserve(
        &self,
        client: &ClientName,
        resource_id: Ulid,
        reservation_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Change, EngineError> {
        let result = self
            .with_resource(resource_id, |rs| {
                let reservation = rs.reserve(client, reservation_id, start, end)?;
                Ok(Change {
                    reservation: ReservationInfo::new(rs.id, &reservation),
                    expired: None,
                    event: Event::Reserved {
                        resource_id: rs.id,
                        resource_name: rs.name.clone(),
                        owner: client.clone(),
                        reservation_id,
                        span: reservation.span,
                    },
                })
            })
            .await;
        log_outcome("reserve", client, resource_id, &result);
        result
    }

    pub async fn update_reservation(
        &self,
        client: &ClientName,
        resource_id: Ulid,
        reservation_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Change, EngineError> {
        let result = self
            .with_resource(resource_id, |rs| {
                let (before, after) = rs.update_reservation(client, reservation_id, start, end)?;
                Ok(Change {
                    reservation: ReservationInfo::new(rs.id, &after),
                    expired: None,
                    event: Event::Updated {
                        resource_id: rs.id,
                        resource_name: rs.name.clone(),
                        owner: client.clone(),
                        reservation_id,
                        previous: before.span,
                        span: after.span,
                    },
                })
            })
            .await;
        log_outcome("update", client, resource_id, &result);
        result
    }

    pub async fn cancel_reservation(
        &self,
        client: &ClientName,
        resource_id: Ulid,
        reservation_id: Ulid,
    ) -> Result<Change, EngineError> {
        let result = self
            .with_resource(resource_id, |rs| {
                let removed = rs.cancel_reservation(client, reservation_id)?;
                Ok(Change {
                    reservation: ReservationInfo::new(rs.id, &removed),
                    expired: None,
                    event: Event::Cancelled {
                        resource_id: rs.id,
                        resource_name: rs.name.clone(),
                        owner: client.clone(),
                        reservation_id,
                        span: removed.span,
                    },
                })
            })
            .await;
        log_outcome("cancel", client, resource_id, &result);
        result
    }

    /// Release `lock_id` on `resource_id` if its hold window ended by `now`.
    /// Used by the reaper; the lock may have been reserved or unlocked since
    /// it was collected, in which case this returns `NotLockedByClient`.
    pub async fn release_expired_lock(
        &self,
        resource_id: Ulid,
        lock_id: Ulid,
        now: Ms,
    ) -> Result<Change, EngineError> {
        self.with_resource(resource_id, |rs| {
            let lock = rs
                .expire_lock(lock_id, now)
                .ok_or(EngineError::NotLockedByClient(rs.id))?;
            Ok(Change {
                reservation: ReservationInfo::new(rs.id, &lock),
                expired: None,
                event: Event::LockExpired {
                    resource_id: rs.id,
                    resource_name: rs.name.clone(),
                    owner: lock.owner.clone(),
                    lock_id,
                },
            })
        })
        .await
    }
}

fn log_outcome(op: &str, client: &ClientName, resource_id: Ulid, result: &Result<Change, EngineError>) {
    match result {
        Ok(change) => info!("{op} on {resource_id} by {client}: {}", change.event),
        Err(e) => debug!("{op} on {resource_id} by {client} rejected: {e}"),
    }
}
