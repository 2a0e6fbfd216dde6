//! The per-resource state machine. A resource is either Free (no pending
//! lock) or Locked by exactly one client. Every transition here is
//! all-or-nothing: on `Err` the state is untouched.
//!
//! These methods assume the caller holds the resource's exclusive section;
//! see [`Engine::with_resource`](super::Engine).

use ulid::Ulid;

use crate::limits::MAX_RESERVATIONS_PER_RESOURCE;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::{EngineError, LockExpiryPolicy};

impl ResourceState {
    /// Free → Locked. Fails if any client, including the caller, already
    /// holds the lock. Under [`LockExpiryPolicy::Enforced`] a lock whose
    /// window has passed counts as released.
    pub fn lock(
        &mut self,
        client: &ClientName,
        now: Ms,
        window: Ms,
        policy: LockExpiryPolicy,
    ) -> Result<Reservation, EngineError> {
        if let Some(existing) = &self.pending_lock {
            let expired = policy == LockExpiryPolicy::Enforced && existing.span.end <= now;
            if !expired {
                return Err(EngineError::AlreadyLocked(self.id));
            }
        }
        let lock = Reservation {
            id: Ulid::new(),
            owner: client.clone(),
            span: Span::new(now, now + window),
        };
        self.pending_lock = Some(lock.clone());
        Ok(lock)
    }

    /// Locked → Free, only for the lock holder presenting the lock id.
    pub fn unlock(&mut self, client: &ClientName, lock_id: Ulid) -> Result<Reservation, EngineError> {
        self.held_lock(client, lock_id)?;
        self.pending_lock
            .take()
            .ok_or(EngineError::NotLockedByClient(self.id))
    }

    /// Locked → Free, committing `[start, end)` under the lock's id. The
    /// committed window is the caller's, not the lock's hold window.
    pub fn reserve(
        &mut self,
        client: &ClientName,
        reservation_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Reservation, EngineError> {
        self.held_lock(client, reservation_id)?;
        let span = validate_span(start, end)?;
        check_no_conflict(self, &span, None)?;
        if self.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }

        let reservation = Reservation {
            id: reservation_id,
            owner: client.clone(),
            span,
        };
        self.pending_lock = None;
        self.reservations.insert(reservation_id, reservation.clone());
        Ok(reservation)
    }

    /// Move an owned committed reservation. Bypasses the lock phase; the
    /// reservation itself is excluded from the overlap comparison.
    /// Returns the reservation before and after the change.
    pub fn update_reservation(
        &mut self,
        client: &ClientName,
        reservation_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<(Reservation, Reservation), EngineError> {
        self.owned_reservation(client, reservation_id)?;
        let span = validate_span(start, end)?;
        check_no_conflict(self, &span, Some(reservation_id))?;

        let entry = self
            .reservations
            .get_mut(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        let before = entry.clone();
        entry.span = span;
        Ok((before, entry.clone()))
    }

    /// Remove an owned committed reservation. Bypasses the lock phase.
    pub fn cancel_reservation(
        &mut self,
        client: &ClientName,
        reservation_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        self.owned_reservation(client, reservation_id)?;
        self.reservations
            .remove(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))
    }

    /// Drop the pending lock if it is still `lock_id` and its window ended
    /// at or before `now`.
    pub fn expire_lock(&mut self, lock_id: Ulid, now: Ms) -> Option<Reservation> {
        match &self.pending_lock {
            Some(lock) if lock.id == lock_id && lock.span.end <= now => self.pending_lock.take(),
            _ => None,
        }
    }

    fn held_lock(&self, client: &ClientName, lock_id: Ulid) -> Result<&Reservation, EngineError> {
        match &self.pending_lock {
            Some(lock) if lock.is_owned_by(client) && lock.id == lock_id => Ok(lock),
            _ => Err(EngineError::NotLockedByClient(self.id)),
        }
    }

    fn owned_reservation(
        &self,
        client: &ClientName,
        reservation_id: Ulid,
    ) -> Result<&Reservation, EngineError> {
        let reservation = self
            .reservations
            .get(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        if !reservation.is_owned_by(client) {
            return Err(EngineError::NotOwner(reservation_id));
        }
        Ok(reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Ms = 86_400_000;
    const WINDOW: Ms = 5 * 60_000;

    fn resource() -> ResourceState {
        ResourceState::new(Ulid::new(), "Meeting room".into())
    }

    fn alice() -> ClientName {
        "alice".into()
    }

    fn bob() -> ClientName {
        "bob".into()
    }

    fn lock(rs: &mut ResourceState, client: &ClientName) -> Ulid {
        rs.lock(client, 0, WINDOW, LockExpiryPolicy::Advisory)
            .unwrap()
            .id
    }

    fn commit(rs: &mut ResourceState, client: &ClientName, start: Ms, end: Ms) -> Ulid {
        let id = lock(rs, client);
        rs.reserve(client, id, start, end).unwrap();
        id
    }

    #[test]
    fn lock_sets_pending_with_hold_window() {
        let mut rs = resource();
        let lock = rs.lock(&alice(), 1_000, WINDOW, LockExpiryPolicy::Advisory).unwrap();
        assert_eq!(lock.span, Span::new(1_000, 1_000 + WINDOW));
        assert_eq!(lock.owner, alice());
        assert_eq!(rs.pending_lock, Some(lock));
        assert!(rs.reservations.is_empty());
    }

    #[test]
    fn second_lock_fails_even_for_holder() {
        let mut rs = resource();
        let first = lock(&mut rs, &alice());
        let again = rs.lock(&alice(), 0, WINDOW, LockExpiryPolicy::Advisory);
        assert_eq!(again, Err(EngineError::AlreadyLocked(rs.id)));
        let other = rs.lock(&bob(), 0, WINDOW, LockExpiryPolicy::Advisory);
        assert_eq!(other, Err(EngineError::AlreadyLocked(rs.id)));
        assert_eq!(rs.pending_lock.as_ref().map(|l| l.id), Some(first));
    }

    #[test]
    fn advisory_policy_keeps_stale_lock() {
        let mut rs = resource();
        lock(&mut rs, &alice());
        let later = rs.lock(&bob(), 10 * WINDOW, WINDOW, LockExpiryPolicy::Advisory);
        assert!(matches!(later, Err(EngineError::AlreadyLocked(_))));
    }

    #[test]
    fn enforced_policy_replaces_stale_lock() {
        let mut rs = resource();
        lock(&mut rs, &alice());
        let still_live = rs.lock(&bob(), WINDOW - 1, WINDOW, LockExpiryPolicy::Enforced);
        assert!(still_live.is_err());
        let taken = rs.lock(&bob(), WINDOW, WINDOW, LockExpiryPolicy::Enforced).unwrap();
        assert_eq!(taken.owner, bob());
        assert_eq!(rs.pending_lock.as_ref().map(|l| &l.owner), Some(&bob()));
    }

    #[test]
    fn unlock_by_holder() {
        let mut rs = resource();
        let id = lock(&mut rs, &alice());
        let released = rs.unlock(&alice(), id).unwrap();
        assert_eq!(released.id, id);
        assert!(rs.pending_lock.is_none());
    }

    #[test]
    fn unlock_by_other_client_leaves_state() {
        let mut rs = resource();
        let id = lock(&mut rs, &alice());
        let before = rs.pending_lock.clone();
        assert_eq!(rs.unlock(&bob(), id), Err(EngineError::NotLockedByClient(rs.id)));
        assert_eq!(rs.pending_lock, before);
    }

    #[test]
    fn unlock_with_wrong_id_fails() {
        let mut rs = resource();
        lock(&mut rs, &alice());
        assert!(rs.unlock(&alice(), Ulid::new()).is_err());
        assert!(rs.pending_lock.is_some());
    }

    #[test]
    fn unlock_free_resource_fails() {
        let mut rs = resource();
        assert_eq!(
            rs.unlock(&alice(), Ulid::new()),
            Err(EngineError::NotLockedByClient(rs.id))
        );
    }

    #[test]
    fn reserve_commits_and_clears_lock() {
        let mut rs = resource();
        let id = lock(&mut rs, &alice());
        let committed = rs.reserve(&alice(), id, 0, 4 * DAY).unwrap();
        assert_eq!(committed.id, id);
        assert_eq!(committed.span, Span::new(0, 4 * DAY));
        assert!(rs.pending_lock.is_none());
        assert_eq!(rs.reservations.get(&id), Some(&committed));
    }

    #[test]
    fn reserve_with_mismatched_id_keeps_lock() {
        let mut rs = resource();
        let id = lock(&mut rs, &alice());
        let result = rs.reserve(&alice(), Ulid::new(), 0, DAY);
        assert_eq!(result, Err(EngineError::NotLockedByClient(rs.id)));
        assert_eq!(rs.pending_lock.as_ref().map(|l| l.id), Some(id));
        assert!(rs.reservations.is_empty());
    }

    #[test]
    fn reserve_by_non_holder_fails() {
        let mut rs = resource();
        let id = lock(&mut rs, &alice());
        assert!(rs.reserve(&bob(), id, 0, DAY).is_err());
        assert!(rs.pending_lock.is_some());
    }

    #[test]
    fn reserve_without_lock_fails() {
        let mut rs = resource();
        assert!(matches!(
            rs.reserve(&alice(), Ulid::new(), 0, DAY),
            Err(EngineError::NotLockedByClient(_))
        ));
    }

    #[test]
    fn reserve_rejects_empty_and_inverted_spans() {
        let mut rs = resource();
        let id = lock(&mut rs, &alice());
        assert_eq!(
            rs.reserve(&alice(), id, DAY, DAY),
            Err(EngineError::InvalidSpan { start: DAY, end: DAY })
        );
        assert!(matches!(
            rs.reserve(&alice(), id, 2 * DAY, DAY),
            Err(EngineError::InvalidSpan { .. })
        ));
        assert!(rs.pending_lock.is_some());
    }

    #[test]
    fn reserve_overlap_keeps_lock() {
        let mut rs = resource();
        let existing = commit(&mut rs, &alice(), 0, 4 * DAY);
        let id = lock(&mut rs, &bob());
        let result = rs.reserve(&bob(), id, 2 * DAY, 5 * DAY);
        assert_eq!(result, Err(EngineError::Overlap(existing)));
        assert_eq!(rs.pending_lock.as_ref().map(|l| l.id), Some(id));
        assert_eq!(rs.reservations.len(), 1);
    }

    #[test]
    fn reserve_touching_boundary_succeeds() {
        let mut rs = resource();
        commit(&mut rs, &alice(), 0, 4 * DAY);
        let id = lock(&mut rs, &bob());
        assert!(rs.reserve(&bob(), id, 4 * DAY, 6 * DAY).is_ok());
        let id = lock(&mut rs, &bob());
        assert!(rs.reserve(&bob(), id, -2 * DAY, 0).is_ok());
        assert_eq!(rs.reservations.len(), 3);
    }

    #[test]
    fn reserve_ignores_lock_window() {
        let mut rs = resource();
        // The lock window [0, WINDOW) never blocks a commit inside it.
        let id = lock(&mut rs, &alice());
        assert!(rs.reserve(&alice(), id, 0, WINDOW).is_ok());
    }

    #[test]
    fn update_moves_owned_reservation() {
        let mut rs = resource();
        let id = commit(&mut rs, &alice(), 0, 2 * DAY);
        let (before, after) = rs.update_reservation(&alice(), id, 2 * DAY, 4 * DAY).unwrap();
        assert_eq!(before.span, Span::new(0, 2 * DAY));
        assert_eq!(after.span, Span::new(2 * DAY, 4 * DAY));
        assert_eq!(rs.reservations[&id].span, Span::new(2 * DAY, 4 * DAY));
    }

    #[test]
    fn update_may_overlap_its_own_previous_window() {
        let mut rs = resource();
        let id = commit(&mut rs, &alice(), 0, 2 * DAY);
        assert!(rs.update_reservation(&alice(), id, DAY, 3 * DAY).is_ok());
    }

    #[test]
    fn update_overlapping_other_leaves_both() {
        let mut rs = resource();
        let a = commit(&mut rs, &alice(), 0, 2 * DAY);
        let b = commit(&mut rs, &bob(), 3 * DAY, 5 * DAY);
        let result = rs.update_reservation(&alice(), a, DAY, 4 * DAY);
        assert_eq!(result, Err(EngineError::Overlap(b)));
        assert_eq!(rs.reservations[&a].span, Span::new(0, 2 * DAY));
        assert_eq!(rs.reservations[&b].span, Span::new(3 * DAY, 5 * DAY));
    }

    #[test]
    fn update_requires_owner_and_existence() {
        let mut rs = resource();
        let id = commit(&mut rs, &alice(), 0, DAY);
        assert_eq!(
            rs.update_reservation(&bob(), id, DAY, 2 * DAY),
            Err(EngineError::NotOwner(id))
        );
        let missing = Ulid::new();
        assert_eq!(
            rs.update_reservation(&alice(), missing, DAY, 2 * DAY),
            Err(EngineError::ReservationNotFound(missing))
        );
        assert!(matches!(
            rs.update_reservation(&alice(), id, 2 * DAY, DAY),
            Err(EngineError::InvalidSpan { .. })
        ));
        assert_eq!(rs.reservations[&id].span, Span::new(0, DAY));
    }

    #[test]
    fn update_does_not_touch_pending_lock() {
        let mut rs = resource();
        let id = commit(&mut rs, &alice(), 0, DAY);
        let held = lock(&mut rs, &bob());
        rs.update_reservation(&alice(), id, DAY, 2 * DAY).unwrap();
        assert_eq!(rs.pending_lock.as_ref().map(|l| l.id), Some(held));
    }

    #[test]
    fn cancel_twice_is_not_found() {
        let mut rs = resource();
        let id = commit(&mut rs, &alice(), 0, DAY);
        let removed = rs.cancel_reservation(&alice(), id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(
            rs.cancel_reservation(&alice(), id),
            Err(EngineError::ReservationNotFound(id))
        );
        assert!(rs.reservations.is_empty());
    }

    #[test]
    fn cancel_by_non_owner_fails() {
        let mut rs = resource();
        let id = commit(&mut rs, &alice(), 0, DAY);
        assert_eq!(rs.cancel_reservation(&bob(), id), Err(EngineError::NotOwner(id)));
        assert!(rs.reservations.contains_key(&id));
    }

    #[test]
    fn expire_lock_only_after_window() {
        let mut rs = resource();
        let id = lock(&mut rs, &alice());
        assert!(rs.expire_lock(id, WINDOW - 1).is_none());
        assert!(rs.expire_lock(Ulid::new(), WINDOW).is_none());
        assert_eq!(rs.expire_lock(id, WINDOW).map(|l| l.id), Some(id));
        assert!(rs.pending_lock.is_none());
    }

    #[test]
    fn committed_reservations_never_overlap() {
        // Deterministic pseudo-random sequence of attempts.
        let mut rs = resource();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        let clients = [alice(), bob()];
        for _ in 0..500 {
            let client = &clients[(next() % 2) as usize];
            let start = (next() % 100) as Ms * DAY;
            let len = (next() % 5 + 1) as Ms * DAY;
            if let Ok(lock) = rs.lock(client, 0, WINDOW, LockExpiryPolicy::Advisory) {
                if rs.reserve(client, lock.id, start, start + len).is_err() {
                    rs.unlock(client, lock.id).unwrap();
                }
            }
            if next() % 4 == 0
                && let Some(id) = rs.reservations.keys().next().copied()
            {
                let owner = rs.reservations[&id].owner.clone();
                let _ = rs.update_reservation(&owner, id, start, start + len);
            }
        }
        let all: Vec<&Reservation> = rs.reservations.values().collect();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert!(!a.span.overlaps(&b.span), "{a:?} overlaps {b:?}");
            }
        }
    }
}
