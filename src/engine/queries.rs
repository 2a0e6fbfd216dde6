use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Every resource with its committed reservations, in creation order.
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        self.read_each_resource(|rs| Some(ResourceInfo::new(rs)))
            .await
    }

    pub async fn get_reservations(&self, resource_id: Ulid) -> Result<Vec<ReservationInfo>, EngineError> {
        self.with_resource(resource_id, |rs| {
            Ok(rs
                .sorted_reservations()
                .into_iter()
                .map(|r| ReservationInfo::new(rs.id, r))
                .collect())
        })
        .await
    }

    pub async fn get_pending_lock(&self, resource_id: Ulid) -> Result<Option<ReservationInfo>, EngineError> {
        self.with_resource(resource_id, |rs| {
            Ok(rs
                .pending_lock
                .as_ref()
                .map(|l| ReservationInfo::new(rs.id, l)))
        })
        .await
    }

    /// `(resource_id, lock_id)` of every pending lock whose window ended by `now`.
    pub async fn collect_expired_locks(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        self.read_each_resource(|rs| {
            rs.pending_lock
                .as_ref()
                .filter(|l| l.span.end <= now)
                .map(|l| (rs.id, l.id))
        })
        .await
    }
}
