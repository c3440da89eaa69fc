//! Slot availability.

use agenda_core::{AppointmentId, SlotKey};

use crate::db::{AppointmentStore, RepositoryError};

/// Whether `slot` holds no live appointment other than `exclude`.
///
/// # Errors
///
/// Returns `RepositoryError` if the store cannot be queried.
pub async fn is_available(
    store: &dyn AppointmentStore,
    slot: &SlotKey,
    exclude: Option<AppointmentId>,
) -> Result<bool, RepositoryError> {
    Ok(store.count_live_in_slot(slot, exclude).await? == 0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use agenda_core::{AppointmentDate, AppointmentStatus, TenantId};

    use super::*;
    use crate::testing::{InMemoryAppointmentStore, new_booking};

    fn slot(tenant: &str, time: &str) -> SlotKey {
        SlotKey::new(
            TenantId::new(tenant),
            AppointmentDate::parse("2024-05-01").unwrap(),
            time,
        )
    }

    #[tokio::test]
    async fn test_empty_slot_is_available() {
        let store = InMemoryAppointmentStore::new();
        assert!(is_available(&store, &slot("t1", "09:00"), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_live_occupant_blocks_slot() {
        let store = InMemoryAppointmentStore::new();
        store
            .book(new_booking("t1", "2024-05-01", "09:00"))
            .await
            .unwrap();

        assert!(!is_available(&store, &slot("t1", "09:00"), None).await.unwrap());
        assert!(is_available(&store, &slot("t1", "10:00"), None).await.unwrap());
        assert!(is_available(&store, &slot("t2", "09:00"), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_excluded_appointment_does_not_conflict_with_itself() {
        let store = InMemoryAppointmentStore::new();
        let booked = store
            .book(new_booking("t1", "2024-05-01", "09:00"))
            .await
            .unwrap();

        assert!(
            is_available(&store, &slot("t1", "09:00"), Some(booked.id))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_cancelled_occupant_does_not_block() {
        let store = InMemoryAppointmentStore::new();
        let booked = store
            .book(new_booking("t1", "2024-05-01", "09:00"))
            .await
            .unwrap();
        store
            .transition(
                &booked.tenant_id,
                booked.id,
                AppointmentStatus::cancellable_from(),
                AppointmentStatus::Cancelled,
            )
            .await
            .unwrap();

        assert!(is_available(&store, &slot("t1", "09:00"), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_slot_label_is_compared_exactly() {
        let store = InMemoryAppointmentStore::new();
        store
            .book(new_booking("t1", "2024-05-01", "09:00"))
            .await
            .unwrap();

        assert!(is_available(&store, &slot("t1", "9:00"), None).await.unwrap());
    }
}
