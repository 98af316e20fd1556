//! Persistence contracts consumed by the engine.
//!
//! The engine never talks to a database directly: every read and write goes
//! through these traits, injected at construction via [`Repositories`].
//! Implementations must enforce the per-space no-overlap constraint on
//! booking insert/update and report a violation as [`StoreError::Conflict`].

mod memory;

pub use memory::InMemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    /// Write rejected by the uniqueness constraint; carries the booking that
    /// already holds the slot.
    Conflict(Ulid),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Conflict(id) => write!(f, "slot held by booking {id}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SpaceRepository: Send + Sync {
    async fn get_space(&self, id: Ulid) -> StoreResult<Option<Space>>;
    async fn approver_group_ids(&self, space_id: Ulid) -> StoreResult<Vec<Ulid>>;
    async fn allowed_booker_group_ids(&self, space_id: Ulid) -> StoreResult<Vec<Ulid>>;
    async fn spaces_in_location(&self, location_id: Ulid) -> StoreResult<Vec<Space>>;
    /// Ids of spaces that list any of `group_ids` as an approver group.
    async fn spaces_approved_by(&self, group_ids: &[Ulid]) -> StoreResult<Vec<Ulid>>;
}

#[async_trait]
pub trait LocationRepository: Send + Sync {
    async fn get_location(&self, id: Ulid) -> StoreResult<Option<Location>>;
    async fn locations_in_org(&self, org_id: Ulid) -> StoreResult<Vec<Location>>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get_booking(&self, id: Ulid) -> StoreResult<Option<Booking>>;
    async fn insert_booking(&self, booking: &Booking) -> StoreResult<()>;
    /// Replace a booking by id. The booking may move to another space.
    async fn update_booking(&self, booking: &Booking) -> StoreResult<()>;
    async fn delete_booking(&self, id: Ulid) -> StoreResult<()>;

    async fn find_conflicts(
        &self,
        space_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> StoreResult<Vec<Booking>>;
    async fn count_concurrent_in_location(
        &self,
        location_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> StoreResult<u32>;
    /// Bookings of the user that have not ended at `now`.
    async fn count_upcoming_for_user(&self, user_id: Ulid, now: Ms) -> StoreResult<u32>;
    async fn count_overlapping_for_user(
        &self,
        user_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> StoreResult<u32>;

    async fn find_by_recurring(&self, recurring_id: Ulid) -> StoreResult<Vec<Booking>>;
    async fn clear_recurring_link(&self, booking_id: Ulid) -> StoreResult<()>;
    /// Unapproved bookings in the given spaces that have not ended at `now`.
    async fn find_pending_in_spaces(&self, space_ids: &[Ulid], now: Ms) -> StoreResult<Vec<Booking>>;
}

#[async_trait]
pub trait RecurringRepository: Send + Sync {
    async fn get_recurring(&self, id: Ulid) -> StoreResult<Option<RecurringBooking>>;
    async fn insert_recurring(&self, series: &RecurringBooking) -> StoreResult<()>;
    async fn delete_recurring(&self, id: Ulid) -> StoreResult<()>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn memberships_of(&self, user_id: Ulid) -> StoreResult<Vec<Ulid>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, id: Ulid) -> StoreResult<Option<User>>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get_bool(&self, org_id: Ulid, key: &str) -> StoreResult<Option<bool>>;
    async fn get_int(&self, org_id: Ulid, key: &str) -> StoreResult<Option<i64>>;
    async fn get_string(&self, org_id: Ulid, key: &str) -> StoreResult<Option<String>>;
}

/// All collaborators the engine reads and writes through.
#[derive(Clone)]
pub struct Repositories {
    pub spaces: Arc<dyn SpaceRepository>,
    pub locations: Arc<dyn LocationRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub recurring: Arc<dyn RecurringRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub users: Arc<dyn UserRepository>,
    pub settings: Arc<dyn SettingsRepository>,
}

impl Repositories {
    /// Use one backend for every contract.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: SpaceRepository
            + LocationRepository
            + BookingRepository
            + RecurringRepository
            + GroupRepository
            + UserRepository
            + SettingsRepository
            + 'static,
    {
        Self {
            spaces: store.clone(),
            locations: store.clone(),
            bookings: store.clone(),
            recurring: store.clone(),
            groups: store.clone(),
            users: store.clone(),
            settings: store,
        }
    }
}
