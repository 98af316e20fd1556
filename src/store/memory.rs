use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::*;

type SharedLedger = Arc<RwLock<SpaceLedger>>;

/// Bookings of one space, sorted by `span.start`.
#[derive(Debug)]
struct SpaceLedger {
    location_id: Ulid,
    bookings: Vec<Booking>,
}

impl SpaceLedger {
    fn new(location_id: Ulid) -> Self {
        Self {
            location_id,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    fn remove(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        let query_start = query.start;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query_start)
    }

    fn first_conflict(&self, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
        self.overlapping(span)
            .find(|b| Some(b.id) != exclude)
            .map(|b| b.id)
    }

    fn get_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }
}

#[derive(Debug, Clone)]
enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// Reference store backed by concurrent maps. Not durable.
///
/// Booking writes take the affected space ledger's write lock, so the
/// overlap check and the write are atomic per space.
pub struct InMemoryStore {
    locations: DashMap<Ulid, Location>,
    spaces: DashMap<Ulid, Space>,
    approvers: DashMap<Ulid, Vec<Ulid>>,
    allowed_bookers: DashMap<Ulid, Vec<Ulid>>,
    ledgers: DashMap<Ulid, SharedLedger>,
    /// Reverse lookup: booking id → space id
    booking_to_space: DashMap<Ulid, Ulid>,
    recurring: DashMap<Ulid, RecurringBooking>,
    memberships: DashMap<Ulid, Vec<Ulid>>,
    users: DashMap<Ulid, User>,
    settings: DashMap<Ulid, HashMap<String, SettingValue>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            locations: DashMap::new(),
            spaces: DashMap::new(),
            approvers: DashMap::new(),
            allowed_bookers: DashMap::new(),
            ledgers: DashMap::new(),
            booking_to_space: DashMap::new(),
            recurring: DashMap::new(),
            memberships: DashMap::new(),
            users: DashMap::new(),
            settings: DashMap::new(),
        }
    }

    // ── Administration ───────────────────────────────────────

    pub fn put_location(&self, location: Location) {
        self.locations.insert(location.id, location);
    }

    /// Create or replace a space with its approver and allowed-booker groups.
    pub fn put_space(&self, space: Space, approver_groups: Vec<Ulid>, allowed_booker_groups: Vec<Ulid>) {
        let id = space.id;
        let location_id = space.location_id;
        self.ledgers
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(SpaceLedger::new(location_id))));
        self.approvers.insert(id, approver_groups);
        self.allowed_bookers.insert(id, allowed_booker_groups);
        self.spaces.insert(id, space);
    }

    /// Remove a space together with its group associations and bookings.
    pub async fn delete_space(&self, id: Ulid) -> StoreResult<()> {
        self.spaces.remove(&id).ok_or(StoreError::NotFound(id))?;
        self.approvers.remove(&id);
        self.allowed_bookers.remove(&id);
        if let Some((_, ledger)) = self.ledgers.remove(&id) {
            let guard = ledger.read().await;
            for booking in &guard.bookings {
                self.booking_to_space.remove(&booking.id);
            }
        }
        Ok(())
    }

    pub fn put_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn add_membership(&self, user_id: Ulid, group_id: Ulid) {
        let mut groups = self.memberships.entry(user_id).or_default();
        if !groups.contains(&group_id) {
            groups.push(group_id);
        }
    }

    pub fn set_bool(&self, org_id: Ulid, key: &str, value: bool) {
        self.put_setting(org_id, key, SettingValue::Bool(value));
    }

    pub fn set_int(&self, org_id: Ulid, key: &str, value: i64) {
        self.put_setting(org_id, key, SettingValue::Int(value));
    }

    pub fn set_string(&self, org_id: Ulid, key: &str, value: impl Into<String>) {
        self.put_setting(org_id, key, SettingValue::Text(value.into()));
    }

    fn put_setting(&self, org_id: Ulid, key: &str, value: SettingValue) {
        self.settings
            .entry(org_id)
            .or_default()
            .insert(key.to_string(), value);
    }

    fn setting(&self, org_id: Ulid, key: &str) -> Option<SettingValue> {
        self.settings.get(&org_id)?.get(key).cloned()
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_space.len()
    }

    pub fn recurring_count(&self) -> usize {
        self.recurring.len()
    }

    // ── Ledger access ────────────────────────────────────────

    fn ledger(&self, space_id: &Ulid) -> Option<SharedLedger> {
        self.ledgers.get(space_id).map(|e| e.value().clone())
    }

    fn all_ledgers(&self) -> Vec<SharedLedger> {
        self.ledgers.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl SpaceRepository for InMemoryStore {
    async fn get_space(&self, id: Ulid) -> StoreResult<Option<Space>> {
        Ok(self.spaces.get(&id).map(|e| e.value().clone()))
    }

    async fn approver_group_ids(&self, space_id: Ulid) -> StoreResult<Vec<Ulid>> {
        Ok(self
            .approvers
            .get(&space_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn allowed_booker_group_ids(&self, space_id: Ulid) -> StoreResult<Vec<Ulid>> {
        Ok(self
            .allowed_bookers
            .get(&space_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn spaces_in_location(&self, location_id: Ulid) -> StoreResult<Vec<Space>> {
        let mut spaces: Vec<Space> = self
            .spaces
            .iter()
            .filter(|e| e.value().location_id == location_id)
            .map(|e| e.value().clone())
            .collect();
        spaces.sort_by_key(|s| s.id);
        Ok(spaces)
    }

    async fn spaces_approved_by(&self, group_ids: &[Ulid]) -> StoreResult<Vec<Ulid>> {
        let mut ids: Vec<Ulid> = self
            .approvers
            .iter()
            .filter(|e| e.value().iter().any(|g| group_ids.contains(g)))
            .map(|e| *e.key())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl LocationRepository for InMemoryStore {
    async fn get_location(&self, id: Ulid) -> StoreResult<Option<Location>> {
        Ok(self.locations.get(&id).map(|e| e.value().clone()))
    }

    async fn locations_in_org(&self, org_id: Ulid) -> StoreResult<Vec<Location>> {
        let mut locations: Vec<Location> = self
            .locations
            .iter()
            .filter(|e| e.value().org_id == org_id)
            .map(|e| e.value().clone())
            .collect();
        locations.sort_by_key(|l| l.id);
        Ok(locations)
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn get_booking(&self, id: Ulid) -> StoreResult<Option<Booking>> {
        let Some(space_id) = self.booking_to_space.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(ledger) = self.ledger(&space_id) else {
            return Ok(None);
        };
        let guard = ledger.read().await;
        Ok(guard.bookings.iter().find(|b| b.id == id).cloned())
    }

    async fn insert_booking(&self, booking: &Booking) -> StoreResult<()> {
        let ledger = self
            .ledger(&booking.space_id)
            .ok_or(StoreError::NotFound(booking.space_id))?;
        let mut guard = ledger.write().await;
        if let Some(existing) = guard.first_conflict(&booking.span, None) {
            return Err(StoreError::Conflict(existing));
        }
        guard.insert(booking.clone());
        self.booking_to_space.insert(booking.id, booking.space_id);
        Ok(())
    }

    async fn update_booking(&self, booking: &Booking) -> StoreResult<()> {
        let old_space = self
            .booking_to_space
            .get(&booking.id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(booking.id))?;
        let target = self
            .ledger(&booking.space_id)
            .ok_or(StoreError::NotFound(booking.space_id))?;

        if old_space == booking.space_id {
            let mut guard = target.write().await;
            if let Some(existing) = guard.first_conflict(&booking.span, Some(booking.id)) {
                return Err(StoreError::Conflict(existing));
            }
            guard.remove(booking.id).ok_or(StoreError::NotFound(booking.id))?;
            guard.insert(booking.clone());
            return Ok(());
        }

        let source = self
            .ledger(&old_space)
            .ok_or(StoreError::NotFound(old_space))?;
        // Acquire write locks in id order to prevent deadlocks.
        let (mut source_guard, mut target_guard) = if old_space < booking.space_id {
            let s = source.write_owned().await;
            let t = target.write_owned().await;
            (s, t)
        } else {
            let t = target.write_owned().await;
            let s = source.write_owned().await;
            (s, t)
        };
        if let Some(existing) = target_guard.first_conflict(&booking.span, Some(booking.id)) {
            return Err(StoreError::Conflict(existing));
        }
        source_guard
            .remove(booking.id)
            .ok_or(StoreError::NotFound(booking.id))?;
        target_guard.insert(booking.clone());
        self.booking_to_space.insert(booking.id, booking.space_id);
        Ok(())
    }

    async fn delete_booking(&self, id: Ulid) -> StoreResult<()> {
        let space_id = self
            .booking_to_space
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))?;
        let ledger = self.ledger(&space_id).ok_or(StoreError::NotFound(space_id))?;
        let mut guard = ledger.write().await;
        guard.remove(id).ok_or(StoreError::NotFound(id))?;
        self.booking_to_space.remove(&id);
        Ok(())
    }

    async fn find_conflicts(
        &self,
        space_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> StoreResult<Vec<Booking>> {
        let Some(ledger) = self.ledger(&space_id) else {
            return Ok(Vec::new());
        };
        let guard = ledger.read().await;
        Ok(guard
            .overlapping(&span)
            .filter(|b| Some(b.id) != exclude)
            .cloned()
            .collect())
    }

    async fn count_concurrent_in_location(
        &self,
        location_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> StoreResult<u32> {
        let mut count = 0u32;
        for ledger in self.all_ledgers() {
            let guard = ledger.read().await;
            if guard.location_id != location_id {
                continue;
            }
            count += guard
                .overlapping(&span)
                .filter(|b| Some(b.id) != exclude)
                .count() as u32;
        }
        Ok(count)
    }

    async fn count_upcoming_for_user(&self, user_id: Ulid, now: Ms) -> StoreResult<u32> {
        let mut count = 0u32;
        for ledger in self.all_ledgers() {
            let guard = ledger.read().await;
            count += guard
                .bookings
                .iter()
                .filter(|b| b.user_id == user_id && b.span.end > now)
                .count() as u32;
        }
        Ok(count)
    }

    async fn count_overlapping_for_user(
        &self,
        user_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> StoreResult<u32> {
        let mut count = 0u32;
        for ledger in self.all_ledgers() {
            let guard = ledger.read().await;
            count += guard
                .overlapping(&span)
                .filter(|b| b.user_id == user_id && Some(b.id) != exclude)
                .count() as u32;
        }
        Ok(count)
    }

    async fn find_by_recurring(&self, recurring_id: Ulid) -> StoreResult<Vec<Booking>> {
        let mut found = Vec::new();
        for ledger in self.all_ledgers() {
            let guard = ledger.read().await;
            found.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.recurring_id == Some(recurring_id))
                    .cloned(),
            );
        }
        found.sort_by_key(|b| b.span.start);
        Ok(found)
    }

    async fn clear_recurring_link(&self, booking_id: Ulid) -> StoreResult<()> {
        let space_id = self
            .booking_to_space
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(booking_id))?;
        let ledger = self.ledger(&space_id).ok_or(StoreError::NotFound(space_id))?;
        let mut guard = ledger.write().await;
        let booking = guard
            .get_mut(booking_id)
            .ok_or(StoreError::NotFound(booking_id))?;
        booking.recurring_id = None;
        Ok(())
    }

    async fn find_pending_in_spaces(&self, space_ids: &[Ulid], now: Ms) -> StoreResult<Vec<Booking>> {
        let mut found = Vec::new();
        for space_id in space_ids {
            let Some(ledger) = self.ledger(space_id) else {
                continue;
            };
            let guard = ledger.read().await;
            found.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| !b.approved && b.span.end > now)
                    .cloned(),
            );
        }
        found.sort_by_key(|b| b.span.start);
        Ok(found)
    }
}

#[async_trait]
impl RecurringRepository for InMemoryStore {
    async fn get_recurring(&self, id: Ulid) -> StoreResult<Option<RecurringBooking>> {
        Ok(self.recurring.get(&id).map(|e| e.value().clone()))
    }

    async fn insert_recurring(&self, series: &RecurringBooking) -> StoreResult<()> {
        self.recurring.insert(series.id, series.clone());
        Ok(())
    }

    async fn delete_recurring(&self, id: Ulid) -> StoreResult<()> {
        self.recurring
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}

#[async_trait]
impl GroupRepository for InMemoryStore {
    async fn memberships_of(&self, user_id: Ulid) -> StoreResult<Vec<Ulid>> {
        Ok(self
            .memberships
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn get_user(&self, id: Ulid) -> StoreResult<Option<User>> {
        Ok(self.users.get(&id).map(|e| e.value().clone()))
    }
}

#[async_trait]
impl SettingsRepository for InMemoryStore {
    async fn get_bool(&self, org_id: Ulid, key: &str) -> StoreResult<Option<bool>> {
        Ok(match self.setting(org_id, key) {
            Some(SettingValue::Bool(v)) => Some(v),
            _ => None,
        })
    }

    async fn get_int(&self, org_id: Ulid, key: &str) -> StoreResult<Option<i64>> {
        Ok(match self.setting(org_id, key) {
            Some(SettingValue::Int(v)) => Some(v),
            _ => None,
        })
    }

    async fn get_string(&self, org_id: Ulid, key: &str) -> StoreResult<Option<String>> {
        Ok(match self.setting(org_id, key) {
            Some(SettingValue::Text(v)) => Some(v),
            _ => None,
        })
    }
}
