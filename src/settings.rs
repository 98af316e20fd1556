use ulid::Ulid;

use crate::store::{SettingsRepository, StoreResult};

pub const DAILY_BASIS_BOOKING: &str = "daily_basis_booking";
pub const NO_ADMIN_RESTRICTIONS: &str = "no_admin_restrictions";
pub const MAX_DAYS_IN_ADVANCE: &str = "max_days_in_advance";
pub const MAX_BOOKING_DURATION_HOURS: &str = "max_booking_duration_hours";
pub const MAX_CONCURRENT_BOOKINGS_PER_USER: &str = "max_concurrent_bookings_per_user";
pub const MIN_BOOKING_DURATION_HOURS: &str = "min_booking_duration_hours";
pub const MAX_BOOKINGS_PER_USER: &str = "max_bookings_per_user";
pub const MAX_HOURS_BEFORE_DELETE: &str = "max_hours_before_delete";
pub const ENABLE_MAX_HOURS_BEFORE_DELETE: &str = "enable_max_hours_before_delete";
pub const FEATURE_GROUPS: &str = "feature_groups";
pub const DEFAULT_TIMEZONE: &str = "default_timezone";

/// Booking limits and switches of one organization, with defaults applied
/// for unset keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgPolicy {
    pub daily_basis_booking: bool,
    pub no_admin_restrictions: bool,
    pub max_days_in_advance: i64,
    pub max_booking_duration_hours: i64,
    /// 0 = unlimited
    pub max_concurrent_bookings_per_user: i64,
    pub min_booking_duration_hours: i64,
    /// 0 = unlimited
    pub max_bookings_per_user: i64,
    pub max_hours_before_delete: i64,
    pub enable_max_hours_before_delete: bool,
    pub groups_enabled: bool,
    pub default_timezone: Option<String>,
}

impl Default for OrgPolicy {
    fn default() -> Self {
        Self {
            daily_basis_booking: false,
            no_admin_restrictions: false,
            max_days_in_advance: 14,
            max_booking_duration_hours: 12,
            max_concurrent_bookings_per_user: 0,
            min_booking_duration_hours: 0,
            max_bookings_per_user: 10,
            max_hours_before_delete: 0,
            enable_max_hours_before_delete: false,
            groups_enabled: true,
            default_timezone: None,
        }
    }
}

impl OrgPolicy {
    pub async fn load(settings: &dyn SettingsRepository, org_id: Ulid) -> StoreResult<Self> {
        let d = Self::default();
        let s = settings;
        Ok(Self {
            daily_basis_booking: flag(s, org_id, DAILY_BASIS_BOOKING, d.daily_basis_booking).await?,
            no_admin_restrictions: flag(s, org_id, NO_ADMIN_RESTRICTIONS, d.no_admin_restrictions).await?,
            max_days_in_advance: int(s, org_id, MAX_DAYS_IN_ADVANCE, d.max_days_in_advance).await?,
            max_booking_duration_hours: int(
                s,
                org_id,
                MAX_BOOKING_DURATION_HOURS,
                d.max_booking_duration_hours,
            )
            .await?,
            max_concurrent_bookings_per_user: int(
                s,
                org_id,
                MAX_CONCURRENT_BOOKINGS_PER_USER,
                d.max_concurrent_bookings_per_user,
            )
            .await?,
            min_booking_duration_hours: int(
                s,
                org_id,
                MIN_BOOKING_DURATION_HOURS,
                d.min_booking_duration_hours,
            )
            .await?,
            max_bookings_per_user: int(s, org_id, MAX_BOOKINGS_PER_USER, d.max_bookings_per_user).await?,
            max_hours_before_delete: int(s, org_id, MAX_HOURS_BEFORE_DELETE, d.max_hours_before_delete)
                .await?,
            enable_max_hours_before_delete: flag(
                s,
                org_id,
                ENABLE_MAX_HOURS_BEFORE_DELETE,
                d.enable_max_hours_before_delete,
            )
            .await?,
            groups_enabled: flag(s, org_id, FEATURE_GROUPS, d.groups_enabled).await?,
            default_timezone: s
                .get_string(org_id, DEFAULT_TIMEZONE)
                .await?
                .filter(|z| !z.trim().is_empty()),
        })
    }
}

async fn flag(s: &dyn SettingsRepository, org_id: Ulid, key: &str, default: bool) -> StoreResult<bool> {
    Ok(s.get_bool(org_id, key).await?.unwrap_or(default))
}

async fn int(s: &dyn SettingsRepository, org_id: Ulid, key: &str, default: i64) -> StoreResult<i64> {
    Ok(s.get_int(org_id, key).await?.unwrap_or(default))
}
