mod approval;
mod conflict;
mod error;
mod mutations;
mod policy;
mod queries;

pub use conflict::ConflictDetector;
pub use error::{EngineError, ErrorKind, ReasonCode};
pub use mutations::{InstanceResult, SeriesOutcome};
pub use policy::{BookingCandidate, PolicyValidator, Rule, Verdict, RULE_CHAIN};

use std::sync::Arc;

use chrono::NaiveDateTime;
use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::{Dispatcher, NotificationSink, NotifyHub};
use crate::settings::OrgPolicy;
use crate::store::Repositories;
use crate::timezone;

/// Everything a decision about one space needs, loaded once per request.
pub(super) struct SpaceContext {
    pub space: Space,
    pub location: Location,
    pub policy: OrgPolicy,
    pub tz: Tz,
}

pub struct Engine {
    pub(super) repos: Repositories,
    pub(super) config: EngineConfig,
    pub(super) clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
    pub(super) dispatcher: Option<Dispatcher>,
    /// Serializes check-then-write per space. The store constraint stays the
    /// final arbiter for writers outside this process.
    pub(super) space_locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(repos: Repositories, config: EngineConfig) -> Self {
        Self {
            repos,
            config,
            clock: Arc::new(SystemClock),
            notify: Arc::new(NotifyHub::new()),
            dispatcher: None,
            space_locks: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach notification sinks. Spawns the delivery workers, so this must be
    /// called inside a tokio runtime.
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        if !sinks.is_empty() {
            self.dispatcher = Some(Dispatcher::spawn(
                sinks,
                self.config.notify_workers,
                self.config.notify_queue,
            ));
        }
        self
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Convert a wall-clock time at `location_id` into an absolute instant.
    pub async fn attach_timezone(
        &self,
        location_id: Ulid,
        naive: NaiveDateTime,
    ) -> Result<Ms, EngineError> {
        let location = self
            .repos
            .locations
            .get_location(location_id)
            .await?
            .ok_or(EngineError::NotFound(location_id))?;
        let policy = OrgPolicy::load(self.repos.settings.as_ref(), location.org_id).await?;
        let tz = self.location_zone(&location, &policy)?;
        Ok(timezone::attach(naive, tz))
    }

    pub(super) fn location_zone(&self, location: &Location, policy: &OrgPolicy) -> Result<Tz, EngineError> {
        let name = timezone::effective_zone_name(
            &location.timezone,
            policy.default_timezone.as_deref(),
            &self.config.fallback_timezone,
        );
        timezone::load_zone(name).inspect_err(|e| {
            tracing::error!("location {}: {e}", location.id);
        })
    }

    /// Load the space, its location and organization policy. Spaces of other
    /// organizations are reported as missing.
    pub(super) async fn space_context(&self, actor: &User, space_id: Ulid) -> Result<SpaceContext, EngineError> {
        let space = self
            .repos
            .spaces
            .get_space(space_id)
            .await?
            .ok_or(EngineError::NotFound(space_id))?;
        let location = self
            .repos
            .locations
            .get_location(space.location_id)
            .await?
            .ok_or(EngineError::NotFound(space_id))?;
        if location.org_id != actor.org_id {
            return Err(EngineError::NotFound(space_id));
        }
        let policy = OrgPolicy::load(self.repos.settings.as_ref(), location.org_id).await?;
        let tz = self.location_zone(&location, &policy)?;
        Ok(SpaceContext { space, location, policy, tz })
    }

    /// Resolve the booking owner: the actor, or another user of the same
    /// organization when a space admin books on their behalf.
    pub(super) async fn resolve_owner(&self, actor: &User, on_behalf_of: Option<Ulid>) -> Result<User, EngineError> {
        match on_behalf_of {
            None => Ok(actor.clone()),
            Some(id) if id == actor.id => Ok(actor.clone()),
            Some(id) => {
                if !actor.is_space_admin() {
                    return Err(EngineError::Forbidden("booking on behalf of others requires space admin"));
                }
                self.load_user(actor, id).await
            }
        }
    }

    pub(super) async fn load_user(&self, actor: &User, id: Ulid) -> Result<User, EngineError> {
        if id == actor.id {
            return Ok(actor.clone());
        }
        match self.repos.users.get_user(id).await? {
            Some(user) if user.org_id == actor.org_id => Ok(user),
            _ => Err(EngineError::NotFound(id)),
        }
    }

    /// Per-space admission lock.
    pub(super) async fn lock_space(&self, space_id: Ulid) -> OwnedMutexGuard<()> {
        let lock = self
            .space_locks
            .entry(space_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Lock two spaces in id order.
    pub(super) async fn lock_spaces(&self, a: Ulid, b: Ulid) -> Vec<OwnedMutexGuard<()>> {
        if a == b {
            return vec![self.lock_space(a).await];
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let g1 = self.lock_space(first).await;
        let g2 = self.lock_space(second).await;
        vec![g1, g2]
    }

    /// Broadcast a committed change and queue it for the sinks.
    pub(super) fn publish(&self, event: Event) {
        self.notify.send(event.space_id(), &event);
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(event);
        }
    }
}
