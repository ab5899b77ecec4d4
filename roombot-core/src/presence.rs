// ABOUTME: Room presence controller: admission, owner approval/leave voting, eviction timers.
// ABOUTME: Every state change for a room runs on that room's action queue; reconnects back off.

use crate::dispatcher::EventDispatcherFactory;
use crate::error::{ConnectError, PresenceError, VoteError};
use crate::metrics;
use crate::notices;
use crate::queue::{ActionHandle, RoomActionQueues};
use crate::reconnect::{BackoffConfig, BackoffState};
use crate::room::{RoomIdentity, UserId};
use crate::traits::{AclDataAccessor, ChatTransport, ConnectionSink, PostFlags, RoomStorage};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Most approve votes ever required, however many owners a room has
pub const MAX_REQUIRED_APPROVE_VOTES: usize = 3;
/// Most leave votes ever required
pub const MAX_REQUIRED_LEAVE_VOTES: usize = 2;

/// `min(ceil(owners / 2), 3)`
pub fn required_approve_votes(owner_count: usize) -> usize {
    owner_count.div_ceil(2).min(MAX_REQUIRED_APPROVE_VOTES)
}

/// `min(owners, 2)`
pub fn required_leave_votes(owner_count: usize) -> usize {
    owner_count.min(MAX_REQUIRED_LEAVE_VOTES)
}

/// Timing and wording knobs for the controller
#[derive(Debug, Clone)]
pub struct PresenceSettings {
    /// First reminder, relative to the invite timestamp
    pub first_reminder: ChronoDuration,
    /// Second reminder, relative to the invite timestamp
    pub second_reminder: ChronoDuration,
    /// Eviction of an unapproved room, relative to the invite timestamp
    pub eviction: ChronoDuration,
    /// Command invoker quoted in notices
    pub invoker: String,
    pub backoff: BackoffConfig,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            first_reminder: ChronoDuration::hours(12),
            second_reminder: ChronoDuration::hours(23),
            eviction: ChronoDuration::hours(24),
            invoker: crate::commands::DEFAULT_INVOKER.to_string(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Which scheduled action a timer triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    FirstReminder,
    SecondReminder,
    Eviction,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstReminder => "first_reminder",
            Self::SecondReminder => "second_reminder",
            Self::Eviction => "eviction",
        }
    }
}

struct ScheduledTimer {
    kind: TimerKind,
    due: DateTime<Utc>,
    task: AbortHandle,
}

/// Result of an accepted vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    pub threshold_reached: bool,
    pub count: usize,
    pub required: usize,
}

/// Result of admitting a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// The inviter's own vote was enough to approve the room
    pub approved: bool,
    pub votes: usize,
    pub required: usize,
}

/// How restoring one room at startup ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Connected,
    Evicted,
    Abandoned,
}

/// Per-room results of `restore_rooms`
#[derive(Debug, Default)]
pub struct RestoreSummary {
    pub connected: Vec<RoomIdentity>,
    pub evicted: Vec<RoomIdentity>,
    pub abandoned: Vec<RoomIdentity>,
    pub failed: Vec<(RoomIdentity, String)>,
}

struct PresenceInner {
    transport: Arc<dyn ChatTransport>,
    storage: Arc<dyn RoomStorage>,
    acl: Arc<dyn AclDataAccessor>,
    dispatch: OnceLock<EventDispatcherFactory>,
    queues: RoomActionQueues,
    timers: Mutex<HashMap<RoomIdentity, Vec<ScheduledTimer>>>,
    permanent: RwLock<HashSet<RoomIdentity>>,
    settings: PresenceSettings,
}

/// Orchestrates which rooms the bot is in.
///
/// Cheap to clone; all clones share the same queues, timers and registry.
#[derive(Clone)]
pub struct RoomPresenceController {
    inner: Arc<PresenceInner>,
}

/// Non-owning reference held by dispatchers, timers and built-ins
#[derive(Clone, Default)]
pub struct WeakPresence(Weak<PresenceInner>);

impl WeakPresence {
    /// A reference that never upgrades (dispatchers without a controller)
    pub fn detached() -> Self {
        Self(Weak::new())
    }

    pub fn upgrade(&self) -> Option<RoomPresenceController> {
        self.0
            .upgrade()
            .map(|inner| RoomPresenceController { inner })
    }
}

impl RoomPresenceController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        storage: Arc<dyn RoomStorage>,
        acl: Arc<dyn AclDataAccessor>,
        settings: PresenceSettings,
    ) -> Self {
        Self {
            inner: Arc::new(PresenceInner {
                transport,
                storage,
                acl,
                dispatch: OnceLock::new(),
                queues: RoomActionQueues::new(),
                timers: Mutex::new(HashMap::new()),
                permanent: RwLock::new(HashSet::new()),
                settings,
            }),
        }
    }

    /// Install the factory used to build each room's event sink. Only the first call counts.
    pub fn install_dispatch(&self, factory: EventDispatcherFactory) {
        if self.inner.dispatch.set(factory).is_err() {
            tracing::warn!("Dispatcher factory already installed, ignoring");
        }
    }

    pub fn downgrade(&self) -> WeakPresence {
        WeakPresence(Arc::downgrade(&self.inner))
    }

    pub fn settings(&self) -> &PresenceSettings {
        &self.inner.settings
    }

    pub fn queues(&self) -> &RoomActionQueues {
        &self.inner.queues
    }

    pub fn is_permanent(&self, room: &RoomIdentity) -> bool {
        self.inner
            .permanent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(room)
    }

    /// Permanent, or persisted as a transient room
    pub async fn is_tracked(&self, room: &RoomIdentity) -> Result<bool> {
        if self.is_permanent(room) {
            return Ok(true);
        }
        self.inner.storage.contains_room(room).await
    }

    pub async fn required_approve_vote_count(&self, room: &RoomIdentity) -> Result<usize> {
        let owners = self.inner.acl.get_room_owners(room).await?;
        Ok(required_approve_votes(owners.len()))
    }

    pub async fn required_leave_vote_count(&self, room: &RoomIdentity) -> Result<usize> {
        let owners = self.inner.acl.get_room_owners(room).await?;
        Ok(required_leave_votes(owners.len()))
    }

    /// Timers still waiting to fire for a room, in schedule order
    pub fn pending_timers(&self, room: &RoomIdentity) -> Vec<(TimerKind, DateTime<Utc>)> {
        let timers = self
            .inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        timers
            .get(room)
            .map(|scheduled| {
                scheduled
                    .iter()
                    .filter(|t| !t.task.is_finished())
                    .map(|t| (t.kind, t.due))
                    .collect()
            })
            .unwrap_or_default()
    }

    // =========================================================================
    // Public, queued operations
    // =========================================================================

    /// Admit a room the bot was invited to
    pub async fn add_room(
        &self,
        room: &RoomIdentity,
        inviting_user: UserId,
    ) -> Result<Admission, PresenceError> {
        let this = self.clone();
        let target = room.clone();
        self.inner
            .queues
            .enqueue(room, async move { this.admit_room(&target, inviting_user).await })
            .await?
    }

    pub async fn add_approve_vote(
        &self,
        room: &RoomIdentity,
        user_id: UserId,
    ) -> Result<VoteTally, VoteError> {
        let this = self.clone();
        let target = room.clone();
        self.inner
            .queues
            .enqueue(room, async move {
                let tally = this.cast_approve_vote(&target, user_id).await?;
                if tally.threshold_reached {
                    this.post_forced(&target, &notices::approved(&this.inner.settings.invoker))
                        .await;
                }
                Ok(tally)
            })
            .await?
    }

    pub async fn add_leave_vote(
        &self,
        room: &RoomIdentity,
        user_id: UserId,
    ) -> Result<VoteTally, VoteError> {
        let this = self.clone();
        let target = room.clone();
        self.inner
            .queues
            .enqueue(room, async move { this.cast_leave_vote(&target, user_id).await })
            .await?
    }

    /// Queue a reconnect check after the transport lost a room.
    ///
    /// The handle resolves to whether the room is connected again.
    pub fn process_disconnect(&self, room: &RoomIdentity) -> ActionHandle<Result<bool>> {
        let this = self.clone();
        let target = room.clone();
        self.inner.queues.enqueue(room, async move {
            let result = this.reconnect_if_tracked(&target).await;
            if let Err(e) = &result {
                tracing::error!(room = %target, error = %e, "Reconnect after disconnect failed");
            }
            result
        })
    }

    /// Bring every known room back after a restart.
    ///
    /// Permanent rooms are always connected. Stored rooms whose grace period
    /// ran out unapproved are evicted; the rest reconnect and get their timers
    /// re-armed from the stored invite timestamp. A failure in one room does
    /// not stop the others.
    pub async fn restore_rooms(&self, permanent_rooms: &[RoomIdentity]) -> Result<RestoreSummary> {
        {
            let mut permanent = self
                .inner
                .permanent
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            permanent.extend(permanent_rooms.iter().cloned());
        }

        let mut handles = Vec::new();
        for room in permanent_rooms {
            let this = self.clone();
            let target = room.clone();
            let handle = self.inner.queues.enqueue(room, async move {
                let outcome = if this.reconnect(&target).await? {
                    RestoreOutcome::Connected
                } else {
                    RestoreOutcome::Abandoned
                };
                Ok::<_, anyhow::Error>(outcome)
            });
            handles.push((room.clone(), handle));
        }

        let stored = self
            .inner
            .storage
            .get_all_rooms()
            .await
            .context("Failed to list stored rooms")?;
        for room in stored {
            if self.is_permanent(&room) {
                tracing::warn!(room = %room, "Stored room is also permanent, skipping stored state");
                continue;
            }
            let this = self.clone();
            let target = room.clone();
            let handle = self
                .inner
                .queues
                .enqueue(&room, async move { this.restore_stored_room(&target).await });
            handles.push((room, handle));
        }

        let mut summary = RestoreSummary::default();
        for (room, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(e.into()),
            };
            match outcome {
                Ok(RestoreOutcome::Connected) => summary.connected.push(room),
                Ok(RestoreOutcome::Evicted) => summary.evicted.push(room),
                Ok(RestoreOutcome::Abandoned) => summary.abandoned.push(room),
                Err(e) => {
                    tracing::error!(room = %room, error = %e, "Failed to restore room");
                    summary.failed.push((room, format!("{:#}", e)));
                }
            }
        }

        tracing::info!(
            connected = summary.connected.len(),
            evicted = summary.evicted.len(),
            abandoned = summary.abandoned.len(),
            failed = summary.failed.len(),
            "Room restore finished"
        );
        Ok(summary)
    }

    // =========================================================================
    // Queue-internal steps (must only run on the room's queue)
    // =========================================================================

    async fn admit_room(
        &self,
        room: &RoomIdentity,
        inviting_user: UserId,
    ) -> Result<Admission, PresenceError> {
        if self.is_permanent(room) {
            return Err(PresenceError::PermanentRoom(room.clone()));
        }
        if self.inner.storage.contains_room(room).await? {
            return Err(PresenceError::AlreadyTracked(room.clone()));
        }

        self.connect_once(room)
            .await
            .map_err(|source| PresenceError::Connect {
                room: room.clone(),
                source,
            })?;

        let invited_at = Utc::now();
        self.inner.storage.add_room(room, invited_at).await?;
        self.schedule_timers(room, invited_at);
        metrics::record_room_admitted();
        tracing::info!(room = %room, inviting_user, "Admitted room");

        let tally = match self.cast_approve_vote(room, inviting_user).await {
            Ok(tally) => Some(tally),
            Err(VoteError::Other(e)) => return Err(PresenceError::Other(e)),
            Err(e) => {
                tracing::debug!(room = %room, inviting_user, reason = %e, "Inviter vote not counted");
                None
            }
        };

        let admission = match tally {
            Some(tally) => Admission {
                approved: tally.threshold_reached,
                votes: tally.count,
                required: tally.required,
            },
            None => Admission {
                approved: self.inner.storage.is_approved(room).await?,
                votes: self.inner.storage.get_approve_votes(room).await?.len(),
                required: self.required_approve_vote_count(room).await?,
            },
        };

        let inviter = match self
            .inner
            .transport
            .get_pingable_name(room, inviting_user)
            .await
        {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!(room = %room, inviting_user, error = %e, "Could not look up inviter name");
                None
            }
        };

        let settings = &self.inner.settings;
        for line in notices::welcome(
            inviter.as_deref(),
            admission.approved,
            admission.votes,
            admission.required,
            &settings.invoker,
            settings.eviction.num_hours(),
        ) {
            self.post_forced(room, &line).await;
        }

        Ok(admission)
    }

    /// Votes are only meaningful for transient rooms the bot is tracking
    async fn ensure_votable(&self, room: &RoomIdentity) -> Result<(), VoteError> {
        if self.is_permanent(room) || !self.inner.storage.contains_room(room).await? {
            return Err(VoteError::RoomNotTracked(room.clone()));
        }
        Ok(())
    }

    async fn cast_approve_vote(
        &self,
        room: &RoomIdentity,
        user_id: UserId,
    ) -> Result<VoteTally, VoteError> {
        self.ensure_votable(room).await?;
        let storage = &self.inner.storage;

        if storage.is_approved(room).await? {
            return Err(VoteError::AlreadyApproved);
        }
        if !self.inner.acl.is_room_owner(room, user_id).await? {
            return Err(VoteError::UserNotAcceptable);
        }
        if storage.contains_approve_vote(room, user_id).await? {
            return Err(VoteError::UserAlreadyVoted);
        }

        storage.add_approve_vote(room, user_id).await?;
        metrics::record_vote("approve");
        let count = storage.get_approve_votes(room).await?.len();
        let required = self.required_approve_vote_count(room).await?;
        let threshold_reached = count >= required;

        tracing::info!(room = %room, user_id, count, required, "Approve vote recorded");
        if threshold_reached {
            storage.set_approved(room, true).await?;
            self.cancel_timers(room);
            tracing::info!(room = %room, "Room approved");
        }

        Ok(VoteTally {
            threshold_reached,
            count,
            required,
        })
    }

    async fn cast_leave_vote(
        &self,
        room: &RoomIdentity,
        user_id: UserId,
    ) -> Result<VoteTally, VoteError> {
        self.ensure_votable(room).await?;
        let storage = &self.inner.storage;

        if !self.inner.acl.is_room_owner(room, user_id).await? {
            return Err(VoteError::UserNotAcceptable);
        }
        if storage.contains_leave_vote(room, user_id).await? {
            return Err(VoteError::UserAlreadyVoted);
        }

        storage.add_leave_vote(room, user_id).await?;
        metrics::record_vote("leave");
        let count = storage.get_leave_votes(room).await?.len();
        let required = self.required_leave_vote_count(room).await?;
        let threshold_reached = count >= required;

        tracing::info!(room = %room, user_id, count, required, "Leave vote recorded");
        if threshold_reached {
            self.post_forced(room, &notices::goodbye()).await;
            self.leave_room(room, "vote").await?;
        }

        Ok(VoteTally {
            threshold_reached,
            count,
            required,
        })
    }

    /// Clear approval, cancel timers, then leave and forget the room concurrently
    async fn leave_room(&self, room: &RoomIdentity, reason: &'static str) -> Result<()> {
        assert!(
            !self.is_permanent(room),
            "attempted to leave permanent room {}",
            room
        );

        self.inner.storage.set_approved(room, false).await?;
        self.cancel_timers(room);

        let (left, removed) = tokio::join!(
            self.inner.transport.leave_room(room),
            self.inner.storage.remove_room(room)
        );
        if let Err(e) = left {
            tracing::warn!(room = %room, error = %e, "Transport failed to leave room");
        }
        removed.with_context(|| format!("Failed to remove room {} from storage", room))?;

        metrics::record_room_evicted(reason);
        tracing::info!(room = %room, reason, "Left room");
        Ok(())
    }

    async fn restore_stored_room(&self, room: &RoomIdentity) -> Result<RestoreOutcome> {
        let storage = &self.inner.storage;
        let invited_at = match storage.get_invite_timestamp(room).await? {
            Some(ts) => ts,
            None => {
                tracing::warn!(room = %room, "Stored room has no invite timestamp, restarting its grace period");
                Utc::now()
            }
        };
        let approved = storage.is_approved(room).await?;

        if !approved && Utc::now() >= invited_at + self.inner.settings.eviction {
            tracing::info!(room = %room, invited_at = %invited_at, "Grace period elapsed while offline, evicting");
            self.leave_room(room, "expired").await?;
            return Ok(RestoreOutcome::Evicted);
        }

        if !self.reconnect(room).await? {
            return Ok(RestoreOutcome::Abandoned);
        }
        if !approved {
            self.schedule_timers(room, invited_at);
        }
        Ok(RestoreOutcome::Connected)
    }

    async fn reconnect_if_tracked(&self, room: &RoomIdentity) -> Result<bool> {
        if !self.is_tracked(room).await? {
            tracing::debug!(room = %room, "Disconnected from untracked room, not reconnecting");
            return Ok(false);
        }
        self.reconnect(room).await
    }

    // =========================================================================
    // Connection
    // =========================================================================

    fn sink_for(&self, room: &RoomIdentity) -> Result<Arc<dyn ConnectionSink>> {
        let factory = self
            .inner
            .dispatch
            .get()
            .context("Dispatcher factory not installed")?;
        Ok(factory.create(room, self.downgrade()))
    }

    async fn connect_once(&self, room: &RoomIdentity) -> Result<(), ConnectError> {
        let sink = self.sink_for(room).map_err(ConnectError::Fatal)?;
        metrics::record_reconnect_attempt();
        self.inner.transport.connect(room, sink).await
    }

    /// Connect with linear backoff.
    ///
    /// Returns `Ok(false)` if the room was abandoned after the attempt ceiling
    /// and `Err` on a fatal connection failure.
    async fn reconnect(&self, room: &RoomIdentity) -> Result<bool> {
        let sink = self.sink_for(room)?;
        let mut backoff = BackoffState::new(self.inner.settings.backoff.clone());

        while backoff.begin_attempt() {
            metrics::record_reconnect_attempt();
            match self.inner.transport.connect(room, Arc::clone(&sink)).await {
                Ok(()) => {
                    tracing::info!(room = %room, attempts = backoff.attempts(), "Connected to room");
                    return Ok(true);
                }
                Err(ConnectError::Transient(e)) => {
                    if backoff.attempts() >= backoff.max_attempts() {
                        break;
                    }
                    let delay = backoff.delay();
                    tracing::warn!(
                        room = %room,
                        attempt = backoff.attempts(),
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(ConnectError::Fatal(e)) => {
                    return Err(e.context(format!("Fatal error connecting to room {}", room)));
                }
            }
        }

        tracing::warn!(room = %room, attempts = backoff.attempts(), "Giving up on room");
        Ok(false)
    }

    async fn post_forced(&self, room: &RoomIdentity, text: &str) {
        if let Err(e) = self
            .inner
            .transport
            .post_message(room, text, PostFlags::forced())
            .await
        {
            tracing::warn!(room = %room, error = %e, "Failed to post notice");
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn timer_plan(&self) -> [(TimerKind, ChronoDuration); 3] {
        let s = &self.inner.settings;
        [
            (TimerKind::FirstReminder, s.first_reminder),
            (TimerKind::SecondReminder, s.second_reminder),
            (TimerKind::Eviction, s.eviction),
        ]
    }

    /// Arm the reminder and eviction timers relative to `invited_at`.
    /// Reminders already in the past are skipped; eviction always fires.
    fn schedule_timers(&self, room: &RoomIdentity, invited_at: DateTime<Utc>) {
        let now = Utc::now();
        let mut scheduled = Vec::new();

        for (kind, offset) in self.timer_plan() {
            let due = invited_at + offset;
            if due <= now && kind != TimerKind::Eviction {
                tracing::debug!(room = %room, timer = kind.as_str(), "Reminder already past, skipping");
                continue;
            }
            let delay = (due - now).to_std().unwrap_or(Duration::ZERO);
            let weak = self.downgrade();
            let target = room.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(controller) = weak.upgrade() {
                    controller.fire_timer(&target, kind);
                }
            });
            scheduled.push(ScheduledTimer {
                kind,
                due,
                task: task.abort_handle(),
            });
        }

        let previous = self
            .inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room.clone(), scheduled);
        if let Some(previous) = previous {
            for timer in previous {
                timer.task.abort();
            }
        }
        tracing::debug!(room = %room, invited_at = %invited_at, "Scheduled room timers");
    }

    fn cancel_timers(&self, room: &RoomIdentity) {
        let removed = self
            .inner
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room);
        if let Some(timers) = removed {
            for timer in timers {
                timer.task.abort();
            }
            tracing::debug!(room = %room, "Cancelled room timers");
        }
    }

    /// Submit the timer's action to the room queue rather than acting from the timer task
    fn fire_timer(&self, room: &RoomIdentity, kind: TimerKind) {
        let this = self.clone();
        let target = room.clone();
        // Fire-and-forget: the action logs its own failure
        let _ = self.inner.queues.enqueue(room, async move {
            if let Err(e) = this.run_timer(&target, kind).await {
                tracing::error!(room = %target, timer = kind.as_str(), error = %e, "Timer action failed");
            }
        });
    }

    async fn run_timer(&self, room: &RoomIdentity, kind: TimerKind) -> Result<()> {
        let storage = &self.inner.storage;
        // The room may have been approved or left after the timer fired
        if !storage.contains_room(room).await? || storage.is_approved(room).await? {
            tracing::debug!(room = %room, timer = kind.as_str(), "Timer no longer relevant");
            return Ok(());
        }

        let settings = &self.inner.settings;
        match kind {
            TimerKind::FirstReminder | TimerKind::SecondReminder => {
                let offset = if kind == TimerKind::FirstReminder {
                    settings.first_reminder
                } else {
                    settings.second_reminder
                };
                let hours_left = (settings.eviction - offset).num_hours();
                let votes = storage.get_approve_votes(room).await?.len();
                let required = self.required_approve_vote_count(room).await?;
                self.post_forced(
                    room,
                    &notices::reminder(hours_left, votes, required, &settings.invoker),
                )
                .await;
            }
            TimerKind::Eviction => {
                self.post_forced(room, &notices::expired(settings.eviction.num_hours()))
                    .await;
                self.leave_room(room, "expired").await?;
            }
        }
        Ok(())
    }
}
