//! Display eligibility, batching, and the delivery queue.
//!
//! The policy engine decides, per ingested or replayed notification,
//! whether it may be surfaced now, rolled up into a later batch, or
//! suppressed; it owns the on-screen display stack, the per-unit expiry
//! timers, and the per-folder last-notified watermarks, and it routes
//! action/close events back toward the sender for live units only.

pub mod display;
pub mod sound;

use crate::collaborators::{Screen, SoundPlayer};
use crate::error::NotificationError;
use crate::events::{EventBus, NotificationEvent};
use crate::settings::{SharedSettings, TimedSetting, TimedValue};
use crate::store::NotificationStore;
use crate::types::{
    CachedNotification, CloseReason, NotificationId, SharedNotification, Urgency,
    ERROR_NOTIFICATION_ID,
};
use chrono::{DateTime, Utc};
use display::{DisplayStack, DisplayUnit, EngineCommand, ExpiryTimer, UnitKey};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Coalesced bodies at or above this length are cut to 997 characters plus
/// an ellipsis.
const MAX_BODY_CHARS: usize = 1000;
const BODY_DIVIDER: &str = "\n---\n";

/// Everything the engine needs at construction time.
pub struct PolicyEngineConfig {
    pub run_id: String,
    pub settings: SharedSettings,
    pub store: NotificationStore,
    pub events: EventBus,
    pub sound_player: Arc<dyn SoundPlayer>,
    pub screen: Arc<dyn Screen>,
    pub sound_theme_dir: PathBuf,
    pub default_timeout_ms: u32,
    pub popup_width: u32,
    pub popup_height: u32,
}

pub struct PolicyEngine {
    run_id: String,
    started_at: DateTime<Utc>,
    settings: SharedSettings,
    store: NotificationStore,
    events: EventBus,
    sound_player: Arc<dyn SoundPlayer>,
    sound_theme_dir: PathBuf,
    default_timeout_ms: u32,
    stack: DisplayStack,
    timers: HashMap<UnitKey, ExpiryTimer>,
    last_notified: HashMap<PathBuf, NotificationId>,
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl PolicyEngine {
    /// Builds the engine and the command channel its timers report on. The
    /// caller drains the returned receiver on the event loop and feeds each
    /// message to [`PolicyEngine::handle_command`].
    pub fn new(config: PolicyEngineConfig) -> (Self, mpsc::UnboundedReceiver<EngineCommand>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let engine = PolicyEngine {
            run_id: config.run_id,
            started_at: Utc::now(),
            settings: config.settings,
            store: config.store,
            events: config.events,
            sound_player: config.sound_player,
            sound_theme_dir: config.sound_theme_dir,
            default_timeout_ms: config.default_timeout_ms,
            stack: DisplayStack::new(config.screen, config.popup_width, config.popup_height),
            timers: HashMap::new(),
            last_notified: HashMap::new(),
            commands,
        };
        (engine, receiver)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Folder watermark: the highest identifier already delivered.
    pub fn last_notified(&self, folder: &std::path::Path) -> NotificationId {
        self.last_notified.get(folder).copied().unwrap_or(-1)
    }

    /// True when the given id from this run has a unit in the stack.
    pub fn has_active_unit(&self, id: NotificationId) -> bool {
        self.stack.contains(&(self.run_id.clone(), id))
    }

    /// Currently visible display units, in stacking order. This is what a
    /// popup renderer consumes.
    pub fn visible_units(&self) -> impl Iterator<Item = &DisplayUnit> {
        self.stack.visible_units()
    }

    /// Filters `candidates` for display eligibility, coalesces the
    /// survivors into one unit, plays the folder sound, shows or queues the
    /// unit, and advances the folder watermark.
    ///
    /// A failure while assembling the unit is contained: the user gets a
    /// synthesized local error notification instead of a crash.
    pub async fn notify(&mut self, candidates: &[SharedNotification], is_batch: bool) {
        if let Err(e) = self.try_notify(candidates, is_batch).await {
            error!(error = %e, "unable to assemble display unit");
            self.show_error_unit(&e).await;
        }
    }

    async fn try_notify(
        &mut self,
        candidates: &[SharedNotification],
        is_batch: bool,
    ) -> Result<(), NotificationError> {
        let mut selected: Vec<(SharedNotification, CachedNotification)> = Vec::new();
        {
            let settings = self.settings.read().await;
            for record in candidates {
                let snapshot = record.read().unwrap_or_else(|e| e.into_inner()).clone();
                if snapshot.trashed {
                    continue;
                }
                if snapshot.note.urgency() != Urgency::Critical {
                    let folder = snapshot.folder();
                    if settings.is_active(TimedSetting::DoNotDisturb, folder) {
                        continue;
                    }
                    if !is_batch && settings.backoff_minutes(folder) > 0 {
                        continue;
                    }
                }
                selected.push((record.clone(), snapshot));
            }
        }

        debug!(
            requested = candidates.len(),
            eligible = selected.len(),
            is_batch,
            "display eligibility evaluated"
        );
        let Some((_, last)) = selected.last() else {
            return Ok(());
        };

        let summary = if selected.len() == 1 {
            last.note.summary.clone()
        } else {
            format!(
                "{} new notifications from {}",
                selected.len(),
                last.note.app_name
            )
        };

        let body = if selected.len() == 1 {
            last.note.body.clone()
        } else {
            selected
                .iter()
                .map(|(_, snap)| {
                    [snap.note.summary.as_str(), snap.note.body.as_str()]
                        .iter()
                        .filter(|part| !part.is_empty())
                        .copied()
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .collect::<Vec<_>>()
                .join(BODY_DIVIDER)
        };
        let body = truncate_body(body);

        let expire_timeout = combined_expiry(selected.iter().map(|(_, s)| s.note.expire_timeout));

        if let Some(sound) = sound::resolve_sound(
            self.store.root(),
            &self.sound_theme_dir,
            &last.note,
            last.folder(),
        ) {
            let player = self.sound_player.clone();
            tokio::spawn(async move { player.play(&sound).await });
        }

        let unit = DisplayUnit {
            key: (last.note.run_id.clone(), last.note.id),
            app_name: last.note.app_name.clone(),
            icon: last.note.app_icon.clone(),
            summary,
            body,
            actions: last.note.actions.clone(),
            urgency: last.note.urgency(),
            expire_timeout,
            position_hint: last.note.position(),
            resident: last.note.resident(),
            live: last.at >= self.started_at && !is_batch && last.note.id >= 0,
            is_batch,
            path: last.path.clone(),
            sources: selected.iter().map(|(record, _)| record.clone()).collect(),
            displayed: false,
            position: None,
        };
        self.show_unit(unit);

        for (_, snapshot) in &selected {
            let folder = snapshot.folder().to_path_buf();
            let watermark = self.last_notified.entry(folder).or_insert(-1);
            *watermark = (*watermark).max(snapshot.note.id);
        }
        Ok(())
    }

    /// Periodic batch pass. Visits every folder; records qualify when
    /// do-not-disturb is inactive and either
    ///
    /// 1. the folder's backoff is positive and the record is still inside
    ///    its backoff window, or
    /// 2. a do-not-disturb window that ended after daemon start has passed
    ///    and the record arrived after its end,
    ///
    /// in both cases only above the folder's watermark, so each record
    /// rolls up exactly once. Qualifying records are delivered as one batch
    /// per folder; recursion always continues into child folders.
    pub async fn batch_notify(&mut self) {
        let folders = self.store.folders_with_records().await;
        let now = Utc::now();

        let mut batches: Vec<Vec<SharedNotification>> = Vec::new();
        {
            let settings = self.settings.read().await;
            for (folder, records) in folders {
                let watermark = *self.last_notified.entry(folder.clone()).or_insert(-1);
                if settings.is_active(TimedSetting::DoNotDisturb, &folder) {
                    continue;
                }
                let backoff = settings.backoff_minutes(&folder);
                let dnd_end = settings.get(TimedSetting::DoNotDisturb, &folder);

                let mut fresh = Vec::new();
                for record in records {
                    let snapshot = record.read().unwrap_or_else(|e| e.into_inner()).clone();
                    if snapshot.trashed || snapshot.note.id <= watermark {
                        continue;
                    }
                    let minutes_since = (now - snapshot.at).num_minutes();
                    let in_backoff_window = backoff > 0 && minutes_since <= backoff;
                    let dnd_catch_up = matches!(
                        dnd_end,
                        Some(TimedValue::Until(end))
                            if end >= self.started_at && snapshot.at >= end
                    );
                    if in_backoff_window || dnd_catch_up {
                        fresh.push(record);
                    }
                }
                if !fresh.is_empty() {
                    batches.push(fresh);
                }
            }
        }

        for fresh in batches {
            self.notify(&fresh, true).await;
        }
    }

    /// Closes a unit. The outward `NotificationClosed` is forwarded for
    /// live units only, and never for [`CloseReason::ClosedByCall`] (the
    /// ingestion service already signalled that close). Dismissals and
    /// protocol closes also retire the unit's backing file. Freed screen
    /// space is offered to queued units.
    pub fn close_unit(&mut self, key: &UnitKey, reason: CloseReason) {
        let Some(unit) = self.stack.close(key) else {
            debug!(id = key.1, "unit already closed, skipping");
            return;
        };
        info!(id = key.1, ?reason, "closing notification");
        if let Some(timer) = self.timers.remove(key) {
            timer.cancel();
        }

        if unit.live && reason != CloseReason::ClosedByCall {
            self.events.publish(NotificationEvent::Closed {
                id: unit.key.1,
                reason,
            });
        }
        if matches!(reason, CloseReason::DismissedByUser | CloseReason::ClosedByCall)
            && unit.key.1 >= 0
        {
            self.store.trash_in_background(unit.path.clone());
        }

        self.drain_pending();
    }

    /// Convenience for closes addressed by this run's notification id.
    pub fn close_by_id(&mut self, id: NotificationId, reason: CloseReason) {
        self.close_unit(&(self.run_id.clone(), id), reason);
    }

    /// The user triggered an action on a unit. Live units forward
    /// `ActionInvoked`; non-resident units are dismissed.
    pub fn action_invoked(&mut self, key: &UnitKey, action: &str) {
        let Some(unit) = self.stack.get(key) else {
            return;
        };
        if unit.live {
            self.events.publish(NotificationEvent::ActionInvoked {
                id: unit.key.1,
                key: action.to_string(),
            });
        }
        if !unit.resident {
            self.close_unit(key, CloseReason::DismissedByUser);
        }
    }

    /// Hides a unit and re-displays a fresh copy after `duration`.
    pub fn snooze(&mut self, key: &UnitKey, duration: Duration) {
        let Some(mut unit) = self.stack.close(key) else {
            return;
        };
        info!(id = key.1, secs = duration.as_secs(), "snoozing notification");
        if let Some(timer) = self.timers.remove(key) {
            timer.cancel();
        }
        unit.displayed = false;
        unit.position = None;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = commands.send(EngineCommand::Redisplay(Box::new(unit)));
        });
        self.drain_pending();
    }

    /// Pointer entered a unit: hold its expiry with remaining time.
    pub fn pause_expiry(&mut self, key: &UnitKey) {
        if let Some(timer) = self.timers.get_mut(key) {
            timer.pause();
        }
    }

    /// Pointer left: resume the held expiry.
    pub fn resume_expiry(&mut self, key: &UnitKey) {
        if let Some(timer) = self.timers.get_mut(key) {
            timer.resume();
        }
    }

    /// Applies a message from a detached timer task.
    pub fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Expire(key) => self.close_unit(&key, CloseReason::Expired),
            EngineCommand::Redisplay(unit) => self.show_unit(*unit),
        }
    }

    fn show_unit(&mut self, unit: DisplayUnit) {
        let key = unit.key.clone();
        if self.stack.show_or_queue(unit) {
            self.after_display(&key);
        }
    }

    fn after_display(&mut self, key: &UnitKey) {
        let Some(unit) = self.stack.get(key) else {
            return;
        };
        let (id, live, urgency, expire_timeout) =
            (unit.key.1, unit.live, unit.urgency, unit.expire_timeout);
        let announce = (
            unit.app_name.clone(),
            unit.summary.clone(),
            unit.body.clone(),
        );
        for source in unit.sources.clone() {
            source.write().unwrap_or_else(|e| e.into_inner()).displayed = true;
        }

        if live {
            self.events.publish(NotificationEvent::Displayed {
                id,
                app_name: announce.0,
                summary: announce.1,
                body: announce.2,
            });
        }
        if expire_timeout != 0 && urgency != Urgency::Critical {
            let millis = if expire_timeout < 0 {
                u64::from(self.default_timeout_ms)
            } else {
                expire_timeout as u64
            };
            self.timers.insert(
                key.clone(),
                ExpiryTimer::start(
                    key.clone(),
                    Duration::from_millis(millis),
                    self.commands.clone(),
                ),
            );
        }
    }

    fn drain_pending(&mut self) {
        for key in self.stack.retry_pending() {
            self.after_display(&key);
        }
    }

    /// Shows a synthesized local error notification. Never persisted,
    /// never forwarded outward (sentinel negative id).
    async fn show_error_unit(&mut self, error: &NotificationError) {
        let sound = self.sound_theme_dir.join("dialog-error.oga");
        let player = self.sound_player.clone();
        tokio::spawn(async move { player.play(&sound).await });

        let unit = DisplayUnit {
            key: (self.run_id.clone(), ERROR_NOTIFICATION_ID),
            app_name: "inboxd".to_string(),
            icon: "error".to_string(),
            summary: "Error".to_string(),
            body: format!("Unable to read notifications: {error}"),
            actions: Vec::new(),
            urgency: Urgency::Normal,
            expire_timeout: -1,
            position_hint: None,
            resident: false,
            live: false,
            is_batch: false,
            path: self.store.root().join("error.json"),
            sources: Vec::new(),
            displayed: false,
            position: None,
        };
        self.show_unit(unit);
    }
}

/// Combined expiry for a coalesced unit: `0` (never expire) if any
/// candidate requested it, otherwise the sum of the positive requests;
/// `-1` (default) when nothing contributed.
fn combined_expiry(timeouts: impl Iterator<Item = i32>) -> i32 {
    let mut sum: i64 = 0;
    for timeout in timeouts {
        if timeout == 0 {
            return 0;
        }
        if timeout > 0 {
            sum += i64::from(timeout);
        }
    }
    if sum == 0 {
        -1
    } else {
        sum.min(i64::from(i32::MAX)) as i32
    }
}

fn truncate_body(body: String) -> String {
    if body.chars().count() >= MAX_BODY_CHARS {
        let mut cut: String = body.chars().take(MAX_BODY_CHARS - 3).collect();
        cut.push_str("...");
        cut
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn combined_expiry_sums_positive_requests() {
        assert_eq!(combined_expiry([5000, 3000].into_iter()), 8000);
    }

    #[test]
    fn combined_expiry_zero_wins() {
        assert_eq!(combined_expiry([5000, 0, 3000].into_iter()), 0);
    }

    #[test]
    fn combined_expiry_defaults_contribute_nothing() {
        assert_eq!(combined_expiry([-1, 4000].into_iter()), 4000);
        assert_eq!(combined_expiry([-1, -1].into_iter()), -1);
    }

    #[test]
    fn truncation_cuts_to_997_plus_ellipsis() {
        let body = "x".repeat(1000);
        let cut = truncate_body(body);
        assert_eq!(cut.chars().count(), 1000);
        assert_eq!(&cut[..997], "x".repeat(997).as_str());
        assert!(cut.ends_with("..."));

        // Exactly at the threshold is also truncated.
        let at_threshold = truncate_body("y".repeat(1000));
        assert!(at_threshold.ends_with("..."));
        // Below it is untouched.
        assert_eq!(truncate_body("z".repeat(999)).len(), 999);
    }
}
