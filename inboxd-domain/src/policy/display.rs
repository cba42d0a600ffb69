//! On-screen display units, stacking placement, and expiry timers.

use crate::collaborators::Screen;
use crate::types::{NotificationId, SharedNotification, Urgency};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Vertical gap between stacked units, in pixels.
pub const STACK_GAP: u32 = 10;

/// A display unit is identified by the run that produced its last source
/// notification plus that notification's id; ids from different runs may
/// collide, keys may not.
pub type UnitKey = (String, NotificationId);

/// Messages sent back into the engine from detached timer tasks.
#[derive(Debug)]
pub enum EngineCommand {
    /// An expiry timer fired for a displayed unit.
    Expire(UnitKey),
    /// A snoozed unit is due to be shown again.
    Redisplay(Box<DisplayUnit>),
}

/// One coalesced, displayable notification popup.
#[derive(Debug, Clone)]
pub struct DisplayUnit {
    pub key: UnitKey,
    pub app_name: String,
    pub icon: String,
    pub summary: String,
    pub body: String,
    pub actions: Vec<(String, String)>,
    pub urgency: Urgency,
    /// Milliseconds; `-1` default, `0` never expires.
    pub expire_timeout: i32,
    /// Explicit placement from the `x`/`y` hints.
    pub position_hint: Option<(i32, i32)>,
    pub resident: bool,
    /// Live units forward action/close signals back to the sender;
    /// replayed and batch-produced units never do.
    pub live: bool,
    pub is_batch: bool,
    /// Storage path of the unit's last source notification.
    pub path: PathBuf,
    /// Records coalesced into this unit.
    pub sources: Vec<SharedNotification>,
    pub displayed: bool,
    pub position: Option<(i32, i32)>,
}

/// The set of current display units, anchored to the bottom-right corner of
/// the available screen area and stacked upward in order of appearance.
/// Units that do not fit stay queued until a close frees space.
pub struct DisplayStack {
    screen: Arc<dyn Screen>,
    unit_width: u32,
    unit_height: u32,
    offset: u32,
    units: Vec<DisplayUnit>,
}

impl DisplayStack {
    pub fn new(screen: Arc<dyn Screen>, unit_width: u32, unit_height: u32) -> Self {
        DisplayStack {
            screen,
            unit_width,
            unit_height,
            offset: 0,
            units: Vec::new(),
        }
    }

    /// Inserts a unit, placing it immediately when possible. Returns true
    /// when the unit became visible.
    pub fn show_or_queue(&mut self, mut unit: DisplayUnit) -> bool {
        let displayed = self.place(&mut unit);
        if !displayed {
            debug!(id = unit.key.1, "no screen space for notification, queuing");
        }
        self.units.push(unit);
        displayed
    }

    fn place(&mut self, unit: &mut DisplayUnit) -> bool {
        if let Some(hint) = unit.position_hint {
            unit.position = Some(hint);
            unit.displayed = true;
            return true;
        }
        let geometry = self.screen.available_geometry();
        let y = geometry.height as i64 - self.unit_height as i64 - self.offset as i64;
        if y > 0 {
            unit.position = Some((geometry.width as i32 - self.unit_width as i32, y as i32));
            unit.displayed = true;
            self.offset += self.unit_height + STACK_GAP;
            return true;
        }
        false
    }

    /// Attempts to place every queued unit, returning the keys that became
    /// visible. Called after a close frees screen space.
    pub fn retry_pending(&mut self) -> Vec<UnitKey> {
        let mut shown = Vec::new();
        let mut pending: Vec<usize> = (0..self.units.len())
            .filter(|&i| !self.units[i].displayed)
            .collect();
        for index in pending.drain(..) {
            let mut unit = std::mem::replace(&mut self.units[index], placeholder());
            if self.place(&mut unit) {
                shown.push(unit.key.clone());
            }
            self.units[index] = unit;
        }
        shown
    }

    /// Removes a unit and recomputes the stacking offset from the remaining
    /// visible units.
    pub fn close(&mut self, key: &UnitKey) -> Option<DisplayUnit> {
        let index = self.units.iter().position(|u| &u.key == key)?;
        let unit = self.units.remove(index);
        self.offset = self
            .units
            .iter()
            .filter(|u| u.displayed && u.position_hint.is_none())
            .map(|_| self.unit_height + STACK_GAP)
            .sum();
        Some(unit)
    }

    pub fn get(&self, key: &UnitKey) -> Option<&DisplayUnit> {
        self.units.iter().find(|u| &u.key == key)
    }

    pub fn contains(&self, key: &UnitKey) -> bool {
        self.get(key).is_some()
    }

    pub fn visible_units(&self) -> impl Iterator<Item = &DisplayUnit> {
        self.units.iter().filter(|u| u.displayed)
    }
}

fn placeholder() -> DisplayUnit {
    DisplayUnit {
        key: (String::new(), 0),
        app_name: String::new(),
        icon: String::new(),
        summary: String::new(),
        body: String::new(),
        actions: Vec::new(),
        urgency: Urgency::Normal,
        expire_timeout: -1,
        position_hint: None,
        resident: false,
        live: false,
        is_batch: false,
        path: PathBuf::new(),
        sources: Vec::new(),
        displayed: false,
        position: None,
    }
}

/// A cancellable, pausable single-shot expiry timer.
///
/// Pausing aborts the sleep and remembers the remaining time; resuming
/// restarts the sleep with that remainder (the pointer-hover contract).
pub struct ExpiryTimer {
    key: UnitKey,
    commands: mpsc::UnboundedSender<EngineCommand>,
    duration: Duration,
    started: Instant,
    remaining_on_pause: Option<Duration>,
    handle: Option<JoinHandle<()>>,
}

impl ExpiryTimer {
    pub fn start(
        key: UnitKey,
        duration: Duration,
        commands: mpsc::UnboundedSender<EngineCommand>,
    ) -> Self {
        let handle = spawn_expiry(key.clone(), duration, commands.clone());
        ExpiryTimer {
            key,
            commands,
            duration,
            started: Instant::now(),
            remaining_on_pause: None,
            handle: Some(handle),
        }
    }

    pub fn pause(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            self.remaining_on_pause = Some(self.duration.saturating_sub(self.started.elapsed()));
        }
    }

    pub fn resume(&mut self) {
        if let Some(remaining) = self.remaining_on_pause.take() {
            self.duration = remaining;
            self.started = Instant::now();
            self.handle = Some(spawn_expiry(
                self.key.clone(),
                remaining,
                self.commands.clone(),
            ));
        }
    }

    pub fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn spawn_expiry(
    key: UnitKey,
    duration: Duration,
    commands: mpsc::UnboundedSender<EngineCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        let _ = commands.send(EngineCommand::Expire(key));
    })
}
