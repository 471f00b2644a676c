use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use switchd_core::{DispatcherConfig, Mode, SwitchId, SwitchdConfig};
use switchd_schedule::{Action, ScheduleRecord, WeightedSchedule};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    actuator::{Actuator, ActuatorRegistry},
    clock::Clock,
    error::{DispatchError, Result},
    handle::{Command, DispatcherHandle},
    state::SwitchState,
    store::SwitchStore,
};

/// Static description of a switch, resolved from configuration.
#[derive(Clone)]
pub struct SwitchSpec {
    pub id: SwitchId,
    pub name: String,
    pub levels: i64,
    pub actuator: Arc<dyn Actuator>,
}

impl SwitchSpec {
    /// One spec per `[switches.*]` entry, with its actuator looked up in `registry`.
    pub fn from_config(config: &SwitchdConfig, registry: &ActuatorRegistry) -> Result<Vec<Self>> {
        config
            .switches
            .iter()
            .map(|(id, switch)| {
                let actuator =
                    registry
                        .get(&switch.actuator)
                        .ok_or_else(|| DispatchError::UnknownActuator {
                            name: switch.actuator.clone(),
                        })?;
                Ok(Self {
                    id: SwitchId::from(id.as_str()),
                    name: switch.name.clone(),
                    levels: switch.levels,
                    actuator,
                })
            })
            .collect()
    }
}

/// One switch's share of an armed timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAction {
    pub switch: SwitchId,
    /// `None` clears the switch to level 0.
    pub weight: Option<i64>,
}

/// The soonest pending transition across all switches. Switches whose next
/// transitions fall on the same minute are batched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedEvent {
    pub due: NaiveDateTime,
    pub generation: u64,
    pub actions: Vec<PlannedAction>,
}

/// Forwarded on the optional fired channel after each applied action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiredEvent {
    pub switch: SwitchId,
    pub level: i64,
    pub due: NaiveDateTime,
    pub fired_at: NaiveDateTime,
}

/// Read-only view of a switch for UIs and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchSnapshot {
    pub id: SwitchId,
    pub name: String,
    pub levels: i64,
    pub mode: Mode,
    pub level: i64,
    pub active_schedule: Option<String>,
    pub schedules: BTreeMap<String, ScheduleRecord>,
    pub next_action: Option<Action>,
}

struct Switch {
    name: String,
    levels: i64,
    actuator: Arc<dyn Actuator>,
    state: SwitchState,
}

impl Switch {
    fn check_level(&self, id: &SwitchId, level: i64) -> Result<()> {
        if (0..=self.levels).contains(&level) {
            Ok(())
        } else {
            Err(DispatchError::InvalidLevel {
                switch: id.clone(),
                level,
                max: self.levels,
            })
        }
    }

    /// Record `level` and drive the actuator. Actuator failures are only logged.
    fn apply(&mut self, id: &SwitchId, level: i64) {
        let level = level.clamp(0, self.levels);
        self.state.level = level;
        let result = if level > 0 {
            self.actuator.activate(id, level)
        } else {
            self.actuator.deactivate(id)
        };
        if let Err(e) = result {
            warn!(switch = %id, level, error = %e, "actuator call failed");
        }
    }

    /// Level the active schedule asks for at `now`; `None` without one.
    fn scheduled_level(&self, now: NaiveDateTime) -> Option<i64> {
        self.state
            .active()
            .and_then(|s| s.current_action_at(now))
            .map(|a| a.weight.unwrap_or(0))
    }

    fn next_action(&self, now: NaiveDateTime) -> Option<Action> {
        if !self.state.mode.is_schedule_governed() {
            return None;
        }
        self.state.active().and_then(|s| s.next_action_at(now))
    }

    fn snapshot(&self, id: &SwitchId, now: NaiveDateTime) -> SwitchSnapshot {
        SwitchSnapshot {
            id: id.clone(),
            name: self.name.clone(),
            levels: self.levels,
            mode: self.state.mode,
            level: self.state.level,
            active_schedule: self.state.active_schedule.clone(),
            schedules: self
                .state
                .schedules
                .iter()
                .map(|(name, s)| (name.clone(), s.to_record()))
                .collect(),
            next_action: self.next_action(now),
        }
    }
}

fn lookup<'a>(switches: &'a mut BTreeMap<SwitchId, Switch>, id: &SwitchId) -> Result<&'a mut Switch> {
    switches
        .get_mut(id)
        .ok_or_else(|| DispatchError::UnknownSwitch { id: id.clone() })
}

/// Owns every switch and a single timer armed at the soonest pending
/// transition.
///
/// Built with [`ScheduleDispatcher::new`], then driven by [`run`](Self::run)
/// on its own task. The synchronous methods are the operations the task
/// performs for each [`DispatcherHandle`] request.
pub struct ScheduleDispatcher {
    switches: BTreeMap<SwitchId, Switch>,
    store: SwitchStore,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    armed: Option<PlannedEvent>,
    generation: u64,
    /// If set, every applied action is copied here.
    fired_tx: Option<mpsc::Sender<FiredEvent>>,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
}

impl ScheduleDispatcher {
    /// Restore every switch from `store` and arm the first timer.
    ///
    /// Persisted levels are re-applied through the actuators and switches in
    /// `Auto` mode are caught up with their active schedule.
    pub fn new(
        store: SwitchStore,
        clock: Arc<dyn Clock>,
        specs: Vec<SwitchSpec>,
        config: &DispatcherConfig,
        fired_tx: Option<mpsc::Sender<FiredEvent>>,
    ) -> Result<(Self, DispatcherHandle)> {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let switches = specs
            .into_iter()
            .map(|spec| {
                (
                    spec.id,
                    Switch {
                        name: spec.name,
                        levels: spec.levels,
                        actuator: spec.actuator,
                        state: SwitchState::default(),
                    },
                )
            })
            .collect();

        let mut dispatcher = Self {
            switches,
            store,
            clock,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            armed: None,
            generation: 0,
            fired_tx,
            commands: rx,
            commands_open: true,
        };
        dispatcher.restore()?;
        Ok((dispatcher, DispatcherHandle::new(tx)))
    }

    fn restore(&mut self) -> Result<()> {
        let now = self.clock.now();
        for id in self.store.ids()? {
            if !self.switches.contains_key(&id) {
                warn!(switch = %id, "stored switch is not configured, ignoring");
            }
        }
        for (id, switch) in self.switches.iter_mut() {
            let mut state = match self.store.load(id) {
                Ok(Some(record)) => SwitchState::from_record(&record).unwrap_or_else(|e| {
                    warn!(switch = %id, error = %e, "stored schedules invalid, starting fresh");
                    SwitchState::default()
                }),
                Ok(None) => SwitchState::default(),
                Err(DispatchError::Serialization(e)) => {
                    warn!(switch = %id, error = %e, "stored record unreadable, starting fresh");
                    SwitchState::default()
                }
                Err(e) => return Err(e),
            };
            if let Some(name) = state.clear_dangling_active() {
                warn!(switch = %id, schedule = %name, "active schedule missing, cleared");
            }
            if state.mode == Mode::Timer {
                warn!(switch = %id, "unsupported stored mode, reverting to auto");
                state.mode = Mode::Auto;
            }

            let level = state.level;
            switch.state = state;
            switch.apply(id, level);

            if switch.state.mode == Mode::Auto {
                if let Some(scheduled) = switch.scheduled_level(now) {
                    if scheduled != switch.state.level {
                        info!(switch = %id, from = switch.state.level, to = scheduled, "catching up with schedule");
                        switch.apply(id, scheduled);
                    }
                }
            }
            self.store.save(id, &switch.state.to_record())?;
            info!(
                switch = %id,
                mode = %switch.state.mode,
                level = switch.state.level,
                schedules = switch.state.schedules.len(),
                "switch restored"
            );
        }
        self.rearm();
        Ok(())
    }

    /// Store a new named schedule. The timer is left alone.
    pub fn add_schedule(
        &mut self,
        id: &SwitchId,
        name: &str,
        schedule: WeightedSchedule,
    ) -> Result<()> {
        let switch = lookup(&mut self.switches, id)?;
        if switch.state.schedules.contains_key(name) {
            return Err(DispatchError::DuplicateSchedule {
                switch: id.clone(),
                name: name.to_string(),
            });
        }
        for interval in schedule.intervals() {
            switch.check_level(id, interval.weight)?;
        }
        info!(switch = %id, schedule = %name, intervals = schedule.len(), "schedule added");
        switch.state.schedules.insert(name.to_string(), schedule);
        self.store.save(id, &switch.state.to_record())
    }

    /// Activate `name`; in `Auto` mode its current weight is applied at once.
    pub fn use_schedule(&mut self, id: &SwitchId, name: &str) -> Result<()> {
        self.fire_due();
        let now = self.clock.now();
        let switch = lookup(&mut self.switches, id)?;
        if !switch.state.schedules.contains_key(name) {
            return Err(DispatchError::UnknownSchedule {
                switch: id.clone(),
                name: name.to_string(),
            });
        }
        switch.state.active_schedule = Some(name.to_string());
        if switch.state.mode == Mode::Auto {
            if let Some(level) = switch.scheduled_level(now) {
                switch.apply(id, level);
            }
        }
        info!(switch = %id, schedule = %name, level = switch.state.level, "schedule activated");

        let persisted = self.store.save(id, &switch.state.to_record());
        self.rearm();
        persisted
    }

    /// Remove `name`. Deleting the active schedule deactivates it without
    /// touching the level.
    pub fn delete_schedule(&mut self, id: &SwitchId, name: &str) -> Result<()> {
        self.fire_due();
        let switch = lookup(&mut self.switches, id)?;
        if switch.state.schedules.remove(name).is_none() {
            return Err(DispatchError::UnknownSchedule {
                switch: id.clone(),
                name: name.to_string(),
            });
        }
        if switch.state.active_schedule.as_deref() == Some(name) {
            switch.state.active_schedule = None;
        }
        info!(switch = %id, schedule = %name, "schedule deleted");

        let persisted = self.store.save(id, &switch.state.to_record());
        self.rearm();
        persisted
    }

    /// Switch to `mode`.
    ///
    /// `Auto` applies the active schedule's current weight. The override
    /// modes apply `level` at once, or 0 for `KeepOff` and `AlwaysOff`.
    /// `level` is not checked for `Auto`.
    pub fn set_mode(&mut self, id: &SwitchId, mode: Mode, level: i64) -> Result<()> {
        if mode == Mode::Timer {
            return Err(DispatchError::UnsupportedMode { mode });
        }
        self.fire_due();
        let now = self.clock.now();
        let switch = lookup(&mut self.switches, id)?;
        if mode != Mode::Auto {
            switch.check_level(id, level)?;
        }

        switch.state.mode = mode;
        if mode == Mode::Auto {
            if let Some(scheduled) = switch.scheduled_level(now) {
                switch.apply(id, scheduled);
            }
        } else {
            switch.apply(id, if mode.forces_off() { 0 } else { level });
        }
        info!(switch = %id, mode = %mode, level = switch.state.level, "mode changed");

        let persisted = self.store.save(id, &switch.state.to_record());
        self.rearm();
        persisted
    }

    pub fn switch(&self, id: &SwitchId) -> Result<SwitchSnapshot> {
        let now = self.clock.now();
        self.switches
            .get(id)
            .map(|switch| switch.snapshot(id, now))
            .ok_or_else(|| DispatchError::UnknownSwitch { id: id.clone() })
    }

    /// Every switch, ordered by id.
    pub fn switches(&self) -> Vec<SwitchSnapshot> {
        let now = self.clock.now();
        self.switches
            .iter()
            .map(|(id, switch)| switch.snapshot(id, now))
            .collect()
    }

    pub fn next_event(&self) -> Option<&PlannedEvent> {
        self.armed.as_ref()
    }

    /// Recompute the soonest transition over all governed switches and arm
    /// it, replacing any previous timer.
    ///
    /// Mutations call [`fire_due`](Self::fire_due) first, so an overdue timer
    /// is applied before it is replaced.
    pub fn rearm(&mut self) {
        self.generation += 1;
        let now = self.clock.now();

        let mut due: Option<NaiveDateTime> = None;
        let mut actions = Vec::new();
        for (id, switch) in &self.switches {
            let Some(next) = switch.next_action(now) else {
                continue;
            };
            match due {
                Some(d) if next.at > d => continue,
                Some(d) if next.at == d => {}
                _ => {
                    due = Some(next.at);
                    actions.clear();
                }
            }
            actions.push(PlannedAction {
                switch: id.clone(),
                weight: next.weight,
            });
        }

        self.armed = due.map(|due| PlannedEvent {
            due,
            generation: self.generation,
            actions,
        });
        match &self.armed {
            Some(event) => debug!(
                due = %event.due,
                generation = event.generation,
                switches = event.actions.len(),
                "timer armed"
            ),
            None => debug!(generation = self.generation, "nothing scheduled, dispatcher idle"),
        }
    }

    /// Fire the armed event if the clock has reached it. Returns whether it fired.
    pub fn fire_due(&mut self) -> bool {
        let now = self.clock.now();
        match &self.armed {
            Some(event) if now >= event.due => {}
            _ => return false,
        }
        let Some(event) = self.armed.take() else {
            return false;
        };
        self.fire(event, now);
        true
    }

    fn fire(&mut self, event: PlannedEvent, now: NaiveDateTime) {
        let late = (now - event.due)
            .to_std()
            .map(|lag| lag > self.poll_interval)
            .unwrap_or(false);
        let batched = event.actions.len();
        let mut actions = event.actions.clone();
        // Other switches may have passed transitions of their own since `due`.
        for (id, switch) in &self.switches {
            if actions.iter().any(|a| &a.switch == id) {
                continue;
            }
            if let Some(skipped) = switch.next_action(event.due).filter(|a| a.at <= now) {
                actions.push(PlannedAction {
                    switch: id.clone(),
                    weight: skipped.weight,
                });
            }
        }
        info!(
            due = %event.due,
            generation = event.generation,
            switches = actions.len(),
            late,
            "firing scheduled transition"
        );

        for (idx, action) in actions.iter().enumerate() {
            let id = &action.switch;
            let Some(switch) = self.switches.get_mut(id) else {
                continue;
            };
            if !switch.state.mode.is_schedule_governed() {
                debug!(switch = %id, mode = %switch.state.mode, "switch no longer follows its schedule");
                continue;
            }
            if switch.state.mode.is_temporary() {
                info!(switch = %id, mode = %switch.state.mode, "releasing temporary override");
                switch.state.mode = Mode::Auto;
            }

            let mut level = action.weight.unwrap_or(0);
            if late || idx >= batched {
                // Settle on what holds now rather than replaying every step.
                if let Some(current) = switch.scheduled_level(now) {
                    level = current;
                }
            }
            switch.apply(id, level);
            info!(switch = %id, level = switch.state.level, "scheduled level applied");

            if let Err(e) = self.store.save(id, &switch.state.to_record()) {
                error!(switch = %id, error = %e, "failed to persist fired transition");
            }
            if let Some(ref tx) = self.fired_tx {
                let fired = FiredEvent {
                    switch: id.clone(),
                    level: switch.state.level,
                    due: event.due,
                    fired_at: now,
                };
                // try_send never blocks the dispatcher; log a warning if the channel is full.
                if tx.try_send(fired).is_err() {
                    warn!(switch = %id, "fired channel full or closed, event dropped");
                }
            }
        }
        self.rearm();
    }

    /// How long to sleep before the clock is checked again.
    fn wait(&self) -> Option<Duration> {
        let event = self.armed.as_ref()?;
        let remaining = (event.due - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        Some(remaining.min(self.poll_interval))
    }

    fn handle(&mut self, command: Command) {
        // A dropped reply receiver only means the caller gave up waiting.
        match command {
            Command::AddSchedule {
                switch,
                name,
                schedule,
                reply,
            } => {
                let _ = reply.send(self.add_schedule(&switch, &name, schedule));
            }
            Command::UseSchedule {
                switch,
                name,
                reply,
            } => {
                let _ = reply.send(self.use_schedule(&switch, &name));
            }
            Command::DeleteSchedule {
                switch,
                name,
                reply,
            } => {
                let _ = reply.send(self.delete_schedule(&switch, &name));
            }
            Command::SetMode {
                switch,
                mode,
                level,
                reply,
            } => {
                let _ = reply.send(self.set_mode(&switch, mode, level));
            }
            Command::Switch { switch, reply } => {
                let _ = reply.send(self.switch(&switch));
            }
            Command::Switches { reply } => {
                let _ = reply.send(self.switches());
            }
            Command::NextEvent { reply } => {
                let _ = reply.send(self.next_event().cloned());
            }
        }
    }

    /// Main event loop. Runs until `shutdown` broadcasts `true`.
    ///
    /// Sleeps are capped at the poll interval so wall-clock jumps and
    /// suspends are noticed; an overdue timer fires on the next wake.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            switches = self.switches.len(),
            poll_interval_secs = self.poll_interval.as_secs(),
            "schedule dispatcher started"
        );

        loop {
            let wait = self.wait();
            tokio::select! {
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.handle(command),
                    None => {
                        debug!("all dispatcher handles dropped");
                        self.commands_open = false;
                    }
                },
                _ = tokio::time::sleep(wait.unwrap_or_default()), if wait.is_some() => {
                    self.fire_due();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("schedule dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorError;
    use crate::clock::ManualClock;
    use crate::state::SwitchRecord;
    use chrono::NaiveDate;
    use rusqlite::Connection;
    use std::sync::Mutex;
    use switchd_schedule::{Instant, WeightedInterval};

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(String, i64)>>,
    }

    impl Recording {
        fn take(&self) -> Vec<(String, i64)> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    impl Actuator for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn activate(&self, switch: &SwitchId, level: i64) -> std::result::Result<(), ActuatorError> {
            self.calls.lock().unwrap().push((switch.to_string(), level));
            Ok(())
        }

        fn deactivate(&self, switch: &SwitchId) -> std::result::Result<(), ActuatorError> {
            self.calls.lock().unwrap().push((switch.to_string(), 0));
            Ok(())
        }
    }

    struct Broken;

    impl Actuator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn activate(&self, _: &SwitchId, _: i64) -> std::result::Result<(), ActuatorError> {
            Err(ActuatorError::Failed("relay unplugged".to_string()))
        }

        fn deactivate(&self, _: &SwitchId) -> std::result::Result<(), ActuatorError> {
            Err(ActuatorError::Failed("relay unplugged".to_string()))
        }
    }

    /// 2024-01-01 is a Monday.
    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1 + day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn id(s: &str) -> SwitchId {
        SwitchId::from(s)
    }

    /// Monday 07:00–09:00 at `weight`.
    fn morning(weight: i64) -> WeightedSchedule {
        WeightedSchedule::from_intervals([WeightedInterval::new(
            Instant::new(0, 7, 0),
            Instant::new(0, 9, 0),
            weight,
        )])
        .unwrap()
    }

    fn specs(actuator: Arc<dyn Actuator>, switches: &[(&str, i64)]) -> Vec<SwitchSpec> {
        switches
            .iter()
            .map(|(name, levels)| SwitchSpec {
                id: id(name),
                name: name.to_uppercase(),
                levels: *levels,
                actuator: actuator.clone(),
            })
            .collect()
    }

    fn dispatcher_with(
        store: SwitchStore,
        clock: &ManualClock,
        switches: &[(&str, i64)],
        fired_tx: Option<mpsc::Sender<FiredEvent>>,
    ) -> (ScheduleDispatcher, Arc<Recording>) {
        let recording = Arc::new(Recording::default());
        let (dispatcher, _handle) = ScheduleDispatcher::new(
            store,
            Arc::new(clock.clone()),
            specs(recording.clone(), switches),
            &DispatcherConfig::default(),
            fired_tx,
        )
        .unwrap();
        (dispatcher, recording)
    }

    fn dispatcher(clock: &ManualClock, switches: &[(&str, i64)]) -> (ScheduleDispatcher, Arc<Recording>) {
        dispatcher_with(SwitchStore::in_memory().unwrap(), clock, switches, None)
    }

    #[test]
    fn add_schedule_validates() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, _) = dispatcher(&clock, &[("boiler", 1)]);

        d.add_schedule(&id("boiler"), "day", morning(1)).unwrap();
        assert!(matches!(
            d.add_schedule(&id("boiler"), "day", morning(1)),
            Err(DispatchError::DuplicateSchedule { .. })
        ));
        assert!(matches!(
            d.add_schedule(&id("nope"), "day", morning(1)),
            Err(DispatchError::UnknownSwitch { .. })
        ));
        let err = d.add_schedule(&id("boiler"), "hot", morning(2)).unwrap_err();
        assert_eq!(err.code(), "INVALID_LEVEL");

        // Adding does not arm anything until the schedule is used.
        assert!(d.next_event().is_none());
    }

    #[test]
    fn use_schedule_applies_current_weight_immediately() {
        let clock = ManualClock::new(at(0, 1, 30));
        let (mut d, rec) = dispatcher(&clock, &[("fan", 3)]);
        rec.take();

        let schedule = WeightedSchedule::from_intervals([WeightedInterval::new(
            Instant::new(0, 1, 0),
            Instant::new(0, 2, 0),
            3,
        )])
        .unwrap();
        d.add_schedule(&id("fan"), "night", schedule).unwrap();
        d.use_schedule(&id("fan"), "night").unwrap();

        assert_eq!(rec.take(), vec![("fan".to_string(), 3)]);
        let snap = d.switch(&id("fan")).unwrap();
        assert_eq!(snap.level, 3);
        assert_eq!(snap.active_schedule.as_deref(), Some("night"));

        let event = d.next_event().unwrap();
        assert_eq!(event.due, at(0, 2, 0));
        assert_eq!(
            event.actions,
            vec![PlannedAction { switch: id("fan"), weight: None }]
        );
    }

    #[test]
    fn use_unknown_schedule_fails() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, _) = dispatcher(&clock, &[("boiler", 1)]);
        assert!(matches!(
            d.use_schedule(&id("boiler"), "missing"),
            Err(DispatchError::UnknownSchedule { .. })
        ));
    }

    #[test]
    fn same_minute_transitions_fire_as_one_batch() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, rec) = dispatcher(&clock, &[("a", 1), ("b", 1)]);
        for s in ["a", "b"] {
            d.add_schedule(&id(s), "day", morning(1)).unwrap();
            d.use_schedule(&id(s), "day").unwrap();
        }
        rec.take();

        let event = d.next_event().unwrap().clone();
        assert_eq!(event.due, at(0, 7, 0));
        assert_eq!(event.actions.len(), 2);

        assert!(!d.fire_due(), "fired before due");
        clock.set(at(0, 7, 0));
        assert!(d.fire_due());

        assert_eq!(rec.take(), vec![("a".to_string(), 1), ("b".to_string(), 1)]);
        let next = d.next_event().unwrap();
        assert_eq!(next.due, at(0, 9, 0));
        assert!(next.generation > event.generation);
        assert!(next.actions.iter().all(|a| a.weight.is_none()));
    }

    #[test]
    fn earliest_switch_wins_the_timer() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, _) = dispatcher(&clock, &[("a", 1), ("b", 1)]);
        let later = WeightedSchedule::from_intervals([WeightedInterval::new(
            Instant::new(0, 8, 0),
            Instant::new(0, 9, 0),
            1,
        )])
        .unwrap();
        d.add_schedule(&id("a"), "late", later).unwrap();
        d.use_schedule(&id("a"), "late").unwrap();
        d.add_schedule(&id("b"), "day", morning(1)).unwrap();
        d.use_schedule(&id("b"), "day").unwrap();

        let event = d.next_event().unwrap();
        assert_eq!(event.due, at(0, 7, 0));
        assert_eq!(event.actions, vec![PlannedAction { switch: id("b"), weight: Some(1) }]);
    }

    #[test]
    fn temporary_override_is_released_at_next_transition() {
        let clock = ManualClock::new(at(0, 7, 30));
        let (mut d, rec) = dispatcher(&clock, &[("boiler", 1)]);
        d.add_schedule(&id("boiler"), "day", morning(1)).unwrap();
        d.use_schedule(&id("boiler"), "day").unwrap();
        assert_eq!(d.switch(&id("boiler")).unwrap().level, 1);

        // KeepOff ignores the requested level.
        d.set_mode(&id("boiler"), Mode::KeepOff, 1).unwrap();
        let snap = d.switch(&id("boiler")).unwrap();
        assert_eq!((snap.mode, snap.level), (Mode::KeepOff, 0));
        assert_eq!(d.next_event().unwrap().due, at(0, 9, 0));

        clock.set(at(0, 9, 0));
        rec.take();
        assert!(d.fire_due());
        let snap = d.switch(&id("boiler")).unwrap();
        assert_eq!((snap.mode, snap.level), (Mode::Auto, 0));
        assert_eq!(rec.take(), vec![("boiler".to_string(), 0)]);
    }

    #[test]
    fn permanent_override_leaves_dispatch_until_auto() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, rec) = dispatcher(&clock, &[("boiler", 1)]);
        d.add_schedule(&id("boiler"), "day", morning(1)).unwrap();
        d.use_schedule(&id("boiler"), "day").unwrap();

        d.set_mode(&id("boiler"), Mode::AlwaysOn, 1).unwrap();
        assert!(d.next_event().is_none());
        assert!(d.switch(&id("boiler")).unwrap().next_action.is_none());

        clock.set(at(0, 8, 0));
        rec.take();
        d.set_mode(&id("boiler"), Mode::Auto, 0).unwrap();
        // Back in Auto inside the interval: the scheduled weight holds.
        assert_eq!(rec.take(), vec![("boiler".to_string(), 1)]);
        assert_eq!(d.next_event().unwrap().due, at(0, 9, 0));
    }

    #[test]
    fn set_mode_rejects_timer_and_bad_levels() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, _) = dispatcher(&clock, &[("fan", 2)]);
        assert!(matches!(
            d.set_mode(&id("fan"), Mode::Timer, 1),
            Err(DispatchError::UnsupportedMode { mode: Mode::Timer })
        ));
        assert!(matches!(
            d.set_mode(&id("fan"), Mode::AlwaysOn, 3),
            Err(DispatchError::InvalidLevel { level: 3, max: 2, .. })
        ));
        assert!(d.set_mode(&id("fan"), Mode::AlwaysOn, -1).is_err());
        assert_eq!(d.switch(&id("fan")).unwrap().mode, Mode::Auto);
    }

    #[test]
    fn deleting_active_schedule_keeps_level() {
        let clock = ManualClock::new(at(0, 8, 0));
        let (mut d, _) = dispatcher(&clock, &[("boiler", 1)]);
        d.add_schedule(&id("boiler"), "day", morning(1)).unwrap();
        d.use_schedule(&id("boiler"), "day").unwrap();

        d.delete_schedule(&id("boiler"), "day").unwrap();
        let snap = d.switch(&id("boiler")).unwrap();
        assert_eq!(snap.active_schedule, None);
        assert!(snap.schedules.is_empty());
        assert_eq!(snap.level, 1);
        assert!(d.next_event().is_none());

        assert!(matches!(
            d.delete_schedule(&id("boiler"), "day"),
            Err(DispatchError::UnknownSchedule { .. })
        ));
    }

    #[test]
    fn late_fire_reconciles_with_current_action() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, _) = dispatcher(&clock, &[("boiler", 1)]);
        d.add_schedule(&id("boiler"), "day", morning(1)).unwrap();
        d.use_schedule(&id("boiler"), "day").unwrap();

        // Suspended through the whole interval.
        clock.set(at(0, 10, 0));
        assert!(d.fire_due());
        assert_eq!(d.switch(&id("boiler")).unwrap().level, 0);
        assert_eq!(d.next_event().unwrap().due, at(7, 7, 0));
    }

    #[test]
    fn late_fire_catches_up_switches_outside_the_batch() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, _) = dispatcher(&clock, &[("a", 1), ("b", 1)]);
        let early = WeightedSchedule::from_intervals([WeightedInterval::new(
            Instant::new(0, 6, 30),
            Instant::new(0, 6, 45),
            1,
        )])
        .unwrap();
        d.add_schedule(&id("a"), "early", early).unwrap();
        d.use_schedule(&id("a"), "early").unwrap();
        d.add_schedule(&id("b"), "day", morning(1)).unwrap();
        d.use_schedule(&id("b"), "day").unwrap();
        assert_eq!(d.next_event().unwrap().actions.len(), 1);

        clock.set(at(0, 7, 30));
        assert!(d.fire_due());
        assert_eq!(d.switch(&id("a")).unwrap().level, 0);
        assert_eq!(d.switch(&id("b")).unwrap().level, 1);
        let next = d.next_event().unwrap();
        assert_eq!(next.due, at(0, 9, 0));
        assert_eq!(next.actions, vec![PlannedAction { switch: id("b"), weight: None }]);
    }

    #[test]
    fn mutation_after_due_time_still_fires_the_armed_event() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, rec) = dispatcher(&clock, &[("a", 1), ("b", 1)]);
        d.add_schedule(&id("a"), "day", morning(1)).unwrap();
        d.use_schedule(&id("a"), "day").unwrap();
        assert_eq!(d.next_event().unwrap().due, at(0, 7, 0));
        rec.take();

        // The command is served a second after the timer became due.
        clock.set(at(0, 7, 0) + chrono::Duration::seconds(1));
        d.set_mode(&id("b"), Mode::AlwaysOn, 1).unwrap();

        assert_eq!(rec.take(), vec![("a".to_string(), 1), ("b".to_string(), 1)]);
        assert_eq!(d.switch(&id("a")).unwrap().level, 1);
        let next = d.next_event().unwrap();
        assert_eq!(next.due, at(0, 9, 0));
        assert_eq!(next.actions, vec![PlannedAction { switch: id("a"), weight: None }]);
    }

    #[test]
    fn overdue_timer_fires_before_schedule_changes() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, _) = dispatcher(&clock, &[("a", 1), ("b", 1)]);
        d.add_schedule(&id("a"), "day", morning(1)).unwrap();
        d.use_schedule(&id("a"), "day").unwrap();
        d.add_schedule(&id("b"), "day", morning(1)).unwrap();
        d.add_schedule(&id("b"), "spare", morning(1)).unwrap();

        clock.set(at(0, 7, 0) + chrono::Duration::seconds(2));
        d.delete_schedule(&id("b"), "spare").unwrap();
        assert_eq!(d.switch(&id("a")).unwrap().level, 1);
    }

    #[test]
    fn long_poll_interval_still_catches_skipped_transitions() {
        let clock = ManualClock::new(at(0, 6, 0));
        let recording = Arc::new(Recording::default());
        let config = DispatcherConfig {
            poll_interval_secs: 120,
            ..DispatcherConfig::default()
        };
        let (mut d, _) = ScheduleDispatcher::new(
            SwitchStore::in_memory().unwrap(),
            Arc::new(clock.clone()),
            specs(recording.clone(), &[("a", 1), ("b", 1)]),
            &config,
            None,
        )
        .unwrap();
        let early = WeightedSchedule::from_intervals([WeightedInterval::new(
            Instant::new(0, 6, 59),
            Instant::new(0, 8, 0),
            1,
        )])
        .unwrap();
        d.add_schedule(&id("a"), "day", morning(1)).unwrap();
        d.use_schedule(&id("a"), "day").unwrap();
        d.add_schedule(&id("b"), "early", early).unwrap();
        d.use_schedule(&id("b"), "early").unwrap();
        assert_eq!(d.next_event().unwrap().due, at(0, 6, 59));

        // Woken within one poll interval, but past a's transition too.
        clock.set(at(0, 7, 0) + chrono::Duration::seconds(30));
        assert!(d.fire_due());
        assert_eq!(d.switch(&id("a")).unwrap().level, 1);
        assert_eq!(d.switch(&id("b")).unwrap().level, 1);
        let next = d.next_event().unwrap();
        assert_eq!(next.due, at(0, 8, 0));
        assert_eq!(next.actions, vec![PlannedAction { switch: id("b"), weight: None }]);
    }

    #[test]
    fn use_schedule_under_keep_on_keeps_the_override() {
        let clock = ManualClock::new(at(0, 7, 30));
        let (mut d, rec) = dispatcher(&clock, &[("fan", 3)]);
        d.set_mode(&id("fan"), Mode::KeepOn, 2).unwrap();
        rec.take();

        d.add_schedule(&id("fan"), "day", morning(1)).unwrap();
        d.use_schedule(&id("fan"), "day").unwrap();
        assert!(rec.take().is_empty());
        let snap = d.switch(&id("fan")).unwrap();
        assert_eq!((snap.mode, snap.level), (Mode::KeepOn, 2));
        assert_eq!(snap.active_schedule.as_deref(), Some("day"));

        // Still schedule-governed: the override ends at the next transition.
        assert_eq!(d.next_event().unwrap().due, at(0, 9, 0));
        clock.set(at(0, 9, 0));
        assert!(d.fire_due());
        let snap = d.switch(&id("fan")).unwrap();
        assert_eq!((snap.mode, snap.level), (Mode::Auto, 0));
    }

    #[test]
    fn auto_ignores_the_requested_level() {
        let clock = ManualClock::new(at(0, 8, 0));
        let (mut d, _) = dispatcher(&clock, &[("boiler", 1)]);
        d.add_schedule(&id("boiler"), "day", morning(1)).unwrap();
        d.use_schedule(&id("boiler"), "day").unwrap();
        d.set_mode(&id("boiler"), Mode::AlwaysOff, 0).unwrap();

        d.set_mode(&id("boiler"), Mode::Auto, -1).unwrap();
        let snap = d.switch(&id("boiler")).unwrap();
        assert_eq!((snap.mode, snap.level), (Mode::Auto, 1));
        d.set_mode(&id("boiler"), Mode::Auto, 99).unwrap();
    }

    #[test]
    fn unconfigured_stored_switch_is_ignored() {
        let store = SwitchStore::in_memory().unwrap();
        store
            .save(&id("ghost"), &SwitchRecord { level: 1, ..Default::default() })
            .unwrap();

        let clock = ManualClock::new(at(0, 6, 0));
        let (d, rec) = dispatcher_with(store, &clock, &[("boiler", 1)], None);
        let ids: Vec<_> = d.switches().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![id("boiler")]);
        assert_eq!(rec.take(), vec![("boiler".to_string(), 0)]);
    }

    #[test]
    fn fired_events_are_forwarded() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (tx, mut rx) = mpsc::channel(4);
        let (mut d, _) =
            dispatcher_with(SwitchStore::in_memory().unwrap(), &clock, &[("boiler", 1)], Some(tx));
        d.add_schedule(&id("boiler"), "day", morning(1)).unwrap();
        d.use_schedule(&id("boiler"), "day").unwrap();

        clock.set(at(0, 7, 0));
        assert!(d.fire_due());
        let fired = rx.try_recv().unwrap();
        assert_eq!(
            fired,
            FiredEvent {
                switch: id("boiler"),
                level: 1,
                due: at(0, 7, 0),
                fired_at: at(0, 7, 0),
            }
        );
    }

    #[test]
    fn actuator_failure_does_not_change_state() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (mut d, _) = ScheduleDispatcher::new(
            SwitchStore::in_memory().unwrap(),
            Arc::new(clock.clone()),
            specs(Arc::new(Broken), &[("boiler", 1)]),
            &DispatcherConfig::default(),
            None,
        )
        .unwrap();
        d.set_mode(&id("boiler"), Mode::AlwaysOn, 1).unwrap();
        let snap = d.switch(&id("boiler")).unwrap();
        assert_eq!((snap.mode, snap.level), (Mode::AlwaysOn, 1));
    }

    #[test]
    fn state_survives_restart_and_auto_catches_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchd.db");
        let open = || SwitchStore::new(Connection::open(&path).unwrap()).unwrap();

        let clock = ManualClock::new(at(0, 6, 0));
        {
            let (mut d, _) = dispatcher_with(open(), &clock, &[("fan", 3), ("pump", 1)], None);
            d.add_schedule(&id("fan"), "day", morning(2)).unwrap();
            d.use_schedule(&id("fan"), "day").unwrap();
            d.set_mode(&id("pump"), Mode::AlwaysOn, 1).unwrap();
        }

        // Restarted in the middle of the morning interval.
        clock.set(at(0, 8, 0));
        let (d, rec) = dispatcher_with(open(), &clock, &[("fan", 3), ("pump", 1)], None);
        assert_eq!(
            rec.take(),
            vec![
                ("fan".to_string(), 0),
                ("fan".to_string(), 2),
                ("pump".to_string(), 1),
            ]
        );
        let fan = d.switch(&id("fan")).unwrap();
        assert_eq!((fan.mode, fan.level), (Mode::Auto, 2));
        assert_eq!(fan.active_schedule.as_deref(), Some("day"));
        assert_eq!(d.switch(&id("pump")).unwrap().mode, Mode::AlwaysOn);
        assert_eq!(d.next_event().unwrap().due, at(0, 9, 0));
    }

    #[test]
    fn dangling_active_schedule_is_dropped_on_startup() {
        let store = SwitchStore::in_memory().unwrap();
        store
            .save(
                &id("boiler"),
                &SwitchRecord {
                    active_schedule: Some("gone".to_string()),
                    level: 1,
                    ..Default::default()
                },
            )
            .unwrap();

        let clock = ManualClock::new(at(0, 6, 0));
        let (d, rec) = dispatcher_with(store, &clock, &[("boiler", 1)], None);
        let snap = d.switch(&id("boiler")).unwrap();
        assert_eq!(snap.active_schedule, None);
        assert_eq!(snap.level, 1);
        assert_eq!(rec.take(), vec![("boiler".to_string(), 1)]);
    }

    #[test]
    fn switches_are_listed_by_id() {
        let clock = ManualClock::new(at(0, 6, 0));
        let (d, _) = dispatcher(&clock, &[("pump", 1), ("boiler", 1)]);
        let ids: Vec<_> = d.switches().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![id("boiler"), id("pump")]);
        assert!(matches!(
            d.switch(&id("nope")),
            Err(DispatchError::UnknownSwitch { .. })
        ));
    }

    #[test]
    fn spec_from_config_resolves_actuators() {
        let config = SwitchdConfig::from_toml_str(
            r#"
            [switches.boiler]
            name = "Boiler"
            "#,
        )
        .unwrap();
        let specs = SwitchSpec::from_config(&config, &ActuatorRegistry::new()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].actuator.name(), "log");

        let mut config = config;
        config.switches.get_mut("boiler").unwrap().actuator = "relay".to_string();
        assert!(matches!(
            SwitchSpec::from_config(&config, &ActuatorRegistry::new()),
            Err(DispatchError::UnknownActuator { .. })
        ));
    }
}
