#![deny(warnings)]

//! Tracker runtime: the once-per-second tick that keeps the status line and
//! the goal board current.
//!
//! State lives in a `bevy_ecs` [`World`] as resources and a fixed schedule of
//! systems recomputes the derived parts on every tick. Nothing here blocks;
//! each tick does a bounded amount of work.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use bevy_ecs::prelude::*;
use bevy_ecs::schedule::ExecutorKind;
use et_core::{
    eorzea_time_of, format_et, format_hms, ms_until_next_interval, Clock, CountdownResult,
    CountdownStatus, EventDefinition, WeatherTable,
};
use fate_data::{unknown_zones, LoadState};
use fate_goals::{
    appearance_label, derive_goals, evaluate_goal, goal_description_lines, goal_label, Goal,
    GoalKind,
};
use persistence::{CompletedGoals, GoalStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Runtime configuration, read from YAML. Missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub events_path: PathBuf,
    pub completed_path: PathBuf,
    /// `tracing` filter directive, e.g. `info` or `fate_countdown=debug`.
    pub log_filter: String,
    /// Zone keys to print a weather forecast for.
    pub forecast_zones: Vec<String>,
    pub tick_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            events_path: PathBuf::from("assets/fate_data.json"),
            completed_path: PathBuf::from("saves/completed_goals.json"),
            log_filter: "info".to_string(),
            forecast_zones: vec![],
            tick_ms: 1000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl TrackerConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_yaml_str(&text)
    }
}

/// Start/stop switch for the periodic tick. Both operations are idempotent.
#[derive(Debug, Default)]
pub struct Ticker {
    running: bool,
    ticks: u64,
}

impl Ticker {
    /// Returns false if it was already running.
    pub fn start(&mut self) -> bool {
        !std::mem::replace(&mut self.running, true)
    }

    /// Returns false if it was not running.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.running, false)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[derive(Resource)]
pub struct ClockSource(pub Box<dyn Clock>);

/// Instant sampled at the start of the current tick; every system reads this
/// one value so a tick never mixes two clocks.
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct Now(pub i64);

struct CatalogEntry {
    event: EventDefinition,
    goals: Vec<Goal>,
    details: Vec<String>,
}

#[derive(Resource, Default)]
pub struct Catalog {
    table: WeatherTable,
    entries: Vec<CatalogEntry>,
    loaded: bool,
    error: Option<String>,
}

#[derive(Resource, Debug, Default, Clone)]
pub struct Completed(pub CompletedGoals);

/// Which events the board shows.
#[derive(Resource, Debug, Default, Clone, PartialEq, Eq)]
pub struct BoardFilter {
    /// Exact map name.
    pub zone: Option<String>,
    pub name_contains: Option<String>,
}

impl BoardFilter {
    fn matches(&self, event: &EventDefinition) -> bool {
        self.zone.as_deref().map_or(true, |z| event.zone == z)
            && self
                .name_contains
                .as_deref()
                .map_or(true, |n| event.name.contains(n))
    }
}

/// One goal as displayed on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardRow {
    /// Persisted goal key.
    pub key: String,
    pub zone: String,
    pub event: String,
    pub level: Option<u32>,
    pub kind: GoalKind,
    pub label: Option<String>,
    pub appearance: Option<String>,
    pub details: Vec<String>,
    pub completed: bool,
    /// Not evaluated for completed goals.
    pub countdown: Option<CountdownResult>,
}

impl BoardRow {
    pub fn active(&self) -> bool {
        !self.completed && self.countdown.as_ref().is_some_and(|c| c.active)
    }

    pub fn status_text(&self) -> &str {
        match &self.countdown {
            _ if self.completed => "Completed",
            Some(countdown) => &countdown.description,
            None => "—",
        }
    }

    fn sort_value(&self) -> u64 {
        match &self.countdown {
            Some(c) if !self.completed => match c.status {
                CountdownStatus::Completable | CountdownStatus::Upcoming => c.remaining_ms,
                CountdownStatus::Waiting | CountdownStatus::MultiGoal => u64::MAX,
            },
            _ => u64::MAX,
        }
    }
}

/// Keeps the board order steady between ticks.
///
/// A full sort happens only when the set of rows changes or some row starts or
/// stops being completable; otherwise rows keep their previous positions,
/// except that completed rows always go last.
#[derive(Debug, Default)]
pub struct OrderCache {
    last_order: Vec<String>,
    last_active: HashMap<String, bool>,
}

impl OrderCache {
    pub fn reset(&mut self) {
        self.last_order.clear();
        self.last_active.clear();
    }

    pub fn arrange(&mut self, rows: &mut [BoardRow]) {
        let known: HashSet<&str> = self.last_order.iter().map(String::as_str).collect();
        let needs_full_sort = self.last_order.is_empty()
            || self.last_order.len() != rows.len()
            || rows.iter().any(|r| !known.contains(r.key.as_str()));
        let status_changed = rows
            .iter()
            .any(|r| self.last_active.get(&r.key) != Some(&r.active()));

        if needs_full_sort || status_changed {
            rows.sort_by(|a, b| {
                a.completed
                    .cmp(&b.completed)
                    .then_with(|| b.active().cmp(&a.active()))
                    .then_with(|| a.sort_value().cmp(&b.sort_value()))
                    .then_with(|| a.key.cmp(&b.key))
            });
            self.last_order = rows.iter().map(|r| r.key.clone()).collect();
        } else {
            let position: HashMap<&str, usize> = self
                .last_order
                .iter()
                .enumerate()
                .map(|(i, k)| (k.as_str(), i))
                .collect();
            rows.sort_by_key(|r| (r.completed, position.get(r.key.as_str()).copied()));
        }
        self.last_active = rows.iter().map(|r| (r.key.clone(), r.active())).collect();
    }
}

#[derive(Resource, Debug, Default)]
pub struct Board {
    pub rows: Vec<BoardRow>,
    order: OrderCache,
}

/// Current in-game clock and time until the next weather change.
#[derive(Resource, Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub et_clock: String,
    pub weather_change_ms: u64,
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ET {} | weather changes in {}",
            self.et_clock,
            format_hms(self.weather_change_ms)
        )
    }
}

pub fn sample_clock(clock: Res<ClockSource>, mut now: ResMut<Now>) {
    now.0 = clock.0.now_ms();
}

pub fn update_status(now: Res<Now>, mut status: ResMut<StatusLine>) {
    let et = eorzea_time_of(now.0);
    status.et_clock = format_et(et.bell, et.minute);
    status.weather_change_ms = ms_until_next_interval(now.0).max(0) as u64;
}

pub fn refresh_board(
    now: Res<Now>,
    catalog: Res<Catalog>,
    completed: Res<Completed>,
    filter: Res<BoardFilter>,
    mut board: ResMut<Board>,
) {
    let mut rows = Vec::new();
    for entry in catalog.entries.iter().filter(|e| filter.matches(&e.event)) {
        let appearance = appearance_label(&entry.event);
        for goal in &entry.goals {
            let key = goal.key.to_string();
            let done = completed.0.contains(&key);
            let countdown = if done {
                None
            } else {
                evaluate_goal(&catalog.table, &entry.event, goal, now.0)
            };
            rows.push(BoardRow {
                key,
                zone: entry.event.zone.clone(),
                event: entry.event.name.clone(),
                level: entry.event.level,
                kind: goal.kind,
                label: goal_label(goal),
                appearance: appearance.clone(),
                details: entry.details.clone(),
                completed: done,
                countdown,
            });
        }
    }
    let board = &mut *board;
    board.order.arrange(&mut rows);
    board.rows = rows;
}

/// The tracker: world state, tick schedule and the completed-goal store.
pub struct Tracker {
    world: World,
    schedule: Schedule,
    ticker: Ticker,
    store: Box<dyn GoalStore>,
}

impl Tracker {
    pub fn new(clock: Box<dyn Clock>, table: WeatherTable, store: Box<dyn GoalStore>) -> Self {
        let mut world = World::new();
        world.insert_resource(ClockSource(clock));
        world.insert_resource(Now::default());
        world.insert_resource(Catalog {
            table,
            ..Default::default()
        });
        world.insert_resource(Completed(store.load()));
        world.insert_resource(BoardFilter::default());
        world.insert_resource(Board::default());
        world.insert_resource(StatusLine::default());

        let mut schedule = Schedule::default();
        schedule.set_executor_kind(ExecutorKind::SingleThreaded);
        schedule.add_systems((sample_clock, update_status, refresh_board).chain());

        Self {
            world,
            schedule,
            ticker: Ticker::default(),
            store,
        }
    }

    /// Replace the event catalog with the outcome of a data load.
    pub fn load(&mut self, state: LoadState) {
        let mut catalog = self.world.resource_mut::<Catalog>();
        match state {
            LoadState::Loaded(events) => {
                let unknown = unknown_zones(&catalog.table, &events).len();
                info!(events = events.len(), unknown_zones = unknown, "event catalog loaded");
                catalog.entries = events
                    .into_iter()
                    .map(|event| CatalogEntry {
                        goals: derive_goals(&event),
                        details: goal_description_lines(&event),
                        event,
                    })
                    .collect();
                catalog.loaded = true;
                catalog.error = None;
            }
            LoadState::Failed(message) => {
                warn!(error = %message, "event catalog unavailable");
                catalog.entries.clear();
                catalog.loaded = false;
                catalog.error = Some(message);
            }
            LoadState::Pending => {
                catalog.entries.clear();
                catalog.loaded = false;
                catalog.error = None;
            }
        }
        self.world.resource_mut::<Board>().order.reset();
    }

    pub fn start(&mut self) -> bool {
        self.ticker.start()
    }

    pub fn stop(&mut self) -> bool {
        self.ticker.stop()
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    /// Run one tick if the ticker is running; returns whether it ran.
    pub fn tick(&mut self) -> bool {
        if !self.ticker.is_running() {
            return false;
        }
        self.refresh();
        self.ticker.ticks += 1;
        true
    }

    /// Recompute status and board now, regardless of the ticker.
    pub fn refresh(&mut self) {
        self.schedule.run(&mut self.world);
    }

    /// Flip one goal's completed flag, persist, and refresh.
    pub fn toggle_goal(&mut self, key: &str) -> Result<bool, StoreError> {
        let done = self.world.resource_mut::<Completed>().0.toggle(key);
        self.persist()?;
        self.refresh();
        Ok(done)
    }

    /// Bulk toggle every goal of one event. `None` if no such event is loaded.
    pub fn toggle_event(&mut self, zone: &str, name: &str) -> Result<Option<bool>, StoreError> {
        let keys: Vec<String> = {
            let catalog = self.world.resource::<Catalog>();
            match catalog
                .entries
                .iter()
                .find(|e| e.event.zone == zone && e.event.name == name)
            {
                Some(entry) => entry.goals.iter().map(|g| g.key.to_string()).collect(),
                None => return Ok(None),
            }
        };
        let done = self
            .world
            .resource_mut::<Completed>()
            .0
            .set_all(keys.iter().map(String::as_str));
        self.persist()?;
        self.refresh();
        Ok(Some(done))
    }

    pub fn set_filter(&mut self, filter: BoardFilter) {
        self.world.insert_resource(filter);
        self.refresh();
    }

    fn persist(&self) -> Result<(), StoreError> {
        self.store.save(&self.world.resource::<Completed>().0)
    }

    pub fn board(&self) -> &[BoardRow] {
        &self.world.resource::<Board>().rows
    }

    pub fn status(&self) -> &StatusLine {
        self.world.resource::<StatusLine>()
    }

    pub fn completed(&self) -> &CompletedGoals {
        &self.world.resource::<Completed>().0
    }

    pub fn now_ms(&self) -> i64 {
        self.world.resource::<Now>().0
    }

    pub fn table(&self) -> &WeatherTable {
        &self.world.resource::<Catalog>().table
    }

    pub fn is_loaded(&self) -> bool {
        self.world.resource::<Catalog>().loaded
    }

    /// Message of the last failed load, for display.
    pub fn load_error(&self) -> Option<&str> {
        self.world.resource::<Catalog>().error.as_deref()
    }
}
