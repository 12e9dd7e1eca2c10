#![deny(warnings)]

//! Goal resolution: turn one event definition into trackable goals and pick
//! the evaluator that answers each goal's countdown.

use std::fmt;

use et_core::{
    strip_combination_marker, summarize_weather_label, CountdownResult, DayPhase,
    EventDefinition, WeatherExpr, WeatherSet, WeatherTable,
};
use fate_countdown::{
    appearance_window_countdown, combined_window_countdown, time_of_day_countdown,
    weather_and_time_countdown, weather_countdown,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identity of a goal for completion tracking.
///
/// The string form (`Display`) is what gets persisted, so it must not change
/// while the requirement text behind it stays the same.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GoalKey {
    pub zone: String,
    pub event: String,
    pub index: usize,
    pub weather: String,
    pub time: String,
}

impl fmt::Display for GoalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|goal|{}|{}|{}",
            self.zone, self.event, self.index, self.weather, self.time
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalKind {
    /// Weather and day/night must hold at the same time.
    Combined,
    Weather,
    Time,
    /// No structured requirement; only the appearance conditions apply.
    Informational,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub key: GoalKey,
    pub kind: GoalKind,
    pub weather: Option<String>,
    pub time: Option<String>,
}

/// Derive the ordered goal list of an event.
///
/// A time requirement marked with `&` binds to the weather requirement as one
/// combined goal. Otherwise weather parts joined by `&` become separate goals
/// and a plain time requirement is a goal of its own. Events without any
/// goal get a single informational entry.
pub fn derive_goals(event: &EventDefinition) -> Vec<Goal> {
    let weather = event.goal_weather.as_deref().map(str::trim);
    let time = event.goal_time.as_deref();
    let combined_time = time.and_then(strip_combination_marker);

    let mut parts: Vec<(GoalKind, Option<&str>, Option<&str>)> = Vec::new();
    match (weather, combined_time) {
        (Some(weather), Some(time)) => {
            parts.push((GoalKind::Combined, Some(weather), Some(time)))
        }
        (Some(weather), None) => parts.extend(
            weather
                .split('&')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| (GoalKind::Weather, Some(p), None)),
        ),
        (None, _) => {}
    }
    if let (Some(time), None) = (time, combined_time) {
        parts.push((GoalKind::Time, None, Some(time.trim())));
    }
    if parts.is_empty() {
        parts.push((GoalKind::Informational, None, None));
    }

    parts
        .into_iter()
        .enumerate()
        .map(|(index, (kind, weather, time))| Goal {
            key: GoalKey {
                zone: event.zone.clone(),
                event: event.name.clone(),
                index,
                weather: weather.unwrap_or_default().to_string(),
                time: time.unwrap_or_default().to_string(),
            },
            kind,
            weather: weather.map(str::to_string),
            time: time.map(str::to_string),
        })
        .collect()
}

/// Countdown for one goal of `event` at `now_ms`.
///
/// Declared appearance weather wins over the appearance window: the goal then
/// follows the weather (narrowed by the goal's own weather, if any). Appearance
/// weather naming no known kind counts as absent. Without it, an appearance window is intersected with the goal's conditions. `None`
/// means no countdown is available: the zone is unknown or nothing is
/// declared that could be timed.
pub fn evaluate_goal(
    table: &WeatherTable,
    event: &EventDefinition,
    goal: &Goal,
    now_ms: i64,
) -> Option<CountdownResult> {
    let Some(zone) = table.zone_for_name(&event.zone) else {
        debug!(zone = %event.zone, event = %event.name, "no weather table for zone");
        return None;
    };
    let goal_weather = match goal.weather.as_deref().map(WeatherExpr::parse) {
        Some(WeatherExpr::AllOf(_)) => return Some(CountdownResult::multi_goal()),
        Some(WeatherExpr::AnyOf(set)) => Some(set),
        None => None,
    };
    let phase = goal.time.as_deref().and_then(DayPhase::parse);

    let appearance = event
        .appearance_weather
        .as_deref()
        .map(WeatherSet::parse)
        .filter(|set| !set.is_empty());
    if let Some(appearance) = appearance {
        let set = match &goal_weather {
            Some(goal_set) => appearance.intersection(goal_set),
            None => appearance,
        };
        let expr = WeatherExpr::AnyOf(set);
        return match phase {
            Some(phase) => weather_and_time_countdown(table, zone, &expr, phase, now_ms),
            None => weather_countdown(table, zone, &expr, now_ms),
        };
    }

    if let Some(window) = event.appearance_window() {
        if goal_weather.is_none() && phase.is_none() {
            return Some(appearance_window_countdown(&window, now_ms));
        }
        return combined_window_countdown(
            table,
            zone,
            &window,
            goal_weather.as_ref(),
            phase,
            now_ms,
        );
    }

    match (goal_weather, phase) {
        (Some(set), Some(phase)) => {
            weather_and_time_countdown(table, zone, &WeatherExpr::AnyOf(set), phase, now_ms)
        }
        (Some(set), None) => weather_countdown(table, zone, &WeatherExpr::AnyOf(set), now_ms),
        (None, Some(phase)) => Some(time_of_day_countdown(phase, now_ms)),
        (None, None) => None,
    }
}

/// Freeform goal text split into display lines, without `1.` style numbering.
pub fn goal_description_lines(event: &EventDefinition) -> Vec<String> {
    let Some(text) = event.goal_text.as_deref() else {
        return Vec::new();
    };
    text.lines()
        .map(|line| strip_numbering(line.trim()).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_numbering(line: &str) -> &str {
    let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == line.len() {
        return line;
    }
    rest.strip_prefix('.').unwrap_or(line)
}

/// Short tag for a goal's own requirement, e.g. `晴天 白天`.
pub fn goal_label(goal: &Goal) -> Option<String> {
    let weather = goal
        .weather
        .as_deref()
        .map(summarize_weather_label)
        .filter(|w| !w.is_empty());
    let phase = goal
        .time
        .as_deref()
        .and_then(DayPhase::parse)
        .map(|p| p.label().to_string());
    match (weather, phase) {
        (Some(w), Some(p)) => Some(format!("{w} {p}")),
        (w, p) => w.or(p),
    }
}

/// The event's appearance conditions, e.g. `雨天 ET 11:10 - 12:10`.
pub fn appearance_label(event: &EventDefinition) -> Option<String> {
    let weather = event.appearance_weather.as_deref().map(summarize_weather_label);
    let window = event.appearance_window().map(|w| match (w.start, w.end) {
        (Some(start), Some(end)) => format!("ET {start} - {end}"),
        (Some(start), None) => format!("ET {start} -"),
        (None, Some(end)) => format!("ET - {end}"),
        (None, None) => String::new(),
    });
    match (weather, window) {
        (Some(w), Some(t)) => Some(format!("{w} {t}")),
        (w, t) => w.or(t),
    }
}
