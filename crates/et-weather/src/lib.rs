#![deny(warnings)]

//! Deterministic zone weather.
//!
//! Weather is a pure function of the 8-bell interval: the in-game day count and
//! the interval slot are mixed into a value in `[0, 100)` which then selects an
//! entry from the zone's weighted table. The bit mixing must stay exactly as
//! written; players compare its output against other trackers.

use et_core::{
    eorzea_time_of, nearest_interval_start, WeatherChance, WeatherKind, WeatherTable, ZoneKey,
    BELLS_PER_DAY, BELL_MS, DAY_MS, INTERVAL_BELLS, INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Weather of one zone over one 8-bell interval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneWeather {
    pub zone: ZoneKey,
    pub weather: WeatherKind,
    /// Real instant the interval starts.
    pub interval_start: i64,
    /// Real instant the interval ends (exclusive).
    pub interval_end: i64,
}

/// Pseudo-random weather roll in `[0, 100)` for the interval containing `real_ms`.
pub fn weather_value(real_ms: i64) -> u32 {
    let bell = real_ms.div_euclid(BELL_MS).rem_euclid(BELLS_PER_DAY);
    let increment = (bell + INTERVAL_BELLS - bell % INTERVAL_BELLS) % BELLS_PER_DAY;
    let total_days = real_ms.div_euclid(DAY_MS);
    // Truncation to 32 bits is part of the algorithm.
    let base = (total_days * 100 + increment) as u32;
    let step1 = (base << 11) ^ base;
    let step2 = (step1 >> 8) ^ step1;
    step2 % 100
}

/// Walk the cumulative weights; `None` when the table runs out before `value`.
pub fn try_pick(chances: &[WeatherChance], value: u32) -> Option<WeatherKind> {
    let mut cursor = 0u32;
    for entry in chances {
        cursor = cursor.saturating_add(entry.chance);
        if value < cursor {
            return Some(entry.weather);
        }
    }
    None
}

/// Select the weather for a roll, falling back to the last entry (or clear
/// skies for an empty table) when the weights do not cover `value`.
pub fn pick_from_chances(chances: &[WeatherChance], value: u32) -> WeatherKind {
    try_pick(chances, value).unwrap_or_else(|| {
        warn!(value, entries = chances.len(), "weather table exhausted, using fallback");
        chances
            .last()
            .map_or(WeatherKind::ClearSkies, |entry| entry.weather)
    })
}

/// Select the weather of `zone` for a roll. `None` if the zone is unknown.
pub fn pick_weather(table: &WeatherTable, zone: &ZoneKey, value: u32) -> Option<WeatherKind> {
    table
        .zone(zone)
        .map(|chances| pick_from_chances(chances, value))
}

/// Weather of `zone` during the interval containing `real_ms`.
pub fn weather_at(table: &WeatherTable, zone: &ZoneKey, real_ms: i64) -> Option<WeatherKind> {
    pick_weather(table, zone, weather_value(nearest_interval_start(real_ms)))
}

fn zone_weather(table: &WeatherTable, zone: &ZoneKey, interval_start: i64) -> Option<ZoneWeather> {
    Some(ZoneWeather {
        zone: zone.clone(),
        weather: weather_at(table, zone, interval_start)?,
        interval_start,
        interval_end: interval_start + INTERVAL_MS,
    })
}

/// Current weather for a map display name; `None` for names the table does not know.
pub fn current_weather(table: &WeatherTable, zone_name: &str, now_ms: i64) -> Option<ZoneWeather> {
    let zone = table.zone_for_name(zone_name)?;
    zone_weather(table, zone, nearest_interval_start(now_ms))
}

/// The current interval followed by the next `count - 1` ones.
pub fn forecast(
    table: &WeatherTable,
    zone: &ZoneKey,
    now_ms: i64,
    count: usize,
) -> Option<Vec<ZoneWeather>> {
    table.zone(zone)?;
    let first = eorzea_time_of(now_ms).interval_start;
    (0..count as i64)
        .map(|i| zone_weather(table, zone, first + i * INTERVAL_MS))
        .collect()
}
