#![deny(warnings)]

//! Eorzea clock, reference data and shared models for the FATE tracker.
//!
//! Every computation here is a pure function of a real-world instant given in
//! unix milliseconds. The only state is the static weather reference table,
//! which is built once and then only read.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use crate::WeatherKind as W;

/// Real milliseconds in one bell (in-game hour).
pub const BELL_MS: i64 = 175_000;
/// Bells in one in-game day.
pub const BELLS_PER_DAY: i64 = 24;
/// Real milliseconds in one in-game day.
pub const DAY_MS: i64 = BELL_MS * BELLS_PER_DAY;
/// Bells covered by one weather interval.
pub const INTERVAL_BELLS: i64 = 8;
/// Real milliseconds in one weather interval.
pub const INTERVAL_MS: i64 = BELL_MS * INTERVAL_BELLS;
/// In-game minutes per in-game day.
pub const MINUTES_PER_DAY: i64 = 1440;
/// Real milliseconds in one in-game minute (not an integer).
pub const MINUTE_MS: f64 = BELL_MS as f64 / 60.0;
/// Minute of day at which daytime starts (06:00).
pub const DAY_START_MINUTE: i64 = 360;
/// Minute of day at which daytime ends (18:00).
pub const DAY_END_MINUTE: i64 = 1080;

/// In-game clock reading for one real-world instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EorzeaInstant {
    /// Hour of the in-game day, 0..=23.
    pub bell: u8,
    /// Minute of the bell, 0..=59.
    pub minute: u8,
    /// Real instant at which the current 8-bell weather interval began.
    pub interval_start: i64,
}

impl EorzeaInstant {
    pub fn minute_of_day(&self) -> i64 {
        i64::from(self.bell) * 60 + i64::from(self.minute)
    }
}

/// Convert a real instant into the in-game clock.
pub fn eorzea_time_of(real_ms: i64) -> EorzeaInstant {
    let bell = real_ms.div_euclid(BELL_MS).rem_euclid(BELLS_PER_DAY);
    let minute = real_ms.rem_euclid(BELL_MS) * 60 / BELL_MS;
    EorzeaInstant {
        bell: bell as u8,
        minute: minute as u8,
        interval_start: nearest_interval_start(real_ms),
    }
}

/// Start of the 8-bell weather interval containing `real_ms`.
///
/// The result is never after `real_ms` and is always a multiple of
/// [`INTERVAL_MS`].
pub fn nearest_interval_start(real_ms: i64) -> i64 {
    let raw_bell = real_ms.div_euclid(BELL_MS);
    (raw_bell - raw_bell.rem_euclid(INTERVAL_BELLS)) * BELL_MS
}

/// Real milliseconds until the weather changes next.
pub fn ms_until_next_interval(now_ms: i64) -> i64 {
    nearest_interval_start(now_ms) + INTERVAL_MS - now_ms
}

/// Real-time span of a whole number of in-game minutes, floored to the millisecond.
pub fn minutes_to_ms(minutes: i64) -> i64 {
    (minutes * BELL_MS).div_euclid(60)
}

/// Real milliseconds from `now_ms` until the clock next reads `bell:minute`.
///
/// Works on whole in-game minutes, so the result lies in `[0, DAY_MS)` and is
/// zero during the target minute itself.
pub fn ms_until_et_time(target_bell: u8, target_minute: u8, now_ms: i64) -> i64 {
    let current = eorzea_time_of(now_ms).minute_of_day();
    let target = i64::from(target_bell) * 60 + i64::from(target_minute);
    minutes_to_ms((target - current).rem_euclid(MINUTES_PER_DAY))
}

/// First real millisecond at which in-game day `day` reads `bell:minute`.
pub fn et_to_real_ms(day: i64, bell: u8, minute: u8) -> i64 {
    day * DAY_MS + i64::from(bell) * BELL_MS + (i64::from(minute) * BELL_MS + 59) / 60
}

/// Start of the in-game day containing `real_ms`.
pub fn et_day_start(real_ms: i64) -> i64 {
    real_ms.div_euclid(DAY_MS) * DAY_MS
}

/// Format as `HH:MM` clock text.
pub fn format_et(bell: u8, minute: u8) -> String {
    format!("{bell:02}:{minute:02}")
}

/// Format a real duration as `HH:MM:SS`.
pub fn format_hms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Source of the current real-world instant.
pub trait Clock: Send + Sync {
    /// Unix time in milliseconds.
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> i64 {
        (**self).now_ms()
    }
}

/// Weather kinds appearing in the reference tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WeatherKind {
    ClearSkies,
    FairSkies,
    Clouds,
    Fog,
    Rain,
    Showers,
    Wind,
    Gales,
    Thunder,
    Thunderstorms,
    Snow,
    Blizzard,
    Gloom,
    HeatWaves,
    DustStorms,
}

impl WeatherKind {
    pub const ALL: [WeatherKind; 15] = [
        WeatherKind::ClearSkies,
        WeatherKind::FairSkies,
        WeatherKind::Clouds,
        WeatherKind::Fog,
        WeatherKind::Rain,
        WeatherKind::Showers,
        WeatherKind::Wind,
        WeatherKind::Gales,
        WeatherKind::Thunder,
        WeatherKind::Thunderstorms,
        WeatherKind::Snow,
        WeatherKind::Blizzard,
        WeatherKind::Gloom,
        WeatherKind::HeatWaves,
        WeatherKind::DustStorms,
    ];

    /// Table identifier, e.g. `clearSkies`.
    pub fn id(self) -> &'static str {
        match self {
            WeatherKind::ClearSkies => "clearSkies",
            WeatherKind::FairSkies => "fairSkies",
            WeatherKind::Clouds => "clouds",
            WeatherKind::Fog => "fog",
            WeatherKind::Rain => "rain",
            WeatherKind::Showers => "showers",
            WeatherKind::Wind => "wind",
            WeatherKind::Gales => "gales",
            WeatherKind::Thunder => "thunder",
            WeatherKind::Thunderstorms => "thunderstorms",
            WeatherKind::Snow => "snow",
            WeatherKind::Blizzard => "blizzard",
            WeatherKind::Gloom => "gloom",
            WeatherKind::HeatWaves => "heatWaves",
            WeatherKind::DustStorms => "dustStorms",
        }
    }

    /// Display label used by the event data.
    pub fn label(self) -> &'static str {
        match self {
            WeatherKind::ClearSkies => "碧空",
            WeatherKind::FairSkies => "晴朗",
            WeatherKind::Clouds => "阴云",
            WeatherKind::Fog => "薄雾",
            WeatherKind::Rain => "小雨",
            WeatherKind::Showers => "暴雨",
            WeatherKind::Wind => "微风",
            WeatherKind::Gales => "强风",
            WeatherKind::Thunder => "打雷",
            WeatherKind::Thunderstorms => "雷雨",
            WeatherKind::Snow => "小雪",
            WeatherKind::Blizzard => "暴雪",
            WeatherKind::Gloom => "妖雾",
            WeatherKind::HeatWaves => "热浪",
            WeatherKind::DustStorms => "扬沙",
        }
    }

    /// Resolve either a display label or a table identifier.
    pub fn from_label(text: &str) -> Option<Self> {
        let text = text.trim();
        WeatherKind::ALL
            .into_iter()
            .find(|w| w.label() == text || w.id() == text)
    }
}

impl fmt::Display for WeatherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Set of acceptable weather kinds (logical OR).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherSet(pub BTreeSet<WeatherKind>);

impl WeatherSet {
    /// Parse `A|B|C`; labels that name no known weather are dropped.
    pub fn parse(expr: &str) -> Self {
        let mut set = BTreeSet::new();
        for part in expr.split('|').map(str::trim).filter(|p| !p.is_empty()) {
            match WeatherKind::from_label(part) {
                Some(w) => {
                    set.insert(w);
                }
                None => debug!(label = part, "ignoring unknown weather label"),
            }
        }
        WeatherSet(set)
    }

    pub fn contains(&self, weather: WeatherKind) -> bool {
        self.0.contains(&weather)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn intersection(&self, other: &WeatherSet) -> WeatherSet {
        WeatherSet(self.0.intersection(&other.0).copied().collect())
    }
}

impl FromIterator<WeatherKind> for WeatherSet {
    fn from_iter<I: IntoIterator<Item = WeatherKind>>(iter: I) -> Self {
        WeatherSet(iter.into_iter().collect())
    }
}

/// A parsed weather requirement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WeatherExpr {
    /// Any one of the listed kinds satisfies the requirement.
    AnyOf(WeatherSet),
    /// Several independent goals joined with `&`; each part is completed separately.
    AllOf(Vec<WeatherSet>),
}

impl WeatherExpr {
    pub fn parse(expr: &str) -> Self {
        if expr.contains('&') {
            WeatherExpr::AllOf(
                expr.split('&')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(WeatherSet::parse)
                    .collect(),
            )
        } else {
            WeatherExpr::AnyOf(WeatherSet::parse(expr))
        }
    }
}

/// Collapse well-known weather groups into one display word.
pub fn summarize_weather_label(text: &str) -> String {
    let s = text.trim();
    if s.contains("小雨|雷雨|暴雨") || s.contains("小雨|暴雨|雷雨") {
        return "雨天".to_string();
    }
    if s.contains("碧空|晴朗") || s.contains("晴朗|碧空") {
        return "晴天".to_string();
    }
    s.to_string()
}

/// Daytime (06:00-18:00) or nighttime (18:00-06:00).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPhase {
    Day,
    Night,
}

impl DayPhase {
    /// Recognize a whole `白天`/`day` or `夜晚`/`night` token in the text.
    pub fn parse(text: &str) -> Option<Self> {
        let is_separator =
            |c: char| c.is_whitespace() || c.is_ascii_punctuation() || "，、；".contains(c);
        let tokens = || text.split(is_separator).filter(|t| !t.is_empty());
        let has = |cn: &str, en: &str| tokens().any(|t| t == cn || t.eq_ignore_ascii_case(en));
        if has("白天", "day") {
            Some(DayPhase::Day)
        } else if has("夜晚", "night") {
            Some(DayPhase::Night)
        } else {
            None
        }
    }

    /// Bell ranges `[from, to)` of the phase within one in-game day.
    pub fn bell_ranges(self) -> &'static [(i64, i64)] {
        match self {
            DayPhase::Day => &[(6, 18)],
            DayPhase::Night => &[(0, 6), (18, 24)],
        }
    }

    pub fn contains_bell(self, bell: u8) -> bool {
        let bell = i64::from(bell);
        self.bell_ranges()
            .iter()
            .any(|&(from, to)| (from..to).contains(&bell))
    }

    /// Display label used by the event data.
    pub fn label(self) -> &'static str {
        match self {
            DayPhase::Day => "白天",
            DayPhase::Night => "夜晚",
        }
    }
}

/// Return the remainder of a time requirement that carries the leading `&`
/// "combined with weather" marker.
pub fn strip_combination_marker(text: &str) -> Option<&str> {
    text.trim_start().strip_prefix('&').map(str::trim)
}

/// In-game clock time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EtTime {
    pub hour: u8,
    pub minute: u8,
}

impl EtTime {
    /// Interpret `HHMM` digits; the hour wraps at 24 and minutes >= 60 are rejected.
    pub fn from_hhmm(n: u32) -> Option<Self> {
        let minute = n % 100;
        if minute >= 60 {
            return None;
        }
        Some(EtTime {
            hour: ((n / 100) % 24) as u8,
            minute: minute as u8,
        })
    }

    pub fn minute_of_day(self) -> i64 {
        i64::from(self.hour) * 60 + i64::from(self.minute)
    }
}

impl fmt::Display for EtTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

fn is_short_number(s: &str) -> bool {
    (1..=2).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse an in-game clock string.
///
/// Accepts `HHMM` digits (3 or 4 of them) and `H:MM` / `HH:MM:SS` with either
/// an ASCII or a full-width colon. Colon forms clamp out-of-range fields.
pub fn parse_et_time(raw: &str) -> Option<EtTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if (3..=4).contains(&raw.len()) && raw.bytes().all(|b| b.is_ascii_digit()) {
        return EtTime::from_hhmm(raw.parse().ok()?);
    }
    let s = raw.replace('\u{FF1A}', ":");
    let mut parts = s.split(':');
    let (hour, minute) = (parts.next()?, parts.next()?);
    let seconds = parts.next();
    if parts.next().is_some() || !is_short_number(hour) || !is_short_number(minute) {
        return None;
    }
    if seconds.is_some_and(|sec| !is_short_number(sec)) {
        return None;
    }
    Some(EtTime {
        hour: hour.parse::<u8>().ok()?.min(23),
        minute: minute.parse::<u8>().ok()?.min(59),
    })
}

const RANGE_SEPARATORS: [char; 3] = ['-', '–', '—'];

fn is_colon_time(s: &str) -> bool {
    match s.split_once(':') {
        Some((h, m)) => is_short_number(h) && is_short_number(m),
        None => false,
    }
}

/// Split a combined `start - end` clock range.
///
/// Text that is not a well-formed range comes back unchanged as the start.
pub fn split_et_range(text: &str) -> (String, Option<String>) {
    let s = text.trim().replace('\u{FF1A}', ":");
    if let Some(idx) = s.find(|c: char| RANGE_SEPARATORS.contains(&c)) {
        let sep_len = s[idx..].chars().next().map_or(1, char::len_utf8);
        let (start, end) = (s[..idx].trim(), s[idx + sep_len..].trim());
        if is_colon_time(start) && is_colon_time(end) {
            return (start.to_string(), Some(end.to_string()));
        }
    }
    (s, None)
}

/// Daily in-game interval during which an event can appear.
///
/// A missing bound means the window is open on that side: no start means
/// 00:00, no end means 24:00.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppearanceWindow {
    pub start: Option<EtTime>,
    pub end: Option<EtTime>,
}

impl AppearanceWindow {
    /// Build from the raw appearance fields; the start field may hold a whole range.
    pub fn from_fields(start: Option<&str>, end: Option<&str>) -> Option<Self> {
        let mut start_text = start.unwrap_or_default().trim().to_string();
        let mut end_text = end.unwrap_or_default().trim().to_string();
        if end_text.is_empty() && start_text.contains(|c: char| RANGE_SEPARATORS.contains(&c)) {
            let (s, e) = split_et_range(&start_text);
            start_text = s;
            end_text = e.unwrap_or_default();
        }
        let window = AppearanceWindow {
            start: parse_et_time(&start_text),
            end: parse_et_time(&end_text),
        };
        if window.start.is_none() && window.end.is_none() {
            return None;
        }
        Some(window)
    }

    /// Start and end minute of day; an end at or before the start wraps past midnight.
    pub fn bounds_minutes(&self) -> (i64, i64) {
        let start = self.start.map_or(0, EtTime::minute_of_day);
        let mut end = self.end.map_or(MINUTES_PER_DAY, EtTime::minute_of_day);
        if end <= start {
            end += MINUTES_PER_DAY;
        }
        (start, end)
    }
}

/// Identifier indexing the weather table, e.g. `uldah`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneKey(pub String);

impl fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One weighted entry of a zone's weather table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherChance {
    pub weather: WeatherKind,
    pub chance: u32,
}

/// Weather reference data: per-zone weighted tables and display names.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WeatherTable {
    /// Ordered chances per zone key.
    pub zones: BTreeMap<ZoneKey, Vec<WeatherChance>>,
    /// Map display name to zone key.
    pub names: BTreeMap<String, ZoneKey>,
}

/// Problems found in a weather table.
#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("zone {0} has no weather entries")]
    EmptyZone(String),
    #[error("zone {zone} weights sum to {total}, expected at least 100")]
    WeightsBelowHundred { zone: String, total: u32 },
    #[error("map name {name} points at unknown zone {zone}")]
    UnknownZoneForName { name: String, zone: String },
}

type BuiltinZone = (&'static str, &'static [(WeatherKind, u32)]);

#[rustfmt::skip]
const BUILTIN_ZONES: &[BuiltinZone] = &[
    ("uldah", &[(W::ClearSkies, 40), (W::FairSkies, 20), (W::Clouds, 25), (W::Fog, 10), (W::Rain, 5)]),
    ("westernThanalan", &[(W::ClearSkies, 40), (W::FairSkies, 20), (W::Clouds, 25), (W::Fog, 10), (W::Rain, 5)]),
    ("centralThanalan", &[(W::DustStorms, 15), (W::ClearSkies, 40), (W::FairSkies, 20), (W::Clouds, 10), (W::Fog, 10), (W::Rain, 5)]),
    ("easternThanalan", &[(W::ClearSkies, 40), (W::FairSkies, 20), (W::Clouds, 10), (W::Fog, 10), (W::Rain, 5), (W::Showers, 15)]),
    ("southernThanalan", &[(W::HeatWaves, 20), (W::ClearSkies, 40), (W::FairSkies, 20), (W::Clouds, 10), (W::Fog, 10)]),
    ("northernThanalan", &[(W::ClearSkies, 5), (W::FairSkies, 15), (W::Clouds, 30), (W::Fog, 50)]),
    ("gridania", &[(W::Rain, 20), (W::Fog, 10), (W::Clouds, 10), (W::FairSkies, 15), (W::ClearSkies, 30), (W::FairSkies, 15)]),
    ("centralShroud", &[(W::Thunder, 5), (W::Rain, 15), (W::Fog, 10), (W::Clouds, 10), (W::FairSkies, 15), (W::ClearSkies, 30), (W::FairSkies, 15)]),
    ("eastShroud", &[(W::Thunder, 5), (W::Rain, 15), (W::Fog, 10), (W::Clouds, 10), (W::FairSkies, 15), (W::ClearSkies, 30), (W::FairSkies, 15)]),
    ("southShroud", &[(W::Fog, 5), (W::Thunderstorms, 5), (W::Thunder, 15), (W::Fog, 5), (W::Clouds, 10), (W::FairSkies, 30), (W::ClearSkies, 30)]),
    ("northShroud", &[(W::Fog, 5), (W::Showers, 5), (W::Rain, 15), (W::Fog, 5), (W::Clouds, 10), (W::FairSkies, 30), (W::ClearSkies, 30)]),
    ("limsaLominsa", &[(W::Clouds, 20), (W::ClearSkies, 30), (W::FairSkies, 30), (W::Fog, 10), (W::Rain, 10)]),
    ("middleLaNoscea", &[(W::Clouds, 20), (W::ClearSkies, 30), (W::FairSkies, 20), (W::Wind, 10), (W::Fog, 10), (W::Rain, 10)]),
    ("lowerLaNoscea", &[(W::Clouds, 20), (W::ClearSkies, 30), (W::FairSkies, 20), (W::Wind, 10), (W::Fog, 10), (W::Rain, 10)]),
    ("easternLaNoscea", &[(W::Fog, 5), (W::ClearSkies, 45), (W::FairSkies, 30), (W::Clouds, 10), (W::Rain, 5), (W::Showers, 5)]),
    ("westernLaNoscea", &[(W::Fog, 10), (W::ClearSkies, 30), (W::FairSkies, 20), (W::Clouds, 20), (W::Wind, 10), (W::Gales, 10)]),
    ("upperLaNoscea", &[(W::ClearSkies, 30), (W::FairSkies, 20), (W::Clouds, 20), (W::Fog, 10), (W::Thunder, 10), (W::Thunderstorms, 10)]),
    ("outerLaNoscea", &[(W::ClearSkies, 30), (W::FairSkies, 20), (W::Clouds, 20), (W::Fog, 15), (W::Rain, 15)]),
    ("coerthasCentralHighlands", &[(W::Blizzard, 20), (W::Snow, 40), (W::FairSkies, 10), (W::ClearSkies, 5), (W::Clouds, 15), (W::Fog, 10)]),
    ("morDhona", &[(W::Clouds, 15), (W::Fog, 15), (W::Gloom, 30), (W::ClearSkies, 15), (W::FairSkies, 25)]),
];

const BUILTIN_NAMES: &[(&str, &str)] = &[
    ("西萨纳兰", "westernThanalan"),
    ("中萨纳兰", "centralThanalan"),
    ("东萨纳兰", "easternThanalan"),
    ("南萨纳兰", "southernThanalan"),
    ("北萨纳兰", "northernThanalan"),
    ("乌尔达哈", "uldah"),
    ("黑衣森林中部林区", "centralShroud"),
    ("黑衣森林东部林区", "eastShroud"),
    ("黑衣森林南部林区", "southShroud"),
    ("黑衣森林北部林区", "northShroud"),
    ("格里达尼亚", "gridania"),
    ("中拉诺西亚", "middleLaNoscea"),
    ("拉诺西亚低地", "lowerLaNoscea"),
    ("东拉诺西亚", "easternLaNoscea"),
    ("西拉诺西亚", "westernLaNoscea"),
    ("拉诺西亚高地", "upperLaNoscea"),
    ("拉诺西亚外地", "outerLaNoscea"),
    ("利姆萨·罗敏萨", "limsaLominsa"),
    ("库尔札斯中央高地", "coerthasCentralHighlands"),
    ("摩杜纳", "morDhona"),
];

impl WeatherTable {
    /// The built-in reference table for the 20 supported zones.
    pub fn builtin() -> Self {
        let mut table = WeatherTable::default();
        for (key, chances) in BUILTIN_ZONES {
            table = table.with_zone(
                key,
                chances
                    .iter()
                    .map(|&(weather, chance)| WeatherChance { weather, chance }),
            );
        }
        for (name, key) in BUILTIN_NAMES {
            table = table.with_name(name, key);
        }
        table
    }

    /// Add or replace a zone's weather table.
    pub fn with_zone(
        mut self,
        key: &str,
        chances: impl IntoIterator<Item = WeatherChance>,
    ) -> Self {
        self.zones
            .insert(ZoneKey(key.to_string()), chances.into_iter().collect());
        self
    }

    /// Register a display name for a zone key.
    pub fn with_name(mut self, name: &str, key: &str) -> Self {
        self.names
            .insert(name.to_string(), ZoneKey(key.to_string()));
        self
    }

    pub fn zone(&self, key: &ZoneKey) -> Option<&[WeatherChance]> {
        self.zones.get(key).map(Vec::as_slice)
    }

    /// Resolve a display name (or a bare zone key) to a zone present in the table.
    pub fn zone_for_name(&self, name: &str) -> Option<&ZoneKey> {
        let name = name.trim();
        let key = match self.names.get(name) {
            Some(key) => key,
            None => self.zones.get_key_value(&ZoneKey(name.to_string()))?.0,
        };
        self.zones.contains_key(key).then_some(key)
    }

    /// Check that every zone has entries reaching 100 and every name resolves.
    pub fn validate(&self) -> Result<(), TableError> {
        for (key, chances) in &self.zones {
            if chances.is_empty() {
                return Err(TableError::EmptyZone(key.0.clone()));
            }
            let total: u32 = chances.iter().map(|c| c.chance).sum();
            if total < 100 {
                return Err(TableError::WeightsBelowHundred {
                    zone: key.0.clone(),
                    total,
                });
            }
        }
        for (name, key) in &self.names {
            if !self.zones.contains_key(key) {
                return Err(TableError::UnknownZoneForName {
                    name: name.clone(),
                    zone: key.0.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Outcome of evaluating one requirement at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountdownStatus {
    /// Requirement holds now; remaining is the time left in the window.
    Completable,
    /// Requirement will hold later; remaining is the wait until then.
    Upcoming,
    /// No satisfying window was found within the search bounds.
    Waiting,
    /// Several weather goals bundled with `&`; no single countdown.
    MultiGoal,
}

/// Countdown for one requirement, recomputed every tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownResult {
    pub active: bool,
    pub remaining_ms: u64,
    pub status: CountdownStatus,
    pub description: String,
}

impl CountdownResult {
    pub fn completable(remaining_ms: i64) -> Self {
        let remaining_ms = remaining_ms.max(0) as u64;
        CountdownResult {
            active: true,
            remaining_ms,
            status: CountdownStatus::Completable,
            description: format!("Completable for {}", format_hms(remaining_ms)),
        }
    }

    pub fn upcoming(remaining_ms: i64) -> Self {
        let remaining_ms = remaining_ms.max(0) as u64;
        CountdownResult {
            active: false,
            remaining_ms,
            status: CountdownStatus::Upcoming,
            description: format!("Available in {}", format_hms(remaining_ms)),
        }
    }

    pub fn waiting() -> Self {
        CountdownResult {
            active: false,
            remaining_ms: 0,
            status: CountdownStatus::Waiting,
            description: "Waiting".to_string(),
        }
    }

    pub fn multi_goal() -> Self {
        CountdownResult {
            active: false,
            remaining_ms: 0,
            status: CountdownStatus::MultiGoal,
            description: "Multiple goals (complete individually)".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Int(i64),
    Float(f64),
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn de_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<TextOrNumber>::deserialize(d)? {
        None => None,
        Some(TextOrNumber::Text(s)) => non_empty(s),
        Some(TextOrNumber::Int(n)) => Some(n.to_string()),
        Some(TextOrNumber::Float(f)) => Some(f.to_string()),
    })
}

// Numeric clock values are HHMM and get normalized to `HH:MM` text here.
fn de_clock_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let hhmm = |n: i64| {
        let n = n.max(0) as u32;
        EtTime::from_hhmm(n).map_or_else(|| n.to_string(), |t| t.to_string())
    };
    Ok(match Option::<TextOrNumber>::deserialize(d)? {
        None => None,
        Some(TextOrNumber::Text(s)) => non_empty(s),
        Some(TextOrNumber::Int(n)) => Some(hhmm(n)),
        Some(TextOrNumber::Float(f)) => Some(hhmm(f.floor() as i64)),
    })
}

fn de_level<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(de_text(d)?.and_then(|s| s.parse::<f64>().ok()).map(|v| v.max(0.0) as u32))
}

/// One FATE as it appears in the event data file.
///
/// Field names follow the data file; English aliases are accepted as well.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    #[serde(rename = "名称", alias = "name")]
    pub name: String,
    /// Display name of the map.
    #[serde(rename = "地图", alias = "zone")]
    pub zone: String,
    #[serde(rename = "等级", alias = "level", default, deserialize_with = "de_level", skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// Weather set the event only appears under, `A|B`.
    #[serde(rename = "出现天气", alias = "appearance_weather", default, deserialize_with = "de_text", skip_serializing_if = "Option::is_none")]
    pub appearance_weather: Option<String>,
    /// Appearance start, or a whole `start - end` range.
    #[serde(rename = "出现时间", alias = "appearance_start", default, deserialize_with = "de_clock_text", skip_serializing_if = "Option::is_none")]
    pub appearance_start: Option<String>,
    #[serde(rename = "消失时间", alias = "appearance_end", default, deserialize_with = "de_clock_text", skip_serializing_if = "Option::is_none")]
    pub appearance_end: Option<String>,
    /// Goal weather, `A|B` for alternatives or `A&B` for separate goals.
    #[serde(rename = "目标需求天气", alias = "goal_weather", default, deserialize_with = "de_text", skip_serializing_if = "Option::is_none")]
    pub goal_weather: Option<String>,
    /// `白天`/`夜晚`, optionally prefixed with `&` to combine with the goal weather.
    #[serde(rename = "目标需求时间", alias = "goal_time", default, deserialize_with = "de_text", skip_serializing_if = "Option::is_none")]
    pub goal_time: Option<String>,
    /// Free text, one goal per line, lines optionally numbered `1.`.
    #[serde(rename = "危命目标", alias = "goal_text", default, deserialize_with = "de_text", skip_serializing_if = "Option::is_none")]
    pub goal_text: Option<String>,
}

impl EventDefinition {
    pub fn appearance_window(&self) -> Option<AppearanceWindow> {
        AppearanceWindow::from_fields(
            self.appearance_start.as_deref(),
            self.appearance_end.as_deref(),
        )
    }
}
