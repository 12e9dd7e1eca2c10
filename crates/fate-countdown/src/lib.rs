#![deny(warnings)]

//! Requirement evaluators: how long a FATE goal stays completable, or how long
//! until it becomes completable.
//!
//! Every evaluator follows the same contract. `active` means the requirement
//! holds at `now_ms`; `remaining_ms` is then the time left in the current
//! satisfying window, otherwise the wait until the next one starts. Forward
//! searches are bounded and end in [`CountdownResult::waiting`] when nothing
//! is found, which usually points at malformed reference data.
//!
//! Evaluators that involve weather take the zone key and return `None` when
//! the zone is missing from the table.

use et_core::{
    eorzea_time_of, et_day_start, minutes_to_ms, ms_until_et_time, nearest_interval_start,
    AppearanceWindow, CountdownResult, DayPhase, WeatherChance, WeatherExpr, WeatherKind,
    WeatherSet, WeatherTable, ZoneKey, BELL_MS, DAY_END_MINUTE, DAY_MS, DAY_START_MINUTE,
    INTERVAL_BELLS, INTERVAL_MS, MINUTES_PER_DAY,
};
use et_weather::{pick_from_chances, weather_value};
use tracing::{debug, warn};

/// Maximum number of 8-bell intervals scanned by the weather evaluators.
pub const WEATHER_SCAN_LIMIT: usize = 2000;
/// Daily appearance-window instances searched by the combined evaluator.
pub const WINDOW_DAYS: usize = 5;
/// Weather intervals inspected per appearance-window instance.
pub const WINDOW_STEPS: usize = 64;

fn weather_of(chances: &[WeatherChance], interval_start: i64) -> WeatherKind {
    pick_from_chances(chances, weather_value(interval_start))
}

/// First interval start at or after `from` (itself aligned) whose weather is in `set`.
fn next_matching_interval(chances: &[WeatherChance], set: &WeatherSet, from: i64) -> Option<i64> {
    (0..WEATHER_SCAN_LIMIT as i64)
        .map(|i| from + i * INTERVAL_MS)
        .find(|&start| set.contains(weather_of(chances, start)))
}

/// The part of the interval starting at `interval_start` that lies in `phase`.
///
/// Intervals begin at 00:00, 08:00 or 16:00, so the overlap with either phase
/// is at most one contiguous span.
pub fn phase_span(interval_start: i64, phase: DayPhase) -> Option<(i64, i64)> {
    let first_bell = i64::from(eorzea_time_of(interval_start).bell);
    let last_bell = first_bell + INTERVAL_BELLS;
    phase.bell_ranges().iter().find_map(|&(from, to)| {
        let (lo, hi) = (from.max(first_bell), to.min(last_bell));
        (lo < hi).then(|| {
            (
                interval_start + (lo - first_bell) * BELL_MS,
                interval_start + (hi - first_bell) * BELL_MS,
            )
        })
    })
}

fn span_result(start: i64, end: i64, now_ms: i64) -> CountdownResult {
    if start <= now_ms {
        CountdownResult::completable(end - now_ms)
    } else {
        CountdownResult::upcoming(start - now_ms)
    }
}

/// Countdown for a weather requirement in `zone`.
///
/// `A&B` expressions bundle separate goals and get the multi-goal result
/// instead of a countdown.
pub fn weather_countdown(
    table: &WeatherTable,
    zone: &ZoneKey,
    expr: &WeatherExpr,
    now_ms: i64,
) -> Option<CountdownResult> {
    let chances = table.zone(zone)?;
    Some(match expr {
        WeatherExpr::AllOf(_) => CountdownResult::multi_goal(),
        WeatherExpr::AnyOf(set) => weather_set_countdown(chances, set, now_ms),
    })
}

/// Countdown for "any weather in `set`" against one zone's chances.
pub fn weather_set_countdown(
    chances: &[WeatherChance],
    set: &WeatherSet,
    now_ms: i64,
) -> CountdownResult {
    if set.is_empty() {
        debug!("weather requirement names no known weather");
        return CountdownResult::waiting();
    }
    let current_start = nearest_interval_start(now_ms);
    let next_start = current_start + INTERVAL_MS;
    if set.contains(weather_of(chances, current_start)) {
        let remaining = next_start - now_ms;
        if remaining > 0 {
            return CountdownResult::completable(remaining);
        }
    }
    match next_matching_interval(chances, set, next_start) {
        Some(start) => CountdownResult::upcoming(start - now_ms),
        None => {
            warn!(limit = WEATHER_SCAN_LIMIT, "no matching weather within scan limit");
            CountdownResult::waiting()
        }
    }
}

/// Countdown for a day (06:00-18:00) or night (18:00-06:00) requirement.
///
/// Works on whole in-game minutes.
pub fn time_of_day_countdown(phase: DayPhase, now_ms: i64) -> CountdownResult {
    let current = eorzea_time_of(now_ms).minute_of_day();
    let in_day = (DAY_START_MINUTE..DAY_END_MINUTE).contains(&current);
    match phase {
        DayPhase::Day if in_day => {
            CountdownResult::completable(minutes_to_ms(DAY_END_MINUTE - current))
        }
        DayPhase::Day => CountdownResult::upcoming(ms_until_et_time(6, 0, now_ms)),
        DayPhase::Night if !in_day => {
            let end = if current < DAY_START_MINUTE {
                DAY_START_MINUTE
            } else {
                MINUTES_PER_DAY + DAY_START_MINUTE
            };
            CountdownResult::completable(minutes_to_ms(end - current))
        }
        DayPhase::Night => CountdownResult::upcoming(ms_until_et_time(18, 0, now_ms)),
    }
}

/// Parse a `白天`/`夜晚` style requirement and evaluate it; `None` if unrecognized.
pub fn time_requirement_countdown(requirement: &str, now_ms: i64) -> Option<CountdownResult> {
    DayPhase::parse(requirement).map(|phase| time_of_day_countdown(phase, now_ms))
}

/// Countdown for a daily appearance window, wrapping past midnight when the
/// end is not after the start. Works on whole in-game minutes.
pub fn appearance_window_countdown(window: &AppearanceWindow, now_ms: i64) -> CountdownResult {
    let (start, end) = window.bounds_minutes();
    let current = eorzea_time_of(now_ms).minute_of_day();
    let relative = if current < start {
        current + MINUTES_PER_DAY
    } else {
        current
    };
    if (start..end).contains(&relative) {
        return CountdownResult::completable(minutes_to_ms(end - relative));
    }
    let start = start % MINUTES_PER_DAY;
    CountdownResult::upcoming(ms_until_et_time((start / 60) as u8, (start % 60) as u8, now_ms))
}

/// First real millisecond, counted from the start of an in-game day, at which
/// the clock reads `minute`.
fn minute_start_ms(minute: i64) -> i64 {
    (minute * BELL_MS + 59).div_euclid(60)
}

/// Real-time instances of the window: the one containing `now_ms` (if any)
/// followed by later ones, [`WINDOW_DAYS`] in total.
fn window_instances(window: &AppearanceWindow, now_ms: i64) -> impl Iterator<Item = (i64, i64)> {
    let (start_min, end_min) = window.bounds_minutes();
    let offset = minute_start_ms(start_min);
    let span = (minute_start_ms(end_min) - offset).min(DAY_MS);
    let today = et_day_start(now_ms);
    (-1..=WINDOW_DAYS as i64)
        .map(move |day| {
            let start = today + day * DAY_MS + offset;
            (start, start + span)
        })
        .filter(move |&(_, end)| end > now_ms)
        .take(WINDOW_DAYS)
}

/// Countdown for an appearance window that additionally needs weather from
/// `weather` (any weather when `None`) and optionally a day/night phase.
///
/// The answer is the first sub-interval where all conditions overlap: active
/// with the time to its end when `now_ms` is inside it, otherwise the wait
/// until it starts.
pub fn combined_window_countdown(
    table: &WeatherTable,
    zone: &ZoneKey,
    window: &AppearanceWindow,
    weather: Option<&WeatherSet>,
    phase: Option<DayPhase>,
    now_ms: i64,
) -> Option<CountdownResult> {
    let chances = table.zone(zone)?;
    for (win_start, win_end) in window_instances(window, now_ms) {
        let mut cursor = win_start.max(now_ms);
        for _ in 0..WINDOW_STEPS {
            if cursor >= win_end {
                break;
            }
            let interval_start = nearest_interval_start(cursor);
            cursor = interval_start + INTERVAL_MS;
            if weather.is_some_and(|set| !set.contains(weather_of(chances, interval_start))) {
                continue;
            }
            let span = match phase {
                Some(phase) => phase_span(interval_start, phase),
                None => Some((interval_start, cursor)),
            };
            let Some((span_start, span_end)) = span else {
                continue;
            };
            let (start, end) = (span_start.max(win_start), span_end.min(win_end));
            if start < end && end > now_ms {
                return Some(span_result(start, end, now_ms));
            }
        }
    }
    warn!(
        zone = %zone,
        days = WINDOW_DAYS,
        steps = WINDOW_STEPS,
        "no overlap of window, weather and phase within search bounds"
    );
    Some(CountdownResult::waiting())
}

/// Countdown for a goal needing both a weather and a day/night phase.
///
/// Each matching weather interval is clipped to the phase. While inside a
/// clipped span the remaining time is its end, which equals the smaller of
/// the weather and phase remainders; otherwise the wait is to the start of the
/// next clipped span.
pub fn weather_and_time_countdown(
    table: &WeatherTable,
    zone: &ZoneKey,
    weather: &WeatherExpr,
    phase: DayPhase,
    now_ms: i64,
) -> Option<CountdownResult> {
    let chances = table.zone(zone)?;
    Some(match weather {
        WeatherExpr::AllOf(_) => CountdownResult::multi_goal(),
        WeatherExpr::AnyOf(set) => weather_phase_countdown(chances, set, phase, now_ms),
    })
}

fn weather_phase_countdown(
    chances: &[WeatherChance],
    set: &WeatherSet,
    phase: DayPhase,
    now_ms: i64,
) -> CountdownResult {
    if set.is_empty() {
        debug!("weather requirement names no known weather");
        return CountdownResult::waiting();
    }
    let first = nearest_interval_start(now_ms);
    let found = (0..WEATHER_SCAN_LIMIT as i64)
        .map(|i| first + i * INTERVAL_MS)
        .filter(|&start| set.contains(weather_of(chances, start)))
        .filter_map(|start| phase_span(start, phase))
        .find(|&(_, end)| end > now_ms);
    match found {
        Some((start, end)) => span_result(start, end, now_ms),
        None => {
            warn!(
                limit = WEATHER_SCAN_LIMIT,
                ?phase,
                "no matching weather and phase within scan limit"
            );
            CountdownResult::waiting()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use et_core::{et_to_real_ms, CountdownStatus};
    use et_weather::weather_at;
    use proptest::prelude::*;

    const DAY: i64 = 400_000;

    fn calm() -> (WeatherTable, ZoneKey) {
        let table = WeatherTable::default().with_zone(
            "calm",
            [WeatherChance { weather: WeatherKind::ClearSkies, chance: 100 }],
        );
        (table, ZoneKey("calm".to_string()))
    }

    fn uldah() -> (WeatherTable, ZoneKey) {
        (WeatherTable::builtin(), ZoneKey("uldah".to_string()))
    }

    fn at(bell: u8, minute: u8) -> i64 {
        et_to_real_ms(DAY, bell, minute)
    }

    fn clear() -> WeatherSet {
        WeatherSet::parse("碧空")
    }

    fn window(start: &str, end: &str) -> AppearanceWindow {
        AppearanceWindow::from_fields(Some(start), Some(end)).unwrap()
    }

    #[test]
    fn weather_active_until_interval_end() {
        let (table, zone) = calm();
        let now = at(9, 30);
        let r = weather_countdown(&table, &zone, &WeatherExpr::AnyOf(clear()), now).unwrap();
        assert!(r.active);
        assert_eq!(r.remaining_ms as i64, at(16, 0) - now);
    }

    #[test]
    fn weather_never_matching_waits() {
        let (table, zone) = uldah();
        let snow = WeatherExpr::parse("小雪");
        let r = weather_countdown(&table, &zone, &snow, at(3, 0)).unwrap();
        assert_eq!(r.status, CountdownStatus::Waiting);
        assert_eq!(r.remaining_ms, 0);
        assert!(!r.active);
    }

    #[test]
    fn weather_and_expression_is_multi_goal() {
        let (table, zone) = uldah();
        let expr = WeatherExpr::parse("碧空&小雨");
        let r = weather_countdown(&table, &zone, &expr, at(3, 0)).unwrap();
        assert_eq!(r.status, CountdownStatus::MultiGoal);
        assert!(!r.active);
    }

    #[test]
    fn unknown_zone_is_none() {
        let (table, _) = uldah();
        let zone = ZoneKey("atlantis".into());
        let expr = WeatherExpr::parse("碧空");
        assert!(weather_countdown(&table, &zone, &expr, 0).is_none());
        assert!(weather_and_time_countdown(&table, &zone, &expr, DayPhase::Day, 0).is_none());
        let w = window("11:00", "12:00");
        assert!(combined_window_countdown(&table, &zone, &w, None, None, 0).is_none());
    }

    #[test]
    fn day_requirement_at_seven() {
        let r = time_of_day_countdown(DayPhase::Day, at(7, 0));
        assert!(r.active);
        assert_eq!(r.remaining_ms as i64, minutes_to_ms(1080 - 420));
        let r = time_of_day_countdown(DayPhase::Day, at(20, 0));
        assert!(!r.active);
        assert_eq!(r.remaining_ms as i64, minutes_to_ms(600));
    }

    #[test]
    fn night_requirement_ends_at_six() {
        let r = time_of_day_countdown(DayPhase::Night, at(3, 0));
        assert!(r.active);
        assert_eq!(r.remaining_ms as i64, minutes_to_ms(180));
        let r = time_of_day_countdown(DayPhase::Night, at(20, 0));
        assert!(r.active);
        assert_eq!(r.remaining_ms as i64, minutes_to_ms(600));
        let r = time_of_day_countdown(DayPhase::Night, at(12, 0));
        assert!(!r.active);
        assert_eq!(r.remaining_ms as i64, minutes_to_ms(360));
        assert!(time_requirement_countdown("黄昏", at(12, 0)).is_none());
    }

    #[test]
    fn window_active_mid_way() {
        let w = window("11:10", "12:10");
        let r = appearance_window_countdown(&w, at(11, 40));
        assert!(r.active);
        assert_eq!(r.remaining_ms, 87_500);
        let r = appearance_window_countdown(&w, at(12, 10));
        assert!(!r.active);
        assert_eq!(r.remaining_ms as i64, minutes_to_ms(23 * 60));
    }

    #[test]
    fn window_wraps_past_midnight() {
        let w = window("23:00", "01:00");
        let late = appearance_window_countdown(&w, at(23, 30));
        assert!(late.active);
        assert_eq!(late.remaining_ms as i64, minutes_to_ms(90));
        let early = appearance_window_countdown(&w, at(0, 30));
        assert!(early.active);
        assert_eq!(early.remaining_ms as i64, minutes_to_ms(30));
        let after = appearance_window_countdown(&w, at(1, 0));
        assert!(!after.active);
        assert_eq!(after.remaining_ms as i64, minutes_to_ms(22 * 60));
    }

    #[test]
    fn window_with_only_an_end_starts_at_midnight() {
        let w = AppearanceWindow::from_fields(None, Some("06:00")).unwrap();
        assert!(appearance_window_countdown(&w, at(5, 0)).active);
        let r = appearance_window_countdown(&w, at(7, 0));
        assert_eq!(r.remaining_ms as i64, minutes_to_ms(17 * 60));
    }

    #[test]
    fn combined_inside_window() {
        let (table, zone) = calm();
        let w = window("11:12", "12:12");
        let set = clear();
        let r = combined_window_countdown(&table, &zone, &w, Some(&set), None, at(11, 48)).unwrap();
        assert!(r.active);
        assert_eq!(r.remaining_ms, 70_000);
        let r = combined_window_countdown(&table, &zone, &w, Some(&set), None, at(10, 0)).unwrap();
        assert!(!r.active);
        assert_eq!(r.remaining_ms, 210_000);
    }

    #[test]
    fn combined_window_opens_with_the_clock_minute() {
        let (table, zone) = calm();
        let w = window("11:10", "12:10");
        let floored = DAY * DAY_MS + minutes_to_ms(670);
        assert_eq!(eorzea_time_of(floored).minute, 9);
        let combined = combined_window_countdown(&table, &zone, &w, None, None, floored).unwrap();
        let plain = appearance_window_countdown(&w, floored);
        assert!(!combined.active);
        assert!(!plain.active);

        let opened = at(11, 10);
        assert!(combined_window_countdown(&table, &zone, &w, None, None, opened).unwrap().active);
        assert!(appearance_window_countdown(&w, opened).active);

        let mid = at(11, 40);
        let combined = combined_window_countdown(&table, &zone, &w, None, None, mid).unwrap();
        assert_eq!(combined, appearance_window_countdown(&w, mid));
    }

    #[test]
    fn combined_instance_from_previous_day() {
        let (table, zone) = calm();
        let w = window("23:00", "01:00");
        let r = combined_window_countdown(&table, &zone, &w, None, None, at(0, 0)).unwrap();
        assert!(r.active);
        assert_eq!(r.remaining_ms as i64, BELL_MS);
    }

    #[test]
    fn combined_pushes_start_to_phase_boundary() {
        let (table, zone) = calm();
        let w = window("04:00", "10:00");
        let r = combined_window_countdown(&table, &zone, &w, None, Some(DayPhase::Day), at(3, 0)).unwrap();
        assert!(!r.active);
        assert_eq!(r.remaining_ms as i64, 3 * BELL_MS);
        let r = combined_window_countdown(&table, &zone, &w, None, Some(DayPhase::Day), at(7, 0)).unwrap();
        assert!(r.active);
        assert_eq!(r.remaining_ms as i64, BELL_MS);
    }

    #[test]
    fn combined_phase_outside_window_waits() {
        let (table, zone) = calm();
        let w = window("08:00", "12:00");
        let r = combined_window_countdown(&table, &zone, &w, None, Some(DayPhase::Night), at(9, 0)).unwrap();
        assert_eq!(r.status, CountdownStatus::Waiting);
    }

    #[test]
    fn combined_never_matching_weather_waits() {
        let (table, zone) = uldah();
        let snow = WeatherSet::parse("小雪");
        let w = window("00:00", "23:59");
        let r = combined_window_countdown(&table, &zone, &w, Some(&snow), None, at(5, 0)).unwrap();
        assert_eq!(r.status, CountdownStatus::Waiting);
    }

    #[test]
    fn dual_clips_weather_to_phase() {
        let (table, zone) = calm();
        let expr = WeatherExpr::AnyOf(clear());
        let r = weather_and_time_countdown(&table, &zone, &expr, DayPhase::Day, at(7, 0)).unwrap();
        assert!(r.active);
        assert_eq!(r.remaining_ms as i64, BELL_MS);
        let r = weather_and_time_countdown(&table, &zone, &expr, DayPhase::Day, at(3, 0)).unwrap();
        assert!(!r.active);
        assert_eq!(r.remaining_ms as i64, 3 * BELL_MS);
        let r = weather_and_time_countdown(&table, &zone, &expr, DayPhase::Night, at(12, 0)).unwrap();
        assert!(!r.active);
        assert_eq!(r.remaining_ms as i64, 6 * BELL_MS);
        let multi = WeatherExpr::parse("碧空&晴朗");
        let r = weather_and_time_countdown(&table, &zone, &multi, DayPhase::Day, at(7, 0)).unwrap();
        assert_eq!(r.status, CountdownStatus::MultiGoal);
    }

    #[test]
    fn phase_spans_per_interval() {
        let s = |bell| at(bell, 0);
        assert_eq!(phase_span(s(0), DayPhase::Day), Some((s(6), s(8))));
        assert_eq!(phase_span(s(0), DayPhase::Night), Some((s(0), s(6))));
        assert_eq!(phase_span(s(8), DayPhase::Night), None);
        assert_eq!(phase_span(s(16), DayPhase::Day), Some((s(16), s(18))));
        assert_eq!(phase_span(s(16), DayPhase::Night), Some((s(18), s(16) + INTERVAL_MS)));
    }

    proptest! {
        #[test]
        fn matching_weather_reports_exact_interval_end(now in 0i64..5_000_000_000_000i64) {
            let (table, zone) = uldah();
            let current = weather_at(&table, &zone, now).unwrap();
            let set: WeatherSet = [current].into_iter().collect();
            let r = weather_countdown(&table, &zone, &WeatherExpr::AnyOf(set), now).unwrap();
            prop_assert!(r.active);
            prop_assert_eq!(r.remaining_ms as i64, nearest_interval_start(now) + INTERVAL_MS - now);
        }

        #[test]
        fn upcoming_weather_lands_on_first_match(now in 0i64..5_000_000_000_000i64) {
            let (table, zone) = uldah();
            let set = WeatherSet::parse("小雨|薄雾");
            let r = weather_countdown(&table, &zone, &WeatherExpr::AnyOf(set.clone()), now).unwrap();
            if !r.active {
                let target = now + r.remaining_ms as i64;
                prop_assert_eq!(target.rem_euclid(INTERVAL_MS), 0);
                prop_assert!(set.contains(weather_at(&table, &zone, target).unwrap()));
                let mut t = nearest_interval_start(now);
                while t < target {
                    prop_assert!(!set.contains(weather_at(&table, &zone, t).unwrap()));
                    t += INTERVAL_MS;
                }
            }
        }

        #[test]
        fn combined_result_satisfies_every_condition(now in 0i64..5_000_000_000_000i64) {
            let (table, zone) = uldah();
            let set = WeatherSet::parse("碧空|晴朗");
            let w = window("06:00", "20:00");
            let r = combined_window_countdown(&table, &zone, &w, Some(&set), Some(DayPhase::Day), now).unwrap();
            let probe = match r.status {
                CountdownStatus::Completable => Some(now),
                CountdownStatus::Upcoming => Some(now + r.remaining_ms as i64),
                _ => None,
            };
            if let Some(t) = probe {
                let et = eorzea_time_of(t);
                prop_assert!(set.contains(weather_at(&table, &zone, t).unwrap()));
                prop_assert!(DayPhase::Day.contains_bell(et.bell));
            }
        }

        #[test]
        fn dual_matches_min_of_parts_when_both_hold(now in 0i64..5_000_000_000_000i64) {
            let (table, zone) = uldah();
            let expr = WeatherExpr::parse("碧空|晴朗|阴云");
            let weather = weather_countdown(&table, &zone, &expr, now).unwrap();
            let time = time_of_day_countdown(DayPhase::Night, now);
            let dual = weather_and_time_countdown(&table, &zone, &expr, DayPhase::Night, now).unwrap();
            prop_assert_eq!(dual.active, weather.active && time.active);
            if dual.active {
                prop_assert!(dual.remaining_ms <= weather.remaining_ms);
            }
        }
    }
}
