#![deny(warnings)]

//! Terminal FATE tracker: prints the in-game clock, weather forecasts and the
//! goal board with live countdowns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use et_core::{Clock, FixedClock, SystemClock, WeatherTable, INTERVAL_MS};
use et_weather::forecast;
use fate_data::LoadState;
use persistence::JsonFileStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracker_runtime::{BoardFilter, BoardRow, Tracker, TrackerConfig};

const FORECAST_INTERVALS: usize = 4;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    data: Option<PathBuf>,
    store: Option<PathBuf>,
    ticks: Option<u64>,
    at: Option<i64>,
    forecast: Vec<String>,
    zone: Option<String>,
    name: Option<String>,
    version: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = || it.next().with_context(|| format!("{arg} needs a value"));
        match arg.as_str() {
            "--config" => args.config = Some(value()?.into()),
            "--data" => args.data = Some(value()?.into()),
            "--store" => args.store = Some(value()?.into()),
            "--ticks" => args.ticks = Some(value()?.parse().context("--ticks")?),
            "--at" => args.at = Some(value()?.parse().context("--at expects unix milliseconds")?),
            "--forecast" => args.forecast.push(value()?),
            "--zone" => args.zone = Some(value()?),
            "--name" => args.name = Some(value()?),
            "--version" => args.version = true,
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn print_row(row: &BoardRow) {
    let mark = if row.completed { "x" } else { " " };
    let level = row.level.map(|l| format!(" Lv{l}")).unwrap_or_default();
    let mut tags: Vec<&str> = Vec::new();
    if let Some(appearance) = &row.appearance {
        tags.push(appearance);
    }
    if let Some(label) = &row.label {
        tags.push(label);
    }
    println!(
        "[{mark}] {} ({}{level})  {}  {}",
        row.event,
        row.zone,
        tags.join(" / "),
        row.status_text()
    );
    for line in &row.details {
        println!("      {line}");
    }
}

fn print_forecast(table: &WeatherTable, zones: &[String], now_ms: i64) {
    for name in zones {
        let Some(zone) = table.zone_for_name(name) else {
            warn!(zone = %name, "no weather table for forecast zone");
            continue;
        };
        let Some(intervals) = forecast(table, zone, now_ms, FORECAST_INTERVALS) else {
            continue;
        };
        let line: Vec<String> = intervals
            .iter()
            .map(|w| {
                let et = et_core::eorzea_time_of(w.interval_start);
                format!("{} {}", et_core::format_et(et.bell, et.minute), w.weather.label())
            })
            .collect();
        println!("{name}: {}", line.join(" -> "));
    }
}

fn main() -> Result<()> {
    let args = parse_args()?;
    if args.version {
        println!(
            "{} {} ({} {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let table = WeatherTable::builtin();
    if let Err(e) = table.validate() {
        warn!(error = %e, "built-in weather table is inconsistent");
    }

    let fixed = args.at.map(|ms| Arc::new(FixedClock::new(ms)));
    let clock: Box<dyn Clock> = match &fixed {
        Some(clock) => Box::new(Arc::clone(clock)),
        None => Box::new(SystemClock),
    };
    let store_path = args.store.clone().unwrap_or_else(|| config.completed_path.clone());
    let data_path = args.data.clone().unwrap_or_else(|| config.events_path.clone());
    info!(data = %data_path.display(), store = %store_path.display(), "starting tracker");

    let mut tracker = Tracker::new(clock, table, Box::new(JsonFileStore::new(&store_path)));
    tracker.load(LoadState::from_path(&data_path));
    if let Some(error) = tracker.load_error() {
        println!("Event data unavailable: {error}");
    }
    if args.zone.is_some() || args.name.is_some() {
        tracker.set_filter(BoardFilter {
            zone: args.zone.clone(),
            name_contains: args.name.clone(),
        });
    }

    let ticks = args.ticks.unwrap_or(1).max(1);
    let tick = Duration::from_millis(config.tick_ms.max(1));
    tracker.start();
    for i in 0..ticks {
        if i > 0 {
            match &fixed {
                Some(clock) => clock.advance(tick.as_millis() as i64),
                None => std::thread::sleep(tick),
            }
        }
        tracker.tick();
        println!("{}", tracker.status());
    }
    tracker.stop();

    let now = tracker.now_ms();
    if let Some(real) = Utc.timestamp_millis_opt(now).single() {
        println!("Real time: {} UTC", real.format("%Y-%m-%d %H:%M:%S"));
    }
    let zones = if args.forecast.is_empty() {
        &config.forecast_zones
    } else {
        &args.forecast
    };
    if !zones.is_empty() {
        println!("Forecast ({} intervals of {} min):", FORECAST_INTERVALS, INTERVAL_MS / 60_000);
        print_forecast(tracker.table(), zones, now);
    }

    println!();
    if tracker.board().is_empty() && tracker.is_loaded() {
        println!("No events match the filter");
    }
    for row in tracker.board() {
        print_row(row);
    }
    Ok(())
}
