#![deny(warnings)]

//! Event data loading.
//!
//! The data file is a JSON array of event records. Loading is all or nothing:
//! a file that fails to parse yields no events at all, never a partial list.

use std::fs;
use std::path::Path;

use et_core::{EventDefinition, WeatherTable};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },
    #[error("invalid event data: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for DataError {
    fn from(e: serde_json::Error) -> Self {
        DataError::Parse(e.to_string())
    }
}

/// Parse the event list from JSON text.
pub fn parse_events(json: &str) -> Result<Vec<EventDefinition>, DataError> {
    Ok(serde_json::from_str(json)?)
}

/// Read and parse an event data file.
pub fn load_events<P: AsRef<Path>>(path: P) -> Result<Vec<EventDefinition>, DataError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| DataError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let events = parse_events(&text)?;
    info!(path = %path.display(), count = events.len(), "loaded event data");
    Ok(events)
}

/// Progress of the event data load as seen by the tracker.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub enum LoadState {
    #[default]
    Pending,
    Loaded(Vec<EventDefinition>),
    Failed(String),
}

impl LoadState {
    /// Load `path` and record the outcome; failures keep only the message.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        load_events(path).into()
    }

    /// Events available for display: empty unless the load succeeded.
    pub fn events(&self) -> &[EventDefinition] {
        match self {
            LoadState::Loaded(events) => events,
            LoadState::Pending | LoadState::Failed(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            LoadState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

impl From<Result<Vec<EventDefinition>, DataError>> for LoadState {
    fn from(result: Result<Vec<EventDefinition>, DataError>) -> Self {
        match result {
            Ok(events) => LoadState::Loaded(events),
            Err(e) => {
                warn!(error = %e, "event data unavailable");
                LoadState::Failed(e.to_string())
            }
        }
    }
}

/// Zone names used by `events` that the weather table cannot resolve, each
/// reported once in order of first use.
pub fn unknown_zones(table: &WeatherTable, events: &[EventDefinition]) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for event in events {
        if table.zone_for_name(&event.zone).is_none() && !missing.contains(&event.zone) {
            warn!(zone = %event.zone, event = %event.name, "zone has no weather table");
            missing.push(event.zone.clone());
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn sample_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets/fate_data.json")
    }

    #[test]
    fn bundled_sample_loads() {
        let events = load_events(sample_path()).unwrap();
        assert_eq!(events.len(), 5);
        let first = &events[0];
        assert_eq!(first.name, "乌合之众");
        assert_eq!(first.zone, "中萨纳兰");
        assert_eq!(first.level, Some(15));
        assert_eq!(first.appearance_weather, None);
        assert_eq!(first.goal_time.as_deref(), Some("&夜晚"));
    }

    #[test]
    fn numeric_clock_fields_become_text() {
        let events = load_events(sample_path()).unwrap();
        let snow = events.iter().find(|e| e.name == "雪原猎手").unwrap();
        assert_eq!(snow.appearance_start.as_deref(), Some("11:10"));
        assert_eq!(snow.appearance_end.as_deref(), Some("14:10"));
    }

    #[test]
    fn english_aliases_are_accepted() {
        let events = parse_events(
            r#"[{"name": "Test", "zone": "uldah", "level": "12", "goal_weather": "碧空"}]"#,
        )
        .unwrap();
        assert_eq!(events[0].zone, "uldah");
        assert_eq!(events[0].level, Some(12));
        assert_eq!(events[0].goal_weather.as_deref(), Some("碧空"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = parse_events(r#"[{"名称": "x""#).unwrap_err();
        assert!(matches!(err, DataError::Parse(_)));
    }

    #[test]
    fn missing_file_fails_without_events() {
        let dir = tempfile::tempdir().unwrap();
        let state = LoadState::from_path(dir.path().join("absent.json"));
        assert!(state.events().is_empty());
        assert!(state.error().unwrap().contains("absent.json"));
    }

    #[test]
    fn failed_parse_exposes_no_partial_data() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"名称": "ok", "地图": "uldah"}}, {{"名称": 5]"#).unwrap();
        let state = LoadState::from_path(file.path());
        assert!(matches!(state, LoadState::Failed(_)));
        assert!(state.events().is_empty());
    }

    #[test]
    fn pending_has_no_events() {
        let state = LoadState::default();
        assert!(state.events().is_empty());
        assert_eq!(state.error(), None);
    }

    #[test]
    fn unknown_zones_are_reported_once() {
        let events = parse_events(
            r#"[{"名称": "a", "地图": "中萨纳兰"},
                {"名称": "b", "地图": "伊修加德"},
                {"名称": "c", "地图": "伊修加德"}]"#,
        )
        .unwrap();
        let missing = unknown_zones(&WeatherTable::builtin(), &events);
        assert_eq!(missing, vec!["伊修加德".to_string()]);
    }

    #[test]
    fn sample_zones_are_all_known() {
        let events = load_events(sample_path()).unwrap();
        assert!(unknown_zones(&WeatherTable::builtin(), &events).is_empty());
    }
}
