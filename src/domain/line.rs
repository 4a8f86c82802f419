//! Line registry - known route codes and their travel metadata
//!
//! Loaded once at startup from a TOML file (`[[line]]` tables) or from the
//! built-in Recife BRT defaults. Read-only afterwards.

use crate::domain::errors::RegistryError;
use chrono::Duration;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Longest average travel time a registry entry may declare
pub const MAX_TRAVEL_MINUTES: f64 = 24.0 * 60.0;

/// Metadata for one route line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub code: String,
    #[serde(alias = "name")]
    pub display_name: String,
    pub avg_travel_minutes: f64,
    pub distance_km: f64,
}

impl LineRecord {
    pub fn new(code: &str, display_name: &str, avg_travel_minutes: f64, distance_km: f64) -> Self {
        Self {
            code: code.to_string(),
            display_name: display_name.to_string(),
            avg_travel_minutes,
            distance_km,
        }
    }

    /// Average travel time as a duration, rounded to the millisecond
    pub fn travel_time(&self) -> Duration {
        Duration::milliseconds((self.avg_travel_minutes * 60_000.0).round() as i64)
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    line: Vec<LineRecord>,
}

/// Immutable code → line mapping
#[derive(Debug, Clone)]
pub struct LineRegistry {
    lines: FxHashMap<String, LineRecord>,
    /// Codes in load order, for stable listings
    order: Vec<String>,
}

impl LineRegistry {
    /// Build a registry, validating codes and travel times
    pub fn from_records(records: Vec<LineRecord>) -> Result<Self, RegistryError> {
        if records.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut lines = FxHashMap::default();
        let mut order = Vec::with_capacity(records.len());

        for record in records {
            if record.code.trim().is_empty() {
                return Err(RegistryError::EmptyCode);
            }
            // predicted_arrival >= detected_at depends on this
            if !(0.0..=MAX_TRAVEL_MINUTES).contains(&record.avg_travel_minutes) {
                return Err(RegistryError::InvalidTravelTime {
                    code: record.code,
                    minutes: record.avg_travel_minutes,
                });
            }
            if lines.contains_key(&record.code) {
                return Err(RegistryError::DuplicateCode(record.code));
            }
            order.push(record.code.clone());
            lines.insert(record.code.clone(), record);
        }

        Ok(Self { lines, order })
    }

    /// Recife BRT lines served by the Conde da Boa Vista corridor
    pub fn builtin() -> Self {
        let records = [
            LineRecord::new("437", "TI Caxangá (Conde da Boa Vista) - BRT", 5.0, 2.5),
            LineRecord::new("2441", "TI CDU (Conde da Boa Vista) - BRT", 5.0, 2.5),
            LineRecord::new("2450", "TI Camaragibe (Conde da Boa Vista) - BRT", 5.0, 2.5),
            LineRecord::new("2444", "TI Getúlio Vargas (Conde da Boa Vista) - BRT", 5.0, 2.5),
        ];

        let order = records.iter().map(|r| r.code.clone()).collect();
        let lines = records.into_iter().map(|r| (r.code.clone(), r)).collect();
        Self { lines, order }
    }

    /// Parse a registry from TOML text
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, RegistryError> {
        let file: RegistryFile = toml::from_str(content).map_err(|source| RegistryError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        Self::from_records(file.line)
    }

    /// Load a registry from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| RegistryError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content, path)
    }

    /// Load from the configured file, or fall back to the built-in lines
    pub fn load(path: Option<&str>) -> Result<Self, RegistryError> {
        let registry = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::builtin(),
        };

        info!(
            source = %path.unwrap_or("builtin"),
            lines = %registry.len(),
            codes = ?registry.codes(),
            "line_registry_loaded"
        );

        Ok(registry)
    }

    #[inline]
    pub fn get(&self, code: &str) -> Option<&LineRecord> {
        self.lines.get(code)
    }

    #[inline]
    pub fn contains(&self, code: &str) -> bool {
        self.lines.contains_key(code)
    }

    /// Codes in load order
    pub fn codes(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Records in load order
    pub fn iter(&self) -> impl Iterator<Item = &LineRecord> {
        self.order.iter().filter_map(|code| self.lines.get(code))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_builtin_registry() {
        let registry = LineRegistry::builtin();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.codes(), vec!["437", "2441", "2450", "2444"]);
        assert_eq!(registry.get("437").unwrap().avg_travel_minutes, 5.0);
        assert!(!registry.contains("999"));
    }

    #[test]
    fn test_travel_time() {
        let line = LineRecord::new("1", "One", 2.5, 1.0);
        assert_eq!(line.travel_time(), Duration::seconds(150));
    }

    #[test]
    fn test_from_toml_str() {
        let content = r#"
[[line]]
code = "10"
name = "Ten"
avg_travel_minutes = 3
distance_km = 1.2

[[line]]
code = "20"
display_name = "Twenty"
avg_travel_minutes = 7.5
distance_km = 4.0
"#;
        let registry = LineRegistry::from_toml_str(content, &PathBuf::from("lines.toml")).unwrap();
        assert_eq!(registry.codes(), vec!["10", "20"]);
        assert_eq!(registry.get("10").unwrap().display_name, "Ten");
        assert_eq!(registry.get("20").unwrap().avg_travel_minutes, 7.5);
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let result = LineRegistry::from_records(vec![
            LineRecord::new("437", "A", 5.0, 2.5),
            LineRecord::new("437", "B", 5.0, 2.5),
        ]);
        assert!(matches!(result, Err(RegistryError::DuplicateCode(code)) if code == "437"));
    }

    #[test]
    fn test_out_of_range_travel_time_rejected() {
        for minutes in [-1.0, f64::NAN, MAX_TRAVEL_MINUTES + 1.0, 1e18] {
            let result = LineRegistry::from_records(vec![LineRecord::new("1", "A", minutes, 2.5)]);
            assert!(matches!(result, Err(RegistryError::InvalidTravelTime { .. })), "{}", minutes);
        }
        assert!(LineRegistry::from_records(vec![LineRecord::new("1", "A", MAX_TRAVEL_MINUTES, 2.5)]).is_ok());
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert!(matches!(LineRegistry::from_records(vec![]), Err(RegistryError::Empty)));
        assert!(matches!(
            LineRegistry::from_records(vec![LineRecord::new(" ", "A", 1.0, 1.0)]),
            Err(RegistryError::EmptyCode)
        ));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = LineRegistry::load(Some("/nonexistent/lines.toml"));
        assert!(matches!(result, Err(RegistryError::Read { .. })));
    }
}
