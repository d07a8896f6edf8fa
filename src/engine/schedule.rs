//! Investment cycle schedule for a program year.
//!
//! The schedule is external configuration: a versioned, read-only list of
//! calendar dates, one per cycle. The engine never mutates it.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::EngineError;

/// One cycle in the program year. Indices are 1-based and assigned in
/// date order at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleEntry {
    pub index: u32,
    pub date: NaiveDate,
}

/// Immutable, strictly-ascending cycle date table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSchedule {
    program_year: i32,
    entries: Vec<CycleEntry>,
}

/// On-disk schedule format: `{"programYear": 2026, "dates": ["2026-02-16", ...]}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScheduleFile {
    program_year: i32,
    dates: Vec<NaiveDate>,
}

impl CycleSchedule {
    /// Build a schedule from dates already in ascending order.
    ///
    /// Fails fast on an empty, duplicated, or out-of-order list; a
    /// malformed schedule is a configuration error, not something to sort
    /// or dedupe silently.
    pub fn new(program_year: i32, dates: Vec<NaiveDate>) -> Result<Self, EngineError> {
        if dates.is_empty() {
            return Err(EngineError::validation(
                "schedule",
                "schedule must contain at least one cycle date",
            ));
        }
        for pair in dates.windows(2) {
            if pair[0] >= pair[1] {
                return Err(EngineError::validation(
                    "schedule",
                    format!(
                        "cycle dates must be strictly ascending, got {} before {}",
                        pair[0], pair[1]
                    ),
                ));
            }
        }

        let entries = dates
            .into_iter()
            .enumerate()
            .map(|(i, date)| CycleEntry {
                index: i as u32 + 1,
                date,
            })
            .collect();

        Ok(Self {
            program_year,
            entries,
        })
    }

    /// Load a schedule from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let file: ScheduleFile = serde_json::from_str(&raw)?;
        Ok(Self::new(file.program_year, file.dates)?)
    }

    /// The built-in 2026 program year (14 cycles, ~26 days apart).
    pub fn program_2026() -> Self {
        let dates = [
            (2026, 2, 16),
            (2026, 3, 13),
            (2026, 4, 7),
            (2026, 5, 4),
            (2026, 5, 29),
            (2026, 6, 23),
            (2026, 7, 20),
            (2026, 8, 14),
            (2026, 9, 8),
            (2026, 10, 5),
            (2026, 10, 30),
            (2026, 11, 24),
            (2026, 12, 21),
            (2027, 1, 18),
        ]
        .into_iter()
        .map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).expect("valid built-in cycle date"))
        .collect();

        Self::new(2026, dates).expect("built-in schedule is ascending")
    }

    pub fn program_year(&self) -> i32 {
        self.program_year
    }

    pub fn entries(&self) -> &[CycleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
