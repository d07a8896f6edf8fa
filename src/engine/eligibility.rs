//! Cycle eligibility: which future cycles a deposit participates in.
//!
//! A deposit is eligible for a cycle only if it exists more than 24 hours
//! before the cycle date (midnight). The comparison is strict: a deposit
//! made exactly at the cutoff instant is NOT eligible.
//!
//! All functions here rely on the ascending order that [`CycleSchedule`]
//! enforces at construction.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use super::schedule::{CycleEntry, CycleSchedule};

/// The instant before which a deposit must exist to participate in the
/// cycle on `cycle_date`.
fn cutoff(cycle_date: NaiveDate) -> NaiveDateTime {
    cycle_date.and_time(NaiveTime::MIN) - Duration::hours(24)
}

/// True iff a position activated at `activation` participates in the cycle
/// on `cycle_date`.
pub fn is_eligible(activation: NaiveDateTime, cycle_date: NaiveDate) -> bool {
    activation < cutoff(cycle_date)
}

/// Number of schedule entries the position participates in.
pub fn count_eligible_cycles(activation: NaiveDateTime, schedule: &CycleSchedule) -> usize {
    schedule
        .entries()
        .iter()
        .filter(|entry| is_eligible(activation, entry.date))
        .count()
}

/// First cycle still open as of `now`, or `None` when the schedule is
/// exhausted.
pub fn next_eligible_cycle(now: NaiveDateTime, schedule: &CycleSchedule) -> Option<&CycleEntry> {
    schedule
        .entries()
        .iter()
        .find(|entry| is_eligible(now, entry.date))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        date(y, m, d).and_hms_opt(h, min, 0).unwrap()
    }

    #[test]
    fn deposit_well_before_cutoff_is_eligible() {
        // Cycle 2026-02-16 has its cutoff at 2026-02-15T00:00.
        assert!(is_eligible(at(2026, 2, 10, 0, 0), date(2026, 2, 16)));
        assert!(is_eligible(at(2026, 2, 14, 23, 59), date(2026, 2, 16)));
    }

    #[test]
    fn deposit_exactly_at_cutoff_is_not_eligible() {
        assert!(!is_eligible(at(2026, 2, 15, 0, 0), date(2026, 2, 16)));
    }

    #[test]
    fn deposit_after_cutoff_is_not_eligible() {
        assert!(!is_eligible(at(2026, 2, 15, 0, 1), date(2026, 2, 16)));
        assert!(!is_eligible(at(2026, 2, 16, 0, 0), date(2026, 2, 16)));
    }

    #[test]
    fn counts_only_cycles_past_the_cutoff() {
        let schedule = CycleSchedule::program_2026();
        // Before the whole program.
        assert_eq!(count_eligible_cycles(at(2026, 1, 1, 0, 0), &schedule), 14);
        // Between cycle 1 (02-16) and cycle 2 (03-13).
        assert_eq!(count_eligible_cycles(at(2026, 2, 20, 0, 0), &schedule), 13);
        // After the final cycle.
        assert_eq!(count_eligible_cycles(at(2027, 2, 1, 0, 0), &schedule), 0);
    }

    #[test]
    fn eligible_count_never_increases_as_now_advances() {
        let schedule = CycleSchedule::program_2026();
        let mut now = at(2026, 1, 1, 0, 0);
        let mut prev = count_eligible_cycles(now, &schedule);
        for _ in 0..450 {
            now += Duration::days(1);
            let count = count_eligible_cycles(now, &schedule);
            assert!(count <= prev, "count went up at {now}");
            prev = count;
        }
        assert_eq!(prev, 0);
    }

    #[test]
    fn next_cycle_skips_closed_entries() {
        let schedule = CycleSchedule::program_2026();
        let next = next_eligible_cycle(at(2026, 2, 20, 0, 0), &schedule).unwrap();
        assert_eq!(next.index, 2);
        assert_eq!(next.date, date(2026, 3, 13));
    }

    #[test]
    fn next_cycle_is_none_when_schedule_exhausted() {
        let schedule = CycleSchedule::program_2026();
        assert!(next_eligible_cycle(at(2027, 1, 17, 12, 0), &schedule).is_none());
    }
}
