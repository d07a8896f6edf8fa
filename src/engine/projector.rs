//! Deterministic accrual projection.
//!
//! One iterative loop is the single source of truth for compounding and
//! partial-reinvestment math. The closed form `P * (1 + r)^n` is only a
//! shortcut for the full-reinvestment case and must agree with the loop.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::eligibility::count_eligible_cycles;
use super::schedule::CycleSchedule;
use super::EngineError;

/// Program parameters for the accrual projection.
///
/// These are terms of the investment program itself, not deployment knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectorConfig {
    /// Flat per-cycle yield on the opening principal.
    pub cycle_rate: f64,
    /// Nominal calendar length of one cycle.
    pub cycle_days: u32,
    pub min_investment: f64,
    pub max_investment: f64,
    pub max_cycles: u32,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            cycle_rate: 0.068,
            cycle_days: 26,
            min_investment: 100.0,
            max_investment: 10_000_000.0,
            max_cycles: 14,
        }
    }
}

/// One cycle of the projection. Ephemeral: recomputed on demand, never
/// persisted row by row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionStage {
    pub index: u32,
    pub day_start: u32,
    pub day_end: u32,
    pub opening_principal: f64,
    pub accrual: f64,
    pub reinvested: f64,
    pub withdrawn: f64,
    pub closing_principal: f64,
    pub cumulative_withdrawn: f64,
    pub cumulative_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionTotals {
    pub total_invested: f64,
    pub total_gains: f64,
    pub total_withdrawn: f64,
    pub final_value: f64,
    pub roi: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub stages: Vec<ProjectionStage>,
    pub totals: ProjectionTotals,
}

/// Quick profitability preview from an activation timestamp: eligible
/// cycles at full reinvestment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitPreview {
    pub eligible_cycles: usize,
    pub total_balance: f64,
    pub profit: f64,
}

impl ProjectorConfig {
    /// Check projection inputs against the program bounds.
    ///
    /// Out-of-range input is rejected with the offending field named;
    /// nothing is clamped.
    pub fn validate(
        &self,
        principal: f64,
        cycles: u32,
        reinvest_percent: f64,
    ) -> Result<(), EngineError> {
        if !principal.is_finite()
            || principal < self.min_investment
            || principal > self.max_investment
        {
            return Err(EngineError::validation(
                "initialInvestment",
                format!(
                    "amount must be between {} and {}",
                    self.min_investment, self.max_investment
                ),
            ));
        }
        if cycles > self.max_cycles {
            return Err(EngineError::validation(
                "cycles",
                format!("cycle count must be at most {}", self.max_cycles),
            ));
        }
        if !reinvest_percent.is_finite() || !(0.0..=100.0).contains(&reinvest_percent) {
            return Err(EngineError::validation(
                "reinvestmentPercentage",
                "reinvestment percentage must be between 0 and 100",
            ));
        }
        Ok(())
    }

    /// Project `cycles` accrual cycles of `principal` with the given share
    /// of each cycle's gain reinvested.
    ///
    /// Identical inputs produce identical output: no clock, no randomness.
    /// `cycles = 0` yields an empty stage list and `final_value = principal`.
    pub fn project(
        &self,
        principal: f64,
        cycles: u32,
        reinvest_percent: f64,
    ) -> Result<Projection, EngineError> {
        self.validate(principal, cycles, reinvest_percent)?;

        let initial = principal;
        let mut current = principal;
        let mut cumulative_withdrawn = 0.0;
        let mut total_gains = 0.0;
        let mut stages = Vec::with_capacity(cycles as usize);

        for i in 1..=cycles {
            let accrual = current * self.cycle_rate;
            let reinvested = accrual * (reinvest_percent / 100.0);
            let withdrawn = accrual - reinvested;
            let closing = current + reinvested;

            total_gains += accrual;
            cumulative_withdrawn += withdrawn;

            stages.push(ProjectionStage {
                index: i,
                day_start: (i - 1) * self.cycle_days + 1,
                day_end: i * self.cycle_days,
                opening_principal: current,
                accrual,
                reinvested,
                withdrawn,
                closing_principal: closing,
                cumulative_withdrawn,
                cumulative_value: closing + cumulative_withdrawn,
            });

            current = closing;
        }

        let final_value = current + cumulative_withdrawn;
        let totals = ProjectionTotals {
            total_invested: initial,
            total_gains,
            total_withdrawn: cumulative_withdrawn,
            final_value,
            roi: (final_value - initial) / initial * 100.0,
            multiplier: final_value / initial,
        };

        Ok(Projection { stages, totals })
    }

    /// Closed-form value after `cycles` fully-reinvested cycles.
    pub fn compound_value(&self, principal: f64, cycles: u32) -> f64 {
        principal * (1.0 + self.cycle_rate).powi(cycles as i32)
    }

    /// Profitability preview for a deposit activated at `activation`:
    /// counts the cycles still open and compounds through all of them.
    pub fn preview_profit(
        &self,
        principal: f64,
        activation: NaiveDateTime,
        schedule: &CycleSchedule,
    ) -> Result<ProfitPreview, EngineError> {
        self.validate(principal, 0, 100.0)?;

        let eligible_cycles = count_eligible_cycles(activation, schedule);
        let total_balance = self.compound_value(principal, eligible_cycles as u32);

        Ok(ProfitPreview {
            eligible_cycles,
            total_balance,
            profit: total_balance - principal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;

    fn config() -> ProjectorConfig {
        ProjectorConfig::default()
    }

    #[test]
    fn three_cycles_fully_reinvested_match_reference_figures() {
        let projection = config().project(10_000.0, 3, 100.0).unwrap();
        assert_eq!(projection.stages.len(), 3);

        let s1 = &projection.stages[0];
        assert_abs_diff_eq!(s1.accrual, 680.0, epsilon = 0.01);
        assert_abs_diff_eq!(s1.closing_principal, 10_680.0, epsilon = 0.01);
        assert_eq!(s1.day_start, 1);
        assert_eq!(s1.day_end, 26);

        let s2 = &projection.stages[1];
        assert_abs_diff_eq!(s2.accrual, 726.24, epsilon = 0.01);
        assert_abs_diff_eq!(s2.closing_principal, 11_406.24, epsilon = 0.01);

        let s3 = &projection.stages[2];
        assert_abs_diff_eq!(s3.accrual, 775.62, epsilon = 0.01);
        assert_abs_diff_eq!(s3.closing_principal, 12_181.86, epsilon = 0.01);

        assert_abs_diff_eq!(projection.totals.final_value, 12_181.86, epsilon = 0.01);
        assert_abs_diff_eq!(projection.totals.roi, 21.82, epsilon = 0.01);
        assert_abs_diff_eq!(projection.totals.total_withdrawn, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn stage_invariants_hold_under_partial_reinvestment() {
        let projection = config().project(5_000.0, 5, 40.0).unwrap();
        let mut cumulative = 0.0;
        for stage in &projection.stages {
            assert_abs_diff_eq!(
                stage.accrual,
                stage.opening_principal * 0.068,
                epsilon = 1e-9
            );
            assert_abs_diff_eq!(
                stage.reinvested + stage.withdrawn,
                stage.accrual,
                epsilon = 1e-9
            );
            assert_abs_diff_eq!(
                stage.closing_principal,
                stage.opening_principal + stage.reinvested,
                epsilon = 1e-9
            );
            cumulative += stage.withdrawn;
            assert_abs_diff_eq!(stage.cumulative_withdrawn, cumulative, epsilon = 1e-9);
            assert_abs_diff_eq!(
                stage.cumulative_value,
                stage.closing_principal + stage.cumulative_withdrawn,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn loop_agrees_with_closed_form_at_full_reinvestment() {
        let cfg = config();
        for principal in [100.0, 2_500.0, 10_000.0, 9_999_999.0] {
            for cycles in 0..=14u32 {
                let projection = cfg.project(principal, cycles, 100.0).unwrap();
                let closed = cfg.compound_value(principal, cycles);
                assert_abs_diff_eq!(projection.totals.final_value, closed, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn zero_reinvestment_never_compounds() {
        let projection = config().project(1_000.0, 6, 0.0).unwrap();
        for stage in &projection.stages {
            assert_abs_diff_eq!(
                stage.closing_principal,
                stage.opening_principal,
                epsilon = 1e-9
            );
            assert_abs_diff_eq!(stage.withdrawn, stage.accrual, epsilon = 1e-9);
        }
        // Simple interest: P + n * P * r.
        assert_abs_diff_eq!(
            projection.totals.final_value,
            1_000.0 + 6.0 * 1_000.0 * 0.068,
            epsilon = 1e-9
        );
    }

    #[test]
    fn zero_cycles_is_the_identity_projection() {
        let projection = config().project(1_234.0, 0, 100.0).unwrap();
        assert!(projection.stages.is_empty());
        assert_abs_diff_eq!(projection.totals.final_value, 1_234.0, epsilon = 1e-9);
        assert_abs_diff_eq!(projection.totals.roi, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(projection.totals.multiplier, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn identical_inputs_produce_identical_projections() {
        let a = config().project(42_000.0, 11, 37.5).unwrap();
        let b = config().project(42_000.0, 11, 37.5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_amount_below_minimum_naming_the_field() {
        let err = config().project(50.0, 3, 100.0).unwrap_err();
        assert_eq!(err.field(), "initialInvestment");
    }

    #[test]
    fn rejects_amount_above_maximum() {
        let err = config().project(10_000_001.0, 3, 100.0).unwrap_err();
        assert_eq!(err.field(), "initialInvestment");
    }

    #[test]
    fn rejects_non_finite_amount() {
        assert!(config().project(f64::NAN, 3, 100.0).is_err());
        assert!(config().project(f64::INFINITY, 3, 100.0).is_err());
    }

    #[test]
    fn rejects_cycle_count_above_maximum() {
        let err = config().project(1_000.0, 15, 100.0).unwrap_err();
        assert_eq!(err.field(), "cycles");
    }

    #[test]
    fn rejects_out_of_range_reinvestment_percentage() {
        let err = config().project(1_000.0, 3, 100.5).unwrap_err();
        assert_eq!(err.field(), "reinvestmentPercentage");
        let err = config().project(1_000.0, 3, -0.1).unwrap_err();
        assert_eq!(err.field(), "reinvestmentPercentage");
        assert!(config().project(1_000.0, 3, f64::NAN).is_err());
    }

    #[test]
    fn preview_compounds_through_the_eligible_cycles_only() {
        let cfg = config();
        let schedule = CycleSchedule::program_2026();
        // Activated between cycles 1 and 2: 13 cycles remain.
        let activation = NaiveDate::from_ymd_opt(2026, 2, 20)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        let preview = cfg.preview_profit(10_000.0, activation, &schedule).unwrap();
        assert_eq!(preview.eligible_cycles, 13);
        assert_abs_diff_eq!(
            preview.total_balance,
            cfg.compound_value(10_000.0, 13),
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            preview.profit,
            preview.total_balance - 10_000.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn preview_rejects_out_of_bounds_amounts_instead_of_clamping() {
        let schedule = CycleSchedule::program_2026();
        let activation = NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let err = config()
            .preview_profit(1.0, activation, &schedule)
            .unwrap_err();
        assert_eq!(err.field(), "initialInvestment");
    }
}
