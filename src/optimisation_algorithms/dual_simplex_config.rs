use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// How the leaving row is scored.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PricingKind {
    /// Largest infeasibility, unit weights.
    Dantzig,
    /// Reference-framework approximation of the dual edge norms.
    Devex,
    /// Exact dual edge norms `‖B⁻ᵀeᵣ‖²`, updated after each pivot.
    SteepestEdge,
}

/// Which weights are in use and how much of the infeasibility vector is scanned.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PricingMode {
    /// Unit weights, never updated, full scan.
    Uninitialized,
    /// Weights maintained, partial scan.
    Partial,
    /// Weights maintained, full scan.
    Full,
    /// Starts uninitialized and switches to full once the factorization gets dense.
    Switchable,
}

/// Whether pricing weights survive between consecutive solves of the same instance.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PricingPersistence {
    Normal,
    Keep,
}

/// When the weights are recomputed from scratch.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum WeightRefresh {
    /// On first use and after a numerical recovery.
    OnRecovery,
    /// Additionally after every refactorization.
    EveryFactorization,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub pricing_kind: PricingKind,
    pub pricing_mode: PricingMode,
    pub persistence: PricingPersistence,
    pub weight_refresh: WeightRefresh,

    pub primal_tolerance: f64,
    pub dual_tolerance: f64,
    /// Tableau entries below this magnitude are ignored.
    pub zero_tolerance: f64,
    pub acceptable_pivot: f64,
    /// Relative disagreement allowed between the row-wise and column-wise pivot element.
    pub consistency_tolerance: f64,
    pub minimum_theta: f64,

    pub initial_pivot_tolerance: f64,
    pub maximum_pivot_tolerance: f64,
    pub pivot_tolerance_growth: f64,
    pub refactorization_interval: usize,

    pub maximum_iterations: usize,
    pub maximum_seconds: Option<f64>,

    /// Width of the fake-bound window; `None` picks one from the problem size.
    pub initial_dual_bound: Option<f64>,
    pub maximum_dual_bound: f64,
    pub dual_bound_growth: f64,

    pub weight_floor: f64,
    pub last_row_penalty: f64,
    pub partial_pricing_minimum: usize,
    /// Factorization elements per row above which switchable pricing goes to full steepest edge.
    pub density_switch_ratio: f64,

    pub stall_window: usize,
    pub cost_modification: bool,
    pub perturbation: f64,
    pub maximum_perturbations: usize,

    pub maximum_disasters: usize,
    pub maximum_flag_clears: usize,

    /// Work (in vector entries) below which kernels stay sequential.
    pub parallel_threshold: usize,
    pub threads: Option<usize>,
    pub seed: u64,
    pub log_frequency: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            pricing_kind: PricingKind::SteepestEdge,
            pricing_mode: PricingMode::Switchable,
            persistence: PricingPersistence::Normal,
            weight_refresh: WeightRefresh::OnRecovery,

            primal_tolerance: 1.0e-7,
            dual_tolerance: 1.0e-7,
            zero_tolerance: 1.0e-13,
            acceptable_pivot: 1.0e-7,
            consistency_tolerance: 1.0e-6,
            minimum_theta: 1.0e-12,

            initial_pivot_tolerance: 0.1,
            maximum_pivot_tolerance: 0.99,
            pivot_tolerance_growth: 1.5,
            refactorization_interval: 100,

            maximum_iterations: 1_000_000,
            maximum_seconds: None,

            initial_dual_bound: None,
            maximum_dual_bound: 1.0e14,
            dual_bound_growth: 5.0,

            weight_floor: 1.0e-4,
            last_row_penalty: 1.0e10,
            partial_pricing_minimum: 2000,
            density_switch_ratio: 3.0,

            stall_window: 500,
            cost_modification: true,
            perturbation: 1.0e-6,
            maximum_perturbations: 2,

            maximum_disasters: 5,
            maximum_flag_clears: 5,

            parallel_threshold: 8192,
            threads: None,
            seed: 1234567,
            log_frequency: 1000,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("primal tolerance", self.primal_tolerance),
            ("dual tolerance", self.dual_tolerance),
            ("zero tolerance", self.zero_tolerance),
            ("acceptable pivot", self.acceptable_pivot),
            ("consistency tolerance", self.consistency_tolerance),
            ("minimum theta", self.minimum_theta),
            ("weight floor", self.weight_floor),
            ("maximum dual bound", self.maximum_dual_bound),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(anyhow!("{} must be positive and finite, got {}", name, value));
            }
        }
        if !(self.initial_pivot_tolerance > 0.0
            && self.initial_pivot_tolerance <= self.maximum_pivot_tolerance
            && self.maximum_pivot_tolerance <= 1.0)
        {
            return Err(anyhow!(
                "pivot tolerances must satisfy 0 < {} <= {} <= 1",
                self.initial_pivot_tolerance,
                self.maximum_pivot_tolerance
            ));
        }
        if self.dual_bound_growth <= 1.0 {
            return Err(anyhow!(
                "dual bound growth must exceed 1, got {}",
                self.dual_bound_growth
            ));
        }
        if let Some(bound) = self.initial_dual_bound {
            if !(bound > 0.0 && bound <= self.maximum_dual_bound) {
                return Err(anyhow!(
                    "initial dual bound {} must lie in (0, {}]",
                    bound,
                    self.maximum_dual_bound
                ));
            }
        }
        if self.refactorization_interval == 0 {
            return Err(anyhow!("refactorization interval must be at least 1"));
        }
        if let Some(seconds) = self.maximum_seconds {
            if seconds.is_nan() || seconds < 0.0 {
                return Err(anyhow!("time limit must be non-negative, got {}", seconds));
            }
        }
        Ok(())
    }

    /// The fake-bound window for a problem with `number_total` variables.
    pub fn dual_bound_for(&self, number_total: usize) -> f64 {
        match self.initial_dual_bound {
            Some(bound) => bound,
            None => (1.0e2 * number_total as f64)
                .clamp(1.0e4, 1.0e8)
                .min(self.maximum_dual_bound),
        }
    }
}
