use log::debug;

use crate::optimisation_algorithms::dual_simplex_variables::{VariableSet, VariableStatus};

/// Which working bounds of a variable are temporary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FakeBound {
    #[default]
    None,
    LowerFake,
    UpperFake,
    BothFake,
}

/// Outcome of checking the fake bounds at an apparent optimum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoundCheck {
    /// All true bounds restored; `flipped` variables moved to their opposite true bound.
    Clean { flipped: usize },
    /// Some variables could not reach a true bound; the window was widened.
    Widened {
        infeasibilities: usize,
        change_cost: f64,
    },
    /// Widening would pass the ceiling; `variable` still sits at a fake bound.
    CeilingReached { variable: usize, direction: f64 },
}

/// Keeps every non-basic variable inside a finite window of width `current_dual_bound`, so a
/// dual-feasible start always exists, and widens the window when the optimum touches it.
#[derive(Clone, Debug)]
pub struct FakeBoundManager {
    tags: Vec<FakeBound>,
    number_fake: usize,
    current_dual_bound: f64,
    widenings: usize,
}

impl FakeBoundManager {
    pub fn new(number_total: usize, dual_bound: f64) -> Self {
        Self {
            tags: vec![FakeBound::None; number_total],
            number_fake: 0,
            current_dual_bound: dual_bound,
            widenings: 0,
        }
    }

    pub fn number_fake(&self) -> usize {
        self.number_fake
    }

    pub fn tag(&self, variable: usize) -> FakeBound {
        self.tags[variable]
    }

    pub fn current_dual_bound(&self) -> f64 {
        self.current_dual_bound
    }

    pub fn widenings(&self) -> usize {
        self.widenings
    }

    pub(crate) fn set_tags(&mut self, tags: &[FakeBound], dual_bound: f64) {
        self.tags.copy_from_slice(tags);
        self.number_fake = self.count_tags();
        self.current_dual_bound = dual_bound;
    }

    pub(crate) fn tags(&self) -> &[FakeBound] {
        &self.tags
    }

    pub fn count_tags(&self) -> usize {
        self.tags.iter().filter(|&&tag| tag != FakeBound::None).count()
    }

    /// Puts windows on the non-basic variables and places each on the bound its reduced cost
    /// asks for. Returns the number of fake-bounded variables.
    pub fn initialize(&mut self, variables: &mut VariableSet, dual_tolerance: f64) -> usize {
        let window = self.current_dual_bound;
        self.number_fake = 0;
        for j in 0..variables.number_total() {
            self.tags[j] = FakeBound::None;
            variables.restore_bounds(j);
            if variables.status[j].is_basic() {
                continue;
            }

            let (lower, upper) = (variables.lower[j], variables.upper[j]);
            let dj = variables.dj[j];
            if lower == upper {
                variables.status[j] = VariableStatus::Fixed;
                variables.solution[j] = lower;
                continue;
            }

            let wanted = if dj > dual_tolerance {
                VariableStatus::AtLowerBound
            } else if dj < -dual_tolerance {
                VariableStatus::AtUpperBound
            } else if !lower.is_finite() && !upper.is_finite() {
                VariableStatus::Free
            } else {
                match variables.status[j] {
                    VariableStatus::AtUpperBound => VariableStatus::AtUpperBound,
                    VariableStatus::AtLowerBound => VariableStatus::AtLowerBound,
                    _ if lower.is_finite() => VariableStatus::AtLowerBound,
                    _ => VariableStatus::AtUpperBound,
                }
            };

            let tag = match (lower.is_finite(), upper.is_finite()) {
                (false, false) => {
                    if wanted == VariableStatus::Free {
                        FakeBound::None
                    } else {
                        let centre = if variables.solution[j].is_finite() {
                            variables.solution[j]
                        } else {
                            0.0
                        };
                        variables.lower[j] = centre - 0.5 * window;
                        variables.upper[j] = centre + 0.5 * window;
                        FakeBound::BothFake
                    }
                }
                (true, false) => {
                    variables.upper[j] = lower + window;
                    FakeBound::UpperFake
                }
                (false, true) => {
                    variables.lower[j] = upper - window;
                    FakeBound::LowerFake
                }
                (true, true) if upper - lower > window => {
                    if wanted == VariableStatus::AtUpperBound {
                        variables.lower[j] = upper - window;
                        FakeBound::LowerFake
                    } else {
                        variables.upper[j] = lower + window;
                        FakeBound::UpperFake
                    }
                }
                (true, true) => FakeBound::None,
            };
            if tag != FakeBound::None {
                self.number_fake += 1;
            }
            self.tags[j] = tag;

            variables.status[j] = wanted;
            variables.move_to_bound(j);
        }
        debug!(
            "fake bounds initialized: {} variables in a window of {:e}",
            self.number_fake, window
        );
        self.number_fake
    }

    /// Restores the true bounds at an apparent optimum. Variables sitting at a fake bound are
    /// flipped to their opposite true bound when that is within the window and dual feasible;
    /// if any remain, the window grows by `growth` and is re-applied around every non-basic
    /// variable.
    pub fn check(
        &mut self,
        variables: &mut VariableSet,
        growth: f64,
        ceiling: f64,
        primal_tolerance: f64,
        dual_tolerance: f64,
    ) -> BoundCheck {
        let check_bound = 1.000000000001 * self.current_dual_bound;
        let mut infeasibilities = 0;
        let mut flipped = 0;
        let mut first_bad = None;

        for j in 0..variables.number_total() {
            if self.tags[j] == FakeBound::None {
                continue;
            }
            self.tags[j] = FakeBound::None;
            variables.restore_bounds(j);
            let (lower, upper) = (variables.lower[j], variables.upper[j]);
            let value = variables.solution[j];
            let dj = variables.dj[j];
            match variables.status[j] {
                VariableStatus::AtLowerBound if (value - lower).abs() > primal_tolerance => {
                    if upper - value < check_bound && dj < dual_tolerance {
                        variables.status[j] = VariableStatus::AtUpperBound;
                        variables.solution[j] = upper;
                        flipped += 1;
                    } else if dj.abs() <= dual_tolerance && value > lower {
                        variables.park(j);
                    } else {
                        infeasibilities += 1;
                        first_bad.get_or_insert((j, -1.0));
                    }
                }
                VariableStatus::AtUpperBound if (value - upper).abs() > primal_tolerance => {
                    if value - lower < check_bound && dj > -dual_tolerance {
                        variables.status[j] = VariableStatus::AtLowerBound;
                        variables.solution[j] = lower;
                        flipped += 1;
                    } else if dj.abs() <= dual_tolerance && value < upper {
                        variables.park(j);
                    } else {
                        infeasibilities += 1;
                        first_bad.get_or_insert((j, 1.0));
                    }
                }
                _ => {}
            }
        }
        self.number_fake = 0;

        let Some((variable, direction)) = first_bad else {
            debug!("fake bounds removed, {} variables flipped", flipped);
            return BoundCheck::Clean { flipped };
        };

        let new_bound = growth * self.current_dual_bound;
        if new_bound > ceiling {
            debug!(
                "fake bound window {:e} would pass the ceiling {:e}",
                new_bound, ceiling
            );
            return BoundCheck::CeilingReached {
                variable,
                direction,
            };
        }

        let change_cost = self.widen(variables, new_bound);
        debug!(
            "fake bound window widened to {:e}: {} variables at fake bounds, cost change {:e}",
            new_bound, infeasibilities, change_cost
        );
        BoundCheck::Widened {
            infeasibilities,
            change_cost,
        }
    }

    /// Re-windows every non-basic variable at a bound with width `new_bound`, moving it onto the
    /// new bound of its side. Returns the change of the working objective.
    pub fn widen(&mut self, variables: &mut VariableSet, new_bound: f64) -> f64 {
        self.current_dual_bound = new_bound;
        self.widenings += 1;
        self.number_fake = 0;
        let mut change_cost = 0.0;

        for j in 0..variables.number_total() {
            let status = variables.status[j];
            if status != VariableStatus::AtLowerBound && status != VariableStatus::AtUpperBound {
                continue;
            }
            variables.restore_bounds(j);
            self.tags[j] = FakeBound::None;
            let (lower, upper) = (variables.lower[j], variables.upper[j]);
            let value = variables.solution[j];
            let (new_lower, new_upper) = if value - lower <= upper - value {
                let new_lower = lower.max(value - 0.666667 * new_bound);
                (new_lower, upper.min(new_lower + new_bound))
            } else {
                let new_upper = upper.min(value + 0.666667 * new_bound);
                (lower.max(new_upper - new_bound), new_upper)
            };
            variables.lower[j] = new_lower;
            variables.upper[j] = new_upper;

            let tag = match (new_lower != lower, new_upper != upper) {
                (true, true) => FakeBound::BothFake,
                (true, false) => FakeBound::LowerFake,
                (false, true) => FakeBound::UpperFake,
                (false, false) => FakeBound::None,
            };
            if tag != FakeBound::None {
                self.number_fake += 1;
            }
            self.tags[j] = tag;

            variables.move_to_bound(j);
            change_cost += variables.cost[j] * (variables.solution[j] - value);
        }
        change_cost
    }

    /// Drops the fake bounds of a variable that became basic.
    pub fn reset(&mut self, variables: &mut VariableSet, variable: usize) {
        if self.tags[variable] != FakeBound::None {
            self.tags[variable] = FakeBound::None;
            self.number_fake -= 1;
        }
        variables.restore_bounds(variable);
    }

    /// Restores every true bound. Non-basic variables left at a fake value are moved onto their
    /// true bound (or kept in place if that side is infinite).
    pub fn reset_all(&mut self, variables: &mut VariableSet) {
        for j in 0..variables.number_total() {
            if self.tags[j] == FakeBound::None {
                continue;
            }
            self.tags[j] = FakeBound::None;
            variables.restore_bounds(j);
            if !variables.status[j].is_basic() {
                let wanted = variables.status[j];
                variables.status[j] = variables.settle_status(j, wanted);
                variables.move_to_bound(j);
            }
        }
        self.number_fake = 0;
    }
}
