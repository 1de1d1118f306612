use approx::assert_abs_diff_eq;
use ntest::timeout;
use rand_chacha::{
    ChaCha8Rng,
    rand_core::{RngCore, SeedableRng},
};
use strum::IntoEnumIterator;

use dual_simplex::optimisation_algorithms::{
    dual_simplex::{LimitReason, Ray, SolveStatus},
    dual_simplex_config::{PricingKind, PricingMode, SolverConfig},
    linear_programming::{ComparisonOp, OptimisationDirection, Problem, ProblemFile, Solution},
};

/// A minimisation problem kept in plain arrays so that solutions can be checked against it.
struct Instance {
    cost: Vec<f64>,
    column_lower: Vec<f64>,
    column_upper: Vec<f64>,
    rows: Vec<Vec<(usize, f64)>>,
    row_lower: Vec<f64>,
    row_upper: Vec<f64>,
}

fn uniform(rng: &mut ChaCha8Rng, low: f64, high: f64) -> f64 {
    let unit = (rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
    low + (high - low) * unit
}

impl Instance {
    /// Feasible by construction around a random point, bounded by a budget row.
    fn random(seed: u64, number_rows: usize, number_columns: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut instance = Instance {
            cost: vec![],
            column_lower: vec![],
            column_upper: vec![],
            rows: vec![],
            row_lower: vec![],
            row_upper: vec![],
        };
        let mut point = vec![];
        for _ in 0..number_columns {
            instance.cost.push(uniform(&mut rng, -5.0, 5.0));
            instance.column_lower.push(0.0);
            let upper = if rng.next_u64() % 2 == 0 {
                uniform(&mut rng, 1.0, 10.0)
            } else {
                f64::INFINITY
            };
            instance.column_upper.push(upper);
            point.push(uniform(&mut rng, 0.0, upper.min(5.0)));
        }

        for _ in 0..number_rows {
            let mut row = vec![];
            for j in 0..number_columns {
                if rng.next_u64() % 10 < 3 {
                    row.push((j, uniform(&mut rng, -3.0, 3.0)));
                }
            }
            let activity: f64 = row.iter().map(|&(j, a)| a * point[j]).sum();
            let (lower, upper) = match rng.next_u64() % 7 {
                0 | 1 => (f64::NEG_INFINITY, activity + uniform(&mut rng, 0.0, 2.0)),
                2 | 3 => (activity - uniform(&mut rng, 0.0, 2.0), f64::INFINITY),
                4 | 5 => (activity - 1.0, activity + 1.0),
                _ => (activity, activity),
            };
            instance.rows.push(row);
            instance.row_lower.push(lower);
            instance.row_upper.push(upper);
        }

        let budget: f64 = point.iter().sum::<f64>() + 5.0;
        instance.rows.push((0..number_columns).map(|j| (j, 1.0)).collect());
        instance.row_lower.push(f64::NEG_INFINITY);
        instance.row_upper.push(budget);
        instance
    }

    /// Feasible at the origin and without a budget row, so many of these are unbounded.
    fn random_at_origin(seed: u64, number_rows: usize, number_columns: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut instance = Instance {
            cost: vec![],
            column_lower: vec![],
            column_upper: vec![],
            rows: vec![],
            row_lower: vec![],
            row_upper: vec![],
        };
        for _ in 0..number_columns {
            instance.cost.push(uniform(&mut rng, -5.0, 5.0));
            instance.column_lower.push(0.0);
            instance.column_upper.push(if rng.next_u64() % 2 == 0 {
                uniform(&mut rng, 1.0, 10.0)
            } else {
                f64::INFINITY
            });
        }
        for _ in 0..number_rows {
            let row: Vec<(usize, f64)> = (0..number_columns)
                .filter_map(|j| {
                    if rng.next_u64() % 10 < 3 {
                        Some((j, uniform(&mut rng, -3.0, 3.0)))
                    } else {
                        None
                    }
                })
                .collect();
            let (lower, upper) = match rng.next_u64() % 4 {
                0 => (f64::NEG_INFINITY, uniform(&mut rng, 0.0, 4.0)),
                1 => (-uniform(&mut rng, 0.0, 4.0), f64::INFINITY),
                2 => (-uniform(&mut rng, 0.0, 4.0), uniform(&mut rng, 0.0, 4.0)),
                _ => (0.0, 0.0),
            };
            instance.rows.push(row);
            instance.row_lower.push(lower);
            instance.row_upper.push(upper);
        }
        instance
    }

    /// `cᵀr < 0`, `r` in the recession cone of the column bounds and `Ar` in that of the rows.
    fn assert_improving_direction(&self, ray: &[f64]) {
        let tolerance = 1e-7;
        assert_eq!(ray.len(), self.cost.len());
        let slope: f64 = self.cost.iter().zip(ray).map(|(c, r)| c * r).sum();
        assert!(slope < 0.0, "ray {:?} has slope {}", ray, slope);
        let in_cone = |value: f64, lower: f64, upper: f64| {
            (lower.is_infinite() || value >= -tolerance)
                && (upper.is_infinite() || value <= tolerance)
        };
        for (j, &value) in ray.iter().enumerate() {
            assert!(
                in_cone(value, self.column_lower[j], self.column_upper[j]),
                "column {} moves by {} within [{}, {}]",
                j,
                value,
                self.column_lower[j],
                self.column_upper[j]
            );
        }
        for (i, row) in self.rows.iter().enumerate() {
            let change: f64 = row.iter().map(|&(j, a)| a * ray[j]).sum();
            assert!(
                in_cone(change, self.row_lower[i], self.row_upper[i]),
                "row {} moves by {} within [{}, {}]",
                i,
                change,
                self.row_lower[i],
                self.row_upper[i]
            );
        }
    }

    fn problem(&self) -> Problem {
        let mut problem = Problem::new(OptimisationDirection::Minimise);
        let vars: Vec<_> = (0..self.cost.len())
            .map(|j| problem.add_var(self.cost[j], (self.column_lower[j], self.column_upper[j])))
            .collect();
        for (i, row) in self.rows.iter().enumerate() {
            problem.add_range_constraint(
                row.iter().map(|&(j, a)| (vars[j], a)),
                (self.row_lower[i], self.row_upper[i]),
            );
        }
        problem
    }

    /// Primal feasibility, dual sign conditions and the objective identity.
    fn assert_optimal(&self, solution: &Solution) {
        assert_eq!(solution.status(), SolveStatus::Optimal);
        let tolerance = 1e-6;
        let values: Vec<f64> = solution.iter().map(|(_, value)| value).collect();
        let reduced_costs = solution.reduced_costs();
        let row_duals = solution.row_duals();
        let activities = solution.row_activities();

        let check = |value: f64, lower: f64, upper: f64, dual: f64| {
            assert!(value >= lower - tolerance, "{} below {}", value, lower);
            assert!(value <= upper + tolerance, "{} above {}", value, upper);
            if value > lower + tolerance {
                assert!(dual <= tolerance, "{} above its lower bound with dual {}", value, dual);
            }
            if value < upper - tolerance {
                assert!(dual >= -tolerance, "{} below its upper bound with dual {}", value, dual);
            }
        };
        for j in 0..self.cost.len() {
            check(
                values[j],
                self.column_lower[j],
                self.column_upper[j],
                reduced_costs[j],
            );
        }
        for (i, row) in self.rows.iter().enumerate() {
            let activity: f64 = row.iter().map(|&(j, a)| a * values[j]).sum();
            assert_abs_diff_eq!(activity, activities[i], epsilon = tolerance);
            check(activity, self.row_lower[i], self.row_upper[i], row_duals[i]);
        }

        let objective: f64 = self.cost.iter().zip(&values).map(|(c, x)| c * x).sum();
        assert_abs_diff_eq!(objective, solution.objective(), epsilon = tolerance);
        let dual_objective: f64 = reduced_costs
            .iter()
            .zip(&values)
            .map(|(d, x)| d * x)
            .chain(row_duals.iter().zip(activities).map(|(y, r)| y * r))
            .sum();
        assert_abs_diff_eq!(
            objective,
            dual_objective,
            epsilon = tolerance * (1.0 + objective.abs())
        );
    }
}

fn transportation() -> Problem {
    let supply = [20.0, 30.0];
    let demand = [10.0, 25.0, 15.0];
    let cost = [[2.0, 3.0, 1.0], [5.0, 4.0, 8.0]];
    let mut problem = Problem::new(OptimisationDirection::Minimise);
    let mut ship = vec![];
    for row in cost {
        ship.push(
            row.iter()
                .map(|&c| problem.add_var(c, (0.0, f64::INFINITY)))
                .collect::<Vec<_>>(),
        );
    }
    for (s, &amount) in supply.iter().enumerate() {
        problem.add_constraint(
            ship[s].iter().map(|&v| (v, 1.0)),
            ComparisonOp::Eq,
            amount,
        );
    }
    for (d, &amount) in demand.iter().enumerate() {
        problem.add_constraint(ship.iter().map(|row| (row[d], 1.0)), ComparisonOp::Eq, amount);
    }
    problem
}

#[test]
#[timeout(10000)]
fn transportation_problem() {
    let solution = transportation().solve().unwrap();
    assert_eq!(solution.status(), SolveStatus::Optimal);
    assert_abs_diff_eq!(solution.objective(), 150.0, epsilon = 1e-9);
    let shipped: f64 = solution.iter().map(|(_, value)| value).sum();
    assert_abs_diff_eq!(shipped, 50.0, epsilon = 1e-9);
}

#[test]
#[timeout(10000)]
fn transportation_problem_hits_iteration_limit() {
    let config = SolverConfig {
        maximum_iterations: 2,
        ..SolverConfig::default()
    };
    let solution = transportation().solve_with_config(config).unwrap();
    assert_eq!(solution.status(), SolveStatus::IterationLimit);
    assert_eq!(solution.limit_reason(), Some(LimitReason::Iterations));
    assert_eq!(solution.iterations(), 2);
}

#[test]
#[timeout(60000)]
fn random_problems_are_solved_by_every_pricing() {
    for seed in 0..12 {
        let instance = Instance::random(seed, 12, 20);
        let problem = instance.problem();
        let mut objectives = vec![];
        for kind in PricingKind::iter() {
            for mode in PricingMode::iter() {
                let config = SolverConfig {
                    pricing_kind: kind,
                    pricing_mode: mode,
                    ..SolverConfig::default()
                };
                let solution = problem.solve_with_config(config).unwrap();
                instance.assert_optimal(&solution);
                objectives.push(solution.objective());
            }
        }
        for objective in &objectives {
            assert_abs_diff_eq!(
                *objective,
                objectives[0],
                epsilon = 1e-6 * (1.0 + objectives[0].abs())
            );
        }
    }
}

#[test]
#[timeout(60000)]
fn parallel_kernels_give_the_same_optimum() {
    for seed in 20..24 {
        let instance = Instance::random(seed, 30, 60);
        let problem = instance.problem();
        let serial = problem.solve().unwrap();
        instance.assert_optimal(&serial);

        let config = SolverConfig {
            parallel_threshold: 1,
            threads: Some(4),
            ..SolverConfig::default()
        };
        let parallel = problem.solve_with_config(config).unwrap();
        instance.assert_optimal(&parallel);
        assert_abs_diff_eq!(
            serial.objective(),
            parallel.objective(),
            epsilon = 1e-6 * (1.0 + serial.objective().abs())
        );
    }
}

#[test]
#[timeout(30000)]
fn warm_start_from_optimal_basis() {
    let instance = Instance::random(7, 15, 25);
    let mut problem = instance.problem();
    let cold = problem.solve().unwrap();
    instance.assert_optimal(&cold);

    problem.set_initial_status(cold.variable_status().to_vec());
    let warm = problem.solve().unwrap();
    instance.assert_optimal(&warm);
    assert!(warm.iterations() <= cold.iterations());
    assert_abs_diff_eq!(
        warm.objective(),
        cold.objective(),
        epsilon = 1e-9 * (1.0 + cold.objective().abs())
    );
}

#[test]
#[timeout(10000)]
fn infeasible_rows_give_a_dual_ray() {
    let mut problem = Problem::new(OptimisationDirection::Minimise);
    let x = problem.add_var(1.0, (0.0, f64::INFINITY));
    let y = problem.add_var(1.0, (0.0, f64::INFINITY));
    problem.add_constraint(&[(x, 1.0), (y, 1.0)], ComparisonOp::Ge, 5.0);
    problem.add_constraint(&[(x, 1.0), (y, 1.0)], ComparisonOp::Le, 3.0);

    let solution = problem.solve().unwrap();
    assert_eq!(solution.status(), SolveStatus::Infeasible);
    let Some(Ray::Dual(ray)) = solution.ray() else {
        panic!("expected a dual ray, got {:?}", solution.ray());
    };
    assert_eq!(ray.len(), 2);
    assert!(ray[0] != 0.0 && ray[1] != 0.0);
    assert!(ray[0] * ray[1] < 0.0);
}

#[test]
#[timeout(10000)]
fn unbounded_direction_improves_the_objective() {
    let mut problem = Problem::new(OptimisationDirection::Minimise);
    let x = problem.add_var(-1.0, (0.0, f64::INFINITY));
    let y = problem.add_var(0.0, (0.0, f64::INFINITY));
    problem.add_constraint(&[(x, 1.0), (y, -1.0)], ComparisonOp::Le, 1.0);

    let solution = problem.solve().unwrap();
    assert_eq!(solution.status(), SolveStatus::Unbounded);
    assert!(solution.widenings() > 0);
    let Some(Ray::Primal(ray)) = solution.ray() else {
        panic!("expected a primal ray, got {:?}", solution.ray());
    };
    assert!(-ray[0] < 0.0);
    assert!(ray[0] >= 0.0 && ray[1] >= 0.0);
    assert!(ray[0] - ray[1] <= 1e-9);
}

#[test]
#[timeout(10000)]
fn problem_file_round_trip_through_the_solver() {
    let json = r#"{
        "direction": "minimise",
        "variables": [
            { "name": "bread", "cost": 2.0, "upper": 10.0 },
            { "name": "milk", "cost": 3.5, "upper": 10.0 },
            { "name": "cheese", "cost": 8.0, "upper": 10.0 }
        ],
        "constraints": [
            { "name": "calories", "terms": [[0, 300.0], [1, 150.0], [2, 400.0]], "lower": 2000.0 },
            { "name": "protein", "terms": [[0, 10.0], [1, 8.0], [2, 25.0]], "lower": 55.0 }
        ]
    }"#;
    let file = ProblemFile::from_json(json).unwrap();
    let solution = file.to_problem().unwrap().solve().unwrap();
    assert_eq!(solution.status(), SolveStatus::Optimal);
    // bread alone: 6.67 units give the calories and 66.7 protein
    assert_abs_diff_eq!(solution.objective(), 2.0 * 2000.0 / 300.0, epsilon = 1e-9);
    assert_eq!(file.variable_name(0), "bread");
}

#[test]
#[timeout(10000)]
fn covering_pair() {
    let mut problem = Problem::new(OptimisationDirection::Minimise);
    let x1 = problem.add_var(1.0, (0.0, 5.0));
    let x2 = problem.add_var(1.0, (0.0, 5.0));
    problem.add_constraint(&[(x1, 1.0), (x2, 1.0)], ComparisonOp::Ge, 2.0);
    let solution = problem.solve().unwrap();
    assert_eq!(solution.status(), SolveStatus::Optimal);
    assert_abs_diff_eq!(solution.objective(), 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(solution[x1] + solution[x2], 2.0, epsilon = 1e-9);
}

#[test]
#[timeout(10000)]
fn contradictory_rows_are_infeasible() {
    let mut problem = Problem::new(OptimisationDirection::Minimise);
    let x = problem.add_var(1.0, (f64::NEG_INFINITY, f64::INFINITY));
    problem.add_constraint(&[(x, 1.0)], ComparisonOp::Ge, 5.0);
    problem.add_constraint(&[(x, 1.0)], ComparisonOp::Le, 2.0);
    let solution = problem.solve().unwrap();
    assert_eq!(solution.status(), SolveStatus::Infeasible);
    assert!(solution.iterations() <= 5);
}

#[test]
#[timeout(10000)]
fn decreasing_cost_without_bound_is_unbounded() {
    let mut problem = Problem::new(OptimisationDirection::Minimise);
    let x = problem.add_var(-1.0, (0.0, f64::INFINITY));
    problem.add_constraint(&[(x, 1.0)], ComparisonOp::Ge, 0.0);
    let solution = problem.solve().unwrap();
    assert_eq!(solution.status(), SolveStatus::Unbounded);
    let Some(Ray::Primal(ray)) = solution.ray() else {
        panic!("expected a primal ray, got {:?}", solution.ray());
    };
    assert!(ray[x.idx()] > 0.0);
}

#[test]
#[timeout(120000)]
fn problems_feasible_at_the_origin_are_never_infeasible() {
    let mut unbounded = 0;
    for seed in 0..60 {
        let instance = Instance::random_at_origin(seed, 6, 8);
        let solution = instance.problem().solve().unwrap();
        match solution.status() {
            SolveStatus::Optimal => instance.assert_optimal(&solution),
            SolveStatus::Unbounded => unbounded += 1,
            status => panic!("seed {} ended {}", seed, status),
        }
    }
    assert!(unbounded > 0);
}

#[test]
#[timeout(120000)]
fn unbounded_rays_are_recession_directions() {
    let mut checked = 0;
    for seed in 100..160 {
        let instance = Instance::random_at_origin(seed, 6, 8);
        let solution = instance.problem().solve().unwrap();
        if solution.status() != SolveStatus::Unbounded {
            continue;
        }
        let Some(Ray::Primal(ray)) = solution.ray() else {
            panic!("seed {}: expected a primal ray, got {:?}", seed, solution.ray());
        };
        instance.assert_improving_direction(ray);
        checked += 1;
    }
    assert!(checked > 0);
}
