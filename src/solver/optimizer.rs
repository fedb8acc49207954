use super::problem::CalibrationProblem;
use super::simplex::initial_simplex;
use crate::error::{ExecutionError, FunctionError};
use crate::procedures::Constraints;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::{info, instrument, warn};

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOptions {
    pub max_iterations: usize,
    /// Converged once `f_worst - f_best` drops below this.
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for CalibrationOptions {
    fn default() -> Self { Self { max_iterations: 500, tolerance: 1e-8, seed: 0 } }
}

/// Budget exhausted before the simplex collapsed. Reported alongside the
/// best point found; the point is still usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDivergence {
    pub iterations: usize,
    /// `f_worst - f_best` when the search stopped.
    pub spread: f64,
}

impl fmt::Display for CalibrationDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "simplex did not converge after {} iterations (spread {:e})", self.iterations, self.spread)
    }
}

/// Outcome of one bounded Nelder–Mead search.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplexResult {
    pub point: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
    pub spread: f64,
    /// Best objective after each iteration.
    pub history: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub procedure_id: String,
    /// Best values of the free parameters.
    pub parameters: Vec<(String, f64)>,
    pub objective: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
    pub seed: u64,
    pub warning: Option<CalibrationDivergence>,
    pub history: Vec<f64>,
}

fn clamp_into(x: &mut [f64], bounds: &[Constraints]) {
    for (v, b) in x.iter_mut().zip(bounds) {
        *v = b.clamp(*v);
    }
}

/// `from + t * (to - from)`, clamped into bounds.
fn towards(from: &[f64], to: &[f64], t: f64, bounds: &[Constraints]) -> Vec<f64> {
    let mut x: Vec<f64> = from.iter().zip(to).map(|(a, b)| a + t * (b - a)).collect();
    clamp_into(&mut x, bounds);
    x
}

fn by_value(a: &f64, b: &f64) -> Ordering { a.partial_cmp(b).unwrap_or(Ordering::Equal) }

/// Minimizes `f` inside `bounds` starting from `simplex`. Every trial point
/// is clamped into bounds before it is evaluated. The best value never
/// increases from one iteration to the next.
pub fn nelder_mead<F>(f: F, simplex: Vec<Vec<f64>>, bounds: &[Constraints], options: &CalibrationOptions) -> SimplexResult
where
    F: Fn(&[f64]) -> f64,
{
    let mut evaluations = 0usize;
    let mut eval = |x: &[f64]| {
        evaluations += 1;
        let v = f(x);
        if v.is_nan() {
            f64::INFINITY
        } else {
            v
        }
    };

    let mut vertices: Vec<(Vec<f64>, f64)> = simplex
        .into_iter()
        .map(|mut x| {
            clamp_into(&mut x, bounds);
            let v = eval(&x);
            (x, v)
        })
        .collect();

    if vertices.is_empty() {
        return SimplexResult { point: Vec::new(), value: f64::INFINITY, iterations: 0, evaluations, converged: false, spread: f64::NAN, history: Vec::new() };
    }
    let n = vertices.len() - 1;
    let mut history = Vec::new();
    let mut iterations = 0;
    let mut converged = false;

    loop {
        vertices.sort_by(|a, b| by_value(&a.1, &b.1));
        let best = vertices[0].1;
        let worst = vertices[n].1;
        let spread = worst - best;
        if spread.is_finite() && spread < options.tolerance {
            converged = true;
            break;
        }
        if iterations >= options.max_iterations || n == 0 {
            break;
        }
        iterations += 1;

        let mut centroid = vec![0.0; vertices[0].0.len()];
        for (x, _) in &vertices[..n] {
            for (c, v) in centroid.iter_mut().zip(x) {
                *c += v / n as f64;
            }
        }

        let (worst_x, worst_f) = (vertices[n].0.clone(), vertices[n].1);
        let second_worst = vertices[n - 1].1;

        // Reflection goes through the centroid away from the worst vertex.
        let reflected = towards(&centroid, &worst_x, -REFLECTION, bounds);
        let fr = eval(&reflected);

        if fr < best {
            let expanded = towards(&centroid, &reflected, EXPANSION, bounds);
            let fe = eval(&expanded);
            vertices[n] = if fe < fr { (expanded, fe) } else { (reflected, fr) };
        } else if fr < second_worst {
            vertices[n] = (reflected, fr);
        } else {
            let (contracted, threshold) = if fr < worst_f {
                (towards(&centroid, &reflected, CONTRACTION, bounds), fr)
            } else {
                (towards(&centroid, &worst_x, CONTRACTION, bounds), worst_f)
            };
            let fc = eval(&contracted);
            if fc < threshold {
                vertices[n] = (contracted, fc);
            } else {
                let anchor = vertices[0].0.clone();
                for vertex in vertices.iter_mut().skip(1) {
                    let x = towards(&anchor, &vertex.0, SHRINK, bounds);
                    let v = eval(&x);
                    *vertex = (x, v);
                }
            }
        }

        let current = vertices.iter().map(|v| v.1).fold(f64::INFINITY, f64::min);
        history.push(current);
    }

    let spread = vertices[n].1 - vertices[0].1;
    let (point, value) = vertices.swap_remove(0);
    SimplexResult { point, value, iterations, evaluations, converged, spread, history }
}

/// Calibrates the problem's free parameters from a seeded initial simplex.
#[instrument(skip_all, name = "calibrate", fields(procedure = %problem.procedure_id, seed = options.seed))]
pub fn calibrate(problem: &CalibrationProblem, options: &CalibrationOptions) -> Result<CalibrationReport, ExecutionError> {
    let simplex = initial_simplex(problem.bounds(), options.seed);
    let result = nelder_mead(|x| problem.evaluate(x), simplex, problem.bounds(), options);

    if !result.value.is_finite() {
        return Err(ExecutionError::ProcedureExecution {
            procedure: problem.procedure_id.clone(),
            source: FunctionError::Numerical("no parameter set could be evaluated".into()),
        });
    }

    let warning = (!result.converged).then(|| CalibrationDivergence { iterations: result.iterations, spread: result.spread });
    if let Some(w) = &warning {
        warn!(procedure = %problem.procedure_id, "{}", w);
    }
    info!(
        objective = result.value,
        iterations = result.iterations,
        evaluations = result.evaluations,
        converged = result.converged,
        "calibration finished"
    );

    Ok(CalibrationReport {
        procedure_id: problem.procedure_id.clone(),
        parameters: problem.free_parameters().into_iter().zip(result.point).collect(),
        objective: result.value,
        iterations: result.iterations,
        evaluations: result.evaluations,
        converged: result.converged,
        seed: options.seed,
        warning,
        history: result.history,
    })
}

/// Runs one search per seed in parallel and keeps the best report. Ties go
/// to the earlier seed.
pub fn calibrate_multi_start(
    problem: &CalibrationProblem,
    options: &CalibrationOptions,
    seeds: &[u64],
) -> Result<CalibrationReport, ExecutionError> {
    let reports: Vec<Result<CalibrationReport, ExecutionError>> = seeds
        .par_iter()
        .map(|&seed| calibrate(problem, &CalibrationOptions { seed, ..*options }))
        .collect();

    let mut best: Option<CalibrationReport> = None;
    let mut first_error = None;
    for report in reports {
        match report {
            Ok(r) => {
                if best.as_ref().map_or(true, |b| r.objective < b.objective) {
                    best = Some(r);
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match (best, first_error) {
        (Some(report), _) => Ok(report),
        (None, Some(e)) => Err(e),
        (None, None) => calibrate(problem, options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::topology::tests::day;
    use crate::analysis::topology::Topology;
    use crate::plan::{Procedure, ProcedureDefinition, RunWindow};
    use crate::procedures::routing::LinearReservoirCascade;
    use crate::procedures::ProcedureFunction;
    use crate::solver::problem::Objective;
    use crate::store::{Node, TimeGrid, VariableRef};
    use chrono::Duration;
    use indexmap::IndexMap;

    fn rosenbrock(x: &[f64]) -> f64 { (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2) }

    fn box2() -> Vec<Constraints> {
        vec![
            Constraints { min: -2.0, low_guide: -1.0, high_guide: 0.5, max: 2.0 },
            Constraints { min: -2.0, low_guide: -1.0, high_guide: 0.5, max: 2.0 },
        ]
    }

    #[test]
    fn test_best_value_never_increases() {
        let options = CalibrationOptions { max_iterations: 300, tolerance: 1e-12, seed: 3 };
        let result = nelder_mead(rosenbrock, initial_simplex(&box2(), 3), &box2(), &options);
        assert!(result.history.windows(2).all(|w| w[1] <= w[0]));
        assert!(result.value < 1e-2, "value {}", result.value);
    }

    #[test]
    fn test_trial_points_stay_in_bounds() {
        // Unconstrained minimum at (5, 5) lies outside the box.
        let bounds = box2();
        let seen = std::sync::Mutex::new(Vec::new());
        let f = |x: &[f64]| {
            seen.lock().unwrap().push(x.to_vec());
            (x[0] - 5.0).powi(2) + (x[1] - 5.0).powi(2)
        };
        let result = nelder_mead(f, initial_simplex(&bounds, 1), &bounds, &CalibrationOptions::default());
        for x in seen.lock().unwrap().iter() {
            assert!(bounds.iter().zip(x).all(|(b, v)| b.contains(*v)));
        }
        assert!((result.point[0] - 2.0).abs() < 1e-2 && (result.point[1] - 2.0).abs() < 1e-2);
    }

    #[test]
    fn test_budget_exhaustion_is_reported() {
        let options = CalibrationOptions { max_iterations: 2, tolerance: 0.0, seed: 0 };
        let result = nelder_mead(rosenbrock, initial_simplex(&box2(), 0), &box2(), &options);
        assert!(!result.converged);
        assert_eq!(result.iterations, 2);
    }

    fn cascade_problem() -> CalibrationProblem {
        let grid: TimeGrid = TimeGrid::new(day(0), day(0) + Duration::days(59), Duration::days(1)).unwrap();
        let inflow: Vec<f64> = (0..60).map(|t| if t % 15 < 3 { 20.0 } else { 1.0 }).collect();

        // Synthetic truth: k = 4.
        let truth = LinearReservoirCascade::new(4.0, 2.0);
        let topo = Topology::new(vec![Node::new(1, "reach", grid).observed("in").observed("out")]).unwrap();
        let mut def_wiring = IndexMap::new();
        def_wiring.insert("inflow".to_string(), VariableRef::new(1, "in"));
        let p = Procedure::bind(ProcedureDefinition::new("route", Box::new(truth), def_wiring, IndexMap::new()), &topo).unwrap();
        let window = RunWindow::new(grid, grid.end);
        let inputs = vec![grid.series(inflow), grid.empty_series()];
        let observed = p.run(&topo, &window, Some(inputs.clone())).unwrap().outputs[0].1.clone();

        let mut model = LinearReservoirCascade::new(1.0, 2.0);
        model.parameters_mut().constrain("route", "n", Constraints { min: 2.0, low_guide: 2.0, high_guide: 2.0, max: 2.0 }).unwrap();
        let prepared = p.prepare(&window, inputs).unwrap();
        CalibrationProblem::new("route", Box::new(model), prepared, vec![("outflow".into(), observed)], Objective::Rmse).unwrap()
    }

    #[test]
    fn test_recovers_reservoir_constant() {
        let problem = cascade_problem();
        assert_eq!(problem.free_parameters(), vec!["k".to_string()]);
        let report = calibrate(&problem, &CalibrationOptions { max_iterations: 200, tolerance: 1e-12, seed: 11 }).unwrap();
        assert!((report.parameters[0].1 - 4.0).abs() < 1e-3, "k = {}", report.parameters[0].1);
        assert!(report.objective < 1e-6);
    }

    #[test]
    fn test_exhausted_budget_reports_divergence() {
        let problem = cascade_problem();
        let options = CalibrationOptions { max_iterations: 1, tolerance: 0.0, seed: 7 };
        let report = calibrate(&problem, &options).unwrap();

        assert!(!report.converged);
        assert_eq!(report.iterations, 1);
        let warning = report.warning.as_ref().expect("divergence warning");
        assert_eq!(warning.iterations, 1);
        assert!(warning.spread >= 0.0);

        let (name, k) = &report.parameters[0];
        assert_eq!(name, "k");
        assert!(problem.bounds()[0].contains(*k), "k = {}", k);
        assert!(report.objective.is_finite());
    }

    #[test]
    fn test_multi_start_keeps_best() {
        let problem = cascade_problem();
        let options = CalibrationOptions { max_iterations: 5, tolerance: 1e-12, seed: 0 };
        let seeds = [1, 2, 3, 4];
        let best = calibrate_multi_start(&problem, &options, &seeds).unwrap();
        for seed in seeds {
            let single = calibrate(&problem, &CalibrationOptions { seed, ..options }).unwrap();
            assert!(best.objective <= single.objective);
        }
    }
}
