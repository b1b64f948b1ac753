pub mod bdf;
pub mod builder;
pub mod config;
pub mod equations;
pub mod explicit_rk;
pub mod factory;
pub mod jacobian_update;
pub mod method;
pub mod problem;
pub mod state;
pub mod statistics;
pub mod tableau;
pub mod test_models;

#[cfg(test)]
pub(crate) mod tests {
    use nalgebra::DVector;

    use super::builder::OdeBuilder;
    use super::config::{LinearSolverKind, MethodFamily};
    use super::equations::{OdeEquations, OdeSolverEquations};
    use super::method::{OdeSolverMethod, OdeSolverStopReason};
    use super::problem::{OdeSolverProblem, OdeSolverSolution};
    use super::tableau::RkTableau;
    use super::test_models::exponential_decay::exponential_decay_problem;
    use super::test_models::robertson::robertson_problem;
    use crate::matrix::{DenseMatrix, SparseMatrix};
    use crate::Vector;

    type V = DVector<f64>;

    /// Step `method` through the times of `solution` and check the computed solution at each.
    ///
    /// With `use_tstop` the solver stops exactly at each time, otherwise the solution is
    /// interpolated. Without `override_tol` the error, weighted by `rtol * |y| + atol`, must
    /// stay within a small multiple of one.
    pub fn test_ode_solver<'a, Eqn: OdeEquations + 'a>(
        method: &mut impl OdeSolverMethod<'a, Eqn>,
        solution: &OdeSolverSolution<Eqn::V>,
        override_tol: Option<f64>,
        use_tstop: bool,
    ) -> Eqn::V {
        let have_root = method.problem().eqn.root().is_some();
        for point in solution.solution_points.iter() {
            let soln = if use_tstop {
                match method.set_stop_time(point.t) {
                    Ok(_) => loop {
                        match method.step().unwrap() {
                            OdeSolverStopReason::RootFound(_) => {
                                assert!(have_root);
                                return method.state().y.clone();
                            }
                            OdeSolverStopReason::TstopReached => break method.state().y.clone(),
                            OdeSolverStopReason::InternalTimestep => (),
                        }
                    },
                    Err(_) => method.state().y.clone(),
                }
            } else {
                while method.state().t < point.t {
                    if let OdeSolverStopReason::RootFound(t) = method.step().unwrap() {
                        assert!(have_root);
                        return method.interpolate(t).unwrap();
                    }
                }
                method.interpolate(point.t).unwrap()
            };

            if let Some(override_tol) = override_tol {
                soln.assert_eq_st(&point.state, override_tol);
            } else {
                let problem = method.problem();
                let mut error = soln.clone();
                error.axpy(-1.0, &point.state, 1.0).unwrap();
                let error_norm = error
                    .squared_norm(&point.state, &problem.atol, problem.rtol())
                    .unwrap()
                    .sqrt();
                assert!(
                    error_norm < 15.0,
                    "error_norm: {} at t = {}",
                    error_norm,
                    point.t
                );
            }
        }
        method.state().y.clone()
    }

    pub fn check_solution<V: Vector>(soln: &V, expect: &V, tol: f64) {
        soln.assert_eq_st(expect, tol);
    }

    /// `y' = -lambda y`, `y(0) = 1`.
    fn decay(lambda: f64, rtol: f64, atol: f64) -> OdeSolverProblem<OdeSolverEquations<DenseMatrix>> {
        OdeBuilder::<DenseMatrix>::new()
            .p([lambda])
            .rtol(rtol)
            .atol([atol])
            .rhs(|x: &V, p: &V, _t, y: &mut V| y[0] = -p[0] * x[0])
            .jacobian_action(|_x: &V, p: &V, _t, v: &V, y: &mut V| y[0] = -p[0] * v[0])
            .init(|_p: &V, _t, y: &mut V| y[0] = 1.0, 1)
            .build()
            .unwrap()
    }

    fn methods() -> Vec<MethodFamily> {
        vec![
            MethodFamily::Bdf,
            MethodFamily::ExplicitRk(RkTableau::DormandPrince54),
            MethodFamily::ExplicitRk(RkTableau::BogackiShampine32),
        ]
    }

    #[test]
    fn analytic_decay_over_a_range_of_rates() {
        let tol = 1e-6;
        for lambda in [0.1, 1.0, 10.0, 100.0] {
            for method in methods() {
                let mut problem = decay(lambda, tol, tol);
                problem.config.method = method;
                let mut s = problem.solver().unwrap();
                let t_eval = [0.0, 0.1, 0.25, 0.5, 1.0];
                let ys = s.solve_dense(&t_eval).unwrap();
                for (t, y) in t_eval.iter().zip(ys.iter()) {
                    let expect = (-lambda * t).exp();
                    assert!(
                        (y[0] - expect).abs() < 10.0 * tol,
                        "lambda = {lambda}, {method:?}: y({t}) = {} != {expect}",
                        y[0]
                    );
                }
            }
        }
    }

    #[test]
    fn unit_decay_to_one() {
        for method in methods() {
            let mut problem = decay(1.0, 1e-6, 1e-6);
            problem.config.method = method;
            let mut s = problem.solver().unwrap();
            let (ys, ts) = s.solve(1.0).unwrap();
            assert_eq!(*ts.last().unwrap(), 1.0);
            let y = ys.last().unwrap()[0];
            assert!((y - 0.367879).abs() < 1e-5, "{method:?}: {y}");
        }
    }

    #[test]
    fn reruns_are_bit_identical() {
        for method in methods() {
            let (mut problem, _) = robertson_problem::<DenseMatrix>();
            problem.config.method = method;
            let run = || {
                let mut s = problem.solver().unwrap();
                let mut steps = Vec::new();
                s.set_stop_time(if method == MethodFamily::Bdf { 40.0 } else { 1e-2 })
                    .unwrap();
                while s.step().unwrap() != OdeSolverStopReason::TstopReached {
                    let record = *s.step_records().last().unwrap();
                    steps.push((record.t, record.h, s.state().y.clone()));
                }
                (steps, s.statistics().clone())
            };
            let (first, first_stats) = run();
            let (second, second_stats) = run();
            assert!(!first.is_empty());
            assert_eq!(first, second, "{method:?}");
            assert_eq!(first_stats, second_stats);
        }
    }

    #[test]
    fn step_never_grows_after_a_rejection() {
        // a switch in the forcing at t = 0.5 forces the error test to fail
        for method in methods() {
            let mut problem = OdeBuilder::<DenseMatrix>::new()
                .rhs(|_x: &V, _p: &V, t: f64, y: &mut V| y[0] = if t > 0.5 { 1000.0 } else { 0.0 })
                .jacobian_action(|_x: &V, _p: &V, _t, _v: &V, y: &mut V| y[0] = 0.0)
                .init(|_p: &V, _t, y: &mut V| y[0] = 0.0, 1)
                .build()
                .unwrap();
            problem.config.method = method;
            let mut s = problem.solver().unwrap();
            s.set_stop_time(2.0).unwrap();
            let mut rejected_steps = 0;
            loop {
                let reason = s.step().unwrap();
                let record = *s.step_records().last().unwrap();
                if record.rejections > 0 {
                    rejected_steps += 1;
                    assert!(
                        record.h_next.abs() <= record.h.abs(),
                        "{method:?}: {record:?}"
                    );
                }
                assert!(record.error_norm <= 1.0);
                if reason == OdeSolverStopReason::TstopReached {
                    break;
                }
            }
            assert!(rejected_steps > 0, "{method:?}");
            assert!(s.statistics().number_of_error_test_failures > 0);
            assert!((s.state().y[0] - 1500.0).abs() < 1e-2, "{method:?}: {}", s.state().y[0]);
        }
    }

    #[test]
    fn tighter_tolerances_take_more_steps() {
        for method in methods() {
            let mut steps = Vec::new();
            for rtol in [1e-3, 1e-6, 1e-9] {
                let mut problem = decay(1.0, rtol, rtol);
                problem.config.method = method;
                let mut s = problem.solver().unwrap();
                s.solve(5.0).unwrap();
                steps.push(s.statistics().number_of_steps);
            }
            assert!(steps[0] < steps[1] && steps[1] < steps[2], "{method:?}: {steps:?}");
        }
    }

    #[test]
    fn solve_dense_validates_times() {
        let (problem, _) = exponential_decay_problem::<DenseMatrix>(false);
        let mut s = problem.bdf().unwrap();
        let err = s.solve_dense(&[]).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"ODE solver error: t_eval must be increasing and all values must be greater than or equal to the current time");
        assert!(s.solve_dense(&[1.0, 0.5]).is_err());
        assert!(s.solve_dense(&[-1.0, 0.5]).is_err());

        let ys = s.solve_dense(&[0.0, 0.0, 2.0, 4.0]).unwrap();
        assert_eq!(ys.len(), 4);
        assert_eq!(ys[0], ys[1]);
        for (y, t) in ys.iter().zip([0.0f64, 0.0, 2.0, 4.0]) {
            assert!((y[0] - (-0.1 * t).exp()).abs() < 1e-5);
        }
    }

    #[test]
    fn solve_dense_keeps_times_up_to_a_root() {
        for method in methods() {
            let mut problem = OdeBuilder::<DenseMatrix>::new()
                .rhs(|x: &V, _p: &V, _t, y: &mut V| y[0] = -x[0])
                .jacobian_action(|_x: &V, _p: &V, _t, v: &V, y: &mut V| y[0] = -v[0])
                .root(|x: &V, _p: &V, _t, g: &mut V| g[0] = x[0] - 0.5, 1)
                .init(|_p: &V, _t, y: &mut V| y[0] = 1.0, 1)
                .build()
                .unwrap();
            problem.config.method = method;
            let mut s = problem.solver().unwrap();
            // the root is at ln 2, between 0.65 and 0.7
            let t_eval = (1..=20).map(|i| i as f64 * 0.05).collect::<Vec<_>>();
            let ys = s.solve_dense(&t_eval).unwrap();
            assert_eq!(ys.len(), 13, "{method:?}");
            for (y, t) in ys.iter().zip(t_eval.iter()) {
                assert!((y[0] - (-t).exp()).abs() < 1e-3, "{method:?}: y({t}) = {}", y[0]);
            }
        }
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_vector_backend_matches_serial() {
        use crate::vector::ParallelVector;
        type P = ParallelVector;
        let problem = OdeBuilder::<DenseMatrix<P>>::new()
            .rtol(1e-8)
            .atol([1e-10])
            .rhs(|x: &P, _p: &P, _t, y: &mut P| y[0] = -x[0])
            .jacobian_action(|_x: &P, _p: &P, _t, v: &P, y: &mut P| y[0] = -v[0])
            .init(|_p: &P, _t, y: &mut P| y[0] = 1.0, 1)
            .build()
            .unwrap();
        let mut s = problem.bdf().unwrap();
        let (ys, ts) = s.solve(1.0).unwrap();
        let y = ys.last().unwrap()[0];
        assert_eq!(*ts.last().unwrap(), 1.0);
        assert!((y - (-1.0f64).exp()).abs() < 1e-6, "{y}");

        let serial_problem = decay(1.0, 1e-8, 1e-10);
        let mut serial = serial_problem.bdf().unwrap();
        let (ys, _) = serial.solve(1.0).unwrap();
        assert!((ys.last().unwrap()[0] - y).abs() < 1e-12);
        assert_eq!(s.statistics().number_of_steps, serial.statistics().number_of_steps);
    }

    #[test]
    fn sparse_jacobian_with_krylov_solver() {
        let (mut problem, soln) = exponential_decay_problem::<SparseMatrix>(true);
        problem.config.linear_solver = LinearSolverKind::FlexibleGmres;
        let mut s = problem.bdf().unwrap();
        test_ode_solver(&mut s, &soln, None, true);
    }
}
