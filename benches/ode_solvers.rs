use criterion::{criterion_group, criterion_main, Criterion};
use ivpsol::{
    ode_solver::test_models::{
        exponential_decay::exponential_decay_problem, heat1d::heat1d_problem,
        robertson::robertson_problem,
    },
    BandMatrix, DenseMatrix, LinearSolverKind, MethodFamily, OdeSolverMethod, RkTableau,
    SparseMatrix,
};

fn criterion_benchmark(c: &mut Criterion) {
    macro_rules! bench {
        ($name:ident, $method:expr, $model_problem:expr) => {
            c.bench_function(stringify!($name), |b| {
                let (mut problem, soln) = $model_problem;
                problem.config.method = $method;
                let t_final = soln.solution_points.last().map_or(1.0, |p| p.t);
                b.iter(|| {
                    let mut solver = problem.solver().unwrap();
                    solver.solve(t_final).unwrap()
                })
            });
        };
    }

    bench!(
        dense_bdf_exponential_decay,
        MethodFamily::Bdf,
        exponential_decay_problem::<DenseMatrix>(false)
    );
    bench!(
        dense_dopri5_exponential_decay,
        MethodFamily::ExplicitRk(RkTableau::DormandPrince54),
        exponential_decay_problem::<DenseMatrix>(false)
    );
    bench!(
        dense_tsit5_exponential_decay,
        MethodFamily::ExplicitRk(RkTableau::Tsitouras54),
        exponential_decay_problem::<DenseMatrix>(false)
    );
    bench!(
        dense_bdf_robertson,
        MethodFamily::Bdf,
        robertson_problem::<DenseMatrix>()
    );
    bench!(
        sparse_bdf_robertson,
        MethodFamily::Bdf,
        robertson_problem::<SparseMatrix>()
    );

    macro_rules! bench_heat1d {
        ($name:ident, $matrix:ty, $linear_solver:expr, $($N:expr),+) => {
            $(c.bench_function(concat!(stringify!($name), "_", $N), |b| {
                let (mut problem, soln) = heat1d_problem::<$matrix>($N);
                problem.config.linear_solver = $linear_solver;
                let t_final = soln.solution_points.last().map_or(1.0, |p| p.t);
                b.iter(|| {
                    let mut solver = problem.bdf().unwrap();
                    solver.solve(t_final).unwrap()
                })
            });)+
        };
    }

    bench_heat1d!(dense_bdf_heat1d, DenseMatrix, LinearSolverKind::Direct, 10, 50);
    bench_heat1d!(band_bdf_heat1d, BandMatrix, LinearSolverKind::Direct, 10, 50, 200);
    bench_heat1d!(sparse_bdf_heat1d, SparseMatrix, LinearSolverKind::Direct, 10, 50, 200);
    bench_heat1d!(gmres_bdf_heat1d, BandMatrix, LinearSolverKind::Gmres, 10, 50, 200);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
