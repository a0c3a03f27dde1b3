use distmat::comm::Tag;
use distmat::orchestrator::serve;
use distmat::{multiply, DistError, ErrorKind, Matrix, Operation, Problem, Strategy, World};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn sequential(n: usize) -> Matrix {
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| (i * n + j + 1) as f64).collect())
        .collect();
    Matrix::from_rows(&rows).unwrap()
}

fn random_problem(n: usize, operation: Operation, seed: u64) -> Problem {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = Matrix::random(n, n, &mut rng).unwrap();
    match operation {
        Operation::MatVec => {
            let x = Matrix::random(n, 1, &mut rng).unwrap().into_vec();
            Problem::mat_vec(a, x).unwrap()
        }
        Operation::MatMul => Problem::mat_mul(a, Matrix::random(n, n, &mut rng).unwrap()).unwrap(),
    }
}

// ============================================================================
// Concrete scenarios
// ============================================================================

#[test]
fn test_row_matvec_scenario() {
    let problem = Problem::mat_vec(sequential(4), vec![1.0; 4]).unwrap();
    let report = multiply(&problem, Strategy::Row, 2).unwrap();
    assert_eq!(report.result.as_slice(), &[10.0, 26.0, 42.0, 58.0]);
}

#[test]
fn test_block_identity_scenario() {
    let b = sequential(4);
    let problem = Problem::mat_mul(Matrix::identity(4).unwrap(), b.clone()).unwrap();
    let report = multiply(&problem, Strategy::Block, 4).unwrap();
    assert_eq!(report.result, b);
}

#[test]
fn test_indivisible_block_scenario() {
    let problem = Problem::mat_mul(sequential(5), sequential(5)).unwrap();
    let error = multiply(&problem, Strategy::Block, 4).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[test]
fn test_block_matvec_scenario() {
    // each grid row holds a 2x2 block of every row segment; only their sum is y
    let problem = Problem::mat_vec(sequential(4), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let report = multiply(&problem, Strategy::Block, 4).unwrap();
    assert_eq!((report.result.rows(), report.result.cols()), (4, 1));
    assert_eq!(report.result.as_slice(), &[30.0, 70.0, 110.0, 150.0]);
}

#[test]
fn test_column_strategy_sums() {
    // with concatenation instead of summation this would be 4x longer
    let problem = Problem::mat_vec(sequential(4), vec![1.0; 4]).unwrap();
    let report = multiply(&problem, Strategy::Column, 2).unwrap();
    assert_eq!(report.result.rows(), 4);
    assert_eq!(report.result.as_slice(), &[10.0, 26.0, 42.0, 58.0]);
}

// ============================================================================
// Boundaries
// ============================================================================

#[test]
fn test_n_equal_to_workers() {
    for strategy in [Strategy::Row, Strategy::Column] {
        let problem = random_problem(4, Operation::MatVec, 3);
        let report = multiply(&problem, strategy, 4).unwrap();
        assert_eq!(report.result, problem.reference().unwrap(), "{strategy}");
    }
}

#[test]
fn test_single_rank_block() {
    let problem = random_problem(5, Operation::MatMul, 11);
    let report = multiply(&problem, Strategy::Block, 1).unwrap();
    assert_eq!(report.result, problem.reference().unwrap());
}

#[test]
fn test_large_torus() {
    let problem = random_problem(12, Operation::MatMul, 5);
    let report = multiply(&problem, Strategy::Block, 16).unwrap();
    assert_eq!(report.result, problem.reference().unwrap());
    assert_eq!(report.workers, 16);
}

#[test]
fn test_non_square_block_group() {
    let problem = random_problem(6, Operation::MatMul, 1);
    assert!(matches!(
        multiply(&problem, Strategy::Block, 6),
        Err(DistError::NotPerfectSquare { workers: 6, .. })
    ));
}

// ============================================================================
// Failure propagation
// ============================================================================

#[test]
fn test_protocol_mismatch_is_fatal() {
    // the coordinator skips the job header and sends tile data instead
    let outcome = World::new(2).unwrap().run(
        |root| {
            root.communicator()
                .send(1, Tag::ScatterA, distmat::comm::Body::Values(vec![1.0]))?;
            root.communicator().recv_values(1, Tag::Gather, 1)
        },
        serve,
    );
    assert!(matches!(outcome, Err(DistError::Protocol { rank: 1, peer: 0, .. })));
}

// ============================================================================
// Distributed == reference
// ============================================================================

fn strategies() -> Vec<(Strategy, usize)> {
    vec![
        (Strategy::Row, 2),
        (Strategy::Row, 3),
        (Strategy::Column, 2),
        (Strategy::Column, 3),
        (Strategy::Block, 4),
        (Strategy::Block, 9),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn test_distributed_matches_reference(
        blocks in 1usize..=3,
        seed in any::<u64>(),
        matmul in any::<bool>(),
    ) {
        // n = 6 * blocks divides evenly for 2, 3 and 9 ranks
        let n = 6 * blocks;
        let operation = if matmul { Operation::MatMul } else { Operation::MatVec };
        let problem = random_problem(n, operation, seed);
        let expected = problem.reference().unwrap();

        for (strategy, workers) in strategies() {
            let report = multiply(&problem, strategy, workers).unwrap();
            prop_assert!(
                report.result.approx_eq(&expected, 1e-12),
                "{} with {} ranks differs by {}",
                strategy,
                workers,
                report.result.max_abs_diff(&expected)
            );
        }
    }
}
