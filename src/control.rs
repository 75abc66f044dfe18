//! Discrete-time linear-quadratic regulator
//!
//! The system is `x_{t+1} = A x_t + B u_t` with stage cost `xᵀQx + uᵀRu`.
//! [`dlqr`] solves the discrete algebraic Riccati equation and returns the
//! optimal feedback `u = -K x`, which the learned agents are measured against.

use nalgebra::{Complex, DMatrix};
use ndarray::{Array1, Array2, ArrayView1};
use serde::Serialize;

use crate::error::{LqrError, Result};

const RICCATI_TOLERANCE: f64 = 1e-12;
const RICCATI_MAX_ITERATIONS: usize = 10_000;

/// Linear dynamics together with the quadratic cost weights
#[derive(Clone, Debug, PartialEq)]
pub struct LinearSystem {
    pub a: Array2<f64>,
    pub b: Array2<f64>,
    pub q: Array2<f64>,
    pub r: Array2<f64>,
}

impl LinearSystem {
    pub fn new(a: Array2<f64>, b: Array2<f64>, q: Array2<f64>, r: Array2<f64>) -> Result<Self> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(LqrError::DimensionMismatch(format!(
                "A must be square, got {}x{}",
                n,
                a.ncols()
            )));
        }
        if b.nrows() != n {
            return Err(LqrError::DimensionMismatch(format!(
                "B must have {} rows, got {}",
                n,
                b.nrows()
            )));
        }
        let m = b.ncols();
        if q.dim() != (n, n) {
            return Err(LqrError::DimensionMismatch(format!(
                "Q must be {n}x{n}, got {:?}",
                q.dim()
            )));
        }
        if r.dim() != (m, m) {
            return Err(LqrError::DimensionMismatch(format!(
                "R must be {m}x{m}, got {:?}",
                r.dim()
            )));
        }
        if n == 0 || m == 0 {
            return Err(LqrError::DimensionMismatch(
                "state and action dimensions must be positive".to_string(),
            ));
        }

        Ok(Self { a, b, q, r })
    }

    /// One-dimensional system with scalar coefficients
    pub fn scalar(a: f64, b: f64, q: f64, r: f64) -> Self {
        Self {
            a: Array2::from_elem((1, 1), a),
            b: Array2::from_elem((1, 1), b),
            q: Array2::from_elem((1, 1), q),
            r: Array2::from_elem((1, 1), r),
        }
    }

    pub fn state_dim(&self) -> usize {
        self.a.nrows()
    }

    pub fn action_dim(&self) -> usize {
        self.b.ncols()
    }

    /// `A x + B u`
    pub fn step(&self, x: ArrayView1<f64>, u: ArrayView1<f64>) -> Array1<f64> {
        self.a.dot(&x) + self.b.dot(&u)
    }

    /// `xᵀQx + uᵀRu`
    pub fn stage_cost(&self, x: ArrayView1<f64>, u: ArrayView1<f64>) -> f64 {
        x.dot(&self.q.dot(&x)) + u.dot(&self.r.dot(&u))
    }

    fn check_state(&self, x: ArrayView1<f64>) -> Result<()> {
        if x.len() != self.state_dim() {
            return Err(LqrError::DimensionMismatch(format!(
                "state has length {}, system expects {}",
                x.len(),
                self.state_dim()
            )));
        }
        Ok(())
    }
}

/// Optimal infinite-horizon controller
#[derive(Clone, Debug)]
pub struct LqrSolution {
    /// Feedback gain K (m×n), control law `u = -K x`
    pub gain: Array2<f64>,
    /// Solution P of the Riccati equation (n×n), optimal cost `x0ᵀ P x0`
    pub cost_to_go: Array2<f64>,
    /// Eigenvalues of `A - B K`
    pub closed_loop_eigenvalues: Vec<Complex<f64>>,
}

impl LqrSolution {
    /// `-K x`
    pub fn control(&self, x: ArrayView1<f64>) -> Array1<f64> {
        -self.gain.dot(&x)
    }

    pub fn is_stabilizing(&self) -> bool {
        self.closed_loop_eigenvalues.iter().all(|ev| ev.norm() < 1.0)
    }
}

/// State/action pairs of a closed-loop rollout, `actions[t]` applied in `states[t]`
#[derive(Clone, Debug, Default, Serialize)]
pub struct Trajectory {
    pub states: Vec<Vec<f64>>,
    pub actions: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Undiscounted sum of stage costs along the rollout
    pub fn total_cost(&self, system: &LinearSystem) -> f64 {
        self.states
            .iter()
            .zip(&self.actions)
            .map(|(x, u)| {
                system.stage_cost(ArrayView1::from(x.as_slice()), ArrayView1::from(u.as_slice()))
            })
            .sum()
    }
}

fn to_dmatrix(array: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(array.nrows(), array.ncols(), |i, j| array[[i, j]])
}

fn to_array2(matrix: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((matrix.nrows(), matrix.ncols()), |(i, j)| matrix[(i, j)])
}

/// Solve the discrete algebraic Riccati equation
///
/// Iterates `P ← Q + AᵀPA − AᵀPB (R + BᵀPB)⁻¹ BᵀPA` from `P = Q` until the
/// largest entry change falls below a relative tolerance.
pub fn dlqr(system: &LinearSystem) -> Result<LqrSolution> {
    let a = to_dmatrix(&system.a);
    let b = to_dmatrix(&system.b);
    let q = to_dmatrix(&system.q);
    let r = to_dmatrix(&system.r);

    let at = a.transpose();
    let bt = b.transpose();

    let gain_for = |p: &DMatrix<f64>| -> Result<DMatrix<f64>> {
        let s = &r + &bt * p * &b;
        let s_inv = s.try_inverse().ok_or_else(|| {
            LqrError::Singular("R + BᵀPB is not invertible".to_string())
        })?;
        Ok(s_inv * &bt * p * &a)
    };

    let mut p = q.clone();
    let mut residual = f64::INFINITY;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < RICCATI_MAX_ITERATIONS {
        iterations += 1;
        let k = gain_for(&p)?;
        let next = &q + &at * &p * &a - &at * &p * &b * &k;

        residual = (&next - &p).amax();
        let scale = 1.0 + next.amax();
        p = next;

        if !residual.is_finite() {
            break;
        }
        if residual <= RICCATI_TOLERANCE * scale {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(LqrError::RiccatiDivergence {
            iterations,
            residual,
        });
    }

    let k = gain_for(&p)?;
    let closed_loop = &a - &b * &k;
    let closed_loop_eigenvalues = closed_loop.complex_eigenvalues().iter().copied().collect();

    Ok(LqrSolution {
        gain: to_array2(&k),
        cost_to_go: to_array2(&p),
        closed_loop_eigenvalues,
    })
}

/// Roll out the linear feedback `u = -K x` for `horizon` steps
pub fn simulate_discrete(
    system: &LinearSystem,
    gain: &Array2<f64>,
    x0: ArrayView1<f64>,
    horizon: usize,
) -> Result<Trajectory> {
    system.check_state(x0)?;
    if gain.dim() != (system.action_dim(), system.state_dim()) {
        return Err(LqrError::DimensionMismatch(format!(
            "gain must be {}x{}, got {:?}",
            system.action_dim(),
            system.state_dim(),
            gain.dim()
        )));
    }

    let mut trajectory = Trajectory::default();
    let mut x = x0.to_owned();
    for _ in 0..horizon {
        let u = -gain.dot(&x);
        let next = system.step(x.view(), u.view());
        trajectory.states.push(x.to_vec());
        trajectory.actions.push(u.to_vec());
        x = next;
    }

    Ok(trajectory)
}

/// Discounted finite-horizon cost of following `u = -K x` from each state
pub fn true_loss(
    system: &LinearSystem,
    gain: &Array2<f64>,
    states: &[Array1<f64>],
    horizon: usize,
    gamma: f64,
) -> Result<Vec<f64>> {
    states
        .iter()
        .map(|x0| {
            let trajectory = simulate_discrete(system, gain, x0.view(), horizon)?;
            let mut discount = 1.0;
            let mut total = 0.0;
            for (x, u) in trajectory.states.iter().zip(&trajectory.actions) {
                total += discount
                    * system.stage_cost(ArrayView1::from(x.as_slice()), ArrayView1::from(u.as_slice()));
                discount *= gamma;
            }
            Ok(total)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;

    #[test]
    fn scalar_riccati_solution_is_golden_ratio() {
        let system = LinearSystem::scalar(1.0, 1.0, 1.0, 1.0);
        let lqr = dlqr(&system).unwrap();

        assert!((lqr.cost_to_go[[0, 0]] - GOLDEN_RATIO).abs() < 1e-9);
        assert!((lqr.gain[[0, 0]] - (GOLDEN_RATIO - 1.0)).abs() < 1e-9);
        assert!((lqr.closed_loop_eigenvalues[0].re - (2.0 - GOLDEN_RATIO)).abs() < 1e-9);
        assert!(lqr.is_stabilizing());
    }

    #[test]
    fn double_integrator_satisfies_riccati_equation() {
        let system = LinearSystem::new(
            arr2(&[[1.0, 1.0], [0.0, 1.0]]),
            arr2(&[[0.0], [1.0]]),
            Array2::eye(2),
            arr2(&[[1.0]]),
        )
        .unwrap();
        let lqr = dlqr(&system).unwrap();
        let p = &lqr.cost_to_go;
        let (a, b, q, r) = (&system.a, &system.b, &system.q, &system.r);

        let s = r + &b.t().dot(p).dot(b);
        let bpa = b.t().dot(p).dot(a);
        let correction = a.t().dot(p).dot(b).dot(&bpa) / s[[0, 0]];
        let rhs = q + &a.t().dot(p).dot(a) - &correction;

        for (lhs, rhs) in p.iter().zip(rhs.iter()) {
            assert!((lhs - rhs).abs() < 1e-8);
        }
        assert!((p[[0, 1]] - p[[1, 0]]).abs() < 1e-9);
        assert!(lqr.is_stabilizing());
    }

    #[test]
    fn uncontrollable_unstable_plant_diverges() {
        // B = 0 with |A| > 1: P grows by a factor of four each iteration
        let system = LinearSystem::scalar(2.0, 0.0, 1.0, 1.0);
        match dlqr(&system) {
            Err(LqrError::RiccatiDivergence {
                iterations,
                residual,
            }) => {
                assert!(iterations > 1 && iterations < RICCATI_MAX_ITERATIONS);
                assert!(!residual.is_finite());
            }
            other => panic!("expected RiccatiDivergence, got {other:?}"),
        }
    }

    #[test]
    fn zero_control_weight_without_input_is_singular() {
        let system = LinearSystem::scalar(1.0, 0.0, 1.0, 0.0);
        assert!(matches!(dlqr(&system), Err(LqrError::Singular(_))));
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let err = LinearSystem::new(
            Array2::eye(2),
            arr2(&[[1.0]]),
            Array2::eye(2),
            arr2(&[[1.0]]),
        )
        .unwrap_err();
        assert!(matches!(err, LqrError::DimensionMismatch(_)));
    }

    #[test]
    fn closed_loop_rollout_decays() {
        let system = LinearSystem::scalar(1.0, 1.0, 1.0, 1.0);
        let lqr = dlqr(&system).unwrap();
        let trajectory = simulate_discrete(&system, &lqr.gain, arr1(&[2.0]).view(), 20).unwrap();

        assert_eq!(trajectory.len(), 20);
        assert_eq!(trajectory.states[0], vec![2.0]);
        assert!((trajectory.actions[0][0] + 2.0 * lqr.gain[[0, 0]]).abs() < 1e-12);
        assert!(trajectory.states[19][0].abs() < 1e-6);
    }

    #[test]
    fn true_loss_matches_cost_to_go_for_long_horizon() {
        let system = LinearSystem::scalar(1.0, 1.0, 1.0, 1.0);
        let lqr = dlqr(&system).unwrap();
        let states = vec![arr1(&[0.0]), arr1(&[1.0]), arr1(&[-3.0])];
        let losses = true_loss(&system, &lqr.gain, &states, 200, 1.0).unwrap();

        assert_eq!(losses[0], 0.0);
        assert!((losses[1] - GOLDEN_RATIO).abs() < 1e-6);
        assert!((losses[2] - 9.0 * GOLDEN_RATIO).abs() < 1e-5);
    }

    #[test]
    fn discounting_lowers_the_loss() {
        let system = LinearSystem::scalar(1.0, 1.0, 1.0, 1.0);
        let lqr = dlqr(&system).unwrap();
        let states = vec![arr1(&[1.0])];
        let undiscounted = true_loss(&system, &lqr.gain, &states, 50, 1.0).unwrap()[0];
        let discounted = true_loss(&system, &lqr.gain, &states, 50, 0.5).unwrap()[0];
        assert!(discounted < undiscounted);
    }
}
