//! Adjusted (fused) Gromov-Wasserstein coupling between expression
//! space and physical space.
//!
//! Each outer step linearizes the quadratic GW cost around the current
//! coupling `T`, adds the α-weighted marker cost and solves the resulting
//! entropic transport problem:
//!
//! ```text
//! Ĉ = α C_lin + (1 - α) 4 (f1(C1) p 1' + 1 q' f2(C2)' - h1(C1) T h2(C2)')
//! T ← Sinkhorn(p, q, Ĉ, ε)
//! ```

use crate::data::{CostMatrix, Coupling, Distribution};
use crate::error::ReconstructionError;
use crate::sinkhorn::{EntropicTransport, SinkhornConfig};

use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info, warn};
use ndarray::prelude::*;

/// Pairwise discrepancy between an intra-expression and an
/// intra-location distance
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "kebab-case")]
pub enum GwLoss {
    /// `(a - b)^2`
    SquareLoss,
    /// `a log(a/b) - a + b`
    KlLoss,
}

const KL_FLOOR: f64 = 1e-15;

impl GwLoss {
    fn f1(&self, a: f64) -> f64 {
        match self {
            GwLoss::SquareLoss => a * a,
            GwLoss::KlLoss if a > 0.0 => a * a.ln() - a,
            GwLoss::KlLoss => 0.0,
        }
    }

    fn f2(&self, b: f64) -> f64 {
        match self {
            GwLoss::SquareLoss => b * b,
            GwLoss::KlLoss => b,
        }
    }

    fn h1(&self, a: f64) -> f64 {
        a
    }

    fn h2(&self, b: f64) -> f64 {
        match self {
            GwLoss::SquareLoss => 2.0 * b,
            GwLoss::KlLoss => (b + KL_FLOOR).ln(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GwConfig {
    /// weight of the marker (linear) term, in [0, 1]
    pub alpha: f64,
    /// entropic regularization of every inner transport
    pub epsilon: f64,
    /// stop once the Frobenius change of the coupling falls below this
    pub tol: f64,
    pub max_iter: usize,
    pub loss: GwLoss,
    pub sinkhorn: SinkhornConfig,
    pub show_progress: bool,
}

impl Default for GwConfig {
    fn default() -> Self {
        Self {
            alpha: 0.0,
            epsilon: 5e-4,
            tol: 1e-9,
            max_iter: 1000,
            loss: GwLoss::SquareLoss,
            sinkhorn: SinkhornConfig::default(),
            show_progress: false,
        }
    }
}

/// The coupling and how the outer loop got there
#[derive(Debug, Clone)]
pub struct GwSolution {
    pub coupling: Coupling,
    /// `false` when `max_iter` ran out before the change fell below `tol`;
    /// the last iterate is still returned
    pub converged: bool,
    pub iterations: usize,
    /// Frobenius norm of the last coupling update
    pub last_change: f64,
    /// GW objective of the initial coupling followed by every iterate
    pub objective_history: Vec<f64>,
}

impl GwSolution {
    pub fn objective(&self) -> Option<f64> {
        self.objective_history.last().copied()
    }
}

pub struct AdjustedGwSolver {
    config: GwConfig,
}

impl AdjustedGwSolver {
    pub fn new(config: GwConfig) -> anyhow::Result<Self> {
        if !(0.0..=1.0).contains(&config.alpha) {
            return Err(ReconstructionError::InvalidParameter(format!(
                "alpha must lie in [0, 1], got {}",
                config.alpha
            ))
            .into());
        }
        if !(config.epsilon.is_finite() && config.epsilon > 0.0) {
            return Err(ReconstructionError::InvalidParameter(format!(
                "epsilon must be positive, got {}",
                config.epsilon
            ))
            .into());
        }
        if config.tol.is_nan() || config.tol < 0.0 || config.max_iter == 0 {
            return Err(ReconstructionError::InvalidParameter(format!(
                "need tol >= 0 and max_iter > 0, got tol {} and max_iter {}",
                config.tol, config.max_iter
            ))
            .into());
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &GwConfig {
        &self.config
    }

    /// Couple `N` cells (cost `c1`, weights `p`) with `M` locations
    /// (cost `c2`, weights `q`). `c_lin` is the N x M marker cost; without
    /// one the linear term is zero.
    pub fn solve(
        &self,
        c1: &CostMatrix,
        c2: &CostMatrix,
        c_lin: Option<&CostMatrix>,
        p: &Distribution,
        q: &Distribution,
    ) -> anyhow::Result<GwSolution> {
        let transport = self.config.sinkhorn.with_epsilon(self.config.epsilon);
        self.solve_with(&transport, c1, c2, c_lin, p, q)
    }

    /// Same as [`Self::solve`] with a caller-supplied inner solver
    pub fn solve_with<S: EntropicTransport>(
        &self,
        transport: &S,
        c1: &CostMatrix,
        c2: &CostMatrix,
        c_lin: Option<&CostMatrix>,
        p: &Distribution,
        q: &Distribution,
    ) -> anyhow::Result<GwSolution> {
        let (nn, mm) = (p.len(), q.len());
        check_dims("expression cost", c1, nn, nn)?;
        check_dims("location cost", c2, mm, mm)?;
        if let Some(c_lin) = c_lin {
            check_dims("marker cost", c_lin, nn, mm)?;
        }

        let alpha = self.config.alpha;
        let loss = self.config.loss;

        let c1 = normalize_by_max(c1.values());
        let c2 = normalize_by_max(c2.values());
        let c_lin = match c_lin {
            Some(c) => normalize_by_max(c.values()),
            None => {
                if alpha > 0.0 {
                    warn!("alpha = {} without a marker cost; the linear term is zero", alpha);
                }
                Array2::zeros((nn, mm))
            }
        };

        let linearized = Linearized::new(&c1, &c2, p, q, loss);

        if alpha >= 1.0 {
            info!("alpha = 1: single transport on the marker cost");
            let plan = transport.transport(p, q, &c_lin)?;
            let objective = linearized.objective(&plan);
            return Ok(GwSolution {
                coupling: Coupling::from_values(plan),
                converged: true,
                iterations: 1,
                last_change: 0.0,
                objective_history: vec![objective],
            });
        }

        let mut plan = outer(p.weights(), q.weights());
        let mut objective_history = vec![linearized.objective(&plan)];
        let mut converged = false;
        let mut last_change = f64::INFINITY;
        let mut iterations = 0;

        let pb = ProgressBar::new(self.config.max_iter as u64);
        if !self.config.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        while iterations < self.config.max_iter {
            let mut grad = linearized.tensor(&plan);
            grad *= 4.0 * (1.0 - alpha);
            if alpha > 0.0 {
                grad.scaled_add(alpha, &c_lin);
            }

            let next = transport.transport(p, q, &grad)?;
            last_change = (&next - &plan).mapv(|x| x * x).sum().sqrt();
            plan = next;
            iterations += 1;

            let objective = linearized.objective(&plan);
            objective_history.push(objective);
            debug!(
                "[{}] change {:.3e}, objective {:.6e}",
                iterations, last_change, objective
            );
            pb.inc(1);

            if last_change < self.config.tol {
                converged = true;
                break;
            }
        }
        pb.finish_and_clear();

        if converged {
            info!(
                "coupling converged after {} iterations (change {:.3e})",
                iterations, last_change
            );
        } else {
            warn!(
                "coupling did not converge in {} iterations (change {:.3e} > tol {:.1e})",
                iterations, last_change, self.config.tol
            );
        }

        Ok(GwSolution {
            coupling: Coupling::from_values(plan),
            converged,
            iterations,
            last_change,
            objective_history,
        })
    }
}

/// The pieces of the GW tensor that do not depend on the coupling
struct Linearized {
    /// `f1(C1) p 1' + 1 q' f2(C2)'` (N x M)
    constant: Array2<f64>,
    h1: Array2<f64>,
    h2_t: Array2<f64>,
}

impl Linearized {
    fn new(
        c1: &Array2<f64>,
        c2: &Array2<f64>,
        p: &Distribution,
        q: &Distribution,
        loss: GwLoss,
    ) -> Self {
        let row_part = c1.mapv(|a| loss.f1(a)).dot(p.weights());
        let col_part = c2.mapv(|b| loss.f2(b)).dot(q.weights());
        let constant = &row_part.insert_axis(Axis(1)) + &col_part.insert_axis(Axis(0));
        Self {
            constant,
            h1: c1.mapv(|a| loss.h1(a)),
            h2_t: c2.mapv(|b| loss.h2(b)).reversed_axes(),
        }
    }

    /// `L(C1, C2) ⊗ T`
    fn tensor(&self, plan: &Array2<f64>) -> Array2<f64> {
        &self.constant - &self.h1.dot(plan).dot(&self.h2_t)
    }

    /// `<L(C1, C2) ⊗ T, T>`
    fn objective(&self, plan: &Array2<f64>) -> f64 {
        (&self.tensor(plan) * plan).sum()
    }
}

fn check_dims(what: &str, cost: &CostMatrix, rows: usize, cols: usize) -> anyhow::Result<()> {
    if cost.nrows() != rows || cost.ncols() != cols {
        return Err(ReconstructionError::shape(
            what,
            format!("{} x {}", rows, cols),
            format!("{} x {}", cost.nrows(), cost.ncols()),
        )
        .into());
    }
    Ok(())
}

fn normalize_by_max(cost: &Array2<f64>) -> Array2<f64> {
    let max = cost.fold(0_f64, |a, &b| a.max(b));
    if max > 0.0 {
        cost / max
    } else {
        cost.clone()
    }
}

fn outer(p: &Array1<f64>, q: &Array1<f64>) -> Array2<f64> {
    &p.view().insert_axis(Axis(1)) * &q.view().insert_axis(Axis(0))
}
