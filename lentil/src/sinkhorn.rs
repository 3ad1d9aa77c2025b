//! Entropic optimal transport between two discrete distributions.
//!
//! Given a cost `C` (n x m) and marginals `p`, `q`, find the coupling
//! `T >= 0` with `T 1 = p`, `T' 1 = q` minimizing
//! `<T, C> - ε H(T)` by alternating marginal projections.

use crate::data::Distribution;
use crate::error::ReconstructionError;

use clap::ValueEnum;
use log::debug;
use ndarray::prelude::*;
use ndarray::Zip;

/// How the Sinkhorn updates are carried out
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum SinkhornMethod {
    /// potentials updated by log-sum-exp; stable for small ε
    LogDomain,
    /// classic Sinkhorn-Knopp scaling of the kernel `exp(-C/ε)`
    Scaling,
}

/// An entropic OT solver as seen by the Gromov-Wasserstein loop
pub trait EntropicTransport {
    /// The regularized coupling (n x m) for `cost` between `p` and `q`
    fn transport(
        &self,
        p: &Distribution,
        q: &Distribution,
        cost: &Array2<f64>,
    ) -> anyhow::Result<Array2<f64>>;
}

/// Inner-solver settings shared by every outer Gromov-Wasserstein step;
/// ε itself belongs to the outer configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinkhornConfig {
    pub method: SinkhornMethod,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for SinkhornConfig {
    fn default() -> Self {
        Self {
            method: SinkhornMethod::LogDomain,
            max_iter: 1000,
            tol: 1e-9,
        }
    }
}

impl SinkhornConfig {
    pub fn with_epsilon(&self, epsilon: f64) -> Sinkhorn {
        Sinkhorn {
            epsilon,
            method: self.method,
            max_iter: self.max_iter,
            tol: self.tol,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sinkhorn {
    /// entropic regularization ε
    pub epsilon: f64,
    pub method: SinkhornMethod,
    /// cap on the number of projection sweeps
    pub max_iter: usize,
    /// stop when the row marginal error falls below this
    pub tol: f64,
}

impl Default for Sinkhorn {
    fn default() -> Self {
        SinkhornConfig::default().with_epsilon(5e-4)
    }
}

const CHECK_EVERY: usize = 10;
const WARM_SWEEPS: usize = 10;

impl EntropicTransport for Sinkhorn {
    fn transport(
        &self,
        p: &Distribution,
        q: &Distribution,
        cost: &Array2<f64>,
    ) -> anyhow::Result<Array2<f64>> {
        if cost.dim() != (p.len(), q.len()) {
            return Err(ReconstructionError::shape(
                "transport cost",
                format!("{} x {}", p.len(), q.len()),
                format!("{} x {}", cost.nrows(), cost.ncols()),
            )
            .into());
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ReconstructionError::InvalidParameter(format!(
                "entropic regularization must be positive, got {}",
                self.epsilon
            ))
            .into());
        }
        if cost.iter().any(|c| !c.is_finite()) {
            return Err(ReconstructionError::NumericalInstability(
                "non-finite transport cost".into(),
            )
            .into());
        }

        match self.method {
            SinkhornMethod::LogDomain => self.log_domain(p.weights(), q.weights(), cost),
            SinkhornMethod::Scaling => self.scaling(p.weights(), q.weights(), cost),
        }
    }
}

impl Sinkhorn {
    /// Log-domain sweeps with ε-scaling: the potentials are first solved
    /// for a large ε (the cost scale) and carried over while ε is halved
    /// down to the target, where the sweeps run to `tol` or `max_iter`.
    fn log_domain(
        &self,
        p: &Array1<f64>,
        q: &Array1<f64>,
        cost: &Array2<f64>,
    ) -> anyhow::Result<Array2<f64>> {
        let cost_t = cost.t().as_standard_layout().into_owned();
        let log_p = p.mapv(f64::ln);
        let log_q = q.mapv(f64::ln);

        // dual potentials in cost units
        let mut ff = Array1::<f64>::zeros(p.len());
        let mut gg = Array1::<f64>::zeros(q.len());

        let cost_scale = cost.fold(0_f64, |a, &b| a.max(b.abs()));
        let mut eps = cost_scale.max(self.epsilon);
        let mut sweeps = 0;
        let mut err = f64::INFINITY;

        loop {
            let last_stage = eps <= self.epsilon;
            let budget = if last_stage { self.max_iter } else { WARM_SWEEPS };

            for iter in 1..=budget {
                Zip::from(&mut ff)
                    .and(cost.rows())
                    .and(&log_p)
                    .par_for_each(|f, c_i, &lp| *f = eps * (lp - log_sum_exp(&c_i, &gg, eps)));
                Zip::from(&mut gg)
                    .and(cost_t.rows())
                    .and(&log_q)
                    .par_for_each(|g, c_j, &lq| *g = eps * (lq - log_sum_exp(&c_j, &ff, eps)));
                sweeps += 1;

                if last_stage && (iter % CHECK_EVERY == 0 || iter == budget) {
                    check_potentials(&ff, &gg)?;
                    err = row_marginal_error(cost, &ff, &gg, eps, p);
                    if err < self.tol {
                        break;
                    }
                }
            }
            check_potentials(&ff, &gg)?;
            if last_stage {
                break;
            }
            eps = (eps * 0.5).max(self.epsilon);
        }
        debug!(
            "log-domain sinkhorn: {} sweeps, marginal error {:.3e}",
            sweeps, err
        );

        let mut plan = cost.clone();
        for ((i, j), t_ij) in plan.indexed_iter_mut() {
            *t_ij = ((ff[i] + gg[j] - *t_ij) / eps).exp();
        }
        check_plan(&plan)?;
        Ok(round_to_marginals(plan, p, q))
    }

    fn scaling(
        &self,
        p: &Array1<f64>,
        q: &Array1<f64>,
        cost: &Array2<f64>,
    ) -> anyhow::Result<Array2<f64>> {
        let kernel = cost.mapv(|c| (-c / self.epsilon).exp());

        let mut u = Array1::<f64>::ones(p.len());
        let mut v = Array1::<f64>::ones(q.len());

        let mut iter = 0;
        while iter < self.max_iter {
            let kv = kernel.dot(&v);
            u = scale_ratio(p, &kv, "row")?;
            let ktu = kernel.t().dot(&u);
            v = scale_ratio(q, &ktu, "column")?;
            iter += 1;

            if iter % CHECK_EVERY == 0 {
                let row_sums = &u * &kernel.dot(&v);
                let err = (&row_sums - p).mapv(f64::abs).fold(0_f64, |a, &b| a.max(b));
                if err < self.tol {
                    break;
                }
            }
        }
        debug!("sinkhorn scaling: {} sweeps", iter);

        let plan = &u.insert_axis(Axis(1)) * &kernel * &v.insert_axis(Axis(0));
        check_plan(&plan)?;
        Ok(round_to_marginals(plan, p, q))
    }
}

/// Move an approximate plan onto the transport polytope: shrink rows
/// above `p`, then columns above `q`, then hand the missing mass out
/// in proportion to the row and column deficits.
pub fn round_to_marginals(mut plan: Array2<f64>, p: &Array1<f64>, q: &Array1<f64>) -> Array2<f64> {
    for (mut row, &p_i) in plan.rows_mut().into_iter().zip(p.iter()) {
        let s = row.sum();
        if s > p_i {
            row *= p_i / s;
        }
    }
    for (mut col, &q_j) in plan.columns_mut().into_iter().zip(q.iter()) {
        let s = col.sum();
        if s > q_j {
            col *= q_j / s;
        }
    }
    let row_deficit = (p - &plan.sum_axis(Axis(1))).mapv(|x| x.max(0.0));
    let col_deficit = (q - &plan.sum_axis(Axis(0))).mapv(|x| x.max(0.0));
    let missing = row_deficit.sum();
    if missing > 0.0 {
        let fill = &row_deficit.insert_axis(Axis(1)) * &col_deficit.insert_axis(Axis(0)) / missing;
        plan += &fill;
    }
    plan
}

/// `log Σ_j exp((g_j - c_j) / ε)`, stable against overflow
fn log_sum_exp(c: &ArrayView1<f64>, g: &Array1<f64>, eps: f64) -> f64 {
    let max = c
        .iter()
        .zip(g.iter())
        .map(|(c, g)| (g - c) / eps)
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max.is_nan() {
        return max;
    }
    let sum: f64 = c
        .iter()
        .zip(g.iter())
        .map(|(c, g)| ((g - c) / eps - max).exp())
        .sum();
    max + sum.ln()
}

fn row_marginal_error(
    cost: &Array2<f64>,
    ff: &Array1<f64>,
    gg: &Array1<f64>,
    eps: f64,
    p: &Array1<f64>,
) -> f64 {
    cost.rows()
        .into_iter()
        .enumerate()
        .map(|(i, c_i)| {
            let row: f64 = c_i
                .iter()
                .zip(gg.iter())
                .map(|(c, g)| ((ff[i] + g - c) / eps).exp())
                .sum();
            (row - p[i]).abs()
        })
        .fold(0_f64, f64::max)
}

/// `-∞` is a legitimate potential for a zero-weight point; NaN and `+∞` are not
fn check_potentials(ff: &Array1<f64>, gg: &Array1<f64>) -> anyhow::Result<()> {
    let bad = |x: &f64| x.is_nan() || *x == f64::INFINITY;
    if ff.iter().any(bad) || gg.iter().any(bad) {
        return Err(ReconstructionError::NumericalInstability(
            "sinkhorn potentials diverged; increase epsilon or rescale the cost".into(),
        )
        .into());
    }
    Ok(())
}

fn scale_ratio(weights: &Array1<f64>, denom: &Array1<f64>, side: &str) -> anyhow::Result<Array1<f64>> {
    let mut out = Array1::<f64>::zeros(weights.len());
    for (i, (&w, &d)) in weights.iter().zip(denom.iter()).enumerate() {
        if w == 0.0 {
            continue;
        }
        let r = w / d;
        if !r.is_finite() {
            return Err(ReconstructionError::NumericalInstability(format!(
                "kernel {} sum {} underflowed (ratio {}); epsilon is too small for this cost",
                side, i, r
            ))
            .into());
        }
        out[i] = r;
    }
    Ok(out)
}

fn check_plan(plan: &Array2<f64>) -> anyhow::Result<()> {
    if plan.iter().any(|x| !x.is_finite()) {
        return Err(ReconstructionError::NumericalInstability(
            "non-finite transport plan".into(),
        )
        .into());
    }
    Ok(())
}
