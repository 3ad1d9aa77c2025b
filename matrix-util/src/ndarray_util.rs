pub use ndarray::prelude::*;
pub use rayon::prelude::*;

use crate::traits::*;

impl DistanceOps for Array2<f64> {
    type Scalar = f64;
    type Mat = Self;

    fn pairwise_euclidean_rows(&self) -> Self::Mat {
        let nn = self.nrows();
        let mut dist = Array2::<f64>::zeros((nn, nn));
        for i in 0..nn {
            for j in (i + 1)..nn {
                let d_ij = euclidean(self.row(i), self.row(j));
                dist[(i, j)] = d_ij;
                dist[(j, i)] = d_ij;
            }
        }
        dist
    }

    fn cross_euclidean_rows(&self, other: &Self::Mat) -> anyhow::Result<Self::Mat> {
        if self.ncols() != other.ncols() {
            return Err(anyhow::anyhow!(
                "rows of different dimensions: {} vs {}",
                self.ncols(),
                other.ncols()
            ));
        }
        let mut dist = Array2::<f64>::zeros((self.nrows(), other.nrows()));
        dist.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut d_i)| {
                for (j, y_j) in other.rows().into_iter().enumerate() {
                    d_i[j] = euclidean(self.row(i), y_j);
                }
            });
        Ok(dist)
    }

    fn pairwise_correlation_distance_rows(&self) -> Self::Mat {
        let nn = self.nrows();
        let dd = self.ncols() as f64;

        // standardize each row once; constant rows become zero vectors
        let mut zz = self.clone();
        for mut z_i in zz.rows_mut() {
            let mu = z_i.sum() / dd.max(1.0);
            z_i.mapv_inplace(|x| x - mu);
            let norm = z_i.dot(&z_i).sqrt();
            if norm > 0.0 {
                z_i.mapv_inplace(|x| x / norm);
            }
        }

        let mut dist = Array2::<f64>::zeros((nn, nn));
        for i in 0..nn {
            for j in (i + 1)..nn {
                let rho = zz.row(i).dot(&zz.row(j)).clamp(-1.0, 1.0);
                let d_ij = 1.0 - rho;
                dist[(i, j)] = d_ij;
                dist[(j, i)] = d_ij;
            }
        }
        dist
    }
}

impl MatOps for Array2<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn scale_columns_by_max(&self) -> Self::Mat {
        let mut xx = self.clone();
        xx.scale_columns_by_max_inplace();
        xx
    }

    fn scale_columns_by_max_inplace(&mut self) {
        for mut x_j in self.columns_mut() {
            let denom = x_j.fold(0_f64, |acc, &x| acc.max(x));
            if denom > 0.0 {
                x_j.mapv_inplace(|x| x / denom);
            }
        }
    }

    fn max_finite(&self) -> Option<Self::Scalar> {
        self.iter()
            .copied()
            .filter(|x| x.is_finite())
            .fold(None, |acc, x| Some(acc.map_or(x, |m: f64| m.max(x))))
    }
}

/// Euclidean distance between two vectors of the same length
pub fn euclidean(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    x.iter()
        .zip(y.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt()
}

/// Pearson correlation between two vectors; `None` if either has no variance
pub fn pearson(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Option<f64> {
    let nn = x.len();
    if nn < 2 || nn != y.len() {
        return None;
    }
    let mx = x.sum() / nn as f64;
    let my = y.sum() / nn as f64;

    let (mut sxy, mut sxx, mut syy) = (0_f64, 0_f64, 0_f64);
    for (a, b) in x.iter().zip(y.iter()) {
        let (da, db) = (a - mx, b - my);
        sxy += da * db;
        sxx += da * da;
        syy += db * db;
    }

    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn euclidean_rows_symmetric_zero_diagonal() {
        let xx = array![[0.0, 0.0], [3.0, 4.0], [6.0, 8.0]];
        let dd = xx.pairwise_euclidean_rows();
        assert_abs_diff_eq!(dd[(0, 1)], 5.0);
        assert_abs_diff_eq!(dd[(0, 2)], 10.0);
        for i in 0..3 {
            assert_eq!(dd[(i, i)], 0.0);
            for j in 0..3 {
                assert_eq!(dd[(i, j)], dd[(j, i)]);
            }
        }
    }

    #[test]
    fn cross_rows_match_pairwise() {
        let xx = array![[1.0, 2.0, 3.0], [0.5, 0.0, 1.0], [2.0, 2.0, 2.0]];
        let cross = xx.cross_euclidean_rows(&xx).unwrap();
        assert_abs_diff_eq!(cross, xx.pairwise_euclidean_rows(), epsilon = 1e-12);

        let bad = Array2::<f64>::zeros((2, 2));
        assert!(xx.cross_euclidean_rows(&bad).is_err());
    }

    #[test]
    fn correlation_distance_range() {
        let xx = array![[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [3.0, 2.0, 1.0], [1.0, 1.0, 1.0]];
        let dd = xx.pairwise_correlation_distance_rows();
        assert_abs_diff_eq!(dd[(0, 1)], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dd[(0, 2)], 2.0, epsilon = 1e-12);
        // a constant row is uncorrelated with everything
        assert_abs_diff_eq!(dd[(0, 3)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn columns_scaled_by_own_max() {
        let xx = array![[1.0, 0.0, 10.0], [2.0, 0.0, 5.0]];
        let yy = xx.scale_columns_by_max();
        assert_abs_diff_eq!(yy, array![[0.5, 0.0, 1.0], [1.0, 0.0, 0.5]]);
        assert_eq!(xx.max_finite(), Some(10.0));
    }

    #[test]
    fn pearson_basic() {
        let x = array![1.0, 2.0, 3.0, 4.0];
        let y = array![2.0, 4.0, 6.0, 8.0];
        let z = array![1.0, 1.0, 1.0, 1.0];
        assert_abs_diff_eq!(pearson(x.view(), y.view()).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            pearson(x.view(), y.mapv(|v| -v).view()).unwrap(),
            -1.0,
            epsilon = 1e-12
        );
        assert!(pearson(x.view(), z.view()).is_none());
    }
}
