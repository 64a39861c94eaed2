use crate::types::{CoregError, CoregResult};
use ndarray::{Array1, Array2};

/// Pivots below this fraction of the largest diagonal entry are treated as zero
const RELATIVE_PIVOT_TOLERANCE: f64 = 1e-12;

/// Cholesky factorization `N = L·Lᵗ` of a symmetric positive definite matrix
#[derive(Debug, Clone)]
pub struct Cholesky {
    l: Array2<f64>,
}

impl Cholesky {
    /// Factor `n`, failing with `SingularNormalMatrix` if it is not positive definite
    pub fn factor(n: &Array2<f64>) -> CoregResult<Self> {
        let (rows, cols) = n.dim();
        if rows != cols || rows == 0 {
            return Err(CoregError::SingularNormalMatrix(format!(
                "Cannot factor a {}x{} matrix",
                rows, cols
            )));
        }

        let max_diag = n.diag().iter().cloned().fold(0.0f64, f64::max);
        if !(max_diag.is_finite() && max_diag > 0.0) {
            return Err(CoregError::SingularNormalMatrix(format!(
                "Largest diagonal element is {}",
                max_diag
            )));
        }
        let tolerance = RELATIVE_PIVOT_TOLERANCE * max_diag;

        let mut l = Array2::<f64>::zeros((rows, rows));
        for j in 0..rows {
            let mut diag = n[[j, j]];
            for k in 0..j {
                diag -= l[[j, k]] * l[[j, k]];
            }
            if !(diag > tolerance) {
                return Err(CoregError::SingularNormalMatrix(format!(
                    "Pivot {} is {:.3e} (tolerance {:.3e}), matrix is not positive definite",
                    j, diag, tolerance
                )));
            }
            let ljj = diag.sqrt();
            l[[j, j]] = ljj;

            for i in (j + 1)..rows {
                let mut sum = n[[i, j]];
                for k in 0..j {
                    sum -= l[[i, k]] * l[[j, k]];
                }
                l[[i, j]] = sum / ljj;
            }
        }

        Ok(Self { l })
    }

    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    pub fn lower(&self) -> &Array2<f64> {
        &self.l
    }

    /// Solve `N·x = b`
    pub fn solve(&self, b: &Array1<f64>) -> Array1<f64> {
        let n = self.dim();
        assert_eq!(b.len(), n, "right-hand side length must match the factor");

        // Forward substitution: L·y = b
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let mut sum = b[i];
            for k in 0..i {
                sum -= self.l[[i, k]] * y[k];
            }
            y[i] = sum / self.l[[i, i]];
        }

        // Back substitution: Lᵗ·x = y
        let mut x = Array1::<f64>::zeros(n);
        for i in (0..n).rev() {
            let mut sum = y[i];
            for k in (i + 1)..n {
                sum -= self.l[[k, i]] * x[k];
            }
            x[i] = sum / self.l[[i, i]];
        }

        x
    }

    /// `N⁻¹`, solved column by column against the identity
    pub fn inverse(&self) -> Array2<f64> {
        let n = self.dim();
        let mut inverse = Array2::<f64>::zeros((n, n));
        for j in 0..n {
            let mut e = Array1::<f64>::zeros(n);
            e[j] = 1.0;
            inverse.column_mut(j).assign(&self.solve(&e));
        }
        inverse
    }
}
