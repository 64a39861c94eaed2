use crate::core::linalg::Cholesky;
use crate::types::{CoregError, CoregResult};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Observation count above which row-wise work is split across threads
pub const PARALLEL_ROW_THRESHOLD: usize = 10_000;

/// Solved weighted normal equations for both axes
#[derive(Debug, Clone)]
pub struct NormalSolution {
    /// Normal matrix `Aᵗ·W·A`
    pub normal_matrix: Array2<f64>,
    /// `N⁻¹`, the coefficient covariance (cofactor) matrix
    pub inverse: Array2<f64>,
    /// Azimuth polynomial coefficients
    pub coeff_line: Array1<f64>,
    /// Range polynomial coefficients
    pub coeff_pixel: Array1<f64>,
}

/// Weighted least-squares solver for the line and pixel offset polynomials
#[derive(Debug, Clone)]
pub struct NormalEquationSolver {
    parallel_threshold: usize,
}

impl NormalEquationSolver {
    pub fn new() -> Self {
        Self {
            parallel_threshold: PARALLEL_ROW_THRESHOLD,
        }
    }

    /// Solver that switches to parallel accumulation above `parallel_threshold` rows
    pub fn with_parallel_threshold(parallel_threshold: usize) -> Self {
        Self { parallel_threshold }
    }

    pub fn solve(
        &self,
        a: &Array2<f64>,
        weights: &Array1<f64>,
        y_line: &Array1<f64>,
        y_pixel: &Array1<f64>,
    ) -> CoregResult<NormalSolution> {
        let (rows, cols) = a.dim();
        if weights.len() != rows || y_line.len() != rows || y_pixel.len() != rows {
            return Err(CoregError::InvalidParameter(format!(
                "Design matrix has {} rows but got {} weights, {} line and {} pixel observations",
                rows,
                weights.len(),
                y_line.len(),
                y_pixel.len()
            )));
        }
        if rows < cols {
            return Err(CoregError::InsufficientRedundancy {
                observations: rows,
                coefficients: cols,
            });
        }

        let scaled = self.scale_rows(a, weights);
        let normal_matrix = self.normal_matrix(a, &scaled);

        // Aᵗ·W·y, reusing the weighted rows
        let rhs_line = scaled.t().dot(y_line);
        let rhs_pixel = scaled.t().dot(y_pixel);

        let cholesky = Cholesky::factor(&normal_matrix)?;
        let coeff_line = cholesky.solve(&rhs_line);
        let coeff_pixel = cholesky.solve(&rhs_pixel);
        let inverse = cholesky.inverse();

        log::debug!("Coeffs in azimuth direction: {}", coeff_line);
        log::debug!("Coeffs in range direction: {}", coeff_pixel);

        Ok(NormalSolution {
            normal_matrix,
            inverse,
            coeff_line,
            coeff_pixel,
        })
    }

    /// Rows of `a` multiplied by their weight, i.e. `W·A` without forming `W`
    fn scale_rows(&self, a: &Array2<f64>, weights: &Array1<f64>) -> Array2<f64> {
        let mut scaled = a.to_owned();

        #[cfg(feature = "parallel")]
        {
            if a.nrows() > self.parallel_threshold {
                ndarray::Zip::from(scaled.rows_mut())
                    .and(weights)
                    .par_for_each(|mut row, &w| row *= w);
                return scaled;
            }
        }

        for (mut row, &w) in scaled.outer_iter_mut().zip(weights.iter()) {
            row *= w;
        }
        scaled
    }

    fn normal_matrix(&self, a: &Array2<f64>, scaled: &Array2<f64>) -> Array2<f64> {
        if a.nrows() > self.parallel_threshold {
            return self.normal_matrix_parallel(a.view(), scaled.view());
        }
        a.t().dot(scaled)
    }

    /// `Aᵗ·(W·A)` summed over row blocks in parallel
    #[cfg(feature = "parallel")]
    fn normal_matrix_parallel(&self, a: ArrayView2<f64>, scaled: ArrayView2<f64>) -> Array2<f64> {
        use ndarray::s;
        use rayon::prelude::*;

        let (rows, cols) = a.dim();
        let chunk_size = std::cmp::max(1, rows / rayon::current_num_threads());
        let num_chunks = (rows + chunk_size - 1) / chunk_size;
        log::debug!("Accumulating normal matrix over {} row blocks", num_chunks);

        (0..num_chunks)
            .into_par_iter()
            .map(|chunk| {
                let start = chunk * chunk_size;
                let end = (start + chunk_size).min(rows);
                a.slice(s![start..end, ..]).t().dot(&scaled.slice(s![start..end, ..]))
            })
            .reduce(|| Array2::zeros((cols, cols)), |acc, block| acc + block)
    }

    #[cfg(not(feature = "parallel"))]
    fn normal_matrix_parallel(&self, a: ArrayView2<f64>, scaled: ArrayView2<f64>) -> Array2<f64> {
        a.t().dot(&scaled)
    }
}

impl Default for NormalEquationSolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagonal of `A·N⁻¹·Aᵗ`, one entry per observation
pub fn projection_diagonal(a: &Array2<f64>, inverse: &Array2<f64>, parallel_threshold: usize) -> Array1<f64> {
    let projected = a.dot(inverse);
    let mut diag = Array1::<f64>::zeros(a.nrows());

    #[cfg(feature = "parallel")]
    {
        if a.nrows() > parallel_threshold {
            ndarray::Zip::from(&mut diag)
                .and(projected.rows())
                .and(a.rows())
                .par_for_each(|d, p, row| *d = p.dot(&row));
            return diag;
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel_threshold;

    for (d, (p, row)) in diag
        .iter_mut()
        .zip(projected.axis_iter(Axis(0)).zip(a.axis_iter(Axis(0))))
    {
        *d = p.dot(&row);
    }
    diag
}
