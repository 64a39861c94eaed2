use crate::types::{CoregError, CoregResult, NormalizationBounds, Observation};
use ndarray::{Array1, Array2};

/// Highest polynomial degree accepted for the warp model
pub const MAX_DEGREE: usize = 5;

/// Number of coefficients of a full 2-D polynomial of the given degree
pub fn number_of_coefficients(degree: usize) -> usize {
    (degree + 1) * (degree + 2) / 2
}

/// Inverse of [`number_of_coefficients`], `None` if `num_coefficients` is not triangular
pub fn degree_from_coefficients(num_coefficients: usize) -> Option<usize> {
    (0..=MAX_DEGREE).find(|&degree| number_of_coefficients(degree) == num_coefficients)
}

/// Exponents `(line_exp, pixel_exp)` of each basis term.
///
/// Terms are ordered by total degree ascending, then by pixel exponent
/// ascending: 1, l, p, l², lp, p², l³, ...
pub fn basis_exponents(degree: usize) -> Vec<(i32, i32)> {
    let mut exponents = Vec::with_capacity(number_of_coefficients(degree));
    for p in 0..=degree as i32 {
        for q in 0..=p {
            exponents.push((p - q, q));
        }
    }
    exponents
}

/// Evaluate every basis term at a normalized position, in coefficient order
pub fn basis_row(norm_line: f64, norm_pixel: f64, exponents: &[(i32, i32)]) -> Array1<f64> {
    exponents
        .iter()
        .map(|&(le, pe)| norm_line.powi(le) * norm_pixel.powi(pe))
        .collect()
}

/// Linear system inputs for one iteration
#[derive(Debug, Clone)]
pub struct DesignSystem {
    /// Design matrix, one row per observation
    pub a: Array2<f64>,
    /// Observed azimuth offsets
    pub y_line: Array1<f64>,
    /// Observed range offsets
    pub y_pixel: Array1<f64>,
}

/// Builds the polynomial design matrix from normalized observation positions
#[derive(Debug, Clone)]
pub struct DesignMatrixBuilder {
    degree: usize,
    bounds: NormalizationBounds,
    exponents: Vec<(i32, i32)>,
}

impl DesignMatrixBuilder {
    pub fn new(degree: usize, bounds: NormalizationBounds) -> CoregResult<Self> {
        if degree > MAX_DEGREE {
            return Err(CoregError::InvalidParameter(format!(
                "Polynomial degree {} not supported (max {})",
                degree, MAX_DEGREE
            )));
        }

        Ok(Self {
            degree,
            bounds,
            exponents: basis_exponents(degree),
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn num_coefficients(&self) -> usize {
        self.exponents.len()
    }

    pub fn bounds(&self) -> &NormalizationBounds {
        &self.bounds
    }

    /// Design matrix and observation vectors for the given observations
    pub fn build(&self, observations: &[Observation]) -> DesignSystem {
        let rows = observations.len();
        let cols = self.num_coefficients();
        log::debug!("Building {}x{} design matrix (degree {})", rows, cols, self.degree);

        let mut a = Array2::<f64>::zeros((rows, cols));
        for (mut row, obs) in a.outer_iter_mut().zip(observations) {
            let norm_line = self.bounds.normalize_line(obs.line);
            let norm_pixel = self.bounds.normalize_pixel(obs.pixel);
            row.assign(&basis_row(norm_line, norm_pixel, &self.exponents));
        }

        let y_line = observations.iter().map(|obs| obs.d_line).collect();
        let y_pixel = observations.iter().map(|obs| obs.d_pixel).collect();

        DesignSystem { a, y_line, y_pixel }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_of_coefficients() {
        assert_eq!(number_of_coefficients(0), 1);
        assert_eq!(number_of_coefficients(1), 3);
        assert_eq!(number_of_coefficients(2), 6);
        assert_eq!(number_of_coefficients(3), 10);
        assert_eq!(number_of_coefficients(5), 21);

        for degree in 0..=MAX_DEGREE {
            assert_eq!(degree_from_coefficients(number_of_coefficients(degree)), Some(degree));
        }
        assert_eq!(degree_from_coefficients(4), None);
    }

    #[test]
    fn test_basis_ordering() {
        assert_eq!(
            basis_exponents(2),
            vec![(0, 0), (1, 0), (0, 1), (2, 0), (1, 1), (0, 2)]
        );
        assert_eq!(basis_exponents(3)[6..], [(3, 0), (2, 1), (1, 2), (0, 3)]);
    }

    #[test]
    fn test_design_matrix_rows() {
        let bounds = NormalizationBounds::new(0.0, 1000.0, 0.0, 2000.0).unwrap();
        let builder = DesignMatrixBuilder::new(2, bounds).unwrap();
        let observations = vec![
            Observation::new(0, 750.0, 500.0, 0.5, -0.25, 1.0),
            Observation::new(1, 0.0, 2000.0, 1.5, 2.25, 1.0),
        ];

        let system = builder.build(&observations);

        assert_eq!(system.a.dim(), (2, 6));
        // (750, 500) normalizes to (1, -1)
        let expected = [1.0, 1.0, -1.0, 1.0, -1.0, 1.0];
        for (k, value) in expected.iter().enumerate() {
            assert_eq!(system.a[[0, k]], *value);
        }
        // (0, 2000) normalizes to (-2, 2)
        assert_eq!(system.a[[1, 4]], -4.0);
        assert_eq!(system.y_line.to_vec(), vec![0.5, 1.5]);
        assert_eq!(system.y_pixel.to_vec(), vec![-0.25, 2.25]);
    }

    #[test]
    fn test_rejects_unrealistic_degree() {
        let bounds = NormalizationBounds::new(0.0, 1.0, 0.0, 1.0).unwrap();
        assert!(DesignMatrixBuilder::new(MAX_DEGREE + 1, bounds).is_err());
    }
}
