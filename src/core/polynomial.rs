use crate::core::design_matrix::{basis_exponents, degree_from_coefficients};
use crate::types::{CoregError, CoregResult, NormalizationBounds};
use ndarray::{Array1, Array2, Zip};

/// Fitted azimuth/range offset polynomials in raw image coordinates
#[derive(Debug, Clone)]
pub struct WarpPolynomial {
    degree: usize,
    bounds: NormalizationBounds,
    coeff_line: Array1<f64>,
    coeff_pixel: Array1<f64>,
    exponents: Vec<(i32, i32)>,
}

impl WarpPolynomial {
    pub fn new(
        bounds: NormalizationBounds,
        coeff_line: Array1<f64>,
        coeff_pixel: Array1<f64>,
    ) -> CoregResult<Self> {
        if coeff_line.len() != coeff_pixel.len() {
            return Err(CoregError::InvalidParameter(format!(
                "Coefficient vectors differ in length: {} vs {}",
                coeff_line.len(),
                coeff_pixel.len()
            )));
        }
        let degree = degree_from_coefficients(coeff_line.len()).ok_or_else(|| {
            CoregError::InvalidParameter(format!(
                "{} coefficients do not form a full 2-D polynomial",
                coeff_line.len()
            ))
        })?;

        Ok(Self {
            degree,
            bounds,
            coeff_line,
            coeff_pixel,
            exponents: basis_exponents(degree),
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn bounds(&self) -> &NormalizationBounds {
        &self.bounds
    }

    pub fn coeff_line(&self) -> &Array1<f64> {
        &self.coeff_line
    }

    pub fn coeff_pixel(&self) -> &Array1<f64> {
        &self.coeff_pixel
    }

    /// Modelled `(d_line, d_pixel)` offset at a reference image position
    pub fn evaluate(&self, line: f64, pixel: f64) -> (f64, f64) {
        let norm_line = self.bounds.normalize_line(line);
        let norm_pixel = self.bounds.normalize_pixel(pixel);

        let mut d_line = 0.0;
        let mut d_pixel = 0.0;
        for (k, &(le, pe)) in self.exponents.iter().enumerate() {
            let term = norm_line.powi(le) * norm_pixel.powi(pe);
            d_line += self.coeff_line[k] * term;
            d_pixel += self.coeff_pixel[k] * term;
        }
        (d_line, d_pixel)
    }

    /// Position in the secondary image matching a reference position
    pub fn secondary_position(&self, line: f64, pixel: f64) -> (f64, f64) {
        let (d_line, d_pixel) = self.evaluate(line, pixel);
        (line + d_line, pixel + d_pixel)
    }

    /// Dense offset fields over the grid `lines × pixels`.
    ///
    /// Returns `(d_line, d_pixel)` arrays of shape `(lines.len(), pixels.len())`.
    pub fn offset_grid(&self, lines: &[f64], pixels: &[f64]) -> (Array2<f64>, Array2<f64>) {
        let shape = (lines.len(), pixels.len());
        log::debug!("Evaluating degree {} warp polynomial on {}x{} grid", self.degree, shape.0, shape.1);

        let mut d_line = Array2::<f64>::zeros(shape);
        let mut d_pixel = Array2::<f64>::zeros(shape);

        let fill = |(i, j): (usize, usize), dl: &mut f64, dp: &mut f64| {
            let (l, p) = self.evaluate(lines[i], pixels[j]);
            *dl = l;
            *dp = p;
        };

        #[cfg(feature = "parallel")]
        Zip::indexed(&mut d_line).and(&mut d_pixel).par_for_each(fill);

        #[cfg(not(feature = "parallel"))]
        Zip::indexed(&mut d_line).and(&mut d_pixel).for_each(fill);

        (d_line, d_pixel)
    }
}
