//! Savitzky-Golay smoothing.
//!
//! Every output sample is the value at its own position of a least-squares polynomial fitted
//! over a window of `window` samples. Interior samples use the window centred on them; the
//! first and last half-window reuse the fit of the first and last full window.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SmoothingError {
    #[error("Smoothing window must be a positive odd number, got {0}")]
    EvenWindow(usize),

    #[error("Polynomial order {order} must be less than the window length {window}")]
    OrderTooLarge { window: usize, order: usize },

    #[error("Series of {len} samples is shorter than the smoothing window {window}")]
    SeriesTooShort { len: usize, window: usize },

    #[error("Least-squares system is singular")]
    Singular,
}

/// Window length and polynomial order of a Savitzky-Golay filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smoothing {
    window: usize,
    order: usize,
}

impl Smoothing {
    pub fn new(window: usize, order: usize) -> Result<Self, SmoothingError> {
        if window == 0 || window % 2 == 0 {
            return Err(SmoothingError::EvenWindow(window));
        }
        if order >= window {
            return Err(SmoothingError::OrderTooLarge { window, order });
        }
        Ok(Self { window, order })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn apply(&self, values: &[f64]) -> Result<Vec<f64>, SmoothingError> {
        let n = values.len();
        if n < self.window {
            return Err(SmoothingError::SeriesTooShort {
                len: n,
                window: self.window,
            });
        }

        let half = self.window / 2;
        let weights = self.weights()?;

        let smoothed = (0..n)
            .map(|i| {
                let start = i.saturating_sub(half).min(n - self.window);
                let offset = i - start;
                weights[offset]
                    .iter()
                    .zip(&values[start..start + self.window])
                    .map(|(w, v)| w * v)
                    .sum()
            })
            .collect();
        Ok(smoothed)
    }

    /// `weights[e][k]`: contribution of window sample `k` to the fitted value at window position `e`.
    fn weights(&self) -> Result<Vec<Vec<f64>>, SmoothingError> {
        let half = self.window as f64 / 2.0 - 0.5;
        let terms = self.order + 1;
        let positions: Vec<f64> = (0..self.window).map(|k| k as f64 - half).collect();

        // Normal equations: (AᵀA) X = Aᵀ with A the Vandermonde matrix of the positions.
        let mut normal = vec![vec![0.0; terms]; terms];
        for (r, row) in normal.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = positions.iter().map(|x| x.powi((r + c) as i32)).sum();
            }
        }
        let mut rhs: Vec<Vec<f64>> = (0..terms)
            .map(|p| positions.iter().map(|x| x.powi(p as i32)).collect())
            .collect();

        solve_in_place(&mut normal, &mut rhs)?;

        // rhs now maps window samples to polynomial coefficients.
        Ok(positions
            .iter()
            .map(|x| {
                (0..self.window)
                    .map(|k| (0..terms).map(|p| x.powi(p as i32) * rhs[p][k]).sum())
                    .collect()
            })
            .collect())
    }
}

/// Gauss-Jordan elimination with partial pivoting; leaves the solution in `rhs`.
fn solve_in_place(matrix: &mut [Vec<f64>], rhs: &mut [Vec<f64>]) -> Result<(), SmoothingError> {
    let n = matrix.len();
    for pivot in 0..n {
        let best = (pivot..n)
            .max_by(|&a, &b| matrix[a][pivot].abs().total_cmp(&matrix[b][pivot].abs()))
            .ok_or(SmoothingError::Singular)?;
        if matrix[best][pivot].abs() < f64::EPSILON {
            return Err(SmoothingError::Singular);
        }
        matrix.swap(pivot, best);
        rhs.swap(pivot, best);

        let scale = matrix[pivot][pivot];
        matrix[pivot].iter_mut().for_each(|v| *v /= scale);
        rhs[pivot].iter_mut().for_each(|v| *v /= scale);

        for row in 0..n {
            if row == pivot {
                continue;
            }
            let factor = matrix[row][pivot];
            if factor == 0.0 {
                continue;
            }
            for c in 0..n {
                matrix[row][c] -= factor * matrix[pivot][c];
            }
            for c in 0..rhs[row].len() {
                rhs[row][c] -= factor * rhs[pivot][c];
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() < tol, "index {}: {} != {}", i, x, y);
        }
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert_eq!(Smoothing::new(4, 2), Err(SmoothingError::EvenWindow(4)));
        assert_eq!(Smoothing::new(0, 0), Err(SmoothingError::EvenWindow(0)));
        assert_eq!(
            Smoothing::new(5, 5),
            Err(SmoothingError::OrderTooLarge { window: 5, order: 5 })
        );
        assert_eq!(
            Smoothing::new(5, 2).unwrap().apply(&[1.0, 2.0]),
            Err(SmoothingError::SeriesTooShort { len: 2, window: 5 })
        );
    }

    #[test]
    fn test_preserves_polynomials_up_to_order() {
        let xs: Vec<f64> = (0..20).map(f64::from).collect();
        let quadratic: Vec<f64> = xs.iter().map(|x| 0.5 * x * x - 3.0 * x + 2.0).collect();

        let smoothed = Smoothing::new(7, 2).unwrap().apply(&quadratic).unwrap();
        assert_close(&smoothed, &quadratic, 1e-8);
    }

    #[test]
    fn test_moving_average_for_order_zero() {
        let values = [1.0, 2.0, 6.0, 2.0, 1.0, 0.0, 3.0];
        let smoothed = Smoothing::new(3, 0).unwrap().apply(&values).unwrap();

        // Interior points are 3-sample means, edges take the mean of the first/last window.
        let expected = [3.0, 3.0, 10.0 / 3.0, 3.0, 1.0, 4.0 / 3.0, 4.0 / 3.0];
        assert_close(&smoothed, &expected, 1e-12);
    }

    #[test]
    fn test_reduces_alternating_noise() {
        let values: Vec<f64> = (0..41)
            .map(|i| 1.0 + if i % 2 == 0 { 0.1 } else { -0.1 })
            .collect();
        let smoothed = Smoothing::new(11, 3).unwrap().apply(&values).unwrap();

        let peak_to_peak = |v: &[f64]| {
            v.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                - v.iter().cloned().fold(f64::INFINITY, f64::min)
        };
        assert!(peak_to_peak(&smoothed[5..36]) < peak_to_peak(&values) / 2.0);
    }
}
