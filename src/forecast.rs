// Forecast Engine - cubic trend extrapolation one year ahead
//
// Observations for one institution + calendar month, sorted by year, are
// placed at positions 1, 2, 3, ... and fitted with the least-squares cubic
//
//   fitted(x) = c0 + c1·x + c2·x² + c3·x³
//
// The forecast is fitted(n + 1) rounded to whole currency units. No
// clamping: a cubic on step-like data can overshoot, and that is reported
// as is.

use crate::error::{FinanceError, Result};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Degree of the trend polynomial
pub const POLYNOMIAL_DEGREE: usize = 3;

/// Four coefficients need at least four observations
pub const MIN_OBSERVATIONS: usize = POLYNOMIAL_DEGREE + 1;

const TERMS: usize = POLYNOMIAL_DEGREE + 1;

// ============================================================================
// CUBIC TREND
// ============================================================================

/// Least-squares cubic through (position, amount) pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubicTrend {
    /// c0..c3 in the unscaled position variable
    coefficients: [f64; TERMS],
    /// Number of observations used in fitting
    n_observations: usize,
}

impl CubicTrend {
    /// Fit values placed at positions 1..=n
    pub fn fit(values: &[f64]) -> Result<Self> {
        if values.len() < MIN_OBSERVATIONS {
            return Err(FinanceError::InsufficientData {
                required: MIN_OBSERVATIONS,
                actual: values.len(),
            });
        }

        // Solve in u = x / n so the normal matrix stays well scaled
        let scale = values.len() as f64;

        let mut normal = [[0.0_f64; TERMS]; TERMS];
        let mut rhs = [0.0_f64; TERMS];

        for (index, &y) in values.iter().enumerate() {
            let u = (index + 1) as f64 / scale;

            let mut powers = [1.0_f64; 2 * TERMS - 1];
            for p in 1..powers.len() {
                powers[p] = powers[p - 1] * u;
            }

            for row in 0..TERMS {
                for col in 0..TERMS {
                    normal[row][col] += powers[row + col];
                }
                rhs[row] += powers[row] * y;
            }
        }

        let scaled = solve(normal, rhs)?;

        // c_k = d_k / n^k
        let mut coefficients = [0.0_f64; TERMS];
        let mut divisor = 1.0_f64;
        for k in 0..TERMS {
            coefficients[k] = scaled[k] / divisor;
            divisor *= scale;
        }

        Ok(CubicTrend {
            coefficients,
            n_observations: values.len(),
        })
    }

    pub fn coefficients(&self) -> [f64; TERMS] {
        self.coefficients
    }

    pub fn n_observations(&self) -> usize {
        self.n_observations
    }

    /// fitted(x), Horner form
    pub fn evaluate(&self, x: f64) -> f64 {
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * x + c)
    }

    /// Position one step past the observed range
    pub fn next_position(&self) -> f64 {
        (self.n_observations + 1) as f64
    }
}

/// Gaussian elimination with partial pivoting
fn solve(mut matrix: [[f64; TERMS]; TERMS], mut rhs: [f64; TERMS]) -> Result<[f64; TERMS]> {
    for col in 0..TERMS {
        let pivot = (col..TERMS)
            .max_by(|&a, &b| matrix[a][col].abs().total_cmp(&matrix[b][col].abs()))
            .unwrap_or(col);

        if matrix[pivot][col] == 0.0 || !matrix[pivot][col].is_finite() {
            return Err(FinanceError::Numerical {
                reason: "normal equations are singular".to_string(),
            });
        }

        matrix.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in (col + 1)..TERMS {
            let factor = matrix[row][col] / matrix[col][col];
            for k in col..TERMS {
                matrix[row][k] -= factor * matrix[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut solution = [0.0_f64; TERMS];
    for row in (0..TERMS).rev() {
        let tail: f64 = ((row + 1)..TERMS)
            .map(|k| matrix[row][k] * solution[k])
            .sum();
        solution[row] = (rhs[row] - tail) / matrix[row][row];
    }

    Ok(solution)
}

// ============================================================================
// FORECAST ENGINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub year: String,
    pub amount: Decimal,
}

pub struct ForecastEngine;

impl ForecastEngine {
    pub fn new() -> Self {
        ForecastEngine
    }

    /// Forecast the year after the last observation
    ///
    /// `observations` and `years` are parallel and already sorted ascending
    /// by year. Fewer than four observations fail with `InsufficientData`
    /// before any fitting.
    pub fn forecast_next_period(
        &self,
        observations: &[Decimal],
        years: &[String],
    ) -> Result<Forecast> {
        if observations.len() < MIN_OBSERVATIONS {
            return Err(FinanceError::InsufficientData {
                required: MIN_OBSERVATIONS,
                actual: observations.len(),
            });
        }
        if observations.len() != years.len() {
            return Err(FinanceError::Numerical {
                reason: format!(
                    "{} observations but {} year labels",
                    observations.len(),
                    years.len()
                ),
            });
        }

        let last_year = &years[years.len() - 1];
        let next_year = last_year
            .parse::<i64>()
            .map(|year| (year + 1).to_string())
            .map_err(|_| FinanceError::Numerical {
                reason: format!("year '{}' is not numeric", last_year),
            })?;

        let values: Vec<f64> = observations
            .iter()
            .map(|amount| amount.to_f64().unwrap_or_default())
            .collect();

        let trend = CubicTrend::fit(&values)?;
        let fitted = trend.evaluate(trend.next_position());

        let amount = Decimal::from_f64(fitted.round())
            .map(|amount| amount.normalize())
            .ok_or_else(|| FinanceError::Numerical {
                reason: format!("forecast {} is outside the decimal range", fitted),
            })?;

        Ok(Forecast {
            year: next_year,
            amount,
        })
    }
}

impl Default for ForecastEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn years(from: i64, count: usize) -> Vec<String> {
        (0..count as i64).map(|i| (from + i).to_string()).collect()
    }

    fn amounts(values: &[i64]) -> Vec<Decimal> {
        values.iter().map(|&v| Decimal::from(v)).collect()
    }

    #[test]
    fn test_flat_zero_series() {
        let observations = vec![Decimal::ZERO; 10];

        let forecast = ForecastEngine::new()
            .forecast_next_period(&observations, &years(2005, 10))
            .unwrap();

        assert_eq!(forecast.year, "2015");
        assert_eq!(forecast.amount, Decimal::ZERO);
        assert_eq!(forecast.amount.to_string(), "0");
    }

    #[test]
    fn test_zero_series_has_zero_coefficients() {
        let trend = CubicTrend::fit(&[0.0; 10]).unwrap();
        assert_eq!(trend.coefficients(), [0.0; 4]);
    }

    #[test]
    fn test_exact_cubic_is_extrapolated() {
        // y = 1 + 2x + 3x² + x³ at x = 1..=6, next x = 7 → 505
        let values: Vec<i64> = (1..=6)
            .map(|x: i64| 1 + 2 * x + 3 * x * x + x * x * x)
            .collect();

        let forecast = ForecastEngine::new()
            .forecast_next_period(&amounts(&values), &years(2012, 6))
            .unwrap();

        assert_eq!(forecast.year, "2018");
        assert_eq!(forecast.amount, Decimal::from(505));

        let c = CubicTrend::fit(&values.iter().map(|&v| v as f64).collect::<Vec<_>>())
            .unwrap()
            .coefficients();
        for (fitted, expected) in c.iter().zip([1.0, 2.0, 3.0, 1.0]) {
            assert!((fitted - expected).abs() < 1e-6, "{} vs {}", fitted, expected);
        }
    }

    #[test]
    fn test_linear_series_continues() {
        let forecast = ForecastEngine::new()
            .forecast_next_period(&amounts(&[10, 20, 30, 40, 50]), &years(2013, 5))
            .unwrap();

        assert_eq!(forecast.year, "2018");
        assert_eq!(forecast.amount, Decimal::from(60));
    }

    #[test]
    fn test_forecast_rounds_to_nearest_unit() {
        // Exact cubic y = x³ / 2 + 0.2 → fitted(5) = 62.7, rounds up not down
        let values = [0.7, 4.2, 13.7, 32.2];
        let trend = CubicTrend::fit(&values).unwrap();
        assert!((trend.evaluate(5.0) - 62.7).abs() < 1e-6);

        let observations: Vec<Decimal> = values
            .iter()
            .map(|&v| Decimal::from_f64(v).unwrap())
            .collect();
        let forecast = ForecastEngine::new()
            .forecast_next_period(&observations, &years(2014, 4))
            .unwrap();

        assert_eq!(forecast.amount, Decimal::from(63));
    }

    #[test]
    fn test_insufficient_data() {
        for count in 0..MIN_OBSERVATIONS {
            let result = ForecastEngine::new()
                .forecast_next_period(&vec![Decimal::ONE; count], &years(2005, count));

            match result {
                Err(FinanceError::InsufficientData { required, actual }) => {
                    assert_eq!(required, 4);
                    assert_eq!(actual, count);
                }
                other => panic!("expected InsufficientData, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_mismatched_years_are_rejected() {
        let result = ForecastEngine::new()
            .forecast_next_period(&amounts(&[1, 2, 3, 4]), &years(2005, 3));

        assert!(matches!(result, Err(FinanceError::Numerical { .. })));
    }

    #[test]
    fn test_non_numeric_year_is_unprocessable() {
        let labels: Vec<String> = ["2005", "2006", "2007", "합계"]
            .iter()
            .map(|y| y.to_string())
            .collect();

        let error = ForecastEngine::new()
            .forecast_next_period(&amounts(&[1, 2, 3, 4]), &labels)
            .unwrap_err();

        assert!(matches!(error, FinanceError::Numerical { .. }));
        assert_eq!(error.outcome(), crate::error::Outcome::Unprocessable);
    }
}
