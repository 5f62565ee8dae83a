use std::f64::consts::PI;

use super::sample_variance;

/// One-dimensional Gaussian kernel density estimate.
///
/// Bandwidth follows Scott's rule: the kernel variance is the unbiased sample
/// variance of the data scaled by `n^(-2/5)`.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    samples: Vec<f64>,
    bandwidth: f64,
}

impl GaussianKde {
    /// Fit to `samples`. Returns `None` for fewer than two samples or a
    /// degenerate (zero variance) sample, where no density can be estimated.
    pub fn fit(samples: &[f64]) -> Option<Self> {
        let finite: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        let variance = sample_variance(&finite)?;
        if variance <= 0.0 {
            return None;
        }
        let scott_factor = (finite.len() as f64).powf(-0.2);
        Some(Self {
            bandwidth: variance.sqrt() * scott_factor,
            samples: finite,
        })
    }

    #[cfg(test)]
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let h = self.bandwidth;
        let norm = 1.0 / ((2.0 * PI).sqrt() * h * self.samples.len() as f64);
        let sum: f64 = self
            .samples
            .iter()
            .map(|xi| {
                let z = (x - xi) / h;
                (-0.5 * z * z).exp()
            })
            .sum();
        norm * sum
    }
}

/// Density of the whole close series evaluated at every close
pub fn price_density(closes: &[f64]) -> Vec<Option<f64>> {
    match GaussianKde::fit(closes) {
        Some(kde) => closes.iter().map(|c| Some(kde.evaluate(*c))).collect(),
        None => vec![None; closes.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kde_two_points() {
        // variance = 0.5, h = sqrt(0.5) * 2^-0.2
        let kde = GaussianKde::fit(&[0.0, 1.0]).unwrap();
        let expected_h = 0.5f64.sqrt() * 2f64.powf(-0.2);
        assert!((kde.bandwidth() - expected_h).abs() < 1e-12);

        let h = expected_h;
        let expected = (1.0 + (-0.5 / (h * h)).exp()) / (2.0 * (2.0 * PI).sqrt() * h);
        assert!((kde.evaluate(0.0) - expected).abs() < 1e-12);
        assert!((kde.evaluate(0.0) - kde.evaluate(1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_density_peaks_where_prices_cluster() {
        let closes = vec![1.10, 1.101, 1.102, 1.099, 1.100, 1.25];
        let density = price_density(&closes);
        let clustered = density[0].unwrap();
        let outlier = density[5].unwrap();
        assert!(clustered > outlier);
    }

    #[test]
    fn test_degenerate_series_has_no_density() {
        assert!(price_density(&[1.1, 1.1, 1.1]).iter().all(|d| d.is_none()));
        assert!(price_density(&[1.1]).iter().all(|d| d.is_none()));
        assert!(price_density(&[]).is_empty());
    }
}
