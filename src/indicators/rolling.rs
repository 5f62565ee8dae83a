use std::collections::VecDeque;

/// Fixed-window simple moving average over possibly-undefined inputs.
/// The output is undefined until `period` values are buffered and stays
/// undefined while any buffered value is undefined.
#[derive(Debug, Clone)]
pub struct RollingMean {
    period: usize,
    window: VecDeque<Option<f64>>,
}

impl RollingMean {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period),
        }
    }

    pub fn update(&mut self, value: Option<f64>) -> Option<f64> {
        self.window.push_back(value);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        self.current()
    }

    pub fn current(&self) -> Option<f64> {
        if self.period == 0 || self.window.len() < self.period {
            return None;
        }
        let mut sum = 0.0;
        for value in &self.window {
            sum += (*value)?;
        }
        Some(sum / self.period as f64)
    }
}

/// Rolling mean of a whole series, aligned with the input
pub fn rolling_mean(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut indicator = RollingMean::new(period);
    values.iter().map(|v| indicator.update(*v)).collect()
}

/// Series shifted forward by one position (first element undefined)
pub fn lag1(values: &[f64]) -> Vec<Option<f64>> {
    let mut lagged = Vec::with_capacity(values.len());
    if values.is_empty() {
        return lagged;
    }
    lagged.push(None);
    lagged.extend(values[..values.len() - 1].iter().map(|v| Some(*v)));
    lagged
}

/// Absolute first difference (first element undefined)
pub fn abs_diff(values: &[f64]) -> Vec<Option<f64>> {
    lag1(values)
        .into_iter()
        .zip(values.iter())
        .map(|(prev, cur)| prev.map(|p| (cur - p).abs()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_mean_warmup() {
        let values: Vec<Option<f64>> = (1..=7).map(|v| Some(v as f64)).collect();
        let means = rolling_mean(&values, 5);
        assert!(means[..4].iter().all(|m| m.is_none()));
        assert_eq!(means[4], Some(3.0));
        assert_eq!(means[6], Some(5.0));
    }

    #[test]
    fn test_rolling_mean_propagates_undefined() {
        let values = vec![None, Some(1.0), Some(1.0), Some(1.0), Some(1.0), Some(1.0)];
        let means = rolling_mean(&values, 5);
        assert_eq!(means[4], None);
        assert_eq!(means[5], Some(1.0));
    }

    #[test]
    fn test_rolling_mean_slides() {
        let mut rm = RollingMean::new(2);
        assert_eq!(rm.update(Some(1.0)), None);
        assert_eq!(rm.update(Some(3.0)), Some(2.0));
        assert_eq!(rm.update(Some(5.0)), Some(4.0));
        assert_eq!(rm.current(), Some(4.0));
    }

    #[test]
    fn test_lag_and_abs_diff() {
        let values = vec![1.0, 3.0, 2.0];
        assert_eq!(lag1(&values), vec![None, Some(1.0), Some(3.0)]);
        assert_eq!(abs_diff(&values), vec![None, Some(2.0), Some(1.0)]);
        assert!(lag1(&[]).is_empty());
    }
}
