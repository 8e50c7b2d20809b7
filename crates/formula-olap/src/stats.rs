//! Numeric kernels behind the aggregate functions.
//!
//! Inputs are already stripped of nulls; every function that can be undefined for its input
//! returns `None`, which callers surface as the null value.

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, x: f64) {
        let y = x - self.c;
        let t = self.sum + y;
        self.c = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn value(self) -> f64 {
        self.sum
    }
}

pub(crate) fn sum(values: &[f64]) -> f64 {
    let mut acc = KahanSum::default();
    for &x in values {
        acc.add(x);
    }
    acc.value()
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(sum(values) / values.len() as f64)
}

/// Linear interpolation at rank `p * (n - 1)` of the ascending-sorted values.
pub(crate) fn percentile(values: &mut [f64], p: f64) -> Option<f64> {
    if values.is_empty() || p.is_nan() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let last = values.len() - 1;
    if p <= 0.0 {
        return Some(values[0]);
    }
    if p >= 1.0 {
        return Some(values[last]);
    }
    let rank = p * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}

pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    percentile(values, 0.5)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispersion {
    /// Divide by `n`.
    Population,
    /// Divide by `n - 1`.
    Sample,
}

fn sum_sq_dev(values: &[f64], mean: f64) -> f64 {
    let mut acc = KahanSum::default();
    for &x in values {
        let d = x - mean;
        acc.add(d * d);
    }
    acc.value()
}

pub(crate) fn variance(values: &[f64], kind: Dispersion) -> Option<f64> {
    let n = values.len();
    let divisor = match kind {
        Dispersion::Population if n >= 1 => n as f64,
        Dispersion::Sample if n >= 2 => (n - 1) as f64,
        _ => return None,
    };
    let m = mean(values)?;
    Some(sum_sq_dev(values, m) / divisor)
}

pub(crate) fn stdev(values: &[f64], kind: Dispersion) -> Option<f64> {
    variance(values, kind).map(f64::sqrt)
}

pub(crate) fn covariance(xs: &[f64], ys: &[f64], kind: Dispersion) -> Option<f64> {
    let n = xs.len().min(ys.len());
    let divisor = match kind {
        Dispersion::Population if n >= 1 => n as f64,
        Dispersion::Sample if n >= 2 => (n - 1) as f64,
        _ => return None,
    };
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let mut acc = KahanSum::default();
    for (x, y) in xs.iter().zip(ys) {
        acc.add((x - mx) * (y - my));
    }
    Some(acc.value() / divisor)
}

pub(crate) fn correlation(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let cov = covariance(xs, ys, Dispersion::Population)?;
    let sx = stdev(xs, Dispersion::Population)?;
    let sy = stdev(ys, Dispersion::Population)?;
    if sx == 0.0 || sy == 0.0 {
        return None;
    }
    Some(cov / (sx * sy))
}

/// Ordinary least-squares fit of `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LinearFit {
    pub(crate) n: usize,
    pub(crate) slope: f64,
    pub(crate) intercept: f64,
    /// Unset when the total sum of squares is zero.
    pub(crate) r2: Option<f64>,
    /// Residual variance, `SSE / (n - 2)`; unset below three points.
    pub(crate) variance: Option<f64>,
}

impl LinearFit {
    pub(crate) fn point(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

pub(crate) fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<LinearFit> {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let mx = mean(xs)?;
    let my = mean(ys)?;

    let mut sxy = KahanSum::default();
    let mut sxx = KahanSum::default();
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        sxy.add(dx * (y - my));
        sxx.add(dx * dx);
    }
    let sxx = sxx.value();
    // All x equal: the line is flat through the mean.
    let slope = if sxx == 0.0 { 0.0 } else { sxy.value() / sxx };
    let intercept = my - slope * mx;

    let mut sse = KahanSum::default();
    for (x, y) in xs.iter().zip(ys) {
        let r = y - (slope * x + intercept);
        sse.add(r * r);
    }
    let sse = sse.value();
    let sst = sum_sq_dev(ys, my);

    Some(LinearFit {
        n,
        slope,
        intercept,
        r2: (sst != 0.0).then(|| 1.0 - sse / sst),
        variance: (n >= 3).then(|| sse / (n - 2) as f64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn median_interpolates_even_counts() {
        assert_eq!(median(&mut [2.0, 4.0, 6.0]), Some(4.0));
        assert_eq!(median(&mut [6.0, 2.0, 4.0, 8.0]), Some(5.0));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn percentile_clamps_at_the_extremes() {
        let mut values = [3.0, 1.0, 2.0];
        assert_eq!(percentile(&mut values, 0.0), Some(1.0));
        assert_eq!(percentile(&mut values, 1.5), Some(3.0));
        assert_eq!(percentile(&mut values, 0.25), Some(1.5));
    }

    #[test]
    fn sample_variance_needs_two_points() {
        assert_eq!(variance(&[5.0], Dispersion::Sample), None);
        assert_eq!(variance(&[5.0], Dispersion::Population), Some(0.0));
        assert_eq!(variance(&[], Dispersion::Population), None);
        assert_eq!(variance(&[1.0, 3.0], Dispersion::Sample), Some(2.0));
    }

    #[test]
    fn regression_on_a_perfect_line() {
        let fit = linear_regression(&[1.0, 2.0, 3.0, 4.0], &[3.0, 5.0, 7.0, 9.0]).unwrap();
        assert!(close(fit.slope, 2.0));
        assert!(close(fit.intercept, 1.0));
        assert_eq!(fit.r2, Some(1.0));
        assert!(close(fit.variance.unwrap(), 0.0));
        assert!(close(fit.point(10.0), 21.0));
    }

    #[test]
    fn constant_x_gives_zero_slope() {
        let fit = linear_regression(&[2.0, 2.0, 2.0], &[1.0, 2.0, 6.0]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert!(close(fit.intercept, 3.0));
    }

    #[test]
    fn constant_y_leaves_r2_unset() {
        let fit = linear_regression(&[1.0, 2.0, 3.0], &[4.0, 4.0, 4.0]).unwrap();
        assert_eq!(fit.r2, None);
        assert_eq!(fit.slope, 0.0);
    }

    #[test]
    fn correlation_of_anticorrelated_series() {
        let r = correlation(&[1.0, 2.0, 3.0], &[6.0, 4.0, 2.0]).unwrap();
        assert!(close(r, -1.0));
        assert_eq!(correlation(&[1.0, 1.0], &[2.0, 3.0]), None);
    }

    proptest! {
        #[test]
        fn population_variance_scales_sample_variance(
            values in proptest::collection::vec(-1.0e6f64..1.0e6, 2..64)
        ) {
            let n = values.len() as f64;
            let pop = variance(&values, Dispersion::Population).unwrap();
            let sample = variance(&values, Dispersion::Sample).unwrap();
            prop_assert!(close(pop, sample * (n - 1.0) / n));
        }
    }
}
