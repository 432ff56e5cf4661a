//! Whole-series forms of the conditioning stages, used by the replay engine.
//!
//! These run once over a recorded track before playback starts. NaN entries mark
//! missing samples: they are preserved in place and never feed filter state.
use super::stages::{hampel_decision, Ema, MovingAverage};
use crate::config::{SensorRange, SmoothingKind};
use std::time::Duration;

/// Replace values outside `range` (and non-finite values) with NaN.
pub fn clip_to_range(series: &mut [f64], range: SensorRange) {
    for v in series.iter_mut() {
        if !range.contains(*v) {
            *v = f64::NAN;
        }
    }
}

/// Index of the first sample at least `warmup` after the first timestamp.
///
/// Returns 0 when `warmup` is zero or the recording never gets past the warmup
/// span, so a short recording is replayed whole.
pub fn warmup_start_index(t_ms: &[f64], warmup: Duration) -> usize {
    let Some(&t0) = t_ms.first() else {
        return 0;
    };
    let warmup_ms = warmup.as_secs_f64() * 1000.0;
    if warmup_ms <= 0.0 {
        return 0;
    }
    t_ms.iter()
        .position(|&t| t - t0 >= warmup_ms)
        .unwrap_or(0)
}

/// Centered Hampel filter.
///
/// For each sample the window spans `window / 2` neighbours on each side
/// (truncated at the edges), NaN excluded. Windows with fewer than three valid
/// samples leave the value untouched. An even or too-short `window` returns the
/// series unchanged.
pub fn hampel(series: &[f64], window: usize, k: f64) -> Vec<f64> {
    let mut out = series.to_vec();
    if window < 3 || window % 2 == 0 {
        return out;
    }
    let half = window / 2;
    let mut scratch = Vec::with_capacity(window);
    for (i, &value) in series.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(series.len());
        scratch.clear();
        scratch.extend(series[lo..hi].iter().copied().filter(|v| !v.is_nan()));
        if scratch.len() < 3 {
            continue;
        }
        if let Some(median) = hampel_decision(&mut scratch, value, k) {
            out[i] = median;
        }
    }
    out
}

/// Trailing moving average over the valid samples.
pub fn moving_average(series: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 {
        return series.to_vec();
    }
    let mut avg = MovingAverage::new(window);
    series
        .iter()
        .map(|&x| if x.is_nan() { x } else { avg.push(x) })
        .collect()
}

/// Exponential moving average over the valid samples.
pub fn ema(series: &[f64], alpha: f64) -> Vec<f64> {
    let mut ema = Ema::new(alpha);
    series
        .iter()
        .map(|&x| if x.is_nan() { x } else { ema.push(x) })
        .collect()
}

/// Apply the configured primary smoother.
pub fn smooth(series: &[f64], kind: SmoothingKind, window: usize, alpha: f64) -> Vec<f64> {
    match kind {
        SmoothingKind::None => series.to_vec(),
        SmoothingKind::Ema => ema(series, alpha),
        SmoothingKind::Boxcar => moving_average(series, window),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_marks_invalid_as_nan() {
        let mut series = vec![-1.0, 5.0, 500.0, f64::INFINITY];
        clip_to_range(&mut series, SensorRange::new(0.0, 400.0));
        assert!(series[0].is_nan());
        assert_eq!(series[1], 5.0);
        assert!(series[2].is_nan());
        assert!(series[3].is_nan());
    }

    #[test]
    fn warmup_index() {
        let t = [0.0, 1000.0, 2000.0, 4000.0, 5000.0];
        assert_eq!(warmup_start_index(&t, Duration::from_secs(4)), 3);
        assert_eq!(warmup_start_index(&t, Duration::ZERO), 0);
        assert_eq!(warmup_start_index(&t, Duration::from_secs(60)), 0);
        assert_eq!(warmup_start_index(&[], Duration::from_secs(4)), 0);
    }

    #[test]
    fn centered_hampel_removes_isolated_spike() {
        let mut series = vec![100.0; 21];
        series[10] = 10_000.0;
        let cleaned = hampel(&series, 11, 3.0);
        assert!(cleaned.iter().all(|&v| v == 100.0));
    }

    #[test]
    fn hampel_keeps_nan_in_place() {
        let series = vec![1.0, f64::NAN, 1.0, 1.0, 1.0];
        let cleaned = hampel(&series, 3, 3.0);
        assert!(cleaned[1].is_nan());
    }

    #[test]
    fn even_window_is_noop() {
        let series = vec![1.0, 100.0, 1.0, 1.0];
        assert_eq!(hampel(&series, 4, 3.0), series);
    }

    #[test]
    fn smoothers_skip_nan() {
        let series = vec![2.0, f64::NAN, 4.0];
        let avg = moving_average(&series, 3);
        assert_eq!(avg[0], 2.0);
        assert!(avg[1].is_nan());
        assert_eq!(avg[2], 3.0);

        let e = ema(&series, 0.5);
        assert_eq!(e[2], 3.0);
    }
}
