//! Stateful and stateless building blocks of the filter chain.
//!
//! Each block is usable on its own; [`super::FilterChain`] wires them in the
//! fixed clamp → anti-spike → Hampel → smoothing → deadband → slew order and
//! the replay engine reuses them for its batch pass and online tail.
use std::collections::VecDeque;

/// Consistency constant turning a MAD into a standard-deviation estimate for
/// normally distributed data.
pub const MAD_SCALE: f64 = 1.4826;

/// Lower bound on the MAD so a window of identical samples still has a finite threshold.
pub const MAD_FLOOR: f64 = 1e-9;

/// Fixed-window moving average with an O(1) running sum.
///
/// The sum is maintained incrementally: the evicted sample is subtracted and the
/// new one added, never re-summed.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    capacity: usize,
    buffer: VecDeque<f64>,
    running_sum: f64,
}

impl MovingAverage {
    /// A window of `capacity` samples; a capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
            running_sum: 0.0,
        }
    }

    /// Add a sample and return the mean of the current window.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.buffer.len() == self.capacity {
            if let Some(oldest) = self.buffer.pop_front() {
                self.running_sum -= oldest;
            }
        }
        self.buffer.push_back(value);
        self.running_sum += value;
        self.running_sum / self.buffer.len() as f64
    }

    /// Sum of the current window.
    pub fn sum(&self) -> f64 {
        self.running_sum
    }

    /// Samples currently in the window.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// `true` before the first sample.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum window length.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current window contents, oldest first.
    pub fn window(&self) -> impl Iterator<Item = f64> + '_ {
        self.buffer.iter().copied()
    }
}

/// Exponentially weighted moving average, `y = α·x + (1-α)·y_prev`.
///
/// The first sample seeds the state.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    state: Option<f64>,
}

impl Ema {
    /// `alpha` is clamped into (0, 1]; validated configuration never needs the clamp.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            state: None,
        }
    }

    /// Fold in `value`; the first sample seeds the state.
    pub fn push(&mut self, value: f64) -> f64 {
        let next = match self.state {
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
            None => value,
        };
        self.state = Some(next);
        next
    }

    /// Last output, `None` before the first sample.
    pub fn state(&self) -> Option<f64> {
        self.state
    }
}

/// Trailing-window Hampel identifier for the online path.
///
/// Keeps the most recent `capacity` inputs (the current one included). Once at
/// least three are available, a sample further than `k · 1.4826 · MAD` from the
/// window median is replaced by the median.
#[derive(Debug, Clone)]
pub struct HampelWindow {
    capacity: usize,
    k: f64,
    samples: VecDeque<f64>,
    scratch: Vec<f64>,
}

impl HampelWindow {
    /// `capacity` is raised to at least one.
    pub fn new(capacity: usize, k: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            k,
            samples: VecDeque::with_capacity(capacity),
            scratch: Vec::with_capacity(capacity),
        }
    }

    /// Add `value` and return it, or the window median if it is an outlier.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        if self.samples.len() < 3 {
            return value;
        }

        self.scratch.clear();
        self.scratch.extend(self.samples.iter().copied());
        match hampel_decision(&mut self.scratch, value, self.k) {
            Some(median) => median,
            None => value,
        }
    }

    /// Samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Returns `Some(median)` when `value` is an outlier with respect to `window`.
///
/// `window` is reordered in place.
pub(crate) fn hampel_decision(window: &mut [f64], value: f64, k: f64) -> Option<f64> {
    let med = median(window);
    for v in window.iter_mut() {
        *v = (*v - med).abs();
    }
    let mad = median(window).max(MAD_FLOOR);
    if (value - med).abs() > k * MAD_SCALE * mad {
        Some(med)
    } else {
        None
    }
}

/// Median of a non-empty slice; reorders the slice.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Smoothing stage.
#[derive(Debug, Clone)]
pub enum Smoother {
    /// Identity
    None,
    /// Exponential weighting
    Ema(Ema),
    /// Boxcar mean
    MovingAverage(MovingAverage),
}

impl Smoother {
    /// Smooth one value.
    pub fn push(&mut self, value: f64) -> f64 {
        match self {
            Smoother::None => value,
            Smoother::Ema(ema) => ema.push(value),
            Smoother::MovingAverage(avg) => avg.push(value),
        }
    }
}

/// Hold `prev` when the candidate moved less than `threshold` away from it.
///
/// A non-positive threshold, a missing or NaN `prev`, or a NaN candidate
/// disables the stage.
#[inline]
pub fn deadband(prev: Option<f64>, candidate: f64, threshold: f64) -> f64 {
    match prev {
        Some(p) if threshold > 0.0 && p.is_finite() && candidate.is_finite() => {
            if (candidate - p).abs() < threshold {
                p
            } else {
                candidate
            }
        }
        _ => candidate,
    }
}

/// Bound the change from `prev` to `max_rate · dt_s`, keeping its direction.
///
/// `dt_s` is floored at one microsecond; a non-positive rate disables the stage.
#[inline]
pub fn slew_limit(prev: Option<f64>, candidate: f64, max_rate: f64, dt_s: f64) -> f64 {
    match prev {
        Some(p) if max_rate > 0.0 && p.is_finite() && candidate.is_finite() => {
            let max_delta = max_rate * dt_s.max(1e-6);
            candidate.clamp(p - max_delta, p + max_delta)
        }
        _ => candidate,
    }
}
