//! # Histogram boundary
//!
//! Value distributions are recorded by a [`Histogram`] implementation; this
//! crate only fixes the interface and the snapshot shape. [`HdrReservoir`]
//! is the bundled implementation, backed by `hdrhistogram`.

use super::error::ConfigError;
use hdrhistogram::Histogram as HdrHistogram;
use parking_lot::Mutex;
use std::fmt;

/// Records values and reports their distribution.
pub trait Histogram: Send + Sync + fmt::Debug {
    fn update(&self, value: i64);

    fn snapshot(&self) -> HistogramSnapshot;
}

impl<H: Histogram + ?Sized> Histogram for Box<H> {
    #[inline]
    fn update(&self, value: i64) {
        (**self).update(value)
    }

    fn snapshot(&self) -> HistogramSnapshot {
        (**self).snapshot()
    }
}

impl<H: Histogram + ?Sized> Histogram for std::sync::Arc<H> {
    #[inline]
    fn update(&self, value: i64) {
        (**self).update(value)
    }

    fn snapshot(&self) -> HistogramSnapshot {
        (**self).snapshot()
    }
}

/// Distribution of the values recorded up to a snapshot.
///
/// All fields are zero when nothing was recorded.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub stddev: f64,
    pub sample_count: u64,
    pub p50: u64,
    pub p75: u64,
    pub p95: u64,
    pub p98: u64,
    pub p99: u64,
    pub p999: u64,
    histogram: Option<HdrHistogram<u64>>,
}

impl HistogramSnapshot {
    fn empty() -> Self {
        Self {
            min: 0,
            max: 0,
            mean: 0.0,
            stddev: 0.0,
            sample_count: 0,
            p50: 0,
            p75: 0,
            p95: 0,
            p98: 0,
            p99: 0,
            p999: 0,
            histogram: None,
        }
    }

    fn from_histogram(hist: HdrHistogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::empty();
        }

        Self {
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            stddev: hist.stdev(),
            sample_count: hist.len(),
            p50: hist.value_at_quantile(0.5),
            p75: hist.value_at_quantile(0.75),
            p95: hist.value_at_quantile(0.95),
            p98: hist.value_at_quantile(0.98),
            p99: hist.value_at_quantile(0.99),
            p999: hist.value_at_quantile(0.999),
            histogram: Some(hist),
        }
    }

    /// Value at quantile `q`, clamped to `[0, 1]`.
    pub fn value_at_quantile(&self, q: f64) -> u64 {
        match &self.histogram {
            Some(hist) => hist.value_at_quantile(q.clamp(0.0, 1.0)),
            None => 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

impl fmt::Display for HistogramSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "count={} min={} max={} mean={:.2} p50={} p99={} p999={}",
            self.sample_count, self.min, self.max, self.mean, self.p50, self.p99, self.p999
        )
    }
}

/// [`Histogram`] over an HDR histogram behind a mutex.
///
/// Negative values are recorded as zero; values above the highest trackable
/// value are recorded as that value.
///
/// ```rust
/// use rollmetrics::{HdrReservoir, Histogram};
///
/// let reservoir = HdrReservoir::new(60_000, 3).unwrap();
/// for latency in [12, 15, 11, 250] {
///     reservoir.update(latency);
/// }
///
/// let snapshot = reservoir.snapshot();
/// assert_eq!(snapshot.sample_count, 4);
/// assert_eq!(snapshot.max, 250);
/// ```
pub struct HdrReservoir {
    histogram: Mutex<HdrHistogram<u64>>,
    reset_on_snapshot: bool,
}

impl HdrReservoir {
    /// Tracks values in `[0, highest_trackable_value]` with
    /// `significant_figures` (0 to 5) digits of precision.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidHistogram`] when the bounds are rejected.
    pub fn new(highest_trackable_value: u64, significant_figures: u8) -> Result<Self, ConfigError> {
        let histogram =
            HdrHistogram::<u64>::new_with_bounds(1, highest_trackable_value, significant_figures)
                .map_err(|e| ConfigError::InvalidHistogram {
                    reason: format!("{:?}", e),
                })?;

        Ok(Self {
            histogram: Mutex::new(histogram),
            reset_on_snapshot: false,
        })
    }

    /// Clears the recorded values each time a snapshot is taken.
    pub fn with_reset_on_snapshot(mut self) -> Self {
        self.reset_on_snapshot = true;
        self
    }
}

impl Histogram for HdrReservoir {
    #[inline]
    fn update(&self, value: i64) {
        self.histogram.lock().saturating_record(value.max(0) as u64);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut histogram = self.histogram.lock();
        let copy = histogram.clone();
        if self.reset_on_snapshot {
            histogram.reset();
        }
        drop(histogram);

        HistogramSnapshot::from_histogram(copy)
    }
}

impl fmt::Debug for HdrReservoir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let histogram = self.histogram.lock();
        f.debug_struct("HdrReservoir")
            .field("samples", &histogram.len())
            .field("high", &histogram.high())
            .field("reset_on_snapshot", &self.reset_on_snapshot)
            .finish()
    }
}
