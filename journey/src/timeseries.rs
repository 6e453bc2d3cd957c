//! Append-only event timeseries with lazy sorting and fixed-stride bucketing.
//!
//! Samples are stored as signed millisecond offsets from a base time, so
//! events observed before the base time are kept rather than dropped.
//! [`Timeseries::bucket_by`] turns the unordered samples into a gap-free
//! series: window `k` (1-based) holds every remaining sample with an offset
//! below `k * stride`, which places negative offsets in the first window.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Smallest stride [`Timeseries::bucket_by`] will use.
pub const MIN_STRIDE: Duration = Duration::from_secs(1);

/// Folds the samples of one window into the running aggregate.
///
/// Receives the window's sample values (possibly empty) and the previous
/// window's aggregate, and returns this window's aggregate.
pub type Aggregator = fn(&[f64], f64) -> f64;

/// Sum of the window's samples, ignoring history.
pub fn sum(values: &[f64], _previous: f64) -> f64 {
    values.iter().sum()
}

/// Running total: the window's sum added to the previous aggregate.
pub fn count(values: &[f64], previous: f64) -> f64 {
    sum(values, previous) + previous
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Sample {
    offset_ms: i64,
    value: f64,
}

#[derive(Clone, Debug)]
pub struct Timeseries {
    base_time: DateTime<Utc>,
    samples: Vec<Sample>,
    sorted: bool,
}

impl Timeseries {
    pub fn new(base_time: DateTime<Utc>) -> Self {
        Self::with_capacity(base_time, 0)
    }

    pub fn with_capacity(base_time: DateTime<Utc>, size_hint: usize) -> Self {
        Self {
            base_time,
            samples: Vec::with_capacity(size_hint),
            // empty is trivially ordered
            sorted: true,
        }
    }

    pub fn base_time(&self) -> DateTime<Utc> {
        self.base_time
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Record `value` at `at`, truncated to millisecond resolution.
    pub fn add(&mut self, at: DateTime<Utc>, value: f64) {
        let offset_ms = (at - self.base_time).num_milliseconds();
        self.samples.push(Sample { offset_ms, value });
        self.sorted = false;
    }

    /// Sample offsets in storage order, in milliseconds from the base time.
    pub fn offsets(&self) -> Vec<i64> {
        self.samples.iter().map(|sample| sample.offset_ms).collect()
    }

    /// `(timestamp, value)` pairs in storage order.
    pub fn samples(&self) -> impl Iterator<Item = (DateTime<Utc>, f64)> + '_ {
        self.samples.iter().map(|sample| {
            (
                self.base_time + chrono::Duration::milliseconds(sample.offset_ms),
                sample.value,
            )
        })
    }

    fn ensure_sorted(&mut self) {
        if !self.sorted {
            self.samples.sort_unstable_by_key(|sample| sample.offset_ms);
            self.sorted = true;
        }
    }

    /// Aggregate samples into consecutive `stride`-wide windows.
    ///
    /// `stride` is clamped to at least [`MIN_STRIDE`]. Windows without
    /// samples are filled with `aggregator(&[], previous)`, so a cumulative
    /// aggregator such as [`count`] carries its last value forward while
    /// [`sum`] drops to zero. The output always has at least one window.
    pub fn bucket_by(&mut self, stride: Duration, aggregator: Aggregator) -> Vec<f64> {
        self.ensure_sorted();

        let stride_ms = stride.max(MIN_STRIDE).as_millis() as i64;
        let mut series = Vec::new();
        let mut bucket: Vec<f64> = Vec::new();
        let mut previous = 0.0;
        let mut window: i64 = 1;

        for sample in &self.samples {
            if sample.offset_ms < window * stride_ms {
                bucket.push(sample.value);
                continue;
            }

            previous = aggregator(&bucket, previous);
            series.push(previous);
            window += 1;
            bucket.clear();

            while sample.offset_ms >= window * stride_ms {
                previous = aggregator(&[], previous);
                series.push(previous);
                window += 1;
            }
            bucket.push(sample.value);
        }

        previous = aggregator(&bucket, previous);
        series.push(previous);
        series
    }
}
