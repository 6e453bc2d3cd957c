use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::collector::LifecycleSeries;
use crate::timeseries::{count, MIN_STRIDE};

/// File name of the machine-readable dump.
pub const RAW_DUMP_FILE: &str = "raw.json";

/// File name of the chart-ready series.
pub const CHART_FILE: &str = "chart.json";

/// Bucketed lifecycle counts of a run, as written to `raw.json`.
///
/// Every series holds cumulative counts per stride window; the report's
/// stride is one second unless built otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub start_time: DateTime<Utc>,
    pub registered: Vec<f64>,
    pub placed: Vec<f64>,
    pub received: Vec<f64>,
    pub running: Vec<f64>,
    #[serde(skip, default = "default_stride")]
    pub stride: Duration,
}

fn default_stride() -> Duration {
    MIN_STRIDE
}

/// One named line of the lifecycle chart.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartSeries {
    pub name: &'static str,
    pub points: Vec<ChartPoint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ChartPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl MetricsReport {
    /// Bucket all four series with the cumulative count aggregator.
    pub fn from_series(series: &mut LifecycleSeries, stride: Duration) -> Self {
        let stride = stride.max(MIN_STRIDE);
        Self {
            start_time: series.base_time(),
            registered: series.registered.bucket_by(stride, count),
            placed: series.placed.bucket_by(stride, count),
            received: series.received.bucket_by(stride, count),
            running: series.running.bucket_by(stride, count),
            stride,
        }
    }

    /// Write the report as `raw.json` inside `dir`, returning the file path.
    pub fn write_json(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let path = dir.join(RAW_DUMP_FILE);
        let body = serde_json::to_vec_pretty(self).context("failed encoding metrics report")?;
        std::fs::write(&path, body)
            .with_context(|| format!("failed writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote metrics dump");
        Ok(path)
    }

    pub fn read_json(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("failed decoding metrics report {}", path.display()))
    }

    /// Write [`MetricsReport::chart_series`] as `chart.json` inside `dir`.
    pub fn write_chart_json(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let path = dir.join(CHART_FILE);
        let body = serde_json::to_vec_pretty(&self.chart_series())
            .context("failed encoding chart series")?;
        std::fs::write(&path, body)
            .with_context(|| format!("failed writing {}", path.display()))?;
        Ok(path)
    }

    /// Chart-ready series: a zero at the start time, then window `i` plotted
    /// at the end of that window.
    pub fn chart_series(&self) -> Vec<ChartSeries> {
        [
            ("Registered", &self.registered),
            ("Placed", &self.placed),
            ("Received", &self.received),
            ("Running", &self.running),
        ]
        .into_iter()
        .map(|(name, values)| ChartSeries {
            name,
            points: self.points(values),
        })
        .collect()
    }

    fn points(&self, values: &[f64]) -> Vec<ChartPoint> {
        let stride_ms = self.stride.as_millis() as i64;
        let mut points = Vec::with_capacity(values.len() + 1);
        points.push(ChartPoint {
            time: self.start_time,
            value: 0.0,
        });
        for (i, value) in values.iter().enumerate() {
            points.push(ChartPoint {
                time: self.start_time + chrono::Duration::milliseconds(stride_ms * (i as i64 + 1)),
                value: *value,
            });
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn at(offset_ms: i64) -> DateTime<Utc> {
        start() + chrono::Duration::milliseconds(offset_ms)
    }

    fn sample_series() -> LifecycleSeries {
        let mut series = LifecycleSeries::new(start());
        series.registered.add(at(100), 3.0);
        series.registered.add(at(200), 3.0);
        series.placed.add(at(1_200), 1.0);
        series.received.add(at(2_500), 1.0);
        series.running.add(at(2_900), 1.0);
        series
    }

    #[test]
    fn test_from_series_uses_cumulative_counts() {
        let report = MetricsReport::from_series(&mut sample_series(), Duration::from_secs(1));
        assert_eq!(report.registered, vec![6.0]);
        assert_eq!(report.placed, vec![0.0, 1.0]);
        assert_eq!(report.received, vec![0.0, 0.0, 1.0]);
        assert_eq!(report.running, vec![0.0, 0.0, 1.0]);
        assert_eq!(report.start_time, start());
    }

    #[test]
    fn test_stride_is_clamped() {
        let report = MetricsReport::from_series(&mut sample_series(), Duration::from_millis(10));
        assert_eq!(report.stride, Duration::from_secs(1));
    }

    #[test]
    fn test_chart_series_prepends_zero() {
        let report = MetricsReport::from_series(&mut sample_series(), Duration::from_secs(1));
        let charts = report.chart_series();

        let names: Vec<_> = charts.iter().map(|s| s.name).collect();
        assert_eq!(names, ["Registered", "Placed", "Received", "Running"]);

        let placed = &charts[1].points;
        assert_eq!(placed.len(), 3);
        assert_eq!(placed[0], ChartPoint { time: start(), value: 0.0 });
        assert_eq!(placed[1].time, at(1_000));
        assert_eq!(placed[2], ChartPoint { time: at(2_000), value: 1.0 });
    }

    #[test]
    fn test_write_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let report = MetricsReport::from_series(&mut sample_series(), Duration::from_secs(1));

        let path = report.write_json(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), RAW_DUMP_FILE);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        for key in ["start_time", "registered", "placed", "received", "running"] {
            assert!(raw.get(key).is_some(), "missing {key}");
        }
        assert!(raw.get("stride").is_none());

        assert_eq!(MetricsReport::read_json(&path).unwrap(), report);
    }

    #[test]
    fn test_write_chart_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = MetricsReport::from_series(&mut sample_series(), Duration::from_secs(1));

        let path = report.write_chart_json(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), CHART_FILE);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let series = raw.as_array().unwrap();
        assert_eq!(series.len(), 4);
        assert_eq!(series[3]["name"], "Running");
        assert_eq!(series[3]["points"].as_array().unwrap().len(), 4);
        assert_eq!(series[3]["points"][0]["value"], 0.0);
    }

    #[test]
    fn test_write_json_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let report = MetricsReport::from_series(&mut sample_series(), Duration::from_secs(1));
        let err = report.write_json(&dir.path().join("absent")).unwrap_err();
        assert!(err.to_string().contains("failed writing"));
    }
}
