//! Linear growth-rate extrapolation over stored snapshot history.
//!
//! Ordinary least squares over `(seconds, value)` pairs. No smoothing, no
//! seasonality: a straight line through the recent readings.

use std::time::Duration;

use serde::Serialize;

use autopilot_core::MetricSnapshot;

/// Fitted line for one metric of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub metric: String,
    /// Number of snapshots that carried the metric.
    pub samples: usize,
    /// Slope in metric units per second.
    pub growth_per_sec: f64,
    /// Value of the fitted line at `latest_timestamp`.
    pub latest_value: f64,
    pub latest_timestamp: u64,
}

/// A trend evaluated at a horizon, as served by the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub target_id: String,
    pub trend: Trend,
    pub horizon_secs: u64,
    pub projected_value: f64,
    /// Seconds until the line crosses `threshold`, when one was asked for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secs_to_threshold: Option<u64>,
}

impl Trend {
    /// Fitted value `horizon` after the latest sample.
    pub fn project(&self, horizon: Duration) -> f64 {
        self.latest_value + self.growth_per_sec * horizon.as_secs_f64()
    }

    /// Time from the latest sample until the line reaches `threshold`.
    ///
    /// `None` when the line is flat or the crossing is too far out to
    /// represent. Zero when the fitted value has already passed it in the
    /// direction of travel.
    pub fn time_to_threshold(&self, threshold: f64) -> Option<Duration> {
        if self.growth_per_sec == 0.0 {
            return None;
        }
        let secs = (threshold - self.latest_value) / self.growth_per_sec;
        if secs.is_nan() {
            return None;
        }
        Duration::try_from_secs_f64(secs.max(0.0)).ok()
    }

    pub fn projection(
        &self,
        target_id: &str,
        horizon: Duration,
        threshold: Option<f64>,
    ) -> Projection {
        Projection {
            target_id: target_id.to_string(),
            trend: self.clone(),
            horizon_secs: horizon.as_secs(),
            projected_value: self.project(horizon),
            threshold,
            secs_to_threshold: threshold
                .and_then(|t| self.time_to_threshold(t))
                .map(|d| d.as_secs()),
        }
    }
}

/// Fit a line through `metric` across `snapshots`.
///
/// Snapshots without the metric are skipped. Needs at least two samples at
/// distinct timestamps.
pub fn linear_trend(snapshots: &[MetricSnapshot], metric: &str) -> Option<Trend> {
    let points: Vec<(u64, f64)> = snapshots
        .iter()
        .filter_map(|s| s.reading(metric).map(|v| (s.timestamp, v)))
        .collect();
    if points.len() < 2 {
        return None;
    }

    let origin = points.iter().map(|(t, _)| *t).min()?;
    let latest_timestamp = points.iter().map(|(t, _)| *t).max()?;
    if origin == latest_timestamp {
        return None;
    }

    let n = points.len() as f64;
    let xs = points
        .iter()
        .map(|(t, v)| ((t - origin) as f64 / 1000.0, *v));
    let (sum_x, sum_y) = xs.clone().fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
    let (mean_x, mean_y) = (sum_x / n, sum_y / n);
    let (sxy, sxx) = xs.fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
        let dx = x - mean_x;
        (sxy + dx * (y - mean_y), sxx + dx * dx)
    });

    let slope = sxy / sxx;
    let latest_x = (latest_timestamp - origin) as f64 / 1000.0;
    Some(Trend {
        metric: metric.to_string(),
        samples: points.len(),
        growth_per_sec: slope,
        latest_value: mean_y + slope * (latest_x - mean_x),
        latest_timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[(u64, f64)]) -> Vec<MetricSnapshot> {
        values
            .iter()
            .map(|(ts, v)| MetricSnapshot::new("web", *ts).with_reading("cpu", *v))
            .collect()
    }

    #[test]
    fn fits_a_straight_line() {
        // +1 per second.
        let snaps = series(&[(0, 10.0), (1_000, 11.0), (2_000, 12.0), (3_000, 13.0)]);
        let trend = linear_trend(&snaps, "cpu").unwrap();

        assert_eq!(trend.samples, 4);
        assert!((trend.growth_per_sec - 1.0).abs() < 1e-9);
        assert!((trend.latest_value - 13.0).abs() < 1e-9);
        assert!((trend.project(Duration::from_secs(60)) - 73.0).abs() < 1e-9);
    }

    #[test]
    fn time_to_threshold_follows_direction() {
        let rising = linear_trend(&series(&[(0, 50.0), (10_000, 60.0)]), "cpu").unwrap();
        assert_eq!(rising.time_to_threshold(85.0), Some(Duration::from_secs(25)));
        assert_eq!(rising.time_to_threshold(55.0), Some(Duration::ZERO));

        let falling = linear_trend(&series(&[(0, 60.0), (10_000, 50.0)]), "cpu").unwrap();
        assert_eq!(falling.time_to_threshold(20.0), Some(Duration::from_secs(30)));
        assert_eq!(falling.time_to_threshold(70.0), Some(Duration::ZERO));

        let flat = linear_trend(&series(&[(0, 50.0), (10_000, 50.0)]), "cpu").unwrap();
        assert_eq!(flat.time_to_threshold(85.0), None);
    }

    #[test]
    fn needs_two_distinct_timestamps() {
        assert!(linear_trend(&series(&[(0, 1.0)]), "cpu").is_none());
        assert!(linear_trend(&series(&[(5, 1.0), (5, 2.0)]), "cpu").is_none());
        assert!(linear_trend(&series(&[(0, 1.0), (1_000, 2.0)]), "memory").is_none());
    }

    #[test]
    fn skips_snapshots_without_the_metric() {
        let mut snaps = series(&[(0, 10.0), (2_000, 14.0)]);
        snaps.insert(1, MetricSnapshot::new("web", 1_000).with_reading("memory", 99.0));
        let trend = linear_trend(&snaps, "cpu").unwrap();
        assert_eq!(trend.samples, 2);
        assert!((trend.growth_per_sec - 2.0).abs() < 1e-9);
    }

    #[test]
    fn projection_reports_crossing() {
        let trend = linear_trend(&series(&[(0, 50.0), (10_000, 60.0)]), "cpu").unwrap();
        let p = trend.projection("web", Duration::from_secs(30), Some(85.0));
        assert!((p.projected_value - 90.0).abs() < 1e-9);
        assert_eq!(p.secs_to_threshold, Some(25));
    }

    #[test]
    fn unreachable_threshold_has_no_crossing() {
        let trend = linear_trend(&series(&[(0, 50.0), (10_000, 60.0)]), "cpu").unwrap();
        assert_eq!(trend.time_to_threshold(1e30), None);
        assert_eq!(trend.time_to_threshold(f64::INFINITY), None);
        assert_eq!(trend.time_to_threshold(f64::NAN), None);

        let p = trend.projection("web", Duration::from_secs(30), Some(1e30));
        assert_eq!(p.secs_to_threshold, None);
    }
}
