/// Track Normalizer
///
/// Rewrites an activity so total distance, total time, per-point timestamps,
/// per-point cumulative distance and average speed agree with each other.
/// Totals are resolved independently: an override wins when positive, then
/// the value stored in the activity, then (for time only) the span between
/// the first and last trackpoint, then zero. Time and distance are then
/// spread linearly across the trackpoints in their original order.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::{positive, NormalizeOptions, OutputConfig};
use crate::error::{Result, TcxError};
use crate::model::{format_instant, parse_instant, round_to, ActivityTrack};

/// Values the normalizer settled on for one track.
///
/// Point times are offset from `start_date` in whole milliseconds, so a
/// `time_between_points` under half a millisecond yields repeated times.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalization {
    pub start_date: DateTime<Utc>,
    pub total_distance_meters: f64,
    pub total_time_seconds: f64,
    /// Meters per second
    pub average_speed: f64,
    pub distance_per_point: f64,
    pub time_between_points: f64,
    pub trackpoint_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TrackNormalizer {
    config: OutputConfig,
}

impl TrackNormalizer {
    pub fn new(config: OutputConfig) -> Self {
        TrackNormalizer { config }
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Fails when the resolved total time would move a point past the
    /// range chrono can represent; `track` is left untouched then.
    pub fn normalize(&self, track: &mut ActivityTrack, options: &NormalizeOptions) -> Result<Normalization> {
        let total_distance = resolve_distance(track, options);
        let total_time = resolve_total_time(track, options);
        let start_date = resolve_start_date(track, options);

        let count = track.trackpoints.len().max(1) as f64;
        let distance_per_point = total_distance / count;
        let time_between_points = total_time / count;
        let average_speed = total_distance / if total_time > 0.0 { total_time } else { 1.0 };

        debug!(
            "normalizing {} trackpoints: {:.3} m over {:.3} s from {}, {:.3} m/s",
            track.trackpoints.len(),
            total_distance,
            total_time,
            format_instant(&start_date),
            average_speed
        );

        // Every offset is at most the total, so checking the end covers all points
        offset_by(start_date, total_time)?;

        for (i, point) in track.trackpoints.iter_mut().enumerate() {
            point.time = Some(offset_by(start_date, i as f64 * time_between_points)?);
            point.distance_meters =
                round_to(distance_per_point * (i + 1) as f64, self.config.distance_precision);
        }

        track.activity_id = format_instant(&start_date);
        track.creator = Some(self.config.creator.clone());
        track.total_distance_meters = Some(total_distance);
        track.total_time_seconds = Some(total_time);
        track.maximum_speed = Some(round_to(average_speed, self.config.speed_precision));

        Ok(Normalization {
            start_date,
            total_distance_meters: total_distance,
            total_time_seconds: total_time,
            average_speed,
            distance_per_point,
            time_between_points,
            trackpoint_count: track.trackpoints.len(),
        })
    }
}

/// `start` moved forward by `seconds`, rounded to the millisecond
fn offset_by(start: DateTime<Utc>, seconds: f64) -> Result<DateTime<Utc>> {
    let out_of_range = || TcxError::InvalidArgument(format!("total time {} s out of range", seconds));

    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(out_of_range());
    }
    Duration::try_milliseconds(millis as i64)
        .and_then(|offset| start.checked_add_signed(offset))
        .ok_or_else(out_of_range)
}

pub fn resolve_distance(track: &ActivityTrack, options: &NormalizeOptions) -> f64 {
    options
        .distance()
        .or_else(|| positive(track.total_distance_meters))
        .unwrap_or(0.0)
}

pub fn resolve_total_time(track: &ActivityTrack, options: &NormalizeOptions) -> f64 {
    options
        .total_time()
        .or_else(|| positive(track.total_time_seconds))
        .or_else(|| positive(track.elapsed_seconds()))
        .unwrap_or(0.0)
}

pub fn resolve_start_date(track: &ActivityTrack, options: &NormalizeOptions) -> DateTime<Utc> {
    options
        .start_date
        .or_else(|| track.trackpoints.first().and_then(|p| p.time))
        .or_else(|| parse_instant(&track.activity_id))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Trackpoint;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap()
    }

    /// Irregularly spaced points with junk distances
    fn track_with(points: usize) -> ActivityTrack {
        let trackpoints = (0..points)
            .map(|i| Trackpoint {
                time: Some(start() + Duration::seconds((i * i) as i64)),
                distance_meters: 17.0 * i as f64,
                heart_rate_bpm: 140.0,
            })
            .collect();
        ActivityTrack {
            activity_id: "2024-05-01T07:00:00Z".to_string(),
            trackpoints,
            ..Default::default()
        }
    }

    fn options(distance: f64, time: f64) -> NormalizeOptions {
        NormalizeOptions {
            distance_meters: Some(distance),
            total_time_seconds: Some(time),
            start_date: None,
        }
    }

    #[test]
    fn test_points_are_spread_linearly() {
        let mut track = track_with(10);
        let result = TrackNormalizer::default().normalize(&mut track, &options(5000.0, 1800.0)).unwrap();

        assert_eq!(result.start_date, start());
        assert_eq!(result.time_between_points, 180.0);
        assert_eq!(result.distance_per_point, 500.0);

        for (i, point) in track.trackpoints.iter().enumerate() {
            assert_eq!(point.time, Some(start() + Duration::seconds(180 * i as i64)));
            assert!((point.distance_meters - 500.0 * (i + 1) as f64).abs() < 1e-9);
            assert_eq!(point.heart_rate_bpm, 140.0);
        }
        let last = track.trackpoints.last().unwrap();
        assert!((last.distance_meters - 5000.0).abs() <= 0.001);
    }

    #[test]
    fn test_document_fields_are_rewritten() {
        let mut track = track_with(4);
        track.maximum_speed = Some(99.0);
        TrackNormalizer::default().normalize(&mut track, &options(1000.0, 400.0)).unwrap();

        assert_eq!(track.activity_id, "2024-05-01T07:00:00Z");
        assert_eq!(track.creator.as_deref(), Some("rust-tcx-normalizer"));
        assert_eq!(track.total_distance_meters, Some(1000.0));
        assert_eq!(track.total_time_seconds, Some(400.0));
        assert_eq!(track.maximum_speed, Some(2.5));
    }

    #[test]
    fn test_uneven_division_rounds_each_point() {
        let mut track = track_with(3);
        TrackNormalizer::default().normalize(&mut track, &options(1000.0, 100.0)).unwrap();

        let distances: Vec<f64> = track.trackpoints.iter().map(|p| p.distance_meters).collect();
        assert_eq!(distances, vec![333.333, 666.667, 1000.0]);

        // 33.333 s spacing keeps millisecond precision
        assert_eq!(
            track.trackpoints[1].time,
            Some(start() + Duration::milliseconds(33_333))
        );
        assert_eq!(track.maximum_speed, Some(10.0));
    }

    #[test]
    fn test_distance_precedence() {
        let mut track = track_with(2);
        track.total_distance_meters = Some(1200.0);

        assert_eq!(resolve_distance(&track, &options(5000.0, 0.0)), 5000.0);
        assert_eq!(resolve_distance(&track, &options(0.0, 0.0)), 1200.0);
        assert_eq!(resolve_distance(&track, &NormalizeOptions::default()), 1200.0);

        track.total_distance_meters = None;
        assert_eq!(resolve_distance(&track, &NormalizeOptions::default()), 0.0);
    }

    #[test]
    fn test_total_time_precedence() {
        // Elapsed span of track_with(5) is 16 s
        let mut track = track_with(5);
        track.total_time_seconds = Some(600.0);

        assert_eq!(resolve_total_time(&track, &options(0.0, 900.0)), 900.0);
        assert_eq!(resolve_total_time(&track, &options(0.0, -1.0)), 600.0);

        track.total_time_seconds = Some(0.0);
        assert_eq!(resolve_total_time(&track, &NormalizeOptions::default()), 16.0);

        track.trackpoints.truncate(1);
        assert_eq!(resolve_total_time(&track, &NormalizeOptions::default()), 0.0);
    }

    #[test]
    fn test_start_date_precedence() {
        let mut track = track_with(3);
        track.trackpoints[0].time = Some(start() + Duration::hours(1));
        let override_start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

        let opts = NormalizeOptions {
            start_date: Some(override_start),
            ..Default::default()
        };
        assert_eq!(resolve_start_date(&track, &opts), override_start);
        assert_eq!(
            resolve_start_date(&track, &NormalizeOptions::default()),
            start() + Duration::hours(1)
        );

        track.trackpoints[0].time = None;
        assert_eq!(resolve_start_date(&track, &NormalizeOptions::default()), start());
    }

    #[test]
    fn test_empty_track_is_safe() {
        let mut track = track_with(0);
        track.total_distance_meters = Some(3000.0);
        let result = TrackNormalizer::default().normalize(&mut track, &NormalizeOptions::default()).unwrap();

        assert!(track.trackpoints.is_empty());
        assert_eq!(result.trackpoint_count, 0);
        assert_eq!(result.total_time_seconds, 0.0);
        assert_eq!(result.distance_per_point, 3000.0);
        assert_eq!(track.total_distance_meters, Some(3000.0));
        assert_eq!(track.total_time_seconds, Some(0.0));
        // No time resolved: speed falls back to distance / 1 s
        assert_eq!(track.maximum_speed, Some(3000.0));
        assert_eq!(track.activity_id, "2024-05-01T07:00:00Z");
    }

    #[test]
    fn test_huge_total_time_is_an_error() {
        let normalizer = TrackNormalizer::default();

        let mut track = track_with(3);
        track.total_time_seconds = Some(1e14);
        let untouched = track.clone();
        let result = normalizer.normalize(&mut track, &NormalizeOptions::default());
        assert!(matches!(result, Err(TcxError::InvalidArgument(_))));
        assert_eq!(track, untouched);

        let mut track = track_with(3);
        let result = normalizer.normalize(&mut track, &options(1000.0, 1e300));
        assert!(matches!(result, Err(TcxError::InvalidArgument(_))));

        // A non-finite override is ignored, leaving the stored time
        let mut track = track_with(3);
        track.total_time_seconds = Some(90.0);
        let result = normalizer.normalize(&mut track, &options(1000.0, f64::INFINITY)).unwrap();
        assert_eq!(result.total_time_seconds, 90.0);
    }

    #[test]
    fn test_sub_millisecond_spacing_repeats_times() {
        let mut track = track_with(3);
        let result = TrackNormalizer::default()
            .normalize(&mut track, &options(3.0, 0.001))
            .unwrap();

        assert!(result.time_between_points < 0.0005);
        let times: Vec<_> = track.trackpoints.iter().map(|p| p.time.unwrap()).collect();
        assert_eq!(times[0], start());
        assert_eq!(times[1], start());
        assert_eq!(times[2], start() + Duration::milliseconds(1));
    }

    #[test]
    fn test_renormalizing_is_stable() {
        let normalizer = TrackNormalizer::default();
        let opts = NormalizeOptions {
            distance_meters: Some(4321.0),
            total_time_seconds: Some(1234.0),
            start_date: Some(start()),
        };

        let mut once = track_with(7);
        normalizer.normalize(&mut once, &opts).unwrap();
        let mut twice = once.clone();
        normalizer.normalize(&mut twice, &opts).unwrap();
        assert_eq!(once, twice);

        let mut without_overrides = once.clone();
        normalizer.normalize(&mut without_overrides, &NormalizeOptions::default()).unwrap();
        assert_eq!(once, without_overrides);
    }

    #[test]
    fn test_custom_precision() {
        let normalizer = TrackNormalizer::new(OutputConfig::source_compatible());
        let mut track = track_with(3);
        normalizer.normalize(&mut track, &options(1000.0, 360.0)).unwrap();

        assert_eq!(track.maximum_speed, Some(2.777778));
        assert_eq!(track.trackpoints[0].distance_meters, 333.333);
    }
}
