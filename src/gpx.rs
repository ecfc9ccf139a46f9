/// GPX tracks and the bridge into the canonical activity
///
/// A GPX track carries waypoints with times and optional heart rate, but no
/// trustworthy total distance. The bridge therefore requires a distance
/// override, builds a single-lap running activity from the first track
/// segment and then runs the same normalizer used for TCX input.

use chrono::{DateTime, Utc};
use geo::{point, Point};
use tracing::{debug, info};

use crate::config::NormalizeOptions;
use crate::error::{Result, TcxError};
use crate::geodesy::{path_distance, DistanceUnit};
use crate::model::{
    format_instant, parse_instant, parse_number, ActivityTrack, Trackpoint, DEFAULT_NOTES, DEFAULT_SPORT,
};
use crate::normalizer::{Normalization, TrackNormalizer};
use crate::xml::Element;

#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    /// `point!(x: lon, y: lat)`; (0, 0) when the fix is missing
    pub position: Point<f64>,
    pub time: Option<DateTime<Utc>>,
    pub heart_rate_bpm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenericTrack {
    pub metadata_time: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub waypoints: Vec<Waypoint>,
}

impl GenericTrack {
    /// Length of the recorded path. Informational only: output distances
    /// always come from the override.
    pub fn positional_distance_meters(&self) -> f64 {
        let positions: Vec<Point<f64>> = self.waypoints.iter().map(|w| w.position).collect();
        path_distance(&positions, DistanceUnit::Meters)
    }
}

fn read_waypoint(element: &Element) -> Waypoint {
    let lat = parse_number("lat", element.attribute("lat")).unwrap_or_default();
    let lon = parse_number("lon", element.attribute("lon")).unwrap_or_default();

    let heart_rate_bpm = element
        .child("extensions")
        .and_then(|extensions| extensions.find("hr"))
        .and_then(|hr| parse_number("hr", Some(hr.text().as_str())));

    Waypoint {
        position: point!(x: lon, y: lat),
        time: element.child("time").and_then(|t| parse_instant(&t.text())),
        heart_rate_bpm,
    }
}

/// The first track segment of a GPX document
pub fn read_track(root: &Element) -> GenericTrack {
    let metadata_time = root
        .child("metadata")
        .and_then(|metadata| metadata.child("time"))
        .and_then(|time| parse_instant(&time.text()));

    let track = root.child("trk");
    let name = track
        .and_then(|trk| trk.child("name"))
        .map(|name| name.text())
        .filter(|name| !name.is_empty());

    let waypoints = track
        .and_then(|trk| trk.child("trkseg"))
        .map(|segment| segment.children_named("trkpt").map(read_waypoint).collect())
        .unwrap_or_default();

    GenericTrack {
        metadata_time,
        name,
        waypoints,
    }
}

/// An activity produced from a GPX track, already normalized
#[derive(Debug, Clone)]
pub struct BridgedActivity {
    pub track: ActivityTrack,
    pub normalization: Normalization,
    pub positional_distance_meters: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FormatBridge {
    normalizer: TrackNormalizer,
}

impl FormatBridge {
    pub fn new(normalizer: TrackNormalizer) -> Self {
        FormatBridge { normalizer }
    }

    pub fn normalizer(&self) -> &TrackNormalizer {
        &self.normalizer
    }

    /// Maps waypoints onto a single-lap activity without normalizing it.
    /// Each trackpoint starts with the same placeholder distance of
    /// `distance / count`.
    pub fn to_activity(&self, generic: &GenericTrack, options: &NormalizeOptions) -> Result<ActivityTrack> {
        let distance = options.distance().ok_or_else(|| {
            TcxError::InvalidArgument("converting GPX requires a positive distance override".into())
        })?;

        let (first, last) = match (generic.waypoints.first(), generic.waypoints.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(TcxError::MissingData("GPX track has no waypoints".into())),
        };
        let start = first
            .time
            .ok_or_else(|| TcxError::MissingData("first GPX waypoint has no time".into()))?;
        let end = last
            .time
            .ok_or_else(|| TcxError::MissingData("last GPX waypoint has no time".into()))?;

        let total_time = options
            .total_time()
            .unwrap_or_else(|| (end - start).num_milliseconds() as f64 / 1000.0);

        let count = generic.waypoints.len() as f64;
        let heart_rates: Vec<f64> = generic
            .waypoints
            .iter()
            .map(|w| w.heart_rate_bpm.unwrap_or_default())
            .collect();
        let average_heart_rate = heart_rates.iter().sum::<f64>() / count;
        let maximum_heart_rate = heart_rates.iter().cloned().fold(0.0, f64::max);

        let placeholder_distance = distance / count;
        let trackpoints = generic
            .waypoints
            .iter()
            .zip(&heart_rates)
            .map(|(waypoint, &heart_rate_bpm)| Trackpoint {
                time: waypoint.time,
                distance_meters: placeholder_distance,
                heart_rate_bpm,
            })
            .collect();

        Ok(ActivityTrack {
            sport: DEFAULT_SPORT.to_string(),
            activity_id: format_instant(&generic.metadata_time.unwrap_or_else(Utc::now)),
            notes: Some(generic.name.clone().unwrap_or_else(|| DEFAULT_NOTES.to_string())),
            creator: None,
            total_time_seconds: Some(total_time),
            total_distance_meters: Some(distance),
            maximum_speed: None,
            average_heart_rate_bpm: Some(average_heart_rate),
            maximum_heart_rate_bpm: Some(maximum_heart_rate),
            trackpoints,
        })
    }

    pub fn convert(&self, generic: &GenericTrack, options: &NormalizeOptions) -> Result<BridgedActivity> {
        let mut track = self.to_activity(generic, options)?;

        let positional_distance_meters = generic.positional_distance_meters();
        if positional_distance_meters > 0.0 {
            info!(
                "GPX positions span {:.0} m; output uses the {:.0} m override, not position-derived distance",
                positional_distance_meters,
                track.total_distance_meters.unwrap_or_default()
            );
        }

        let normalization = self.normalizer.normalize(&mut track, options)?;
        debug!(
            "bridged {} GPX waypoints into a {:.0} s activity",
            normalization.trackpoint_count, normalization.total_time_seconds
        );

        Ok(BridgedActivity {
            track,
            normalization,
            positional_distance_meters,
        })
    }
}
