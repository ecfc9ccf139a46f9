/// Training Center (TCX) documents
///
/// `read_activity` lifts the first activity out of a parsed tree,
/// `apply_activity` writes a normalized activity back into the same tree
/// without disturbing anything it does not own, and `build_document`
/// synthesizes a fresh tree for activities that did not come from TCX.

use tracing::debug;

use crate::config::OutputConfig;
use crate::error::{Result, TcxError};
use crate::model::{
    format_fixed, format_instant, parse_instant, parse_number, ActivityTrack, Trackpoint, DEFAULT_SPORT,
};
use crate::xml::Element;

pub const TCX_NAMESPACE: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2";
pub const ACTIVITY_EXTENSION_NAMESPACE: &str = "http://www.garmin.com/xmlschemas/ActivityExtension/v2";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2 http://www.garmin.com/xmlschemas/TrainingCenterDatabasev2.xsd";

/// Name for a new child of `parent`, reusing the parent's prefix if any
fn qualified(parent: &Element, local: &str) -> String {
    match parent.name.split_once(':') {
        Some((prefix, _)) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    }
}

fn child_text(parent: &Element, local: &str) -> Option<String> {
    parent.child(local).map(|e| e.text())
}

fn child_number(parent: &Element, local: &str) -> Option<f64> {
    parse_number(local, child_text(parent, local).as_deref())
}

/// `Value` wrapped in a heart-rate element, e.g. `HeartRateBpm/Value`
fn heart_rate(parent: &Element, local: &str) -> Option<f64> {
    let value = parent.child(local)?.child("Value")?.text();
    parse_number(local, Some(value.as_str()))
}

fn set_child_text(parent: &mut Element, local: &str, text: String, after: &[&str]) {
    match parent.child_mut(local) {
        Some(child) => child.set_text(text),
        None => {
            let child = Element::new(qualified(parent, local)).with_text(text);
            parent.insert_after(child, after);
        }
    }
}

fn read_trackpoint(element: &Element) -> Trackpoint {
    Trackpoint {
        time: child_text(element, "Time").and_then(|t| parse_instant(&t)),
        distance_meters: child_number(element, "DistanceMeters").unwrap_or_default(),
        heart_rate_bpm: heart_rate(element, "HeartRateBpm").unwrap_or_default(),
    }
}

pub fn read_activity(root: &Element) -> Result<ActivityTrack> {
    let activity = root
        .find("Activity")
        .ok_or_else(|| TcxError::MissingData("TCX document has no Activity".into()))?;

    let mut track = ActivityTrack {
        sport: activity
            .attribute("Sport")
            .unwrap_or(DEFAULT_SPORT)
            .to_string(),
        activity_id: child_text(activity, "Id").unwrap_or_default(),
        notes: child_text(activity, "Notes").filter(|n| !n.is_empty()),
        creator: root.attribute("creator").map(str::to_string),
        trackpoints: activity.descendants("Trackpoint").into_iter().map(read_trackpoint).collect(),
        ..Default::default()
    };

    if let Some(lap) = activity.find("Lap") {
        track.total_time_seconds = child_number(lap, "TotalTimeSeconds");
        track.total_distance_meters = child_number(lap, "DistanceMeters");
        track.maximum_speed = child_number(lap, "MaximumSpeed");
        track.average_heart_rate_bpm = heart_rate(lap, "AverageHeartRateBpm");
        track.maximum_heart_rate_bpm = heart_rate(lap, "MaximumHeartRateBpm");
    }

    debug!(
        "read TCX activity {:?} with {} trackpoints",
        track.activity_id,
        track.trackpoints.len()
    );
    Ok(track)
}

fn speed_extension(trackpoint: &Element, speed: &str) -> Element {
    Element::new(qualified(trackpoint, "Extensions")).with_child(
        Element::new("TPX")
            .with_attribute("xmlns", ACTIVITY_EXTENSION_NAMESPACE)
            .with_child(Element::new("Speed").with_text(speed)),
    )
}

/// Writes a normalized `track` over the first activity in `root`.
///
/// Raw positions and altitudes are stripped document-wide. Each trackpoint
/// gets its time rewritten, its distance replaced and its extensions
/// replaced by a single speed annotation. The first lap's totals, the
/// activity id and the root `creator` attribute are updated.
pub fn apply_activity(root: &mut Element, track: &ActivityTrack, config: &OutputConfig) -> Result<()> {
    let creator = track.creator.clone().unwrap_or_else(|| config.creator.clone());
    root.set_attribute("creator", creator);

    let stripped = root.remove_descendants("Position") + root.remove_descendants("AltitudeMeters");
    if stripped > 0 {
        debug!("stripped {} position/altitude samples", stripped);
    }

    let speed = format_fixed(track.maximum_speed.unwrap_or_default(), config.speed_precision);

    let activity = root
        .find_mut("Activity")
        .ok_or_else(|| TcxError::MissingData("TCX document has no Activity".into()))?;
    set_child_text(activity, "Id", track.activity_id.clone(), &[]);

    if let Some(lap) = activity.find_mut("Lap") {
        if lap.attribute("StartTime").is_some() {
            lap.set_attribute("StartTime", track.activity_id.clone());
        }
        set_child_text(
            lap,
            "TotalTimeSeconds",
            track.total_time_seconds.unwrap_or_default().to_string(),
            &[],
        );
        set_child_text(
            lap,
            "DistanceMeters",
            track.total_distance_meters.unwrap_or_default().to_string(),
            &["TotalTimeSeconds"],
        );
        set_child_text(
            lap,
            "MaximumSpeed",
            speed.clone(),
            &["TotalTimeSeconds", "DistanceMeters"],
        );
    }

    let elements = activity.find_all_mut("Trackpoint");
    if elements.len() != track.trackpoints.len() {
        return Err(TcxError::InvalidArgument(format!(
            "activity has {} trackpoints but document has {}",
            track.trackpoints.len(),
            elements.len()
        )));
    }

    for (element, point) in elements.into_iter().zip(&track.trackpoints) {
        if let Some(time) = point.time {
            set_child_text(element, "Time", format_instant(&time), &[]);
        }

        element.remove_children("DistanceMeters");
        element.remove_children("Extensions");

        let distance = Element::new(qualified(element, "DistanceMeters"))
            .with_text(format_fixed(point.distance_meters, config.distance_precision));
        element.insert_after(distance, &["Time"]);

        let extension = speed_extension(element, &speed);
        element.push(extension);
    }

    Ok(())
}

fn bpm_value(name: &str, bpm: f64) -> Element {
    // Schema type is unsignedByte
    Element::new(name).with_child(Element::new("Value").with_text(format!("{:.0}", bpm)))
}

/// A complete single-lap TCX document for `track`, with the activity's
/// normalized values applied.
pub fn build_document(track: &ActivityTrack, config: &OutputConfig) -> Result<Element> {
    let mut track_element = Element::new("Track");
    for point in &track.trackpoints {
        let mut trackpoint = Element::new("Trackpoint");
        if let Some(time) = point.time {
            trackpoint.push(Element::new("Time").with_text(format_instant(&time)));
        }
        trackpoint.push(
            Element::new("DistanceMeters")
                .with_text(format_fixed(point.distance_meters, config.distance_precision)),
        );
        trackpoint.push(bpm_value("HeartRateBpm", point.heart_rate_bpm));
        track_element.push(trackpoint);
    }

    let lap = Element::new("Lap")
        .with_attribute("StartTime", track.activity_id.clone())
        .with_child(
            Element::new("TotalTimeSeconds")
                .with_text(track.total_time_seconds.unwrap_or_default().to_string()),
        )
        .with_child(
            Element::new("DistanceMeters")
                .with_text(track.total_distance_meters.unwrap_or_default().to_string()),
        )
        .with_child(bpm_value(
            "AverageHeartRateBpm",
            track.average_heart_rate_bpm.unwrap_or_default(),
        ))
        .with_child(bpm_value(
            "MaximumHeartRateBpm",
            track.maximum_heart_rate_bpm.unwrap_or_default(),
        ))
        .with_child(Element::new("Intensity").with_text("Active"))
        .with_child(Element::new("TriggerMethod").with_text("Manual"))
        .with_child(track_element);

    let mut notes = Element::new("Notes");
    notes.set_cdata(track.notes.clone().unwrap_or_default());

    let activity = Element::new("Activity")
        .with_attribute("Sport", track.sport.clone())
        .with_child(Element::new("Id").with_text(track.activity_id.clone()))
        .with_child(lap)
        .with_child(notes);

    let mut root = Element::new("TrainingCenterDatabase")
        .with_attribute("xmlns", TCX_NAMESPACE)
        .with_attribute("xmlns:xsi", XSI_NAMESPACE)
        .with_attribute("xsi:schemaLocation", SCHEMA_LOCATION)
        .with_child(Element::new("Activities").with_child(activity));

    apply_activity(&mut root, track, config)?;
    Ok(root)
}
