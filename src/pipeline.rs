/// One input document in, one normalized TCX document out
///
/// The dialect is taken from the root element's default namespace. TCX
/// input is normalized in place; GPX input goes through the format bridge
/// and is written as a fresh TCX document.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{NormalizeOptions, OutputConfig};
use crate::error::{Result, TcxError};
use crate::gpx::{self, FormatBridge};
use crate::normalizer::{Normalization, TrackNormalizer};
use crate::tcx;
use crate::xml::{self, Element};

const TCX_NAMESPACE_MARKER: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase";
const GPX_NAMESPACE_MARKER: &str = "http://www.topografix.com/GPX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Tcx,
    Gpx,
}

impl Dialect {
    pub fn detect(root: &Element) -> Result<Dialect> {
        let namespace = root.default_namespace().unwrap_or_default();
        if namespace.contains(TCX_NAMESPACE_MARKER) {
            Ok(Dialect::Tcx)
        } else if namespace.contains(GPX_NAMESPACE_MARKER) {
            Ok(Dialect::Gpx)
        } else {
            Err(TcxError::UnsupportedFormat(namespace.to_string()))
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dialect::Tcx => "TCX",
            Dialect::Gpx => "GPX",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingReport {
    pub dialect: Dialect,
    pub trackpoints: usize,
    pub distance_meters: f64,
    pub total_time_seconds: f64,
    pub average_speed: f64,
    pub start_date: DateTime<Utc>,
    /// GPX only: length of the recorded coordinates, never used for output
    pub positional_distance_meters: Option<f64>,
}

impl ProcessingReport {
    fn new(dialect: Dialect, normalization: &Normalization, positional: Option<f64>) -> Self {
        ProcessingReport {
            dialect,
            trackpoints: normalization.trackpoint_count,
            distance_meters: normalization.total_distance_meters,
            total_time_seconds: normalization.total_time_seconds,
            average_speed: normalization.average_speed,
            start_date: normalization.start_date,
            positional_distance_meters: positional,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub root: Element,
    pub report: ProcessingReport,
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    bridge: FormatBridge,
}

impl Pipeline {
    pub fn new(config: OutputConfig) -> Self {
        Pipeline {
            bridge: FormatBridge::new(TrackNormalizer::new(config)),
        }
    }

    fn normalizer(&self) -> &TrackNormalizer {
        self.bridge.normalizer()
    }

    pub fn process_document(&self, mut root: Element, options: &NormalizeOptions) -> Result<ProcessedDocument> {
        let dialect = Dialect::detect(&root)?;
        debug!("detected {} document", dialect.label());

        match dialect {
            Dialect::Tcx => {
                let mut track = tcx::read_activity(&root)?;
                let normalization = self.normalizer().normalize(&mut track, options)?;
                tcx::apply_activity(&mut root, &track, self.normalizer().config())?;
                Ok(ProcessedDocument {
                    root,
                    report: ProcessingReport::new(dialect, &normalization, None),
                })
            }
            Dialect::Gpx => {
                let generic = gpx::read_track(&root);
                let bridged = self.bridge.convert(&generic, options)?;
                let root = tcx::build_document(&bridged.track, self.normalizer().config())?;
                Ok(ProcessedDocument {
                    root,
                    report: ProcessingReport::new(
                        dialect,
                        &bridged.normalization,
                        Some(bridged.positional_distance_meters),
                    ),
                })
            }
        }
    }

    pub fn process_bytes(&self, input: &[u8], options: &NormalizeOptions) -> Result<ProcessedDocument> {
        let root = xml::parse(input)?;
        self.process_document(root, options)
    }

    /// Normalizes `input` into `output`. Nothing is written unless the
    /// whole document was produced.
    pub fn process_file(&self, input: &Path, output: &Path, options: &NormalizeOptions) -> Result<ProcessingReport> {
        let bytes = fs::read(input)?;
        let processed = self.process_bytes(&bytes, options)?;
        let rendered = xml::to_bytes(&processed.root)?;
        fs::write(output, rendered)?;

        info!(
            "{} -> {} ({} {} trackpoints)",
            input.display(),
            output.display(),
            processed.report.trackpoints,
            processed.report.dialect.label()
        );
        Ok(processed.report)
    }
}

/// `<stem>-normalized.tcx` next to the input
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "activity".to_string());
    input.with_file_name(format!("{}-normalized.tcx", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn gpx_sample(points: usize) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="watch" xmlns="http://www.topografix.com/GPX/1/1" xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1">
  <metadata><time>2024-05-01T07:00:00Z</time></metadata>
  <trk><name>Tempo</name><trkseg>
"#,
        );
        for i in 0..points {
            xml.push_str(&format!(
                r#"    <trkpt lat="47.{:04}" lon="-122.1200"><ele>30</ele><time>2024-05-01T07:{:02}:00Z</time><extensions><gpxtpx:TrackPointExtension><gpxtpx:hr>{}</gpxtpx:hr></gpxtpx:TrackPointExtension></extensions></trkpt>
"#,
                6600 + i,
                i,
                140 + i
            ));
        }
        xml.push_str("  </trkseg></trk>\n</gpx>\n");
        xml
    }

    const TCX_SAMPLE: &str = r#"<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2">
  <Activities><Activity Sport="Running"><Id>2024-05-01T07:00:00Z</Id>
    <Lap StartTime="2024-05-01T07:00:00Z">
      <TotalTimeSeconds>600</TotalTimeSeconds><DistanceMeters>2000</DistanceMeters>
      <Track>
        <Trackpoint><Time>2024-05-01T07:00:00Z</Time><Position><LatitudeDegrees>1</LatitudeDegrees><LongitudeDegrees>1</LongitudeDegrees></Position></Trackpoint>
        <Trackpoint><Time>2024-05-01T07:04:00Z</Time></Trackpoint>
      </Track>
    </Lap>
  </Activity></Activities>
</TrainingCenterDatabase>"#;

    fn distance(meters: f64) -> NormalizeOptions {
        NormalizeOptions {
            distance_meters: Some(meters),
            ..Default::default()
        }
    }

    #[test]
    fn test_dialect_detection() {
        let tcx_root = Element::new("TrainingCenterDatabase").with_attribute("xmlns", tcx::TCX_NAMESPACE);
        let gpx_root = Element::new("gpx").with_attribute("xmlns", "http://www.topografix.com/GPX/1/0");
        let kml_root = Element::new("kml").with_attribute("xmlns", "http://www.opengis.net/kml/2.2");

        assert_eq!(Dialect::detect(&tcx_root).unwrap(), Dialect::Tcx);
        assert_eq!(Dialect::detect(&gpx_root).unwrap(), Dialect::Gpx);
        assert!(matches!(
            Dialect::detect(&kml_root),
            Err(TcxError::UnsupportedFormat(ns)) if ns.contains("kml")
        ));
        assert!(matches!(
            Dialect::detect(&Element::new("gpx")),
            Err(TcxError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_unsupported_namespace_is_not_a_parse_error() {
        let result = Pipeline::default().process_bytes(
            br#"<kml xmlns="http://www.opengis.net/kml/2.2"><Document/></kml>"#,
            &distance(5000.0),
        );
        assert!(matches!(result, Err(TcxError::UnsupportedFormat(_))));

        let result = Pipeline::default().process_bytes(b"<gpx><trk>", &distance(5000.0));
        assert!(matches!(result, Err(TcxError::Parse(_))));
    }

    #[test]
    fn test_gpx_requires_distance() {
        let result = Pipeline::default().process_bytes(gpx_sample(3).as_bytes(), &NormalizeOptions::default());
        assert!(matches!(result, Err(TcxError::InvalidArgument(_))));
    }

    #[test]
    fn test_gpx_becomes_tcx() {
        let processed = Pipeline::default()
            .process_bytes(gpx_sample(10).as_bytes(), &distance(5000.0))
            .unwrap();

        assert_eq!(processed.report.dialect, Dialect::Gpx);
        assert_eq!(processed.report.trackpoints, 10);
        assert_eq!(processed.report.total_time_seconds, 540.0);
        // Nine legs of 0.0001 degrees of latitude
        let positional = processed.report.positional_distance_meters.unwrap();
        assert!((positional - 100.1).abs() < 2.0, "got {}", positional);

        let root = &processed.root;
        assert_eq!(Dialect::detect(root).unwrap(), Dialect::Tcx);
        assert_eq!(root.find("Notes").unwrap().text(), "Tempo");

        let distances: Vec<f64> = root
            .descendants("Trackpoint")
            .iter()
            .map(|p| p.child("DistanceMeters").unwrap().text().parse().unwrap())
            .collect();
        assert_eq!(distances.len(), 10);
        for (i, d) in distances.iter().enumerate() {
            assert!((d - 500.0 * (i + 1) as f64).abs() <= 0.001);
        }
        assert!(root.find("ele").is_none());
    }

    #[test]
    fn test_tcx_round_trip_report() {
        let start = Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap();
        let options = NormalizeOptions {
            start_date: Some(start),
            ..Default::default()
        };
        let processed = Pipeline::default()
            .process_bytes(TCX_SAMPLE.as_bytes(), &options)
            .unwrap();

        assert_eq!(processed.report.dialect, Dialect::Tcx);
        assert_eq!(processed.report.distance_meters, 2000.0);
        assert_eq!(processed.report.total_time_seconds, 600.0);
        assert_eq!(processed.report.start_date, start);
        assert_eq!(processed.report.positional_distance_meters, None);

        let times: Vec<String> = processed
            .root
            .descendants("Time")
            .iter()
            .map(|t| t.text())
            .collect();
        assert_eq!(times, vec!["2024-05-02T06:00:00Z", "2024-05-02T06:05:00Z"]);
        assert!(processed.root.find("Position").is_none());
    }

    #[test]
    fn test_out_of_range_lap_time_is_an_error() {
        let huge = TCX_SAMPLE.replace(
            "<TotalTimeSeconds>600</TotalTimeSeconds>",
            "<TotalTimeSeconds>1e14</TotalTimeSeconds>",
        );
        let result = Pipeline::default().process_bytes(huge.as_bytes(), &NormalizeOptions::default());
        assert!(matches!(result, Err(TcxError::InvalidArgument(_))));

        let result = Pipeline::default().process_bytes(
            gpx_sample(3).as_bytes(),
            &NormalizeOptions {
                distance_meters: Some(1000.0),
                total_time_seconds: Some(1e300),
                start_date: None,
            },
        );
        assert!(matches!(result, Err(TcxError::InvalidArgument(_))));
    }

    #[test]
    fn test_process_file_writes_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::default();

        let good = dir.path().join("good.tcx");
        fs::write(&good, TCX_SAMPLE).unwrap();
        let good_out = default_output_path(&good);
        let report = pipeline
            .process_file(&good, &good_out, &NormalizeOptions::default())
            .unwrap();
        assert_eq!(report.trackpoints, 2);
        let written = fs::read(&good_out).unwrap();
        assert!(written.starts_with(b"<?xml"));
        assert!(xml::parse(&written).is_ok());

        let bad = dir.path().join("bad.gpx");
        fs::write(&bad, gpx_sample(3)).unwrap();
        let bad_out = default_output_path(&bad);
        let result = pipeline.process_file(&bad, &bad_out, &NormalizeOptions::default());
        assert!(matches!(result, Err(TcxError::InvalidArgument(_))));
        assert!(!bad_out.exists());

        let missing = pipeline.process_file(&dir.path().join("nope.tcx"), &bad_out, &distance(1.0));
        assert!(matches!(missing, Err(TcxError::Io(_))));
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/tmp/runs/lake.gpx")),
            PathBuf::from("/tmp/runs/lake-normalized.tcx")
        );
    }
}
