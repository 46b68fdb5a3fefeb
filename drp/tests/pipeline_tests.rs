use std::path::Path;

use drp::error_stack::ErrorSummary;
use drp::metadata::{
    BASENAME_KEY, CALSTEPS_KEY, EXPTIME_KEY, FILTER_KEY, OBSCLASS_KEY, OBSTYPE_KEY, TARGET_KEY,
    UTCTIME_KEY,
};
use drp::{
    Batch, BinFrameCodec, Error, Frame, FrameCodec, Image, ImageDimensions, Metadata, Pipeline,
    PipelineDefinition, ProcessorRegistry,
};

const NIGHT: &str = "20230601";

fn definition(output_root: &Path, catch_all_errors: bool) -> PipelineDefinition {
    let yaml = format!(
        r#"
name: winter
output_root: {}
catch_all_errors: {}
error_summary: errors.yaml
configurations:
  default:
    - {{ type: load, input_sub_dir: raw }}
    - {{ type: select, filters: {{ OBSTYPE: [SCIENCE] }} }}
    - {{ type: batch, keys: [FILTER] }}
    - {{ type: flat, cache_sub_dir: calibration }}
    - {{ type: save, output_dir_name: flatcal }}
    - {{ type: debatch }}
    - {{ type: csv_log, export_keys: [BASENAME, FILTER, CALSTEPS], output_name: log.csv }}
"#,
        output_root.display(),
        catch_all_errors
    );
    PipelineDefinition::from_yaml(&yaml).unwrap()
}

fn raw_frame(obstype: &str, filter: &str, value: f32) -> Frame {
    let metadata = Metadata::new()
        .with(OBSCLASS_KEY, if obstype == "SCIENCE" { "science" } else { "calibration" })
        .with(TARGET_KEY, if obstype == "SCIENCE" { "m39" } else { "dome" })
        .with(UTCTIME_KEY, "2023-06-01T04:00:00")
        .with(OBSTYPE_KEY, obstype)
        .with(FILTER_KEY, filter)
        .with(EXPTIME_KEY, 30i64);
    Frame::new(Image::filled(ImageDimensions::new(8, 8, 1), value), metadata)
}

fn write_raw(output_root: &Path, night: &str, name: &str, frame: &Frame) {
    let path = output_root
        .join("winter")
        .join(night)
        .join("raw")
        .join(name);
    BinFrameCodec.save(frame, &path).unwrap();
}

fn seed_night(output_root: &Path) {
    // flats from an earlier night
    write_raw(output_root, "20230530", "flat_j_1.frame", &raw_frame("FLAT", "J", 2.0));
    write_raw(output_root, "20230530", "flat_j_2.frame", &raw_frame("FLAT", "J", 4.0));
    write_raw(output_root, "20230530", "flat_j_3.frame", &raw_frame("FLAT", "J", 3.0));

    write_raw(output_root, NIGHT, "sci_002.frame", &raw_frame("SCIENCE", "J", 12.0));
    write_raw(output_root, NIGHT, "sci_001.frame", &raw_frame("SCIENCE", "J", 10.0));
    write_raw(output_root, NIGHT, "sci_003.frame", &raw_frame("SCIENCE", "H", 10.0));
}

#[test]
fn test_reduces_a_night_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    seed_night(dir.path());
    let definition = definition(dir.path(), true);
    let registry = ProcessorRegistry::with_builtins();
    let mut pipeline = Pipeline::new(&definition, None, NIGHT, &registry).unwrap();

    let reduction = pipeline.run(vec![Batch::empty()]).unwrap();
    let night_dir = dir.path().join("winter").join(NIGHT);

    // no H flats in history: the H frame is reported and passes through
    assert_eq!(reduction.error_stack.len(), 1);
    let report = &reduction.error_stack.reports()[0];
    assert_eq!(report.processor, "flat");
    assert_eq!(report.error_type(), "CacheMissError");

    assert_eq!(reduction.batches.len(), 1);
    let frames = reduction.batches[0].frames();
    assert_eq!(frames.len(), 3);
    let steps: Vec<(&str, &str)> = frames
        .iter()
        .map(|frame| {
            (
                frame.metadata.get_str(BASENAME_KEY).unwrap(),
                frame.metadata.get_str(CALSTEPS_KEY).unwrap(),
            )
        })
        .collect();
    assert_eq!(
        steps,
        vec![
            ("sci_001.frame", "flat,"),
            ("sci_002.frame", "flat,"),
            ("sci_003.frame", ""),
        ]
    );
    // flat master is uniform after normalisation
    assert!(frames[0].image.pixels().iter().all(|&v| (v - 10.0).abs() < 1e-5));

    assert!(night_dir.join("calibration/master_flat_J.frame").exists());
    assert!(night_dir.join("flatcal/sci_001.frame").exists());
    assert!(night_dir.join("flatcal/sci_003.frame").exists());

    let log = std::fs::read_to_string(night_dir.join("log.csv")).unwrap();
    assert_eq!(
        log.lines().collect::<Vec<_>>(),
        vec![
            "BASENAME,FILTER,CALSTEPS",
            "sci_001.frame,J,\"flat,\"",
            "sci_002.frame,J,\"flat,\"",
            "sci_003.frame,H,",
        ]
    );

    let summary = read_summary(&night_dir.join("errors.yaml"));
    assert_eq!(summary.total, 1);
    assert_eq!(summary.by_processor.get("flat"), Some(&1));
}

fn read_summary(path: &Path) -> ErrorSummary {
    serde_yml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_second_run_reuses_cached_artifact() {
    let dir = tempfile::tempdir().unwrap();
    seed_night(dir.path());
    let definition = definition(dir.path(), true);
    let registry = ProcessorRegistry::with_builtins();
    let artifact = dir
        .path()
        .join("winter")
        .join(NIGHT)
        .join("calibration/master_flat_J.frame");

    let mut first = Pipeline::new(&definition, None, NIGHT, &registry).unwrap();
    first.run(vec![Batch::empty()]).unwrap();
    let first_bytes = std::fs::read(&artifact).unwrap();

    // removing the history proves the second run never rebuilds
    std::fs::remove_dir_all(dir.path().join("winter").join("20230530")).unwrap();

    let mut second = Pipeline::new(&definition, None, NIGHT, &registry).unwrap();
    let reduction = second.run(vec![Batch::empty()]).unwrap();

    assert_eq!(std::fs::read(&artifact).unwrap(), first_bytes);
    let corrected = reduction.batches[0]
        .frames()
        .iter()
        .filter(|frame| frame.metadata.get_str(CALSTEPS_KEY) == Some("flat,"))
        .count();
    assert_eq!(corrected, 2);
}

#[test]
fn test_fail_fast_aborts_at_first_error() {
    let dir = tempfile::tempdir().unwrap();
    seed_night(dir.path());
    let definition = definition(dir.path(), false);
    let registry = ProcessorRegistry::with_builtins();
    let mut pipeline = Pipeline::new(&definition, None, NIGHT, &registry).unwrap();

    let aborted = pipeline.run(vec![Batch::empty()]).unwrap_err();

    assert_eq!(aborted.error_stack.len(), 1);
    assert!(matches!(aborted.first_error(), Some(Error::CacheMiss { .. })));
    let night_dir = dir.path().join("winter").join(NIGHT);
    // save and csv_log never ran
    assert!(!night_dir.join("log.csv").exists());
    assert!(!night_dir.join("flatcal").exists());
    assert_eq!(read_summary(&night_dir.join("errors.yaml")).total, 1);
}

#[test]
fn test_missing_core_field_is_reported_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut incomplete = raw_frame("SCIENCE", "J", 1.0);
    let fields: Metadata = incomplete
        .metadata
        .iter()
        .filter(|(key, _)| *key != UTCTIME_KEY)
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    incomplete.metadata = fields;
    write_raw(dir.path(), NIGHT, "a.frame", &raw_frame("SCIENCE", "J", 1.0));
    write_raw(dir.path(), NIGHT, "b.frame", &incomplete);

    let definition = PipelineDefinition::from_yaml(&format!(
        "name: winter\noutput_root: {}\nconfigurations:\n  default:\n    - {{ type: load }}\n",
        dir.path().display()
    ))
    .unwrap();
    let registry = ProcessorRegistry::with_builtins();
    let mut pipeline = Pipeline::new(&definition, None, NIGHT, &registry).unwrap();

    let reduction = pipeline
        .reduce(vec![Batch::empty()], None, true)
        .unwrap();
    assert_eq!(reduction.batches.len(), 1);
    let report = &reduction.error_stack.reports()[0];
    assert_eq!(report.batch_index, 1);
    assert!(matches!(
        &report.error,
        Error::MissingField { field, .. } if field == UTCTIME_KEY
    ));
}

#[test]
fn test_unknown_configuration_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let definition = definition(dir.path(), true);
    let registry = ProcessorRegistry::with_builtins();
    assert!(matches!(
        Pipeline::new(&definition, Some("nightly"), NIGHT, &registry),
        Err(Error::UnknownConfiguration(name)) if name == "nightly"
    ));
}
