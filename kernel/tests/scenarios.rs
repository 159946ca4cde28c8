//! End-to-end conversion scenarios driven entirely through [`arzip_kernel::Converter`],
//! matching the worked examples in this crate's design document: a fresh multi-file
//! conversion, an append onto it, and the three append modes against a pre-seeded
//! store (`replace`/`retain`/`no_overlap`).

use std::sync::Arc;

use arzip_kernel::config::InputConfig;
use arzip_kernel::store::ArrayStore;
use arzip_kernel::{ArzipError, Config, Converter};
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjPath;

fn open_store(path: &std::path::Path) -> ArrayStore {
    let fs = LocalFileSystem::new_with_prefix(path).unwrap();
    ArrayStore::new(Arc::new(fs), ObjPath::from(""))
}

fn base_config(input_paths: Vec<String>, output_path: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.input = InputConfig { paths: input_paths, ..InputConfig::default() };
    config.output.path = Some(output_path.to_string_lossy().into_owned());
    config
}

#[test]
fn scenario_1_three_inputs_sorted_by_path_produce_every_declared_variable() {
    let input_dir = tempfile::tempdir().unwrap();
    let a = arzip_test_utils::write_full_slice(input_dir.path(), "a.json", 0.0, 1, -1, 0.5);
    let b = arzip_test_utils::write_full_slice(input_dir.path(), "b.json", 1000.0, 2, -2, 1.5);
    let c = arzip_test_utils::write_full_slice(input_dir.path(), "c.json", 2000.0, 3, -3, 2.5);

    let output_dir = tempfile::tempdir().unwrap();
    let output_path = output_dir.path().join("out.zarr");
    // Pass the inputs out of path order; `sort_by: path` must restore it.
    let mut config = base_config(vec![c, a, b], &output_path);
    config.input.sort_by = Some("path".to_string());
    config.output.adjust_metadata = true;

    Converter::new(config).unwrap().run().unwrap();

    let store = open_store(&output_path);
    assert_eq!(store.read_coord("time").unwrap(), vec![0.0, 1000.0, 2000.0]);
    let mut names = store.list_variable_names().unwrap();
    names.sort();
    assert_eq!(names, vec!["lat", "lon", "r_f32", "r_i32", "r_ui16", "time"]);
}

#[test]
fn scenario_2_appending_a_fourth_input_extends_the_time_axis() {
    let input_dir = tempfile::tempdir().unwrap();
    let a = arzip_test_utils::write_full_slice(input_dir.path(), "a.json", 0.0, 1, -1, 0.5);
    let b = arzip_test_utils::write_full_slice(input_dir.path(), "b.json", 1000.0, 2, -2, 1.5);

    let output_dir = tempfile::tempdir().unwrap();
    let output_path = output_dir.path().join("out.zarr");
    Converter::new(base_config(vec![a, b], &output_path)).unwrap().run().unwrap();

    let d = arzip_test_utils::write_full_slice(input_dir.path(), "d.json", 3000.0, 4, -4, 3.5);
    let mut config = base_config(vec![d], &output_path);
    config.output.append = true;
    Converter::new(config).unwrap().run().unwrap();

    let store = open_store(&output_path);
    assert_eq!(store.read_coord("time").unwrap(), vec![0.0, 1000.0, 3000.0]);
}

/// Seeds `time = [2001-01-01, 2001-01-02, 2001-01-03, 2001-01-05]` (in days, as
/// small integers standing in for epoch-day offsets) then appends
/// `[2001-01-02, 2001-01-03, 2001-01-04, 2001-01-06]` under the given append mode,
/// returning the resulting time axis for the caller to assert on.
fn run_append_scenario(mode: &str) -> Vec<f64> {
    let output_dir = tempfile::tempdir().unwrap();
    let output_path = output_dir.path().join("out.zarr");
    arzip_test_utils::seed_store(&output_path, &[(1.0, 10), (2.0, 20), (3.0, 30), (5.0, 50)]).unwrap();

    let input_dir = tempfile::tempdir().unwrap();
    let mut paths = Vec::new();
    for (t, v) in [(2.0, 21), (3.0, 31), (4.0, 40), (6.0, 60)] {
        paths.push(arzip_test_utils::write_time_slice(input_dir.path(), &format!("{t}.json"), t, v));
    }

    let mut config = base_config(paths, &output_path);
    config.output.append = true;
    config.output.append_mode = Some(mode.to_string());
    Converter::new(config).unwrap().run().unwrap();

    open_store(&output_path).read_coord("time").unwrap()
}

#[test]
fn scenario_3_replace_overwrites_overlapping_slices_and_appends_new_ones() {
    let time = run_append_scenario("replace");
    assert_eq!(time, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn scenario_4_retain_keeps_existing_slices_on_overlap_and_appends_new_ones() {
    let time = run_append_scenario("retain");
    assert_eq!(time, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn scenario_5_no_overlap_rejects_any_overlapping_slice() {
    let output_dir = tempfile::tempdir().unwrap();
    let output_path = output_dir.path().join("out.zarr");
    arzip_test_utils::seed_store(&output_path, &[(1.0, 10), (2.0, 20), (3.0, 30), (5.0, 50)]).unwrap();

    let input_dir = tempfile::tempdir().unwrap();
    let mut paths = Vec::new();
    for (t, v) in [(2.0, 21), (3.0, 31), (4.0, 40), (6.0, 60)] {
        paths.push(arzip_test_utils::write_time_slice(input_dir.path(), &format!("{t}.json"), t, v));
    }

    let mut config = base_config(paths, &output_path);
    config.output.append = true;
    config.output.append_mode = Some("no_overlap".to_string());
    let err = Converter::new(config).unwrap().run().unwrap_err();
    assert!(matches!(err, ArzipError::AppendOrderViolation(_)));
}
