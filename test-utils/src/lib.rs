//! Fixture builders shared by arzip's test suites: writing `json`-engine input
//! slices (this crate's stand-in for a self-describing scientific array file, see
//! `arzip_kernel::opener::JsonEngine`) and seeding an output store directly, without
//! going through the converter, so append-mode tests can start from a known state.

use std::path::Path;
use std::sync::Arc;

use arzip_kernel::model::{array_ref, AttrValue, Dataset, Variable};
use arzip_kernel::store::ArrayStore;
use arzip_kernel::ArzipResult;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjPath;

/// Writes a minimal one-slice `json`-engine input file with a `time` coordinate and a
/// single data variable `r`, named `<dir>/<name>`. Returns the file's path as a string
/// so it can be handed straight to `input.paths`.
pub fn write_time_slice(dir: &Path, name: &str, time_ms: f64, value: i32) -> String {
    write_time_slice_with_extra(dir, name, time_ms, value, "{}")
}

/// Like [`write_time_slice`], with an extra top-level attributes JSON object spliced
/// in (e.g. `time_coverage_start`/`time_coverage_end` for concat-dim synthesis tests).
pub fn write_time_slice_with_extra(dir: &Path, name: &str, time_ms: f64, value: i32, extra_attrs_json: &str) -> String {
    let path = dir.join(name);
    let text = format!(
        r#"{{"attrs": {extra_attrs_json}, "variables": {{
            "time": {{"dims": ["time"], "shape": [1], "dtype": "f8", "data": [{time_ms}]}},
            "r": {{"dims": ["time"], "shape": [1], "dtype": "i4", "data": [{value}]}}
        }}}}"#
    );
    std::fs::write(&path, text).expect("writing fixture input file");
    path.to_string_lossy().into_owned()
}

/// Writes the scenario-1 style fixture (spec §8 scenario 1): `lon`, `lat`, `time`, and
/// three typed data variables `r_ui16`/`r_i32`/`r_f32`, one slice per call.
pub fn write_full_slice(dir: &Path, name: &str, time_ms: f64, r_ui16: u16, r_i32: i32, r_f32: f32) -> String {
    let path = dir.join(name);
    let text = format!(
        r#"{{"attrs": {{}}, "variables": {{
            "lon": {{"dims": ["lon"], "shape": [2], "dtype": "f4", "data": [1.0, 2.0]}},
            "lat": {{"dims": ["lat"], "shape": [2], "dtype": "f4", "data": [10.0, 20.0]}},
            "time": {{"dims": ["time"], "shape": [1], "dtype": "f8", "data": [{time_ms}]}},
            "r_ui16": {{"dims": ["time"], "shape": [1], "dtype": "u2", "data": [{r_ui16}]}},
            "r_i32": {{"dims": ["time"], "shape": [1], "dtype": "i4", "data": [{r_i32}]}},
            "r_f32": {{"dims": ["time"], "shape": [1], "dtype": "f4", "data": [{r_f32}]}}
        }}}}"#
    );
    std::fs::write(&path, text).expect("writing fixture input file");
    path.to_string_lossy().into_owned()
}

/// Opens a local-filesystem-backed [`ArrayStore`] rooted at `path` (which need not
/// exist yet -- `LocalFileSystem::new_with_prefix` creates it lazily on first write).
pub fn local_store(path: &Path) -> ArzipResult<ArrayStore> {
    let fs = LocalFileSystem::new_with_prefix(path).map_err(|e| arzip_kernel::ArzipError::StoreIoError(e.to_string()))?;
    Ok(ArrayStore::new(Arc::new(fs), ObjPath::from("")))
}

fn one_time_value_dataset(time_ms: f64, value: i32) -> Dataset {
    let mut ds = Dataset::new();
    ds.insert("time", Variable::new(vec!["time".to_string()], vec![1], array_ref(arrow_array::Float64Array::from(vec![time_ms]))));
    ds.insert("r", Variable::new(vec!["time".to_string()], vec![1], array_ref(arrow_array::Int32Array::from(vec![value]))));
    ds
}

/// Seeds a fresh store at `path` with one slice per `(time_ms, value)` pair, written
/// directly through [`ArrayStore::create`]/[`ArrayStore::append`] rather than through
/// the converter pipeline -- used to set up the "existing store" half of append-mode
/// scenarios (spec §8 scenarios 3-5) without depending on the writer under test.
pub fn seed_store(path: &Path, slices: &[(f64, i32)]) -> ArzipResult<ArrayStore> {
    let store = local_store(path)?;
    let mut slices = slices.iter();
    let Some(&(t0, v0)) = slices.next() else {
        return Ok(store);
    };
    store.create(&one_time_value_dataset(t0, v0), &Default::default(), "time")?;
    for &(t, v) in slices {
        store.append(&one_time_value_dataset(t, v), "time")?;
    }
    Ok(store)
}

/// A scalar top-level attribute shorthand for building `output.metadata`-style maps in
/// tests without importing `arzip_kernel::model::AttrValue` directly at every call site.
pub fn string_attr(s: impl Into<String>) -> AttrValue {
    AttrValue::String(s.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_store_builds_a_readable_time_axis() {
        let dir = tempfile::tempdir().unwrap();
        let store = seed_store(&dir.path().join("out.zarr"), &[(0.0, 1), (1000.0, 2), (2000.0, 3)]).unwrap();
        assert_eq!(store.read_coord("time").unwrap(), vec![0.0, 1000.0, 2000.0]);
    }

    #[test]
    fn write_full_slice_round_trips_through_the_json_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_full_slice(dir.path(), "a.json", 0.0, 7, -3, 1.5);
        let ds = arzip_kernel::opener::JsonEngine.open(&path, false).unwrap();
        assert!(ds.get("lon").is_some());
        assert!(ds.get("r_ui16").is_some());
    }
}
