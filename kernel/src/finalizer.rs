//! Runs once after all writes, or standalone on an existing store under
//! `finalize_only` (spec §4.7).
//!
//! The `history`/`source`/`time_coverage_*` bookkeeping mirrors the responsibilities
//! implied for `nc2zarr/writer.py`'s end-of-run finalization step (no single function
//! of that name survives in the retrieved source snapshot; the four-step sequence here
//! is synthesized directly from spec.md §4.7 -- see DESIGN.md).

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::error::{ArzipError, ArzipResult};
use crate::model::AttrValue;
use crate::store::ArrayStore;

/// Extensions treated as "self-describing single-file" inputs for the `source`
/// attribute (spec §4.7 step 1): anything that is not this crate's own store format.
const STORE_EXTENSION: &str = ".zarr";

pub struct FinalizeOptions {
    pub adjust_metadata: bool,
    pub input_paths: Vec<String>,
    pub metadata_overrides: IndexMap<String, AttrValue>,
    pub consolidated: bool,
    pub tool_name: String,
    pub tool_version: String,
}

pub struct Finalizer;

impl Finalizer {
    /// `Finalizer::run` (spec §4.7). Fails `StoreNotFound` if the store is missing --
    /// the only way this is reachable is `finalize_only` on a store that was never
    /// created.
    pub fn run(store: &ArrayStore, opts: &FinalizeOptions) -> ArzipResult<()> {
        if !store.exists()? {
            return Err(ArzipError::StoreNotFound(
                "no output store found to finalize".to_string(),
            ));
        }

        let mut updates: IndexMap<String, AttrValue> = IndexMap::new();
        if opts.adjust_metadata {
            let group = store.read_group_attrs()?;

            let history_line = format!(
                "{} - converted by {}, version {}",
                format_utc(Utc::now().timestamp_millis() as f64),
                opts.tool_name,
                opts.tool_version,
            );
            let existing_history = group.attrs.get("history").and_then(AttrValue::as_str).unwrap_or("");
            let new_history = if existing_history.is_empty() {
                history_line
            } else {
                format!("{existing_history}\n{history_line}")
            };
            updates.insert("history".to_string(), AttrValue::String(new_history));

            let filtered_sources: Vec<&str> = opts
                .input_paths
                .iter()
                .map(String::as_str)
                .filter(|p| !p.ends_with(STORE_EXTENSION))
                .collect();
            if !filtered_sources.is_empty() {
                let existing_source = group.attrs.get("source").and_then(AttrValue::as_str).unwrap_or("");
                let joined = filtered_sources.join(", ");
                let new_source =
                    if existing_source.is_empty() { joined } else { format!("{existing_source}, {joined}") };
                updates.insert("source".to_string(), AttrValue::String(new_source));
            }

            let (start, end) = compute_time_coverage(store)?;
            if let Some(s) = start {
                updates.insert("time_coverage_start".to_string(), AttrValue::String(format_utc(s)));
            }
            if let Some(e) = end {
                updates.insert("time_coverage_end".to_string(), AttrValue::String(format_utc(e)));
            }
        }

        for (key, value) in &opts.metadata_overrides {
            updates.insert(key.clone(), value.clone());
        }

        if !updates.is_empty() {
            let mut group = store.read_group_attrs()?;
            for (key, value) in updates {
                group.attrs.insert(key, value);
            }
            store.write_group_attrs(&group)?;
        }

        if opts.consolidated || store.is_consolidated() {
            store.consolidate()?;
        }

        Ok(())
    }
}

/// Reads `time`/`time_bnds` back from the store (spec §4.7 step 1's
/// `time_coverage_start/end` rule): a `bounds`-attributed `(N,2)` variable's first
/// lower and last upper value, or `time[0]`/`time[-1]` if there is no such variable.
fn compute_time_coverage(store: &ArrayStore) -> ArzipResult<(Option<f64>, Option<f64>)> {
    let ds = store.read_dataset()?;
    let Some(time_var) = ds.get("time") else {
        return Ok((None, None));
    };

    if let Some(bounds_name) = time_var.attrs.get("bounds").and_then(AttrValue::as_str) {
        if let Some(bounds_var) = ds.get(bounds_name) {
            let values = crate::store::array_to_json(&bounds_var.data)?;
            let values: Vec<f64> = values.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect();
            if values.len() >= 2 {
                return Ok((Some(values[0]), Some(values[values.len() - 1])));
            }
        }
    }

    let values = crate::store::array_to_json(&time_var.data)?;
    let values: Vec<f64> = values.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect();
    Ok((values.first().copied(), values.last().copied()))
}

/// Format an epoch-millisecond value as UTC `YYYY-MM-DD HH:MM:SS` (spec §4.7).
fn format_utc(epoch_ms: f64) -> String {
    DateTime::from_timestamp_millis(epoch_ms as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{array_ref, Dataset, Encoding, Variable};
    use arrow_array::Int64Array;
    use object_store::memory::InMemory;
    use object_store::path::Path as ObjPath;
    use std::sync::Arc;

    fn store_with_time_bnds() -> ArrayStore {
        let store = ArrayStore::new(Arc::new(InMemory::new()), ObjPath::from("out.zarr"));
        let mut ds = Dataset::new();
        let mut time = Variable::new(vec!["time".to_string()], vec![1], array_ref(Int64Array::from(vec![500_i64])));
        time.attrs.insert("bounds".to_string(), AttrValue::String("time_bnds".to_string()));
        ds.insert("time", time);
        ds.insert(
            "time_bnds",
            Variable::new(
                vec!["time".to_string(), "bnds".to_string()],
                vec![1, 2],
                array_ref(Int64Array::from(vec![0_i64, 1000_i64])),
            ),
        );
        let mut encodings = IndexMap::new();
        encodings.insert("time".to_string(), Encoding::default());
        encodings.insert("time_bnds".to_string(), Encoding::default());
        store.create(&ds, &encodings, "time").unwrap();
        store
    }

    fn base_options() -> FinalizeOptions {
        FinalizeOptions {
            adjust_metadata: true,
            input_paths: vec!["input-01.nc".to_string(), "input-02.nc".to_string()],
            metadata_overrides: IndexMap::new(),
            consolidated: false,
            tool_name: "arzip".to_string(),
            tool_version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn missing_store_is_rejected() {
        let store = ArrayStore::new(Arc::new(InMemory::new()), ObjPath::from("out.zarr"));
        let err = Finalizer::run(&store, &base_options()).unwrap_err();
        assert!(matches!(err, ArzipError::StoreNotFound(_)));
    }

    #[test]
    fn adjust_metadata_uses_time_bounds_not_time_itself() {
        let store = store_with_time_bnds();
        Finalizer::run(&store, &base_options()).unwrap();
        let group = store.read_group_attrs().unwrap();
        assert_eq!(group.attrs.get("time_coverage_start").and_then(AttrValue::as_str), Some("1970-01-01 00:00:00"));
        assert_eq!(group.attrs.get("time_coverage_end").and_then(AttrValue::as_str), Some("1970-01-01 00:00:01"));
        assert!(group.attrs.get("source").and_then(AttrValue::as_str).unwrap().contains("input-01.nc"));
        assert!(group.attrs.get("history").is_some());
    }

    #[test]
    fn user_metadata_override_wins() {
        let store = store_with_time_bnds();
        let mut opts = base_options();
        opts.metadata_overrides.insert("title".to_string(), AttrValue::String("archive".to_string()));
        opts.metadata_overrides.insert("time_coverage_start".to_string(), AttrValue::String("overridden".to_string()));
        Finalizer::run(&store, &opts).unwrap();
        let group = store.read_group_attrs().unwrap();
        assert_eq!(group.attrs.get("title").and_then(AttrValue::as_str), Some("archive"));
        assert_eq!(group.attrs.get("time_coverage_start").and_then(AttrValue::as_str), Some("overridden"));
    }

    #[test]
    fn consolidates_when_requested() {
        let store = store_with_time_bnds();
        let mut opts = base_options();
        opts.consolidated = true;
        Finalizer::run(&store, &opts).unwrap();
        assert!(store.is_consolidated());
    }
}
