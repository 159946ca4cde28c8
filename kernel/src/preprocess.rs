//! Adjusts a single input dataset right after it is opened (spec §4.3): drop
//! unrequested variables, run a custom hook, then make sure the dataset carries the
//! dimension it will eventually be concatenated/appended along, synthesizing a `time`
//! coordinate from metadata or the file name if the file does not already have one.
//!
//! Grounded in `examples/original_source/nc2zarr/preprocessor.py`
//! (`DatasetPreProcessor.preprocess_dataset`) and `nc2zarr/append.py`
//! (`ensure_append_dim`, `get_time_coverage_from_ds`).

use std::collections::HashSet;

use arrow_array::Int64Array;
use tracing::info;

use crate::error::{ArzipError, ArzipResult};
use crate::hooks::Hook;
use crate::model::{array_ref, AttrValue, Dataset, Variable};

pub struct PreProcessor {
    variables: Option<Vec<String>>,
    concat_dim: Option<String>,
    datetime_format: Option<String>,
    custom_preprocessor: Option<Hook>,
    verbosity: u8,
    first_shown: bool,
}

impl PreProcessor {
    pub fn new(
        variables: Option<Vec<String>>,
        concat_dim: Option<String>,
        datetime_format: Option<String>,
        custom_preprocessor: Option<&str>,
        verbosity: u8,
    ) -> ArzipResult<Self> {
        let custom_preprocessor = custom_preprocessor.map(Hook::resolve).transpose()?;
        Ok(Self {
            variables,
            concat_dim,
            datetime_format,
            custom_preprocessor,
            verbosity,
            first_shown: false,
        })
    }

    pub fn process(&mut self, mut ds: Dataset) -> ArzipResult<Dataset> {
        if let Some(keep) = &self.variables {
            let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
            let drop: Vec<String> = ds
                .variables
                .keys()
                .filter(|name| !keep.contains(name.as_str()))
                .cloned()
                .collect();
            for name in drop {
                ds.remove(&name);
            }
        }

        if let Some(hook) = &self.custom_preprocessor {
            ds = hook.apply(ds)?;
        }

        if let Some(dim) = self.concat_dim.clone() {
            ds = ensure_has_dim(ds, &dim, self.datetime_format.as_deref())?;
        }

        if self.verbosity > 0 && !self.first_shown {
            info!(variables = ?ds.variables.keys().collect::<Vec<_>>(), "first input dataset");
            self.first_shown = true;
        }

        Ok(ds)
    }
}

/// Make sure `ds` has `dim` as a dimension, synthesizing it from `time_coverage_start`/
/// `time_coverage_end` attributes or from the source file name if necessary, then
/// expanding every data variable by it if none already carries it.
fn ensure_has_dim(mut ds: Dataset, dim: &str, datetime_format: Option<&str>) -> ArzipResult<Dataset> {
    let already_present = match ds.remove(dim) {
        Some(mut var) if var.dims.is_empty() => {
            // A scalar coordinate: give it the dimension it is named after.
            var.dims = vec![dim.to_string()];
            var.shape = vec![1];
            ds.insert(dim.to_string(), var);
            true
        }
        Some(var) => {
            ds.insert(dim.to_string(), var);
            true
        }
        None => false,
    };

    if !already_present {
        if dim != "time" {
            return Err(ArzipError::MissingConcatDim { dim: dim.to_string() });
        }
        let (start, end) = time_coverage_from_dataset(&ds, datetime_format);
        let (start, end) = match (start, end) {
            (None, None) => return Err(ArzipError::MissingConcatDim { dim: dim.to_string() }),
            (Some(s), None) => (s, s),
            (None, Some(e)) => (e, e),
            (Some(s), Some(e)) => (s, e),
        };
        let start_ms = start.and_utc().timestamp_millis();
        let end_ms = end.and_utc().timestamp_millis();
        let mid_ms = start_ms + (end_ms - start_ms) / 2;

        let mut time_var = Variable::new(vec![dim.to_string()], vec![1], array_ref(Int64Array::from(vec![mid_ms])));
        time_var.attrs.insert("bounds".to_string(), AttrValue::String(format!("{dim}_bnds")));
        ds.insert(dim.to_string(), time_var);

        let bnds_var = Variable::new(
            vec![dim.to_string(), "bnds".to_string()],
            vec![1, 2],
            array_ref(Int64Array::from(vec![start_ms, end_ms])),
        );
        ds.insert(format!("{dim}_bnds"), bnds_var);
    }

    let used_by_data_var = ds.data_var_names().iter().any(|name| {
        ds.get(name).map(|v| v.dims.iter().any(|d| d == dim)).unwrap_or(false)
    });
    if !used_by_data_var {
        for name in ds.data_var_names() {
            if let Some(var) = ds.get_mut(&name) {
                if !var.dims.iter().any(|d| d == dim) {
                    var.dims.insert(0, dim.to_string());
                    var.shape.insert(0, 1);
                }
            }
        }
    }

    Ok(ds)
}

fn time_coverage_from_dataset(
    ds: &Dataset,
    datetime_format: Option<&str>,
) -> (Option<chrono::NaiveDateTime>, Option<chrono::NaiveDateTime>) {
    let start = ds
        .attrs
        .get("time_coverage_start")
        .and_then(AttrValue::as_str)
        .and_then(|s| crate::time::parse_timestamp(s, datetime_format));
    let end = ds
        .attrs
        .get("time_coverage_end")
        .and_then(AttrValue::as_str)
        .and_then(|s| crate::time::parse_timestamp(s, datetime_format));

    if start.is_some() || end.is_some() {
        return (start, end);
    }

    let filename = ds
        .source_path
        .as_deref()
        .and_then(|p| p.rsplit(std::path::MAIN_SEPARATOR).next())
        .unwrap_or_default();
    crate::time::find_two_timestamps(filename)
}
