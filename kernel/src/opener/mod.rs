//! Opens input files into in-memory datasets (spec §4.2).
//!
//! Real scientific file formats (NetCDF, HDF5, GRIB, ...) are read through a
//! pluggable engine, named exactly like xarray's `engine=` keyword argument
//! (`examples/original_source/nc2zarr/opener.py`). This crate ships two built-in
//! engines -- `zarr`, which reads back a store this crate itself produced (the
//! round-trip case), and `json`, a plain-JSON dataset dump used as the default
//! fallback and by this crate's own tests -- and lets an embedding application
//! register others the same way custom hooks are registered (see [`crate::hooks`]).

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use arrow_array::{Array, ArrayRef};
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjPath;
use tracing::info;

use crate::error::{ArzipError, ArzipResult};
use crate::model::{Dataset, Variable};
use crate::store::ArrayStore;

mod json_engine;

pub use json_engine::JsonEngine;

/// A pluggable reader for one input file format.
pub trait InputEngine: Send + Sync {
    fn open(&self, path: &str, decode_cf: bool) -> ArzipResult<Dataset>;
}

type EngineEntry = Arc<dyn InputEngine>;

static ENGINES: LazyLock<RwLock<HashMap<String, EngineEntry>>> = LazyLock::new(|| {
    let mut m: HashMap<String, EngineEntry> = HashMap::new();
    m.insert("zarr".to_string(), Arc::new(ZarrEngine) as EngineEntry);
    m.insert("json".to_string(), Arc::new(JsonEngine) as EngineEntry);
    RwLock::new(m)
});

/// Register an input engine under `name` -- the same string a config's
/// `input.engine` field would reference.
pub fn register_engine(name: impl Into<String>, engine: EngineEntry) {
    ENGINES.write().expect("engine registry poisoned").insert(name.into(), engine);
}

fn sniff_engine_name(path: &str) -> &'static str {
    if path.ends_with(".zarr") {
        "zarr"
    } else {
        "json"
    }
}

fn resolve_engine(explicit: Option<&str>, path: &str) -> ArzipResult<EngineEntry> {
    let name = explicit.map(str::to_string).unwrap_or_else(|| sniff_engine_name(path).to_string());
    ENGINES
        .read()
        .expect("engine registry poisoned")
        .get(&name)
        .cloned()
        .ok_or_else(|| ArzipError::InvalidArgument(format!("unknown input engine {name:?}")))
}

/// The `zarr` engine: reads an existing store this crate produced back in as input,
/// exercising the same code path the original's `flatten.py`/`readzarrtest.py`
/// scripts used to sanity-check a finished archive.
struct ZarrEngine;

impl InputEngine for ZarrEngine {
    fn open(&self, path: &str, _decode_cf: bool) -> ArzipResult<Dataset> {
        let fs = LocalFileSystem::new_with_prefix(path).map_err(|e| ArzipError::StoreIoError(e.to_string()))?;
        let store = ArrayStore::new(Arc::new(fs), ObjPath::from(""));
        store.read_dataset()
    }
}

/// Reads a fixed, ordered list of input files -- resolved upstream by
/// [`crate::path_resolver::PathResolver`] -- one at a time or combined into a single
/// dataset along a concatenation dimension (spec §4.2's "per-file" vs "combined" open
/// modes).
pub struct DatasetOpener {
    files: Vec<String>,
    decode_cf: bool,
    concat_dim: Option<String>,
    engine: Option<String>,
    prefetch_chunks: bool,
}

impl DatasetOpener {
    pub fn new(
        files: Vec<String>,
        decode_cf: bool,
        concat_dim: Option<String>,
        engine: Option<String>,
        prefetch_chunks: bool,
        verbosity: u8,
    ) -> ArzipResult<Self> {
        if files.is_empty() {
            return Err(ArzipError::config("at least one input file must be given"));
        }
        info!(count = files.len(), "input file(s) given");
        if verbosity > 0 {
            for (i, f) in files.iter().enumerate() {
                info!(index = i, file = %f, "input file");
            }
        }
        Ok(Self { files, decode_cf, concat_dim, engine, prefetch_chunks })
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Open every input file individually, in order (the per-file mode used when
    /// `input.multi_file` is false).
    pub fn open_slices(&self) -> ArzipResult<Vec<Dataset>> {
        let n = self.files.len();
        let mut out = Vec::with_capacity(n);
        let mut hints: Option<HashMap<String, usize>> = None;
        for (i, path) in self.files.iter().enumerate() {
            let _span = tracing::info_span!("opening slice", index = i + 1, total = n, path = %path).entered();
            let engine = resolve_engine(self.engine.as_deref(), path)?;
            let mut ds = engine.open(path, self.decode_cf)?;
            ds.source_path = Some(path.clone());
            if self.prefetch_chunks {
                match &hints {
                    Some(h) => apply_chunk_hints(&mut ds, h),
                    None => hints = Some(collect_chunk_hints(&ds)),
                }
            }
            out.push(ds);
        }
        Ok(out)
    }

    /// Open and concatenate every input file into a single dataset along
    /// `concat_dim` (the combined mode used when `input.multi_file` is true).
    pub fn open_combined(&self) -> ArzipResult<Dataset> {
        let dim = self
            .concat_dim
            .clone()
            .ok_or_else(|| ArzipError::MissingConcatDim { dim: "input.concat_dim".to_string() })?;
        let slices = self.open_slices()?;
        concat_datasets(slices, &dim)
    }
}

/// The maximum chunk size seen so far for each dimension name, across every data
/// variable of a dataset that declared chunking (spec §4.2's chunk-prefetch step:
/// open input #0, record `max(chunk_size)` per dimension, thread it into later opens).
fn collect_chunk_hints(ds: &Dataset) -> HashMap<String, usize> {
    let mut hints: HashMap<String, usize> = HashMap::new();
    for var in ds.variables.values() {
        let Some(chunks) = &var.encoding.chunks else { continue };
        for (dim, &size) in var.dims.iter().zip(chunks.iter()) {
            hints.entry(dim.clone()).and_modify(|v| *v = (*v).max(size)).or_insert(size);
        }
    }
    hints
}

fn apply_chunk_hints(ds: &mut Dataset, hints: &HashMap<String, usize>) {
    for var in ds.variables.values_mut() {
        if var.encoding.chunks.is_some() || !var.dims.iter().any(|d| hints.contains_key(d)) {
            continue;
        }
        let chunks = var
            .dims
            .iter()
            .zip(var.shape.iter())
            .map(|(d, &len)| hints.get(d).copied().unwrap_or(len))
            .collect();
        var.encoding.chunks = Some(chunks);
    }
}

/// Concatenate a sequence of datasets along `dim` (the variable's first dimension).
/// Variables that do not carry `dim` are taken from the first dataset unchanged.
///
/// `pub(crate)` so [`crate::writer`] can reuse it to reassemble the slices that survive
/// the `newer` append mode's staleness filter.
pub(crate) fn concat_datasets(mut datasets: Vec<Dataset>, dim: &str) -> ArzipResult<Dataset> {
    let first = datasets.remove(0);
    if datasets.is_empty() {
        return Ok(first);
    }

    let mut result = Dataset::new();
    result.attrs = first.attrs.clone();
    result.source_path = first.source_path.clone();

    for (name, var) in &first.variables {
        if var.dim_index(dim) != Some(0) {
            result.insert(name.clone(), var.clone());
            continue;
        }

        let mut arrays: Vec<ArrayRef> = vec![var.data.clone()];
        let mut total_len = var.shape[0];
        for ds in &datasets {
            let other = ds.get(name).ok_or_else(|| {
                ArzipError::config(format!(
                    "variable {name:?} missing from an input file while concatenating along {dim:?}"
                ))
            })?;
            arrays.push(other.data.clone());
            total_len += other.shape[0];
        }

        let refs: Vec<&dyn Array> = arrays.iter().map(AsRef::as_ref).collect();
        let combined = arrow::compute::concat(&refs).map_err(|e| ArzipError::config(e.to_string()))?;

        let mut shape = var.shape.clone();
        shape[0] = total_len;
        let mut new_var = Variable::new(var.dims.clone(), shape, combined);
        new_var.attrs = var.attrs.clone();
        new_var.encoding = var.encoding.clone();
        result.insert(name.clone(), new_var);
    }

    Ok(result)
}
