//! The `json` input engine: reads a plain-JSON dataset dump. This is the engine used
//! by default when a path's extension does not identify a more specific format, and
//! the one this crate's own tests and fixtures are written in (there being no
//! NetCDF/HDF5 reader in this stack -- see `DESIGN.md`).

use std::fs;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ArzipResult;
use crate::model::{AttrValue, Dataset, Encoding, Variable};
use crate::store::{dtype_from_name, json_to_array};

use super::InputEngine;

#[derive(Debug, Serialize, Deserialize)]
struct JsonDataset {
    #[serde(default)]
    attrs: IndexMap<String, AttrValue>,
    variables: IndexMap<String, JsonVariable>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonVariable {
    dims: Vec<String>,
    shape: Vec<usize>,
    dtype: String,
    data: Vec<serde_json::Value>,
    #[serde(default)]
    attrs: IndexMap<String, AttrValue>,
    #[serde(default)]
    encoding: Encoding,
}

pub struct JsonEngine;

impl InputEngine for JsonEngine {
    fn open(&self, path: &str, _decode_cf: bool) -> ArzipResult<Dataset> {
        let text = fs::read_to_string(path)?;
        let raw: JsonDataset = serde_json::from_str(&text)?;
        let mut ds = Dataset::new();
        ds.attrs = raw.attrs;
        ds.source_path = Some(path.to_string());
        for (name, jv) in raw.variables {
            let dtype = dtype_from_name(&jv.dtype)?;
            let array = json_to_array(&jv.data, &dtype)?;
            let mut var = Variable::new(jv.dims, jv.shape, array);
            var.attrs = jv.attrs;
            var.encoding = jv.encoding;
            ds.insert(name, var);
        }
        Ok(ds)
    }
}
