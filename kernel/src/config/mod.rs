//! Nested YAML configuration model (spec §6). Recognized top-level keys: `input`,
//! `process`, `output`, `dry_run`, `verbosity`, `finalize_only`.
//!
//! Grounded in `examples/other_examples/…sui-analytics-indexer…config.rs.rs`'s
//! serde-derived, `#[serde(default = "...")]`-heavy config structs, and in
//! `examples/original_source/nc2zarr/config.py` for load/merge semantics.

mod merge;

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ArzipError, ArzipResult};
use crate::model::{AttrValue, Encoding};

pub use merge::merge_configs;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub verbosity: u8,
    #[serde(default)]
    pub finalize_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub multi_file: bool,
    pub concat_dim: Option<String>,
    pub engine: Option<String>,
    #[serde(default)]
    pub decode_cf: bool,
    pub sort_by: Option<String>,
    pub variables: Option<Vec<String>>,
    pub datetime_format: Option<String>,
    pub custom_preprocessor: Option<String>,
    #[serde(default)]
    pub prefetch_chunks: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfig {
    /// An `IndexMap`, not a `HashMap`: declaration order must survive deserialization
    /// so that applying renames in that order is reproducible (spec §8 idempotence).
    #[serde(default)]
    pub rename: IndexMap<String, String>,
    pub custom_processor: Option<String>,
    /// `{ "*": default_dim_chunks, "<var>": override }` -- see [`crate::process`].
    #[serde(default)]
    pub rechunk: IndexMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_tries")]
    pub tries: u32,
    #[serde(default = "default_delay")]
    pub delay: f64,
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    pub max_delay: Option<f64>,
    #[serde(default)]
    pub jitter: f64,
}

fn default_tries() -> u32 {
    1
}
fn default_delay() -> f64 {
    0.0
}
fn default_backoff() -> f64 {
    1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            tries: default_tries(),
            delay: default_delay(),
            backoff: default_backoff(),
            max_delay: None,
            jitter: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    pub key: Option<String>,
    pub secret: Option<String>,
    pub endpoint_url: Option<String>,
    pub region_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub path: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub append: bool,
    pub append_dim: Option<String>,
    /// `all | no_overlap | newer | replace | retain`, see [`crate::writer::AppendMode`].
    pub append_mode: Option<String>,
    #[serde(default)]
    pub adjust_metadata: bool,
    /// `IndexMap`s, not `HashMap`s: these flow into the store's root/per-variable
    /// `.zattrs` in declaration order, and a `HashMap`'s per-process-randomized
    /// iteration order would make two runs of the same config emit byte-different
    /// stores, violating spec §8's idempotence property.
    #[serde(default)]
    pub metadata: IndexMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub encoding: IndexMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub consolidated: bool,
    pub custom_postprocessor: Option<String>,
    pub s3: Option<S3Config>,
    #[serde(default)]
    pub retry: RetryConfig,
}

pub const DEFAULT_OUTPUT_PATH: &str = "out.zarr";
pub const DEFAULT_APPEND_DIM: &str = "time";

impl Config {
    /// Load and recursively merge multiple YAML config files in order (later files
    /// merge over earlier ones: maps merge key-by-key, lists concatenate, scalars
    /// overwrite -- spec §6 "Loading policy").
    pub fn load_and_merge(paths: &[impl AsRef<Path>]) -> ArzipResult<serde_yaml::Value> {
        let mut effective = serde_yaml::Value::Mapping(Default::default());
        for path in paths {
            let text = std::fs::read_to_string(path).map_err(|e| {
                ArzipError::config(format!(
                    "configuration not found: {}: {e}",
                    path.as_ref().display()
                ))
            })?;
            let value: serde_yaml::Value = serde_yaml::from_str(&text)?;
            effective = merge_configs(&effective, &value);
        }
        Ok(effective)
    }

    pub fn from_value(value: serde_yaml::Value) -> ArzipResult<Config> {
        Ok(serde_yaml::from_value(value)?)
    }

    /// Validate option combinations independent of the converter (spec §4.8,
    /// performed again by `Converter::new` as the authoritative check).
    pub fn validate(&self) -> ArzipResult<()> {
        if self.output.overwrite && self.output.append {
            return Err(ArzipError::OverwriteAndAppend);
        }
        Ok(())
    }
}

/// Convert a `metadata:`/`output.metadata` YAML map into the crate's own attribute
/// type. Scalars and lists of scalars only -- the stores this crate writes have no
/// nested-mapping attribute values, matching `.zattrs`'s own flat JSON convention.
pub fn attrs_from_yaml_map(map: &IndexMap<String, serde_yaml::Value>) -> ArzipResult<IndexMap<String, AttrValue>> {
    let mut out = IndexMap::new();
    for (key, value) in map {
        out.insert(key.clone(), attr_value_from_yaml(key, value)?);
    }
    Ok(out)
}

fn attr_value_from_yaml(key: &str, value: &serde_yaml::Value) -> ArzipResult<AttrValue> {
    match value {
        serde_yaml::Value::String(s) => Ok(AttrValue::String(s.clone())),
        serde_yaml::Value::Bool(b) => Ok(AttrValue::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(AttrValue::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(AttrValue::Float(f))
            } else {
                Err(ArzipError::config(format!("unsupported numeric metadata value for {key:?}")))
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            let items = seq.iter().map(|item| attr_value_from_yaml(key, item)).collect::<ArzipResult<Vec<_>>>()?;
            Ok(AttrValue::List(items))
        }
        other => Err(ArzipError::config(format!("unsupported metadata value for {key:?}: {other:?}"))),
    }
}

/// Convert an `output.encoding:` YAML map into per-variable [`Encoding`] overrides
/// (spec §4.4's "explicit encoding wins over inferred encoding" rule).
pub fn encoding_from_yaml_map(map: &IndexMap<String, serde_yaml::Value>) -> ArzipResult<IndexMap<String, Encoding>> {
    let mut out = IndexMap::new();
    for (key, value) in map {
        let encoding: Encoding = serde_yaml::from_value(value.clone())?;
        out.insert(key.clone(), encoding);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
input:
  paths: ["a.nc", "b.nc"]
output:
  path: out.zarr
"#;
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let config = Config::from_value(value).unwrap();
        assert_eq!(config.input.paths, vec!["a.nc".to_string(), "b.nc".to_string()]);
        assert_eq!(config.output.path.as_deref(), Some("out.zarr"));
    }

    #[test]
    fn rejects_overwrite_and_append() {
        let mut config = Config::default();
        config.output.overwrite = true;
        config.output.append = true;
        assert!(matches!(config.validate(), Err(ArzipError::OverwriteAndAppend)));
    }

    #[test]
    fn attrs_from_yaml_map_converts_scalars_and_lists() {
        let mut map = IndexMap::new();
        map.insert("title".to_string(), serde_yaml::Value::String("archive".to_string()));
        map.insert("version".to_string(), serde_yaml::from_str("3").unwrap());
        map.insert("tags".to_string(), serde_yaml::from_str("[a, b]").unwrap());
        let attrs = attrs_from_yaml_map(&map).unwrap();
        assert_eq!(attrs.get("title").and_then(AttrValue::as_str), Some("archive"));
        assert_eq!(attrs.get("version").and_then(AttrValue::as_i64), Some(3));
        assert!(matches!(attrs.get("tags"), Some(AttrValue::List(items)) if items.len() == 2));
    }

    #[test]
    fn attrs_from_yaml_map_preserves_declaration_order() {
        let mut map = IndexMap::new();
        map.insert("z_first".to_string(), serde_yaml::Value::Bool(true));
        map.insert("a_second".to_string(), serde_yaml::Value::Bool(false));
        let attrs = attrs_from_yaml_map(&map).unwrap();
        assert_eq!(attrs.keys().collect::<Vec<_>>(), vec!["z_first", "a_second"]);
    }

    #[test]
    fn encoding_from_yaml_map_parses_chunks() {
        let mut map = IndexMap::new();
        map.insert("temp".to_string(), serde_yaml::from_str("{chunks: [1, 10, 10]}").unwrap());
        let encodings = encoding_from_yaml_map(&map).unwrap();
        assert_eq!(encodings.get("temp").unwrap().chunks, Some(vec![1, 10, 10]));
    }
}
