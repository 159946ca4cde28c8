//! Cartesian-product expansion of `-R key min max` / `-V key value` into a sequence of
//! `${name}` template variable maps, and `${name}` substitution into template text.
//!
//! Grounded in `examples/original_source/nc2zarr/cli.py`'s
//! `expand_config_template_variables` and the `TemplateBatch._write_config_files`
//! substitution loop (spec §6 `tool-batch` grammar).

use indexmap::IndexMap;

/// One `-R key min max` assignment: an inclusive integer range.
#[derive(Debug, Clone)]
pub struct RangeArg {
    pub key: String,
    pub min: i64,
    pub max: i64,
}

/// One `-V key value` assignment: a single literal value.
#[derive(Debug, Clone)]
pub struct ValueArg {
    pub key: String,
    pub value: String,
}

/// Computes the Cartesian product of all `-R` ranges and `-V` values, preserving
/// range keys before value keys (matching the Python `keys = range_keys + value_keys`
/// ordering). An empty input list yields an empty list of variable maps (batch of
/// zero jobs), matching the original's `itertools.product` over no iterators.
pub fn expand_variables(ranges: &[RangeArg], values: &[ValueArg]) -> Vec<IndexMap<String, String>> {
    if ranges.is_empty() && values.is_empty() {
        return Vec::new();
    }

    let mut axes: Vec<(String, Vec<String>)> = Vec::new();
    for r in ranges {
        let axis = (r.min..=r.max).map(|v| v.to_string()).collect();
        axes.push((r.key.clone(), axis));
    }
    for v in values {
        axes.push((v.key.clone(), vec![v.value.clone()]));
    }

    let mut product: Vec<IndexMap<String, String>> = vec![IndexMap::new()];
    for (key, axis) in axes {
        let mut next = Vec::with_capacity(product.len() * axis.len());
        for partial in &product {
            for value in &axis {
                let mut entry = partial.clone();
                entry.insert(key.clone(), value.clone());
                next.push(entry);
            }
        }
        product = next;
    }
    product
}

/// Substitutes every `${key}` occurrence in `text` with its mapped value.
pub fn substitute(text: &str, vars: &IndexMap<String, String>) -> String {
    let mut out = text.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("${{{key}}}"), value);
    }
    out
}
