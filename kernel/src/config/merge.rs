//! Recursive YAML merge: maps merge key-by-key, lists concatenate, scalars overwrite.
//! Ported from `examples/original_source/nc2zarr/config.py`'s `_merge_2_configs`, but
//! operating over `serde_yaml::Value` since the merge happens before the shape of the
//! config is known to be a valid [`super::Config`].

use serde_yaml::value::Value;

pub fn merge_configs(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut merged = base_map.clone();
            for (k, v2) in overlay_map {
                match merged.get(k) {
                    Some(v1) => {
                        merged.insert(k.clone(), merge_configs(v1, v2));
                    }
                    None => {
                        merged.insert(k.clone(), v2.clone());
                    }
                }
            }
            Value::Mapping(merged)
        }
        (Value::Sequence(a), Value::Sequence(b)) => {
            let mut merged = a.clone();
            merged.extend(b.clone());
            Value::Sequence(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn maps_merge_key_by_key() {
        let base = yaml("a: 1\nb: 2\n");
        let overlay = yaml("b: 3\nc: 4\n");
        let merged = merge_configs(&base, &overlay);
        assert_eq!(merged, yaml("a: 1\nb: 3\nc: 4\n"));
    }

    #[test]
    fn lists_concatenate() {
        let base = yaml("paths: [a, b]\n");
        let overlay = yaml("paths: [c]\n");
        let merged = merge_configs(&base, &overlay);
        assert_eq!(merged, yaml("paths: [a, b, c]\n"));
    }

    #[test]
    fn scalars_overwrite() {
        let base = yaml("append: false\n");
        let overlay = yaml("append: true\n");
        let merged = merge_configs(&base, &overlay);
        assert_eq!(merged, yaml("append: true\n"));
    }

    #[test]
    fn nested_maps_merge_recursively() {
        let base = yaml("output:\n  path: a.zarr\n  overwrite: false\n");
        let overlay = yaml("output:\n  overwrite: true\n");
        let merged = merge_configs(&base, &overlay);
        assert_eq!(merged, yaml("output:\n  path: a.zarr\n  overwrite: true\n"));
    }
}
