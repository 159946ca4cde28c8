//! Top-level orchestration: resolve inputs, open/preprocess/process/write every slice,
//! then finalize the output store (spec §4.8).
//!
//! Grounded in `examples/original_source/nc2zarr/converter.py`'s `Converter._run`.
//! Two details the distilled pseudocode in spec.md glosses over were resolved by
//! reading that source directly (see DESIGN.md for the full writeup):
//! - the per-run `append` flag starts unset and only the *first* write falls back to
//!   `output.append`; every write after that is always an append, not
//!   `append = (not first_iteration)` as literally written in the spec's pseudocode.
//! - `input_paths` are only resolved through [`crate::path_resolver::PathResolver`]
//!   when `output.adjust_metadata` is set (that list feeds both the opener's file
//!   list and the finalizer's `source` attribute); otherwise the raw configured paths
//!   are handed to the opener unresolved.

use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjPath;
use tracing::info;

use crate::config::{attrs_from_yaml_map, encoding_from_yaml_map, Config, S3Config, DEFAULT_APPEND_DIM, DEFAULT_OUTPUT_PATH};
use crate::error::{ArzipError, ArzipResult};
use crate::finalizer::{FinalizeOptions, Finalizer};
use crate::hooks::Hook;
use crate::model::Dataset;
use crate::opener::{concat_datasets, DatasetOpener};
use crate::path_resolver::PathResolver;
use crate::preprocess::PreProcessor;
use crate::process::Processor;
use crate::store::ArrayStore;
use crate::writer::{AppendMode, RetryPolicy, Writer};

const TOOL_NAME: &str = "arzip";
const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds the output [`ArrayStore`] (spec §6 "Store layout"). `output.path` is either a
/// local filesystem path, or, when `output.s3` is given, an `s3://<bucket>/<prefix>` URL
/// whose bucket and prefix are pulled apart here and whose credentials come from `s3`.
fn build_output_store(path: &str, s3: Option<&S3Config>) -> ArzipResult<ArrayStore> {
    match s3 {
        Some(s3) => {
            let url = path
                .parse::<url::Url>()
                .map_err(|e| ArzipError::config(format!("invalid output.path for an S3 store: {path:?}: {e}")))?;
            let bucket = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| ArzipError::config(format!("output.path {path:?} is missing an S3 bucket (expected s3://<bucket>/<prefix>)")))?;
            let prefix = url.path().trim_start_matches('/');

            let mut builder = AmazonS3Builder::new().with_bucket_name(bucket);
            if let Some(key) = &s3.key {
                builder = builder.with_access_key_id(key);
            }
            if let Some(secret) = &s3.secret {
                builder = builder.with_secret_access_key(secret);
            }
            if let Some(endpoint) = &s3.endpoint_url {
                builder = builder.with_endpoint(endpoint).with_allow_http(true);
            }
            if let Some(region) = &s3.region_name {
                builder = builder.with_region(region);
            }
            let s3_store = builder.build().map_err(|e| ArzipError::StoreIoError(e.to_string()))?;
            Ok(ArrayStore::new(Arc::new(s3_store), ObjPath::from(prefix)))
        }
        None => {
            let fs = LocalFileSystem::new_with_prefix(path).map_err(|e| ArzipError::StoreIoError(e.to_string()))?;
            Ok(ArrayStore::new(Arc::new(fs), ObjPath::from("")))
        }
    }
}

/// Drives one end-to-end run of the converter (spec §4.8).
pub struct Converter {
    config: Config,
    append_dim: String,
    concat_dim: Option<String>,
    custom_postprocessor: Option<Hook>,
}

impl Converter {
    /// Validates the configuration and resolves the append-dimension/concat-dimension
    /// defaults (spec §4.1/§4.8). `output.append_dim` and `input.concat_dim` default
    /// independently -- `"time"` and `append_dim` respectively -- rather than the
    /// original's `output_append_dim = input_concat_dim or "time"`, which
    /// unconditionally clobbers a user-configured `append_dim`; that quirk is not
    /// reproduced here (see DESIGN.md).
    pub fn new(config: Config) -> ArzipResult<Self> {
        config.validate()?;
        if config.input.paths.is_empty() {
            return Err(ArzipError::config("at least one input path must be given"));
        }

        let append_dim = config.output.append_dim.clone().unwrap_or_else(|| DEFAULT_APPEND_DIM.to_string());
        let concat_dim = if config.input.multi_file {
            Some(config.input.concat_dim.clone().unwrap_or_else(|| append_dim.clone()))
        } else {
            config.input.concat_dim.clone()
        };

        let custom_postprocessor = config.output.custom_postprocessor.as_deref().map(Hook::resolve).transpose()?;

        Ok(Self { config, append_dim, concat_dim, custom_postprocessor })
    }

    /// Runs the full pipeline once: convert (unless `finalize_only`), then finalize.
    pub fn run(&self) -> ArzipResult<()> {
        let output_path = self.config.output.path.clone().unwrap_or_else(|| DEFAULT_OUTPUT_PATH.to_string());
        let store = build_output_store(&output_path, self.config.output.s3.as_ref())?;

        let opener_files = if self.config.output.adjust_metadata {
            PathResolver::with_local().resolve(&self.config.input.paths, self.config.input.sort_by.as_deref())?
        } else {
            self.config.input.paths.clone()
        };

        if self.config.finalize_only {
            info!("finalize_only: skipping the conversion loop");
        } else {
            self.convert(&store, &opener_files)?;
        }

        let finalize_opts = FinalizeOptions {
            adjust_metadata: self.config.output.adjust_metadata,
            input_paths: opener_files,
            metadata_overrides: attrs_from_yaml_map(&self.config.output.metadata)?,
            consolidated: self.config.output.consolidated,
            tool_name: TOOL_NAME.to_string(),
            tool_version: TOOL_VERSION.to_string(),
        };
        Finalizer::run(&store, &finalize_opts)
    }

    fn convert(&self, store: &ArrayStore, files: &[String]) -> ArzipResult<()> {
        let opener = DatasetOpener::new(
            files.to_vec(),
            self.config.input.decode_cf,
            self.concat_dim.clone(),
            self.config.input.engine.clone(),
            self.config.input.prefetch_chunks,
            self.config.verbosity,
        )?;

        let mut preprocessor = PreProcessor::new(
            self.config.input.variables.clone(),
            self.concat_dim.clone(),
            self.config.input.datetime_format.clone(),
            self.config.input.custom_preprocessor.as_deref(),
            self.config.verbosity,
        )?;

        let user_encoding = encoding_from_yaml_map(&self.config.output.encoding)?;
        let processor = Processor::new(
            self.config.process.rename.clone(),
            self.config.process.custom_processor.as_deref(),
            &self.config.process.rechunk,
            user_encoding,
        )?;

        let append_mode =
            self.config.output.append_mode.as_deref().map(AppendMode::parse).transpose()?.unwrap_or_default();
        let retry = RetryPolicy::from_config(&self.config.output.retry);
        let mut writer = Writer::new(
            store.clone(),
            self.append_dim.clone(),
            append_mode,
            self.config.output.overwrite,
            self.config.input.decode_cf,
            self.config.dry_run,
            retry,
        )?;

        let slices = opener.open_slices()?;

        if self.config.input.multi_file {
            let dim = self
                .concat_dim
                .clone()
                .ok_or_else(|| ArzipError::MissingConcatDim { dim: "input.concat_dim".to_string() })?;
            let mut preprocessed = Vec::with_capacity(slices.len());
            for ds in slices {
                preprocessed.push(preprocessor.process(ds)?);
            }
            let combined = concat_datasets(preprocessed, &dim)?;
            let (processed, encoding) = processor.process(combined)?;
            let processed = self.apply_postprocessor(processed)?;
            writer.write(&processed, &encoding, self.config.output.append)?;
            return Ok(());
        }

        // First write of the run honors `output.append`; every write after it is
        // always an append, matching the original's `append=None` then
        // `append=True` sequencing.
        let mut append = self.config.output.append;
        for ds in slices {
            let preprocessed = preprocessor.process(ds)?;
            let (processed, encoding) = processor.process(preprocessed)?;
            let processed = self.apply_postprocessor(processed)?;
            writer.write(&processed, &encoding, append)?;
            append = true;
        }
        Ok(())
    }

    fn apply_postprocessor(&self, ds: Dataset) -> ArzipResult<Dataset> {
        match &self.custom_postprocessor {
            Some(hook) => hook.apply(ds),
            None => Ok(ds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputConfig;
    use std::fs;

    fn write_slice(dir: &std::path::Path, name: &str, time: f64, value: f64) -> String {
        let path = dir.join(name);
        fs::write(
            &path,
            format!(
                r#"{{"attrs": {{}}, "variables": {{
                    "time": {{"dims": ["time"], "shape": [1], "dtype": "f8", "data": [{time}]}},
                    "temp": {{"dims": ["time"], "shape": [1], "dtype": "f8", "data": [{value}]}}
                }}}}"#
            ),
        )
        .unwrap();
        path.to_string_lossy().into_owned()
    }

    fn base_config(input_paths: Vec<String>, output_path: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.input = InputConfig { paths: input_paths, ..InputConfig::default() };
        config.output.path = Some(output_path.to_string_lossy().into_owned());
        config
    }

    #[test]
    fn rejects_empty_input_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = base_config(vec![], &dir.path().join("out.zarr"));
        let err = Converter::new(config).unwrap_err();
        assert!(matches!(err, ArzipError::Config(_)));
    }

    #[test]
    fn rejects_overwrite_and_append_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = base_config(vec!["a.json".to_string()], &dir.path().join("out.zarr"));
        config.output.overwrite = true;
        config.output.append = true;
        let err = Converter::new(config).unwrap_err();
        assert!(matches!(err, ArzipError::OverwriteAndAppend));
    }

    #[test]
    fn per_file_run_creates_then_appends_every_slice_in_order() {
        let input_dir = tempfile::tempdir().unwrap();
        let a = write_slice(input_dir.path(), "a.json", 0.0, 1.0);
        let b = write_slice(input_dir.path(), "b.json", 1000.0, 2.0);

        let output_dir = tempfile::tempdir().unwrap();
        let output_path = output_dir.path().join("out.zarr");
        let config = base_config(vec![a, b], &output_path);

        Converter::new(config).unwrap().run().unwrap();

        let fs = LocalFileSystem::new_with_prefix(&output_path).unwrap();
        let store = ArrayStore::new(Arc::new(fs), ObjPath::from(""));
        assert_eq!(store.read_coord("time").unwrap(), vec![0.0, 1000.0]);
    }

    #[test]
    fn multi_file_run_concatenates_before_a_single_write() {
        let input_dir = tempfile::tempdir().unwrap();
        let a = write_slice(input_dir.path(), "a.json", 0.0, 1.0);
        let b = write_slice(input_dir.path(), "b.json", 1000.0, 2.0);

        let output_dir = tempfile::tempdir().unwrap();
        let output_path = output_dir.path().join("out.zarr");
        let mut config = base_config(vec![a, b], &output_path);
        config.input.multi_file = true;
        config.input.concat_dim = Some("time".to_string());

        Converter::new(config).unwrap().run().unwrap();

        let fs = LocalFileSystem::new_with_prefix(&output_path).unwrap();
        let store = ArrayStore::new(Arc::new(fs), ObjPath::from(""));
        assert_eq!(store.read_coord("time").unwrap(), vec![0.0, 1000.0]);
    }

    #[test]
    fn finalize_only_errors_when_store_is_missing() {
        let output_dir = tempfile::tempdir().unwrap();
        let output_path = output_dir.path().join("out.zarr");
        let mut config = base_config(vec!["a.json".to_string()], &output_path);
        config.finalize_only = true;

        let err = Converter::new(config).unwrap().run().unwrap_err();
        assert!(matches!(err, ArzipError::StoreNotFound(_)));
    }

    #[test]
    fn finalize_only_adjusts_metadata_on_an_existing_store_without_reconverting() {
        let input_dir = tempfile::tempdir().unwrap();
        let a = write_slice(input_dir.path(), "a.json", 0.0, 1.0);

        let output_dir = tempfile::tempdir().unwrap();
        let output_path = output_dir.path().join("out.zarr");

        // First run actually converts and writes the store.
        let config = base_config(vec![a.clone()], &output_path);
        Converter::new(config).unwrap().run().unwrap();

        // Second run only finalizes; conversion must not run again (the store
        // would reject a second create without --overwrite/--append if it did).
        let mut config = base_config(vec![a], &output_path);
        config.finalize_only = true;
        config.output.adjust_metadata = true;
        Converter::new(config).unwrap().run().unwrap();

        let fs = LocalFileSystem::new_with_prefix(&output_path).unwrap();
        let store = ArrayStore::new(Arc::new(fs), ObjPath::from(""));
        let group = store.read_group_attrs().unwrap();
        assert!(group.attrs.get("history").is_some());
    }

    #[test]
    fn s3_output_path_without_a_bucket_is_rejected_with_a_clear_error() {
        let err = build_output_store("whatever", Some(&S3Config::default())).unwrap_err();
        assert!(matches!(err, ArzipError::Config(_)));
    }

    #[test]
    fn s3_output_builds_a_store_rooted_at_the_url_prefix() {
        let s3 = S3Config { region_name: Some("us-east-1".to_string()), ..S3Config::default() };
        let store = build_output_store("s3://my-bucket/archives/out.zarr", Some(&s3)).unwrap();
        assert_eq!(store.root_path(), &ObjPath::from("archives/out.zarr"));
    }
}
