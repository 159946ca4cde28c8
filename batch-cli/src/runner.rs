//! Expands a configuration template across variable maps, writes one configuration
//! file per expansion, and submits one job per configuration (spec §4.9 "BatchRunner").
//!
//! Grounded in `examples/original_source/nc2zarr/batch.py`'s `TemplateBatch`.

use std::path::{Path, PathBuf};

use arzip_kernel::{ArzipError, ArzipResult};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::job::{BatchJob, DryRunJob, LocalJob, SlurmJob};
use crate::scheduler::{JobKind, SchedulerConfig};
use crate::template::substitute;

/// The tuple a batch run submits per job (spec §3 "Job descriptor"), minus the runtime
/// state which lives on the returned [`BatchJob`] itself.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub command: Vec<String>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
}

/// The binary this runner invokes per expanded configuration (spec §4.9: "launches a
/// job executing the converter with `-c <path>`").
const CONVERTER_BIN: &str = "arzip";

pub struct BatchRunner {
    config_template_path: PathBuf,
    config_path_template: String,
    variables: Vec<IndexMap<String, String>>,
    create_parents: bool,
    dry_run: bool,
}

impl BatchRunner {
    pub fn new(
        config_template_path: impl Into<PathBuf>,
        config_path_template: impl Into<String>,
        variables: Vec<IndexMap<String, String>>,
        dry_run: bool,
    ) -> Self {
        Self {
            config_template_path: config_template_path.into(),
            config_path_template: config_path_template.into(),
            variables,
            create_parents: true,
            dry_run,
        }
    }

    /// Writes one expanded configuration file per variable map, returning
    /// `(config_path, stdout_path, stderr_path)` triples (spec §4.9). Under `dry_run`,
    /// logs what would have been written instead of touching the filesystem.
    pub fn write_config_files(&self) -> ArzipResult<Vec<(PathBuf, PathBuf, PathBuf)>> {
        let template = std::fs::read_to_string(&self.config_template_path).map_err(|e| {
            ArzipError::config(format!(
                "configuration template not found: {}: {e}",
                self.config_template_path.display()
            ))
        })?;

        let mut paths = Vec::with_capacity(self.variables.len());
        for vars in &self.variables {
            let config_text = substitute(&template, vars);
            let config_path = PathBuf::from(substitute(&self.config_path_template, vars));

            if self.create_parents {
                if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty() && !p.exists()) {
                    if self.dry_run {
                        warn!(parent = %parent.display(), "dry run: skipped creating parent directory");
                    } else {
                        std::fs::create_dir_all(parent)?;
                    }
                }
            }

            if self.dry_run {
                warn!(config_path = %config_path.display(), "dry run: skipped writing configuration");
            } else {
                std::fs::write(&config_path, &config_text)?;
            }

            let base = config_path.with_extension("");
            paths.push((config_path, base.with_extension("out"), base.with_extension("err")));
        }
        Ok(paths)
    }

    /// Writes configurations then submits one job per configuration, returning the
    /// jobs in the same order as `variables` (spec §4.9, §5 "BatchRunner: parallel
    /// across jobs"). `tool_args` are passed through to the `arzip` invocation (e.g.
    /// `-vv` derived from the batch CLI's own verbosity).
    pub fn execute(&self, tool_args: &[String], scheduler: &SchedulerConfig) -> ArzipResult<Vec<Box<dyn BatchJob>>> {
        let configs = self.write_config_files()?;
        let kind = if self.dry_run { JobKind::DryRun } else { scheduler.kind };
        let cwd = scheduler.cwd_path.as_deref();
        let env: Vec<(String, String)> = scheduler.env_vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let mut jobs: Vec<Box<dyn BatchJob>> = Vec::with_capacity(configs.len());
        for (config_path, out_path, err_path) in &configs {
            let mut command = vec![CONVERTER_BIN.to_string()];
            command.extend(tool_args.iter().cloned());
            command.push("-c".to_string());
            command.push(config_path.display().to_string());

            let job: Box<dyn BatchJob> = match kind {
                JobKind::DryRun => Box::new(DryRunJob::submit(&command, &out_path.to_string_lossy(), &err_path.to_string_lossy())),
                JobKind::Local => Box::new(LocalJob::submit(
                    &command,
                    &out_path.to_string_lossy(),
                    &err_path.to_string_lossy(),
                    cwd,
                    &env,
                )?),
                JobKind::Slurm => Box::new(SlurmJob::submit(
                    &command,
                    &out_path.to_string_lossy(),
                    &err_path.to_string_lossy(),
                    cwd,
                    &env,
                    scheduler,
                )?),
            };
            info!(config_path = %config_path.display(), "submitted job");
            jobs.push(job);
        }
        Ok(jobs)
    }
}

/// Validates that `config_path_template` references every `-R` range key (spec §6:
/// "`config_path_template` must contain `${key}` references for every `-R` key;
/// otherwise exit non-zero").
pub fn validate_path_template_references(config_path_template: &str, range_keys: &[String]) -> ArzipResult<()> {
    for key in range_keys {
        let reference = format!("${{{key}}}");
        if !config_path_template.contains(&reference) {
            return Err(ArzipError::config(format!(
                "reference {reference:?} missing in config path template {config_path_template:?}"
            )));
        }
    }
    Ok(())
}

/// Resolve the path this runner's underlying configuration template lives at, for
/// error messages and callers that need to check existence up front.
pub fn template_path_exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn writes_one_config_file_per_variable_map() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("template.yml");
        std::fs::write(&template_path, "output:\n  path: out-${year}.zarr\n").unwrap();

        let path_template = dir.path().join("cfg-${year}.yml").display().to_string();
        let variables = vec![vars(&[("year", "2010")]), vars(&[("year", "2011")])];
        let runner = BatchRunner::new(&template_path, path_template, variables, false);

        let configs = runner.write_config_files().unwrap();
        assert_eq!(configs.len(), 2);
        let text = std::fs::read_to_string(&configs[0].0).unwrap();
        assert!(text.contains("out-2010.zarr"));
        assert_eq!(configs[0].1.extension().unwrap(), "out");
        assert_eq!(configs[0].2.extension().unwrap(), "err");
    }

    #[test]
    fn dry_run_skips_writing_files() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("template.yml");
        std::fs::write(&template_path, "output:\n  path: out-${year}.zarr\n").unwrap();

        let path_template = dir.path().join("sub/cfg-${year}.yml").display().to_string();
        let runner = BatchRunner::new(&template_path, path_template, vec![vars(&[("year", "2010")])], true);

        let configs = runner.write_config_files().unwrap();
        assert!(!configs[0].0.exists());
    }

    #[test]
    fn validate_path_template_references_requires_every_range_key() {
        assert!(validate_path_template_references("cfg-${year}.yml", &["year".to_string()]).is_ok());
        assert!(validate_path_template_references("cfg.yml", &["year".to_string()]).is_err());
    }

    #[test]
    fn a_four_year_range_produces_four_completed_configs_and_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("template.yml");
        std::fs::write(&template_path, "input:\n  paths: [\"${base_dir}/${year}/*.json\"]\noutput:\n  path: ${base_dir}/out-${year}.zarr\n").unwrap();

        let path_template = dir.path().join("cfg-${year}.yml").display().to_string();
        let ranges = vec![crate::template::RangeArg { key: "year".into(), min: 2010, max: 2013 }];
        let values = vec![crate::template::ValueArg { key: "base_dir".into(), value: ".".into() }];
        let variables = crate::template::expand_variables(&ranges, &values);

        let range_keys = vec!["year".to_string()];
        assert!(validate_path_template_references(&path_template, &range_keys).is_ok());

        let runner = BatchRunner::new(&template_path, path_template, variables, true);
        let configs = runner.write_config_files().unwrap();
        assert_eq!(configs.len(), 4);

        let jobs = runner.execute(&[], &SchedulerConfig::default()).unwrap();
        assert_eq!(jobs.len(), 4);
        assert!(jobs.iter().all(|j| j.status().to_string() == "completed"));
    }

    #[test]
    fn execute_submits_a_dry_run_job_per_config_without_spawning_processes() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("template.yml");
        std::fs::write(&template_path, "output:\n  path: out-${year}.zarr\n").unwrap();
        let path_template = dir.path().join("cfg-${year}.yml").display().to_string();
        let variables = vec![vars(&[("year", "2010")]), vars(&[("year", "2011")])];
        let runner = BatchRunner::new(&template_path, path_template, variables, true);

        let jobs = runner.execute(&[], &SchedulerConfig::default()).unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.done() == Some(true)));
    }
}
