//! The optional `-s/--scheduler` YAML file: selects a job kind and carries its
//! per-kind parameters (spec §4.9, §6 "`tool-batch` CLI").
//!
//! Grounded in `examples/original_source/nc2zarr/cli.py`'s `nc2zarr_batch` reading of
//! `scheduler_config_path` into a plain YAML mapping popped for `type`/`env_vars`/
//! `cwd_path` then splatted as job-type-specific keyword arguments.

use std::collections::HashMap;
use std::path::Path;

use arzip_kernel::{ArzipError, ArzipResult};
use serde::Deserialize;

/// `local` (default), `slurm`, or `dry_run` (spec §4.9's three job kinds; `dry_run` is
/// also forced by the CLI's own `--dry-run` flag regardless of `type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobKind {
    #[default]
    Local,
    Slurm,
    DryRun,
}

impl JobKind {
    fn parse(s: &str) -> ArzipResult<Self> {
        match s {
            "local" => Ok(Self::Local),
            "slurm" => Ok(Self::Slurm),
            "dry_run" => Ok(Self::DryRun),
            other => Err(ArzipError::config(format!("illegal job type {other:?}: expected local, slurm, or dry_run"))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SchedulerFile {
    #[serde(rename = "type")]
    job_type: Option<String>,
    env_vars: HashMap<String, String>,
    cwd_path: Option<String>,
    partition: Option<String>,
    duration: Option<String>,
    sbatch_program: Option<String>,
    squeue_program: Option<String>,
    poll_period: Option<f64>,
}

/// Resolved scheduler parameters for one batch run, shared by every job it submits.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub kind: JobKind,
    pub env_vars: HashMap<String, String>,
    pub cwd_path: Option<String>,
    pub partition: Option<String>,
    pub duration: Option<String>,
    pub sbatch_program: Option<String>,
    pub squeue_program: Option<String>,
    pub poll_period: Option<f64>,
}

impl SchedulerConfig {
    pub fn load(path: &Path) -> ArzipResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ArzipError::config(format!("scheduler configuration not found: {}: {e}", path.display())))?;
        let file: SchedulerFile = serde_yaml::from_str(&text)?;
        let kind = match &file.job_type {
            Some(t) => JobKind::parse(t)?,
            None => JobKind::Local,
        };
        Ok(Self {
            kind,
            env_vars: file.env_vars,
            cwd_path: file.cwd_path,
            partition: file.partition,
            duration: file.duration,
            sbatch_program: file.sbatch_program,
            squeue_program: file.squeue_program,
            poll_period: file.poll_period,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_minimal_slurm_scheduler_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slurm.yml");
        std::fs::write(&path, "type: slurm\npartition: batch\nduration: \"01:00:00\"\n").unwrap();
        let config = SchedulerConfig::load(&path).unwrap();
        assert_eq!(config.kind, JobKind::Slurm);
        assert_eq!(config.partition.as_deref(), Some("batch"));
    }

    #[test]
    fn defaults_to_local_without_a_type_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sched.yml");
        std::fs::write(&path, "env_vars:\n  FOO: bar\n").unwrap();
        let config = SchedulerConfig::load(&path).unwrap();
        assert_eq!(config.kind, JobKind::Local);
        assert_eq!(config.env_vars.get("FOO").map(String::as_str), Some("bar"));
    }

    #[test]
    fn rejects_an_unknown_job_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sched.yml");
        std::fs::write(&path, "type: kubernetes\n").unwrap();
        assert!(SchedulerConfig::load(&path).is_err());
    }
}
