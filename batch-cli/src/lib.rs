//! `arzip-batch` expands a configuration template across a sequence of variable
//! assignments and runs one `arzip` conversion per expansion, as a local process, a
//! Slurm job, or (under `--dry-run`) neither (spec §4.9/§6 `tool-batch`).
//!
//! Grounded in `examples/original_source/nc2zarr/batch.py`'s `TemplateBatch` /
//! `BatchJob` hierarchy and `nc2zarr/cli.py`'s `nc2zarr_batch` command.

pub mod job;
pub mod runner;
pub mod scheduler;
pub mod template;

pub use job::{BatchJob, DryRunJob, JobStatus, LocalJob, SlurmJob};
pub use runner::{BatchRunner, JobDescriptor};
pub use scheduler::{JobKind, SchedulerConfig};
pub use template::expand_variables;
