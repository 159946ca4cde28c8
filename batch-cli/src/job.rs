//! Job kinds and status (spec §3 "Job descriptor", §4.9).
//!
//! Grounded in `examples/original_source/nc2zarr/batch.py`'s `JobStatus`,
//! `DryRunJob`, `ObservedBatchJob`, `LocalJob`, `SlurmJob`. The Python base class's
//! per-instance `threading.Thread` observer becomes a `std::thread::spawn` closure
//! over an `Arc<Mutex<JobStatus>>` the job struct shares with its observer.

use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arzip_kernel::{ArzipError, ArzipResult};
use tracing::{debug, warn};

use crate::scheduler::SchedulerConfig;

/// A job's current status (spec §3, §4.9's Slurm `ST` mapping table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completing,
    Completed,
    Failed,
    Terminated,
    Suspended,
    Stopped,
    Unknown,
}

impl JobStatus {
    /// True once the job has reached a final state and the observer can stop
    /// (`BatchJob.done` in the original).
    pub fn is_done(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    fn from_slurm_code(code: &str) -> JobStatus {
        match code {
            "PD" => JobStatus::Pending,
            "R" => JobStatus::Running,
            "CG" => JobStatus::Completing,
            "CD" => JobStatus::Completed,
            "F" => JobStatus::Failed,
            "TO" => JobStatus::Terminated,
            "S" => JobStatus::Suspended,
            "ST" => JobStatus::Stopped,
            _ => JobStatus::Unknown,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completing => "completing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Terminated => "terminated",
            JobStatus::Suspended => "suspended",
            JobStatus::Stopped => "stopped",
            JobStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A single submitted job, observed asynchronously (spec §4.9, §5 "BatchRunner:
/// parallel across jobs... one observer per job").
pub trait BatchJob: Send {
    fn status(&self) -> JobStatus;

    fn done(&self) -> Option<bool> {
        let status = self.status();
        if status == JobStatus::Unknown {
            None
        } else {
            Some(status.is_done())
        }
    }
}

/// Does nothing but report a completed status immediately (spec §4.9 "Dry-run: never
/// executes; status is immediately `completed`").
pub struct DryRunJob;

impl DryRunJob {
    pub fn submit(command: &[String], stdout_path: &str, stderr_path: &str) -> Self {
        warn!(
            command = %command.join(" "),
            stdout_path,
            stderr_path,
            "dry run: job not submitted"
        );
        DryRunJob
    }
}

impl BatchJob for DryRunJob {
    fn status(&self) -> JobStatus {
        JobStatus::Completed
    }
}

/// A job executed as a local OS process, polled by a background thread via
/// non-blocking wait (spec §4.9 "Local").
pub struct LocalJob {
    status: Arc<Mutex<JobStatus>>,
}

impl LocalJob {
    pub fn submit(
        command: &[String],
        stdout_path: &str,
        stderr_path: &str,
        cwd: Option<&str>,
        env: &[(String, String)],
    ) -> ArzipResult<Self> {
        let stdout = std::fs::File::create(stdout_path)?;
        let stderr = std::fs::File::create(stderr_path)?;

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..]).stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }

        let command_line = command.join(" ");
        debug!(command = %command_line, "spawning local job");
        let child = cmd
            .spawn()
            .map_err(|e| ArzipError::JobSubmissionFailed(format!("failed to spawn {command_line:?}: {e}")))?;

        let status = Arc::new(Mutex::new(JobStatus::Running));
        spawn_local_observer(child, Arc::clone(&status));
        Ok(Self { status })
    }
}

impl BatchJob for LocalJob {
    fn status(&self) -> JobStatus {
        *self.status.lock().expect("job status mutex poisoned")
    }
}

fn spawn_local_observer(mut child: Child, status: Arc<Mutex<JobStatus>>) {
    std::thread::spawn(move || loop {
        match child.try_wait() {
            Ok(Some(exit)) => {
                let final_status = if exit.success() { JobStatus::Completed } else { JobStatus::Failed };
                *status.lock().expect("job status mutex poisoned") = final_status;
                return;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(200)),
            Err(_) => {
                *status.lock().expect("job status mutex poisoned") = JobStatus::Unknown;
                return;
            }
        }
    });
}

/// A job submitted to a Slurm-style queueing scheduler via `sbatch`, polled via
/// `squeue` (spec §4.9 "Cluster").
pub struct SlurmJob {
    status: Arc<Mutex<JobStatus>>,
    job_id: String,
}

impl SlurmJob {
    pub fn submit(
        command: &[String],
        stdout_path: &str,
        stderr_path: &str,
        cwd: Option<&str>,
        env: &[(String, String)],
        scheduler: &SchedulerConfig,
    ) -> ArzipResult<Self> {
        let sbatch_program = scheduler.sbatch_program.as_deref().unwrap_or("sbatch");
        let mut sbatch_command: Vec<String> =
            vec![sbatch_program.to_string(), "-o".to_string(), stdout_path.to_string(), "-e".to_string(), stderr_path.to_string()];
        if let Some(partition) = &scheduler.partition {
            sbatch_command.push(format!("--partition={partition}"));
        }
        if let Some(duration) = &scheduler.duration {
            sbatch_command.push(format!("--time={duration}"));
        }
        if let Some(cwd) = cwd {
            sbatch_command.push(format!("--chdir={cwd}"));
        }
        if !env.is_empty() {
            let export = env.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
            sbatch_command.push(format!("--export=ALL,{export}"));
        }
        sbatch_command.extend(command.iter().cloned());

        let command_line = sbatch_command.join(" ");
        debug!(command = %command_line, "submitting slurm job");
        let output = Command::new(&sbatch_command[0])
            .args(&sbatch_command[1..])
            .output()
            .map_err(|e| ArzipError::JobSubmissionFailed(format!("failed to run {command_line:?}: {e}")))?;

        if !output.status.success() {
            let mut out = std::fs::File::create(stdout_path)?;
            out.write_all(&output.stdout)?;
            let mut err = std::fs::File::create(stderr_path)?;
            err.write_all(&output.stderr)?;
            return Err(ArzipError::JobSubmissionFailed(format!(
                "slurm job submission failed for command line: {command_line}"
            )));
        }

        const PREFIX: &str = "Submitted batch job ";
        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = stdout
            .lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix(PREFIX))
            .ok_or_else(|| {
                ArzipError::JobSubmissionFailed(format!(
                    "cannot obtain slurm job id from command line: {command_line}: output was {stdout:?}"
                ))
            })?
            .to_string();

        let status = Arc::new(Mutex::new(JobStatus::Pending));
        let poll_period = Duration::from_secs_f64(scheduler.poll_period.unwrap_or(1.0));
        spawn_slurm_observer(job_id.clone(), scheduler.squeue_program.clone(), poll_period, Arc::clone(&status));
        Ok(Self { status, job_id })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl BatchJob for SlurmJob {
    fn status(&self) -> JobStatus {
        *self.status.lock().expect("job status mutex poisoned")
    }
}

/// Runs `squeue_program` (default `squeue --job=${job_id}`) with a per-call timeout of
/// 90% of `poll_period` (spec §5 "Timeouts"), parsing the header/data line pair into
/// `{ST: <code>}`. Three consecutive unparseable polls end observation as `unknown`.
fn poll_slurm(job_id: &str, squeue_program: Option<&str>, poll_period: Duration) -> Option<JobStatus> {
    let program = squeue_program.unwrap_or("squeue --job=${job_id}").replace("${job_id}", job_id);
    let mut parts = program.split_whitespace();
    let program_name = parts.next()?.to_string();
    let args: Vec<String> = parts.map(String::from).collect();

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = Command::new(&program_name).args(&args).output();
        let _ = tx.send(result);
    });

    let timeout = poll_period.mul_f64(0.9);
    let output = rx.recv_timeout(timeout).ok()?.ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    let header: Vec<&str> = lines.next()?.split_whitespace().collect();
    let values: Vec<&str> = lines.next()?.split_whitespace().collect();
    if header.len() != values.len() || header.is_empty() {
        return None;
    }
    let st_index = header.iter().position(|&h| h == "ST")?;
    Some(JobStatus::from_slurm_code(values[st_index]))
}

fn spawn_slurm_observer(job_id: String, squeue_program: Option<String>, poll_period: Duration, status: Arc<Mutex<JobStatus>>) {
    std::thread::spawn(move || {
        let mut unparseable = 0;
        loop {
            match poll_slurm(&job_id, squeue_program.as_deref(), poll_period) {
                Some(polled) => {
                    unparseable = 0;
                    *status.lock().expect("job status mutex poisoned") = polled;
                    let should_end = matches!(
                        polled,
                        JobStatus::Completed | JobStatus::Failed | JobStatus::Terminated | JobStatus::Stopped
                    );
                    if should_end {
                        return;
                    }
                }
                None => {
                    unparseable += 1;
                    if unparseable == 3 {
                        *status.lock().expect("job status mutex poisoned") = JobStatus::Unknown;
                        return;
                    }
                }
            }
            std::thread::sleep(poll_period);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_job_is_immediately_completed() {
        let job = DryRunJob::submit(&["arzip".to_string()], "/dev/null", "/dev/null");
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.done(), Some(true));
    }

    #[test]
    fn unknown_status_reports_done_as_none() {
        struct Stub;
        impl BatchJob for Stub {
            fn status(&self) -> JobStatus {
                JobStatus::Unknown
            }
        }
        assert_eq!(Stub.done(), None);
    }

    #[test]
    fn slurm_status_codes_map_per_spec_table() {
        assert_eq!(JobStatus::from_slurm_code("PD"), JobStatus::Pending);
        assert_eq!(JobStatus::from_slurm_code("R"), JobStatus::Running);
        assert_eq!(JobStatus::from_slurm_code("CG"), JobStatus::Completing);
        assert_eq!(JobStatus::from_slurm_code("CD"), JobStatus::Completed);
        assert_eq!(JobStatus::from_slurm_code("F"), JobStatus::Failed);
        assert_eq!(JobStatus::from_slurm_code("TO"), JobStatus::Terminated);
        assert_eq!(JobStatus::from_slurm_code("S"), JobStatus::Suspended);
        assert_eq!(JobStatus::from_slurm_code("ST"), JobStatus::Stopped);
        assert_eq!(JobStatus::from_slurm_code("???"), JobStatus::Unknown);
    }

    #[test]
    fn local_job_runs_a_real_process_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let err = dir.path().join("err.txt");
        let job = LocalJob::submit(
            &["true".to_string()],
            out.to_str().unwrap(),
            err.to_str().unwrap(),
            None,
            &[],
        )
        .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while job.done() != Some(true) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[test]
    fn local_job_reports_failure_for_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let err = dir.path().join("err.txt");
        let job = LocalJob::submit(
            &["false".to_string()],
            out.to_str().unwrap(),
            err.to_str().unwrap(),
            None,
            &[],
        )
        .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while job.done() != Some(true) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(job.status(), JobStatus::Failed);
    }
}
