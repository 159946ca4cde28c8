//! `tool-batch` binary (spec §6): expands a config template across `-R`/`-V`
//! assignments and runs one `arzip` conversion per expansion.
//!
//! Grounded in `examples/original_source/nc2zarr/cli.py`'s `nc2zarr_batch` command,
//! with the same `clap`/`ExitCode`/`tracing-subscriber` shape as the `arzip` binary.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use arzip_batch::template::{expand_variables, RangeArg, ValueArg};
use arzip_batch::{BatchRunner, SchedulerConfig};
use arzip_kernel::{ArzipError, ArzipResult};

#[derive(Parser)]
#[command(name = "arzip-batch", author, version, about = "Run arzip over a configuration template expanded across variable assignments", long_about = None)]
struct Cli {
    /// Path to the configuration template; may contain `${key}` placeholders.
    config_template: PathBuf,

    /// Path template for the generated configuration files; must reference `${key}`
    /// for every `-R` key.
    config_path_template: String,

    /// `-R KEY MIN MAX`: an inclusive integer range assignment. Repeatable.
    #[arg(short = 'R', long = "range", num_args = 3, value_names = ["KEY", "MIN", "MAX"], action = clap::ArgAction::Append)]
    ranges: Vec<String>,

    /// `-V KEY VALUE`: a literal value assignment. Repeatable.
    #[arg(short = 'V', long = "value", num_args = 2, value_names = ["KEY", "VALUE"], action = clap::ArgAction::Append)]
    values: Vec<String>,

    /// Scheduler configuration file (YAML): selects local/slurm/dry_run job type and
    /// its parameters.
    #[arg(short = 's', long = "scheduler", value_name = "FILE")]
    scheduler: Option<PathBuf>,

    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Repeat for more verbose logging: none = warn, -v = info, -vv = debug.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbosity: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbosity);
    match try_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn try_main(cli: Cli) -> ArzipResult<()> {
    if !cli.config_template.is_file() {
        return Err(ArzipError::config(format!(
            "configuration template not found: {}",
            cli.config_template.display()
        )));
    }

    let ranges: Vec<RangeArg> = cli
        .ranges
        .chunks(3)
        .map(|chunk| {
            let min = chunk[1]
                .parse::<i64>()
                .map_err(|_| ArzipError::config(format!("invalid -R min value {:?}: expected an integer", chunk[1])))?;
            let max = chunk[2]
                .parse::<i64>()
                .map_err(|_| ArzipError::config(format!("invalid -R max value {:?}: expected an integer", chunk[2])))?;
            Ok(RangeArg { key: chunk[0].clone(), min, max })
        })
        .collect::<ArzipResult<Vec<_>>>()?;
    let values: Vec<ValueArg> = cli.values.chunks(2).map(|chunk| ValueArg { key: chunk[0].clone(), value: chunk[1].clone() }).collect();

    let range_keys: Vec<String> = ranges.iter().map(|r| r.key.clone()).collect();
    arzip_batch::runner::validate_path_template_references(&cli.config_path_template, &range_keys)?;

    let variables = expand_variables(&ranges, &values);

    let scheduler = match &cli.scheduler {
        Some(path) => SchedulerConfig::load(path)?,
        None => SchedulerConfig::default(),
    };

    let runner = BatchRunner::new(&cli.config_template, cli.config_path_template.clone(), variables, cli.dry_run);

    let tool_verbosity = format!("-{}", "v".repeat(cli.verbosity.max(1) as usize));
    let jobs = runner.execute(&[tool_verbosity], &scheduler)?;

    loop {
        if jobs.iter().all(|job| job.done() == Some(true)) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_secs(2));
    }

    let failed = jobs.iter().filter(|job| job.status().to_string() == "failed").count();
    if failed > 0 {
        return Err(ArzipError::JobSubmissionFailed(format!("{failed} of {} jobs failed", jobs.len())));
    }
    Ok(())
}
