//! `tool` binary (spec §6): runs one converter pipeline from a config file, CLI
//! flags, or both -- flags override the corresponding config key.
//!
//! Grounded in `kernel/examples/inspect-table/src/main.rs`'s `Cli`/`try_main`/
//! `ExitCode` shape, with `tracing-subscriber` in place of that example's
//! `env_logger` to match the rest of this crate's logging stack.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use arzip_kernel::config::Config;
use arzip_kernel::{ArzipResult, Converter};

#[derive(Parser)]
#[command(name = "arzip", author, version, about = "Convert scientific array files into a chunked array store", long_about = None)]
struct Cli {
    /// Input files, overriding input.paths from config
    inputs: Vec<String>,

    /// Configuration file(s); later files merge over earlier ones
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Vec<PathBuf>,

    /// Output store path, overriding output.path
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output: Option<String>,

    #[arg(long = "concat-dim", value_name = "DIM")]
    concat_dim: Option<String>,

    #[arg(long = "multi-file")]
    multi_file: bool,

    #[arg(long = "overwrite")]
    overwrite: bool,

    #[arg(long = "append")]
    append: bool,

    #[arg(long = "decode-cf")]
    decode_cf: bool,

    /// `path` or `name`
    #[arg(long = "sort-by", value_name = "path|name")]
    sort_by: Option<String>,

    #[arg(long = "adjust-metadata")]
    adjust_metadata: bool,

    #[arg(long = "finalize-only")]
    finalize_only: bool,

    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Repeat for more verbose logging: none = warn, -v = info, -vv = debug
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

/// Verbosity 0 = warn, 1 = info, 2+ = debug (spec §7).
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
    let merged = if cli.config.is_empty() {
        serde_yaml::Value::Mapping(Default::default())
    } else {
        Config::load_and_merge(&cli.config)?
    };
    let mut config = Config::from_value(merged)?;

    if !cli.inputs.is_empty() {
        config.input.paths = cli.inputs;
    }
    if let Some(output) = cli.output {
        config.output.path = Some(output);
    }
    if let Some(dim) = cli.concat_dim {
        config.input.concat_dim = Some(dim);
    }
    config.input.multi_file |= cli.multi_file;
    config.output.overwrite |= cli.overwrite;
    config.output.append |= cli.append;
    config.input.decode_cf |= cli.decode_cf;
    if let Some(sort_by) = cli.sort_by {
        config.input.sort_by = Some(sort_by);
    }
    config.output.adjust_metadata |= cli.adjust_metadata;
    config.finalize_only |= cli.finalize_only;
    config.dry_run |= cli.dry_run;
    config.verbosity = config.verbosity.max(cli.verbosity);

    Converter::new(config)?.run()
}
