//! sieve-timing CLI.
//!
//!   sieve-timing run -i tuples.txt -o timings.txt
//!   sieve-timing run -i tuples.txt -k 10 --ceiling-secs 3600 -- python3 qs.py {n}
//!   sieve-timing run --in-process < tuples.txt
//!   sieve-timing factor 221
//!
//! `RUST_LOG` controls log verbosity (default `info`); logs go to stderr.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use num_bigint::BigUint;

use sieve_timing::builtin::{self, CpuClock};
use sieve_timing::worker::CancelToken;
use sieve_timing::{
    interrupt, read_tasks, BatchSummary, CommandPrimitive, FactoringPrimitive, Harness,
    HarnessConfig, HarnessError, TimingSource,
};

/// Exit code after an operator interrupt (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(
    name = "sieve-timing",
    version,
    about = "Time a semiprime factoring primitive under adaptive timeouts"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Time a factoring primitive over (n, hamming_distance, p, q) tuples
    Run(RunArgs),
    /// Factor one number and print the CPU seconds spent
    Factor {
        /// Number to factor
        n: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Input file of tuples, one per line (stdin if omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file for timing records (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file; the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Budget multiplier: each task waits previous_duration * K
    #[arg(short = 'k', long)]
    multiplier: Option<f64>,

    /// Cap on every budget in seconds, including the first task's
    #[arg(long)]
    ceiling_secs: Option<f64>,

    /// Floor on derived budgets in seconds
    #[arg(long)]
    min_budget_secs: Option<f64>,

    /// Where durations come from
    #[arg(long, value_enum)]
    timing_source: Option<TimingSource>,

    /// Run the built-in factoring routine on a thread instead of a child process
    #[arg(long, conflicts_with = "command")]
    in_process: bool,

    /// Write the batch summary as JSON to this file
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Factoring command; `{n}` is replaced by the semiprime.
    /// Defaults to this binary's `factor` subcommand.
    #[arg(last = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => match run(args) {
            Ok(summary) if summary.interrupted => ExitCode::from(EXIT_INTERRUPTED),
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{}", e);
                ExitCode::FAILURE
            }
        },
        Command::Factor { n } => factor(&n),
    }
}

fn build_config(args: &RunArgs) -> Result<HarnessConfig, HarnessError> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::from_json_file(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(multiplier) = args.multiplier {
        config.multiplier = multiplier;
    }
    if let Some(ceiling) = args.ceiling_secs {
        config.ceiling_secs = Some(ceiling);
    }
    if let Some(floor) = args.min_budget_secs {
        config.min_budget_secs = floor;
    }
    if let Some(source) = args.timing_source {
        config.timing_source = source;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: RunArgs) -> Result<BatchSummary, HarnessError> {
    let config = build_config(&args)?;
    if config.ceiling_secs.is_none() {
        log::info!("No ceiling configured: the first task runs without a timeout");
    }

    interrupt::install_handlers();

    let reader: Box<dyn BufRead + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let mut sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout()),
    };

    let summary = if args.in_process {
        run_with(builtin::thread_primitive(), config, reader, &mut sink)?
    } else {
        let primitive = if args.command.is_empty() {
            self_factor_command()?
        } else {
            CommandPrimitive::from_command_line(&args.command)?
        };
        let primitive = primitive.with_kill_grace(config.kill_grace());
        run_with(primitive, config, reader, &mut sink)?
    };

    log::info!("Batch finished: {}", summary);

    if let Some(path) = &args.summary {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &summary).map_err(io::Error::from)?;
    }

    Ok(summary)
}

fn run_with<P, R, W>(
    primitive: P,
    config: HarnessConfig,
    reader: R,
    sink: &mut W,
) -> Result<BatchSummary, HarnessError>
where
    P: FactoringPrimitive,
    R: BufRead + Send + 'static,
    W: Write,
{
    let harness = Harness::new(primitive, config)?;
    harness.run_batch(read_tasks(reader), sink, interrupt::flag())
}

/// This binary's own `factor` subcommand as an external primitive.
fn self_factor_command() -> Result<CommandPrimitive, HarnessError> {
    let exe = std::env::current_exe()?;
    Ok(CommandPrimitive::new(
        exe.to_string_lossy().into_owned(),
        ["factor", "{n}"],
    ))
}

fn factor(n: &str) -> ExitCode {
    let n: BigUint = match n.trim().parse() {
        Ok(n) => n,
        Err(e) => {
            log::error!("'{}' is not a non-negative integer: {}", n, e);
            return ExitCode::from(2);
        }
    };

    match builtin::factor_timed(&n, &CancelToken::new(), CpuClock::Process) {
        Some((p, q, cpu)) => {
            log::info!("{} = {} * {}", n, p, q);
            println!("{}", cpu.as_secs_f64());
            ExitCode::SUCCESS
        }
        None => {
            log::error!("{} has no nontrivial split", n);
            ExitCode::FAILURE
        }
    }
}
