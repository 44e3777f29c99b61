//! CLI argument parsing and the harness entry point
//!
//! An embedding binary collects its [`TestDefinition`]s and hands them to
//! [`main`], which parses the command line, layers the configuration and
//! runs the scheduler.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{load_or_default, EnvConfig, RunConfig};
use crate::error::DiscoveryError;
use crate::executor::{RunOutcome, Scheduler};
use crate::models::TestDefinition;
use crate::output::{format_discovery_errors, write_report_to_file, OutputFormat, ResultFormatter};
use crate::params::{expand, Selection};
use crate::utils::logger::{init_logger, LogLevel};

/// Every unit passed
pub const EXIT_SUCCESS: u8 = 0;
/// At least one unit failed or errored
pub const EXIT_FAILURES: u8 = 1;
/// Configuration or discovery error
pub const EXIT_DISCOVERY: u8 = 2;

/// Concurrent test runner
#[derive(Parser, Debug)]
#[command(name = "trialrun")]
#[command(version)]
#[command(about = "Run the registered tests on a pool of concurrent slots")]
#[command(long_about = None)]
pub struct Args {
    /// Selectors: path, path::test or path::test[param-id]
    pub selectors: Vec<String>,

    /// Number of concurrent execution slots
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Bounded queue size between discovery and the slots
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Per-unit timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Let unit output through instead of capturing it
    #[arg(short = 's', long)]
    pub no_capture: bool,

    /// Only run tests carrying this marker
    #[arg(short, long)]
    pub mark: Option<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Save the report to file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the expanded unit identifiers without running them
    #[arg(long)]
    pub list: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Parse the process arguments and run `definitions`
pub fn main(definitions: Vec<TestDefinition>) -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            return ExitCode::from(EXIT_DISCOVERY);
        }
    };

    let code = match runtime.block_on(run(args, definitions)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            EXIT_DISCOVERY
        }
    };
    // Timed-out blocking bodies cannot be cancelled; do not wait on them.
    runtime.shutdown_background();
    ExitCode::from(code)
}

/// Run with parsed arguments; returns the process exit code
///
/// Configuration errors surface as `Err`.
pub async fn run(args: Args, definitions: Vec<TestDefinition>) -> Result<u8> {
    let config = resolve_config(&args, &EnvConfig::load())?;
    let level = if args.verbose {
        config.log_level().at_least(LogLevel::Debug)
    } else {
        config.log_level()
    };
    init_logger(level);

    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", args.format))?;
    let formatter = line_formatter(format);

    let selection = Selection::parse(&config.selectors)?.with_marker(config.marker.clone());

    if args.list {
        let (ids, errors) = list_units(definitions, &selection);
        println!("{}", formatter.format_listing(&ids));
        if !errors.is_empty() {
            eprint!("{}", format_discovery_errors(&errors));
            return Ok(EXIT_DISCOVERY);
        }
        return Ok(EXIT_SUCCESS);
    }

    info!("Running {} definition(s)", definitions.len());
    let mut scheduler = Scheduler::from_config(&config)?;

    let printer = format.streams().then(|| {
        let mut results = scheduler.stream_results();
        let formatter = line_formatter(format);
        tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                println!("{}", formatter.format_result(&result));
            }
        })
    });

    let outcome = scheduler.run(definitions).await?;
    if let Some(printer) = printer {
        printer.await.context("result printer failed")?;
    }

    println!("{}", formatter.format_report(&outcome));

    if let Some(path) = &args.output {
        write_report_to_file(path, &outcome, format)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report saved to: {}", path.display());
    }

    Ok(exit_code(&outcome))
}

fn line_formatter(format: OutputFormat) -> ResultFormatter {
    let formatter = ResultFormatter::new(format);
    if std::io::stdout().is_terminal() {
        formatter
    } else {
        formatter.no_color()
    }
}

/// Layer defaults < config file < environment < command line
pub fn resolve_config(args: &Args, env: &EnvConfig) -> Result<RunConfig> {
    let explicit = args.config.as_deref().or(env.config_file.as_deref());
    let (mut config, source) = load_or_default(explicit)?;
    if let Some(source) = source {
        debug!("Using config file {}", source.display());
    }

    env.apply(&mut config);

    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(capacity) = args.queue_capacity {
        config.queue_capacity = capacity;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = Some(timeout);
    }
    if args.no_capture {
        config.capture_output = false;
    }
    if let Some(mark) = &args.mark {
        config.marker = Some(mark.clone());
    }
    if !args.selectors.is_empty() {
        config.selectors = args.selectors.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Discovery errors take precedence over unit failures
pub fn exit_code(outcome: &RunOutcome) -> u8 {
    if !outcome.discovery_errors.is_empty() {
        EXIT_DISCOVERY
    } else if !outcome.report.is_success() {
        EXIT_FAILURES
    } else {
        EXIT_SUCCESS
    }
}

/// Expanded identifiers the run would schedule, in submission order
pub fn list_units(
    definitions: Vec<TestDefinition>,
    selection: &Selection,
) -> (Vec<String>, Vec<DiscoveryError>) {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut errors = Vec::new();

    for definition in definitions {
        let base = definition.base_id();
        if !seen.insert(base.clone()) {
            errors.push(DiscoveryError::DuplicateTest { test: base });
            continue;
        }
        if !selection.admits_definition(&definition) {
            continue;
        }
        match expand(&Arc::new(definition)) {
            Ok(units) => ids.extend(
                units
                    .into_iter()
                    .filter(|unit| selection.admits_unit(unit))
                    .map(|unit| unit.id),
            ),
            Err(err) => errors.push(err),
        }
    }

    (ids, errors)
}
