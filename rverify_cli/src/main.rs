use anyhow::Context;
use clap::{Parser, Subcommand};
use rverify_common::{
    codes, ensure_config, keys, load_config, CompareResult, ContentType, DiffEntry, EngineConfig,
    ResultType, RuleConfig, VerifyError,
};
use rverify_core::session::SessionStatus;
use rverify_core::{
    highlight, CompareRequest, ComparisonManager, HighlightOptions, HighlighterResult, Session,
    SessionManager,
};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit status when the compared content differs
const EXIT_DIFFERENT: i32 = 2;

#[derive(Parser)]
#[command(name = "rverify")]
#[command(author = "RVerify Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Structural comparison of expected and actual test results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two files of one content type
    Compare {
        /// Content type (JSON, XML, MASKED_XML, CSV, TABLE, PLAIN_TEXT, FULL_TEXT, TASK_LIST, PRIMITIVES)
        #[arg(short = 't', long = "type", value_parser = parse_content_type)]
        content_type: ContentType,

        /// Expected result file
        expected: PathBuf,

        /// Actual result file
        actual: PathBuf,

        /// Comparison rule as key=value (can be specified multiple times)
        #[arg(short, long = "rule")]
        rules: Vec<String>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Include the side-by-side highlight in JSON output
        #[arg(long, requires = "json")]
        highlight: bool,
    },

    /// Run a batch request of expected/actual pairs as a session queue
    Batch {
        /// JSON request with `rules` and `pairs`
        request: PathBuf,

        /// Sessions allowed to run at once (defaults to the configured value)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Give up waiting after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Render the highlight tree for a list of diff entries
    Highlight {
        #[arg(short = 't', long = "type", value_parser = parse_content_type)]
        content_type: ContentType,

        /// JSON array of diff entries
        #[arg(short, long)]
        diffs: PathBuf,

        /// Expected result file
        expected: PathBuf,

        /// Actual result file
        actual: PathBuf,

        /// Base64-encode node values
        #[arg(long)]
        encode: bool,

        /// Flatten nodes at this depth
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Show the engine configuration
    Config {
        /// Write the configuration file if it does not exist yet
        #[arg(long)]
        init: bool,

        /// Keep the configuration next to the executable
        #[arg(long)]
        portable: bool,
    },
}

fn parse_content_type(value: &str) -> Result<ContentType, String> {
    value.parse().map_err(|e: VerifyError| e.to_string())
}

fn main() {
    // Initialize tracing to stderr (so JSON output can go cleanly to stdout)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Compare {
            content_type,
            expected,
            actual,
            rules,
            json,
            highlight,
        } => run_compare(content_type, &expected, &actual, &rules, json, highlight),
        Commands::Batch {
            request,
            concurrency,
            timeout_ms,
        } => run_batch(&request, concurrency, timeout_ms),
        Commands::Highlight {
            content_type,
            diffs,
            expected,
            actual,
            encode,
            max_depth,
        } => run_highlight(content_type, &diffs, &expected, &actual, encode, max_depth),
        Commands::Config { init, portable } => run_config(init, portable),
    };

    match outcome {
        Ok(Outcome::Same) => {}
        Ok(Outcome::Different) => std::process::exit(EXIT_DIFFERENT),
        Err(e) => {
            error!("{:#}", e);
            if e.downcast_ref::<Reported>().is_none() {
                if let Err(print_err) = print_json(&ErrorEnvelope::of(&e)) {
                    error!("Cannot write error envelope: {}", print_err);
                }
            }
            std::process::exit(1);
        }
    }
}

/// Failure whose report already went to stdout
#[derive(Debug)]
struct Reported(String);

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Reported {}

enum Outcome {
    Same,
    Different,
}

impl Outcome {
    fn of(result: ResultType) -> Self {
        if result.is_difference() {
            Outcome::Different
        } else {
            Outcome::Same
        }
    }
}

/// Status/message pair reported in place of a result
#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    status: u32,
    message: String,
}

impl From<&VerifyError> for ErrorEnvelope {
    fn from(err: &VerifyError) -> Self {
        Self {
            status: err.code(),
            message: err.to_string(),
        }
    }
}

impl ErrorEnvelope {
    /// Envelope of any subcommand failure; file access problems report as IO errors.
    fn of(err: &anyhow::Error) -> Self {
        if let Some(verify) = err.chain().find_map(|c| c.downcast_ref::<VerifyError>()) {
            return Self::from(verify);
        }
        let status = if err.chain().any(|c| c.is::<std::io::Error>()) {
            codes::IO
        } else {
            codes::INTERNAL
        };
        Self {
            status,
            message: format!("{:#}", err),
        }
    }
}

fn engine_config() -> anyhow::Result<EngineConfig> {
    let loaded = load_config(false)?;
    info!("Using configuration {}", loaded.path.display());
    Ok(loaded.config)
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct CompareReport {
    content_type: ContentType,
    result: ResultType,
    diffs: Vec<DiffEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    highlight: Option<HighlighterResult>,
}

fn run_compare(
    content_type: ContentType,
    expected_path: &Path,
    actual_path: &Path,
    rule_args: &[String],
    json: bool,
    with_highlight: bool,
) -> anyhow::Result<Outcome> {
    let expected = read_text(expected_path)?;
    let actual = read_text(actual_path)?;
    let rules = RuleConfig::from_pairs(rule_args.iter().map(String::as_str))
        .map_err(VerifyError::BadRequest)?;
    let config = engine_config()?;

    info!("Comparing {} content:", content_type);
    info!("  Expected: {}", expected_path.display());
    info!("  Actual:   {}", actual_path.display());

    let manager = ComparisonManager::with_config(&config);
    let diffs = manager.compare_raw(content_type, &expected, &actual, &rules)?;
    let result = ResultType::worst(diffs.iter().map(|d| d.result));

    if json {
        let rendered = if with_highlight {
            let mut options = HighlightOptions::from_config(&config);
            options.case_insensitive_keys = rules.flag(keys::CASE_INSENSITIVE_KEYS);
            Some(highlight(content_type, &diffs, &expected, &actual, &options)?)
        } else {
            None
        };
        print_json(&CompareReport {
            content_type,
            result,
            diffs,
            highlight: rendered,
        })?;
        return Ok(Outcome::of(result));
    }

    println!("\n{}", "=".repeat(80));
    println!("Comparison Results ({})", content_type);
    println!("{}", "=".repeat(80));
    for diff in &diffs {
        println!(
            "  {:<10} {:<40} {} -> {}",
            diff.result.as_str(),
            diff.locator().unwrap_or("-"),
            diff.expected_value.as_deref().unwrap_or("(none)"),
            diff.actual_value.as_deref().unwrap_or("(none)")
        );
        if let Some(description) = &diff.description {
            println!("             {}", description);
        }
    }
    println!("\n{}", "=".repeat(80));
    println!("Summary:");
    println!("  Differences:     {}", diffs.len());
    println!("  Result:          {}", result);
    println!("{}", "=".repeat(80));

    Ok(Outcome::of(result))
}

/// One pair of a session: its result, or the envelope of its failure
#[derive(Serialize)]
#[serde(untagged)]
enum PairReport {
    Compared(CompareResult),
    Failed { error: ErrorEnvelope },
}

#[derive(Serialize)]
struct BatchEntry {
    session: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<PairReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorEnvelope>,
}

fn run_batch(
    request_path: &Path,
    concurrency: Option<usize>,
    timeout_ms: Option<u64>,
) -> anyhow::Result<Outcome> {
    let payload = read_text(request_path)?;
    let request: CompareRequest =
        serde_json::from_str(&payload).map_err(|e| VerifyError::BadRequest(e.to_string()))?;

    let config = engine_config()?;
    let comparisons = Arc::new(ComparisonManager::with_config(&config));
    let sessions: Vec<Arc<Session>> = request
        .pairs
        .into_iter()
        .map(|pair| {
            Arc::new(Session::for_comparison(
                Arc::clone(&comparisons),
                vec![pair],
                request.rules.clone(),
            ))
        })
        .collect();

    let sessions_manager = SessionManager::new(config);
    let queue = sessions_manager.new_queue(sessions, concurrency)?;
    let waited = match timeout_ms {
        Some(ms) => sessions_manager.run_queue_timeout(queue.id(), Duration::from_millis(ms)),
        None => sessions_manager.run_queue(queue.id()),
    };
    waited?;

    let mut failed = 0;
    let mut worst = Vec::new();
    let entries: Vec<BatchEntry> = queue
        .sessions()
        .iter()
        .map(|session| {
            let status = SessionStatus::of(session);
            match session.outcome() {
                Some(Ok(pairs)) => {
                    let results = pairs
                        .into_iter()
                        .map(|pair| match pair {
                            Ok(result) => {
                                worst.push(result.result);
                                PairReport::Compared(result)
                            }
                            Err(e) => {
                                failed += 1;
                                PairReport::Failed {
                                    error: ErrorEnvelope::from(&e),
                                }
                            }
                        })
                        .collect();
                    BatchEntry {
                        session: status,
                        results: Some(results),
                        error: None,
                    }
                }
                Some(Err(e)) => {
                    failed += 1;
                    BatchEntry {
                        session: status,
                        results: None,
                        error: Some(ErrorEnvelope::from(&e)),
                    }
                }
                None => {
                    failed += 1;
                    BatchEntry {
                        session: status,
                        results: None,
                        error: Some(ErrorEnvelope::from(&VerifyError::Session(
                            "Session produced no outcome".to_string(),
                        ))),
                    }
                }
            }
        })
        .collect();
    print_json(&entries)?;

    if failed > 0 {
        return Err(Reported(format!("{} comparison(s) failed", failed)).into());
    }
    Ok(Outcome::of(ResultType::worst(worst)))
}

fn run_highlight(
    content_type: ContentType,
    diffs_path: &Path,
    expected_path: &Path,
    actual_path: &Path,
    encode: bool,
    max_depth: Option<usize>,
) -> anyhow::Result<Outcome> {
    let diffs: Vec<DiffEntry> = serde_json::from_str(&read_text(diffs_path)?)
        .map_err(|e| VerifyError::BadRequest(e.to_string()))?;
    let expected = read_text(expected_path)?;
    let actual = read_text(actual_path)?;

    let config = engine_config()?;
    let mut options = HighlightOptions::from_config(&config);
    options.encode |= encode;
    if let Some(depth) = max_depth {
        options.max_depth = depth;
    }

    print_json(&highlight(content_type, &diffs, &expected, &actual, &options)?)?;
    Ok(Outcome::Same)
}

fn run_config(init: bool, portable: bool) -> anyhow::Result<Outcome> {
    let loaded = if init {
        ensure_config(portable)?
    } else {
        load_config(portable)?
    };
    println!("# {}", loaded.path.display());
    print!("{}", toml::to_string_pretty(&loaded.config)?);
    Ok(Outcome::Same)
}
