// crates/scd-pipeline-cli/src/main.rs
// ============================================================================
// Module: SCD Pipeline CLI Entry Point
// Description: Command dispatcher for pipeline steps, queries, and the server.
// Purpose: Give orchestrators one idempotent subcommand per pipeline step.
// Dependencies: clap, scd-pipeline-config, scd-pipeline-core, scd-pipeline-server, tokio.
// ============================================================================

//! ## Overview
//! Every pipeline step is a separate subcommand so an external scheduler can
//! trigger, retry, and sequence them. Successful steps print their report as
//! canonical JSON on stdout. Failed steps print a `FailureReport` as JSON on
//! stderr and exit with `75` (`EX_TEMPFAIL`) when re-running the whole step is
//! safe, or `1` otherwise.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use clap::ArgAction;
use clap::Args;
use clap::CommandFactory;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use scd_pipeline_cli::serve_policy::ALLOW_NON_LOOPBACK_ENV;
use scd_pipeline_cli::serve_policy::BindOutcome;
use scd_pipeline_cli::serve_policy::enforce_local_only;
use scd_pipeline_cli::serve_policy::resolve_allow_non_loopback;
use scd_pipeline_cli::t;
use scd_pipeline_config::ScdPipelineConfig;
use scd_pipeline_config::ServerAuthMode;
use scd_pipeline_config::config_toml_example;
use scd_pipeline_core::BatchId;
use scd_pipeline_core::IngestRequest;
use scd_pipeline_core::IngestionMode;
use scd_pipeline_core::Pipeline;
use scd_pipeline_core::PipelineError;
use scd_pipeline_core::PipelineStep;
use scd_pipeline_core::ReplayRequest;
use scd_pipeline_core::SharedPipelineStore;
use scd_pipeline_core::SplitLabel;
use scd_pipeline_core::SplitRequest;
use scd_pipeline_core::StreamId;
use scd_pipeline_core::Timestamp;
use scd_pipeline_core::core::hashing::canonical_json_bytes;
use scd_pipeline_server::PipelineServer;
use scd_pipeline_server::ServerError;
use scd_pipeline_server::build_pipeline;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Exit code for failures that are safe to retry (`EX_TEMPFAIL`).
const EXIT_RETRY_SAFE: u8 = 75;

/// Exit code for failures that need operator attention.
const EXIT_FAILURE: u8 = 1;

/// Prefix of the default lease holder label.
const HOLDER_PREFIX: &str = "scd-pipeline-cli";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "scd-pipeline", disable_help_subcommand = true, disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Optional config file path (defaults to scd-pipeline.toml or env override).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest the next chunk (or the full dataset) of a stream.
    Ingest(IngestCommand),
    /// Replay a landed batch through historization.
    Historize(HistorizeCommand),
    /// Label current, unassigned versions with train/validation/test.
    AssignSplits(AssignSplitsCommand),
    /// Print ingestion progress.
    Status(StatusCommand),
    /// Print the version history of one entity.
    History(HistoryCommand),
    /// Print current versions carrying a split label.
    Records(RecordsCommand),
    /// Start the read-only progress server.
    Serve(ServeCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Invocation metadata shared by write steps.
#[derive(Args, Debug)]
struct StepArgs {
    /// Invocation time in unix milliseconds (defaults to now).
    #[arg(long, value_name = "MILLIS")]
    as_of_unix_ms: Option<i64>,
    /// Lease holder label (defaults to scd-pipeline-cli:<pid>).
    #[arg(long, value_name = "LABEL")]
    holder: Option<String>,
}

/// Ingestion modes accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy)]
enum ModeArg {
    /// Consume at most one chunk past the cursor.
    Chunked,
    /// Reset the cursor and consume every record.
    Full,
}

impl From<ModeArg> for IngestionMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Chunked => Self::Chunked,
            ModeArg::Full => Self::Full,
        }
    }
}

/// Split labels accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy)]
enum SplitArg {
    /// Training partition.
    Train,
    /// Validation partition.
    Validation,
    /// Test partition.
    Test,
}

impl From<SplitArg> for SplitLabel {
    fn from(value: SplitArg) -> Self {
        match value {
            SplitArg::Train => Self::Train,
            SplitArg::Validation => Self::Validation,
            SplitArg::Test => Self::Test,
        }
    }
}

/// Arguments for `ingest`.
#[derive(Args, Debug)]
struct IngestCommand {
    /// Stream identifier.
    #[arg(long, value_name = "ID")]
    stream: String,
    /// Ingestion mode.
    #[arg(long, value_enum, default_value = "chunked")]
    mode: ModeArg,
    /// Chunk size override (defaults to the stream's configured size).
    #[arg(long, value_name = "N")]
    chunk_size: Option<u64>,
    /// Invocation metadata.
    #[command(flatten)]
    step: StepArgs,
}

/// Arguments for `historize`.
#[derive(Args, Debug)]
struct HistorizeCommand {
    /// Stream identifier.
    #[arg(long, value_name = "ID")]
    stream: String,
    /// Landed batch to replay.
    #[arg(long, value_name = "BATCH")]
    batch_id: String,
    /// Invocation metadata.
    #[command(flatten)]
    step: StepArgs,
}

/// Arguments for `assign-splits`.
#[derive(Args, Debug)]
struct AssignSplitsCommand {
    /// Stream identifier.
    #[arg(long, value_name = "ID")]
    stream: String,
    /// Ordering seed override (defaults to `splits.seed`).
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,
    /// Invocation metadata.
    #[command(flatten)]
    step: StepArgs,
}

/// Arguments for `status`.
#[derive(Args, Debug)]
struct StatusCommand {
    /// Stream identifier (all configured streams when omitted).
    #[arg(long, value_name = "ID")]
    stream: Option<String>,
}

/// Arguments for `history`.
#[derive(Args, Debug)]
struct HistoryCommand {
    /// Stream identifier.
    #[arg(long, value_name = "ID")]
    stream: String,
    /// Natural key fields as a JSON object, e.g. '{"ID": "A-1"}'.
    #[arg(long, value_name = "JSON")]
    key: String,
    /// Return only the version valid at this unix millisecond.
    #[arg(long, value_name = "MILLIS")]
    at_unix_ms: Option<i64>,
}

/// Arguments for `records`.
#[derive(Args, Debug)]
struct RecordsCommand {
    /// Stream identifier.
    #[arg(long, value_name = "ID")]
    stream: String,
    /// Split label to list.
    #[arg(long, value_enum)]
    split: SplitArg,
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Allow binding to non-loopback addresses (requires api_key auth).
    #[arg(long, action = ArgAction::SetTrue)]
    allow_non_loopback: bool,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a config file.
    Validate,
    /// Print an annotated example config.
    Example,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for localized error messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`] from a localized message.
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();

    if cli.show_version {
        let version = env!("CARGO_PKG_VERSION");
        write_stdout_line(&t!("main.version", version = version))
            .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = cli.command else {
        show_help()?;
        return Ok(ExitCode::SUCCESS);
    };
    let config_path = cli.config;

    match command {
        Commands::Ingest(command) => {
            let config = load_config(config_path)?;
            command_ingest(&config, &command)
        }
        Commands::Historize(command) => {
            let config = load_config(config_path)?;
            command_historize(&config, &command)
        }
        Commands::AssignSplits(command) => {
            let config = load_config(config_path)?;
            command_assign_splits(&config, &command)
        }
        Commands::Status(command) => {
            let config = load_config(config_path)?;
            command_status(&config, &command)
        }
        Commands::History(command) => {
            let config = load_config(config_path)?;
            command_history(&config, &command)
        }
        Commands::Records(command) => {
            let config = load_config(config_path)?;
            command_records(&config, &command)
        }
        Commands::Serve(command) => {
            let config = load_config(config_path)?;
            command_serve(config, &command).await
        }
        Commands::Config {
            command,
        } => command_config(config_path, &command),
    }
}

/// Emits the top-level help message for the CLI.
fn show_help() -> CliResult<()> {
    let mut command = Cli::command();
    command.print_help().map_err(|err| CliError::new(output_error("stdout", &err)))?;
    write_stdout_line("").map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(())
}

// ============================================================================
// SECTION: Step Commands
// ============================================================================

/// Executes the `ingest` command.
fn command_ingest(config: &ScdPipelineConfig, command: &IngestCommand) -> CliResult<ExitCode> {
    let pipeline = open_pipeline(config)?;
    let request = IngestRequest {
        stream_id: StreamId::new(command.stream.as_str()),
        mode: command.mode.into(),
        chunk_size: command.chunk_size,
        as_of: resolve_as_of(&command.step)?,
        holder: resolve_holder(&command.step),
    };
    finish_step(PipelineStep::Ingest, pipeline.ingest_chunk(&request))
}

/// Executes the `historize` command.
fn command_historize(
    config: &ScdPipelineConfig,
    command: &HistorizeCommand,
) -> CliResult<ExitCode> {
    let pipeline = open_pipeline(config)?;
    let request = ReplayRequest {
        stream_id: StreamId::new(command.stream.as_str()),
        batch_id: BatchId::new(command.batch_id.as_str()),
        as_of: resolve_as_of(&command.step)?,
        holder: resolve_holder(&command.step),
    };
    finish_step(PipelineStep::Historize, pipeline.historize_batch(&request))
}

/// Executes the `assign-splits` command.
fn command_assign_splits(
    config: &ScdPipelineConfig,
    command: &AssignSplitsCommand,
) -> CliResult<ExitCode> {
    let pipeline = open_pipeline(config)?;
    let request = SplitRequest {
        stream_id: StreamId::new(command.stream.as_str()),
        ratios: config.splits.ratios(),
        seed: command.seed.unwrap_or(config.splits.seed),
        stratify_by: config.splits.stratify_by.clone(),
        as_of: resolve_as_of(&command.step)?,
        holder: resolve_holder(&command.step),
    };
    finish_step(PipelineStep::AssignSplits, pipeline.assign_splits(&request))
}

// ============================================================================
// SECTION: Query Commands
// ============================================================================

/// Executes the `status` command.
fn command_status(config: &ScdPipelineConfig, command: &StatusCommand) -> CliResult<ExitCode> {
    let pipeline = open_pipeline(config)?;
    if let Some(stream) = &command.stream {
        let stream_id = StreamId::new(stream.as_str());
        return finish_step(PipelineStep::Progress, pipeline.progress(&stream_id));
    }
    let stream_ids: Vec<StreamId> = pipeline.stream_ids().cloned().collect();
    let reports: Result<Vec<_>, PipelineError> =
        stream_ids.iter().map(|stream_id| pipeline.progress(stream_id)).collect();
    finish_step(PipelineStep::Progress, reports)
}

/// Executes the `history` command.
fn command_history(config: &ScdPipelineConfig, command: &HistoryCommand) -> CliResult<ExitCode> {
    let pipeline = open_pipeline(config)?;
    let stream_id = StreamId::new(command.stream.as_str());
    let Some(definition) = pipeline.stream(&stream_id) else {
        let err = PipelineError::UnknownStream(stream_id.as_str().to_string());
        return finish_step::<()>(PipelineStep::Query, Err(err));
    };
    let raw: Value = serde_json::from_str(&command.key).map_err(|err| {
        CliError::new(t!("history.key.invalid", key = command.key, error = err))
    })?;
    let Value::Object(fields) = raw else {
        return Err(CliError::new(t!("history.key.not_object")));
    };
    let natural_key = definition.schema.natural_key_of(&fields).map_err(|err| {
        CliError::new(t!("history.key.invalid", key = command.key, error = err))
    })?;
    match command.at_unix_ms {
        Some(at) => {
            let at = non_negative_millis("--at-unix-ms", at)?;
            finish_step(PipelineStep::Query, pipeline.version_as_of(&stream_id, &natural_key, at))
        }
        None => finish_step(PipelineStep::Query, pipeline.history(&stream_id, &natural_key)),
    }
}

/// Executes the `records` command.
fn command_records(config: &ScdPipelineConfig, command: &RecordsCommand) -> CliResult<ExitCode> {
    let pipeline = open_pipeline(config)?;
    let stream_id = StreamId::new(command.stream.as_str());
    finish_step(PipelineStep::Query, pipeline.records_by_split(&stream_id, command.split.into()))
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(config: ScdPipelineConfig, command: &ServeCommand) -> CliResult<ExitCode> {
    let allow_non_loopback = resolve_allow_non_loopback(command.allow_non_loopback)
        .map_err(|err| CliError::new(err.to_string()))?;
    let bind_outcome = enforce_local_only(&config, allow_non_loopback)
        .map_err(|err| CliError::new(err.to_string()))?;
    warn_loopback_only(&bind_outcome, allow_non_loopback)?;
    if bind_outcome.network_exposed {
        warn_network_exposure(&bind_outcome)?;
    }

    let server = tokio::task::spawn_blocking(move || PipelineServer::from_config(config))
        .await
        .map_err(|err| {
            CliError::new(t!("serve.init_failed", error = format!("init join failed: {err}")))
        })?
        .map_err(|err| CliError::new(t!("serve.init_failed", error = err)))?;
    server
        .serve()
        .await
        .map_err(|err: ServerError| CliError::new(t!("serve.failed", error = err)))?;

    Ok(ExitCode::SUCCESS)
}

/// Notes that the server is loopback-only when no opt-in was given.
fn warn_loopback_only(outcome: &BindOutcome, allow_non_loopback: bool) -> CliResult<()> {
    if outcome.network_exposed || allow_non_loopback {
        return Ok(());
    }
    write_stderr_line(&t!("serve.warn.loopback_only", env = ALLOW_NON_LOOPBACK_ENV))
        .map_err(|err| CliError::new(output_error("stderr", &err)))
}

/// Emits a security warning banner when the server is network-exposed.
fn warn_network_exposure(outcome: &BindOutcome) -> CliResult<()> {
    let audit_status = if outcome.audit_enabled {
        t!("serve.warn.network.enabled")
    } else {
        t!("serve.warn.network.disabled")
    };
    let auth_mode = match outcome.auth_mode {
        ServerAuthMode::LocalOnly => "local_only",
        ServerAuthMode::ApiKey => "api_key",
    };
    let lines = [
        t!("serve.warn.network.header"),
        t!("serve.warn.network.bind", bind = outcome.bind_addr),
        t!("serve.warn.network.auth", mode = auth_mode),
        t!("serve.warn.network.audit", status = audit_status),
        t!("serve.warn.network.footer"),
    ];
    for line in lines {
        write_stderr_line(&line).map_err(|err| CliError::new(output_error("stderr", &err)))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(config_path: Option<PathBuf>, command: &ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate => {
            load_config(config_path)?;
            write_stdout_line(&t!("config.validate.ok"))
                .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        }
        ConfigCommand::Example => {
            write_stdout_bytes(config_toml_example().as_bytes())
                .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Pipeline Helpers
// ============================================================================

/// Loads and validates configuration.
fn load_config(path: Option<PathBuf>) -> CliResult<ScdPipelineConfig> {
    ScdPipelineConfig::load(path.as_deref())
        .map_err(|err| CliError::new(t!("config.load_failed", error = err)))
}

/// Builds the configured pipeline.
fn open_pipeline(config: &ScdPipelineConfig) -> CliResult<Pipeline<SharedPipelineStore>> {
    build_pipeline(config).map_err(|err| CliError::new(t!("pipeline.init_failed", error = err)))
}

/// Resolves the invocation time from the flag or the system clock.
fn resolve_as_of(step: &StepArgs) -> CliResult<Timestamp> {
    if let Some(millis) = step.as_of_unix_ms {
        return non_negative_millis("--as-of-unix-ms", millis);
    }
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| CliError::new(t!("time.system_failed", error = err)))?;
    let millis =
        i64::try_from(elapsed.as_millis()).map_err(|_| CliError::new(t!("time.overflow")))?;
    Ok(Timestamp::from_unix_millis(millis))
}

/// Rejects negative unix millisecond flags.
fn non_negative_millis(flag: &str, millis: i64) -> CliResult<Timestamp> {
    if millis < 0 {
        return Err(CliError::new(t!("time.negative", flag = flag)));
    }
    Ok(Timestamp::from_unix_millis(millis))
}

/// Resolves the lease holder label.
fn resolve_holder(step: &StepArgs) -> String {
    step.holder.clone().unwrap_or_else(|| format!("{HOLDER_PREFIX}:{}", std::process::id()))
}

/// Prints a step result and maps failures to exit codes.
///
/// Failures are reported as JSON on stderr, never as a [`CliError`], so a
/// scheduler can parse them.
fn finish_step<T: Serialize>(
    step: PipelineStep,
    result: Result<T, PipelineError>,
) -> CliResult<ExitCode> {
    match result {
        Ok(report) => {
            write_canonical_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            let report = err.report(step);
            let bytes = canonical_output_bytes(&report)?;
            write_stderr_bytes_with_newline(&bytes)?;
            let code = if report.retry_safe { EXIT_RETRY_SAFE } else { EXIT_FAILURE };
            Ok(ExitCode::from(code))
        }
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Computes canonical JSON bytes for output rendering.
fn canonical_output_bytes<T: Serialize>(value: &T) -> CliResult<Vec<u8>> {
    canonical_json_bytes(value)
        .map_err(|err| CliError::new(t!("output.serialize_failed", error = err)))
}

/// Writes canonical JSON to stdout with a trailing newline.
fn write_canonical_json<T: Serialize>(value: &T) -> CliResult<()> {
    let mut bytes = canonical_output_bytes(value)?;
    bytes.push(b'\n');
    write_stdout_bytes(&bytes).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes raw bytes to stdout without adding a newline.
fn write_stdout_bytes(bytes: &[u8]) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(bytes)
}

/// Writes raw bytes to stderr with a trailing newline.
fn write_stderr_bytes_with_newline(bytes: &[u8]) -> CliResult<()> {
    let mut stderr = std::io::stderr();
    stderr
        .write_all(bytes)
        .and_then(|()| stderr.write_all(b"\n"))
        .map_err(|err| CliError::new(output_error("stderr", &err)))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats a localized output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    let stream_label = match stream {
        "stdout" => t!("output.stream.stdout"),
        "stderr" => t!("output.stream.stderr"),
        _ => t!("output.stream.unknown"),
    };
    t!("output.write_failed", stream = stream_label, error = error)
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
