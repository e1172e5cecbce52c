use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use plc_logger_lib::config::validate_output_path;
use plc_logger_lib::{
    CipTagReader, ConnectOptions, CsvSink, LoggerConfig, LoggerError, SampleAssembler, Session, StopReason, StopToken,
    TagReader, Trigger,
};

const STOP_HELP: &str = "To stop logging, type the quit key on stdin and press Enter, or press Ctrl+C. \
Rows written before the stop stay in the output file.";

/// Log controller tags to CSV whenever a trigger condition fires.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, after_help = STOP_HELP)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(short, long)]
    conf: PathBuf,
    /// Path to the output CSV file.
    #[arg(short, long)]
    file: PathBuf,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    /// Stops logging when typed on stdin followed by Enter.
    #[arg(long, default_value = "q")]
    quit_key: String,
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<WarnLevel>) -> Result<Option<WorkerGuard>> {
    // stdout carries the progress dots; diagnostics go to stderr.
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

/// Ctrl+C stops the loop through the token so cleanup still runs.
fn watch_interrupt(stop: StopToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => stop.cancel(StopReason::Interrupt),
            Err(e) => warn!("Cannot listen for Ctrl+C: {}", e),
        }
    });
}

/// A plain thread, so a pending stdin read never holds up runtime shutdown.
fn watch_quit_key(stop: StopToken, key: String) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case(&key) {
                stop.cancel(StopReason::QuitKey);
                break;
            }
        }
    });
}

/// Validates the setup, connects and opens the sink. Nothing is written to
/// the output file yet.
async fn prepare(cli: &Cli) -> Result<Session<CipTagReader>> {
    validate_output_path(&cli.file)?;
    let config = LoggerConfig::from_path(&cli.conf)
        .with_context(|| format!("Failed to load config {}", cli.conf.display()))?;
    let trigger = Trigger::from_config(&config)?;
    let assembler = SampleAssembler::from_config(&config);

    let mut reader = CipTagReader::connect(&ConnectOptions::from_config(&config)).await?;
    let sink = match CsvSink::open(&cli.file, config.write_policy()) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = reader.close().await;
            return Err(e).with_context(|| format!("Failed to open {}", cli.file.display()));
        }
    };

    let stop = StopToken::new();
    watch_interrupt(stop.clone());
    watch_quit_key(stop.clone(), cli.quit_key.clone());

    println!(
        "starting with trigger: {} - type {} and press Enter to quit logging",
        trigger.describe(),
        cli.quit_key
    );
    Ok(Session::new(reader, trigger, assembler, sink, stop)
        .with_poll_interval(config.poll_interval())
        .with_stdout_progress())
}

/// Console lines for a fatal error. `output` is set once the session owned
/// the sink, so a file left by an earlier run is never reported.
fn failure_lines(e: &anyhow::Error, output: Option<&Path>) -> Vec<String> {
    let kind = e.downcast_ref::<LoggerError>().map_or("Error", LoggerError::kind);
    let mut lines = vec![format!("\nerror encountered ({}): {:#}. exiting...", kind, e)];
    if let Some(path) = output.filter(|p| p.exists()) {
        lines.push(format!("data saved to {}", path.display()));
    }
    lines
}

fn fail(e: anyhow::Error, output: Option<&Path>, guard: Option<WorkerGuard>) -> ! {
    error!("Logging failed: {:?}", e);
    for line in failure_lines(&e, output) {
        println!("{}", line);
    }
    drop(guard);
    process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    let session = match prepare(&cli).await {
        Ok(session) => session,
        Err(e) => fail(e, None, guard),
    };
    match session.run().await {
        Ok(report) => {
            println!("\nexiting...");
            info!(samples = report.samples, reason = %report.reason, "Logging stopped");
            println!("data saved to {}", report.output.display());
            Ok(())
        }
        Err(e) => fail(e.into(), Some(&cli.file), guard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn help_explains_how_to_stop() {
        Cli::command().debug_assert();
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("--quit-key"));
        assert!(help.contains("press Enter"));
    }

    #[test]
    fn early_failure_does_not_claim_saved_data() {
        let existing = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
        let e = anyhow::Error::from(LoggerError::Config("tags must not be empty".to_string()));

        let lines = failure_lines(&e, None);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("error encountered (ConfigError)"));

        let lines = failure_lines(&e, Some(&existing));
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("data saved to "));
    }
}
