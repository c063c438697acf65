//! CLI command definitions for insight-queue.
//!
//! Two commands are provided: `verify` checks configured credentials against
//! the upstream API, and `run` pushes a batch of prompts through the queue
//! and prints the results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::AnalysisClient;
use crate::config::AppConfig;
use crate::credentials::{CredentialError, CredentialVerifier};
use crate::scheduler::{PoolStats, QueueManager};

/// Bounded request queue and worker pool for Gemini analysis calls.
#[derive(Parser)]
#[command(name = "insight-queue")]
#[command(about = "Queue prompts across a pool of Gemini API keys")]
#[command(version)]
#[command(
    long_about = "insight-queue runs a fixed pool of workers, each bound to one verified Gemini API key, behind a bounded FIFO queue.\n\nExample usage:\n  insight-queue verify --config insight.yaml\n  insight-queue run --config insight.yaml --prompt \"Summarize Q3 sales\""
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Verify every configured credential with one real API call.
    Verify(VerifyArgs),

    /// Start the queue, submit prompts concurrently, print results and shut down.
    Run(RunArgs),
}

/// Arguments for `insight-queue verify`.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// YAML configuration file. Environment variables are applied on top.
    #[arg(short, long, env = "INSIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `insight-queue run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// YAML configuration file. Environment variables are applied on top.
    #[arg(short, long, env = "INSIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Prompt to submit (repeatable).
    #[arg(short, long = "prompt")]
    pub prompts: Vec<String>,

    /// File with one prompt per line; blank lines are skipped.
    #[arg(long)]
    pub prompts_file: Option<PathBuf>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,

    /// Print Prometheus metrics after shutdown.
    #[arg(long)]
    pub metrics: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Verify(args) => run_verify_command(args).await,
        Commands::Run(args) => run_run_command(args).await,
    }
}

// ============================================================================
// Verify Command Implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct VerifyEntry {
    id: String,
    display_name: String,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn run_verify_command(args: VerifyArgs) -> anyhow::Result<()> {
    let app = load_config(args.config.as_deref())?;
    let verifier = CredentialVerifier::new(app.client_factory());

    let mut entries: Vec<VerifyEntry> = Vec::with_capacity(app.credentials.len());
    let outcome = verifier.verify_with_report(&app.credentials).await;

    let failures = match &outcome {
        Ok(report) => report.rejected.clone(),
        Err(CredentialError::NoUsableCredentials { failures }) => failures.clone(),
    };

    for credential in &app.credentials {
        let failure = failures.iter().find(|f| f.id == credential.id);
        entries.push(VerifyEntry {
            id: credential.id.clone(),
            display_name: credential.display_name.clone(),
            passed: failure.is_none(),
            reason: failure.map(|f| f.reason.clone()),
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        println!("\n=== Credential Verification ===");
        for entry in &entries {
            if entry.passed {
                println!("  [ok]   {} ({})", entry.id, entry.display_name);
            } else {
                println!(
                    "  [fail] {} ({}): {}",
                    entry.id,
                    entry.display_name,
                    entry.reason.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    let report = outcome?;
    info!(
        verified = report.verified.len(),
        rejected = report.rejected.len(),
        "Verification finished"
    );
    Ok(())
}

// ============================================================================
// Run Command Implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct PromptResult {
    index: usize,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatsSummary {
    workers: usize,
    credentials: usize,
    completed: u64,
    failed: u64,
    success_rate: f64,
    avg_call_ms: u64,
    avg_queue_wait_ms: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    forced_shutdown: bool,
    cancelled_on_shutdown: usize,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    results: Vec<PromptResult>,
    stats: StatsSummary,
}

async fn run_run_command(args: RunArgs) -> anyhow::Result<()> {
    let app = load_config(args.config.as_deref())?;
    let prompts = collect_prompts(&args.prompts, args.prompts_file.as_deref())?;
    if prompts.is_empty() {
        anyhow::bail!("No prompts given; use --prompt or --prompts-file");
    }

    let manager = Arc::new(QueueManager::bootstrap(&app, app.client_factory()).await?);
    let client = AnalysisClient::new(Arc::clone(&manager));

    info!(prompts = prompts.len(), "Submitting prompts");

    let results = join_all(prompts.into_iter().enumerate().map(|(index, prompt)| {
        let client = client.clone();
        async move {
            match client.get_response(prompt.clone()).await {
                Ok(text) => PromptResult {
                    index,
                    prompt,
                    response: Some(text),
                    error_code: None,
                    error: None,
                },
                Err(e) => {
                    warn!(index = index, code = %e.code(), error = %e, "Prompt failed");
                    PromptResult {
                        index,
                        prompt,
                        response: None,
                        error_code: Some(e.code().as_str().to_string()),
                        error: Some(e.to_string()),
                    }
                }
            }
        }
    }))
    .await;

    let report = manager.shutdown().await;
    let stats = summarize(
        &manager.stats(),
        manager.credential_count(),
        report.forced,
        report.drained,
    );

    if args.json {
        let output = RunOutput { results, stats };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_results(&results, &stats);
    }

    if args.metrics {
        println!("{}", manager.metrics().export());
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(Some(path))
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => AppConfig::load(None).context("Failed to load config from environment"),
    }
}

fn collect_prompts(inline: &[String], file: Option<&Path>) -> anyhow::Result<Vec<String>> {
    let mut prompts: Vec<String> = inline
        .iter()
        .filter(|p| !p.trim().is_empty())
        .cloned()
        .collect();

    if let Some(path) = file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompts from {}", path.display()))?;
        prompts.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }

    Ok(prompts)
}

fn summarize(stats: &PoolStats, credentials: usize, forced: bool, drained: usize) -> StatsSummary {
    StatsSummary {
        workers: stats.worker_count,
        credentials,
        completed: stats.requests_completed,
        failed: stats.requests_failed,
        success_rate: stats.success_rate(),
        avg_call_ms: stats.average_call_duration.as_millis() as u64,
        avg_queue_wait_ms: stats.average_queue_wait.as_millis() as u64,
        prompt_tokens: stats.prompt_tokens,
        completion_tokens: stats.completion_tokens,
        forced_shutdown: forced,
        cancelled_on_shutdown: drained,
    }
}

fn print_results(results: &[PromptResult], stats: &StatsSummary) {
    for result in results {
        println!("\n--- Prompt #{} ---", result.index + 1);
        println!("{}", result.prompt);
        match (&result.response, &result.error_code) {
            (Some(text), _) => println!("\n{}", text),
            (None, Some(code)) => println!(
                "\n[{}] {}",
                code,
                result.error.as_deref().unwrap_or_default()
            ),
            (None, None) => println!("\n(no result)"),
        }
    }

    println!("\n=== Queue Statistics ===");
    println!("Workers:        {}", stats.workers);
    println!("Credentials:    {}", stats.credentials);
    println!("Completed:      {}", stats.completed);
    println!("Failed:         {}", stats.failed);
    println!("Success rate:   {:.1}%", stats.success_rate);
    println!("Avg call time:  {}ms", stats.avg_call_ms);
    println!("Avg queue wait: {}ms", stats.avg_queue_wait_ms);
    println!(
        "Tokens:         {} in / {} out",
        stats.prompt_tokens, stats.completion_tokens
    );
    if stats.forced_shutdown {
        println!("Shutdown:       forced");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "insight-queue",
            "run",
            "--config",
            "insight.yaml",
            "--prompt",
            "first",
            "-p",
            "second",
            "--json",
            "--log-level",
            "debug",
        ])
        .expect("arguments should parse");

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, Some(PathBuf::from("insight.yaml")));
                assert_eq!(args.prompts, vec!["first", "second"]);
                assert!(args.json);
                assert!(!args.metrics);
            }
            Commands::Verify(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_verify_command() {
        let cli = Cli::try_parse_from(["insight-queue", "verify", "-c", "keys.yaml"])
            .expect("arguments should parse");

        assert_eq!(cli.log_level, "info");
        assert!(matches!(cli.command, Commands::Verify(_)));
    }

    #[test]
    fn test_collect_prompts_merges_inline_and_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "from file one\n\n   \nfrom file two").expect("write prompts");

        let prompts = collect_prompts(
            &["inline".to_string(), " ".to_string()],
            Some(file.path()),
        )
        .expect("prompts");
        assert_eq!(prompts, vec!["inline", "from file one", "from file two"]);
    }

    #[test]
    fn test_collect_prompts_missing_file() {
        let err = collect_prompts(&[], Some(Path::new("/nonexistent/prompts.txt"))).unwrap_err();
        assert!(err.to_string().contains("prompts.txt"));
    }

    #[test]
    fn test_summarize_stats() {
        let stats = PoolStats {
            worker_count: 4,
            requests_completed: 3,
            requests_failed: 1,
            ..Default::default()
        };

        let summary = summarize(&stats, 2, false, 0);
        assert_eq!(summary.workers, 4);
        assert_eq!(summary.credentials, 2);
        assert!((summary.success_rate - 75.0).abs() < f64::EPSILON);
    }
}
