use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::env;
use std::path::PathBuf;

use local_pulse::report::FailureSamples;
use local_pulse::{
    adapter_for, logging, AnalyticsScope, AppConfig, CancelToken, KeywordScope, Pipeline,
};

const USAGE: &str = "\
Usage: local-pulse [--config FILE] <command>

Commands:
  ingest <places|directory|scrape> <file>    Reconcile one source batch
  analyze [--business ID | --since RFC3339]  Recompute sentiment and keywords
  scan [--as-of RFC3339]                     Detect rating/volume anomalies
  trending [--days N] [--business ID] [--limit N] [--as-of RFC3339]
  queue                                      List candidates awaiting manual review";

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let config_path = take_flag(&mut args, "--config")?.map(PathBuf::from);

    let config = AppConfig::load(config_path.as_deref())?;
    config.validate()?;
    logging::init(&config.logging.level);

    let Some(command) = args.first().cloned() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };
    let rest = args.split_off(1);

    match command.as_str() {
        "ingest" => run_ingest(config, rest),
        "analyze" => run_analyze(config, rest),
        "scan" => run_scan(config, rest),
        "trending" => run_trending(config, rest),
        "queue" => run_queue(config),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("❌ Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

fn run_ingest(config: AppConfig, args: Vec<String>) -> Result<()> {
    let [source, file] = args.as_slice() else {
        bail!("ingest expects <places|directory|scrape> <file>");
    };

    let adapter = adapter_for(source, &PathBuf::from(file))?;
    let pipeline = Pipeline::open(config)?;

    println!("📥 Ingesting {} from {}", adapter.source_name(), file);
    let report = pipeline.ingest_batch(adapter.as_ref(), &CancelToken::new())?;

    println!("\n{}", report.summary());
    print_samples("Invalid records", &report.validation_errors);
    print_samples("Dropped reviews", &report.reviews_dropped);
    print_samples("Queued for manual review", &report.queued_ambiguities);
    print_samples("Persistence failures", &report.persistence_errors);

    println!(
        "\n✓ Store holds {} businesses, {} reviews",
        pipeline.store().business_count()?,
        pipeline.store().review_count()?
    );
    Ok(())
}

fn run_analyze(config: AppConfig, mut args: Vec<String>) -> Result<()> {
    let business = take_flag(&mut args, "--business")?;
    let since = take_flag(&mut args, "--since")?
        .map(|s| parse_instant(&s))
        .transpose()?;
    reject_leftovers(&args)?;

    let scope = match (business, since) {
        (Some(_), Some(_)) => bail!("--business and --since are mutually exclusive"),
        (Some(id), None) => AnalyticsScope::Business(id),
        (None, Some(t)) => AnalyticsScope::Since(t),
        (None, None) => AnalyticsScope::All,
    };

    let pipeline = Pipeline::open(config)?;
    println!("🧮 Recomputing analytics ({})", scope);
    let report = pipeline.recompute_analytics(&scope, &CancelToken::new())?;

    println!("\n{}", report.summary());
    print_samples("Computation errors", &report.computation_errors);
    print_samples("Persistence failures", &report.persistence_errors);
    Ok(())
}

fn run_scan(config: AppConfig, mut args: Vec<String>) -> Result<()> {
    let as_of = take_flag(&mut args, "--as-of")?
        .map(|s| parse_instant(&s))
        .transpose()?
        .unwrap_or_else(Utc::now);
    reject_leftovers(&args)?;

    let pipeline = Pipeline::open(config)?;
    println!("🔎 Scanning for anomalies as of {}", as_of.to_rfc3339());
    let report = pipeline.anomaly_scan(as_of, &CancelToken::new())?;

    println!("\n{}", report.summary());
    print_samples("Errors", &report.errors);
    Ok(())
}

fn run_trending(config: AppConfig, mut args: Vec<String>) -> Result<()> {
    let days = match take_flag(&mut args, "--days")? {
        Some(d) => d.parse::<u32>().context("--days must be a positive integer")?,
        None => config.keywords.window_days,
    };
    let limit = match take_flag(&mut args, "--limit")? {
        Some(l) => l.parse::<usize>().context("--limit must be a positive integer")?,
        None => 20,
    };
    let business = take_flag(&mut args, "--business")?;
    let as_of = take_flag(&mut args, "--as-of")?
        .map(|s| parse_instant(&s))
        .transpose()?
        .unwrap_or_else(Utc::now);
    reject_leftovers(&args)?;

    let pipeline = Pipeline::open(config)?;
    let scope = match business {
        Some(id) => {
            let business = pipeline
                .store()
                .get_business(&id)?
                .with_context(|| format!("Business not found: {}", id))?;
            println!("🔑 Trending keywords for {} ({} days)", business.canonical_name, days);
            KeywordScope::Business(business.id)
        }
        None => {
            println!("🔑 Trending keywords, all businesses ({} days)", days);
            KeywordScope::Global
        }
    };

    let terms = pipeline.store().trending_keywords(&scope, days, as_of, limit)?;
    if terms.is_empty() {
        println!("   (no keywords in window)");
    }
    for (rank, term) in terms.iter().enumerate() {
        println!(
            "{:>3}. {:<30} {:>6}   first seen {}",
            rank + 1,
            term.term,
            term.count,
            term.first_seen.format("%Y-%m-%d")
        );
    }
    Ok(())
}

fn run_queue(config: AppConfig) -> Result<()> {
    let pipeline = Pipeline::open(config)?;
    let queue = pipeline.store().manual_review_queue()?;

    println!("📋 Manual review queue: {} pending", queue.len());
    for item in &queue {
        println!(
            "  #{} {} ({}) queued {}",
            item.id,
            item.candidate.label(),
            item.reason,
            item.queued_at.to_rfc3339()
        );
        println!("      tied with: {}", item.tied_with.join(", "));
    }
    Ok(())
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

/// Remove `--name VALUE` from `args`, returning VALUE
fn take_flag(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{} expects a value", name);
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn reject_leftovers(args: &[String]) -> Result<()> {
    if let Some(arg) = args.first() {
        bail!("Unexpected argument: {}", arg);
    }
    Ok(())
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid RFC 3339 timestamp: {}", s))
}

fn print_samples(title: &str, failures: &FailureSamples) {
    if failures.is_empty() {
        return;
    }
    println!("\n⚠️  {}: {}", title, failures.count);
    for sample in &failures.samples {
        println!("   - {}", sample);
    }
    if failures.count > failures.samples.len() {
        println!("   ... and {} more", failures.count - failures.samples.len());
    }
}
