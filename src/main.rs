use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use posture_jobs::config::Config;
use posture_jobs::handlers::flow::{FlowContext, RemediationOutcome, ScanOutcome, run_remediation, run_scan};
use posture_jobs::models::job::{JobProgress, ScanScope};
use posture_jobs::models::target::{DeviceClass, ProposedItem};
use posture_jobs::services::assembler::{AssembledResult, ScanPageView, scan_page};
use posture_jobs::services::client::JobClient;
use posture_jobs::services::selection::SelectionAggregator;

/// Drive scan and remediation jobs against the posture backend.
#[derive(Debug, Parser)]
#[command(name = "posture-jobs", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan one or more registered servers.
    Scan {
        /// Comma-separated server ids.
        #[arg(long, value_delimiter = ',', required = true)]
        targets: Vec<String>,

        #[arg(long, value_enum, default_value_t = Scope::All)]
        scope: Scope,

        /// Optional item codes to restrict the scan to.
        #[arg(long, value_delimiter = ',')]
        items: Vec<String>,

        /// Print every result page without waiting for Enter.
        #[arg(long, default_value_t = false)]
        no_pause: bool,
    },
    /// Apply automated fixes for selected items.
    Remediate {
        /// Server the remediation was opened from.
        #[arg(long)]
        origin: String,

        /// Items as CODE[:category], comma-separated.
        #[arg(long, value_delimiter = ',', required = true)]
        items: Vec<String>,

        /// Items to drop from the proposed batch.
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Offer every affected server, not just the origin.
        #[arg(long, default_value_t = false)]
        multi: bool,

        /// Extra affected servers to include.
        #[arg(long, value_delimiter = ',')]
        targets: Vec<String>,

        /// Select every affected server matching --filter.
        #[arg(long, default_value_t = false)]
        all: bool,

        #[arg(long, default_value = "")]
        filter: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scope {
    All,
    Os,
    Db,
}

impl From<Scope> for ScanScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::All => ScanScope::All,
            Scope::Os => ScanScope::Os,
            Scope::Db => ScanScope::Db,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::from_env();
    info!("Using job service at {}", config.backend_url);

    let client = JobClient::new(&config.backend_url, &config.session, config.request_timeout)?;
    let ctx = FlowContext::new(Arc::new(client), config.poll.clone());

    tokio::select! {
        result = run_command(cli.command, &ctx) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("[{}] Interrupted, flow torn down", ctx.flow_id);
            Ok(())
        }
    }
}

async fn run_command(command: Command, ctx: &FlowContext<JobClient>) -> Result<()> {
    match command {
        Command::Scan { targets, scope, items, no_pause } => {
            let outcome = run_scan(ctx, targets, scope.into(), items, print_progress).await?;
            present_scan(outcome, no_pause).await
        }
        Command::Remediate { origin, items, exclude, multi, targets, all, filter } => {
            let proposed = items.iter().map(|raw| parse_item(raw)).collect();
            let mut selection = SelectionAggregator::new(&origin, if multi { 2 } else { 1 }, proposed);
            for code in &exclude {
                selection.exclude(code);
            }
            if selection.is_multi_target() {
                selection.refresh_targets(ctx.service.as_ref()).await?;
                for id in &targets {
                    if !selection.is_selected(id) {
                        selection.toggle_target(id);
                    }
                }
                if all {
                    selection.set_filter(&filter);
                    selection.select_all();
                }
            }
            let summary = selection.summary();
            println!(
                "Remediating {} item(s) on {} server(s), {} change(s) in total",
                summary.item_count, summary.target_count, summary.total_units
            );
            let outcome = run_remediation(ctx, &mut selection, print_progress).await?;
            present_remediation(&outcome)
        }
    }
}

fn parse_item(raw: &str) -> ProposedItem {
    let (code, category) = raw.split_once(':').unwrap_or((raw, ""));
    let class = if code.starts_with("D-") { DeviceClass::Db } else { DeviceClass::Os };
    ProposedItem::new(code.trim(), code.trim(), category.trim(), class)
}

fn print_progress(progress: &JobProgress, percent: u8) {
    let cursor = match (&progress.current_target, progress.completed_targets) {
        (Some(current), Some(done)) => format!(" [{} | {}/{}]", current, done, progress.total_targets),
        (None, Some(done)) => format!(" [{}/{}]", done, progress.total_targets),
        _ => String::new(),
    };
    println!("{:>3}% step {}/4{} {}", percent, progress.step(), cursor, progress.message);
}

fn present_remediation(outcome: &RemediationOutcome) -> Result<()> {
    if let Some(fatal) = &outcome.fatal {
        return Err(anyhow!("remediation {} failed: {}", outcome.job.id, fatal));
    }
    if let Some(err) = &outcome.fetch_error {
        eprintln!("Could not load the result of job {}: {}", outcome.job.id, err);
    }

    let Some(result) = &outcome.result else {
        return Ok(());
    };
    println!(
        "\nRemediation complete: {} succeeded, {} failed",
        result.success_count(),
        result.fail_count()
    );

    match result {
        AssembledResult::Single(single) => {
            for section in &outcome.groups {
                println!("\n{:?}", section.class);
                for group in &section.groups {
                    println!("  {}", group.label);
                    for item in &group.items {
                        print_item(&item.item_code, &item.title, item.is_success, item.failure_reason.as_deref(), &item.reason);
                    }
                }
            }
            if outcome.groups.is_empty() {
                for item in &single.items {
                    print_item(&item.item_code, &item.title, item.is_success, item.failure_reason.as_deref(), &item.reason);
                }
            }
            if let Some(imp) = single.improvement {
                println!("\nVulnerable items: {} -> {} ({} improved)", imp.before_vuln, imp.after_vuln, imp.improved);
            }
        }
        AssembledResult::Multi(multi) => {
            println!("Servers: {}", multi.targets.len());
            for target in &multi.targets {
                println!(
                    "\n{} ({}): ✓ {} ✗ {}",
                    target.target_id, target.hostname, target.success_count, target.fail_count
                );
                for item in &target.items {
                    print_item(&item.item_code, &item.title, item.is_success, item.failure_reason.as_deref(), &item.reason);
                }
            }
        }
    }
    Ok(())
}

fn print_item(code: &str, title: &str, ok: bool, failure: Option<&str>, reason: &str) {
    let mark = if ok { "✓" } else { "✗" };
    println!("    {} {:<6} {}", mark, code, title);
    if let Some(failure) = failure.filter(|_| !ok) {
        println!("        {}", failure);
    } else if !reason.is_empty() {
        println!("        {}", reason);
    }
}

async fn present_scan(mut outcome: ScanOutcome, no_pause: bool) -> Result<()> {
    if let Some(fatal) = outcome.flow.fatal_message() {
        return Err(anyhow!("scan {} failed: {}", outcome.job.id, fatal));
    }
    if let Some(err) = &outcome.fetch_error {
        eprintln!("Could not load the report of scan {}: {}", outcome.job.id, err);
    }
    let Some(report) = outcome.report.take() else {
        return Ok(());
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(page) = outcome.flow.page() {
        match scan_page(&report, page) {
            Some(ScanPageView::Overview { company, total_targets, duration }) => {
                println!("\n{}: {} server(s) checked in {}", company, total_targets, duration);
            }
            Some(ScanPageView::Hotspot { top_target, top_count, vulnerable_count, secure_count }) => {
                println!(
                    "\nNeeds attention: {} with {} finding(s)",
                    top_target.as_deref().unwrap_or("none"),
                    top_count
                );
                println!("Vulnerable items: {}  Secure items: {}", vulnerable_count, secure_count);
            }
            Some(ScanPageView::Risk { level, distribution, risk_percentage, all_clear }) => {
                println!("\nRisk level: {:?} (high {}%)", level, distribution.high);
                println!(
                    "Distribution: low {}% / medium {}% / high {}%",
                    distribution.low, distribution.medium, distribution.high
                );
                if all_clear {
                    println!("Every item is in a secure state.");
                } else {
                    println!("{}% of all items are vulnerable.", risk_percentage);
                }
            }
            None => {}
        }

        if !no_pause {
            println!("(Enter for next)");
            lines.next_line().await?;
        }
        outcome.flow.next()?;
    }
    Ok(())
}
