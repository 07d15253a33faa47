use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use unattach::attachment_parser::FileAttachmentStore;
use unattach::config::Config;
use unattach::driver::{run_search, SearchProgress};
use unattach::email::Action;
use unattach::gmail_client::GmailClient;
use unattach::mail_api::MailApi;
use unattach::runner::{PeriodicRunner, RunPlan};
use unattach::scheduler::Schedule;
use unattach::task::SearchTask;

#[derive(Parser)]
#[command(name = "unattach")]
#[command(about = "Download and remove Gmail attachments in bulk")]
#[command(version = "0.1.0")]
struct Args {
    /// Gmail search query (defaults to SEARCH_QUERY, else the basic search)
    #[arg(short, long)]
    query: Option<String>,

    /// Basic search: minimum email size in megabytes (defaults to EMAIL_SIZE_MB)
    #[arg(long)]
    min_size_mb: Option<u32>,

    /// Basic search: only emails with this label ID, repeatable (defaults to LABEL_IDS)
    #[arg(long = "label")]
    labels: Vec<String>,

    /// What to do with the matching emails
    #[arg(short, long, value_enum, default_value_t = Action::Download)]
    action: Action,

    /// Directory where attachments are written (defaults to TARGET_DIRECTORY)
    #[arg(short = 'o', long)]
    target_dir: Option<PathBuf>,

    /// Process only the first N matching emails
    #[arg(short = 'l', long)]
    limit: Option<usize>,

    /// Search only: list the matching emails without processing them
    #[arg(short, long)]
    dry_run: bool,

    /// Print the account's labels and exit
    #[arg(long)]
    list_labels: bool,

    /// Check the configuration without connecting
    #[arg(long)]
    check_config: bool,

    /// Read the configuration from this file instead of the environment
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run again every N seconds after each run until Ctrl+C
    #[arg(short, long)]
    schedule: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load the .env file if present
    dotenv::dotenv().ok();

    let args = Args::parse();

    env_logger::init();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::new()?,
    };
    if let Some(dir) = &args.target_dir {
        config.processing.target_directory = dir.display().to_string();
    }
    if let Some(period_secs) = args.schedule {
        config.scheduler.enabled = true;
        config.scheduler.period_secs = period_secs;
    }
    if args.min_size_mb.is_some() || !args.labels.is_empty() {
        config.processing.search_query = None;
        if let Some(min_size_mb) = args.min_size_mb {
            config.processing.email_size_mb = min_size_mb;
        }
        if !args.labels.is_empty() {
            config.processing.label_ids = args.labels.clone();
        }
    }
    let plan = config.run_plan(args.action, args.query.as_deref(), args.limit);

    if args.check_config {
        println!("✅ Configuration valid!");
        println!("🔑 Credentials: {}", config.gmail.credentials_path);
        println!("💾 Token cache: {}", config.gmail.token_cache_path);
        println!(
            "🔐 OAuth redirect: http://{}:{}",
            config.gmail.oauth_host,
            config.gmail.oauth_port.map_or("<ephemeral>".to_string(), |p| p.to_string())
        );
        println!("🔍 Query: {}", plan.query);
        println!("📁 Target directory: {}", config.processing.target_directory);
        let schedule = config.scheduler.schedule();
        if schedule.enabled {
            println!("⏰ Schedule: every {}s", schedule.period.as_secs());
        }
        return Ok(());
    }

    info!("🚀 Starting unattach");
    let gmail = GmailClient::new(&config.gmail, plan.permanently_remove && plan.action.removes()).await?;
    match gmail.email_address().await {
        Ok(address) => info!("Signed in as {}", address),
        Err(e) => warn!("Unable to read the signed-in address: {}", e),
    }
    let api: Arc<dyn MailApi> = Arc::new(gmail);

    if args.list_labels {
        return list_labels(api.as_ref()).await;
    }

    if args.dry_run {
        return dry_run(api, &plan, args.limit).await;
    }

    let schedule = config.scheduler.schedule();
    let runner = PeriodicRunner::new(api, Arc::new(FileAttachmentStore::new()), plan, schedule);

    if !schedule.enabled {
        let report = runner.spawn().await??;
        info!(
            "✅ Processing finished. {} emails processed, {} failed.",
            report.result.emails_processed, report.result.emails_failed
        );
        return Ok(());
    }

    run_daemon_mode(runner, schedule).await
}

async fn run_daemon_mode(runner: Arc<PeriodicRunner>, schedule: Schedule) -> Result<()> {
    info!("🔄 Starting in daemon mode, one run every {}s", schedule.period.as_secs());
    info!("⏸️  Press Ctrl+C to stop the daemon");

    let first_run = runner.spawn();
    tokio::signal::ctrl_c().await?;

    info!("Stopping, waiting for the email in progress...");
    runner.shutdown().await;
    match first_run.await {
        Ok(Ok(report)) => info!(
            "First run: {} emails processed, {} failed",
            report.result.emails_processed, report.result.emails_failed
        ),
        Ok(Err(e)) => error!("❌ First run failed: {}", e),
        Err(e) => error!("❌ First run panicked: {}", e),
    }
    Ok(())
}

async fn list_labels(api: &dyn MailApi) -> Result<()> {
    let labels = api.list_labels().await?;
    if labels.is_empty() {
        println!("No labels found.");
        return Ok(());
    }

    println!("Found {} label(s):\n", labels.len());
    println!("{:<40} {:<30}", "Label Name", "Label ID");
    println!("{}", "=".repeat(70));
    let mut sorted: Vec<_> = labels.into_iter().collect();
    sorted.sort_by(|a, b| a.1.cmp(&b.1));
    for (id, name) in sorted {
        println!("{:<40} {:<30}", name, id);
    }
    Ok(())
}

async fn dry_run(api: Arc<dyn MailApi>, plan: &RunPlan, limit: Option<usize>) -> Result<()> {
    let query = plan.query.resolve(&api.list_labels().await?);

    println!("\n{}", "=".repeat(80));
    println!("🧪 DRY-RUN MODE - SEARCH ONLY");
    println!("{}", "=".repeat(80));

    let task = SearchTask::start(api, &query, plan.page_size).await?;
    let (progress, _) = tokio::sync::watch::channel(SearchProgress::default());
    let cancel = CancellationToken::new();
    let emails = run_search(task, &cancel, &progress).await?;

    let shown = limit.unwrap_or(emails.len());
    for email in emails.iter().take(shown) {
        println!(
            "📧 {} | {:<30} | {:>8} KB | {}",
            email.timestamp.format("%Y-%m-%d"),
            email.from.chars().take(30).collect::<String>(),
            email.size_in_bytes / 1024,
            email.subject
        );
    }

    println!("{}", "=".repeat(80));
    println!(
        "🏁 {} email(s) matched ({})",
        emails.len(),
        progress.borrow().status()
    );
    println!("{}", "=".repeat(80));
    Ok(())
}
