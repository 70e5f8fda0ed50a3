use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use restock_watch::application::{
    Cadence, ChangeOrchestrator, CheckOutcome, CheckScheduler, OrchestratorSettings,
};
use restock_watch::domain::product::{Product, display_amount, display_price};
use restock_watch::domain::repositories::ProductStore;
use restock_watch::domain::services::Notifier;
use restock_watch::infrastructure::config::CONFIG_PATH_ENV;
use restock_watch::infrastructure::config::defaults::MAX_INTERVAL_MINUTES;
use restock_watch::infrastructure::{
    AppConfig, DatabaseConnection, HttpClient, LogNotifier, PushoverNotifier, SiteDispatcher,
    SqliteProductStore, init_logging_with_config,
};

#[derive(Debug, Parser)]
#[command(name = "restock-watch", version, about = "Track product availability and price drops")]
struct Cli {
    /// Config file (any format the config loader understands)
    #[arg(long, short, global = true, env = CONFIG_PATH_ENV)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler until interrupted (default)
    Run,
    /// Check one URL now, adding it if it is not tracked yet
    Check { url: String },
    /// Start tracking a product
    Add(AddArgs),
    /// Stop tracking a product and drop its history
    Remove { product: String },
    /// List tracked products
    List,
    /// Show recent checks for a product
    History(HistoryArgs),
    /// Set a cadence interval in minutes (0 pauses it)
    Interval {
        cadence: CadenceArg,
        #[arg(value_parser = clap::value_parser!(u64).range(..=MAX_INTERVAL_MINUTES))]
        minutes: u64,
    },
    /// Enable or disable a product's checks
    Toggle(ToggleArgs),
    /// Send a test push notification
    TestNotification,
}

#[derive(Debug, Args)]
struct AddArgs {
    url: String,
    /// Display name; extracted from the page when omitted
    #[arg(long)]
    name: Option<String>,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    /// Product id or URL
    product: String,
    #[arg(long, default_value_t = 20)]
    limit: u32,
}

#[derive(Debug, Args)]
struct ToggleArgs {
    /// Product id or URL
    product: String,
    #[arg(long)]
    availability: Option<bool>,
    #[arg(long)]
    price: Option<bool>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CadenceArg {
    Availability,
    Price,
}

impl From<CadenceArg> for Cadence {
    fn from(arg: CadenceArg) -> Self {
        match arg {
            CadenceArg::Availability => Self::Availability,
            CadenceArg::Price => Self::Price,
        }
    }
}

/// Everything a command needs, built once from config
struct AppContext {
    config: AppConfig,
    store: Arc<dyn ProductStore>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Arc<SiteDispatcher>,
}

impl AppContext {
    async fn build(config: AppConfig) -> Result<Self> {
        let db = DatabaseConnection::open(&config.database.path).await?;
        db.migrate().await?;
        let store: Arc<dyn ProductStore> =
            Arc::new(SqliteProductStore::new(Arc::new(db.pool().clone())));

        let notifier: Arc<dyn Notifier> = if config.pushover.is_configured() {
            Arc::new(PushoverNotifier::new(config.pushover.clone())?)
        } else {
            warn!("Pushover credentials not configured, notifications will only be logged");
            Arc::new(LogNotifier)
        };

        let dispatcher =
            Arc::new(SiteDispatcher::with_default_sites().context("Failed to build site pipelines")?);

        Ok(Self {
            config,
            store,
            notifier,
            dispatcher,
        })
    }

    fn orchestrator(&self) -> Result<ChangeOrchestrator> {
        let fetcher = Arc::new(HttpClient::new(self.config.http.clone())?);
        Ok(ChangeOrchestrator::new(
            Arc::clone(&self.store),
            fetcher,
            Arc::clone(&self.notifier),
            Arc::clone(&self.dispatcher),
            OrchestratorSettings {
                inter_product_delay: self.config.schedule.inter_product_delay(),
            },
        ))
    }

    /// Resolve a product given as a numeric id or a URL
    async fn find_product(&self, reference: &str) -> Result<Product> {
        let product = match reference.parse::<i64>() {
            Ok(id) => self.store.get_product_by_id(id).await?,
            Err(_) => self.store.get_product(reference).await?,
        };
        product.ok_or_else(|| anyhow!("No tracked product matches '{reference}'"))
    }

    async fn seed_products(&self) -> Result<()> {
        for seed in &self.config.products {
            if !self.dispatcher.is_supported(&seed.url) {
                warn!(url = %seed.url, "Configured product has no matching site, tracking anyway");
            }
            self.store
                .upsert_product(&seed.url, seed.name.as_deref())
                .await
                .with_context(|| format!("Failed to add configured product {}", seed.url))?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging_with_config(&config.logging)?;

    let context = AppContext::build(config).await?;
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&context).await,
        Command::Check { url } => check(&context, &url).await,
        Command::Add(args) => add(&context, args).await,
        Command::Remove { product } => remove(&context, &product).await,
        Command::List => list(&context).await,
        Command::History(args) => history(&context, args).await,
        Command::Interval { cadence, minutes } => {
            let cadence = Cadence::from(cadence);
            context
                .store
                .set_setting(cadence.setting_key(), &minutes.to_string())
                .await?;
            println!("{cadence} interval set to {minutes} minutes");
            Ok(())
        }
        Command::Toggle(args) => toggle(&context, args).await,
        Command::TestNotification => {
            context
                .notifier
                .send_test()
                .await
                .context("Test notification failed")?;
            println!("Test notification sent");
            Ok(())
        }
    }
}

async fn run(context: &AppContext) -> Result<()> {
    info!("Restock Watch starting");
    context.seed_products().await?;

    let cancel = CancellationToken::new();
    let scheduler = CheckScheduler::new(
        Arc::new(context.orchestrator()?),
        &context.config.schedule,
        cancel.clone(),
    );
    scheduler.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    scheduler.shutdown().await;
    Ok(())
}

async fn check(context: &AppContext, url: &str) -> Result<()> {
    let orchestrator = context.orchestrator()?;
    match orchestrator.check_product(url).await? {
        CheckOutcome::Updated {
            product,
            record,
            events,
            notifications_failed,
        } => {
            println!(
                "{}: {} - {}",
                product.label(),
                product.last_status.map_or("unknown", |s| s.as_str()),
                display_price(record.price, &record.currency)
            );
            for event in &events {
                println!("  event: {}", event.kind());
            }
            if notifications_failed > 0 {
                println!("  {notifications_failed} notification(s) failed");
            }
        }
        CheckOutcome::Unidentified { .. } => {
            bail!("Could not identify a product at {url}")
        }
        CheckOutcome::NoPrice { record } => {
            println!("{}: no price found", record.name);
        }
    }
    Ok(())
}

async fn add(context: &AppContext, args: AddArgs) -> Result<()> {
    if !context.dispatcher.is_supported(&args.url) {
        bail!("No site pipeline handles {}", args.url);
    }
    let product = context
        .store
        .upsert_product(&args.url, args.name.as_deref())
        .await?;
    println!("Tracking #{} {}", product.id, product.label());
    Ok(())
}

async fn remove(context: &AppContext, reference: &str) -> Result<()> {
    let product = context.find_product(reference).await?;
    if context.store.delete_product(product.id).await? {
        println!("Removed #{} {}", product.id, product.label());
    }
    Ok(())
}

async fn list(context: &AppContext) -> Result<()> {
    let products = context.store.list_products().await?;
    if products.is_empty() {
        println!("No products tracked");
        return Ok(());
    }

    for product in products {
        println!(
            "#{:<4} {:<12} {:<14} avail:{} price:{} {}",
            product.id,
            product.last_status.map_or("unknown", |s| s.as_str()),
            display_amount(product.last_price),
            if product.check_availability_enabled { "on " } else { "off" },
            if product.check_price_enabled { "on " } else { "off" },
            product.label()
        );
    }
    Ok(())
}

async fn history(context: &AppContext, args: HistoryArgs) -> Result<()> {
    let product = context.find_product(&args.product).await?;
    let entries = context.store.get_history(product.id, args.limit).await?;

    println!("{} ({})", product.label(), product.url);
    if entries.is_empty() {
        println!("  no checks recorded");
    }
    for entry in entries {
        println!(
            "  {}  {:<12} {}",
            entry.checked_at.format("%Y-%m-%d %H:%M:%S"),
            entry.status.as_str(),
            display_amount(entry.price)
        );
    }
    Ok(())
}

async fn toggle(context: &AppContext, args: ToggleArgs) -> Result<()> {
    if args.availability.is_none() && args.price.is_none() {
        bail!("Pass --availability and/or --price");
    }
    let product = context.find_product(&args.product).await?;
    let product = context
        .store
        .set_check_flags(product.id, args.availability, args.price)
        .await?;
    println!(
        "#{} availability checks {}, price checks {}",
        product.id,
        if product.check_availability_enabled { "on" } else { "off" },
        if product.check_price_enabled { "on" } else { "off" }
    );
    Ok(())
}
