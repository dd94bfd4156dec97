use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use pos_engine::application::health::HealthMonitor;
use pos_engine::application::orchestrator::{
    CheckoutOutcome, CheckoutRequest, Collaborators, TransactionOrchestrator,
};
use pos_engine::application::registry::GatewayRegistry;
use pos_engine::config::EngineConfig;
use pos_engine::domain::approval::ManagerCredentials;
use pos_engine::domain::cart::{Address, Customer};
use pos_engine::domain::money::Money;
use pos_engine::domain::order::OrderNumber;
use pos_engine::domain::payment::PaymentLine;
use pos_engine::domain::ports::{OfflineStoreBox, OrderLedgerBox, PaymentProcessorRef};
use pos_engine::infrastructure::in_memory::{
    InMemoryCustomerDirectory, InMemoryOfflineStore, InMemoryOrderLedger,
};
#[cfg(feature = "storage-rocksdb")]
use pos_engine::infrastructure::rocksdb::RocksDBStore;
use pos_engine::infrastructure::simulated::{
    ConnectivityFlag, LogNotifier, SimulatedProcessor, StaticAuthenticator,
};
use pos_engine::interfaces::csv::cart_reader::CartReader;
use pos_engine::interfaces::csv::payment_writer::PaymentWriter;
use pos_engine::interfaces::tender::tender_arg;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML or JSON). `POS__` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check out a cart read from CSV
    Checkout(CheckoutArgs),
    /// List offline transactions waiting to be synced
    Pending,
    /// Replay queued offline transactions into the ledger
    Sync,
}

#[derive(Args)]
struct CheckoutArgs {
    /// Cart CSV: id,name,unit_price,quantity,category,requires_shipping
    cart: PathBuf,

    /// Tender, e.g. card:60:visa:4242 or cash:40[:50]. Repeat to split.
    #[arg(long = "pay", required = true, value_parser = tender_arg)]
    tenders: Vec<PaymentLine>,

    #[arg(long)]
    transaction_id: Option<String>,

    #[arg(long)]
    order_number: Option<String>,

    #[arg(long)]
    customer_id: Option<String>,

    /// Shipping address as <line1>;<city>;<postal_code>;<country>.
    #[arg(long, requires = "customer_id", value_parser = address_arg)]
    ship_to: Option<Address>,

    #[arg(long, default_value = "operator")]
    operator: String,

    /// Simulate lost connectivity; the sale is queued offline.
    #[arg(long)]
    offline: bool,

    #[arg(long)]
    allow_partial: bool,

    #[arg(long)]
    discount: Option<Decimal>,

    /// Manager re-authentication as <employee_id>:<pin>, used if approval is required.
    #[arg(long, value_parser = manager_arg)]
    manager: Option<ManagerCredentials>,
}

fn manager_arg(input: &str) -> std::result::Result<ManagerCredentials, String> {
    match input.split_once(':') {
        Some((employee_id, pin)) if !employee_id.is_empty() => Ok(ManagerCredentials {
            employee_id: employee_id.to_string(),
            pin: pin.to_string(),
        }),
        _ => Err("expected <employee_id>:<pin>".to_string()),
    }
}

fn address_arg(input: &str) -> std::result::Result<Address, String> {
    let parts: Vec<&str> = input.split(';').map(str::trim).collect();
    match parts.as_slice() {
        [line1, city, postal_code, country] => Ok(Address {
            line1: line1.to_string(),
            city: city.to_string(),
            postal_code: postal_code.to_string(),
            country: country.to_string(),
        }),
        _ => Err("expected <line1>;<city>;<postal_code>;<country>".to_string()),
    }
}

struct Storage {
    ledger: OrderLedgerBox,
    offline: OfflineStoreBox,
}

fn open_storage(db_path: Option<PathBuf>) -> Result<Storage> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok(Storage {
                ledger: Box::new(store.clone()),
                offline: Box::new(store),
            })
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(in_memory_storage())
        }
        None => Ok(in_memory_storage()),
    }
}

fn in_memory_storage() -> Storage {
    Storage {
        ledger: Box::new(InMemoryOrderLedger::new()),
        offline: Box::new(InMemoryOfflineStore::new()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let config = EngineConfig::load(cli.config.as_deref()).into_diagnostic()?;
    let storage = open_storage(cli.db_path)?;

    let online = !matches!(&cli.command, Command::Checkout(args) if args.offline);
    let customers = Arc::new(InMemoryCustomerDirectory::new());
    let authenticator = config
        .employees
        .iter()
        .fold(StaticAuthenticator::new(), |auth, employee| {
            auth.with_employee(&employee.id, &employee.pin, employee.role)
        });
    let registry = Arc::new(GatewayRegistry::from_config(&config, |id| -> PaymentProcessorRef {
        Arc::new(SimulatedProcessor::approving(id))
    }));

    let orchestrator = TransactionOrchestrator::new(
        &config,
        registry.clone(),
        Collaborators {
            ledger: storage.ledger,
            offline_store: storage.offline,
            customers: customers.clone(),
            notifier: Arc::new(LogNotifier::new()),
            connectivity: Arc::new(ConnectivityFlag::new(online)),
            authenticator: Arc::new(authenticator),
        },
    );
    let gateway_watch = orchestrator.spawn_gateway_watch();
    let monitor = HealthMonitor::new(registry, &config.health).spawn();

    let result = match cli.command {
        Command::Checkout(args) => checkout(&orchestrator, &customers, args).await,
        Command::Pending => pending(&orchestrator).await,
        Command::Sync => sync(&orchestrator).await,
    };

    monitor.shutdown().await;
    gateway_watch.abort();
    result
}

async fn checkout(
    orchestrator: &TransactionOrchestrator,
    customers: &InMemoryCustomerDirectory,
    args: CheckoutArgs,
) -> Result<()> {
    let file = File::open(&args.cart).into_diagnostic()?;
    let cart = CartReader::new(file).read_cart().into_diagnostic()?;

    let transaction_id = args
        .transaction_id
        .unwrap_or_else(|| format!("TX-{}", Uuid::new_v4().simple()));
    let mut request = CheckoutRequest::new(transaction_id, cart, args.tenders, args.operator);
    if let Some(number) = args.order_number {
        request = request.with_order_number(OrderNumber::from(number.as_str()));
    }
    if let Some(discount) = args.discount {
        request = request.with_discount(Money::new(discount));
    }
    if args.allow_partial {
        request = request.allow_partial(true);
    }
    if let Some(customer_id) = args.customer_id {
        let customer = Customer {
            id: customer_id.clone(),
            name: customer_id,
            email: None,
            phone: None,
            loyalty_points: 0,
            address: args.ship_to,
        };
        customers.insert(customer.clone()).await;
        request = request.with_customer(customer);
    }

    let mut outcome = orchestrator.checkout(request.clone()).await;

    let blocked_on = match &outcome {
        CheckoutOutcome::Blocked { approval_id } => Some(approval_id.clone()),
        _ => None,
    };
    if let Some(approval_id) = blocked_on
        && let Some(credentials) = &args.manager
    {
        let approved = orchestrator
            .approvals()
            .resolve_by_manager_auth(&approval_id, credentials)
            .await
            .into_diagnostic()?;
        if approved {
            outcome = orchestrator.checkout(request).await;
        } else {
            warn!(%approval_id, "Manager credentials rejected");
        }
    }

    report(outcome)
}

fn report(outcome: CheckoutOutcome) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match outcome {
        CheckoutOutcome::Complete {
            order,
            receipt,
            warnings,
        } => {
            writeln!(out, "status: complete").into_diagnostic()?;
            writeln!(out, "order: {}", order.order_number).into_diagnostic()?;
            writeln!(out, "total: {}", order.totals.grand_total).into_diagnostic()?;
            for payment in &receipt.payments {
                if let Some(change) = payment.change_due {
                    writeln!(out, "change_due: {change}").into_diagnostic()?;
                }
            }
            for warning in &warnings {
                writeln!(out, "warning: {warning}").into_diagnostic()?;
            }
            writeln!(out).into_diagnostic()?;
            PaymentWriter::new(&mut out)
                .write_payment_lines(&order.payment_lines)
                .into_diagnostic()?;
            Ok(())
        }
        CheckoutOutcome::Blocked { approval_id } => {
            writeln!(out, "status: blocked").into_diagnostic()?;
            writeln!(out, "approval: {approval_id}").into_diagnostic()?;
            Ok(())
        }
        CheckoutOutcome::QueuedOffline { offline_id } => {
            writeln!(out, "status: queued_offline").into_diagnostic()?;
            writeln!(out, "offline_id: {offline_id}").into_diagnostic()?;
            Ok(())
        }
        CheckoutOutcome::Failed {
            detail,
            lines,
            attempts,
        } => {
            writeln!(out, "status: failed").into_diagnostic()?;
            writeln!(out, "kind: {:?}", detail.kind).into_diagnostic()?;
            if let Some(field) = &detail.field {
                writeln!(out, "field: {field}").into_diagnostic()?;
            }
            writeln!(out, "retryable: {}", detail.retryable).into_diagnostic()?;
            writeln!(out, "attempts: {attempts}").into_diagnostic()?;
            writeln!(out).into_diagnostic()?;
            PaymentWriter::new(&mut out)
                .write_payment_lines(&lines)
                .into_diagnostic()?;
            Err(miette!("Checkout failed: {}", detail.message))
        }
    }
}

async fn pending(orchestrator: &TransactionOrchestrator) -> Result<()> {
    let pending = orchestrator.vault().list_pending().await.into_diagnostic()?;
    let stdout = io::stdout();
    PaymentWriter::new(stdout.lock())
        .write_offline(&pending)
        .into_diagnostic()
}

async fn sync(orchestrator: &TransactionOrchestrator) -> Result<()> {
    let report = orchestrator.sync_offline().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "synced: {}", report.synced.len()).into_diagnostic()?;
    for order_number in &report.synced {
        writeln!(out, "order: {order_number}").into_diagnostic()?;
    }
    writeln!(out, "skipped: {}", report.skipped).into_diagnostic()?;
    writeln!(out, "rejected: {}", report.failed.len()).into_diagnostic()?;
    for (id, detail) in &report.failed {
        writeln!(out, "rejected {id}: {}", detail.message).into_diagnostic()?;
    }

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(miette!("{} offline transaction(s) rejected", report.failed.len()))
    }
}
