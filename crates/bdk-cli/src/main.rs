use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

mod commands;

use commands::Ctx;

#[derive(Parser)]
#[command(name = "bdk")]
#[command(about = "billdesk payment ledger CLI", long_about = None)]
struct Cli {
    /// Layered config paths in merge order (base -> site -> local)
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Unallocated balance of a client
    Balance {
        #[arg(long)]
        client: String,
    },

    /// Outstanding amount of an invoice
    Outstanding {
        #[arg(long)]
        invoice: String,
    },

    /// Active invoices of a client with payment status, plus totals
    Statement {
        #[arg(long)]
        client: String,

        /// Evaluation date (YYYY-MM-DD); defaults to today (UTC)
        #[arg(long)]
        today: Option<String>,
    },

    /// Record cash or apply the client account to an invoice
    Allocate {
        #[arg(long)]
        client: String,

        /// Target invoice; omit to deposit on the client account
        #[arg(long)]
        invoice: Option<String>,

        /// Decimal amount, e.g. 12.34
        #[arg(long)]
        amount: String,

        #[arg(long, value_enum)]
        source: SourceArg,

        /// cash | bank_transfer | card | cheque | <other>
        #[arg(long, default_value = "cash")]
        method: String,

        /// Payment date (YYYY-MM-DD); defaults to today (UTC)
        #[arg(long)]
        date: Option<String>,

        #[arg(long, default_value = "")]
        notes: String,

        /// Idempotency key; reuse it to retry the same allocation
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Cancel an invoice
    Cancel {
        #[arg(long)]
        invoice: String,

        /// Required when the invoice has allocated payments
        #[arg(long, value_enum)]
        disposition: Option<DispositionArg>,

        #[arg(long)]
        request_id: Option<String>,
    },

    /// Reactivate a cancelled invoice
    Restore {
        #[arg(long)]
        invoice: String,

        #[arg(long)]
        request_id: Option<String>,
    },

    /// Integrity sweep and repairs
    Reconcile {
        #[command(subcommand)]
        cmd: ReconcileCmd,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations
    Migrate,
}

#[derive(Subcommand)]
enum ReconcileCmd {
    /// Report violations and the repair plan; writes nothing
    Scan,
    /// Assign owners to unowned payments whose invoice resolves
    RepairOwners,
    /// Re-derive stored settlement flags from document links
    SettlementFlags,
    /// Move embedded legacy payments of an invoice into the payment store
    MigrateLegacy {
        #[arg(long)]
        invoice: String,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of an audit log
    Verify {
        /// Defaults to /audit/path from config
        #[arg(long)]
        path: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    /// Fresh cash
    New,
    /// Unallocated payments of the client, oldest first
    Account,
}

#[derive(Clone, Copy, ValueEnum)]
enum DispositionArg {
    /// Return allocated payments to the client account
    Move,
    /// Leave payments allocated to the cancelled invoice
    Keep,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    let ctx = Ctx::load(&cli.config_paths)?;

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = bdk_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Db { cmd } => {
            let pool = ctx.connect().await?;
            match cmd {
                DbCmd::Status => {
                    let s = bdk_db::status(&pool).await?;
                    println!("db_ok={} has_payments_table={}", s.ok, s.has_payments_table);
                }
                DbCmd::Migrate => {
                    bdk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Balance { client } => commands::ledger::balance(&ctx, &client).await?,

        Commands::Outstanding { invoice } => commands::ledger::outstanding(&ctx, &invoice).await?,

        Commands::Statement { client, today } => {
            commands::ledger::statement(&ctx, &client, today.as_deref()).await?
        }

        Commands::Allocate {
            client,
            invoice,
            amount,
            source,
            method,
            date,
            notes,
            request_id,
        } => {
            let source = match source {
                SourceArg::New => bdk_ledger::FundingSource::NewPayment,
                SourceArg::Account => bdk_ledger::FundingSource::ClientAccount,
            };
            commands::ledger::allocate(
                &ctx,
                commands::ledger::AllocateArgs {
                    client,
                    invoice,
                    amount,
                    source,
                    method,
                    date,
                    notes,
                    request_id,
                },
            )
            .await?
        }

        Commands::Cancel {
            invoice,
            disposition,
            request_id,
        } => {
            let disposition = disposition.map(|d| match d {
                DispositionArg::Move => bdk_ledger::Disposition::MoveToAccount,
                DispositionArg::Keep => bdk_ledger::Disposition::KeepAsHistory,
            });
            commands::ledger::cancel(&ctx, &invoice, disposition, request_id.as_deref()).await?
        }

        Commands::Restore {
            invoice,
            request_id,
        } => commands::ledger::restore(&ctx, &invoice, request_id.as_deref()).await?,

        Commands::Reconcile { cmd } => match cmd {
            ReconcileCmd::Scan => commands::reconcile::scan(&ctx).await?,
            ReconcileCmd::RepairOwners => commands::reconcile::repair_owners(&ctx).await?,
            ReconcileCmd::SettlementFlags => commands::reconcile::settlement_flags(&ctx).await?,
            ReconcileCmd::MigrateLegacy { invoice } => {
                commands::reconcile::migrate_legacy(&ctx, &invoice).await?
            }
        },

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => commands::verify_audit(&ctx, path.as_deref())?,
        },
    }

    Ok(())
}

/// Logs go to stderr; stdout carries command output.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
