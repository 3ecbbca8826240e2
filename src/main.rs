use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ledger_reconciliation::logging::init_tracing;
use ledger_reconciliation::{
    detect_format, get_parser, load_chart_csv, ChartOfAccounts, JobStatus, MemoryStore, OutputSink,
    ParseOutput, ReconcileConfig, ReconciliationEngine, ReconciliationJob, RuleSet, RuleStore, SourceFormat,
    SourceInput, SqliteStore,
};

#[derive(Parser)]
#[command(name = "reconcile", version, about = "Reconcile accounting ledgers against bank statements.")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full reconciliation job and print the outcome as JSON.
    Run {
        /// Ledger text export (repeatable)
        #[arg(long, required = true)]
        ledger: Vec<PathBuf>,
        /// Bank statement (CSV, OFX or PDF)
        #[arg(long)]
        statement: PathBuf,
        /// Statement format tag (csv, ofx, pdf); detected when omitted
        #[arg(long = "statement-format")]
        statement_format: Option<String>,
        /// Chart of accounts CSV (code,name,source,active)
        #[arg(long)]
        chart: PathBuf,
        /// Validation rules JSON
        #[arg(long)]
        rules: PathBuf,
        /// Persist results into this SQLite database instead of memory
        #[arg(long)]
        db: Option<PathBuf>,
        /// Abort on the first parsing issue
        #[arg(long)]
        strict: bool,
    },
    /// Strict ledger-vs-statement comparison; prints divergences as JSON.
    Compare {
        #[arg(long)]
        statement: PathBuf,
        #[arg(long)]
        ledger: PathBuf,
        /// Amount tolerance (default from config)
        #[arg(long)]
        tolerance: Option<Decimal>,
    },
    /// Parse one file and print its transactions and issues.
    Parse {
        file: PathBuf,
        /// Format tag (txt, csv, ofx, pdf); detected when omitted
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ReconcileConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log_level, config.log_json);

    match cli.command {
        Commands::Run {
            ledger,
            statement,
            statement_format,
            chart,
            rules,
            db,
            strict,
        } => {
            if strict {
                config.strict = true;
            }
            let mut statement_input = read_input(&statement)?;
            if let Some(tag) = statement_format {
                statement_input = statement_input.with_format(SourceFormat::from_tag(&tag)?);
            }
            let ledgers = ledger.iter().map(|p| read_input(p)).collect::<Result<Vec<_>>>()?;

            let accounts = load_chart_csv(&chart)
                .with_context(|| format!("Failed to load chart of accounts: {:?}", chart))?;
            let rules = RuleSet::from_file(&rules)?.into_rules();

            let status = match db {
                Some(path) => {
                    let store = SqliteStore::open(&path)
                        .with_context(|| format!("Failed to open database: {:?}", path))?;
                    store.insert_accounts(&accounts)?;
                    store.insert_rules(&rules)?;
                    run_job(Arc::new(store), &config, ledgers, statement_input).await?
                }
                None => {
                    let store = MemoryStore::new().with_accounts(accounts)?.with_rules(rules)?;
                    run_job(Arc::new(store), &config, ledgers, statement_input).await?
                }
            };
            if status == JobStatus::Failed {
                bail!("reconciliation job failed");
            }
        }
        Commands::Compare {
            statement,
            ledger,
            tolerance,
        } => {
            let statement_output = parse_file(&statement, None, config.strict)?;
            let ledger_output = parse_file(&ledger, Some(SourceFormat::LedgerText), config.strict)?;
            let engine = ReconciliationEngine::with_tolerance(tolerance.unwrap_or(config.amount_tolerance));
            let report = engine.reconcile(&statement_output.transactions, &ledger_output.transactions);
            eprintln!("{}", report.summary());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Parse { file, format, strict } => {
            let format = format.map(|tag| SourceFormat::from_tag(&tag)).transpose()?;
            let output = parse_file(&file, format, strict || config.strict)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

async fn run_job<S>(
    store: Arc<S>,
    config: &ReconcileConfig,
    ledgers: Vec<SourceInput>,
    statement: SourceInput,
) -> Result<JobStatus>
where
    S: ChartOfAccounts + RuleStore + OutputSink + 'static,
{
    let mut job = ReconciliationJob::new(config.job_params(), store.clone(), store.clone(), store);
    let outcome = job.run(ledgers, Some(statement)).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(outcome.status)
}

fn read_input(path: &Path) -> Result<SourceInput> {
    SourceInput::from_path(path).with_context(|| format!("Failed to read input file: {:?}", path))
}

fn parse_file(path: &Path, format: Option<SourceFormat>, strict: bool) -> Result<ParseOutput> {
    let input = read_input(path)?;
    let format = format.unwrap_or_else(|| detect_format(&input.name, &input.bytes));
    let output = get_parser(format)
        .parse(&input.bytes, strict)
        .with_context(|| format!("Failed to parse {} as {}", input.name, format.name()))?;
    tracing::info!(
        file = %input.name,
        format = format.code(),
        transactions = output.transactions.len(),
        issues = output.issues.len(),
        "file parsed"
    );
    Ok(output)
}
