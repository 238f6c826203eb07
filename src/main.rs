//! kasbon - operator console for kasbon settlement and realtime sync
//!
//! Subcommands:
//! - search: entity lookup through the debounced resolver
//! - loans: outstanding kasbon of one subject
//! - watch: follow one push topic until Ctrl-C
//! - settle: save a payroll slip and apply selected kasbon deductions

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kasbon_core::{
    backend::{Backend, HttpBackend, PaperBackend},
    models::PayrollSlipDraft,
    settlement::{CommitOutcome, PaymentMode},
    sync::{MemoryConnector, PushConnector, WsConnector},
    ChannelState, Config, LookupOutcome, Session,
};

#[derive(Parser, Debug)]
#[command(name = "kasbon", about = "Kasbon settlement and realtime sync console")]
struct Cli {
    /// Use the in-memory demo backend instead of the API
    #[arg(long, env = "KASBON_PAPER")]
    paper: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search entities by name or key
    Search { query: String },
    /// List a subject's outstanding kasbon
    Loans { subject: String },
    /// Follow a push topic and log every change
    Watch {
        topic: String,
        /// Also mirror payloads into the entity cache
        #[arg(long)]
        mirror: bool,
    },
    /// Save a payroll slip and settle kasbon lines against it
    Settle(SettleArgs),
}

#[derive(Args, Debug)]
struct SettleArgs {
    subject: String,
    /// Pay period, e.g. 2026-10 (defaults to the current month)
    #[arg(long)]
    period: Option<String>,
    #[arg(long)]
    gross: f64,
    /// Itemized deduction, NAME=AMOUNT (repeatable)
    #[arg(long = "item", value_parser = parse_item)]
    items: Vec<(String, f64)>,
    /// Settle this loan in full (repeatable)
    #[arg(long = "full")]
    full: Vec<String>,
    /// Settle part of a loan, LOAN=AMOUNT (repeatable)
    #[arg(long = "partial", value_parser = parse_partial)]
    partial: Vec<(String, String)>,
    /// Loan deduction to record when no kasbon line is selected
    #[arg(long)]
    manual_loan_deduction: Option<f64>,
    /// Reuse an existing slip key
    #[arg(long)]
    slip_id: Option<String>,
    /// The slip already exists; update it instead of creating it
    #[arg(long, requires = "slip_id")]
    update: bool,
}

fn parse_partial(s: &str) -> Result<(String, String), String> {
    let (loan, amount) = s
        .split_once('=')
        .ok_or_else(|| format!("expected LOAN=AMOUNT, got '{}'", s))?;
    Ok((loan.trim().to_string(), amount.to_string()))
}

/// Each loan may be selected once, in full or in part. A second mention
/// would toggle the line back off.
fn check_loan_selection(full: &[String], partial: &[(String, String)]) -> Result<()> {
    let mut seen = HashSet::new();
    for loan in full.iter().chain(partial.iter().map(|(loan, _)| loan)) {
        if !seen.insert(loan.as_str()) {
            bail!("loan {} is selected more than once; use either --full or --partial", loan);
        }
    }
    Ok(())
}

fn parse_item(s: &str) -> Result<(String, f64), String> {
    let (name, amount) = parse_partial(s)?;
    let amount = amount
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid amount for '{}': {}", name, e))?;
    Ok((name, amount))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing();

    let (backend, connector): (Arc<dyn Backend>, Arc<dyn PushConnector>) = if cli.paper {
        info!("Using in-memory demo backend");
        (Arc::new(PaperBackend::demo()), Arc::new(MemoryConnector::new()))
    } else {
        (
            Arc::new(HttpBackend::from_config(&config)?),
            Arc::new(WsConnector::new(config.ws_url.clone(), config.api_token.clone())),
        )
    };

    let session = Session::new(backend, connector, config);
    let res = run(&session, cli.command, cli.paper).await;
    session.shutdown().await;

    match res? {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

async fn run(session: &Session, command: Command, paper: bool) -> Result<i32> {
    match command {
        Command::Search { query } => {
            let resolver = session.lookup();
            match resolver.search(&query).await {
                LookupOutcome::Applied(results) => {
                    for entity in &results {
                        println!(
                            "{}\t{}",
                            entity.key_of(session.cache().key_field()).unwrap_or_default(),
                            entity.get_str("name").unwrap_or("-")
                        );
                    }
                    info!(count = results.len(), "Lookup complete");
                    Ok(0)
                }
                LookupOutcome::Failed(e) => Err(anyhow!(e.user_message())),
                LookupOutcome::Superseded => Ok(0),
            }
        }
        Command::Loans { subject } => {
            let rows = session.rows();
            let count = session
                .refresh_loans(&subject, &rows)
                .await
                .map_err(|e| anyhow!(e.user_message()))
                .context("Failed to load kasbon")?;
            for row in rows.snapshot() {
                println!(
                    "{}\tbalance={}\tprincipal={}\t{}",
                    row.key_of(rows.key_field()).unwrap_or_default(),
                    row.get_f64("balance").unwrap_or_default(),
                    row.get_f64("principal").unwrap_or_default(),
                    row.get_str("deduction_method").unwrap_or("-")
                );
            }
            info!(subject = %subject, count, "Kasbon listed");
            Ok(0)
        }
        Command::Watch { topic, mirror } => {
            if paper {
                bail!("watch needs a live push endpoint; drop --paper");
            }
            let rows = session.rows();
            let mut state = session.open_channel(&topic, rows.clone(), mirror);
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Ctrl-C received, closing channel");
                        break;
                    }
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = state.borrow_and_update().clone();
                        match current {
                            ChannelState::Errored(reason) => warn!(topic = %topic, %reason, "Channel errored"),
                            other => info!(topic = %topic, state = ?other, rows = rows.len(), "Channel state"),
                        }
                    }
                }
            }
            Ok(0)
        }
        Command::Settle(args) => settle(session, args).await,
    }
}

async fn settle(session: &Session, args: SettleArgs) -> Result<i32> {
    check_loan_selection(&args.full, &args.partial)?;

    let mut engine = session.settlement();
    engine
        .load_outstanding(&args.subject)
        .await
        .map_err(|e| anyhow!(e.user_message()))
        .context("Failed to load outstanding kasbon")?;

    let index_of = |engine: &kasbon_core::SettlementEngine, loan: &str| -> Result<usize> {
        engine
            .lines()
            .iter()
            .position(|l| l.loan_id() == loan)
            .ok_or_else(|| anyhow!("loan {} is not outstanding for {}", loan, args.subject))
    };

    for loan in &args.full {
        let i = index_of(&engine, loan)?;
        engine.toggle(i)?;
    }
    for (loan, amount) in &args.partial {
        let i = index_of(&engine, loan)?;
        engine.toggle(i)?;
        engine.set_mode(i, PaymentMode::Partial)?;
        engine.set_amount(i, amount.as_str())?;
    }
    if let Some(amount) = args.manual_loan_deduction {
        engine.set_manual_loan_deduction(amount)?;
    }

    let period = args
        .period
        .clone()
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m").to_string());
    let mut draft = PayrollSlipDraft::new(args.subject.clone(), period, args.gross);
    for (name, amount) in &args.items {
        draft = draft.with_item(name.clone(), *amount);
    }
    draft.id = args.slip_id.clone();
    draft.persisted = args.update;

    info!(
        subject = %args.subject,
        loan_deduction = engine.loan_deduction_field(),
        "Committing settlement"
    );
    let result = engine.commit(draft).await;
    match CommitOutcome::from_result(&result) {
        CommitOutcome::FullySettled => {
            if let Ok(r) = &result {
                println!("{}", r.summary());
            }
            Ok(0)
        }
        CommitOutcome::SavedWithFailures(n) => {
            if let Ok(r) = &result {
                println!("{}", r.summary());
            }
            warn!(failed = n, "Slip saved but some deductions failed");
            Ok(2)
        }
        CommitOutcome::SaveFailed(reason) => Err(anyhow!("Save failed: {}", reason)),
    }
}

/// Initialize tracing with an env-driven filter
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kasbon_core=debug,kasbon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        assert_eq!(
            parse_partial("kb-1= 150_000").unwrap(),
            ("kb-1".to_string(), " 150_000".to_string())
        );
        assert!(parse_partial("kb-1").is_err());
        assert_eq!(parse_item("bpjs=80000").unwrap(), ("bpjs".to_string(), 80_000.0));
        assert!(parse_item("bpjs=lots").is_err());
    }

    #[test]
    fn test_loan_selected_in_both_modes_is_rejected() {
        let full = vec!["kb-1001".to_string()];
        let partial = vec![("kb-1001".to_string(), "1000".to_string())];
        let err = check_loan_selection(&full, &partial).unwrap_err();
        assert!(err.to_string().contains("kb-1001"));

        let twice = vec!["kb-1001".to_string(), "kb-1001".to_string()];
        assert!(check_loan_selection(&twice, &[]).is_err());

        let other = vec![("kb-1002".to_string(), "1000".to_string())];
        assert!(check_loan_selection(&full, &other).is_ok());
    }

    #[test]
    fn test_cli_parses_settle_flags() {
        let cli = Cli::try_parse_from([
            "kasbon", "settle", "emp-001", "--gross", "5000000", "--full", "kb-1001", "--partial",
            "kb-1002=250000", "--item", "bpjs=80000",
        ])
        .unwrap();
        let Command::Settle(args) = cli.command else {
            panic!("expected settle");
        };
        assert_eq!(args.full, vec!["kb-1001".to_string()]);
        assert_eq!(args.partial, vec![("kb-1002".to_string(), "250000".to_string())]);
        assert_eq!(args.items, vec![("bpjs".to_string(), 80_000.0)]);
        assert!(!args.update);
    }
}
