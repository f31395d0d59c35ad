//! ledger-runner: headless runner for the card ledger.
//!
//! Usage:
//!   ledger-runner --db ledger.db --fixtures fixtures.json
//!   ledger-runner --db ledger.db --config ledger.json --ipc-mode
//!
//! In IPC mode every stdin line is one JSON command and every stdout line
//! is one JSON reply: `{"ok": ...}` or `{"error": {"code", "message"}}`.

use anyhow::Result;
use cardledger_core::{
    allocation,
    api::{ApiError, CreatePaymentRequest, LedgerApi, PaymentQuery},
    clock::LedgerClock,
    config::LedgerConfig,
    model::{Card, PaymentStatus, Statement},
    notification::{ChannelDispatcher, LogDispatcher},
    store::LedgerStore,
    webhook_receiver::WebhookPayload,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    CreatePayment {
        user_id: String,
        request: CreatePaymentRequest,
    },
    Webhook {
        payload: WebhookPayload,
    },
    GetPayment {
        user_id: String,
        payment_id: String,
    },
    ListPayments {
        user_id: String,
        #[serde(default)]
        query: PaymentQuery,
    },
    Outstanding {
        user_id: String,
        card_id: String,
    },
    Allocations {
        user_id: String,
        payment_id: String,
    },
    /// Wait for every scheduled simulator task.
    Drain,
    Quit,
}

/// Cards and statements produced by the billing side, loaded at startup.
#[derive(serde::Deserialize, Default)]
struct Fixtures {
    #[serde(default)]
    cards: Vec<Card>,
    #[serde(default)]
    statements: Vec<Statement>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or("ledger.db");
    let config = match flag_value(&args, "--config") {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    };

    if !ipc_mode {
        println!("card ledger: ledger-runner");
        println!("  db:        {db}");
        println!("  simulator: {}", if config.simulator.enabled { "on" } else { "off" });
        println!();
    }

    let store = if db == ":memory:" {
        LedgerStore::in_memory()?
    } else {
        LedgerStore::open_with_timeout(db, config.busy_timeout_ms)?
    };
    store.migrate()?;

    if let Some(path) = flag_value(&args, "--fixtures") {
        let (cards, statements) = load_fixtures(&store, path)?;
        log::info!("runner: loaded {cards} cards and {statements} statements from {path}");
    }

    let (dispatcher, notify_worker) = ChannelDispatcher::spawn_worker(LogDispatcher);
    let mut api = LedgerApi::build(store, &config, Arc::new(dispatcher), LedgerClock::System)?;

    let recovered = api.recover_pending()?;
    if recovered > 0 {
        log::info!("runner: re-scheduled {recovered} pending payments");
    }

    if ipc_mode {
        run_ipc_loop(&mut api)?;
    }
    api.drain();
    if !ipc_mode {
        print_summary(api.store())?;
    }

    // Dropping the api closes the notification channel.
    drop(api);
    if notify_worker.join().is_err() {
        log::warn!("runner: notification worker panicked");
    }
    Ok(())
}

fn run_ipc_loop(api: &mut LedgerApi) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err = ApiError {
                    code: "VALIDATION_ERROR".into(),
                    message: format!("malformed command: {e}"),
                };
                writeln!(stdout, "{}", serde_json::json!({ "error": err }))?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::CreatePayment { user_id, request } => {
                to_reply(api.create_payment(&user_id, &request))
            }
            IpcCommand::Webhook { payload } => to_reply(api.webhook(&payload)),
            IpcCommand::GetPayment {
                user_id,
                payment_id,
            } => to_reply(api.get_payment(&user_id, &payment_id)),
            IpcCommand::ListPayments { user_id, query } => {
                to_reply(api.list_payments(&user_id, &query))
            }
            IpcCommand::Outstanding { user_id, card_id } => {
                to_reply(api.card_outstanding(&user_id, &card_id))
            }
            IpcCommand::Allocations {
                user_id,
                payment_id,
            } => to_reply(api.payment_allocations(&user_id, &payment_id)),
            IpcCommand::Drain => {
                api.drain();
                serde_json::json!({ "ok": { "drained": true } })
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn to_reply<T: serde::Serialize>(result: Result<T, ApiError>) -> serde_json::Value {
    match result {
        Ok(v) => serde_json::json!({ "ok": v }),
        Err(e) => serde_json::json!({ "error": e }),
    }
}

fn load_fixtures(store: &LedgerStore, path: &str) -> Result<(usize, usize)> {
    let content =
        std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    let fixtures: Fixtures = serde_json::from_str(&content)?;
    let now = chrono::Utc::now();
    for card in &fixtures.cards {
        store.insert_card(card)?;
    }
    for stmt in &fixtures.statements {
        store.insert_statement(stmt, now)?;
    }
    Ok((fixtures.cards.len(), fixtures.statements.len()))
}

fn print_summary(store: &LedgerStore) -> Result<()> {
    println!("=== LEDGER SUMMARY ===");
    for card in store.cards()? {
        let open = store.unpaid_statements(&card.card_id)?;
        let outstanding = allocation::outstanding(&open);
        println!(
            "  card ****{} ({:<8}) user={:<10} open statements={:<3} outstanding={}",
            card.last4,
            card.status.as_str(),
            card.user_id,
            open.len(),
            outstanding
        );
    }
    println!();
    println!("  payments pending:  {}", store.payment_count(PaymentStatus::Pending)?);
    println!("  payments success:  {}", store.payment_count(PaymentStatus::Success)?);
    println!("  payments failed:   {}", store.payment_count(PaymentStatus::Failed)?);
    println!("  allocation rows:   {}", store.allocation_entry_count()?);
    println!("  ledger balance:    {}", store.total_statement_balance()?);
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
