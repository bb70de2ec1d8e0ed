//! loyalty-runner: headless driver for the loyalty engine.
//!
//! Usage:
//!   loyalty-runner --db loyalty.db --data-dir ./data          demo scenario
//!   loyalty-runner --db loyalty.db --ipc-mode                 JSON lines on stdin/stdout
//!
//! In IPC mode every input line is one `LoyaltyCommand`; every output line
//! is `{"ok": ...}` or `{"error": ..., "business_rule": bool}`.

use anyhow::{Context, Result};
use loyalty_core::{
    accrual_subsystem::{AccrualRequest, LineItem},
    command::LoyaltyCommand,
    config::{LoyaltyConfig, RuleCatalog},
    engine::LoyaltyEngine,
    redemption_subsystem::RedemptionStatus,
    referral_subsystem::ActorContext,
    store::LoyaltyStore,
    user::NewUser,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 0u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");

    if !ipc_mode {
        println!("Loyalty engine: loyalty-runner");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  seed:      {}", if seed == 0 { "entropy".to_string() } else { seed.to_string() });
        println!();
    }

    let config = if Path::new(data_dir).join("loyalty.json").exists() {
        LoyaltyConfig::load(data_dir)?
    } else {
        log::warn!("no loyalty.json in {data_dir}, using defaults");
        LoyaltyConfig::default()
    };

    let store = if db == ":memory:" {
        LoyaltyStore::in_memory()?
    } else {
        LoyaltyStore::open(db).with_context(|| format!("opening {db}"))?
    };
    store.migrate()?;

    let mut engine = LoyaltyEngine::new(store, config)?;
    if seed != 0 {
        engine = engine.with_code_seed(seed);
    }

    if Path::new(data_dir).join("catalog.json").exists() {
        engine.seed_catalog(&RuleCatalog::load(data_dir)?)?;
    }

    if ipc_mode {
        run_ipc_loop(&engine)?;
    } else {
        run_demo(&engine)?;
    }
    Ok(())
}

fn run_ipc_loop(engine: &LoyaltyEngine) -> Result<()> {
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
        if buffer.trim() == "quit" {
            break;
        }

        let reply = match serde_json::from_str::<LoyaltyCommand>(&buffer) {
            Ok(cmd) => match cmd.execute(engine) {
                Ok(value) => serde_json::json!({ "ok": value }),
                Err(e) => {
                    log::debug!("command failed: {e}");
                    serde_json::json!({ "error": e.to_string(), "business_rule": e.is_business_rule() })
                }
            },
            Err(e) => serde_json::json!({ "error": e.to_string(), "business_rule": false }),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

/// Walk one member through registration, purchases, a referral and a
/// redemption, then print where everything landed.
fn run_demo(engine: &LoyaltyEngine) -> Result<()> {
    let actor = ActorContext {
        ip: "198.51.100.20".to_string(),
        user_agent: "loyalty-runner/0.1".to_string(),
        country: Some("US".to_string()),
        account_created_at: None,
    };

    let alice = engine
        .register_user(&NewUser {
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
            region: Some("US".to_string()),
        })?
        .user;
    println!("registered {} with code {}", alice.email, alice.referral_code);

    let check = engine.validate_referral_code(&alice.referral_code, &actor)?;
    println!("code check: valid={} risk={}", check.valid, check.risk_score);

    let bob = engine.register_with_referral(
        &NewUser {
            email: "bob@example.com".to_string(),
            name: "Bob".to_string(),
            region: Some("US".to_string()),
        },
        &alice.referral_code,
        &actor,
    )?;
    println!(
        "registered {} via referral: welcome={} referral={} blocked={}",
        bob.user.email, bob.welcome_bonus_points, bob.referral_bonus_points, bob.blocked
    );

    let orders = [
        ("demo-1001", 42.50, vec![("mains", 30.00), ("desserts", 12.50)]),
        ("demo-1002", 18.00, vec![("beverages", 6.00), ("mains", 12.00)]),
        ("demo-1003", 120.00, vec![("mains", 95.00), ("desserts", 25.00)]),
    ];
    for (order_id, amount, lines) in orders {
        let request = AccrualRequest::purchase(
            &bob.user.user_id,
            order_id,
            amount,
            lines
                .into_iter()
                .map(|(category, line_amount)| LineItem { category_id: category.to_string(), line_amount })
                .collect(),
        );
        let outcome = engine.accrue(&request)?;
        println!(
            "order {order_id} ({amount:.2}): +{} points, balance {}, tier {}",
            outcome.points_awarded, outcome.new_balance, outcome.new_tier
        );
        for part in &outcome.breakdown {
            println!("    {:<24} x{:<6.3} {:+}", part.rule_id, part.factor, part.points);
        }
    }

    let replay = engine.accrue(&AccrualRequest::purchase(&bob.user.user_id, "demo-1001", 42.50, Vec::new()))?;
    println!("replayed demo-1001: replayed={} points={}", replay.replayed, replay.points_awarded);

    match engine.redeem(&bob.user.user_id, "rw-free-drink") {
        Ok(receipt) => {
            println!(
                "redeemed rw-free-drink: code {} for {} points, balance {}",
                receipt.redemption_code, receipt.points_used, receipt.new_balance
            );
            let approved = engine.update_redemption_status(&receipt.redemption_id, RedemptionStatus::Approved)?;
            let delivered = engine.update_redemption_status(&approved.redemption_id, RedemptionStatus::Delivered)?;
            println!("redemption {} is {}", delivered.redemption_code, delivered.status.as_str());
        }
        Err(e) => println!("redemption refused: {e}"),
    }

    if let Err(e) = engine.redeem(&bob.user.user_id, "rw-chef-table") {
        println!("chef's table refused: {e}");
    }

    print_summary(engine, &[alice.user_id.as_str(), bob.user.user_id.as_str()])
}

fn print_summary(engine: &LoyaltyEngine, user_ids: &[&str]) -> Result<()> {
    println!();
    println!("=== MEMBERS ===");
    for user_id in user_ids {
        let user = engine.user(user_id)?;
        let status = engine.classify_customer(user_id)?;
        println!(
            "  {:<20} balance {:>6}  earned {:>6}  tier {:<7} status {}",
            user.email,
            user.points_balance,
            user.total_points_earned,
            user.loyalty_tier,
            status.as_str()
        );
        for referral in engine.referrals_by(user_id)? {
            println!(
                "    referral {} -> {} ({}, +{})",
                referral.code,
                referral.referred_id,
                referral.status.as_str(),
                referral.points_awarded
            );
        }
    }

    let summary = engine.lifecycle_summary()?;
    println!();
    println!("=== LIFECYCLE ===");
    println!("  active:   {}", summary.active);
    println!("  inactive: {}", summary.inactive);
    println!("  dormant:  {}", summary.dormant);

    println!();
    println!("=== AUDIT ===");
    println!("  events:      {}", engine.events(None)?.len());
    println!("  fraud evals: {}", engine.fraud_logs(None)?.len());
    Ok(())
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
