//! Command-line driver for the encrypted contribution ledger.
//!
//! Runs transition streams against the in-process reference backend, prints
//! one `QSYS|mod=LEDGER|...` status line per transition, and can checkpoint
//! the resulting ledger tables.

use serde::Deserialize;
use std::{env, fs, path::PathBuf};
use tracing_subscriber::EnvFilter;
use veiled_ledger::{
    state_root, write_checkpoint, ClearBackend, Handle, Ledger, LedgerCheckpoint, LedgerConfig,
    LedgerError, Principal, Timestamp,
};

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_help() {
    println!("Usage: veil <demo|replay|config> ...");
    println!("  demo");
    println!("  replay <script.json> [--config <file>] [--seed <u64>] [--checkpoint <dir>]");
    println!("  config [--config <file>]");
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("failed to init logging: {err}");
    }
}

fn main() {
    init_logging();
    let mut args = env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("demo") => cmd_demo(),
        Some("replay") => cmd_replay(args.collect()),
        Some("config") => cmd_config(args.collect()),
        Some("-h") | Some("--help") | None => print_help(),
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}

/// One step of a replay script.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    Contribute {
        principal: String,
        amount: u32,
        at: Timestamp,
    },
    Rank {
        principal: String,
    },
    Total {
        principal: String,
    },
    Aggregate,
    Players,
}

fn load_config(path: Option<&str>) -> LedgerConfig {
    let base = match path {
        Some(path) => LedgerConfig::load(&PathBuf::from(path))
            .unwrap_or_else(|err| fatal(&format!("failed to load config: {err}"))),
        None => LedgerConfig::default(),
    };
    base.with_env_overrides()
        .unwrap_or_else(|err| fatal(&format!("invalid config override: {err}")))
}

fn report(
    ledger: &Ledger<ClearBackend>,
    principal: &Principal,
    label: &str,
    result: Result<Handle, LedgerError>,
) {
    match result {
        Ok(handle) => {
            let clear = ledger
                .backend()
                .decrypt(ledger.grants(), handle, principal)
                .map(|v| v.to_string())
                .unwrap_or_else(|err| format!("<{err}>"));
            println!(
                "QSYS|mod=LEDGER|evt={label}|principal={principal}|handle={handle}|clear={clear}"
            );
        }
        Err(LedgerError::RateLimited { retry_after, .. }) => println!(
            "QSYS|mod=LEDGER|evt={label}_REJECTED|principal={principal}|reason=rate_limited|retry_secs={}",
            retry_after.as_secs()
        ),
        Err(err) => println!(
            "QSYS|mod=LEDGER|evt={label}_REJECTED|principal={principal}|reason={err}"
        ),
    }
}

fn apply(ledger: &mut Ledger<ClearBackend>, step: Step) {
    match step {
        Step::Contribute {
            principal,
            amount,
            at,
        } => {
            let principal = Principal::new(principal);
            let input = ledger.backend_mut().encrypt_input(&principal, amount);
            let result = ledger.contribute(&principal, &input, at);
            report(ledger, &principal, "CONTRIBUTE", result);
        }
        Step::Rank { principal } => {
            let principal = Principal::new(principal);
            let result = ledger.calculate_rank(&principal);
            report(ledger, &principal, "RANK", result);
        }
        Step::Total { principal } => {
            let principal = Principal::new(principal);
            let result = ledger.get_total(&principal);
            report(ledger, &principal, "TOTAL", result);
        }
        Step::Aggregate => {
            println!(
                "QSYS|mod=LEDGER|evt=AGGREGATE|handle={}",
                ledger.get_aggregate()
            );
        }
        Step::Players => {
            let names: Vec<&str> = ledger.players().iter().map(|p| p.as_str()).collect();
            println!(
                "QSYS|mod=LEDGER|evt=PLAYERS|count={}|order={}",
                ledger.player_count(),
                names.join(",")
            );
        }
    }
    for event in ledger.drain_events() {
        match serde_json::to_string(&event) {
            Ok(line) => println!(
                "QSYS|mod=LEDGER|evt=NOTIFY|principal={}|payload={line}",
                event.principal()
            ),
            Err(err) => eprintln!("failed to encode event: {err}"),
        }
    }
}

fn cmd_demo() {
    let config = LedgerConfig::with_min_interval(10);
    let mut ledger = Ledger::new(ClearBackend::new(), &config);
    let script = [
        Step::Contribute {
            principal: "alice".into(),
            amount: 10,
            at: 0,
        },
        Step::Contribute {
            principal: "alice".into(),
            amount: 5,
            at: 5,
        },
        Step::Total {
            principal: "alice".into(),
        },
        Step::Contribute {
            principal: "alice".into(),
            amount: 5,
            at: 11,
        },
        Step::Contribute {
            principal: "bob".into(),
            amount: 20,
            at: 12,
        },
        Step::Rank {
            principal: "alice".into(),
        },
        Step::Rank {
            principal: "bob".into(),
        },
        Step::Players,
    ];
    for step in script {
        apply(&mut ledger, step);
    }
    print_root(&ledger);
}

fn print_root(ledger: &Ledger<ClearBackend>) {
    println!(
        "QSYS|mod=LEDGER|evt=ROOT|transitions={}|min_interval={}|ciphertexts={}|root={}",
        ledger.state().transitions(),
        ledger.min_interval(),
        ledger.backend().ciphertext_count(),
        hex::encode(state_root(ledger.state()))
    );
}

fn cmd_replay(args: Vec<String>) {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("Usage: veil replay <script.json> [--config <file>] [--seed <u64>] [--checkpoint <dir>]");
        return;
    }
    let mut script: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut seed: Option<u64> = None;
    let mut checkpoint_dir: Option<String> = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(
                    iter.next()
                        .unwrap_or_else(|| fatal("--config expects a value")),
                );
            }
            "--seed" => {
                let raw = iter
                    .next()
                    .unwrap_or_else(|| fatal("--seed expects a value"));
                seed = Some(raw.parse::<u64>().unwrap_or_else(|_| fatal("invalid --seed")));
            }
            "--checkpoint" => {
                checkpoint_dir = Some(
                    iter.next()
                        .unwrap_or_else(|| fatal("--checkpoint expects a value")),
                );
            }
            other if other.starts_with("--") => fatal(&format!("unknown argument: {other}")),
            other => {
                if script.replace(other.to_string()).is_some() {
                    fatal("replay takes a single script path");
                }
            }
        }
    }

    let script = script.unwrap_or_else(|| fatal("replay requires a script path"));
    let contents = fs::read_to_string(&script)
        .unwrap_or_else(|err| fatal(&format!("failed to read {script}: {err}")));
    let steps: Vec<Step> = serde_json::from_str(&contents)
        .unwrap_or_else(|err| fatal(&format!("invalid script {script}: {err}")));
    let config = load_config(config_path.as_deref());
    let backend = match seed {
        Some(seed) => ClearBackend::with_seed(seed),
        None => ClearBackend::new(),
    };
    let mut ledger = Ledger::new(backend, &config);
    for step in steps {
        apply(&mut ledger, step);
    }

    print_root(&ledger);
    if let Some(dir) = checkpoint_dir {
        let checkpoint = LedgerCheckpoint::capture(ledger.state());
        match write_checkpoint(&PathBuf::from(&dir), &checkpoint) {
            Ok(path) => println!("QSYS|mod=LEDGER|evt=CHECKPOINT|path={}", path.display()),
            Err(err) => fatal(&format!("failed to write checkpoint: {err}")),
        }
    }
}

fn cmd_config(args: Vec<String>) {
    let mut config_path: Option<String> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(
                    iter.next()
                        .unwrap_or_else(|| fatal("--config expects a value")),
                );
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    let config = load_config(config_path.as_deref());
    let ledger = Ledger::new(ClearBackend::with_seed(0), &config);
    println!(
        "QSYS|mod=LEDGER|evt=CONFIG|min_interval={}",
        ledger.min_interval()
    );
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{json}"),
        Err(err) => fatal(&format!("failed to encode config: {err}")),
    }
}
