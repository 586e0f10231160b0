//! audit_verify - external verifier for the lapse-guard audit log
//!
//! Replays the hash chain from genesis without trusting the recorder. Exit status:
//! 0 when the chain is intact, 2 on an integrity violation (tampering), 1 on any other
//! error (missing file, unreadable file).

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use lapse_guard::audit::{verify_file_with, Verification};
use lapse_guard::SentinelConfig;

#[path = "../ui.rs"]
mod ui;

const EXIT_TAMPERED: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "audit_verify",
    about = "Verify lapse-guard audit log integrity (hash chain replay)"
)]
struct Args {
    /// Audit log to verify (defaults to the configured data root)
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Print every verified entry
    #[arg(short, long)]
    verbose: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    let path = match args.log {
        Some(path) => path,
        None => {
            let _stage = ui.stage("Load configuration");
            SentinelConfig::load()?.audit_path()
        }
    };
    println!("audit_verify: checking {}", path.display());

    let verification = {
        let mut stage = ui.stage("Replay hash chain");
        let result = verify_file_with(&path, |index, entry| {
            if args.verbose {
                println!(
                    "  entry {}: {} {} hash={} OK",
                    index,
                    entry.timestamp,
                    entry.event_type,
                    &entry.hash[..16.min(entry.hash.len())]
                );
            }
            if index % 1000 == 0 {
                stage.set_message(&format!("{} entries", index));
            }
        });
        if !matches!(result, Ok(Verification::Valid { .. })) {
            stage.fail();
        }
        result?
    };

    match &verification {
        Verification::Valid { entries, head } => {
            println!("verified {} audit entries", entries);
            println!("chain head: {}", head);
            Ok(())
        }
        Verification::Invalid(violation) => {
            eprintln!("TAMPERING DETECTED: {}", violation);
            println!("first invalid entry: {}", violation.index);
            std::process::exit(EXIT_TAMPERED);
        }
    }
}
