//! CLI utility to print verification metrics straight from a ledger store.

use std::path::PathBuf;

use reviewdash::classifier::Classifier;
use reviewdash::config;
use reviewdash::ledger::{self, Ledger, LedgerSnapshot};
use reviewdash::metrics;
use reviewdash::report;
use serde_json::json;
use time::OffsetDateTime;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    let loaded = config::load(options.config_path.as_deref()).map_err(|err| err.to_string())?;
    let app_config = loaded.config;

    let snapshot = match &options.ledger_path {
        Some(path) => {
            let backend = ledger::existing_backend_for_path(path)
                .map_err(|err| format!("Open ledger {} failed: {err}", path.display()))?;
            let ledger = Ledger::spawn(
                backend,
                Classifier::new(app_config.metrics.positive_label.clone()),
                app_config.storage.ledger_timeout(),
            )
            .map_err(|err| err.to_string())?;
            let records = ledger
                .try_read_all()
                .map_err(|err| format!("Read ledger {} failed: {err}", path.display()))?;
            LedgerSnapshot::live(records)
        }
        None => Ledger::open(&app_config)
            .map_err(|err| format!("Open ledger failed: {err}"))?
            .read_all(),
    };

    let computed =
        metrics::compute_metrics(&snapshot.records, OffsetDateTime::now_utc(), &app_config.metrics);
    if options.json {
        let body = json!({
            "metrics": computed,
            "data_source": snapshot.data_source(),
            "storage_error": snapshot.storage_error(),
        });
        let text = serde_json::to_string_pretty(&body).map_err(|err| err.to_string())?;
        println!("{text}");
    } else {
        print!("{}", report::render_text(&computed, &snapshot));
    }
    Ok(())
}

#[derive(Default)]
struct Options {
    config_path: Option<PathBuf>,
    ledger_path: Option<PathBuf>,
    json: bool,
}

fn parse_args(args: Vec<String>) -> Result<Option<Options>, String> {
    let mut options = Options::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                return Ok(None);
            }
            "--config" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--config requires a value".to_string())?;
                options.config_path = Some(PathBuf::from(value));
            }
            "--ledger" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--ledger requires a value".to_string())?;
                options.ledger_path = Some(PathBuf::from(value));
            }
            "--json" => {
                options.json = true;
            }
            unknown => {
                return Err(format!("Unknown argument: {unknown}\n\n{}", help_text()));
            }
        }
        idx += 1;
    }
    Ok(Some(options))
}

fn help_text() -> String {
    [
        "reviewdash-report",
        "",
        "Print verification metrics from the ledger.",
        "",
        "Usage:",
        "  reviewdash-report [--config PATH] [--ledger PATH] [--json]",
        "",
        "Options:",
        "  --config <path>  Config file (default: <app root>/config.toml).",
        "  --ledger <path>  Ledger file to read instead of the configured store.",
        "                   .db/.sqlite files open as SQLite, anything else as JSON.",
        "  --json           Print the metrics snapshot as JSON.",
    ]
    .join("\n")
}
