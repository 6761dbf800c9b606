//! HTTP entry point for the review dashboard service.

use std::path::PathBuf;

use reviewdash::config;
use reviewdash::gateway::ReviewGateway;
use reviewdash::ledger::Ledger;
use reviewdash::logging;
use reviewdash::server::{Server, ServiceState};

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
    let mut app_config = loaded.config;
    if let Some(bind) = options.bind {
        app_config.server.bind_addr = bind;
    }

    if let Err(err) = logging::init(&app_config.logging) {
        eprintln!("Logging disabled: {err}");
    }
    match &loaded.path {
        Some(path) => tracing::info!("Loaded config from {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }
    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }
    tracing::info!(
        "Upstream reviews: {} (demo fallback {})",
        app_config.upstream.reviews_url,
        if app_config.upstream.demo_fallback { "on" } else { "off" }
    );

    let ledger =
        Ledger::open(&app_config).map_err(|err| format!("Failed to open ledger: {err}"))?;
    let gateway = ReviewGateway::new(&app_config.upstream).map_err(|err| err.to_string())?;
    let state = ServiceState {
        ledger,
        gateway,
        metrics: app_config.metrics.clone(),
    };
    let server = Server::bind(&app_config.server, state).map_err(|err| err.to_string())?;
    server.run().map_err(|err| err.to_string())
}

#[derive(Default)]
struct Options {
    config_path: Option<PathBuf>,
    bind: Option<String>,
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
            "--bind" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--bind requires a value".to_string())?;
                options.bind = Some(value.to_string());
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
        "reviewdash",
        "",
        "Serve the verification ledger and metrics API.",
        "",
        "Usage:",
        "  reviewdash [--config PATH] [--bind ADDR]",
        "",
        "Options:",
        "  --config <path>  Config file (default: <app root>/config.toml).",
        "  --bind <addr>    Listen address, overrides server.bind_addr.",
        "",
        "Environment:",
        "  REVIEWS_UPSTREAM_URL, DATA_VOLUME_PATH, REVIEWDASH_POSITIVE_LABEL,",
        "  REVIEWDASH_BIND, REVIEWDASH_CONFIG_HOME, RUST_LOG",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_config_and_bind() {
        let options = parse_args(args(&["--config", "/tmp/c.toml", "--bind", "0.0.0.0:8080"]))
            .unwrap()
            .unwrap();
        assert_eq!(options.config_path, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(options.bind.as_deref(), Some("0.0.0.0:8080"));
    }

    #[test]
    fn rejects_missing_values_and_unknown_flags() {
        assert!(parse_args(args(&["--bind"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
        assert!(parse_args(args(&["--help"])).unwrap().is_none());
    }
}
