mod config;
mod engine;
mod http;
mod ip;
mod resolve;
mod service;

use std::fs;
use std::process::ExitCode;
use std::str::FromStr;

use log::LevelFilter;

use config::Config;
use engine::{Engine, LogReporter};
use http::HttpClient;
use ip::HttpIpSource;
use resolve::{AuthorityResolver, SystemProbe};
use service::HttpUpdater;

const CONFIG_PATHS: [&str; 2] = ["./config.toml", "/etc/ddns-sync/config.toml"];

/// An explicit path on the command line wins; otherwise the usual locations
/// are tried in order.
fn read_config() -> Option<(String, String)> {
    if let Some(path) = std::env::args().nth(1) {
        return match fs::read_to_string(&path) {
            Ok(text) => Some((path, text)),
            Err(e) => {
                eprintln!("unable to read {}: {}", path, e);
                None
            }
        };
    }

    for path in CONFIG_PATHS {
        if let Ok(text) = fs::read_to_string(path) {
            return Some((path.to_string(), text));
        }
    }

    None
}

fn init_logging(level: &str) {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);

    // RUST_LOG still wins over the configured level.
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .init();
}

fn main() -> ExitCode {
    let Some((path, text)) = read_config() else {
        eprintln!(
            "no configuration found (looked for {}); quitting",
            CONFIG_PATHS.join(", ")
        );
        return ExitCode::FAILURE;
    };

    let config = match Config::from_toml(&text) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.general.log_level);

    let timeout = config.timeout();
    let client = HttpClient::new(&config.general.user_agent, timeout);

    let probe = match SystemProbe::new(timeout) {
        Ok(probe) => probe,
        Err(e) => {
            log::error!("unable to set up the DNS resolver: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let accounts = config.into_accounts();

    log::info!(
        "ddns-sync v{} reconciling {} account(s)",
        env!("CARGO_PKG_VERSION"),
        accounts.len()
    );

    let ip_source = HttpIpSource::new(&client);
    let resolver = AuthorityResolver::new(probe);
    let updater = HttpUpdater::new(&client);
    let reporter = LogReporter;

    let engine = Engine::new(&ip_source, &resolver, &updater, &reporter);
    let summary = engine.run(&accounts);

    if summary.clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
