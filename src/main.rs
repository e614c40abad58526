use std::collections::HashSet;
use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use pkgnews::news::relevance::critical_mentions;
use pkgnews::{Config, FetchContext};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Installed package names, one per line. Blank lines and `#` comments are skipped.
fn read_installed(input: impl BufRead) -> io::Result<HashSet<String>> {
    let mut installed = HashSet::new();
    for line in input.lines() {
        let line = line?;
        let name = line.split_whitespace().next().unwrap_or_default();
        if !name.is_empty() && !name.starts_with('#') {
            installed.insert(name.to_string());
        }
    }
    Ok(installed)
}

#[tokio::main]
async fn main() -> ExitCode {
    let path = std::env::args().nth(1);

    // Load configuration
    let mut config = match Config::load(path.as_deref().unwrap_or(DEFAULT_CONFIG_PATH)) {
        Ok(config) => config,
        Err(e) if path.is_some() => {
            eprintln!("Failed to load {}: {e}", path.as_deref().unwrap_or_default());
            return ExitCode::FAILURE;
        }
        Err(_) => Config::default(),
    };
    config.apply_env_overrides();

    // Initialize logging
    if let Err(e) = pkgnews::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        pkgnews::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let installed = match read_installed(io::stdin().lock()) {
        Ok(installed) => installed,
        Err(e) => {
            error!("Failed to read installed packages from stdin: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Checking news for {} installed packages", installed.len());

    let ctx = match FetchContext::new(&config) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("Failed to set up fetcher: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let critical: HashSet<String> = config.extract.critical_packages.iter().cloned().collect();
    let excluded: HashSet<String> = config.extract.generic_names.iter().cloned().collect();

    let relevant = ctx
        .fetch_relevant(&config.feeds, &installed, &critical, &excluded)
        .await;

    for item in &relevant {
        println!(
            "[{}] {} {}",
            item.source,
            item.publish_date.format("%Y-%m-%d"),
            item.title
        );
        println!("    {}", item.link);
        if !item.affected_packages.is_empty() {
            let affected: Vec<&str> = item.affected_packages.iter().map(String::as_str).collect();
            let critical_hits = critical_mentions(item, &critical);
            if critical_hits.is_empty() {
                println!("    affects: {}", affected.join(", "));
            } else {
                let critical_hits: Vec<&str> = critical_hits.iter().map(String::as_str).collect();
                println!(
                    "    affects: {} (critical: {})",
                    affected.join(", "),
                    critical_hits.join(", ")
                );
            }
        }
    }

    ExitCode::SUCCESS
}
