use std::path::Path;

use anyhow::{Context, Result};
use clap::ArgMatches;
use meter_config::{Config, OverridableConfig};

use crate::cliapp::make_app;
use crate::setup;

/// Config folder used when `--config` is not passed.
const DEFAULT_CONFIG_PATH: &str = ".meter";

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .map_or(DEFAULT_CONFIG_PATH, String::as_str);

    // Initialize the config folder before loading a config from it.
    if let Some(("config", config_matches)) = matches.subcommand()
        && let Some(("init", _)) = config_matches.subcommand()
    {
        return init_config(config_path);
    }

    let mut config = Config::from_path(config_path)?;

    match matches.subcommand() {
        Some(("agent", matches)) => match matches.subcommand() {
            Some(("run", matches)) => {
                config.apply_override(extract_config_args(matches))?;
                run_agent(config)
            }
            _ => unreachable!(),
        },
        Some(("collector", matches)) => match matches.subcommand() {
            Some(("run", matches)) => {
                config.apply_override(extract_config_args(matches))?;
                run_collector(config)
            }
            _ => unreachable!(),
        },
        Some(("config", matches)) => match matches.subcommand() {
            Some(("show", matches)) => show_config(&config, matches),
            _ => unreachable!(),
        },
        _ => unreachable!(),
    }
}

/// Returns the value of an argument if the subcommand defines it.
fn value(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.try_get_one::<String>(id).ok().flatten().cloned()
}

/// Extracts config overrides from the arguments of a `run` subcommand.
///
/// Values coming from environment variables are resolved by clap, so arguments and environment
/// take the same path.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    OverridableConfig {
        address: value(matches, "address"),
        report_interval: value(matches, "report_interval"),
        poll_interval: value(matches, "poll_interval"),
        rate_limit: value(matches, "rate_limit"),
        key: value(matches, "key"),
        crypto_key: value(matches, "crypto_key"),
        store_interval: value(matches, "store_interval"),
        file_storage_path: value(matches, "file_storage_path"),
        restore: value(matches, "restore"),
        database_dsn: value(matches, "database_dsn"),
        trusted_subnet: value(matches, "trusted_subnet"),
    }
}

#[allow(clippy::print_stdout)]
pub fn init_config<P: AsRef<Path>>(config_path: P) -> Result<()> {
    let config_path = config_path.as_ref();

    if Config::config_exists(config_path) {
        println!(
            "A config already exists in {}, leaving it untouched.",
            config_path.display()
        );
        return Ok(());
    }

    Config::default()
        .save_in_folder(config_path)
        .with_context(|| format!("could not write config to {}", config_path.display()))?;
    println!("Wrote default config to {}", config_path.display());

    Ok(())
}

#[allow(clippy::print_stdout)]
pub fn show_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.get_one::<String>("format").map(String::as_str) {
        Some("debug") => println!("{config:#?}"),
        _ => print!("{}", config.to_yaml_string()?),
    }

    Ok(())
}

pub fn run_agent(config: Config) -> Result<()> {
    setup::init_logging(&config);
    setup::dump_agent_infos(&config);
    setup::init_metrics(&config)?;

    meter_agent::run(config)
}

pub fn run_collector(config: Config) -> Result<()> {
    setup::init_logging(&config);
    setup::dump_collector_infos(&config);
    setup::init_metrics(&config)?;

    meter_server::run(config)
}
