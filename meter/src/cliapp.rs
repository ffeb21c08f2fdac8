//! Definition of the command line app.
use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, Command};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Collects runtime metrics with an agent and stores them in a collector.";

fn address_arg(help: &'static str) -> Arg {
    Arg::new("address")
        .value_name("HOST:PORT")
        .long("address")
        .short('a')
        .env("ADDRESS")
        .help(help)
}

fn key_arg() -> Arg {
    Arg::new("key")
        .value_name("KEY")
        .long("key")
        .short('k')
        .env("KEY")
        .hide_env_values(true)
        .help("Shared secret for the SHA-256 payload digest.")
}

fn crypto_key_arg(help: &'static str) -> Arg {
    Arg::new("crypto_key")
        .value_name("PATH")
        .long("crypto-key")
        .env("CRYPTO_KEY")
        .help(help)
}

fn agent_command() -> Command {
    Command::new("agent")
        .subcommand_required(true)
        .about("Sample runtime statistics and report them")
        .subcommand(
            Command::new("run")
                .about("Run the agent")
                .after_help(
                    "This runs the agent in the foreground until it's shut down.  It samples \
                     on the poll interval and reports everything it collected to the \
                     collector on the report interval.",
                )
                .arg(address_arg("Address of the collector."))
                .arg(
                    Arg::new("report_interval")
                        .value_name("SECONDS")
                        .long("report-interval")
                        .short('r')
                        .env("REPORT_INTERVAL")
                        .help("Seconds between two deliveries."),
                )
                .arg(
                    Arg::new("poll_interval")
                        .value_name("SECONDS")
                        .long("poll-interval")
                        .short('p')
                        .env("POLL_INTERVAL")
                        .help("Seconds between two samples."),
                )
                .arg(
                    Arg::new("rate_limit")
                        .value_name("COUNT")
                        .long("rate-limit")
                        .short('l')
                        .env("RATE_LIMIT")
                        .help("Maximum number of concurrent uploads."),
                )
                .arg(key_arg())
                .arg(crypto_key_arg(
                    "PEM file with the collector's public key. Payloads are encrypted if set.",
                )),
        )
}

fn collector_command() -> Command {
    Command::new("collector")
        .subcommand_required(true)
        .about("Receive and store metrics")
        .subcommand(
            Command::new("run")
                .about("Run the collector")
                .after_help(
                    "This runs the collector in the foreground until it's shut down.  It will \
                     bind to the configured address and persist metrics either to the \
                     database or to the snapshot file.",
                )
                .arg(address_arg("Address to listen on."))
                .arg(
                    Arg::new("store_interval")
                        .value_name("SECONDS")
                        .long("store-interval")
                        .short('i')
                        .env("STORE_INTERVAL")
                        .help("Seconds between two snapshots. 0 writes after every update."),
                )
                .arg(
                    Arg::new("file_storage_path")
                        .value_name("PATH")
                        .long("file-storage-path")
                        .short('f')
                        .env("FILE_STORAGE_PATH")
                        .help("Snapshot file. An empty path keeps metrics in memory only."),
                )
                .arg(
                    Arg::new("restore")
                        .value_name("BOOL")
                        .long("restore")
                        .short('r')
                        .env("RESTORE")
                        .help("Load the snapshot file on startup."),
                )
                .arg(
                    Arg::new("database_dsn")
                        .value_name("DSN")
                        .long("database-dsn")
                        .short('d')
                        .env("DATABASE_DSN")
                        .hide_env_values(true)
                        .help("Database URL. Takes precedence over the snapshot file."),
                )
                .arg(key_arg())
                .arg(crypto_key_arg(
                    "PEM file with the private key used to decrypt payloads.",
                ))
                .arg(
                    Arg::new("trusted_subnet")
                        .value_name("CIDR")
                        .long("trusted-subnet")
                        .short('t')
                        .env("TRUSTED_SUBNET")
                        .help("Only accept requests whose X-Real-IP lies in this subnet."),
                ),
        )
}

fn config_command() -> Command {
    Command::new("config")
        .subcommand_required(true)
        .about("Manage the meter config")
        .after_help(
            "This command provides basic config management.  It can be used primarily to \
             initialize a new config folder and to inspect the effective configuration.",
        )
        .subcommand(
            Command::new("init")
                .about("Initialize a new meter config")
                .after_help(
                    "This writes the default configuration to config.yml in the config \
                     folder.  An existing config is left untouched.",
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Show the entire config out for debugging purposes")
                .after_help(
                    "This dumps out the entire config including the values which are not \
                     in the config file but filled in from defaults.  The default output \
                     format is YAML but the debug format can also be specified.",
                )
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .default_value("yaml")
                        .value_parser(PossibleValuesParser::new(["debug", "yaml"]))
                        .help("The output format"),
                ),
        )
}

pub fn make_app() -> Command {
    Command::new("meter")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .action(ArgAction::Set)
                .help("The path to the config folder."),
        )
        .subcommand(agent_command())
        .subcommand(collector_command())
        .subcommand(config_command())
}
