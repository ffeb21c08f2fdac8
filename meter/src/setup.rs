use anyhow::Result;
use meter_config::Config;
use meter_statsd::MetricsConfig;

/// Initializes logging from the `logging` section.
pub fn init_logging(config: &Config) {
    meter_log::init(config.logging());
}

fn dump_config_path(config: &Config, role: &str) {
    if config.path().as_os_str().is_empty() {
        meter_log::info!("launching {role} without config folder");
    } else {
        meter_log::info!(
            "launching {role} from config folder {}",
            config.path().display()
        );
    }
    meter_log::info!("  log level: {}", config.logging().level);
}

/// Print spawn infos of the agent to the log.
pub fn dump_agent_infos(config: &Config) {
    dump_config_path(config, "agent");
    meter_log::info!("  collector: {}", config.upstream_address());
    meter_log::info!(
        "  poll interval: {}s, report interval: {}s",
        config.poll_interval().as_secs(),
        config.report_interval().as_secs()
    );
    meter_log::info!("  concurrent uploads: {}", config.delivery_concurrency());
    meter_log::info!("  signed: {}", config.agent_key().is_some());
    match config.agent_crypto_key() {
        Some(path) => meter_log::info!("  encryption key: {}", path.display()),
        None => meter_log::info!("  encryption key: -"),
    }
}

/// Print spawn infos of the collector to the log.
pub fn dump_collector_infos(config: &Config) {
    dump_config_path(config, "collector");
    meter_log::info!("  listen address: {}", config.listen_addr());
    if config.database_dsn().is_some() {
        meter_log::info!("  storage: database");
    } else if config.file_storage_path().as_os_str().is_empty() {
        meter_log::info!("  storage: memory");
    } else {
        meter_log::info!(
            "  storage: {} (every {}s, restore: {})",
            config.file_storage_path().display(),
            config.store_interval().as_secs(),
            config.restore()
        );
    }
    match config.trusted_subnet() {
        Some(subnet) => meter_log::info!("  trusted subnet: {subnet}"),
        None => meter_log::info!("  trusted subnet: -"),
    }
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let metrics = config.metrics();
    let Some(host) = metrics.statsd.as_deref() else {
        return Ok(());
    };

    let mut default_tags = metrics.default_tags.clone();
    if let Some(hostname_tag) = metrics.hostname_tag.as_deref()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }
    meter_statsd::init(MetricsConfig {
        prefix: metrics.prefix.clone(),
        host: host.to_owned(),
        buffer_size: metrics.buffer_size,
        default_tags,
    })?;

    Ok(())
}
