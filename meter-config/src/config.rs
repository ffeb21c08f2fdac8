use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Runtime statistics the agent reports unless configured otherwise.
pub const DEFAULT_METRIC_NAMES: &[&str] = &[
    "Alloc",
    "BuckHashSys",
    "Frees",
    "GCCPUFraction",
    "GCSys",
    "HeapAlloc",
    "HeapIdle",
    "HeapInuse",
    "HeapObjects",
    "HeapReleased",
    "HeapSys",
    "LastGC",
    "Lookups",
    "MCacheInuse",
    "MCacheSys",
    "MSpanInuse",
    "MSpanSys",
    "Mallocs",
    "NextGC",
    "NumForcedGC",
    "NumGC",
    "OtherSys",
    "PauseTotalNs",
    "StackInuse",
    "StackSys",
    "Sys",
    "TotalAlloc",
    "TotalMemory",
    "FreeMemory",
    "CPUutilization1",
    "RandomValue",
    "PollCount",
];

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: Some(Box::new(inner)),
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => self.kind.fmt(f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    CouldNotOpenFile,
    /// Failed to save a file.
    CouldNotWriteFile,
    /// Parsing YAML failed.
    BadYaml,
    /// Invalid config value.
    InvalidValue,
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CouldNotOpenFile => write!(f, "could not open config file"),
            Self::CouldNotWriteFile => write!(f, "could not write config file"),
            Self::BadYaml => write!(f, "could not parse yaml config file"),
            Self::InvalidValue => write!(f, "invalid config value"),
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.yml", Self::name()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut options = fs::OpenOptions::new();
        options.write(true).truncate(true).create(true);

        // Keys may be stored in the file, so only the owner can read it.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut f = options
            .open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;

        serde_yaml::to_writer(&mut f, self)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables.
///
/// `address`, `key` and `crypto_key` are shared by the agent and the collector: the agent reports to
/// the address the collector listens on, and both ends of a deployment use the same secret.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// Address of the collector, `host:port`.
    pub address: Option<String>,
    /// Seconds between two deliveries of the agent.
    pub report_interval: Option<String>,
    /// Seconds between two samples of the agent.
    pub poll_interval: Option<String>,
    /// Number of concurrent delivery workers.
    pub rate_limit: Option<String>,
    /// Shared secret for payload digests.
    pub key: Option<String>,
    /// Path to a PEM key. Public for the agent, private for the collector.
    pub crypto_key: Option<String>,
    /// Seconds between two snapshots of the collector.
    pub store_interval: Option<String>,
    /// Location of the collector's snapshot file.
    pub file_storage_path: Option<String>,
    /// "true" if the collector restores its snapshot on startup.
    pub restore: Option<String>,
    /// Database URL of the relational backend.
    pub database_dsn: Option<String>,
    /// CIDR of agents allowed to report.
    pub trusted_subnet: Option<String>,
}

fn default_address() -> String {
    "localhost:8080".to_owned()
}

/// Agent configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Agent {
    /// Address of the collector.
    pub address: String,
    /// Seconds between two deliveries.
    pub report_interval: u64,
    /// Seconds between two samples.
    pub poll_interval: u64,
    /// Number of concurrent delivery workers.
    pub rate_limit: usize,
    /// Number of samples per batch request.
    pub batch_size: usize,
    /// Shared secret for the `HashSHA256` header.
    pub key: Option<String>,
    /// Path to the collector's PEM public key.
    pub crypto_key: Option<PathBuf>,
    /// Seconds until an outbound request times out.
    pub request_timeout: u64,
    /// Names of the metrics to deliver.
    pub metric_names: Vec<String>,
}

impl Default for Agent {
    fn default() -> Self {
        Self {
            address: default_address(),
            report_interval: 10,
            poll_interval: 2,
            rate_limit: 1,
            batch_size: 8,
            key: None,
            crypto_key: None,
            request_timeout: 6,
            metric_names: DEFAULT_METRIC_NAMES.iter().map(|&s| s.to_owned()).collect(),
        }
    }
}

/// Collector configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Collector {
    /// Address to listen on.
    pub address: String,
    /// Seconds between two snapshots. `0` writes a snapshot after every update.
    pub store_interval: u64,
    /// Location of the snapshot file.
    pub file_storage_path: PathBuf,
    /// Loads the snapshot on startup.
    pub restore: bool,
    /// Shared secret for the `HashSHA256` header.
    pub key: Option<String>,
    /// Database URL. Replaces the snapshot file when set.
    pub database_dsn: Option<String>,
    /// Path to the PEM private key for encrypted payloads.
    pub crypto_key: Option<PathBuf>,
    /// CIDR of agents allowed to report.
    pub trusted_subnet: Option<String>,
    /// Seconds to wait for pending requests on shutdown.
    pub shutdown_timeout: u64,
    /// Maximum size of a request body in bytes, both as sent and after decompression.
    pub max_body_size: usize,
}

impl Default for Collector {
    fn default() -> Self {
        Self {
            address: default_address(),
            store_interval: 300,
            file_storage_path: PathBuf::from("/tmp/metrics-db.json"),
            restore: true,
            key: None,
            database_dsn: None,
            crypto_key: None,
            trusted_subnet: None,
            shutdown_timeout: 10,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Internal metrics configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// Host and port of the StatsD server. Metrics are disabled if not set.
    pub statsd: Option<String>,
    /// Prefix which is prepended to all metric names.
    pub prefix: String,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Name of the tag carrying the hostname, if any.
    pub hostname_tag: Option<String>,
    /// Size of the UDP send buffer.
    pub buffer_size: Option<usize>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "meter".to_owned(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
            buffer_size: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    logging: meter_log::LogConfig,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    agent: Agent,
    #[serde(default)]
    collector: Collector,
}

impl ConfigObject for ConfigValues {
    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

fn parse_bool(value: &str, field: &'static str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(ConfigError::new(ConfigErrorKind::InvalidValue).field(field)),
    }
}

fn parse_subnet(value: &str, field: &'static str) -> Result<IpNetwork, ConfigError> {
    value
        .parse::<IpNetwork>()
        .map_err(|err| ConfigError::for_field(err, field))
}

/// An empty string disables an optional setting.
fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// A missing `config.yml` yields the default configuration.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let values = if ConfigValues::path(&path).exists() {
            ConfigValues::load(&path)?
        } else {
            meter_log::debug!("no config file in {}, using defaults", path.display());
            ConfigValues::default()
        };

        let config = Config {
            values,
            path: path.clone(),
        };
        config.validate().map_err(|e| e.file(ConfigValues::path(&path)))?;

        Ok(config)
    }

    /// Parses a config from a YAML string.
    ///
    /// This is mostly useful for tests.
    pub fn from_yaml_str(yaml: &str) -> Result<Config, ConfigError> {
        let config = Config {
            values: serde_yaml::from_str(yaml)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadYaml))?,
            path: PathBuf::new(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref subnet) = self.values.collector.trusted_subnet {
            parse_subnet(subnet, "trusted_subnet")?;
        }
        Ok(())
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let agent = &mut self.values.agent;
        let collector = &mut self.values.collector;

        if let Some(address) = overrides.address {
            agent.address = address.clone();
            collector.address = address;
        }

        if let Some(report_interval) = overrides.report_interval {
            agent.report_interval = report_interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "report_interval"))?;
        }

        if let Some(poll_interval) = overrides.poll_interval {
            agent.poll_interval = poll_interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "poll_interval"))?;
        }

        if let Some(rate_limit) = overrides.rate_limit {
            agent.rate_limit = rate_limit
                .parse()
                .map_err(|err| ConfigError::for_field(err, "rate_limit"))?;
        }

        if let Some(key) = overrides.key {
            agent.key = non_empty(key);
            collector.key = agent.key.clone();
        }

        if let Some(crypto_key) = overrides.crypto_key {
            agent.crypto_key = non_empty(crypto_key).map(PathBuf::from);
            collector.crypto_key = agent.crypto_key.clone();
        }

        if let Some(store_interval) = overrides.store_interval {
            collector.store_interval = store_interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "store_interval"))?;
        }

        if let Some(path) = overrides.file_storage_path {
            collector.file_storage_path = PathBuf::from(path);
        }

        if let Some(restore) = overrides.restore {
            collector.restore = parse_bool(&restore, "restore")?;
        }

        if let Some(dsn) = overrides.database_dsn {
            collector.database_dsn = non_empty(dsn);
        }

        if let Some(subnet) = overrides.trusted_subnet {
            collector.trusted_subnet = match non_empty(subnet) {
                Some(subnet) => {
                    parse_subnet(&subnet, "trusted_subnet")?;
                    Some(subnet)
                }
                None => None,
            };
        }

        Ok(self)
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Writes the current values as `config.yml` into the given folder.
    pub fn save_in_folder<P: AsRef<Path>>(&self, p: P) -> Result<(), ConfigError> {
        let path = p.as_ref();
        if fs::metadata(path).is_err() {
            fs::create_dir_all(path)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        }
        self.values.save(path)
    }

    /// Returns the path of the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &meter_log::LogConfig {
        &self.values.logging
    }

    /// Returns the internal metrics configuration.
    pub fn metrics(&self) -> &Metrics {
        &self.values.metrics
    }

    /// Returns the address of the collector the agent reports to.
    pub fn upstream_address(&self) -> &str {
        &self.values.agent.address
    }

    /// Returns the interval between two deliveries of the agent.
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.values.agent.report_interval)
    }

    /// Returns the interval between two samples of the agent.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.values.agent.poll_interval)
    }

    /// Returns the number of concurrent delivery workers, at least one.
    pub fn delivery_concurrency(&self) -> usize {
        self.values.agent.rate_limit.max(1)
    }

    /// Returns the number of samples per batch request, at least one.
    pub fn batch_size(&self) -> usize {
        self.values.agent.batch_size.max(1)
    }

    /// Returns the secret the agent signs payloads with.
    pub fn agent_key(&self) -> Option<&str> {
        self.values.agent.key.as_deref()
    }

    /// Returns the path of the public key the agent encrypts batches with.
    pub fn agent_crypto_key(&self) -> Option<&Path> {
        self.values.agent.crypto_key.as_deref()
    }

    /// Returns the timeout of a single outbound request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.values.agent.request_timeout)
    }

    /// Returns the names of the metrics the agent delivers.
    pub fn metric_names(&self) -> &[String] {
        &self.values.agent.metric_names
    }

    /// Returns the address the collector listens on.
    pub fn listen_addr(&self) -> &str {
        &self.values.collector.address
    }

    /// Returns the interval between two snapshots.
    ///
    /// [`Duration::ZERO`] means every update is written through to the snapshot.
    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.values.collector.store_interval)
    }

    /// Returns the location of the snapshot file.
    pub fn file_storage_path(&self) -> &Path {
        &self.values.collector.file_storage_path
    }

    /// Returns `true` if the collector loads its snapshot on startup.
    pub fn restore(&self) -> bool {
        self.values.collector.restore
    }

    /// Returns the secret the collector verifies payloads with.
    pub fn collector_key(&self) -> Option<&str> {
        self.values.collector.key.as_deref()
    }

    /// Returns the database URL of the relational backend.
    pub fn database_dsn(&self) -> Option<&str> {
        self.values.collector.database_dsn.as_deref()
    }

    /// Returns the path of the private key the collector decrypts batches with.
    pub fn collector_crypto_key(&self) -> Option<&Path> {
        self.values.collector.crypto_key.as_deref()
    }

    /// Returns the network agents must report from, if restricted.
    pub fn trusted_subnet(&self) -> Option<IpNetwork> {
        // Validated on load and override.
        self.values
            .collector
            .trusted_subnet
            .as_deref()
            .and_then(|s| s.parse().ok())
    }

    /// The maximum time to wait for pending work after receiving a shutdown signal.
    ///
    /// The collector waits for pending requests, the agent for in-flight uploads.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.collector.shutdown_timeout)
    }

    /// Returns the maximum size of a request body accepted by the collector.
    pub fn max_body_size(&self) -> usize {
        self.values.collector.max_body_size
    }
}
