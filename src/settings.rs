//! Synchronization settings, re-read from the process configuration every
//! supervisor cycle.
use std::{
	collections::HashMap,
	path::PathBuf,
	sync::{PoisonError, RwLock},
	time::Duration,
};

use async_trait::async_trait;
use tracing::warn;

use crate::store::IdentityStore;

/// Configuration keys read by the provisioner
pub mod keys {
	/// `lazy`, `eager`, anything else disables provisioning
	pub const SYNC_MODE: &str = "sync_mode";
	/// Maximum identities created per eager pass
	pub const BATCH_SIZE: &str = "batch_size";
	/// Minutes between eager passes
	pub const SLEEP_INTERVAL: &str = "sleep_interval";
	/// Minutes to wait before the first cycle
	pub const INITIAL_SLEEP: &str = "initial_sleep";
	/// The domain new identities are created in
	pub const DOMAIN_NAME: &str = "domain_name";
}

/// Minutes slept between cycles unless configured otherwise
pub const DEFAULT_SLEEP_INTERVAL: i64 = 30;
/// Minutes slept before the first cycle unless configured otherwise
pub const DEFAULT_INITIAL_SLEEP: i64 = 2;

/// How identities are provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
	/// Create identities when a lookup misses
	Lazy,
	/// Create identities in periodic passes over the whole directory
	Eager,
	/// Create nothing
	Disabled,
}

impl SyncMode {
	/// Interpret a `sync_mode` value. Unknown and missing values disable
	/// provisioning.
	#[must_use]
	pub fn from_setting(value: Option<&str>) -> Self {
		match value.map(str::trim) {
			Some("lazy") => Self::Lazy,
			Some("eager") => Self::Eager,
			_ => Self::Disabled,
		}
	}
}

/// Errors that can occur when reloading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
	/// The configuration cannot be loaded at all. Stops the supervisor.
	#[error("Configuration unavailable: {0}")]
	Fatal(String),
	/// The configuration could not be parsed this time. Previous values stay
	/// in effect.
	#[error("Configuration not reloaded: {0}")]
	Recoverable(String),
}

/// A process-wide key/value configuration.
#[async_trait]
pub trait ConfigSource: Send + Sync {
	/// Re-read the configuration from its backing store.
	async fn reload(&self) -> Result<(), ReloadError>;

	/// The current value of a key.
	fn get(&self, key: &str) -> Option<String>;
}

/// A [`ConfigSource`] held in memory, set by the host.
#[derive(Debug, Default)]
pub struct MemoryConfig {
	/// Current values
	values: RwLock<HashMap<String, String>>,
}

impl MemoryConfig {
	/// Create a configuration from key/value pairs.
	#[must_use]
	pub fn new<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
		let values = values.into_iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
		Self { values: RwLock::new(values) }
	}

	/// Set a key.
	pub fn set(&self, key: &str, value: &str) {
		self.values
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(key.to_owned(), value.to_owned());
	}

	/// Remove a key.
	pub fn remove(&self, key: &str) {
		self.values.write().unwrap_or_else(PoisonError::into_inner).remove(key);
	}
}

#[async_trait]
impl ConfigSource for MemoryConfig {
	async fn reload(&self) -> Result<(), ReloadError> {
		Ok(())
	}

	fn get(&self, key: &str) -> Option<String> {
		self.values.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
	}
}

/// A [`ConfigSource`] backed by a flat JSON object on disk, e.g.
/// `{"sync_mode": "eager", "batch_size": 10}`.
///
/// A file that cannot be read is a fatal reload error; a file that cannot be
/// parsed leaves the previous values in place.
#[derive(Debug)]
pub struct JsonFileConfig {
	/// Location of the file
	path: PathBuf,
	/// Values from the last successful load
	values: RwLock<HashMap<String, String>>,
}

impl JsonFileConfig {
	/// Load the configuration file for the first time.
	pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ReloadError> {
		let config = Self { path: path.into(), values: RwLock::new(HashMap::new()) };
		config.reload().await?;
		Ok(config)
	}
}

#[async_trait]
impl ConfigSource for JsonFileConfig {
	async fn reload(&self) -> Result<(), ReloadError> {
		let contents = tokio::fs::read_to_string(&self.path)
			.await
			.map_err(|err| ReloadError::Fatal(format!("{}: {err}", self.path.display())))?;
		let parsed: HashMap<String, serde_json::Value> = serde_json::from_str(&contents)
			.map_err(|err| ReloadError::Recoverable(format!("{}: {err}", self.path.display())))?;

		let values = parsed
			.into_iter()
			.filter_map(|(key, value)| match value {
				serde_json::Value::String(s) => Some((key, s)),
				serde_json::Value::Number(n) => Some((key, n.to_string())),
				serde_json::Value::Bool(b) => Some((key, b.to_string())),
				_ => None,
			})
			.collect();
		*self.values.write().unwrap_or_else(PoisonError::into_inner) = values;
		Ok(())
	}

	fn get(&self, key: &str) -> Option<String> {
		self.values.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
	}
}

/// The settings one supervisor cycle runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
	/// Provisioning mode
	pub mode: SyncMode,
	/// Identities to create per eager pass; `None` if not a positive number
	pub batch_size: Option<usize>,
	/// Minutes to sleep after the cycle; non-positive stops the supervisor
	pub sleep_interval: i64,
	/// Domain new identities are created in
	pub domain_name: String,
}

impl Default for SyncSettings {
	fn default() -> Self {
		Self {
			mode: SyncMode::Disabled,
			batch_size: None,
			sleep_interval: DEFAULT_SLEEP_INTERVAL,
			domain_name: String::new(),
		}
	}
}

impl SyncSettings {
	/// Re-read the settings. Values that fail to parse keep their previous
	/// value, except the batch size which disables the eager pass instead.
	pub async fn refresh(&mut self, source: &dyn ConfigSource, store: &dyn IdentityStore) {
		self.mode = SyncMode::from_setting(source.get(keys::SYNC_MODE).as_deref());
		self.batch_size = source
			.get(keys::BATCH_SIZE)
			.and_then(|value| value.trim().parse::<i64>().ok())
			.and_then(|value| usize::try_from(value).ok())
			.filter(|value| *value > 0);

		match source.get(keys::SLEEP_INTERVAL).map(|value| value.trim().parse::<i64>()) {
			Some(Ok(interval)) => self.sleep_interval = interval,
			Some(Err(err)) => warn!(
				"Ignoring malformed {}: {err}, keeping {} minutes",
				keys::SLEEP_INTERVAL,
				self.sleep_interval
			),
			None => {}
		}

		match default_domain_name(source, store).await {
			Some(domain) => self.domain_name = domain,
			None => warn!(
				"Can't determine the default domain name, keeping <{}>",
				self.domain_name
			),
		}
	}

	/// Whether this cycle should run an eager pass
	#[must_use]
	pub fn eager_enabled(&self) -> bool {
		self.mode == SyncMode::Eager && self.batch_size.is_some()
	}

	/// How long to sleep after this cycle, or `None` if the supervisor should
	/// stop instead
	#[must_use]
	pub fn sleep_duration(&self) -> Option<Duration> {
		minutes(self.sleep_interval)
	}
}

/// The domain new identities belong to: the configured `domain_name`, else
/// the store's own default domain.
pub async fn default_domain_name(
	source: &dyn ConfigSource,
	store: &dyn IdentityStore,
) -> Option<String> {
	if let Some(domain) =
		source.get(keys::DOMAIN_NAME).map(|d| d.trim().to_owned()).filter(|d| !d.is_empty())
	{
		return Some(domain);
	}
	match store.default_domain_name().await {
		Ok(domain) => domain.filter(|d| !d.is_empty()),
		Err(err) => {
			warn!("Can't read the store's default domain name: {err}");
			None
		}
	}
}

/// The delay before the first supervisor cycle
#[must_use]
pub fn initial_delay(source: &dyn ConfigSource) -> Duration {
	let configured = source
		.get(keys::INITIAL_SLEEP)
		.and_then(|value| value.trim().parse::<i64>().ok())
		.unwrap_or(DEFAULT_INITIAL_SLEEP);
	minutes(configured).unwrap_or(Duration::ZERO)
}

/// Convert a number of minutes into a duration, `None` unless positive
fn minutes(minutes: i64) -> Option<Duration> {
	let minutes = u64::try_from(minutes).ok().filter(|m| *m > 0)?;
	Some(Duration::from_secs(minutes.saturating_mul(60)))
}
