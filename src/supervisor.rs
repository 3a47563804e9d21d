//! The background task running eager provisioning passes
//!
//! A [`SyncSupervisor`] owns at most one loop task. Every cycle the task
//! reloads the configuration, runs an eager pass if `sync_mode` is `eager`,
//! and sleeps for `sleep_interval` minutes. Shutdown requests wake the task
//! from its sleep and are also checked between directory entries, so a pass
//! over a large directory stops promptly.
use std::{
	fmt, mem,
	sync::{Arc, Mutex, PoisonError},
	time::Duration,
};

use ldap3::SearchEntry;
use time::OffsetDateTime;
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
	cache::DomainCache,
	config::AttributeConfig,
	directory::{Directory, DirectorySession},
	entry::{domain_part, SearchEntryExt},
	error::Error,
	materialize::AccountMaterializer,
	settings::{initial_delay, ConfigSource, ReloadError, SyncSettings},
	store::{AccountBy, IdentityStore},
};

/// How an eager pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassEnd {
	/// Every entry was looked at
	Completed,
	/// The batch size was reached; remaining entries wait for the next pass
	BatchLimit,
	/// Shutdown was requested part way
	Shutdown,
	/// Enumerating the directory failed part way
	Failed,
}

/// Summary of one eager pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
	/// When the pass started
	pub started_at: OffsetDateTime,
	/// When the pass ended
	pub finished_at: OffsetDateTime,
	/// Directory entries looked at
	pub scanned: usize,
	/// Identities created
	pub created: usize,
	/// How the pass ended
	pub end: PassEnd,
}

/// Lifecycle of the loop task
enum State {
	/// No task has been started, or it was shut down
	Stopped,
	/// A task was started
	Running(Running),
}

/// Handles to a started loop task
struct Running {
	/// Cancelled to request shutdown
	shutdown: CancellationToken,
	/// The task itself
	handle: JoinHandle<()>,
}

/// Supervises the background synchronization task. See the
/// [module documentation](self).
pub struct SyncSupervisor {
	/// State shared with the loop task
	shared: Arc<Shared>,
	/// Guards start and stop
	state: Mutex<State>,
}

/// Everything the loop task works with
struct Shared {
	/// The local identity store, without lazy provisioning
	store: Arc<dyn IdentityStore>,
	/// The directory to enumerate
	directory: Arc<dyn Directory>,
	/// Process configuration, reloaded every cycle
	config: Arc<dyn ConfigSource>,
	/// Creates the identities
	materializer: AccountMaterializer,
	/// Outcome of the most recent eager pass
	last_report: Mutex<Option<PassReport>>,
}

impl fmt::Debug for SyncSupervisor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SyncSupervisor")
			.field("running", &self.is_running())
			.finish_non_exhaustive()
	}
}

impl SyncSupervisor {
	/// Create a stopped supervisor.
	#[must_use]
	pub fn new(
		store: Arc<dyn IdentityStore>,
		directory: Arc<dyn Directory>,
		config: Arc<dyn ConfigSource>,
		attributes: AttributeConfig,
	) -> Self {
		let materializer = AccountMaterializer::new(Arc::clone(&store), attributes);
		Self {
			shared: Arc::new(Shared {
				store,
				directory,
				config,
				materializer,
				last_report: Mutex::new(None),
			}),
			state: Mutex::new(State::Stopped),
		}
	}

	/// Start the loop task on the current Tokio runtime. Does nothing if it
	/// is already running.
	pub fn startup(&self) {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		if let State::Running(running) = &*state {
			if !running.handle.is_finished() {
				info!("Cannot start a second directory sync while another one is running");
				return;
			}
		}
		let Ok(runtime) = Handle::try_current() else {
			error!("Cannot start the directory sync outside of a Tokio runtime");
			return;
		};

		let delay = initial_delay(self.shared.config.as_ref());
		let shutdown = CancellationToken::new();
		info!(initial_delay_secs = delay.as_secs(), "Starting directory sync");
		let handle = runtime.spawn(Arc::clone(&self.shared).run(delay, shutdown.clone()));
		*state = State::Running(Running { shutdown, handle });
	}

	/// Whether the loop task is running. A task that stopped by itself,
	/// after a fatal error or a non-positive sleep interval, is not.
	#[must_use]
	pub fn is_running(&self) -> bool {
		match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
			State::Running(running) => !running.handle.is_finished(),
			State::Stopped => false,
		}
	}

	/// Ask the loop task to stop, waking it if it sleeps. Does nothing if it
	/// is not running.
	pub fn shutdown(&self) {
		match self.take_running() {
			Some(running) => running.shutdown.cancel(),
			None => info!("shutdown() called, but the directory sync is not running"),
		}
	}

	/// Like [`shutdown`](Self::shutdown), then wait for the task to exit.
	pub async fn shutdown_and_join(&self) {
		let Some(running) = self.take_running() else {
			info!("shutdown() called, but the directory sync is not running");
			return;
		};
		running.shutdown.cancel();
		if let Err(err) = running.handle.await {
			warn!("Failed to join directory sync task: {err}");
		}
	}

	/// Outcome of the most recent eager pass
	#[must_use]
	pub fn last_report(&self) -> Option<PassReport> {
		self.shared.last_report.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Move the running task out of the state, leaving it stopped
	fn take_running(&self) -> Option<Running> {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		match mem::replace(&mut *state, State::Stopped) {
			State::Running(running) => Some(running),
			State::Stopped => None,
		}
	}
}

impl Drop for SyncSupervisor {
	fn drop(&mut self) {
		if let Some(running) = self.take_running() {
			running.shutdown.cancel();
		}
	}
}

impl Shared {
	/// The loop task
	async fn run(self: Arc<Self>, initial_delay: Duration, shutdown: CancellationToken) {
		info!(secs = initial_delay.as_secs(), "Sleeping before doing work");
		if !sleep(initial_delay, &shutdown).await {
			info!("Shutting down directory sync");
			return;
		}

		let mut settings = SyncSettings::default();
		loop {
			if shutdown.is_cancelled() {
				info!("Shutting down directory sync");
				return;
			}

			match self.config.reload().await {
				Ok(()) => {}
				Err(err @ ReloadError::Fatal(_)) => {
					error!("Unable to reload configuration, stopping directory sync: {err}");
					return;
				}
				Err(err) => warn!("Unable to reload configuration: {err}"),
			}
			settings.refresh(self.config.as_ref(), self.store.as_ref()).await;

			if let (true, Some(batch_size)) = (settings.eager_enabled(), settings.batch_size) {
				if let Err(err) =
					self.run_cycle(&settings.domain_name, batch_size, &shutdown).await
				{
					error!("Stopping directory sync: {err}");
					return;
				}
			}

			let Some(interval) = settings.sleep_duration() else {
				info!(sleep_interval = settings.sleep_interval, "No sleep interval, stopping");
				return;
			};
			info!(minutes = settings.sleep_interval, "Sleeping");
			if !sleep(interval, &shutdown).await {
				info!("Interrupted, shutting down directory sync");
				return;
			}
		}
	}

	/// Connect to the directory for the default domain and run one eager
	/// pass. Errors mean the cycle could not start.
	async fn run_cycle(
		&self,
		domain_name: &str,
		batch_size: usize,
		shutdown: &CancellationToken,
	) -> Result<(), Error> {
		let domain = self
			.store
			.domain_by_name(domain_name)
			.await?
			.ok_or_else(|| Error::Store(format!("default domain <{domain_name}> not found")))?;
		let mut session = self.directory.open(&domain.name).await?;

		let report = self.eager_pass(session.as_mut(), domain_name, batch_size, shutdown).await;
		*self.last_report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
		Ok(())
	}

	/// Create missing identities for directory entries, at most `batch_size`
	/// of them.
	async fn eager_pass(
		&self,
		session: &mut dyn DirectorySession,
		default_domain: &str,
		batch_size: usize,
		shutdown: &CancellationToken,
	) -> PassReport {
		info!(domain = default_domain, batch_size, "Starting eager provisioning");
		let started_at = OffsetDateTime::now_utc();
		let mut scanned = 0;
		let mut created = 0;
		let mut domains = DomainCache::default();

		let end = match session.fetch_all().await {
			Err(err) => {
				warn!("Unable to fetch user list from the directory: {err}");
				PassEnd::Failed
			}
			Ok(mut entries) => loop {
				if shutdown.is_cancelled() {
					info!("Shutting down eager provisioning");
					break PassEnd::Shutdown;
				}
				let entry = match entries.next_entry().await {
					Ok(Some(entry)) => entry,
					Ok(None) => break PassEnd::Completed,
					Err(err) => {
						warn!("Directory enumeration failed: {err}");
						break PassEnd::Failed;
					}
				};
				// Shutdown may have been requested while the entry was in flight
				if shutdown.is_cancelled() {
					info!("Shutting down eager provisioning");
					break PassEnd::Shutdown;
				}
				scanned += 1;
				if self.provision_entry(&entry, default_domain, &mut domains).await {
					created += 1;
					if created >= batch_size {
						break PassEnd::BatchLimit;
					}
				}
			},
		};

		if scanned == 0 && end == PassEnd::Completed {
			info!("No users in the directory");
		}
		info!(scanned, created, domains = domains.len(), end = ?end, "Eager provisioning stopped");
		PassReport { started_at, finished_at: OffsetDateTime::now_utc(), scanned, created, end }
	}

	/// Create the identity for one entry if it is in a known domain and does
	/// not exist yet. Returns whether an identity was created.
	async fn provision_entry(
		&self,
		entry: &SearchEntry,
		default_domain: &str,
		domains: &mut DomainCache,
	) -> bool {
		let attributes = self.materializer.attributes();
		let Some(principal) = entry.attr_first(&attributes.principal_name) else {
			debug!(dn = %entry.dn, "Skipping entry without principal name");
			return false;
		};
		let Some(domain) = domain_part(principal) else {
			debug!(dn = %entry.dn, principal, "Skipping entry with malformed principal name");
			return false;
		};
		match domains.confirm(self.store.as_ref(), domain).await {
			Ok(true) => {}
			Ok(false) => {
				debug!(principal, "Skipping entry in a domain unknown to the store");
				return false;
			}
			Err(err) => {
				warn!(domain, "Domain lookup failed: {err}");
				return false;
			}
		}

		let Some(account_name) = entry.attr_first(&attributes.account_name) else {
			debug!(dn = %entry.dn, "Skipping entry without account name");
			return false;
		};
		match self.store.account(&AccountBy::Name(account_name.to_owned())).await {
			Ok(Some(_)) => false,
			Ok(None) => self.materializer.materialize(entry, default_domain).await.is_some(),
			Err(err) => {
				warn!(account = account_name, "Account lookup failed: {err}");
				false
			}
		}
	}
}

/// Sleep for `duration`, returning `false` if woken by a shutdown request
async fn sleep(duration: Duration, shutdown: &CancellationToken) -> bool {
	tokio::select! {
		biased;
		() = shutdown.cancelled() => false,
		() = tokio::time::sleep(duration) => true,
	}
}
