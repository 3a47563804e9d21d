//! Entry points for the host application
use std::sync::Arc;

use crate::{
	config::AttributeConfig, directory::Directory, gate::LazyProvisioning,
	settings::ConfigSource, store::IdentityStore, supervisor::SyncSupervisor,
};

/// Wires provisioning into a host: [`init`](Self::init) at startup,
/// [`destroy`](Self::destroy) at shutdown.
#[derive(Debug)]
pub struct ProvisionExtension {
	/// Lookup path with lazy provisioning
	gate: Arc<LazyProvisioning>,
	/// The eager provisioning task
	supervisor: SyncSupervisor,
}

impl ProvisionExtension {
	/// Name the extension registers under
	pub const NAME: &'static str = "directory-provision";

	/// Create the extension. Nothing runs until [`init`](Self::init).
	#[must_use]
	pub fn new(
		store: Arc<dyn IdentityStore>,
		directory: Arc<dyn Directory>,
		config: Arc<dyn ConfigSource>,
		attributes: AttributeConfig,
	) -> Self {
		let gate = Arc::new(LazyProvisioning::new(
			Arc::clone(&store),
			Arc::clone(&directory),
			Arc::clone(&config),
			attributes.clone(),
		));
		let supervisor = SyncSupervisor::new(store, directory, config, attributes);
		Self { gate, supervisor }
	}

	/// The name the extension registers under
	#[must_use]
	pub const fn name() -> &'static str {
		Self::NAME
	}

	/// Start the sync supervisor unless it is running, and return the store
	/// the host should route account lookups through.
	pub fn init(&self) -> Arc<LazyProvisioning> {
		if !self.supervisor.is_running() {
			self.supervisor.startup();
		}
		Arc::clone(&self.gate)
	}

	/// Stop the sync supervisor if it is running.
	pub async fn destroy(&self) {
		if self.supervisor.is_running() {
			self.supervisor.shutdown_and_join().await;
		}
	}

	/// The sync supervisor
	#[must_use]
	pub fn supervisor(&self) -> &SyncSupervisor {
		&self.supervisor
	}
}
