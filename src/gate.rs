//! Lazy provisioning: creating identities when a lookup misses
use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
	config::AttributeConfig,
	directory::Directory,
	error::Error,
	materialize::AccountMaterializer,
	settings::{default_domain_name, keys, ConfigSource, SyncMode},
	store::{Account, AccountBy, Domain, IdentityStore, NewAccount},
};

/// Wraps an [`IdentityStore`] so that lookups by name which miss are
/// retried against the directory while `sync_mode` is `lazy`.
///
/// Provisioning failures are logged and reported as a miss; only errors of
/// the wrapped store itself are returned.
pub struct LazyProvisioning {
	/// The wrapped store
	store: Arc<dyn IdentityStore>,
	/// Where missing users are looked up
	directory: Arc<dyn Directory>,
	/// Process configuration, read on every miss
	config: Arc<dyn ConfigSource>,
	/// Creates the identities
	materializer: AccountMaterializer,
}

impl fmt::Debug for LazyProvisioning {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LazyProvisioning")
			.field("materializer", &self.materializer)
			.finish_non_exhaustive()
	}
}

impl LazyProvisioning {
	/// Wrap `store`.
	#[must_use]
	pub fn new(
		store: Arc<dyn IdentityStore>,
		directory: Arc<dyn Directory>,
		config: Arc<dyn ConfigSource>,
		attributes: AttributeConfig,
	) -> Self {
		let materializer = AccountMaterializer::new(Arc::clone(&store), attributes);
		Self { store, directory, config, materializer }
	}

	/// Whether lazy provisioning is currently switched on
	#[must_use]
	pub fn enabled(&self) -> bool {
		SyncMode::from_setting(self.config.get(keys::SYNC_MODE).as_deref()) == SyncMode::Lazy
	}

	/// Look up an account, provisioning it from the directory if the lookup
	/// is by name, misses, and lazy mode is on.
	pub async fn get_account(&self, key: &AccountBy) -> Result<Option<Account>, Error> {
		let account = self.store.account(key).await?;
		match (account, key) {
			(Some(account), _) => Ok(Some(account)),
			(None, AccountBy::Name(name)) if self.enabled() => Ok(self.provision(name).await),
			(None, _) => Ok(None),
		}
	}

	/// Create the account called `name` from its directory entry.
	pub async fn provision(&self, name: &str) -> Option<Account> {
		let Some(domain_name) = default_domain_name(self.config.as_ref(), self.store.as_ref()).await
		else {
			warn!(name, "No default domain configured, not provisioning");
			return None;
		};
		let domain = match self.store.domain_by_name(&domain_name).await {
			Ok(Some(domain)) => domain,
			Ok(None) => {
				warn!(domain = %domain_name, "Default domain not found");
				return None;
			}
			Err(err) => {
				warn!(domain = %domain_name, "Default domain lookup failed: {err}");
				return None;
			}
		};

		let mut session = match self.directory.open(&domain.name).await {
			Ok(session) => session,
			Err(err) => {
				warn!(domain = %domain.name, "Unable to connect to the directory: {err}");
				return None;
			}
		};

		info!(name, "Autoprovisioning user");
		match session.fetch_one(name).await {
			Ok(Some(entry)) => {
				let account = self.materializer.materialize(&entry, &domain_name).await;
				if let Some(account) = &account {
					info!(name, id = %account.id, account = %account.name, "Autoprovisioned user");
				}
				account
			}
			Ok(None) => {
				debug!(name, "User not found in the directory");
				None
			}
			Err(err) => {
				warn!(name, "Unable to search the directory: {err}");
				None
			}
		}
	}
}

#[async_trait]
impl IdentityStore for LazyProvisioning {
	async fn domain_by_name(&self, name: &str) -> Result<Option<Domain>, Error> {
		self.store.domain_by_name(name).await
	}

	async fn account(&self, key: &AccountBy) -> Result<Option<Account>, Error> {
		self.get_account(key).await
	}

	async fn create_account(&self, account: NewAccount) -> Result<Account, Error> {
		self.store.create_account(account).await
	}

	async fn add_alias(&self, account: &Account, alias: &str) -> Result<(), Error> {
		self.store.add_alias(account, alias).await
	}

	async fn default_domain_name(&self) -> Result<Option<String>, Error> {
		self.store.default_domain_name().await
	}
}
