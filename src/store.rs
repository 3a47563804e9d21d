//! The local identity store, as seen by the provisioner
use std::{
	collections::BTreeMap,
	sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Error;

/// Account attribute names written when materializing an identity.
pub mod attr {
	/// Given (first) name
	pub const GIVEN_NAME: &str = "givenName";
	/// Surname
	pub const SURNAME: &str = "sn";
	/// Common name
	pub const COMMON_NAME: &str = "cn";
	/// Display name
	pub const DISPLAY_NAME: &str = "displayName";
	/// Whether the account receives mail
	pub const MAIL_STATUS: &str = "mailStatus";
}

/// Value of [`attr::MAIL_STATUS`] for accounts that receive mail.
pub const MAIL_STATUS_ENABLED: &str = "enabled";

/// A domain hosted by the identity store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
	/// Fully qualified domain name
	pub name: String,
}

/// An identity held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
	/// Store-assigned identifier
	pub id: String,
	/// Primary address, `local@domain`
	pub name: String,
	/// Account attributes
	pub attributes: BTreeMap<String, String>,
	/// Secondary addresses
	pub aliases: Vec<String>,
}

/// The key an account is looked up by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountBy {
	/// The account's name or one of its aliases. A bare local part is
	/// qualified with the store's default domain.
	Name(String),
	/// The store-assigned identifier
	Id(String),
}

/// The data needed to create an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
	/// Primary address, `local@domain`
	pub name: String,
	/// Initial credential
	pub credential: String,
	/// Initial attributes
	pub attributes: BTreeMap<String, String>,
}

/// Operations the provisioner needs from the identity store. The store owns
/// persistence and the full account API; only creation and lookups are used
/// here.
#[async_trait]
pub trait IdentityStore: Send + Sync {
	/// Look up a hosted domain by name.
	async fn domain_by_name(&self, name: &str) -> Result<Option<Domain>, Error>;

	/// Look up an account.
	async fn account(&self, key: &AccountBy) -> Result<Option<Account>, Error>;

	/// Create an account.
	async fn create_account(&self, account: NewAccount) -> Result<Account, Error>;

	/// Add a secondary address to an account.
	async fn add_alias(&self, account: &Account, alias: &str) -> Result<(), Error>;

	/// The store's own configured default domain, if any.
	async fn default_domain_name(&self) -> Result<Option<String>, Error>;
}

/// An [`IdentityStore`] held in memory.
#[derive(Debug)]
pub struct MemoryStore {
	/// Domain used to qualify bare names; empty if none
	default_domain: String,
	/// Hosted domain names, lowercased
	domains: RwLock<Vec<String>>,
	/// Accounts keyed by lowercased primary name
	accounts: RwLock<BTreeMap<String, Account>>,
	/// Number of domain lookups served
	domain_lookups: AtomicUsize,
}

impl MemoryStore {
	/// Create a store hosting a single default domain. An empty name creates
	/// a store without a default domain.
	#[must_use]
	pub fn new(default_domain: &str) -> Self {
		let default_domain = default_domain.to_ascii_lowercase();
		let domains =
			if default_domain.is_empty() { Vec::new() } else { vec![default_domain.clone()] };
		Self {
			default_domain,
			domains: RwLock::new(domains),
			accounts: RwLock::new(BTreeMap::new()),
			domain_lookups: AtomicUsize::new(0),
		}
	}

	/// Host an additional domain.
	pub async fn add_domain(&self, name: &str) {
		let name = name.to_ascii_lowercase();
		let mut domains = self.domains.write().await;
		if !domains.contains(&name) {
			domains.push(name);
		}
	}

	/// All accounts, ordered by name
	pub async fn accounts(&self) -> Vec<Account> {
		self.accounts.read().await.values().cloned().collect()
	}

	/// How many domain lookups the store has served
	#[must_use]
	pub fn domain_lookups(&self) -> usize {
		self.domain_lookups.load(Ordering::Relaxed)
	}

	/// Qualify a bare local part with the default domain.
	fn qualify(&self, name: &str) -> String {
		let name = name.to_ascii_lowercase();
		if name.contains('@') || self.default_domain.is_empty() {
			name
		} else {
			format!("{name}@{}", self.default_domain)
		}
	}
}

#[async_trait]
impl IdentityStore for MemoryStore {
	async fn domain_by_name(&self, name: &str) -> Result<Option<Domain>, Error> {
		self.domain_lookups.fetch_add(1, Ordering::Relaxed);
		let name = name.to_ascii_lowercase();
		let found = self.domains.read().await.contains(&name);
		Ok(found.then_some(Domain { name }))
	}

	async fn account(&self, key: &AccountBy) -> Result<Option<Account>, Error> {
		let accounts = self.accounts.read().await;
		let found = match key {
			AccountBy::Name(name) => {
				let name = self.qualify(name);
				accounts.get(&name).or_else(|| {
					accounts.values().find(|account| {
						account.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(&name))
					})
				})
			}
			AccountBy::Id(id) => accounts.values().find(|account| &account.id == id),
		};
		Ok(found.cloned())
	}

	async fn create_account(&self, account: NewAccount) -> Result<Account, Error> {
		let name = account.name.to_ascii_lowercase();
		let Some((_, domain)) = name.rsplit_once('@') else {
			return Err(Error::Store(format!("invalid account name {name}")));
		};
		if !self.domains.read().await.iter().any(|d| d == domain) {
			return Err(Error::Store(format!("no such domain: {domain}")));
		}

		let mut accounts = self.accounts.write().await;
		if accounts.contains_key(&name) {
			return Err(Error::Store(format!("account already exists: {name}")));
		}
		let created = Account {
			id: format!("acct-{}", accounts.len() + 1),
			name: name.clone(),
			attributes: account.attributes,
			aliases: Vec::new(),
		};
		accounts.insert(name, created.clone());
		Ok(created)
	}

	async fn add_alias(&self, account: &Account, alias: &str) -> Result<(), Error> {
		let alias = alias.to_ascii_lowercase();
		let mut accounts = self.accounts.write().await;
		if accounts.contains_key(&alias)
			|| accounts.values().any(|existing| existing.aliases.contains(&alias))
		{
			return Err(Error::Store(format!("address already in use: {alias}")));
		}
		let target = accounts
			.get_mut(&account.name.to_ascii_lowercase())
			.ok_or_else(|| Error::Store(format!("no such account: {}", account.name)))?;
		target.aliases.push(alias);
		Ok(())
	}

	async fn default_domain_name(&self) -> Result<Option<String>, Error> {
		Ok((!self.default_domain.is_empty()).then(|| self.default_domain.clone()))
	}
}
