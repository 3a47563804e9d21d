//! LDAP-backed [`Directory`] implementation

use std::sync::Arc;

use async_trait::async_trait;
use ldap3::{
	adapters::{Adapter, EntriesOnly, PagedResults},
	ldap_escape, LdapConnAsync, Scope, SearchEntry, SearchStream,
};
use tracing::{debug, warn};

use crate::{
	config::Config,
	directory::{Directory, DirectorySession, EntryStream},
	error::Error,
};

/// Connects to an LDAP server (typically Active Directory) to read user
/// entries.
#[derive(Debug, Clone)]
pub struct LdapDirectory {
	/// The configuration of the LDAP client.
	config: Arc<Config>,
}

impl LdapDirectory {
	/// Create a new [`LdapDirectory`] with the given configuration.
	#[must_use]
	pub fn new(config: Config) -> Self {
		Self { config: Arc::new(config) }
	}

	/// Create a connection to an ldap server based on the settings and url
	/// specified in the configuration, and bind as the search user.
	async fn connect(&self) -> Result<ldap3::Ldap, Error> {
		let settings = self
			.config
			.connection
			.to_settings()
			.await
			.map_err(|err| Error::Connection(format!("invalid connection settings: {err}")))?;
		let (conn, mut ldap) = LdapConnAsync::from_url_with_settings(settings, &self.config.url)
			.await
			.map_err(|err| Error::Connection(err.to_string()))?;
		tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("Ldap connection error {err}");
			}
		});

		ldap.simple_bind(&self.config.search_user, &self.config.search_password)
			.await
			.and_then(ldap3::LdapResult::success)
			.map_err(|err| Error::Connection(format!("bind failed: {err}")))?;
		Ok(ldap)
	}
}

#[async_trait]
impl Directory for LdapDirectory {
	async fn open(&self, domain: &str) -> Result<Box<dyn DirectorySession>, Error> {
		let ldap = self.connect().await?;
		let base = self.config.searches.base_for(domain);
		debug!(domain, base = %base, "Opened directory session");
		Ok(Box::new(LdapSession { ldap, base, config: Arc::clone(&self.config) }))
	}
}

/// A bound connection, searching below one base.
struct LdapSession {
	/// Handle to the bound connection
	ldap: ldap3::Ldap,
	/// The search base for this session's domain
	base: String,
	/// The configuration of the LDAP client.
	config: Arc<Config>,
}

impl LdapSession {
	/// The filter matching the user called `name`. Names containing `@` are
	/// matched against the principal name, others against the account name.
	fn lookup_filter(config: &Config, name: &str) -> String {
		let attribute = if name.contains('@') {
			&config.attributes.principal_name
		} else {
			&config.attributes.account_name
		};
		format!("(&{}({}={}))", config.searches.user_filter, attribute, ldap_escape(name))
	}
}

#[async_trait]
impl DirectorySession for LdapSession {
	async fn fetch_one(&mut self, name: &str) -> Result<Option<SearchEntry>, Error> {
		let filter = Self::lookup_filter(&self.config, name);
		let (entries, _) = self
			.ldap
			.with_timeout(self.config.connection.operation_timeout)
			.search(&self.base, Scope::Subtree, &filter, self.config.attributes.as_list())
			.await
			.and_then(ldap3::SearchResult::success)
			.map_err(|err| Error::Query(err.to_string()))?;
		if entries.len() > 1 {
			debug!(name, matches = entries.len(), "Ambiguous lookup, using the first entry");
		}
		Ok(entries.into_iter().next().map(SearchEntry::construct))
	}

	async fn fetch_all(&mut self) -> Result<Box<dyn EntryStream>, Error> {
		// Prepare search parameters
		let mut adapters: Vec<Box<dyn Adapter<'static, String, Vec<String>>>> =
			vec![Box::new(EntriesOnly::new())];
		if let Some(page_size) = self.config.searches.page_size {
			adapters.push(Box::new(PagedResults::new(page_size)));
		}

		let stream = self
			.ldap
			.with_timeout(self.config.connection.operation_timeout)
			.streaming_search_with(
				adapters,
				&self.base,
				Scope::Subtree,
				&self.config.searches.user_filter,
				self.config.attributes.as_list(),
			)
			.await
			.map_err(|err| Error::Query(err.to_string()))?;
		Ok(Box::new(LdapEntryStream { stream, finished: false }))
	}
}

/// Entries of one streaming search
struct LdapEntryStream {
	/// The running search
	stream: SearchStream<'static, String, Vec<String>>,
	/// Whether the search has ended
	finished: bool,
}

#[async_trait]
impl EntryStream for LdapEntryStream {
	async fn next_entry(&mut self) -> Result<Option<SearchEntry>, Error> {
		if self.finished {
			return Ok(None);
		}
		match self.stream.next().await.map_err(|err| Error::Query(err.to_string()))? {
			Some(entry) => Ok(Some(SearchEntry::construct(entry))),
			None => {
				self.finished = true;
				self.stream.finish().await.success().map_err(|err| Error::Query(err.to_string()))?;
				Ok(None)
			}
		}
	}
}
