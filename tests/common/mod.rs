#![allow(dead_code)]

use std::{
	collections::HashMap,
	error::Error,
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use directory_provisioner::{
	error, AttributeConfig, Config, ConnectionConfig, Directory, DirectorySession, EntryStream,
	Searches,
};
use ldap3::{LdapConnAsync, SearchEntry};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use url::Url;

pub fn init_tracing() {
	let tracing_filter = EnvFilter::default().add_directive(LevelFilter::DEBUG.into());
	let _ = tracing_subscriber::fmt().with_env_filter(tracing_filter).with_test_writer().try_init();
}

/// An Active Directory style user entry
pub fn user(account: &str, principal: &str, mail: Option<&str>) -> SearchEntry {
	let mut attrs = HashMap::from([
		("sAMAccountName".to_owned(), vec![account.to_owned()]),
		("userPrincipalName".to_owned(), vec![principal.to_owned()]),
		("givenName".to_owned(), vec![account.to_uppercase()]),
		("name".to_owned(), vec![format!("User {account}")]),
	]);
	if let Some(mail) = mail {
		attrs.insert("mail".to_owned(), vec![mail.to_owned()]);
	}
	SearchEntry {
		dn: format!("CN={account},CN=Users,DC=example,DC=com"),
		attrs,
		bin_attrs: HashMap::new(),
	}
}

/// A directory serving a fixed list of entries
#[derive(Debug, Default)]
pub struct StaticDirectory {
	entries: Vec<SearchEntry>,
	/// Refuse to open sessions
	pub fail_open: AtomicBool,
	/// Fail every query
	pub fail_queries: AtomicBool,
	/// Fail enumerations after this many entries
	fail_after: Option<usize>,
	/// Time each enumerated entry takes to arrive
	entry_delay: Option<Duration>,
	opens: AtomicUsize,
}

impl StaticDirectory {
	pub fn new(entries: Vec<SearchEntry>) -> Arc<Self> {
		Arc::new(Self { entries, ..Self::default() })
	}

	pub fn failing_after(entries: Vec<SearchEntry>, count: usize) -> Arc<Self> {
		Arc::new(Self { entries, fail_after: Some(count), ..Self::default() })
	}

	pub fn slow(entries: Vec<SearchEntry>, entry_delay: Duration) -> Arc<Self> {
		Arc::new(Self { entries, entry_delay: Some(entry_delay), ..Self::default() })
	}

	/// How many sessions were opened
	pub fn opens(&self) -> usize {
		self.opens.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Directory for StaticDirectory {
	async fn open(&self, domain: &str) -> Result<Box<dyn DirectorySession>, error::Error> {
		if self.fail_open.load(Ordering::SeqCst) {
			return Err(error::Error::Connection(format!("{domain}: connection refused")));
		}
		self.opens.fetch_add(1, Ordering::SeqCst);
		Ok(Box::new(StaticSession {
			entries: self.entries.clone(),
			fail_queries: self.fail_queries.load(Ordering::SeqCst),
			fail_after: self.fail_after,
			entry_delay: self.entry_delay,
		}))
	}
}

struct StaticSession {
	entries: Vec<SearchEntry>,
	fail_queries: bool,
	fail_after: Option<usize>,
	entry_delay: Option<Duration>,
}

#[async_trait]
impl DirectorySession for StaticSession {
	async fn fetch_one(&mut self, name: &str) -> Result<Option<SearchEntry>, error::Error> {
		if self.fail_queries {
			return Err(error::Error::Query("search failed".to_owned()));
		}
		let attribute = if name.contains('@') { "userPrincipalName" } else { "sAMAccountName" };
		Ok(self
			.entries
			.iter()
			.find(|entry| {
				entry
					.attrs
					.get(attribute)
					.and_then(|values| values.first())
					.is_some_and(|value| value.eq_ignore_ascii_case(name))
			})
			.cloned())
	}

	async fn fetch_all(&mut self) -> Result<Box<dyn EntryStream>, error::Error> {
		if self.fail_queries {
			return Err(error::Error::Query("search failed".to_owned()));
		}
		Ok(Box::new(StaticStream {
			entries: self.entries.clone().into_iter(),
			yielded: 0,
			fail_after: self.fail_after,
			entry_delay: self.entry_delay,
		}))
	}
}

struct StaticStream {
	entries: std::vec::IntoIter<SearchEntry>,
	yielded: usize,
	fail_after: Option<usize>,
	entry_delay: Option<Duration>,
}

#[async_trait]
impl EntryStream for StaticStream {
	async fn next_entry(&mut self) -> Result<Option<SearchEntry>, error::Error> {
		if self.fail_after == Some(self.yielded) {
			return Err(error::Error::Query("connection reset".to_owned()));
		}
		if let Some(delay) = self.entry_delay {
			tokio::time::sleep(delay).await;
		}
		let entry = self.entries.next();
		if entry.is_some() {
			self.yielded += 1;
		}
		Ok(entry)
	}
}

/// Configuration for the OpenLDAP test server
pub fn ldap_config() -> Config {
	Config {
		url: Url::parse("ldap://localhost:1389").unwrap(),
		connection: ConnectionConfig::default(),
		search_user: "cn=admin,dc=example,dc=org".to_owned(),
		search_password: "adminpassword".to_owned(),
		searches: Searches {
			user_base: Some("ou=users,dc=example,dc=org".to_owned()),
			user_filter: "(objectClass=inetOrgPerson)".to_owned(),
			page_size: None,
		},
		attributes: AttributeConfig {
			account_name: "uid".to_owned(),
			principal_name: "mail".to_owned(),
			given_name: "givenName".to_owned(),
			display_name: "displayName".to_owned(),
			surname: "sn".to_owned(),
			mail: "mail".to_owned(),
		},
	}
}

pub async fn ldap_add_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={},dc=example,dc=org", ou),
		vec![("objectClass", ["organizationalUnit"].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("ou={},dc=example,dc=org", ou)).await?.success()?;
	Ok(())
}

pub async fn ldap_connect() -> Result<ldap3::Ldap, Box<dyn Error>> {
	let (conn, mut ldap) = LdapConnAsync::new("ldap://localhost:1389").await?;
	let _handle = tokio::spawn(async move {
		if let Err(err) = conn.drive().await {
			panic!("Ldap connection error {err}");
		}
	});
	ldap.simple_bind("cn=admin,dc=example,dc=org", "adminpassword").await?.success()?;
	Ok(ldap)
}

pub async fn ldap_delete_user(ldap: &mut ldap3::Ldap, uid: &str) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("cn={},ou=users,dc=example,dc=org", uid)).await?.success()?;
	Ok(())
}

pub async fn ldap_add_user(
	ldap: &mut ldap3::Ldap,
	uid: &str,
	sn: &str,
	mail: &str,
) -> Result<(), Box<dyn Error>> {
	let display_name = format!("{uid} {sn}");
	ldap.add(
		&format!("cn={},ou=users,dc=example,dc=org", uid),
		vec![
			("objectClass", ["inetOrgPerson"].into()),
			("uid", [uid].into()),
			("sn", [sn].into()),
			("displayName", [display_name.as_str()].into()),
			("mail", [mail].into()),
		],
	)
	.await?
	.success()?;
	Ok(())
}
