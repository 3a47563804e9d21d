//! Provision local user accounts from a directory server.
//!
//! Accounts are created in a local identity store from the user entries of a
//! directory (usually Active Directory, reached over LDAP), in one of two
//! modes selected by the `sync_mode` setting:
//!
//! * **lazy**: a lookup by name that misses the store asks the directory for
//!   the user and creates the account on the spot ([`LazyProvisioning`]).
//! * **eager**: a background task periodically enumerates the directory and
//!   creates up to `batch_size` missing accounts per pass
//!   ([`SyncSupervisor`]).
//!
//! Only entries whose principal name lies in the configured default domain
//! are provisioned. Existing accounts are never updated or removed.
//!
//! Settings are read through a [`ConfigSource`] at the start of every cycle,
//! so mode, batch size, interval and domain can change while the supervisor
//! runs. The identity store and the directory are reached through the
//! [`IdentityStore`] and [`Directory`] traits; [`LdapDirectory`] implements
//! the latter with `ldap3`.
//!
//! # Getting started
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use directory_provisioner::{
//! 	settings::keys, AccountBy, AttributeConfig, Config, ConnectionConfig, IdentityStore,
//! 	LdapDirectory, MemoryConfig, MemoryStore, ProvisionExtension, Searches,
//! };
//! use url::Url;
//!
//! // Configuration can also be deserialized with serde. It's hand-constructed
//! // here for demonstration purposes.
//! let config = Config {
//! 	url: Url::parse("ldaps://dc.example.com")?,
//! 	connection: ConnectionConfig::default(),
//! 	search_user: "cn=search,cn=Users,dc=example,dc=com".to_owned(),
//! 	search_password: "verysecret".to_owned(),
//! 	searches: Searches::default(),
//! 	attributes: AttributeConfig::default(),
//! };
//! let settings = Arc::new(MemoryConfig::new([
//! 	(keys::SYNC_MODE, "lazy"),
//! 	(keys::DOMAIN_NAME, "example.com"),
//! ]));
//!
//! let extension = ProvisionExtension::new(
//! 	Arc::new(MemoryStore::new("example.com")),
//! 	Arc::new(LdapDirectory::new(config.clone())),
//! 	settings,
//! 	config.attributes,
//! );
//! let accounts = extension.init();
//! let account = accounts.account(&AccountBy::Name("jdoe@example.com".to_owned())).await?;
//! println!("Found: {account:#?}");
//! extension.destroy().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Attribute changes and deletions in the directory are not propagated to
//!   accounts that already exist.
//! * Provisioned accounts get a placeholder credential; authentication is
//!   expected to go to the directory.
//! * [secrecy](https://docs.rs/secrecy) is not used for storing the search user
//!   password, it probably should be

mod cache;
pub mod config;
pub mod directory;
pub mod entry;
pub mod error;
pub mod extension;
pub mod gate;
pub mod ldap;
pub mod materialize;
pub mod settings;
pub mod store;
pub mod supervisor;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	config::{AttributeConfig, Config, ConnectionConfig, Searches, TLSConfig},
	directory::{Directory, DirectorySession, EntryStream},
	entry::SearchEntryExt,
	error::Error,
	extension::ProvisionExtension,
	gate::LazyProvisioning,
	ldap::LdapDirectory,
	materialize::AccountMaterializer,
	settings::{ConfigSource, JsonFileConfig, MemoryConfig, ReloadError, SyncMode, SyncSettings},
	store::{Account, AccountBy, Domain, IdentityStore, MemoryStore, NewAccount},
	supervisor::{PassEnd, PassReport, SyncSupervisor},
};
