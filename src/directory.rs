//! The directory service the identities are provisioned from
use async_trait::async_trait;
use ldap3::SearchEntry;

use crate::error::Error;

/// A directory service identities can be read from.
#[async_trait]
pub trait Directory: Send + Sync {
	/// Open a session scoped to one domain. Fails with
	/// [`Error::Connection`].
	async fn open(&self, domain: &str) -> Result<Box<dyn DirectorySession>, Error>;
}

/// An open connection to a directory. Released when dropped.
#[async_trait]
pub trait DirectorySession: Send {
	/// Fetch the user entry matching `name`, if any. Fails with
	/// [`Error::Query`].
	async fn fetch_one(&mut self, name: &str) -> Result<Option<SearchEntry>, Error>;

	/// Start enumerating every user entry.
	async fn fetch_all(&mut self) -> Result<Box<dyn EntryStream>, Error>;
}

/// A single pass over directory entries. Cannot be restarted.
#[async_trait]
pub trait EntryStream: Send {
	/// The next entry, or `None` once the enumeration is complete. May fail
	/// part way with [`Error::Query`].
	async fn next_entry(&mut self) -> Result<Option<SearchEntry>, Error>;
}
