//! Error codes

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// A required attribute in a directory entry was missing.
	#[error("Missing attribute: {0}")]
	Missing(String),
	/// The contents of an attribute or setting did not conform to the expected
	/// syntax.
	#[error("Malformed data: {0}")]
	Invalid(String),
	/// A session with the directory server could not be established.
	#[error("Directory connection failed: {0}")]
	Connection(String),
	/// A search against an open directory session failed.
	#[error("Directory query failed: {0}")]
	Query(String),
	/// The local identity store rejected or failed an operation.
	#[error("Identity store error: {0}")]
	Store(String),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] ldap3::LdapError),
	/// Reading a file (certificates, configuration) failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Whether the error came from opening a directory session rather than
	/// from using one.
	#[must_use]
	pub const fn is_connection_error(&self) -> bool {
		matches!(self, Self::Connection(_))
	}
}
