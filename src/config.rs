//! Config for the directory connection.
use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use ldap3::LdapConnSettings;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Directory configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
	/// The URL to connect to the server with. Supports ldap, ldaps, and ldapi
	/// schemes
	pub url: Url,
	/// Connection settings.
	#[serde(default)]
	pub connection: ConnectionConfig,
	/// The username for the LDAP search user
	pub search_user: String,
	/// The password for the LDAP search user
	pub search_password: String,
	/// Filters and bases to use for searches
	#[serde(default)]
	pub searches: Searches,
	/// Names of attributes to extract identity data from
	#[serde(default)]
	pub attributes: AttributeConfig,
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// LDAP operation timeout. For search per reply.
	pub operation_timeout: Duration,

	/// TLS config
	#[serde(default)]
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self { timeout: 5, operation_timeout: Duration::from_secs(30), tls: TLSConfig::default() }
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key (PKCS#8, PEM) to use for the connection
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate (PEM) to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

/// Names of the directory attributes identities are built from. Defaults
/// match Active Directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeConfig {
	/// Short account (logon) name, e.g. `sAMAccountName`
	pub account_name: String,
	/// Principal name in `local@domain` form, e.g. `userPrincipalName`
	pub principal_name: String,
	/// Given name
	pub given_name: String,
	/// Display name, written as both common and display name
	pub display_name: String,
	/// Surname
	pub surname: String,
	/// Mail address
	pub mail: String,
}

impl Default for AttributeConfig {
	fn default() -> Self {
		Self {
			account_name: "sAMAccountName".to_owned(),
			principal_name: "userPrincipalName".to_owned(),
			given_name: "givenName".to_owned(),
			display_name: "name".to_owned(),
			surname: "sn".to_owned(),
			mail: "mail".to_owned(),
		}
	}
}

impl AttributeConfig {
	/// Returns the list of LDAP object attributes the server should return.
	#[must_use]
	pub fn as_list(&self) -> Vec<String> {
		let mut list = vec![
			self.account_name.clone(),
			self.principal_name.clone(),
			self.given_name.clone(),
			self.display_name.clone(),
			self.surname.clone(),
			self.mail.clone(),
		];
		list.sort();
		list.dedup();
		list
	}
}

/// Configurable filters and bases to use for LDAP searches
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Searches {
	/// If set, enables the [simple paged search control] and sets the page size
	/// to the given value
	///
	/// [simple paged search control]: https://www.rfc-editor.org/rfc/rfc2696.html
	#[serde(default)]
	pub page_size: Option<i32>,
	/// The search filter to use when enumerating users
	pub user_filter: String,
	/// The search base to use when enumerating users. Derived from the
	/// session's domain (`dc=example,dc=com`) when unset.
	#[serde(default)]
	pub user_base: Option<String>,
}

impl Default for Searches {
	fn default() -> Self {
		Self {
			page_size: Some(500),
			user_filter: "(&(objectCategory=person)(objectClass=user))".to_owned(),
			user_base: None,
		}
	}
}

impl Searches {
	/// The search base for a session scoped to `domain`
	#[must_use]
	pub fn base_for(&self, domain: &str) -> String {
		match &self.user_base {
			Some(base) => base.clone(),
			None => domain
				.split('.')
				.filter(|label| !label.is_empty())
				.map(|label| format!("dc={label}"))
				.collect::<Vec<_>>()
				.join(","),
		}
	}
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) async fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = RootCertStore::empty();
			let root_certificates = read_certificates(path).await?;
			if root_certificates.is_empty() {
				return Err(Error::Invalid("Could not read root certificate".to_owned()));
			}
			for certificate in &root_certificates {
				roots
					.add(certificate)
					.map_err(|_| Error::Invalid("Could not read root certificate".to_owned()))?;
			}

			let builder =
				ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);
			let client_config = match (&self.tls.client_key_path, &self.tls.client_certificate_path)
			{
				(Some(key_path), Some(cert_path)) => {
					let chain = read_certificates(cert_path).await?;
					let key = rustls_pemfile::pkcs8_private_keys(
						&mut tokio::fs::read(key_path).await?.as_slice(),
					)?
					.into_iter()
					.next()
					.map(PrivateKey);
					match (chain.is_empty(), key) {
						(false, Some(key)) => builder.with_client_auth_cert(chain, key).map_err(
							|_| Error::Invalid("Could not read client certificates".to_owned()),
						)?,
						_ => {
							return Err(Error::Invalid(
								"Could not read client certificates".to_owned(),
							))
						}
					}
				}
				(None, None) => builder.with_no_client_auth(),
				_ => Err(Error::Invalid(
					"Both a client certificate and key file in PKCS8 format must be specified"
						.to_owned(),
				))?,
			};
			settings = settings.set_config(Arc::new(client_config));
		}
		Ok(settings)
	}
}

/// Read all PEM certificates from a file
async fn read_certificates(path: &Path) -> Result<Vec<Certificate>, Error> {
	let pem = tokio::fs::read(path).await?;
	let certificates = rustls_pemfile::certs(&mut pem.as_slice())?;
	Ok(certificates.into_iter().map(Certificate).collect())
}
