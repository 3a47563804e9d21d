//! Turning directory entries into local identities
use std::{collections::BTreeMap, fmt, sync::Arc};

use ldap3::SearchEntry;
use tracing::{info, warn};

use crate::{
	config::AttributeConfig,
	entry::{split_address, SearchEntryExt},
	error::Error,
	store::{attr, Account, IdentityStore, NewAccount, MAIL_STATUS_ENABLED},
};

/// Credential given to provisioned accounts. It never matches a password;
/// such accounts authenticate against the directory.
pub const PLACEHOLDER_CREDENTIAL: &str = "AUTOPROVISIONED";

/// Creates local identities from directory entries.
#[derive(Clone)]
pub struct AccountMaterializer {
	/// Where identities are created
	store: Arc<dyn IdentityStore>,
	/// Names of the attributes to read
	attributes: AttributeConfig,
}

impl fmt::Debug for AccountMaterializer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AccountMaterializer")
			.field("attributes", &self.attributes)
			.finish_non_exhaustive()
	}
}

/// The attributes of one directory entry that identities are built from
#[derive(Debug)]
struct Profile<'a> {
	/// Short account name
	account_name: &'a str,
	/// `local@domain` principal name
	principal_name: &'a str,
	/// Given name
	given_name: Option<&'a str>,
	/// Surname
	surname: Option<&'a str>,
	/// Display name
	display_name: Option<&'a str>,
	/// Mail address
	mail: Option<&'a str>,
}

impl<'a> Profile<'a> {
	/// Read the profile, failing if a required attribute is missing.
	fn read(entry: &'a SearchEntry, attributes: &AttributeConfig) -> Result<Self, Error> {
		Ok(Self {
			account_name: entry.required_attr(&attributes.account_name)?,
			principal_name: entry.required_attr(&attributes.principal_name)?,
			given_name: entry.attr_first(&attributes.given_name),
			surname: entry.attr_first(&attributes.surname),
			display_name: entry.attr_first(&attributes.display_name),
			mail: entry.attr_first(&attributes.mail),
		})
	}

	/// The account to create for this profile
	fn new_account(&self) -> NewAccount {
		let mut attributes = BTreeMap::new();
		if let Some(given_name) = self.given_name {
			attributes.insert(attr::GIVEN_NAME.to_owned(), given_name.to_owned());
		}
		if let Some(surname) = self.surname {
			attributes.insert(attr::SURNAME.to_owned(), surname.to_owned());
		}
		if let Some(display_name) = self.display_name {
			attributes.insert(attr::COMMON_NAME.to_owned(), display_name.to_owned());
			attributes.insert(attr::DISPLAY_NAME.to_owned(), display_name.to_owned());
		}
		attributes.insert(attr::MAIL_STATUS.to_owned(), MAIL_STATUS_ENABLED.to_owned());

		NewAccount {
			name: self.principal_name.to_owned(),
			credential: PLACEHOLDER_CREDENTIAL.to_owned(),
			attributes,
		}
	}
}

impl AccountMaterializer {
	/// Create a materializer writing to `store`.
	#[must_use]
	pub fn new(store: Arc<dyn IdentityStore>, attributes: AttributeConfig) -> Self {
		Self { store, attributes }
	}

	/// The names of the attributes read from entries
	#[must_use]
	pub fn attributes(&self) -> &AttributeConfig {
		&self.attributes
	}

	/// Create the identity for `entry` in `default_domain`.
	///
	/// Returns `None` if the entry belongs to another domain, lacks a
	/// required attribute, or the store refuses the account. Failures are
	/// logged rather than returned.
	pub async fn materialize(&self, entry: &SearchEntry, default_domain: &str) -> Option<Account> {
		match self.try_materialize(entry, default_domain).await {
			Ok(account) => account,
			Err(err) => {
				warn!(dn = %entry.dn, "Unable to create user from directory entry: {err}");
				None
			}
		}
	}

	/// Create the identity, `Ok(None)` if it belongs to another domain
	async fn try_materialize(
		&self,
		entry: &SearchEntry,
		default_domain: &str,
	) -> Result<Option<Account>, Error> {
		let profile = Profile::read(entry, &self.attributes)?;
		let (principal_local, principal_domain) = split_address(profile.principal_name)
			.ok_or_else(|| {
				Error::Invalid(format!("principal name <{}>", profile.principal_name))
			})?;

		if !principal_domain.eq_ignore_ascii_case(default_domain) {
			info!(principal = profile.principal_name, "User is not in our default domain");
			return Ok(None);
		}

		let mail = profile.mail.and_then(|mail| split_address(mail).map(|parts| (mail, parts.0)));
		let alias_local = mail.map_or(principal_local, |(_, local)| local);

		info!(
			account = profile.account_name,
			principal = profile.principal_name,
			display_name = profile.display_name.unwrap_or_default(),
			"Creating user"
		);
		let mut account = self.store.create_account(profile.new_account()).await?;

		match mail {
			Some((address, _)) if !alias_local.eq_ignore_ascii_case(profile.account_name) => {
				info!(alias = address, account = %account.name, "Creating alias");
				match self.store.add_alias(&account, address).await {
					Ok(()) => account.aliases.push(address.to_owned()),
					Err(err) => warn!(alias = address, "Unable to add alias: {err}"),
				}
			}
			_ => {}
		}
		Ok(Some(account))
	}
}
