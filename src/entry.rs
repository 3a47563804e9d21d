//! Helper methods for extracting data from directory entries.
use ldap3::SearchEntry;

use crate::error::Error;

/// An extension trait for [`SearchEntry`] that provides convenience methods for
/// extracting data.
pub trait SearchEntryExt {
	/// Get the first value of an attribute. Empty values are treated as
	/// absent.
	fn attr_first(&self, attr: &str) -> Option<&str>;

	/// Get the first value of an attribute that must be present.
	fn required_attr(&self, attr: &str) -> Result<&str, Error> {
		self.attr_first(attr).ok_or_else(|| Error::Missing(attr.to_owned()))
	}
}

impl SearchEntryExt for SearchEntry {
	fn attr_first(&self, attr: &str) -> Option<&str> {
		let attr = self.attrs.get(attr)?;
		attr.first().map(String::as_str).filter(|value| !value.is_empty())
	}
}

/// Split an address of the form `local@domain` into its two parts.
///
/// Returns `None` unless both parts are non-empty and the domain looks like a
/// host name.
#[must_use]
pub fn split_address(address: &str) -> Option<(&str, &str)> {
	let (local, domain) = address.trim().rsplit_once('@')?;
	if local.is_empty() || !is_valid_domain(domain) {
		return None;
	}
	Some((local, domain))
}

/// Extract the domain part of an address, if the address is well-formed.
#[must_use]
pub fn domain_part(address: &str) -> Option<&str> {
	split_address(address).map(|(_, domain)| domain)
}

/// Loose host name check: dot-separated labels of letters, digits and hyphens.
fn is_valid_domain(domain: &str) -> bool {
	!domain.is_empty()
		&& domain.split('.').all(|label| {
			!label.is_empty()
				&& !label.starts_with('-')
				&& !label.ends_with('-')
				&& label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
		})
}
