//! Per-pass cache of domains known to exist in the identity store
use std::collections::HashSet;

use crate::{error::Error, store::IdentityStore};

/// Domains already confirmed to exist in the local store during one eager
/// pass. Dropped when the pass ends.
#[derive(Debug, Default)]
pub(crate) struct DomainCache {
	/// Lowercased names of confirmed domains
	known: HashSet<String>,
}

impl DomainCache {
	/// Check whether a domain exists, asking the store only the first time a
	/// domain is seen. Unknown domains are not remembered, so they are asked
	/// about again on their next occurrence.
	pub(crate) async fn confirm(
		&mut self,
		store: &dyn IdentityStore,
		domain: &str,
	) -> Result<bool, Error> {
		let key = domain.to_ascii_lowercase();
		if self.known.contains(&key) {
			return Ok(true);
		}
		let exists = store.domain_by_name(domain).await?.is_some();
		if exists {
			self.known.insert(key);
		}
		Ok(exists)
	}

	/// Number of confirmed domains
	pub(crate) fn len(&self) -> usize {
		self.known.len()
	}
}
