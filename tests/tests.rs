#![allow(
	clippy::dbg_macro,
	clippy::expect_used,
	clippy::missing_docs_in_private_items,
	clippy::print_stderr,
	clippy::print_stdout,
	clippy::unwrap_used
)]
use std::{error::Error, sync::Arc, time::Duration};

use directory_provisioner::{
	error, settings::keys, AccountBy, Directory, DirectorySession, EntryStream, IdentityStore,
	LazyProvisioning, LdapDirectory, MemoryConfig, MemoryStore, SearchEntryExt, SyncSupervisor,
};
use serial_test::serial;
use url::Url;

mod common;

use common::{
	init_tracing, ldap_add_organizational_unit, ldap_add_user, ldap_config, ldap_connect,
	ldap_delete_organizational_unit, ldap_delete_user,
};

/// Recreate `ou=users` holding `user01` to `user03`
async fn populate(ldap: &mut ldap3::Ldap) -> Result<(), Box<dyn Error>> {
	for uid in ["user01", "user02", "user03"] {
		let _ = ldap_delete_user(ldap, uid).await;
	}
	let _ = ldap_delete_organizational_unit(ldap, "users").await;

	ldap_add_organizational_unit(ldap, "users").await?;
	ldap_add_user(ldap, "user01", "User1", "user01@example.com").await?;
	ldap_add_user(ldap, "user02", "User2", "user02@example.com").await?;
	ldap_add_user(ldap, "user03", "User3", "user03@other.org").await?;
	Ok(())
}

async fn cleanup(mut ldap: ldap3::Ldap) -> Result<(), Box<dyn Error>> {
	for uid in ["user01", "user02", "user03"] {
		ldap_delete_user(&mut ldap, uid).await?;
	}
	ldap_delete_organizational_unit(&mut ldap, "users").await?;
	ldap.unbind().await?;
	Ok(())
}

#[ignore = "docker"]
#[tokio::test]
#[serial]
async fn ldap_fetch_test() -> Result<(), Box<dyn Error>> {
	init_tracing();
	let mut ldap = ldap_connect().await?;
	populate(&mut ldap).await?;

	let directory = LdapDirectory::new(ldap_config());
	let mut session = directory.open("example.org").await?;

	let mut entries = session.fetch_all().await?;
	let mut uids = vec![];
	while let Some(entry) = entries.next_entry().await? {
		uids.push(entry.attr_first("uid").unwrap().to_owned());
	}
	uids.sort();
	assert_eq!(uids, ["user01", "user02", "user03"]);

	let by_uid = session.fetch_one("user02").await?.unwrap();
	assert_eq!(by_uid.attr_first("mail"), Some("user02@example.com"));
	assert_eq!(by_uid.attr_first("displayName"), Some("user02 User2"));

	let by_mail = session.fetch_one("user03@other.org").await?.unwrap();
	assert_eq!(by_mail.attr_first("uid"), Some("user03"));

	assert!(session.fetch_one("nobody").await?.is_none());
	assert!(session.fetch_one("*").await?.is_none(), "Names are escaped");

	cleanup(ldap).await
}

#[ignore = "docker"]
#[tokio::test]
#[serial]
async fn ldap_eager_sync_test() -> Result<(), Box<dyn Error>> {
	init_tracing();
	let mut ldap = ldap_connect().await?;
	populate(&mut ldap).await?;

	let store = Arc::new(MemoryStore::new("example.com"));
	let config = Arc::new(MemoryConfig::new([
		(keys::SYNC_MODE, "eager"),
		(keys::BATCH_SIZE, "10"),
		(keys::INITIAL_SLEEP, "0"),
	]));
	let config_ldap = ldap_config();
	let attributes = config_ldap.attributes.clone();
	let supervisor = SyncSupervisor::new(
		store.clone(),
		Arc::new(LdapDirectory::new(config_ldap)),
		config,
		attributes,
	);
	supervisor.startup();

	tokio::time::timeout(Duration::from_secs(10), async {
		while supervisor.last_report().is_none() {
			tokio::time::sleep(Duration::from_millis(100)).await;
		}
	})
	.await?;
	supervisor.shutdown_and_join().await;

	let names: Vec<_> = store.accounts().await.into_iter().map(|account| account.name).collect();
	assert_eq!(names, ["user01@example.com", "user02@example.com"]);
	let report = supervisor.last_report().unwrap();
	assert_eq!((report.scanned, report.created), (3, 2));

	cleanup(ldap).await
}

#[ignore = "docker"]
#[tokio::test]
#[serial]
async fn ldap_lazy_provisioning_test() -> Result<(), Box<dyn Error>> {
	init_tracing();
	let mut ldap = ldap_connect().await?;
	populate(&mut ldap).await?;

	let store = Arc::new(MemoryStore::new("example.com"));
	let config = Arc::new(MemoryConfig::new([(keys::SYNC_MODE, "lazy")]));
	let config_ldap = ldap_config();
	let attributes = config_ldap.attributes.clone();
	let gate = LazyProvisioning::new(
		store.clone(),
		Arc::new(LdapDirectory::new(config_ldap)),
		config,
		attributes,
	);

	let account = gate.account(&AccountBy::Name("user01@example.com".to_owned())).await?.unwrap();
	assert_eq!(account.name, "user01@example.com");
	assert!(gate.account(&AccountBy::Name("user03@other.org".to_owned())).await?.is_none());
	assert!(gate.account(&AccountBy::Name("nobody@example.com".to_owned())).await?.is_none());
	assert_eq!(store.accounts().await.len(), 1);

	cleanup(ldap).await
}

#[tokio::test]
async fn unreachable_ldap_server() {
	init_tracing();
	let mut config = ldap_config();
	config.url = Url::parse("ldap://localhost:1").unwrap();
	config.connection.timeout = 1;
	let attributes = config.attributes.clone();
	let directory = Arc::new(LdapDirectory::new(config));

	let err = directory.open("example.com").await.err().unwrap();
	assert!(matches!(err, error::Error::Connection(_)), "{err}");
	assert!(err.is_connection_error());

	let gate = LazyProvisioning::new(
		Arc::new(MemoryStore::new("example.com")),
		directory,
		Arc::new(MemoryConfig::new([(keys::SYNC_MODE, "lazy")])),
		attributes,
	);
	assert!(gate.get_account(&AccountBy::Name("jdoe".to_owned())).await.unwrap().is_none());
}
