use crate::accounts::{Account, AccountDb};
use crate::error::BrewboxError;
use crate::naming::{validate_name, Naming};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub name: String,
    pub user: String,
}

pub struct Registry<'a> {
    naming: Naming,
    accounts: &'a dyn AccountDb,
}

impl<'a> Registry<'a> {
    pub fn new(naming: Naming, accounts: &'a dyn AccountDb) -> Self {
        Self { naming, accounts }
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    pub fn list(&self) -> Result<Vec<Instance>, BrewboxError> {
        let mut instances = Vec::new();
        for account in self.accounts.list()? {
            let Some(name) = self.naming.instance_for(&account) else {
                continue;
            };
            validate_name(&name).map_err(|err| BrewboxError::CorruptAccountName {
                account: account.clone(),
                reason: err.to_string(),
            })?;
            instances.push(Instance {
                name,
                user: account,
            });
        }
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }

    pub fn lookup(&self, name: &str) -> Result<Option<Account>, BrewboxError> {
        self.accounts.lookup(&self.naming.account_for(name))
    }

    pub fn exists(&self, name: &str) -> Result<bool, BrewboxError> {
        Ok(self.lookup(name)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::testing::MockAccounts;
    use std::io;

    #[test]
    fn list_filters_by_operator_prefix() {
        let db = MockAccounts::with(&[
            "root",
            "alice",
            "brewbox_alice_zeta",
            "brewbox_bob_default",
            "brewbox_alice_default",
        ]);
        let registry = Registry::new(Naming::new("alice"), &db);

        let instances = registry.list().unwrap();

        assert_eq!(
            instances,
            vec![
                Instance {
                    name: "default".to_string(),
                    user: "brewbox_alice_default".to_string(),
                },
                Instance {
                    name: "zeta".to_string(),
                    user: "brewbox_alice_zeta".to_string(),
                },
            ]
        );
    }

    #[test]
    fn list_fails_on_corrupt_account_name() {
        let db = MockAccounts::with(&["brewbox_alice_ok", "brewbox_alice_-bad"]);
        let registry = Registry::new(Naming::new("alice"), &db);

        let err = registry.list().unwrap_err();

        match err {
            BrewboxError::CorruptAccountName { account, .. } => {
                assert_eq!(account, "brewbox_alice_-bad");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn list_fails_on_nested_reserved_prefix() {
        let db = MockAccounts::with(&["brewbox_alice_brewbox_x"]);
        let registry = Registry::new(Naming::new("alice"), &db);
        assert!(matches!(
            registry.list(),
            Err(BrewboxError::CorruptAccountName { .. })
        ));
    }

    #[test]
    fn exists_is_false_for_absent_account() {
        let db = MockAccounts::with(&["brewbox_alice_default"]);
        let registry = Registry::new(Naming::new("alice"), &db);
        assert!(registry.exists("default").unwrap());
        assert!(!registry.exists("other").unwrap());
        assert!(!Registry::new(Naming::new("bob"), &db).exists("default").unwrap());
    }

    #[test]
    fn exists_propagates_lookup_failures() {
        let db = MockAccounts::default();
        *db.lookup_failure.borrow_mut() = Some(io::ErrorKind::PermissionDenied);
        let registry = Registry::new(Naming::new("alice"), &db);
        assert!(registry.exists("default").is_err());
    }
}
