//! Capabilities held by accounts on a pool

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thermae_core::{AccountId, LendingError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May change pool configuration and grant roles
    Admin,
    /// May act on behalf of any account (the router)
    Delegator,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roles {
    grants: BTreeMap<AccountId, BTreeSet<Role>>,
}

impl Roles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, account: &AccountId, role: Role) -> bool {
        self.grants.entry(account.clone()).or_default().insert(role)
    }

    pub fn revoke(&mut self, account: &AccountId, role: Role) -> bool {
        let Some(roles) = self.grants.get_mut(account) else {
            return false;
        };
        let removed = roles.remove(&role);
        if roles.is_empty() {
            self.grants.remove(account);
        }
        removed
    }

    pub fn has(&self, account: &AccountId, role: Role) -> bool {
        self.grants
            .get(account)
            .is_some_and(|roles| roles.contains(&role))
    }

    pub fn ensure(&self, account: &AccountId, role: Role, action: &'static str) -> Result<()> {
        if self.has(account, role) {
            Ok(())
        } else {
            Err(LendingError::Unauthorized {
                caller: account.clone(),
                action,
            })
        }
    }

    /// Holders of `role`
    pub fn members(&self, role: Role) -> impl Iterator<Item = &AccountId> {
        self.grants
            .iter()
            .filter(move |(_, roles)| roles.contains(&role))
            .map(|(account, _)| account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_revoke() {
        let mut roles = Roles::new();
        let router = AccountId::new("entrypoint");

        assert!(roles.grant(&router, Role::Delegator));
        assert!(!roles.grant(&router, Role::Delegator));
        assert!(roles.has(&router, Role::Delegator));
        assert!(!roles.has(&router, Role::Admin));

        assert!(roles.revoke(&router, Role::Delegator));
        assert!(!roles.revoke(&router, Role::Delegator));
        assert_eq!(roles.members(Role::Delegator).count(), 0);
    }

    #[test]
    fn test_ensure_reports_caller() {
        let roles = Roles::new();
        let mallory = AccountId::new("mallory");
        let err = roles.ensure(&mallory, Role::Admin, "set config").unwrap_err();
        assert_eq!(err.to_string(), "mallory is not allowed to set config");
    }
}
