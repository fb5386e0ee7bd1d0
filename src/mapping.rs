//! Account mapping resolver
//!
//! Maps semantic roles (`cash`, `ar`, `vat_payable`, ...) to account codes at call time.
//! Nothing is cached: every workflow call reads the current mapping.

use crate::error::LedgerError;
use crate::model::{AccountMapping, MappingKey};
use crate::store::LedgerStore;

pub struct MappingResolver<'a> {
    store: &'a dyn LedgerStore,
}

impl<'a> MappingResolver<'a> {
    pub fn new(store: &'a dyn LedgerStore) -> Self {
        Self { store }
    }

    /// Account code for `key`; a missing or inactive mapping is `MissingMapping`, never a default.
    pub fn get_account_code(&self, key: MappingKey) -> Result<String, LedgerError> {
        match self.store.mapping(key)? {
            Some(mapping) if mapping.is_active => Ok(mapping.account_code),
            _ => Err(LedgerError::MissingMapping(key)),
        }
    }

    /// Point `key` at `account_code`, activating the mapping.
    pub fn set_mapping(&self, key: MappingKey, account_code: &str) -> Result<AccountMapping, LedgerError> {
        let account = self
            .store
            .account_by_code(account_code)?
            .ok_or_else(|| LedgerError::UnknownAccount(account_code.to_string()))?;
        let mapping = self.store.upsert_mapping(key, account.id)?;
        log::info!("mapped {key} to account {account_code}");
        Ok(mapping)
    }

    pub fn deactivate(&self, key: MappingKey) -> Result<AccountMapping, LedgerError> {
        self.store
            .deactivate_mapping(key)?
            .ok_or(LedgerError::MissingMapping(key))
    }

    pub fn list(&self) -> Result<Vec<AccountMapping>, LedgerError> {
        Ok(self.store.list_mappings()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewAccount, NewAccountCategory, NormalSide};
    use crate::store::MemoryStore;

    fn store_with_cash() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_category(&NewAccountCategory {
                code: "ASSET".into(),
                name: "Assets".into(),
                account_type: NormalSide::DebitNormal,
            })
            .unwrap();
        store
            .insert_account(&NewAccount {
                account_code: "1000".into(),
                name: "Cash".into(),
                category_code: "ASSET".into(),
            })
            .unwrap();
        store
    }

    #[test]
    fn test_missing_mapping_is_an_error() {
        let store = store_with_cash();
        let resolver = MappingResolver::new(&store);
        assert!(matches!(
            resolver.get_account_code(MappingKey::Cash),
            Err(LedgerError::MissingMapping(MappingKey::Cash))
        ));
    }

    #[test]
    fn test_inactive_mapping_is_an_error() {
        let store = store_with_cash();
        let resolver = MappingResolver::new(&store);
        resolver.set_mapping(MappingKey::Cash, "1000").unwrap();
        assert_eq!(resolver.get_account_code(MappingKey::Cash).unwrap(), "1000");

        resolver.deactivate(MappingKey::Cash).unwrap();
        assert!(matches!(
            resolver.get_account_code(MappingKey::Cash),
            Err(LedgerError::MissingMapping(MappingKey::Cash))
        ));

        resolver.set_mapping(MappingKey::Cash, "1000").unwrap();
        assert!(resolver.get_account_code(MappingKey::Cash).is_ok());
    }

    #[test]
    fn test_mapping_to_unknown_account_rejected() {
        let store = store_with_cash();
        let resolver = MappingResolver::new(&store);
        assert!(matches!(
            resolver.set_mapping(MappingKey::Bank, "1010"),
            Err(LedgerError::UnknownAccount(_))
        ));
    }
}
