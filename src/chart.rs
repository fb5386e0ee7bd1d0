//! Chart of accounts directory

use crate::error::{LedgerError, StoreError};
use crate::model::{Account, AccountCategory, NewAccount, NewAccountCategory};
use crate::store::LedgerStore;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static ACCOUNT_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Za-z][0-9A-Za-z.\-]{0,31}$").expect("account code pattern is valid")
});

/// Whether `code` is a well-formed account or category code.
pub fn is_valid_code(code: &str) -> bool {
    ACCOUNT_CODE.is_match(code)
}

pub struct ChartOfAccounts<'a> {
    store: &'a dyn LedgerStore,
}

impl<'a> ChartOfAccounts<'a> {
    pub fn new(store: &'a dyn LedgerStore) -> Self {
        Self { store }
    }

    pub fn create_category(&self, new: NewAccountCategory) -> Result<AccountCategory, LedgerError> {
        if !is_valid_code(&new.code) {
            return Err(LedgerError::InvalidInput(format!(
                "invalid category code '{}'",
                new.code
            )));
        }
        Ok(self.store.insert_category(&new)?)
    }

    pub fn create_account(&self, new: NewAccount) -> Result<Account, LedgerError> {
        if !is_valid_code(&new.account_code) {
            return Err(LedgerError::InvalidInput(format!(
                "invalid account code '{}'",
                new.account_code
            )));
        }
        if new.name.trim().is_empty() {
            return Err(LedgerError::InvalidInput("account name is empty".to_string()));
        }
        let account = self.store.insert_account(&new).map_err(|e| match e {
            StoreError::NotFound(_) => LedgerError::InvalidInput(format!(
                "unknown account category '{}'",
                new.category_code
            )),
            other => LedgerError::Store(other),
        })?;
        log::info!(
            "created account {} ({}) as {}",
            account.account_code,
            account.name,
            account.normal_side
        );
        Ok(account)
    }

    /// Look up an account; unknown codes fail with `UnknownAccount`.
    pub fn account(&self, code: &str) -> Result<Account, LedgerError> {
        self.store
            .account_by_code(code)?
            .ok_or_else(|| LedgerError::UnknownAccount(code.to_string()))
    }

    /// Resolve every code to an active account, failing on the first unknown or inactive code
    /// in input order.
    pub fn resolve_codes<'c, I>(&self, codes: I) -> Result<HashMap<String, Account>, LedgerError>
    where
        I: IntoIterator<Item = &'c str>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for code in codes {
            if !ordered.iter().any(|c| c == code) {
                ordered.push(code.to_string());
            }
        }
        let found: HashMap<String, Account> = self
            .store
            .accounts_by_codes(&ordered)?
            .into_iter()
            .map(|account| (account.account_code.clone(), account))
            .collect();
        for code in &ordered {
            match found.get(code) {
                None => return Err(LedgerError::UnknownAccount(code.clone())),
                Some(account) if !account.is_active => {
                    return Err(LedgerError::InactiveAccount(code.clone()))
                }
                Some(_) => {}
            }
        }
        Ok(found)
    }

    pub fn deactivate(&self, code: &str) -> Result<Account, LedgerError> {
        self.store
            .set_account_active(code, false)?
            .ok_or_else(|| LedgerError::UnknownAccount(code.to_string()))
    }

    pub fn activate(&self, code: &str) -> Result<Account, LedgerError> {
        self.store
            .set_account_active(code, true)?
            .ok_or_else(|| LedgerError::UnknownAccount(code.to_string()))
    }

    pub fn list(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.list_accounts()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NormalSide;
    use crate::store::MemoryStore;

    fn chart_with_cash(store: &MemoryStore) -> ChartOfAccounts<'_> {
        let chart = ChartOfAccounts::new(store);
        chart
            .create_category(NewAccountCategory {
                code: "ASSET".into(),
                name: "Assets".into(),
                account_type: NormalSide::DebitNormal,
            })
            .unwrap();
        chart
            .create_account(NewAccount {
                account_code: "1000".into(),
                name: "Cash".into(),
                category_code: "ASSET".into(),
            })
            .unwrap();
        chart
    }

    #[test]
    fn test_code_validation() {
        assert!(is_valid_code("1000"));
        assert!(is_valid_code("1000.01"));
        assert!(is_valid_code("AR-TRADE"));
        assert!(!is_valid_code(""));
        assert!(!is_valid_code("-100"));
        assert!(!is_valid_code("10 00"));
    }

    #[test]
    fn test_account_inherits_category_side() {
        let store = MemoryStore::new();
        let chart = chart_with_cash(&store);
        let cash = chart.account("1000").unwrap();
        assert_eq!(cash.normal_side, NormalSide::DebitNormal);
        assert_eq!(cash.category_code, "ASSET");
    }

    #[test]
    fn test_unknown_category_rejected() {
        let store = MemoryStore::new();
        let chart = ChartOfAccounts::new(&store);
        let result = chart.create_account(NewAccount {
            account_code: "9999".into(),
            name: "Orphan".into(),
            category_code: "NOPE".into(),
        });
        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn test_resolve_codes_reports_unknown_and_inactive() {
        let store = MemoryStore::new();
        let chart = chart_with_cash(&store);
        assert!(matches!(
            chart.resolve_codes(["1000", "4000"]),
            Err(LedgerError::UnknownAccount(code)) if code == "4000"
        ));
        chart.deactivate("1000").unwrap();
        assert!(matches!(
            chart.resolve_codes(["1000"]),
            Err(LedgerError::InactiveAccount(code)) if code == "1000"
        ));
    }
}
