/// In-memory account registry for an unlocked session.
///
/// Holds every account, the saved-address book, the selected account and
/// the selected network. Mutations are synchronous; the service persists
/// the sealed form afterwards and restores a prior clone if that fails.
use tracing::{info, warn};

use crate::crypto::cipher;
use crate::crypto::keys;
use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{Result, WalletError};
use crate::state::models::*;

#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    accounts: Vec<Account>,
    selected: Option<String>,
    next_seed_index: u32,
    saved: Vec<SavedAddress>,
    network: Network,
    /// Records that failed to decrypt on unlock; written back untouched.
    unreadable_accounts: Vec<PersistedAccount>,
    unreadable_saved: Vec<PersistedSavedAddress>,
}

impl AccountRegistry {
    pub fn new(accounts: Vec<Account>, saved: Vec<SavedAddress>, network: Network) -> Self {
        let mut registry = Self {
            accounts,
            saved,
            network,
            ..Self::default()
        };
        registry.recompute_next_index();
        registry
    }

    /// Decrypts persisted records, skipping (and keeping) any that fail.
    pub fn open(
        persisted_accounts: Vec<PersistedAccount>,
        persisted_saved: Vec<PersistedSavedAddress>,
        network: Network,
        key: &SensitiveBytes32,
    ) -> Self {
        let mut accounts = Vec::with_capacity(persisted_accounts.len());
        let mut unreadable_accounts = Vec::new();
        for record in persisted_accounts {
            match cipher::open_json::<AccountBlob>(&record.account, key) {
                Ok(blob) => accounts.push(Account::from_blob(record.name, &blob)),
                Err(e) => {
                    warn!(account = %record.name, error = %e, "Skipping unreadable account");
                    unreadable_accounts.push(record);
                }
            }
        }

        let mut saved = Vec::with_capacity(persisted_saved.len());
        let mut unreadable_saved = Vec::new();
        for record in persisted_saved {
            match cipher::open_json::<String>(&record.public_key, key) {
                Ok(public_key) => saved.push(SavedAddress {
                    name: record.name,
                    public_key,
                }),
                Err(e) => {
                    warn!(saved = %record.name, error = %e, "Skipping unreadable saved address");
                    unreadable_saved.push(record);
                }
            }
        }

        let mut registry = Self::new(accounts, saved, network);
        registry.unreadable_accounts = unreadable_accounts;
        registry.unreadable_saved = unreadable_saved;
        registry
    }

    pub fn seal_accounts(&self, key: &SensitiveBytes32) -> Result<Vec<PersistedAccount>> {
        let mut out = Vec::with_capacity(self.accounts.len() + self.unreadable_accounts.len());
        for account in &self.accounts {
            out.push(PersistedAccount {
                name: account.name.clone(),
                account: cipher::seal_json(&account.to_blob(), key)?,
            });
        }
        out.extend(self.unreadable_accounts.iter().cloned());
        Ok(out)
    }

    pub fn seal_saved(&self, key: &SensitiveBytes32) -> Result<Vec<PersistedSavedAddress>> {
        let mut out = Vec::with_capacity(self.saved.len() + self.unreadable_saved.len());
        for entry in &self.saved {
            out.push(PersistedSavedAddress {
                name: entry.name.clone(),
                public_key: cipher::seal_json(&entry.public_key, key)?,
            });
        }
        out.extend(self.unreadable_saved.iter().cloned());
        Ok(out)
    }

    /// Unreadable records cannot be re-encrypted under a new password.
    pub fn has_unreadable_records(&self) -> bool {
        !self.unreadable_accounts.is_empty() || !self.unreadable_saved.is_empty()
    }

    // ── Accounts ──

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn next_seed_index(&self) -> u32 {
        self.next_seed_index
    }

    /// `max(derivedAccountNum) + 1` over seed accounts, or 0 when none exist.
    pub fn recompute_next_index(&mut self) {
        self.next_seed_index = self
            .accounts
            .iter()
            .filter_map(|a| match a.kind() {
                AccountKind::Derived(n) => Some(n + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
    }

    pub fn default_account_name(&self) -> String {
        format!("Account {}", self.accounts.len() + 1)
    }

    pub fn create_from_seed(&mut self, name: &str, mnemonic: &str) -> Result<Account> {
        let index = self.next_seed_index;
        self.next_seed_index += 1;

        let keypair = match keys::derive_keypair(mnemonic, index) {
            Ok(kp) => kp,
            Err(e) => {
                self.next_seed_index = index;
                warn!(index, error = %e, "Seed derivation failed");
                return Err(WalletError::KeypairDerivationFailed);
            }
        };

        let account = Account {
            name: name.to_string(),
            public_key: keypair.address,
            private_key: Some(keypair.private_key),
            derived_account_num: index as i64,
        };
        self.accounts.push(account.clone());
        info!(account = %account.name, index, "Created seed account");
        Ok(account)
    }

    pub fn import_from_private_key(&mut self, name: &str, private_key: &str) -> Result<Account> {
        let keypair = keys::keypair_from_private_key(private_key)?;
        let duplicate = self
            .accounts
            .iter()
            .any(|a| a.private_key.as_ref() == Some(&keypair.private_key));
        if duplicate {
            return Err(WalletError::DuplicateAccount);
        }

        let account = Account {
            name: name.to_string(),
            public_key: keypair.address,
            private_key: Some(keypair.private_key),
            derived_account_num: IMPORTED_ACCOUNT_NUM,
        };
        self.accounts.push(account.clone());
        info!(account = %account.name, "Imported account");
        Ok(account)
    }

    pub fn add_watch_only(&mut self, name: &str, public_key: &str) -> Result<Account> {
        let account = Account {
            name: name.to_string(),
            public_key: keys::checksum_address(public_key)?,
            private_key: None,
            derived_account_num: WATCH_ONLY_ACCOUNT_NUM,
        };
        self.accounts.push(account.clone());
        info!(account = %account.name, "Added watch-only account");
        Ok(account)
    }

    pub fn delete_account(&mut self, name: &str, public_key: &str) -> Result<()> {
        if self.accounts.len() <= 1 {
            return Err(WalletError::LastAccountUndeletable);
        }
        let position = self
            .accounts
            .iter()
            .position(|a| a.name == name && a.is_address(public_key))
            .ok_or(WalletError::AccountNotFound)?;

        let removed = self.accounts.remove(position);
        if self
            .selected
            .as_deref()
            .is_some_and(|s| removed.is_address(s))
        {
            self.selected = None;
        }
        self.recompute_next_index();
        info!(account = %removed.name, "Deleted account");
        Ok(())
    }

    pub fn select(&mut self, public_key: &str) -> Result<&Account> {
        let account = self
            .accounts
            .iter()
            .find(|a| a.is_address(public_key))
            .ok_or(WalletError::NotInRegistry)?;
        self.selected = Some(account.public_key.clone());
        Ok(account)
    }

    /// The selected account, falling back to the first one.
    pub fn selected(&self) -> Option<&Account> {
        self.selected
            .as_deref()
            .and_then(|s| self.accounts.iter().find(|a| a.is_address(s)))
            .or_else(|| self.accounts.first())
    }

    // ── Saved addresses ──

    pub fn saved(&self) -> &[SavedAddress] {
        &self.saved
    }

    fn check_saved_unique(&self, name: &str, public_key: &str, skip: Option<usize>) -> Result<()> {
        for (i, entry) in self.saved.iter().enumerate() {
            if Some(i) == skip {
                continue;
            }
            if entry.name == name {
                return Err(WalletError::DuplicateSavedAddress("name"));
            }
            if entry.public_key.eq_ignore_ascii_case(public_key) {
                return Err(WalletError::DuplicateSavedAddress("public key"));
            }
        }
        Ok(())
    }

    pub fn add_saved(&mut self, name: &str, public_key: &str) -> Result<SavedAddress> {
        let public_key = keys::checksum_address(public_key)?;
        self.check_saved_unique(name, &public_key, None)?;
        let entry = SavedAddress {
            name: name.to_string(),
            public_key,
        };
        self.saved.push(entry.clone());
        Ok(entry)
    }

    pub fn update_saved(
        &mut self,
        index: usize,
        name: Option<&str>,
        public_key: Option<&str>,
    ) -> Result<SavedAddress> {
        let current = self
            .saved
            .get(index)
            .ok_or(WalletError::SavedAddressNotFound)?;
        let name = name.unwrap_or(&current.name).to_string();
        let public_key = match public_key {
            Some(pk) => keys::checksum_address(pk)?,
            None => current.public_key.clone(),
        };
        self.check_saved_unique(&name, &public_key, Some(index))?;

        let entry = SavedAddress { name, public_key };
        self.saved[index] = entry.clone();
        Ok(entry)
    }

    pub fn delete_saved(&mut self, name: &str, public_key: &str) -> Result<()> {
        let position = self
            .saved
            .iter()
            .position(|s| s.name == name && s.public_key.eq_ignore_ascii_case(public_key.trim()))
            .ok_or(WalletError::SavedAddressNotFound)?;
        self.saved.remove(position);
        Ok(())
    }

    // ── Network ──

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn set_network(&mut self, network: Network) {
        self.network = network;
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            accounts: self.accounts.iter().map(Account::to_public).collect(),
            selected: self.selected().map(Account::to_public),
            saved: self.saved.clone(),
            network: self.network.clone(),
            chain_id: self.network.chain_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ANVIL_ADDR: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn seeded(n: usize) -> AccountRegistry {
        let mut r = AccountRegistry::default();
        for _ in 0..n {
            let name = r.default_account_name();
            r.create_from_seed(&name, PHRASE).unwrap();
        }
        r
    }

    #[test]
    fn test_seed_accounts_are_sequential() {
        let r = seeded(3);
        let nums: Vec<i64> = r.accounts().iter().map(|a| a.derived_account_num).collect();
        assert_eq!(nums, vec![0, 1, 2]);
        assert_eq!(r.accounts()[0].name, "Account 1");
        assert_eq!(r.next_seed_index(), 3);
    }

    #[test]
    fn test_derivation_failure_rolls_back_counter() {
        let mut r = seeded(1);
        let err = r.create_from_seed("bad", "").unwrap_err();
        assert!(matches!(err, WalletError::KeypairDerivationFailed));
        assert_eq!(r.next_seed_index(), 1);
        assert_eq!(r.accounts().len(), 1);
    }

    #[test]
    fn test_delete_last_account_fails() {
        let mut r = seeded(1);
        let only = r.accounts()[0].clone();
        assert!(matches!(
            r.delete_account(&only.name, &only.public_key),
            Err(WalletError::LastAccountUndeletable)
        ));
        assert_eq!(r.accounts().len(), 1);
    }

    #[test]
    fn test_delete_keeps_order_of_others() {
        let mut r = seeded(3);
        let before: Vec<String> = r.accounts().iter().map(|a| a.name.clone()).collect();
        let middle = r.accounts()[1].clone();
        r.delete_account(&middle.name, &middle.public_key).unwrap();
        let after: Vec<String> = r.accounts().iter().map(|a| a.name.clone()).collect();
        assert_eq!(after, vec![before[0].clone(), before[2].clone()]);
    }

    #[test]
    fn test_delete_unknown_account() {
        let mut r = seeded(2);
        assert!(matches!(
            r.delete_account("ghost", ANVIL_ADDR),
            Err(WalletError::AccountNotFound)
        ));
    }

    #[test]
    fn test_next_index_is_max_plus_one_after_delete() {
        let mut r = seeded(3);
        let top = r.accounts()[2].clone();
        r.delete_account(&top.name, &top.public_key).unwrap();
        assert_eq!(r.next_seed_index(), 2);
        let next = r.create_from_seed("again", PHRASE).unwrap();
        assert_eq!(next.derived_account_num, 2);

        let mut r = seeded(3);
        let low = r.accounts()[0].clone();
        r.delete_account(&low.name, &low.public_key).unwrap();
        let next = r.create_from_seed("next", PHRASE).unwrap();
        assert_eq!(next.derived_account_num, 3);
    }

    #[test]
    fn test_import_rejects_duplicate_key() {
        let mut r = seeded(1);
        let imported = r.import_from_private_key("Imported", ANVIL_KEY).unwrap();
        assert_eq!(imported.public_key, ANVIL_ADDR);
        assert_eq!(imported.derived_account_num, IMPORTED_ACCOUNT_NUM);
        assert!(matches!(
            r.import_from_private_key("Again", ANVIL_KEY.trim_start_matches("0x")),
            Err(WalletError::DuplicateAccount)
        ));

        let seed_key = r.accounts()[0].private_key.clone().unwrap();
        assert!(matches!(
            r.import_from_private_key("Seed copy", seed_key.expose()),
            Err(WalletError::DuplicateAccount)
        ));
    }

    #[test]
    fn test_import_does_not_move_seed_counter() {
        let mut r = seeded(2);
        r.import_from_private_key("Imported", ANVIL_KEY).unwrap();
        r.add_watch_only("Watch", ANVIL_ADDR).unwrap();
        r.recompute_next_index();
        assert_eq!(r.next_seed_index(), 2);
    }

    #[test]
    fn test_watch_only_has_no_key() {
        let mut r = seeded(1);
        let w = r
            .add_watch_only("Watch", "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266")
            .unwrap();
        assert_eq!(w.public_key, ANVIL_ADDR);
        assert!(!w.can_sign());
        assert_eq!(w.kind(), AccountKind::WatchOnly);
    }

    #[test]
    fn test_select_and_fallback() {
        let mut r = seeded(2);
        assert_eq!(r.selected().unwrap().name, "Account 1");
        let second = r.accounts()[1].public_key.clone();
        r.select(&second.to_lowercase()).unwrap();
        assert_eq!(r.selected().unwrap().name, "Account 2");

        assert!(matches!(r.select(ANVIL_ADDR), Err(WalletError::NotInRegistry)));

        let gone = r.accounts()[1].clone();
        r.delete_account(&gone.name, &gone.public_key).unwrap();
        assert_eq!(r.selected().unwrap().name, "Account 1");
    }

    #[test]
    fn test_saved_address_uniqueness() {
        let mut r = AccountRegistry::default();
        r.add_saved("Alice", ANVIL_ADDR).unwrap();
        assert!(matches!(
            r.add_saved("Alice", "0x0000000000000000000000000000000000000001"),
            Err(WalletError::DuplicateSavedAddress("name"))
        ));
        assert!(matches!(
            r.add_saved("Bob", &ANVIL_ADDR.to_lowercase()),
            Err(WalletError::DuplicateSavedAddress("public key"))
        ));
    }

    #[test]
    fn test_saved_update_and_delete() {
        let mut r = AccountRegistry::default();
        r.add_saved("Alice", ANVIL_ADDR).unwrap();
        r.add_saved("Bob", "0x0000000000000000000000000000000000000001")
            .unwrap();

        let renamed = r.update_saved(0, Some("Alicia"), None).unwrap();
        assert_eq!(renamed.public_key, ANVIL_ADDR);
        assert!(r.update_saved(0, Some("Bob"), None).is_err());
        assert!(r.update_saved(0, Some("Alicia"), None).is_ok());
        assert!(matches!(
            r.update_saved(9, Some("x"), None),
            Err(WalletError::SavedAddressNotFound)
        ));

        r.delete_saved("Alicia", ANVIL_ADDR).unwrap();
        assert_eq!(r.saved().len(), 1);
        assert!(r.delete_saved("Alicia", ANVIL_ADDR).is_err());
    }

    #[test]
    fn test_seal_and_open_roundtrip_skips_bad_blobs() {
        let key = SensitiveBytes32::new([9u8; 32]);
        let mut r = seeded(2);
        r.add_watch_only("Watch", ANVIL_ADDR).unwrap();
        r.add_saved("Alice", ANVIL_ADDR).unwrap();

        let mut sealed = r.seal_accounts(&key).unwrap();
        sealed.push(PersistedAccount {
            name: "Broken".into(),
            account: "00".repeat(48),
        });
        let saved = r.seal_saved(&key).unwrap();

        let opened = AccountRegistry::open(sealed, saved, Network::SepoliaTestnet, &key);
        assert_eq!(opened.accounts().len(), 3);
        assert_eq!(opened.accounts(), r.accounts());
        assert_eq!(opened.saved(), r.saved());
        assert_eq!(opened.next_seed_index(), 2);
        assert!(opened.has_unreadable_records());
        assert_eq!(opened.seal_accounts(&key).unwrap().len(), 4);
    }

    #[test]
    fn test_snapshot_has_no_secrets() {
        let r = seeded(1);
        let json = serde_json::to_string(&r.snapshot()).unwrap();
        let key = r.accounts()[0].private_key.clone().unwrap();
        assert!(!json.contains(key.expose().trim_start_matches("0x")));
        assert!(json.contains("\"chainId\":\"0x1\""));
    }
}
