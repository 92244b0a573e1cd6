//! Accounts, wallets, and the ledger that owns them.
//!
//! An [`Account`] owns one or more [`Wallet`]s; the first wallet is the active
//! one. Its [`AccountPolicy`] decides whether wallets are consulted at all:
//! the public market and the ghost counterparty are [`AccountPolicy::Infinite`].

use crate::error::{Error, Result};
use crate::funds::{Asset, Funds};
use crate::types::AccountId;
use log::debug;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Balance map for a single wallet.
#[derive(Debug, Default)]
pub struct Wallet {
    id: String,
    name: String,
    balances: HashMap<Asset, Decimal>,
}

impl Wallet {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            balances: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self, asset: Asset) -> Decimal {
        self.balances.get(&asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Faucet: adds a balance out of thin air. Used to seed simulations.
    pub fn credit(&mut self, asset: Asset, amount: Decimal) {
        *self.balances.entry(asset).or_insert(Decimal::ZERO) += amount;
    }

    /// Drains `funds` into the wallet.
    pub fn deposit(&mut self, funds: &mut Funds) -> Result<()> {
        if funds.is_empty() {
            return Ok(());
        }
        let taken = funds.drain();
        *self.balances.entry(taken.asset()).or_insert(Decimal::ZERO) += taken.amount();
        Ok(())
    }

    /// Withdraws `amount` into a bearer token. On failure the balance is unchanged.
    pub fn withdraw(&mut self, asset: Asset, amount: Decimal) -> Result<Funds> {
        if amount < Decimal::ZERO {
            return Err(Error::InvalidQuantity(format!("cannot withdraw negative amount {}", amount)));
        }
        let available = self.balance(asset);
        if amount > available {
            return Err(Error::InsufficientFunds {
                asset,
                requested: amount,
                available,
            });
        }
        let left = available - amount;
        if left.is_zero() {
            self.balances.remove(&asset);
        } else {
            self.balances.insert(asset, left);
        }
        Ok(Funds::mint(asset, amount))
    }
}

/// How an account treats its wallets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AccountPolicy {
    /// Balances live in the active wallet.
    Real,
    /// Rejects every deposit and withdrawal.
    Null,
    /// Mints on withdrawal and absorbs deposits.
    Infinite,
}

#[derive(Debug)]
pub struct Account {
    id: AccountId,
    name: String,
    policy: AccountPolicy,
    wallets: Vec<Wallet>,
}

impl Account {
    pub fn new(id: AccountId, name: impl Into<String>, policy: AccountPolicy) -> Self {
        Self {
            id,
            name: name.into(),
            policy,
            wallets: Vec::new(),
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> AccountPolicy {
        self.policy
    }

    pub fn add_wallet(&mut self, wallet: Wallet) -> Result<()> {
        if self.wallets.iter().any(|w| w.id == wallet.id) {
            return Err(Error::Configuration(format!(
                "wallet {} already exists on account {}",
                wallet.id, self.id
            )));
        }
        self.wallets.push(wallet);
        Ok(())
    }

    pub fn wallets(&self) -> &[Wallet] {
        &self.wallets
    }

    fn active_wallet(&mut self) -> Result<&mut Wallet> {
        let id = self.id;
        self.wallets.first_mut().ok_or_else(|| Error::WalletRejected {
            account: id,
            reason: "no wallets available".into(),
        })
    }

    /// Balance of the active wallet. Infinite accounts report `Decimal::MAX`.
    pub fn balance(&self, asset: Asset) -> Decimal {
        match self.policy {
            AccountPolicy::Infinite => Decimal::MAX,
            AccountPolicy::Null => Decimal::ZERO,
            AccountPolicy::Real => self.wallets.first().map(|w| w.balance(asset)).unwrap_or(Decimal::ZERO),
        }
    }

    pub fn accepts_deposits(&self) -> bool {
        match self.policy {
            AccountPolicy::Infinite => true,
            AccountPolicy::Null => false,
            AccountPolicy::Real => !self.wallets.is_empty(),
        }
    }

    /// Drains `funds` into the account. A refused deposit leaves `funds` untouched.
    pub fn deposit(&mut self, funds: &mut Funds) -> Result<()> {
        match self.policy {
            AccountPolicy::Infinite => {
                let absorbed = funds.drain();
                debug!("infinite account absorbed account={} asset={} amount={}", self.id, absorbed.asset(), absorbed.amount());
                Ok(())
            }
            AccountPolicy::Null => Err(Error::WalletRejected {
                account: self.id,
                reason: "null wallet does not accept deposits".into(),
            }),
            AccountPolicy::Real => self.active_wallet()?.deposit(funds),
        }
    }

    pub fn withdraw(&mut self, asset: Asset, amount: Decimal) -> Result<Funds> {
        match self.policy {
            AccountPolicy::Infinite => {
                if amount < Decimal::ZERO {
                    return Err(Error::InvalidQuantity(format!("cannot withdraw negative amount {}", amount)));
                }
                Ok(Funds::mint(asset, amount))
            }
            AccountPolicy::Null => Err(Error::WalletRejected {
                account: self.id,
                reason: "null wallet does not allow withdrawals".into(),
            }),
            AccountPolicy::Real => self.active_wallet()?.withdraw(asset, amount),
        }
    }
}

/// Owner of every account in a simulation, addressed by [`AccountId`].
#[derive(Debug, Default)]
pub struct Ledger {
    accounts: HashMap<AccountId, Account>,
    next_id: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an account. Real accounts start with one empty wallet.
    pub fn open(&mut self, name: impl Into<String>, policy: AccountPolicy) -> AccountId {
        self.next_id += 1;
        let id = AccountId(self.next_id);
        let mut account = Account::new(id, name, policy);
        if policy == AccountPolicy::Real {
            account.wallets.push(Wallet::new(format!("{}-primary", id), "primary"));
        }
        self.accounts.insert(id, account);
        id
    }

    pub fn account(&self, id: AccountId) -> Result<&Account> {
        self.accounts.get(&id).ok_or(Error::UnknownAccount(id))
    }

    pub fn account_mut(&mut self, id: AccountId) -> Result<&mut Account> {
        self.accounts.get_mut(&id).ok_or(Error::UnknownAccount(id))
    }

    pub fn balance(&self, id: AccountId, asset: Asset) -> Result<Decimal> {
        Ok(self.account(id)?.balance(asset))
    }

    /// Faucet into the active wallet of a real account.
    pub fn credit(&mut self, id: AccountId, asset: Asset, amount: Decimal) -> Result<()> {
        let account = self.account_mut(id)?;
        if account.policy != AccountPolicy::Real {
            return Err(Error::WalletRejected {
                account: id,
                reason: "only real accounts can be credited".into(),
            });
        }
        account.active_wallet()?.credit(asset, amount);
        Ok(())
    }

    pub fn can_deposit(&self, id: AccountId) -> bool {
        self.accounts.get(&id).map(|a| a.accepts_deposits()).unwrap_or(false)
    }

    pub fn deposit(&mut self, id: AccountId, funds: &mut Funds) -> Result<()> {
        self.account_mut(id)?.deposit(funds)
    }

    pub fn withdraw(&mut self, id: AccountId, asset: Asset, amount: Decimal) -> Result<Funds> {
        self.account_mut(id)?.withdraw(asset, amount)
    }
}
