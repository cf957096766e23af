//! Player identities and wallet balances.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use aviator_types::{ConnectionId, PlayerDisplay};
use serde::Deserialize;
use thiserror::Error;

use crate::lock;

#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("Insufficient balance")]
    InsufficientBalance,
}

/// Who a connection is playing as.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub display: PlayerDisplay,
    pub authenticated: bool,
}

impl Identity {
    pub fn user_id(&self) -> &str {
        &self.display.user_id
    }
}

/// Authentication and balances. Calls are synchronous and may be made while
/// the engine lock is held, so implementations must not call back into the table.
pub trait IdentityService: Send + Sync {
    /// Resolve a token. Unknown or missing tokens get a demo identity.
    fn authenticate(&self, connection: ConnectionId, token: Option<&str>) -> Identity;

    fn balance(&self, user_id: &str) -> Option<f64>;

    /// Apply `delta` and return the new balance. Debits never overdraw.
    fn adjust_balance(&self, user_id: &str, delta: f64) -> Result<f64, IdentityError>;

    /// The connection playing as `identity` has gone away.
    fn release(&self, _identity: &Identity) {}
}

/// An entry of the accounts file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    pub token: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    pub balance: f64,
}

pub fn load_accounts(path: &Path) -> anyhow::Result<Vec<AccountEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read accounts file {}", path.display()))?;
    serde_json::from_str(&raw).context("parse accounts file")
}

struct Account {
    display: PlayerDisplay,
    balance: f64,
    demo: bool,
}

#[derive(Default)]
struct Wallets {
    tokens: HashMap<String, String>,
    accounts: HashMap<String, Account>,
}

/// In-process identity service backed by a fixed account list.
pub struct MemoryIdentityService {
    demo_balance: f64,
    wallets: Mutex<Wallets>,
}

impl MemoryIdentityService {
    pub fn new(demo_balance: f64, entries: Vec<AccountEntry>) -> Self {
        let mut wallets = Wallets::default();
        for entry in entries {
            wallets
                .tokens
                .insert(entry.token, entry.user_id.clone());
            wallets.accounts.insert(
                entry.user_id.clone(),
                Account {
                    display: PlayerDisplay {
                        user_id: entry.user_id,
                        name: entry.name,
                        avatar: entry.avatar,
                    },
                    balance: entry.balance,
                    demo: false,
                },
            );
        }
        Self {
            demo_balance,
            wallets: Mutex::new(wallets),
        }
    }
}

impl IdentityService for MemoryIdentityService {
    fn authenticate(&self, connection: ConnectionId, token: Option<&str>) -> Identity {
        let mut wallets = lock(&self.wallets);
        let known = token
            .and_then(|token| wallets.tokens.get(token))
            .and_then(|user_id| wallets.accounts.get(user_id));
        if let Some(account) = known {
            return Identity {
                display: account.display.clone(),
                authenticated: true,
            };
        }

        let display = PlayerDisplay {
            user_id: format!("demo-{}", connection.0),
            name: format!("Guest {}", connection.0),
            avatar: String::new(),
        };
        wallets
            .accounts
            .entry(display.user_id.clone())
            .or_insert_with(|| Account {
                display: display.clone(),
                balance: self.demo_balance,
                demo: true,
            });
        Identity {
            display,
            authenticated: false,
        }
    }

    fn balance(&self, user_id: &str) -> Option<f64> {
        lock(&self.wallets)
            .accounts
            .get(user_id)
            .map(|account| account.balance)
    }

    fn adjust_balance(&self, user_id: &str, delta: f64) -> Result<f64, IdentityError> {
        let mut wallets = lock(&self.wallets);
        let account = wallets
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| IdentityError::UnknownUser(user_id.to_string()))?;
        let balance = account.balance + delta;
        if balance < 0.0 {
            return Err(IdentityError::InsufficientBalance);
        }
        account.balance = balance;
        Ok(balance)
    }

    fn release(&self, identity: &Identity) {
        let mut wallets = lock(&self.wallets);
        if wallets
            .accounts
            .get(identity.user_id())
            .is_some_and(|account| account.demo)
        {
            wallets.accounts.remove(identity.user_id());
        }
    }
}
