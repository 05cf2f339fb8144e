//! Ledger - クレジット残高の確認と引き落とし
//!
//! # debit のフロー
//! 1. ユーザー単位のロックを取る（プロセス内の直列化）
//! 2. ディレクトリから残高を読む
//! 3. `balance - amount < 0` なら書き込みせず `false`
//! 4. 読んだ値を条件に swap（他プロセスが先に書いていたら 2 からやり直し）

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::guard::ConnectionGuard;
use super::locks::KeyedMutex;
use crate::domain::{Backend, PlugError, Result, UserId};
use crate::ports::CreditDirectory;

pub struct Ledger {
    directory: Arc<ConnectionGuard<dyn CreditDirectory>>,
    admin_groups: Vec<String>,
    max_attempts: u32,
    locks: KeyedMutex<UserId>,
}

impl Ledger {
    pub fn new(
        directory: Arc<ConnectionGuard<dyn CreditDirectory>>,
        admin_groups: Vec<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            directory,
            admin_groups,
            max_attempts: max_attempts.max(1),
            locks: KeyedMutex::new(),
        }
    }

    /// Spend `amount` credits. `Ok(false)` means insufficient funds; nothing was written.
    pub async fn debit(&self, user: &UserId, amount: i64) -> Result<bool> {
        if amount < 0 {
            return Err(PlugError::InvalidAmount(amount));
        }
        let _serial = self.locks.lock(user).await;

        for attempt in 1..=self.max_attempts {
            let directory = self.directory.ensure_alive().await?;
            let raw = directory
                .read_balance(user)
                .await
                .map_err(PlugError::backend(Backend::Directory))?
                .ok_or_else(|| PlugError::UnknownUser(user.clone()))?;
            let balance = parse_balance(user, &raw)?;

            let Some(new_balance) = balance.checked_sub(amount).filter(|b| *b >= 0) else {
                info!(user = %user, balance, amount, "insufficient credits");
                return Ok(false);
            };

            let swapped = directory
                .swap_balance(user, &raw, &new_balance.to_string())
                .await
                .map_err(PlugError::backend(Backend::Directory))?;
            if swapped {
                info!(user = %user, balance = new_balance, amount, "credits debited");
                return Ok(true);
            }
            debug!(user = %user, attempt, "balance changed underneath, retrying");
        }

        warn!(user = %user, attempts = self.max_attempts, "debit abandoned");
        Err(PlugError::Contention {
            attempts: self.max_attempts,
        })
    }

    /// Current balance, read fresh from the directory.
    pub async fn balance(&self, user: &UserId) -> Result<i64> {
        let directory = self.directory.ensure_alive().await?;
        let raw = directory
            .read_balance(user)
            .await
            .map_err(PlugError::backend(Backend::Directory))?
            .ok_or_else(|| PlugError::UnknownUser(user.clone()))?;
        parse_balance(user, &raw)
    }

    /// Member of any configured administrator group.
    pub async fn is_admin(&self, user: &UserId) -> Result<bool> {
        let directory = self.directory.ensure_alive().await?;
        directory
            .is_member(user, &self.admin_groups)
            .await
            .map_err(PlugError::backend(Backend::Directory))
    }
}

fn parse_balance(user: &UserId, raw: &str) -> Result<i64> {
    raw.trim().parse::<i64>().map_err(|e| {
        warn!(user = %user, raw, "unparsable balance attribute");
        PlugError::DataCorruption(format!("balance of {user} is {raw:?}: {e}"))
    })
}
