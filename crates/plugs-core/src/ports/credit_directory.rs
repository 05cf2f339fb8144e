//! CreditDirectory port - ディレクトリサービス（LDAP）
//!
//! クレジット残高はユーザーエントリの整数属性として保存されています。
//! 値は文字列のまま扱い、解釈は `Ledger` が行います。

use async_trait::async_trait;

use super::Liveness;
use crate::domain::{BackendError, UserId};

#[async_trait]
pub trait CreditDirectory: Liveness {
    /// Raw balance attribute, `None` when the user has no entry.
    async fn read_balance(&self, user: &UserId) -> Result<Option<String>, BackendError>;

    /// Replace the balance only if it still equals `expected`.
    ///
    /// Maps onto a modify with delete-value `expected` plus add-value `new`,
    /// which the directory rejects when the old value is no longer present.
    async fn swap_balance(
        &self,
        user: &UserId,
        expected: &str,
        new: &str,
    ) -> Result<bool, BackendError>;

    /// Whether the user belongs to any of `groups`.
    async fn is_member(&self, user: &UserId, groups: &[String]) -> Result<bool, BackendError>;
}
