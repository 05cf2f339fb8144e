//! Domain identifiers (strongly-typed IDs).
//!
//! # 識別子
//! - **PlugId**: plugs テーブルの serial 主キー
//! - **AssetRef**: オブジェクトストア上のキー（plug ごとに一意）
//! - **UserId**: ディレクトリ上のユーザー識別子（uid）
//!
//! どれも newtype にしておくことで、`i32` や `String` を取り違えるミスを
//! コンパイル時に防ぎます。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of an asset key (`plugs.s3id VARCHAR(64)`).
pub const ASSET_REF_MAX_LEN: usize = 64;

/// Maximum length of an owner identity (`plugs.owner VARCHAR(32)`).
pub const OWNER_MAX_LEN: usize = 32;

/// Serial primary key of a plug row.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlugId(i32);

impl PlugId {
    pub fn new(value: i32) -> Self {
        Self(value)
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for PlugId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for PlugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque key of the stored image object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Key for a freshly uploaded asset: `YYYY/MM/DD/HHMMSS-<owner>-<filename>`.
    ///
    /// Path separators and control characters in the owner and filename are
    /// replaced, and the filename is shortened so the whole key fits
    /// [`ASSET_REF_MAX_LEN`].
    pub fn for_upload(at: DateTime<Utc>, owner: &UserId, filename: &str) -> Self {
        let owner: String = owner.as_str().chars().map(key_safe).collect();
        let prefix = format!("{}-{}-", at.format("%Y/%m/%d/%H%M%S"), owner);
        let budget = ASSET_REF_MAX_LEN.saturating_sub(prefix.len());
        let name: String = filename
            .chars()
            .map(key_safe)
            .scan(0usize, |used, c| {
                *used += c.len_utf8();
                (*used <= budget).then_some(c)
            })
            .collect();
        Self(prefix + &name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn key_safe(c: char) -> char {
    if c == '/' || c == '\\' || c.is_control() { '_' } else { c }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// User identity as known to the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
