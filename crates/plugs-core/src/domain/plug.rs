//! Plug - 広告レコード
//!
//! `views_remaining` の符号で種類が決まります:
//! - `< 0`: house plug（無制限、減算も削除もされない）
//! - `>= 0`: sponsored plug（有限の表示回数、0 になったら削除）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AssetRef, PlugId, UserId};

/// Views value conventionally used for house plugs.
pub const UNLIMITED_VIEWS: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlugKind {
    /// Rotation filler with unlimited views.
    House,
    /// Paid for with credits, finite view budget.
    Sponsored,
}

/// A stored plug record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plug {
    pub id: PlugId,
    pub asset_ref: AssetRef,
    pub owner: UserId,
    pub views_remaining: i32,
    pub approved: bool,
}

impl Plug {
    pub fn kind(&self) -> PlugKind {
        if self.views_remaining < 0 {
            PlugKind::House
        } else {
            PlugKind::Sponsored
        }
    }

    pub fn is_house(&self) -> bool {
        self.kind() == PlugKind::House
    }

    /// Sponsored plug with no views left.
    pub fn is_exhausted(&self) -> bool {
        self.views_remaining == 0
    }
}

/// A plug that has not been persisted yet (no id, always unapproved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlug {
    pub asset_ref: AssetRef,
    pub owner: UserId,
    pub views_remaining: i32,
}

impl NewPlug {
    pub fn new(asset_ref: AssetRef, owner: UserId, views_remaining: i32) -> Self {
        Self {
            asset_ref,
            owner,
            views_remaining,
        }
    }

    /// House plug with unlimited views.
    pub fn house(asset_ref: AssetRef, owner: UserId) -> Self {
        Self::new(asset_ref, owner, UNLIMITED_VIEWS)
    }

    pub fn into_plug(self, id: PlugId, approved: bool) -> Plug {
        Plug {
            id,
            asset_ref: self.asset_ref,
            owner: self.owner,
            views_remaining: self.views_remaining,
            approved,
        }
    }
}

/// Severity codes stored in the `logs` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Notice,
    Traffic,
}

impl Severity {
    pub fn code(self) -> i32 {
        match self {
            Severity::Error => 0,
            Severity::Notice => 1,
            Severity::Traffic => 13,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Severity::Error),
            1 => Some(Severity::Notice),
            13 => Some(Severity::Traffic),
            _ => None,
        }
    }
}

/// One row of the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub time: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

impl AuditEntry {
    pub fn new(time: DateTime<Utc>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            time,
            severity,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn plug(views: i32) -> Plug {
        NewPlug::new(AssetRef::new("a"), UserId::new("u"), views).into_plug(PlugId::new(1), true)
    }

    #[rstest]
    #[case(-5, PlugKind::House)]
    #[case(-1, PlugKind::House)]
    #[case(0, PlugKind::Sponsored)]
    #[case(1000, PlugKind::Sponsored)]
    fn kind_follows_sign_of_views(#[case] views: i32, #[case] expected: PlugKind) {
        assert_eq!(plug(views).kind(), expected);
    }

    #[test]
    fn only_zero_is_exhausted() {
        assert!(plug(0).is_exhausted());
        assert!(!plug(-1).is_exhausted());
        assert!(!plug(1).is_exhausted());
    }

    #[test]
    fn severity_codes_roundtrip() {
        for s in [Severity::Error, Severity::Notice, Severity::Traffic] {
            assert_eq!(Severity::from_code(s.code()), Some(s));
        }
        assert_eq!(Severity::from_code(7), None);
    }
}
