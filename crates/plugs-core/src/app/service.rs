//! PlugService - 利用者向けの操作をまとめた窓口
//!
//! # 操作
//! - **serve_next**: 次の plug を選び、署名付き URL と一緒に返す（traffic ログを残す）
//! - **submit**: クレジットを引き落としてアップロードを受け付ける（未承認で登録）
//! - **pending_review / set_approval_list / delete_plug**: 管理者のみ
//! - **counts**: カタログの集計
//!
//! 監査ログの書き込み失敗は警告を出すだけで、操作そのものは失敗させません。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::assets::{AssetStore, PresignedUrl};
use super::ledger::Ledger;
use super::repository::PlugRepository;
use super::selection::SelectionEngine;
use crate::domain::{
    AssetRef, AuditEntry, NewPlug, OWNER_MAX_LEN, Plug, PlugError, PlugId, PlugKind, Result,
    Severity, UserId,
};
use crate::observability::CatalogCounts;
use crate::ports::Clock;

/// A plug picked for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Served {
    pub plug: Plug,
    pub url: PresignedUrl,
}

/// An image submitted for a sponsored slot.
#[derive(Debug, Clone)]
pub struct Upload {
    pub owner: UserId,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub credits: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Submission {
    /// Stored and waiting for review.
    Accepted { plug: Plug, preview: PresignedUrl },
    /// Balance too low; nothing was stored or charged.
    InsufficientCredit,
}

/// A sponsored plug as shown on the review page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPlug {
    pub plug: Plug,
    pub preview: PresignedUrl,
}

pub struct PlugService {
    ledger: Arc<Ledger>,
    repository: Arc<PlugRepository>,
    assets: Arc<AssetStore>,
    engine: SelectionEngine,
    clock: Arc<dyn Clock>,
    views_per_credit: i32,
}

impl PlugService {
    pub fn new(
        ledger: Arc<Ledger>,
        repository: Arc<PlugRepository>,
        assets: Arc<AssetStore>,
        engine: SelectionEngine,
        clock: Arc<dyn Clock>,
        views_per_credit: i32,
    ) -> Self {
        Self {
            ledger,
            repository,
            assets,
            engine,
            clock,
            views_per_credit,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn repository(&self) -> &PlugRepository {
        &self.repository
    }

    /// Pick the next plug and sign a short-lived URL for it.
    pub async fn serve_next(&self, viewer: Option<&UserId>, referer: &str) -> Result<Served> {
        let plug = self.engine.select().await?;
        let url = self.assets.presign(&plug.asset_ref).await?;
        debug!(plug_id = %plug.id, viewer = ?viewer.map(UserId::as_str), referer, "plug served");
        self.audit(Severity::Traffic, referer).await;
        Ok(Served { plug, url })
    }

    /// Charge `credits` and store the upload as an unapproved plug.
    pub async fn submit(&self, upload: Upload) -> Result<Submission> {
        let views = self.views_for(upload.credits)?;
        check_upload(&upload)?;

        match self.ledger.debit(&upload.owner, upload.credits).await {
            Ok(true) => {}
            Ok(false) => return Ok(Submission::InsufficientCredit),
            Err(e) => {
                if is_backend_failure(&e) {
                    self.audit(Severity::Error, &format!("credit debit failed: {e}"))
                        .await;
                }
                return Err(e);
            }
        }

        let owner = upload.owner.clone();
        let credits = upload.credits;
        let plug = match self.store_upload(upload, views).await {
            Ok(plug) => plug,
            Err(e) => {
                // credits stay spent; leave a trail for a manual refund
                self.audit(
                    Severity::Error,
                    &format!("{owner} was charged {credits} credits but the upload failed: {e}"),
                )
                .await;
                return Err(e);
            }
        };
        self.audit(
            Severity::Notice,
            &format!(
                "{} spent {} credits on plug {} ({} views)",
                plug.owner, credits, plug.id, views
            ),
        )
        .await;

        let preview = self.assets.presign(&plug.asset_ref).await?;
        Ok(Submission::Accepted { plug, preview })
    }

    /// Every sponsored plug, approved or not, with a preview URL.
    pub async fn pending_review(&self, actor: &UserId) -> Result<Vec<PendingPlug>> {
        self.require_admin(actor).await?;
        let plugs = self.repository.fetch_pending().await?;
        let mut pending = Vec::with_capacity(plugs.len());
        for plug in plugs {
            let preview = self.assets.presign(&plug.asset_ref).await?;
            pending.push(PendingPlug { plug, preview });
        }
        Ok(pending)
    }

    /// Replace the approval set with exactly `ids`.
    pub async fn set_approval_list(&self, actor: &UserId, ids: &[PlugId]) -> Result<()> {
        self.require_admin(actor).await?;
        let listed: Vec<String> = ids.iter().map(ToString::to_string).collect();
        self.audit(
            Severity::Notice,
            &format!("{actor} approved plugs [{}]", listed.join(", ")),
        )
        .await;
        self.repository.set_approval_set(ids).await
    }

    pub async fn delete_plug(&self, actor: &UserId, id: PlugId) -> Result<()> {
        self.require_admin(actor).await?;
        let plug = self.repository.fetch_by_id(id).await?;
        if !self.repository.delete(&plug).await? {
            // someone else removed it between the read and the delete
            return Err(PlugError::NotFound(id));
        }
        self.audit(Severity::Notice, &format!("{actor} deleted plug {id}"))
            .await;
        Ok(())
    }

    pub async fn counts(&self) -> Result<CatalogCounts> {
        let approved = self.repository.fetch_approved().await?;
        let sponsored = self.repository.fetch_pending().await?;

        let mut counts = CatalogCounts::default();
        for plug in &approved {
            match plug.kind() {
                PlugKind::House => counts.house += 1,
                PlugKind::Sponsored => {
                    counts.sponsored += 1;
                    counts.views_outstanding += i64::from(plug.views_remaining);
                }
            }
        }
        counts.unapproved = sponsored.iter().filter(|p| !p.approved).count();
        Ok(counts)
    }

    fn views_for(&self, credits: i64) -> Result<i32> {
        if credits <= 0 {
            return Err(PlugError::InvalidAmount(credits));
        }
        credits
            .checked_mul(i64::from(self.views_per_credit))
            .and_then(|views| i32::try_from(views).ok())
            .ok_or(PlugError::InvalidAmount(credits))
    }

    async fn require_admin(&self, actor: &UserId) -> Result<()> {
        if self.ledger.is_admin(actor).await? {
            Ok(())
        } else {
            warn!(user = %actor, "administrative action refused");
            Err(PlugError::Forbidden(actor.clone()))
        }
    }

    async fn store_upload(&self, upload: Upload, views: i32) -> Result<Plug> {
        let asset_ref = AssetRef::for_upload(self.clock.now(), &upload.owner, &upload.filename);
        self.assets
            .put(&asset_ref, upload.bytes, &upload.content_type)
            .await?;
        self.repository
            .insert_unapproved(NewPlug::new(asset_ref, upload.owner, views))
            .await
    }

    async fn audit(&self, severity: Severity, message: &str) {
        let entry = AuditEntry::new(self.clock.now(), severity, message);
        match self.repository.append_log(&entry).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                error!(error = %e, severity = severity.code(), "audit log unreachable");
            }
            Err(e) => warn!(error = %e, severity = severity.code(), "audit entry dropped"),
        }
        match severity {
            Severity::Notice => info!(message, "audit"),
            Severity::Error => warn!(message, "audit"),
            Severity::Traffic => {}
        }
    }
}

fn is_backend_failure(e: &PlugError) -> bool {
    matches!(
        e,
        PlugError::Backend { .. } | PlugError::Connectivity { .. } | PlugError::DataCorruption(_)
    )
}

fn check_upload(upload: &Upload) -> Result<()> {
    let owner = upload.owner.as_str();
    if owner.is_empty() || owner.len() > OWNER_MAX_LEN {
        return Err(PlugError::InvalidUpload(format!(
            "owner must be 1..={OWNER_MAX_LEN} bytes"
        )));
    }
    if upload.filename.trim().is_empty() {
        return Err(PlugError::InvalidUpload("empty filename".into()));
    }
    if upload.bytes.is_empty() {
        return Err(PlugError::InvalidUpload("empty image".into()));
    }
    Ok(())
}
