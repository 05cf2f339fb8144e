//! SelectionEngine - 次に表示する plug の選択と表示回数の管理
//!
//! # フロー（1 回の呼び出し）
//! 1. **Fetch**: 承認済み plug を全件取得
//! 2. **Partition**: house（views < 0）と sponsored（views >= 0）に分ける。
//!    views == 0 の承認済み plug はここで削除し、不正な行は警告して除外
//! 3. **Weighted choice**: [0,100) を引き、上位 `house_percent` に入れば house から、
//!    それ以外は sponsored から一様に選ぶ。選んだ側が空ならもう一方を使う
//! 4. **Decrement**: sponsored なら plug 単位のロック下で最新値を読み直し、
//!    compare-and-set で 1 減らす
//! 5. **Retire**: 0 になったら行とアセットを削除し、1 からやり直す
//! 6. 減算後の値を持った plug を返す
//!
//! 他の呼び出しとの競合（stale）によるやり直しだけを `max_restarts` で打ち切ります。
//! retire によるやり直しはカタログが必ず縮むので数えません。

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::locks::KeyedMutex;
use super::repository::PlugRepository;
use crate::domain::{Plug, PlugError, PlugId, PlugKind, Result};
use crate::ports::Dice;

/// Approved plugs split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pools {
    pub house: Vec<Plug>,
    pub sponsored: Vec<Plug>,
    /// Approved sponsored plugs already at zero; must be retired.
    pub exhausted: Vec<Plug>,
    /// Rows skipped because they break catalog invariants.
    pub skipped: usize,
}

impl Pools {
    pub fn partition(rows: Vec<Plug>) -> Self {
        let mut pools = Pools::default();
        let mut seen = HashSet::new();
        for plug in rows {
            if let Err(reason) = check_row(&plug, &mut seen) {
                warn!(plug_id = %plug.id, reason, "skipping corrupt plug row");
                pools.skipped += 1;
                continue;
            }
            match plug.kind() {
                PlugKind::House => pools.house.push(plug),
                PlugKind::Sponsored if plug.is_exhausted() => pools.exhausted.push(plug),
                PlugKind::Sponsored => pools.sponsored.push(plug),
            }
        }
        pools
    }

    pub fn is_empty(&self) -> bool {
        self.house.is_empty() && self.sponsored.is_empty()
    }
}

fn check_row(plug: &Plug, seen: &mut HashSet<PlugId>) -> Result<(), &'static str> {
    if !plug.approved {
        return Err("unapproved row in approved snapshot");
    }
    if plug.asset_ref.is_empty() {
        return Err("empty asset reference");
    }
    if !seen.insert(plug.id) {
        return Err("duplicate id");
    }
    Ok(())
}

/// The house/sponsored split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    house_percent: u8,
}

impl RotationPolicy {
    pub fn new(house_percent: u8) -> Self {
        Self {
            house_percent: house_percent.min(100),
        }
    }

    pub fn house_percent(&self) -> u8 {
        self.house_percent
    }

    /// Whether a draw in `[0,100)` lands in the house slice.
    pub fn is_house_draw(&self, draw: usize) -> bool {
        draw >= 100 - usize::from(self.house_percent)
    }

    /// Pick one plug, or `None` when both pools are empty.
    pub fn choose<'a>(&self, pools: &'a Pools, dice: &dyn Dice) -> Option<&'a Plug> {
        if pools.is_empty() {
            return None;
        }
        let want_house = self.is_house_draw(dice.roll(100));
        let pool = match (want_house, pools.house.is_empty(), pools.sponsored.is_empty()) {
            (true, false, _) | (_, false, true) => &pools.house,
            _ => &pools.sponsored,
        };
        pool.get(dice.roll(pool.len()))
    }
}

enum Consumed {
    Served(Plug),
    Retired,
    /// Gone, unapproved or changed by someone else since the snapshot.
    Stale,
}

pub struct SelectionEngine {
    repository: Arc<PlugRepository>,
    policy: RotationPolicy,
    dice: Arc<dyn Dice>,
    max_restarts: u32,
    locks: KeyedMutex<PlugId>,
}

impl SelectionEngine {
    pub fn new(
        repository: Arc<PlugRepository>,
        policy: RotationPolicy,
        dice: Arc<dyn Dice>,
        max_restarts: u32,
    ) -> Self {
        Self {
            repository,
            policy,
            dice,
            max_restarts,
            locks: KeyedMutex::new(),
        }
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Choose the next plug, charge one view, retire it when exhausted.
    ///
    /// The returned plug carries the post-decrement counter.
    pub async fn select(&self) -> Result<Plug> {
        // retirements shrink the catalog; only stale reads count against the cap
        let mut stale = 0u32;
        loop {
            let pools = Pools::partition(self.repository.fetch_approved().await?);
            for plug in &pools.exhausted {
                self.retire(plug).await?;
            }

            let Some(candidate) = self.policy.choose(&pools, self.dice.as_ref()) else {
                debug!(stale, "catalog is empty");
                return Err(PlugError::EmptyCatalog);
            };
            if candidate.is_house() {
                debug!(plug_id = %candidate.id, "serving house plug");
                return Ok(candidate.clone());
            }

            match self.consume(candidate.id).await? {
                Consumed::Served(plug) => {
                    debug!(plug_id = %plug.id, views = plug.views_remaining, "serving sponsored plug");
                    return Ok(plug);
                }
                Consumed::Retired => {
                    debug!(plug_id = %candidate.id, "retired, restarting selection");
                }
                Consumed::Stale => {
                    stale += 1;
                    if stale > self.max_restarts {
                        warn!(attempts = stale, "selection abandoned");
                        return Err(PlugError::Contention { attempts: stale });
                    }
                    debug!(plug_id = %candidate.id, stale, "stale snapshot, restarting selection");
                }
            }
        }
    }

    /// Charge one view to a sponsored plug under its lock.
    async fn consume(&self, id: PlugId) -> Result<Consumed> {
        let _serial = self.locks.lock(&id).await;

        let fresh = match self.repository.fetch_by_id(id).await {
            Ok(plug) => plug,
            Err(PlugError::NotFound(_)) => return Ok(Consumed::Stale),
            Err(e) => return Err(e),
        };
        if !fresh.approved || fresh.is_house() {
            return Ok(Consumed::Stale);
        }
        if fresh.is_exhausted() {
            self.retire(&fresh).await?;
            return Ok(Consumed::Retired);
        }

        let next = fresh.views_remaining - 1;
        if !self
            .repository
            .compare_and_set_views(id, fresh.views_remaining, next)
            .await?
        {
            return Ok(Consumed::Stale);
        }
        if next == 0 {
            self.retire(&fresh).await?;
            return Ok(Consumed::Retired);
        }
        Ok(Consumed::Served(Plug {
            views_remaining: next,
            ..fresh
        }))
    }

    async fn retire(&self, plug: &Plug) -> Result<()> {
        if self.repository.delete(plug).await? {
            info!(plug_id = %plug.id, asset_ref = %plug.asset_ref, owner = %plug.owner, "plug exhausted and retired");
        }
        Ok(())
    }
}
