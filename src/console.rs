//! Administration surface — the typed mutations the console UI performs.
//!
//! The relay core never receives push notifications from the console; it
//! observes these writes through fresh store reads (and the source cache,
//! which every source/reviewer mutation refreshes).
//!
//! Every mutation is gated on the acting reviewer's elevated flag, and the
//! system must never lose its last elevated reviewer: demotion and deletion
//! of that reviewer are rejected with no state change.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::error::{ConsoleError, StoreError};
use crate::pipeline::SourceCache;
use crate::settings::{MediaFilter, SettingsMirror};
use crate::store::{Reviewer, Source, SourcePolicy, Store};
use crate::transport::{ReviewerId, SourceId};

/// CRUD operations over sources, reviewers, and settings.
pub struct ConsoleService {
    store: Arc<dyn Store>,
    settings: Arc<SettingsMirror>,
    cache: Arc<SourceCache>,
}

impl ConsoleService {
    pub fn new(
        store: Arc<dyn Store>,
        settings: Arc<SettingsMirror>,
        cache: Arc<SourceCache>,
    ) -> Self {
        Self {
            store,
            settings,
            cache,
        }
    }

    async fn require_elevated(&self, acting: ReviewerId) -> Result<(), ConsoleError> {
        match self.store.reviewer(acting).await? {
            Some(r) if r.elevated => Ok(()),
            Some(_) => Err(ConsoleError::NotAuthorized(acting)),
            None => Err(ConsoleError::UnknownReviewer(acting)),
        }
    }

    fn validate_chance(chance: u8) -> Result<(), ConsoleError> {
        if (1..=100).contains(&chance) {
            Ok(())
        } else {
            Err(ConsoleError::InvalidChance(chance))
        }
    }

    // ── Sources ─────────────────────────────────────────────────────

    pub async fn add_source(
        &self,
        acting: ReviewerId,
        id: SourceId,
        chance: u8,
        policy: SourcePolicy,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        Self::validate_chance(chance)?;
        self.store
            .insert_source(&Source {
                id,
                policy,
                chance,
                posts_taken: 0,
            })
            .await?;
        self.cache.refresh(&*self.store).await?;
        info!(source = id, policy = policy.label(), chance, "Source added");
        Ok(())
    }

    /// Delete a source, cascading to its deferred deliveries.
    pub async fn delete_source(
        &self,
        acting: ReviewerId,
        id: SourceId,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        self.store.delete_source(id).await?;
        let dropped = self.store.delete_overflow_for_source(id).await?;
        self.cache.refresh(&*self.store).await?;
        info!(source = id, dropped_overflow = dropped, "Source deleted");
        Ok(())
    }

    pub async fn set_source_policy(
        &self,
        acting: ReviewerId,
        id: SourceId,
        policy: SourcePolicy,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        if self.store.source(id).await?.is_none() {
            return Err(ConsoleError::UnknownSource(id));
        }
        self.store.update_source_policy(id, policy).await?;
        self.cache.refresh(&*self.store).await?;
        info!(source = id, policy = policy.label(), "Source policy updated");
        Ok(())
    }

    pub async fn set_source_chance(
        &self,
        acting: ReviewerId,
        id: SourceId,
        chance: u8,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        Self::validate_chance(chance)?;
        if self.store.source(id).await?.is_none() {
            return Err(ConsoleError::UnknownSource(id));
        }
        self.store.update_source_chance(id, chance).await?;
        info!(source = id, chance, "Source chance updated");
        Ok(())
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>, ConsoleError> {
        Ok(self.store.sources().await?)
    }

    // ── Reviewers ───────────────────────────────────────────────────

    pub async fn add_reviewer(
        &self,
        acting: ReviewerId,
        id: ReviewerId,
        elevated: bool,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        self.store
            .insert_reviewer(&Reviewer {
                id,
                menu_cursor: None,
                subscribed: false,
                elevated,
            })
            .await?;
        info!(reviewer = id, elevated, "Reviewer added");
        Ok(())
    }

    pub async fn delete_reviewer(
        &self,
        acting: ReviewerId,
        id: ReviewerId,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        let Some(target) = self.store.reviewer(id).await? else {
            return Err(ConsoleError::UnknownReviewer(id));
        };
        if target.elevated && self.elevated_count().await? <= 1 {
            return Err(ConsoleError::LastElevatedReviewer);
        }
        self.store.delete_reviewer(id).await?;
        info!(reviewer = id, "Reviewer deleted");
        Ok(())
    }

    pub async fn set_subscribed(
        &self,
        acting: ReviewerId,
        id: ReviewerId,
        subscribed: bool,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        if self.store.reviewer(id).await?.is_none() {
            return Err(ConsoleError::UnknownReviewer(id));
        }
        self.store.update_subscribed(id, subscribed).await?;
        info!(reviewer = id, subscribed, "Reviewer subscription updated");
        Ok(())
    }

    pub async fn set_elevated(
        &self,
        acting: ReviewerId,
        id: ReviewerId,
        elevated: bool,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        let Some(target) = self.store.reviewer(id).await? else {
            return Err(ConsoleError::UnknownReviewer(id));
        };
        if target.elevated && !elevated && self.elevated_count().await? <= 1 {
            return Err(ConsoleError::LastElevatedReviewer);
        }
        self.store.update_elevated(id, elevated).await?;
        info!(reviewer = id, elevated, "Reviewer privilege updated");
        Ok(())
    }

    /// The console owns each reviewer's interaction cursor; no elevation
    /// needed to move one's own.
    pub async fn set_menu_cursor(
        &self,
        id: ReviewerId,
        cursor: Option<i64>,
    ) -> Result<(), ConsoleError> {
        self.store.update_menu_cursor(id, cursor).await?;
        Ok(())
    }

    pub async fn list_reviewers(&self) -> Result<Vec<Reviewer>, ConsoleError> {
        Ok(self.store.reviewers().await?)
    }

    async fn elevated_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .store
            .reviewers()
            .await?
            .iter()
            .filter(|r| r.elevated)
            .count())
    }

    // ── Settings ────────────────────────────────────────────────────

    pub async fn set_watermark(
        &self,
        acting: ReviewerId,
        path: PathBuf,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        self.settings.set_watermark(path).await?;
        Ok(())
    }

    pub async fn clear_watermark(&self, acting: ReviewerId) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        self.settings.clear_watermark().await?;
        Ok(())
    }

    pub async fn set_caption(
        &self,
        acting: ReviewerId,
        caption: &str,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        self.settings.set_caption(caption).await?;
        Ok(())
    }

    pub async fn clear_caption(&self, acting: ReviewerId) -> Result<(), ConsoleError> {
        self.set_caption(acting, "").await
    }

    pub async fn set_bottom_delay(
        &self,
        acting: ReviewerId,
        minutes: u32,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        let top = self.settings.snapshot().await.top_delay;
        if minutes == 0 || minutes > top {
            return Err(ConsoleError::InvalidDelayRange {
                bottom: minutes,
                top,
            });
        }
        self.settings.set_bottom_delay(minutes).await?;
        Ok(())
    }

    pub async fn set_top_delay(
        &self,
        acting: ReviewerId,
        minutes: u32,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        let bottom = self.settings.snapshot().await.bottom_delay;
        if minutes < bottom {
            return Err(ConsoleError::InvalidDelayRange {
                bottom,
                top: minutes,
            });
        }
        self.settings.set_top_delay(minutes).await?;
        Ok(())
    }

    pub async fn set_media_filter(
        &self,
        acting: ReviewerId,
        filter: MediaFilter,
    ) -> Result<(), ConsoleError> {
        self.require_elevated(acting).await?;
        self.settings.set_media_filter(filter).await?;
        Ok(())
    }
}

/// Make sure an elevated reviewer exists, seeding `first_admin` when the
/// table has none. Returns `false` when nothing could be seeded — the
/// service then runs with a read-only admin surface.
pub async fn ensure_elevated_reviewer(
    store: &dyn Store,
    first_admin: Option<ReviewerId>,
) -> Result<bool, StoreError> {
    if store.reviewers().await?.iter().any(|r| r.elevated) {
        return Ok(true);
    }
    match first_admin {
        Some(id) => {
            if store.reviewer(id).await?.is_some() {
                store.update_elevated(id, true).await?;
            } else {
                store
                    .insert_reviewer(&Reviewer {
                        id,
                        menu_cursor: None,
                        subscribed: true,
                        elevated: true,
                    })
                    .await?;
            }
            info!(reviewer = id, "Seeded first elevated reviewer");
            Ok(true)
        }
        None => {
            error!("No elevated reviewer and none configured; admin surface is read-only");
            Ok(false)
        }
    }
}
