//! Runtime settings — store-backed key/value pairs with a write-through
//! in-memory mirror.
//!
//! The mirror is read on every event (media filter, caption, delay bounds),
//! so lookups must not hit the store; every console write goes store-first,
//! then updates the mirror.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::StoreError;
use crate::store::Store;
use crate::transport::MediaKind;

/// Setting keys as stored.
pub mod keys {
    pub const WATERMARK: &str = "watermark";
    pub const CAPTION: &str = "caption";
    pub const BOTTOM_DELAY: &str = "bottom_delay";
    pub const TOP_DELAY: &str = "top_delay";
    pub const MEDIA_TYPES: &str = "media_types";
}

/// Default delay bounds in minutes (12 and 24 hours).
pub const DEFAULT_BOTTOM_DELAY: u32 = 720;
pub const DEFAULT_TOP_DELAY: u32 = 1440;

/// Which media kinds the intake admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaFilter {
    Photos,
    Videos,
    #[default]
    Both,
}

impl MediaFilter {
    /// Stored wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photos => "pic",
            Self::Videos => "vid",
            Self::Both => "pic+vid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pic" => Some(Self::Photos),
            "vid" => Some(Self::Videos),
            "pic+vid" => Some(Self::Both),
            _ => None,
        }
    }

    pub fn allows(&self, kind: MediaKind) -> bool {
        match self {
            Self::Photos => kind == MediaKind::Photo,
            Self::Videos => kind == MediaKind::Video,
            Self::Both => true,
        }
    }
}

/// Snapshot of all runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Watermark overlay file; `None` disables watermarking.
    pub watermark: Option<PathBuf>,
    /// Caption attached to every delivered post. Empty disables.
    pub caption: String,
    /// Lower jitter bound in minutes.
    pub bottom_delay: u32,
    /// Upper jitter bound in minutes.
    pub top_delay: u32,
    pub media_filter: MediaFilter,
}

/// Store-backed settings with a write-through in-memory mirror.
pub struct SettingsMirror {
    store: Arc<dyn Store>,
    inner: RwLock<Settings>,
}

impl SettingsMirror {
    /// Load settings from the store, seeding defaults for missing keys.
    pub async fn load(store: Arc<dyn Store>) -> Result<Arc<Self>, StoreError> {
        let watermark = match read_or_seed(&*store, keys::WATERMARK, "").await? {
            path if path.is_empty() => None,
            path => Some(PathBuf::from(path)),
        };
        let caption = read_or_seed(&*store, keys::CAPTION, "").await?;
        let bottom_delay = read_or_seed(
            &*store,
            keys::BOTTOM_DELAY,
            &DEFAULT_BOTTOM_DELAY.to_string(),
        )
        .await?
        .parse()
        .unwrap_or(DEFAULT_BOTTOM_DELAY);
        let top_delay = read_or_seed(&*store, keys::TOP_DELAY, &DEFAULT_TOP_DELAY.to_string())
            .await?
            .parse()
            .unwrap_or(DEFAULT_TOP_DELAY);
        let media_filter = MediaFilter::parse(
            &read_or_seed(&*store, keys::MEDIA_TYPES, MediaFilter::Both.as_str()).await?,
        )
        .unwrap_or_default();

        let settings = Settings {
            watermark,
            caption,
            bottom_delay,
            top_delay,
            media_filter,
        };

        info!(
            watermark = settings.watermark.is_some(),
            caption = !settings.caption.is_empty(),
            bottom_delay = settings.bottom_delay,
            top_delay = settings.top_delay,
            media_filter = settings.media_filter.as_str(),
            "Settings loaded"
        );

        Ok(Arc::new(Self {
            store,
            inner: RwLock::new(settings),
        }))
    }

    /// Current settings snapshot.
    pub async fn snapshot(&self) -> Settings {
        self.inner.read().await.clone()
    }

    pub async fn set_watermark(&self, path: PathBuf) -> Result<(), StoreError> {
        self.store
            .put_setting(keys::WATERMARK, &path.display().to_string())
            .await?;
        self.inner.write().await.watermark = Some(path);
        Ok(())
    }

    pub async fn clear_watermark(&self) -> Result<(), StoreError> {
        self.store.put_setting(keys::WATERMARK, "").await?;
        self.inner.write().await.watermark = None;
        Ok(())
    }

    pub async fn set_caption(&self, caption: &str) -> Result<(), StoreError> {
        self.store.put_setting(keys::CAPTION, caption).await?;
        self.inner.write().await.caption = caption.to_string();
        Ok(())
    }

    pub async fn set_bottom_delay(&self, minutes: u32) -> Result<(), StoreError> {
        self.store
            .put_setting(keys::BOTTOM_DELAY, &minutes.to_string())
            .await?;
        self.inner.write().await.bottom_delay = minutes;
        Ok(())
    }

    pub async fn set_top_delay(&self, minutes: u32) -> Result<(), StoreError> {
        self.store
            .put_setting(keys::TOP_DELAY, &minutes.to_string())
            .await?;
        self.inner.write().await.top_delay = minutes;
        Ok(())
    }

    pub async fn set_media_filter(&self, filter: MediaFilter) -> Result<(), StoreError> {
        self.store
            .put_setting(keys::MEDIA_TYPES, filter.as_str())
            .await?;
        self.inner.write().await.media_filter = filter;
        Ok(())
    }
}

async fn read_or_seed(store: &dyn Store, key: &str, default: &str) -> Result<String, StoreError> {
    match store.setting(key).await? {
        Some(value) => Ok(value),
        None => {
            store.put_setting(key, default).await?;
            Ok(default.to_string())
        }
    }
}
