//! Persisted UI preferences.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::chat::errors::ChatResult;
use crate::storage::kv_store::KeyValueStore;

/// Storage key of the theme preference.
pub const THEME_KEY: &str = "theme";

/// Colour theme of the front end.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    /// Light background.
    #[default]
    Light,
    /// Dark background.
    Dark,
}

impl Theme {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    /// The other theme.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            _ => Err(value.to_string()),
        }
    }
}

/// Theme preference backed by key-value storage.
pub struct Preferences {
    kv: Arc<dyn KeyValueStore>,
    theme: RwLock<Theme>,
}

impl Preferences {
    /// Load the stored theme; missing or unknown values fall back to light.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> ChatResult<Self> {
        let theme = match kv.get(THEME_KEY).await? {
            Some(raw) => Theme::from_str(&raw).unwrap_or_else(|value| {
                warn!("Ignoring unknown stored theme {value:?}");
                Theme::default()
            }),
            None => Theme::default(),
        };
        Ok(Self {
            kv,
            theme: RwLock::new(theme),
        })
    }

    /// Current theme.
    pub async fn theme(&self) -> Theme {
        *self.theme.read().await
    }

    /// Persist and apply a theme.
    ///
    /// # Errors
    /// Returns an error if storage access fails; the theme is unchanged then.
    pub async fn set_theme(&self, theme: Theme) -> ChatResult<Theme> {
        let mut guard = self.theme.write().await;
        self.kv.set(THEME_KEY, theme.as_str().to_string()).await?;
        *guard = theme;
        Ok(theme)
    }

    /// Switch between light and dark.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn toggle(&self) -> ChatResult<Theme> {
        let next = self.theme().await.toggled();
        self.set_theme(next).await
    }
}
