use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::storage::{ClientStorage, THEME_KEY};

/// Color scheme preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }

    /// Anything but `dark` reads as light.
    fn from_stored(raw: &str) -> Self {
        if raw.trim() == "dark" { Self::Dark } else { Self::Light }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted theme preference. Stored apart from the session, so it
/// survives logout.
pub struct ThemeStore {
    storage: Arc<dyn ClientStorage>,
}

impl ThemeStore {
    #[must_use]
    pub fn new(storage: Arc<dyn ClientStorage>) -> Self {
        Self { storage }
    }

    /// Stored preference, light if unset or unreadable.
    #[must_use]
    pub fn current(&self) -> Theme {
        match self.storage.get(THEME_KEY) {
            Ok(Some(raw)) => Theme::from_stored(&raw),
            Ok(None) => Theme::default(),
            Err(e) => {
                tracing::debug!(error = %e, "Theme unreadable, using light");
                Theme::default()
            }
        }
    }

    /// Persist `theme` as the preference.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if the preference cannot be written.
    pub fn set(&self, theme: Theme) -> Result<(), Error> {
        self.storage.set(THEME_KEY, theme.as_str())
    }

    /// Switch between light and dark and return the new theme.
    ///
    /// # Errors
    ///
    /// Same as [`ThemeStore::set`].
    pub fn toggle(&self) -> Result<Theme, Error> {
        let next = self.current().toggled();
        self.set(next)?;
        Ok(next)
    }
}
