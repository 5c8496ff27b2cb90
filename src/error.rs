use std::time::Duration;

/// How long inline auth/validation messages stay visible.
pub const NOTICE_DISMISS_AFTER: Duration = Duration::from_millis(1500);

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Login rejected or unusable login response.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Registration conflicted with an existing account.
    #[error("This email address is already registered")]
    AlreadyRegistered,

    /// Operation needs an active session and there is none.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Insufficient role. Deliberately carries no detail.
    #[error("Permission denied")]
    PermissionDenied,

    /// The API rejected the credential, or logout happened while the
    /// request was in flight. Recovered globally by the session store.
    #[error("Session ended")]
    SessionEnded,

    /// Client-side input constraint failed before any request was sent.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {detail}")]
    Api {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    #[error("Failed to fetch cart: {source}")]
    CartFetch {
        #[source]
        source: Box<Error>,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for errors that must not be reported to the user because the
    /// session layer already recovered from them.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::NotAuthenticated | Self::SessionEnded
        )
    }

    /// HTTP status of an API rejection, if this is one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::CartFetch { source } => source.status(),
            _ => None,
        }
    }

    /// User-facing presentation of this error, or `None` when nothing may be shown.
    #[must_use]
    pub fn notice(&self) -> Option<Notice> {
        match self {
            Self::InvalidCredentials(_) | Self::AlreadyRegistered | Self::Validation(_) => {
                Some(Notice {
                    kind: NoticeKind::Inline,
                    message: self.to_string(),
                    dismiss_after: Some(NOTICE_DISMISS_AFTER),
                })
            }
            Self::PermissionDenied | Self::NotAuthenticated | Self::SessionEnded => None,
            Self::CartFetch { source } if source.is_silent() => None,
            _ => Some(Notice {
                kind: NoticeKind::Alert,
                message: "Something went wrong, please try again".into(),
                dismiss_after: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Shown next to the form that caused it.
    Inline,
    /// Blocking alert, dismissed by the user.
    Alert,
}

/// Message the presentation layer should show for an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub dismiss_after: Option<Duration>,
}
