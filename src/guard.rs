//! Per-navigation access gate.
//!
//! Every call re-reads the session store, so a logout or a re-login as a
//! different user re-gates views on the very next navigation.

use std::sync::Arc;

use crate::permissions::has_capability;
use crate::session::SessionStore;
use crate::types::Capability;

/// Outcome of evaluating one navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Render the requested view.
    Allowed,
    /// No session: go to the login surface, remembering where the user wanted to go.
    RedirectToAuth { to: String, from: String },
    /// Session present but insufficient. No reason is given.
    RedirectHome { to: String },
}

impl GuardDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Navigation target, or `None` when the view renders as-is.
    #[must_use]
    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::RedirectToAuth { to, .. } | Self::RedirectHome { to } => Some(to),
        }
    }
}

/// Capability a storefront route needs, matched by path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedRoute {
    /// Path pattern; `:name` segments match any single segment.
    pub pattern: &'static str,
    pub required: Capability,
}

/// Storefront routes and what they require.
pub const ROUTES: &[ProtectedRoute] = &[
    ProtectedRoute::new("/", Capability::VIEW_PRODUCTS),
    ProtectedRoute::new("/producto/:id", Capability::VIEW_PRODUCTS),
    ProtectedRoute::new("/auth", Capability::AUTH),
    ProtectedRoute::new("/favoritos", Capability::MANAGE_FAVORITES),
    ProtectedRoute::new("/carrito", Capability::VIEW_CART),
    ProtectedRoute::new("/profile", Capability::VIEW_PROFILE),
    ProtectedRoute::new("/manage-users", Capability::ALL),
];

impl ProtectedRoute {
    #[must_use]
    pub const fn new(pattern: &'static str, required: Capability) -> Self {
        Self { pattern, required }
    }

    fn matches(&self, path: &str) -> bool {
        let mut want = self.pattern.split('/').filter(|s| !s.is_empty());
        let mut got = path.split('/').filter(|s| !s.is_empty());
        loop {
            match (want.next(), got.next()) {
                (None, None) => return true,
                (Some(w), Some(_)) if w.starts_with(':') => {}
                (Some(w), Some(g)) if w == g => {}
                _ => return false,
            }
        }
    }
}

pub struct RouteGuard {
    sessions: Arc<SessionStore>,
    login_path: String,
    home_path: String,
}

impl RouteGuard {
    #[must_use]
    pub fn new(
        sessions: Arc<SessionStore>,
        login_path: impl Into<String>,
        home_path: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            login_path: login_path.into(),
            home_path: home_path.into(),
        }
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn home_path(&self) -> &str {
        &self.home_path
    }

    /// Gate a navigation to `destination` on `required`.
    #[must_use]
    pub fn evaluate(&self, destination: &str, required: &Capability) -> GuardDecision {
        let session = self.sessions.current_session();
        if has_capability(session.as_ref(), required) {
            return GuardDecision::Allowed;
        }
        match session {
            None => {
                tracing::debug!(destination, "Unauthenticated, redirecting to login");
                GuardDecision::RedirectToAuth {
                    to: self.login_path.clone(),
                    from: destination.to_owned(),
                }
            }
            Some(_) => {
                tracing::debug!(destination, "Insufficient role, redirecting home");
                GuardDecision::RedirectHome {
                    to: self.home_path.clone(),
                }
            }
        }
    }

    /// Gate a navigation using the storefront route table.
    ///
    /// Query strings and fragments are ignored for matching but preserved in
    /// the return-to destination. Paths not in the table only need
    /// `view_products`.
    #[must_use]
    pub fn navigate(&self, destination: &str) -> GuardDecision {
        let path = destination
            .split(['?', '#'])
            .next()
            .unwrap_or(destination);
        let required = route_for(path).map_or(Capability::VIEW_PRODUCTS, |r| r.required.clone());
        self.evaluate(destination, &required)
    }

    /// Where to send the user after a successful login.
    ///
    /// Only local absolute paths are honoured; anything else (including the
    /// login surface itself) falls back to home.
    #[must_use]
    pub fn login_target(&self, from: Option<&str>) -> String {
        match from {
            Some(path)
                if path.starts_with('/')
                    && !path.starts_with("//")
                    && !path.contains('\\')
                    && path.split(['?', '#']).next() != Some(self.login_path.as_str()) =>
            {
                path.to_owned()
            }
            _ => self.home_path.clone(),
        }
    }

    /// Login URL carrying the return-to destination as a query parameter.
    #[must_use]
    pub fn login_url_for(&self, from: &str) -> String {
        format!("{}?from={}", self.login_path, urlencoding::encode(from))
    }
}

/// Route-table entry matching `path`, if any.
#[must_use]
pub fn route_for(path: &str) -> Option<&'static ProtectedRoute> {
    ROUTES.iter().find(|r| r.matches(path))
}
