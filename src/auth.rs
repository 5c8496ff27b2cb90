//! Sign-in, registration and sign-out.
//!
//! Every successful path ends in [`SessionStore::establish_session`]; sign-out
//! goes through [`SessionStore::end_session`] so cached per-user state is
//! dropped by whoever listens for [`SessionEvent::Ended`].
//!
//! [`SessionEvent::Ended`]: crate::session::SessionEvent::Ended

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use url::Url;

use crate::api::{ApiClient, LoginRequest, NewUser, Transport};
use crate::error::Error;
use crate::models::{PaymentMethods, UserProfile};
use crate::session::{EndReason, Session, SessionStore};
use crate::types::{BearerToken, Role};

const DUPLICATE_EMAIL_CONSTRAINT: &str = "usuarios_correo_key";

/// Login form input. The identifier is an email if it contains `@`, a user
/// name otherwise.
#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
        }
    }

    fn to_request(&self) -> LoginRequest {
        let identifier = self.identifier.trim().to_owned();
        let (email, name) = if identifier.contains('@') {
            (Some(identifier), None)
        } else {
            (None, Some(identifier))
        };
        LoginRequest {
            email,
            name,
            password: self.password.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Sign-up form input.
#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
    pub payment_methods: Option<PaymentMethods>,
    /// `usuario` when unset.
    pub role: Option<Role>,
}

impl Registration {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        password_confirmation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            password_confirmation: password_confirmation.into(),
            payment_methods: None,
            role: None,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() || self.email.trim().is_empty() {
            return Err(Error::Validation("name and email are required".into()));
        }
        if self.password.is_empty() {
            return Err(Error::Validation("password is required".into()));
        }
        if self.password != self.password_confirmation {
            return Err(Error::Validation("passwords do not match".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

pub struct AuthService<T> {
    api: Arc<ApiClient<T>>,
}

impl<T: Transport> AuthService<T> {
    #[must_use]
    pub fn new(api: Arc<ApiClient<T>>) -> Self {
        Self { api }
    }

    fn sessions(&self) -> &SessionStore {
        self.api.sessions()
    }

    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.sessions().current_session()
    }

    /// Sign in and persist the resulting session.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCredentials`] if the server rejects the credentials or
    /// answers without a token and user; [`Error::Storage`] if the session
    /// cannot be persisted; network errors as-is.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, Error> {
        if credentials.identifier.trim().is_empty() || credentials.password.is_empty() {
            return Err(Error::Validation("identifier and password are required".into()));
        }
        let response = match self.api.login(&credentials.to_request()).await {
            Ok(response) => response,
            Err(Error::Api { status, detail, .. }) if (400..500).contains(&status) => {
                tracing::info!(status, "Login rejected");
                return Err(Error::InvalidCredentials(if detail.is_empty() {
                    "invalid credentials".into()
                } else {
                    detail
                }));
            }
            Err(e) => return Err(e),
        };

        let (Some(token), Some(user)) = (response.access_token, response.user) else {
            tracing::warn!("Login response without access token or user");
            return Err(Error::InvalidCredentials(
                "the server did not return a valid token".into(),
            ));
        };
        let session = self
            .sessions()
            .establish_session(user, BearerToken::new(token))?;
        tracing::info!(user_id = %session.user_id, role = %session.role, "Logged in");
        Ok(session)
    }

    /// Create an account, then try to sign in with it.
    ///
    /// A failed follow-up sign-in does not fail the registration; the account
    /// exists and the caller can send the user to the login page.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for local form errors (nothing is sent),
    /// [`Error::AlreadyRegistered`] for a taken email, other API errors as-is.
    pub async fn register(&self, registration: &Registration) -> Result<UserProfile, Error> {
        registration.validate()?;

        let new_user = NewUser {
            name: registration.name.trim().to_owned(),
            email: registration.email.trim().to_owned(),
            password: Some(registration.password.clone()),
            payment_methods: registration.payment_methods.clone(),
            role: registration.role.clone().unwrap_or_default(),
        };
        let created = match self.api.create_user(&new_user).await {
            Ok(user) => user,
            Err(Error::Api { detail, .. }) if detail.contains(DUPLICATE_EMAIL_CONSTRAINT) => {
                return Err(Error::AlreadyRegistered);
            }
            Err(e) => return Err(e),
        };
        tracing::info!(user_id = %created.id, "Account registered");

        let credentials = Credentials::new(new_user.email, registration.password.clone());
        if let Err(e) = self.login(&credentials).await {
            tracing::warn!(user_id = %created.id, error = %e, "Login after registration failed");
        }
        Ok(created)
    }

    /// Finish a third-party sign-in from the callback URL.
    ///
    /// The URL carries the bearer token in `token` and the user as base64
    /// encoded JSON in `data`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCredentials`] if either parameter is missing or
    /// `data` does not decode; [`Error::Storage`] if persisting fails.
    pub fn complete_oauth_callback(&self, callback: &Url) -> Result<Session, Error> {
        let mut token = None;
        let mut data = None;
        for (key, value) in callback.query_pairs() {
            match key.as_ref() {
                "token" => token = Some(value.into_owned()),
                "data" => data = Some(value.into_owned()),
                _ => {}
            }
        }
        let (Some(token), Some(data)) = (token.filter(|t| !t.is_empty()), data) else {
            return Err(Error::InvalidCredentials("incomplete authentication data".into()));
        };

        let user = decode_user(&data).map_err(|reason| {
            tracing::warn!(%reason, "Undecodable user data in auth callback");
            Error::InvalidCredentials("invalid authentication data".into())
        })?;
        let session = self
            .sessions()
            .establish_session(user, BearerToken::new(token))?;
        tracing::info!(user_id = %session.user_id, role = %session.role, "Logged in via callback");
        Ok(session)
    }

    /// End the session. Idempotent.
    pub fn logout(&self) {
        self.sessions().end_session(EndReason::LoggedOut);
    }
}

fn decode_user(data: &str) -> Result<UserProfile, String> {
    // `+` turns into a space when the query is form-decoded
    let data = data.trim().replace(' ', "+");
    let bytes = STANDARD.decode(data).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}
