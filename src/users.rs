//! Account administration over `/api/usuarios/`.
//!
//! Profiles come back with a role filled in: records the server stores
//! without one are shown as `usuario`.

use std::sync::Arc;

use crate::api::{ApiClient, NewUser, Transport};
use crate::error::Error;
use crate::models::{PaymentMethods, UserProfile};
use crate::types::{Role, UserId};

/// Fields of a user create or update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserDraft {
    pub name: String,
    pub email: String,
    /// Left unchanged on update when `None`.
    pub password: Option<String>,
    pub role: Option<Role>,
    pub payment_methods: PaymentMethods,
}

impl UserDraft {
    fn into_request(self) -> Result<NewUser, Error> {
        let name = self.name.trim().to_owned();
        let email = self.email.trim().to_owned();
        if name.is_empty() || email.is_empty() {
            return Err(Error::Validation("name and email are required".into()));
        }
        Ok(NewUser {
            name,
            email,
            password: self.password.filter(|p| !p.is_empty()),
            payment_methods: Some(self.payment_methods),
            role: self.role.unwrap_or_default(),
        })
    }
}

impl From<&UserProfile> for UserDraft {
    fn from(profile: &UserProfile) -> Self {
        Self {
            name: profile.name.clone(),
            email: profile.email.clone(),
            password: None,
            role: profile.role.clone(),
            payment_methods: profile.payment_methods.clone(),
        }
    }
}

pub struct UserDirectory<T> {
    api: Arc<ApiClient<T>>,
}

impl<T: Transport> UserDirectory<T> {
    #[must_use]
    pub fn new(api: Arc<ApiClient<T>>) -> Self {
        Self { api }
    }

    /// Every account.
    ///
    /// # Errors
    ///
    /// API errors as-is.
    pub async fn list(&self) -> Result<Vec<UserProfile>, Error> {
        let users = self.api.list_users().await?;
        Ok(users.into_iter().map(with_default_role).collect())
    }

    /// Account `id`.
    ///
    /// # Errors
    ///
    /// API errors as-is; an unknown id is `Error::Api` with status 404.
    pub async fn get(&self, id: UserId) -> Result<UserProfile, Error> {
        self.api.get_user(id).await.map(with_default_role)
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a blank name or email (nothing is sent),
    /// API errors otherwise.
    pub async fn create(&self, draft: UserDraft) -> Result<UserProfile, Error> {
        let request = draft.into_request()?;
        let created = self.api.create_user(&request).await?;
        tracing::info!(user_id = %created.id, role = %request.role, "User created");
        Ok(with_default_role(created))
    }

    /// Replace the fields of account `id`.
    ///
    /// # Errors
    ///
    /// Same as [`UserDirectory::create`].
    pub async fn update(&self, id: UserId, draft: UserDraft) -> Result<UserProfile, Error> {
        let request = draft.into_request()?;
        let updated = self.api.update_user(id, &request).await?;
        tracing::info!(user_id = %id, role = %request.role, "User updated");
        Ok(with_default_role(updated))
    }

    /// Remove account `id`.
    ///
    /// # Errors
    ///
    /// API errors as-is.
    pub async fn delete(&self, id: UserId) -> Result<(), Error> {
        self.api.delete_user(id).await?;
        tracing::info!(user_id = %id, "User deleted");
        Ok(())
    }
}

fn with_default_role(mut user: UserProfile) -> UserProfile {
    if user.role.is_none() {
        user.role = Some(Role::default());
    }
    user
}
