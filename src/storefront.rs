use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;

#[cfg(feature = "http")]
use crate::api::HttpTransport;
use crate::api::{ApiClient, Transport};
use crate::auth::AuthService;
use crate::cart::CartSynchronizer;
use crate::catalog::Catalog;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::favorites::FavoritesSynchronizer;
use crate::guard::RouteGuard;
use crate::payment::PaymentService;
use crate::session::{SessionEvent, SessionStore};
use crate::storage::{ClientStorage, FileStorage, MemoryStorage};
use crate::theme::ThemeStore;
use crate::users::UserDirectory;

/// One client context: a single session store shared by the route guard,
/// the synchronizers and every service.
pub struct Storefront<T> {
    config: ClientConfig,
    sessions: Arc<SessionStore>,
    api: Arc<ApiClient<T>>,
    guard: RouteGuard,
    auth: AuthService<T>,
    catalog: Catalog<T>,
    cart: Arc<CartSynchronizer<T>>,
    favorites: Arc<FavoritesSynchronizer<T>>,
    users: UserDirectory<T>,
    payments: PaymentService<T>,
    theme: ThemeStore,
}

#[cfg(feature = "http")]
impl Storefront<HttpTransport> {
    /// Wire a storefront over HTTP from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built, or
    /// [`Error::Storage`] if the state directory is unusable.
    pub fn connect(config: ClientConfig) -> Result<Self, Error> {
        let transport = HttpTransport::new(&config)?;
        Self::new(config, transport)
    }
}

impl<T: Transport> Storefront<T> {
    /// Wire a storefront over `transport`. Session and theme are persisted
    /// under the configured state directory, or kept in memory without one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the state directory is unusable.
    pub fn new(config: ClientConfig, transport: T) -> Result<Self, Error> {
        let storage: Arc<dyn ClientStorage> = match config.state_dir() {
            Some(dir) => Arc::new(FileStorage::open(dir)?),
            None => Arc::new(MemoryStorage::new()),
        };
        Ok(Self::with_storage(config, transport, storage))
    }

    /// Wire a storefront whose session and theme live in `storage`.
    #[must_use]
    pub fn with_storage(
        config: ClientConfig,
        transport: T,
        storage: Arc<dyn ClientStorage>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(storage.clone()));
        let api = Arc::new(ApiClient::new(
            transport,
            sessions.clone(),
            config.api_base_url().clone(),
        ));
        let guard = RouteGuard::new(sessions.clone(), config.login_path(), config.home_path());

        Self {
            guard,
            auth: AuthService::new(api.clone()),
            catalog: Catalog::new(api.clone()),
            cart: Arc::new(CartSynchronizer::new(api.clone())),
            favorites: Arc::new(FavoritesSynchronizer::new(api.clone())),
            users: UserDirectory::new(api.clone()),
            payments: PaymentService::new(api.clone()),
            theme: ThemeStore::new(storage),
            sessions,
            api,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    #[must_use]
    pub fn api(&self) -> &Arc<ApiClient<T>> {
        &self.api
    }

    #[must_use]
    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    #[must_use]
    pub fn auth(&self) -> &AuthService<T> {
        &self.auth
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog<T> {
        &self.catalog
    }

    #[must_use]
    pub fn cart(&self) -> &Arc<CartSynchronizer<T>> {
        &self.cart
    }

    #[must_use]
    pub fn favorites(&self) -> &Arc<FavoritesSynchronizer<T>> {
        &self.favorites
    }

    #[must_use]
    pub fn users(&self) -> &UserDirectory<T> {
        &self.users
    }

    #[must_use]
    pub fn payments(&self) -> &PaymentService<T> {
        &self.payments
    }

    #[must_use]
    pub fn theme(&self) -> &ThemeStore {
        &self.theme
    }

    /// Keep the cart and favorites caches in step with the session.
    ///
    /// On [`SessionEvent::Ended`] both caches are cleared and in-flight
    /// fetches discarded; on [`SessionEvent::Established`] both are fetched
    /// for the new user. The returned future does not complete on its own;
    /// spawn it on the embedding runtime and abort it on teardown.
    pub fn watch_session(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut events = self.sessions.subscribe();
        let cart = self.cart.clone();
        let favorites = self.favorites.clone();
        async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Ended { reason }) => {
                        tracing::debug!(?reason, "Clearing cart and favorites");
                        cart.reset();
                        favorites.reset();
                    }
                    Ok(SessionEvent::Established { user_id, .. }) => {
                        if let Err(e) = cart.refresh(user_id).await {
                            tracing::warn!(%user_id, error = %e, "Cart load after login failed");
                        }
                        if let Err(e) = favorites.refresh(user_id).await {
                            tracing::warn!(%user_id, error = %e, "Favorites load failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // an Ended may be among the missed events
                        tracing::warn!(skipped, "Session events lagged, resyncing caches");
                        cart.reset();
                        favorites.reset();
                        if let Err(e) = cart.refresh_current().await {
                            tracing::warn!(error = %e, "Cart resync failed");
                        }
                        if let Err(e) = favorites.refresh_current().await {
                            tracing::warn!(error = %e, "Favorites resync failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
