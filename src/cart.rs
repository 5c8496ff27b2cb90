//! Cached copy of the server-side cart.
//!
//! The cache is only ever replaced wholesale by a fetched server cart. Every
//! mutation goes to the API first and is followed by a refresh, so stock
//! limits or merges applied by the server always show up here.
//!
//! Each fetch takes a sequence number when it is issued. A response is
//! applied only if no later-issued fetch has been applied already, so
//! out-of-order responses can't roll the cache back.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::api::{ApiClient, CartItemRequest, Transport};
use crate::error::Error;
use crate::models::{CartKey, CartLine, Product};
use crate::types::{ProductId, UserId};

#[derive(Debug, Default)]
struct CartState {
    /// Sequence number of the fetch the cache currently reflects.
    applied: u64,
    owner: Option<UserId>,
    lines: Vec<CartLine>,
}

pub struct CartSynchronizer<T> {
    api: Arc<ApiClient<T>>,
    issued: AtomicU64,
    state: Mutex<CartState>,
    count: watch::Sender<u32>,
}

impl<T: Transport> CartSynchronizer<T> {
    #[must_use]
    pub fn new(api: Arc<ApiClient<T>>) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            api,
            issued: AtomicU64::new(0),
            state: Mutex::new(CartState::default()),
            count,
        }
    }

    /// Fetch the cart of `user_id` and replace the cache with it.
    ///
    /// If a later-issued fetch was applied first, the cache is left alone and
    /// its (newer) contents are returned, or nothing when that newer fetch was
    /// for another user.
    ///
    /// # Errors
    ///
    /// [`Error::CartFetch`] wrapping the cause; the cache is left untouched.
    /// [`Error::SessionEnded`] if the session ended while the fetch was in flight.
    pub async fn refresh(&self, user_id: UserId) -> Result<Vec<CartLine>, Error> {
        let seq = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
        let epoch = self.api.sessions().epoch();

        let lines = match self.api.get_cart(user_id).await {
            Ok(lines) => sanitize_lines(lines),
            Err(Error::SessionEnded) => return Err(Error::SessionEnded),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Cart fetch failed");
                return Err(Error::CartFetch {
                    source: Box::new(e),
                });
            }
        };

        let mut state = self.state.lock();
        if self.api.sessions().epoch() != epoch {
            return Err(Error::SessionEnded);
        }
        if seq <= state.applied {
            tracing::debug!(seq, applied = state.applied, "Discarding stale cart response");
            if state.owner != Some(user_id) {
                return Ok(Vec::new());
            }
            return Ok(state.lines.clone());
        }
        state.applied = seq;
        state.owner = Some(user_id);
        state.lines = lines;
        let count = total_quantity(&state.lines);
        // published under the lock; a concurrent reset must not be overtaken
        self.count.send_replace(count);
        let snapshot = state.lines.clone();
        drop(state);

        tracing::debug!(user_id = %user_id, seq, count, "Cart cache replaced");
        Ok(snapshot)
    }

    /// Refresh for the signed-in user, or clear the cache if there is none.
    ///
    /// # Errors
    ///
    /// Same as [`CartSynchronizer::refresh`].
    pub async fn refresh_current(&self) -> Result<Vec<CartLine>, Error> {
        match self.api.sessions().current_user_id() {
            Some(user_id) => self.refresh(user_id).await,
            None => {
                self.reset();
                Ok(Vec::new())
            }
        }
    }

    /// Add one unit of a product variant, then refresh.
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`] without a session (nothing is sent), the
    /// API error of the add, or the refresh error.
    pub async fn add_line(
        &self,
        product_id: ProductId,
        color: impl Into<String>,
        size: impl Into<String>,
    ) -> Result<Vec<CartLine>, Error> {
        let user_id = self.active_user()?;
        let key = CartKey::new(product_id, color, size);
        let outcome = self
            .api
            .add_to_cart(product_id, &cart_item(user_id, Some(1), &key))
            .await;
        self.after_mutation(user_id, outcome).await
    }

    /// Set the quantity of a line, then refresh.
    ///
    /// The local cache is never adjusted directly; the new quantity only shows
    /// up once the server reports it.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a quantity below 1 and
    /// [`Error::NotAuthenticated`] without a session; neither sends anything.
    /// Otherwise the API error of the update, or the refresh error.
    pub async fn change_quantity(
        &self,
        key: &CartKey,
        new_quantity: u32,
    ) -> Result<Vec<CartLine>, Error> {
        if new_quantity < 1 {
            return Err(Error::Validation("quantity must be at least 1".into()));
        }
        let user_id = self.active_user()?;
        let outcome = self
            .api
            .update_cart(key.product_id, &cart_item(user_id, Some(new_quantity), key))
            .await;
        self.after_mutation(user_id, outcome).await
    }

    /// Remove a line, then refresh.
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`] without a session, the API error of the
    /// removal, or the refresh error.
    pub async fn remove_line(&self, key: &CartKey) -> Result<Vec<CartLine>, Error> {
        let user_id = self.active_user()?;
        let outcome = self
            .api
            .remove_from_cart(key.product_id, &cart_item(user_id, None, key))
            .await;
        self.after_mutation(user_id, outcome).await
    }

    /// Drop the cache, e.g. on logout. In-flight fetches are discarded.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.applied = self.issued.load(Ordering::Acquire);
        state.owner = None;
        state.lines.clear();
        self.count.send_replace(0);
        drop(state);
    }

    /// Cached lines.
    #[must_use]
    pub fn lines(&self) -> Vec<CartLine> {
        self.state.lock().lines.clone()
    }

    /// User whose cart is cached.
    #[must_use]
    pub fn owner(&self) -> Option<UserId> {
        self.state.lock().owner
    }

    /// Sum of quantities over the cached lines.
    #[must_use]
    pub fn count(&self) -> u32 {
        *self.count.borrow()
    }

    /// Receiver that observes every change of [`CartSynchronizer::count`].
    #[must_use]
    pub fn count_updates(&self) -> watch::Receiver<u32> {
        self.count.subscribe()
    }

    #[must_use]
    pub fn contains(&self, key: &CartKey) -> bool {
        self.state.lock().lines.iter().any(|l| l.matches(key))
    }

    /// Price of the cached cart.
    ///
    /// A line is priced from its embedded product, or else from `catalog`.
    /// Lines that resolve to neither are stale and left out.
    #[must_use]
    pub fn total(&self, catalog: &[Product]) -> f64 {
        let state = self.state.lock();
        let mut stale = 0usize;
        let total: f64 = state
            .lines
            .iter()
            .filter_map(|line| {
                let product = line
                    .product
                    .as_ref()
                    .or_else(|| catalog.iter().find(|p| p.id == line.product_id));
                if product.is_none() {
                    stale += 1;
                }
                product.map(|p| p.price * f64::from(line.quantity))
            })
            .sum();
        if stale > 0 {
            tracing::debug!(stale, "Cart lines without a resolvable product left out of total");
        }
        total
    }

    fn active_user(&self) -> Result<UserId, Error> {
        self.api
            .sessions()
            .current_user_id()
            .ok_or(Error::NotAuthenticated)
    }

    /// Refresh after a mutation regardless of its outcome, then report the
    /// mutation's own error first.
    async fn after_mutation(
        &self,
        user_id: UserId,
        outcome: Result<(), Error>,
    ) -> Result<Vec<CartLine>, Error> {
        match outcome {
            Ok(()) => self.refresh(user_id).await,
            Err(Error::SessionEnded) => Err(Error::SessionEnded),
            Err(e) => {
                if let Err(refresh_err) = self.refresh(user_id).await {
                    tracing::debug!(error = %refresh_err, "Cart resync failed");
                }
                Err(e)
            }
        }
    }
}

fn cart_item(user_id: UserId, quantity: Option<u32>, key: &CartKey) -> CartItemRequest {
    CartItemRequest {
        user_id,
        quantity,
        color: key.color.clone(),
        size: key.size.clone(),
    }
}

fn total_quantity(lines: &[CartLine]) -> u32 {
    lines
        .iter()
        .fold(0u32, |total, l| total.saturating_add(l.quantity))
}

/// Drop empty lines and keep the first line per (product, color, size).
fn sanitize_lines(lines: Vec<CartLine>) -> Vec<CartLine> {
    let mut seen = HashSet::with_capacity(lines.len());
    let mut unique = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity == 0 {
            tracing::warn!(product_id = %line.product_id, "Cart line without quantity ignored");
        } else if seen.insert(line.key()) {
            unique.push(line);
        } else {
            tracing::warn!(product_id = %line.product_id, color = %line.color, size = %line.size,
                "Duplicate cart line from server ignored");
        }
    }
    unique
}
