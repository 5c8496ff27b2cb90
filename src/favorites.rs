//! Cached copy of the server-side favorites set.
//!
//! Membership is decided by the server: after a toggle the cache becomes
//! exactly the set the server returned, even if that contradicts what the
//! toggle was meant to do. Responses are sequence-tagged like the cart's.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::api::{ApiClient, Transport};
use crate::error::Error;
use crate::types::{ProductId, UserId};

#[derive(Debug, Default)]
struct FavoritesState {
    applied: u64,
    owner: Option<UserId>,
    ids: HashSet<ProductId>,
}

pub struct FavoritesSynchronizer<T> {
    api: Arc<ApiClient<T>>,
    issued: AtomicU64,
    state: Mutex<FavoritesState>,
}

impl<T: Transport> FavoritesSynchronizer<T> {
    #[must_use]
    pub fn new(api: Arc<ApiClient<T>>) -> Self {
        Self {
            api,
            issued: AtomicU64::new(0),
            state: Mutex::new(FavoritesState::default()),
        }
    }

    /// Fetch the favorites of `user_id` and replace the cache with them.
    ///
    /// # Errors
    ///
    /// The API error; the cache is left untouched.
    pub async fn refresh(&self, user_id: UserId) -> Result<HashSet<ProductId>, Error> {
        let (seq, epoch) = self.issue();
        let ids = self.api.get_favorites(user_id).await?;
        self.apply(seq, epoch, user_id, ids)?;
        Ok(self.snapshot())
    }

    /// Refresh for the signed-in user; without one the cache is emptied and
    /// nothing is sent.
    ///
    /// # Errors
    ///
    /// Same as [`FavoritesSynchronizer::refresh`].
    pub async fn refresh_current(&self) -> Result<HashSet<ProductId>, Error> {
        match self.api.sessions().current_user_id() {
            Some(user_id) => self.refresh(user_id).await,
            None => {
                self.reset();
                Ok(HashSet::new())
            }
        }
    }

    /// Flip membership of `product_id` and return whether it is a favorite
    /// afterwards, as reported by the server.
    ///
    /// Without a session this does nothing and returns `false`. A 400 from the
    /// server (already in / not in favorites) means the cache was out of date;
    /// the set is re-fetched instead of failing.
    ///
    /// # Errors
    ///
    /// Other API errors; the cache is left untouched.
    pub async fn toggle(&self, product_id: ProductId) -> Result<bool, Error> {
        let Some(user_id) = self.api.sessions().current_user_id() else {
            tracing::debug!(product_id = %product_id, "Favorite toggle ignored without session");
            return Ok(false);
        };

        let (seq, epoch) = self.issue();
        let result = if self.is_favorite(product_id) {
            self.api.remove_favorite(product_id, user_id).await
        } else {
            self.api.add_favorite(product_id, user_id).await
        };

        match result {
            Ok(ids) => self.apply(seq, epoch, user_id, ids)?,
            Err(e) if e.status() == Some(400) => {
                tracing::debug!(%product_id, error = %e, "Favorites out of date, re-fetching");
                self.refresh(user_id).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(self.is_favorite(product_id))
    }

    /// Cache lookup; never touches the network.
    #[must_use]
    pub fn is_favorite(&self, product_id: ProductId) -> bool {
        self.state.lock().ids.contains(&product_id)
    }

    /// Cached favorites in ascending id order.
    #[must_use]
    pub fn favorites(&self) -> Vec<ProductId> {
        let mut ids: Vec<_> = self.state.lock().ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Empty the cache and discard in-flight responses.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.applied = self.issued.load(Ordering::Acquire);
        state.owner = None;
        state.ids.clear();
    }

    fn issue(&self) -> (u64, u64) {
        let seq = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
        (seq, self.api.sessions().epoch())
    }

    fn apply(
        &self,
        seq: u64,
        epoch: u64,
        user_id: UserId,
        ids: Vec<ProductId>,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        if self.api.sessions().epoch() != epoch {
            return Err(Error::SessionEnded);
        }
        if seq <= state.applied {
            tracing::debug!(seq, applied = state.applied, "Discarding stale favorites response");
            return Ok(());
        }
        state.applied = seq;
        state.owner = Some(user_id);
        state.ids = ids.into_iter().collect();
        tracing::debug!(%user_id, seq, count = state.ids.len(), "Favorites cache replaced");
        Ok(())
    }

    fn snapshot(&self) -> HashSet<ProductId> {
        self.state.lock().ids.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, Method};
    use crate::testing::{FakeTransport, api_with, signed_in};
    use serde_json::json;

    fn favorites() -> (FavoritesSynchronizer<FakeTransport>, FakeTransport) {
        let (api, fake) = api_with(FakeTransport::new());
        (FavoritesSynchronizer::new(Arc::new(api)), fake)
    }

    fn ids(raw: &[i64]) -> Vec<ProductId> {
        raw.iter().copied().map(ProductId).collect()
    }

    #[tokio::test]
    async fn refresh_replaces_the_set() {
        let (favs, fake) = favorites();
        fake.seed_favorites(UserId(1), ids(&[3, 1]));
        let set = favs.refresh(UserId(1)).await.unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(favs.favorites(), ids(&[1, 3]));

        fake.seed_favorites(UserId(1), ids(&[4]));
        favs.refresh(UserId(1)).await.unwrap();
        assert_eq!(favs.favorites(), ids(&[4]));
    }

    #[tokio::test]
    async fn anonymous_context_is_always_empty() {
        let (favs, fake) = favorites();
        fake.seed_favorites(UserId(1), ids(&[3]));
        favs.refresh(UserId(1)).await.unwrap();

        assert!(favs.refresh_current().await.unwrap().is_empty());
        assert!(!favs.is_favorite(ProductId(3)));
        assert_eq!(fake.requests().len(), 1);
    }

    #[tokio::test]
    async fn toggle_without_session_is_a_no_op() {
        let (favs, fake) = favorites();
        assert!(!favs.toggle(ProductId(3)).await.unwrap());
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn toggle_adds_then_removes() {
        let (favs, fake) = favorites();
        signed_in(&favs.api, 1);

        assert!(favs.toggle(ProductId(3)).await.unwrap());
        assert!(favs.is_favorite(ProductId(3)));
        assert_eq!(fake.favorites_of(UserId(1)), ids(&[3]));

        assert!(!favs.toggle(ProductId(3)).await.unwrap());
        assert!(!favs.is_favorite(ProductId(3)));

        let sent = fake.requests();
        assert_eq!(sent[0].method, Method::Post);
        assert_eq!(sent[1].method, Method::Delete);
        assert_eq!(sent[1].body, Some(json!({"user_id": 1})));
    }

    #[tokio::test]
    async fn server_set_wins_over_the_local_guess() {
        let (favs, fake) = favorites();
        signed_in(&favs.api, 1);

        // asked to add 3, but the server answers with a set that lacks it
        fake.respond_next(ApiResponse::ok(json!({"favorites": [8, 9]})));
        assert!(!favs.toggle(ProductId(3)).await.unwrap());
        assert!(!favs.is_favorite(ProductId(3)));
        assert_eq!(favs.favorites(), ids(&[8, 9]));
    }

    #[tokio::test]
    async fn out_of_date_cache_reconciles_on_conflict() {
        let (favs, fake) = favorites();
        signed_in(&favs.api, 1);
        // another device already added 3; our cache is still empty
        fake.seed_favorites(UserId(1), ids(&[3]));

        assert!(favs.toggle(ProductId(3)).await.unwrap());
        assert!(favs.is_favorite(ProductId(3)));

        let sent = fake.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].method, Method::Post);
        assert_eq!(sent[1].path, "/api/favorites/1");
    }

    #[tokio::test]
    async fn interleaved_toggles_keep_the_later_issued_response() {
        let (favs, fake) = favorites();
        signed_in(&favs.api, 1);
        let first = fake.respond_later();
        let second = fake.respond_later();

        let release = async {
            second
                .send(ApiResponse::ok(json!({"favorites": [3, 4]})))
                .unwrap();
            tokio::task::yield_now().await;
            first.send(ApiResponse::ok(json!({"favorites": [3]}))).unwrap();
        };
        let (a, b, ()) = tokio::join!(
            favs.toggle(ProductId(3)),
            favs.toggle(ProductId(4)),
            release
        );

        assert!(a.unwrap());
        assert!(b.unwrap());
        assert_eq!(favs.favorites(), ids(&[3, 4]));
    }

    #[tokio::test]
    async fn network_failure_leaves_cache_intact() {
        let (favs, fake) = favorites();
        signed_in(&favs.api, 1);
        fake.seed_favorites(UserId(1), ids(&[3]));
        favs.refresh(UserId(1)).await.unwrap();

        fake.fail_next(Error::Network("timeout".into()));
        let err = favs.toggle(ProductId(3)).await.unwrap_err();
        assert!(err.notice().is_some());
        assert!(favs.is_favorite(ProductId(3)));
    }
}
