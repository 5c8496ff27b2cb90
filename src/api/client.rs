use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use url::Url;

use super::transport::{ApiRequest, FormPart, Transport};
use crate::catalog::{ProductPage, ProductQuery};
use crate::error::Error;
use crate::models::{CartLine, Category, PaymentMethods, Product, UserProfile};
use crate::session::{EndReason, SessionStore};
use crate::types::{ProductId, Role, UserId};

/// Body of `POST /api/auth/login`. Exactly one of `email`/`name` is set.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    #[serde(rename = "correo", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "nombre", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "contraseña")]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Body of user creation and update.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "correo")]
    pub email: String,
    #[serde(rename = "contraseña", skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "metodo_pago")]
    pub payment_methods: Option<PaymentMethods>,
    #[serde(rename = "rol")]
    pub role: Role,
}

/// `cart_item` payload of the cart mutation routes.
#[derive(Debug, Clone, Serialize)]
pub struct CartItemRequest {
    pub user_id: UserId,
    #[serde(rename = "cantidad", skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    pub color: String,
    #[serde(rename = "talla")]
    pub size: String,
}

/// Body of `PUT /api/productos/{id}`. A `None` image keeps the stored one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRequest {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "precio")]
    pub price: f64,
    #[serde(rename = "cantidad")]
    pub stock: u32,
    pub categoria_id: i64,
    pub image_url: Option<String>,
}

#[derive(Deserialize)]
struct CartEnvelope {
    #[serde(rename = "carrito", default)]
    lines: Option<Vec<CartLine>>,
}

#[derive(Deserialize)]
struct FavoritesEnvelope {
    #[serde(default)]
    favorites: Option<Vec<ProductId>>,
}

#[derive(Deserialize)]
struct ProductsEnvelope {
    #[serde(default)]
    products: Option<Vec<Product>>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Deserialize)]
struct PaymentStatusEnvelope {
    #[serde(default)]
    status: Option<String>,
}

/// Authenticated access to the storefront API.
///
/// Every call carries the current bearer credential. A 401 on a call that
/// carried one ends the session (once, however many calls see it) and is
/// reported as [`Error::SessionEnded`]; so is any failure of a call whose
/// session ended while it was in flight.
pub struct ApiClient<T> {
    transport: T,
    sessions: Arc<SessionStore>,
    asset_origin: Url,
}

impl<T: Transport> ApiClient<T> {
    #[must_use]
    pub fn new(transport: T, sessions: Arc<SessionStore>, asset_origin: Url) -> Self {
        Self {
            transport,
            sessions,
            asset_origin,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a request through the session interceptor.
    ///
    /// # Errors
    ///
    /// [`Error::SessionEnded`] as described on the type, [`Error::Api`] for
    /// other non-success statuses, or the transport's error.
    pub async fn call(
        &self,
        operation: &'static str,
        mut request: ApiRequest,
    ) -> Result<JsonValue, Error> {
        let epoch = self.sessions.epoch();
        request.bearer = self.sessions.bearer_token();
        let authenticated = request.bearer.is_some();

        let result = self.transport.send(request).await;
        let ended_meanwhile = self.sessions.epoch() != epoch;

        let response = match result {
            Ok(response) => response,
            Err(e) if ended_meanwhile => {
                tracing::debug!(operation, error = %e, "Request failed after session change");
                return Err(Error::SessionEnded);
            }
            Err(e) => return Err(e),
        };

        if response.status == 401 && authenticated {
            if self
                .sessions
                .end_session_if_epoch(epoch, EndReason::CredentialRejected)
            {
                tracing::warn!(operation, "Credential rejected by API, session ended");
            }
            return Err(Error::SessionEnded);
        }
        if !response.is_success() {
            if ended_meanwhile {
                return Err(Error::SessionEnded);
            }
            return Err(Error::Api {
                operation,
                status: response.status,
                detail: response.detail().unwrap_or_default(),
            });
        }
        Ok(response.body)
    }

    async fn call_as<R: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: ApiRequest,
    ) -> Result<R, Error> {
        let body = self.call(operation, request).await?;
        serde_json::from_value(body).map_err(Into::into)
    }

    // ── Auth and users ─────────────────────────────────────────────

    /// `POST /api/auth/login`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, Error> {
        let req = ApiRequest::post("/api/auth/login").with_json(serde_json::to_value(request)?);
        self.call_as("login", req).await
    }

    /// `POST /api/usuarios/`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn create_user(&self, user: &NewUser) -> Result<UserProfile, Error> {
        let req = ApiRequest::post("/api/usuarios/").with_json(serde_json::to_value(user)?);
        self.call_as("user creation", req).await
    }

    /// `GET /api/usuarios/`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn list_users(&self) -> Result<Vec<UserProfile>, Error> {
        self.call_as("user listing", ApiRequest::get("/api/usuarios/"))
            .await
    }

    /// `GET /api/usuarios/{id}`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn get_user(&self, id: UserId) -> Result<UserProfile, Error> {
        self.call_as("user lookup", ApiRequest::get(format!("/api/usuarios/{id}")))
            .await
    }

    /// `PUT /api/usuarios/{id}`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn update_user(&self, id: UserId, user: &NewUser) -> Result<UserProfile, Error> {
        let req =
            ApiRequest::put(format!("/api/usuarios/{id}")).with_json(serde_json::to_value(user)?);
        self.call_as("user update", req).await
    }

    /// `DELETE /api/usuarios/{id}`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn delete_user(&self, id: UserId) -> Result<(), Error> {
        self.call("user deletion", ApiRequest::delete(format!("/api/usuarios/{id}")))
            .await
            .map(drop)
    }

    // ── Cart ───────────────────────────────────────────────────────

    /// `GET /api/carrito/{userId}`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn get_cart(&self, user_id: UserId) -> Result<Vec<CartLine>, Error> {
        let envelope: CartEnvelope = self
            .call_as("cart fetch", ApiRequest::get(format!("/api/carrito/{user_id}")))
            .await?;
        let mut lines = envelope.lines.unwrap_or_default();
        for line in &mut lines {
            if let Some(product) = &mut line.product {
                product.absolutize_images(&self.asset_origin);
            }
        }
        Ok(lines)
    }

    /// `POST /api/carrito/agregar/{productId}`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn add_to_cart(
        &self,
        product_id: ProductId,
        item: &CartItemRequest,
    ) -> Result<(), Error> {
        let req = ApiRequest::post(format!("/api/carrito/agregar/{product_id}"))
            .with_json(json!({ "cart_item": item }));
        self.call("cart add", req).await.map(drop)
    }

    /// `PUT /api/carrito/actualizar/{productId}`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn update_cart(
        &self,
        product_id: ProductId,
        item: &CartItemRequest,
    ) -> Result<(), Error> {
        let req = ApiRequest::put(format!("/api/carrito/actualizar/{product_id}"))
            .with_json(json!({ "cart_item": item }));
        self.call("cart update", req).await.map(drop)
    }

    /// `DELETE /api/carrito/eliminar/{productId}`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn remove_from_cart(
        &self,
        product_id: ProductId,
        item: &CartItemRequest,
    ) -> Result<(), Error> {
        let req = ApiRequest::delete(format!("/api/carrito/eliminar/{product_id}"))
            .with_json(json!({ "cart_item": item }));
        self.call("cart removal", req).await.map(drop)
    }

    // ── Favorites ──────────────────────────────────────────────────

    /// `GET /api/favorites/{userId}`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn get_favorites(&self, user_id: UserId) -> Result<Vec<ProductId>, Error> {
        let envelope: FavoritesEnvelope = self
            .call_as(
                "favorites fetch",
                ApiRequest::get(format!("/api/favorites/{user_id}")),
            )
            .await?;
        Ok(envelope.favorites.unwrap_or_default())
    }

    /// `POST /api/favorites/{productId}`; returns the server's new set.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn add_favorite(
        &self,
        product_id: ProductId,
        user_id: UserId,
    ) -> Result<Vec<ProductId>, Error> {
        let req = ApiRequest::post(format!("/api/favorites/{product_id}"))
            .with_json(json!({ "user_id": user_id }));
        let envelope: FavoritesEnvelope = self.call_as("favorite add", req).await?;
        Ok(envelope.favorites.unwrap_or_default())
    }

    /// `DELETE /api/favorites/{productId}`; returns the server's new set.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn remove_favorite(
        &self,
        product_id: ProductId,
        user_id: UserId,
    ) -> Result<Vec<ProductId>, Error> {
        let req = ApiRequest::delete(format!("/api/favorites/{product_id}"))
            .with_json(json!({ "user_id": user_id }));
        let envelope: FavoritesEnvelope = self.call_as("favorite removal", req).await?;
        Ok(envelope.favorites.unwrap_or_default())
    }

    // ── Catalog ────────────────────────────────────────────────────

    /// `GET /api/productos/` with paging and filters.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn list_products(&self, query: &ProductQuery) -> Result<ProductPage, Error> {
        let mut req = ApiRequest::get("/api/productos/");
        for (key, value) in query.pairs() {
            req = req.with_query(key, value);
        }
        let envelope: ProductsEnvelope = self.call_as("product listing", req).await?;
        let mut products = envelope.products.unwrap_or_default();
        for product in &mut products {
            product.absolutize_images(&self.asset_origin);
        }
        let total = envelope.total.unwrap_or(products.len() as u64);
        Ok(ProductPage { products, total })
    }

    /// `GET /api/productos/{id}`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn get_product(&self, id: ProductId) -> Result<Product, Error> {
        let mut product: Product = self
            .call_as("product lookup", ApiRequest::get(format!("/api/productos/{id}")))
            .await?;
        product.absolutize_images(&self.asset_origin);
        Ok(product)
    }

    /// `POST /api/productos/` as `multipart/form-data`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn create_product(&self, form: Vec<FormPart>) -> Result<Product, Error> {
        let req = ApiRequest::post("/api/productos/").with_form(form);
        let mut product: Product = self.call_as("product creation", req).await?;
        product.absolutize_images(&self.asset_origin);
        Ok(product)
    }

    /// `PUT /api/productos/{id}`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn update_product(
        &self,
        id: ProductId,
        product: &ProductRequest,
    ) -> Result<Product, Error> {
        let req = ApiRequest::put(format!("/api/productos/{id}"))
            .with_json(serde_json::to_value(product)?);
        let mut updated: Product = self.call_as("product update", req).await?;
        updated.absolutize_images(&self.asset_origin);
        Ok(updated)
    }

    /// `DELETE /api/productos/{id}`; returns the removed product.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn delete_product(&self, id: ProductId) -> Result<Product, Error> {
        let mut removed: Product = self
            .call_as("product deletion", ApiRequest::delete(format!("/api/productos/{id}")))
            .await?;
        removed.absolutize_images(&self.asset_origin);
        Ok(removed)
    }

    /// `GET /api/categorias/`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn list_categories(&self) -> Result<Vec<Category>, Error> {
        self.call_as("category listing", ApiRequest::get("/api/categorias/"))
            .await
    }

    // ── Payments ───────────────────────────────────────────────────

    /// `POST /api/pagos/webpay/confirm`; returns the raw transaction status.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn confirm_webpay(&self, token: &str) -> Result<Option<String>, Error> {
        let req =
            ApiRequest::post("/api/pagos/webpay/confirm").with_json(json!({ "token": token }));
        let envelope: PaymentStatusEnvelope = self.call_as("payment confirmation", req).await?;
        Ok(envelope.status)
    }

    /// `PUT /api/usuarios/{id}/finalizar-orden`
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn finalize_order(&self, user_id: UserId) -> Result<JsonValue, Error> {
        self.call(
            "order finalization",
            ApiRequest::put(format!("/api/usuarios/{user_id}/finalizar-orden")),
        )
        .await
    }
}
