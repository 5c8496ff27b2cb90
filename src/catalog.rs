//! Product catalog browsing and vendor product management.
//!
//! Browsing is open to everyone. Creating, editing and deleting products
//! needs [`Capability::MANAGE_PRODUCTS`]; without it nothing is sent.

use std::sync::Arc;

use crate::api::{ApiClient, FormPart, ProductRequest, Transport};
use crate::error::Error;
use crate::models::{Category, Product};
use crate::permissions::has_capability;
use crate::types::{Capability, ProductId};

const MIN_NAME_LEN: usize = 3;

/// Filters and paging for `GET /api/productos/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub categoria: Option<String>,
    pub genero: Option<String>,
}

impl ProductQuery {
    /// Request page `page` (1-based).
    #[must_use]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Request at most `limit` products per page.
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Only products of this category name.
    #[must_use]
    pub fn with_categoria(mut self, categoria: impl Into<String>) -> Self {
        self.categoria = Some(categoria.into());
        self
    }

    /// Only products of this storefront section.
    #[must_use]
    pub fn with_genero(mut self, genero: impl Into<String>) -> Self {
        self.genero = Some(genero.into());
        self
    }

    /// Query-string pairs in the order the API documents them. Unset fields are omitted.
    #[must_use]
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(categoria) = &self.categoria {
            pairs.push(("categoria", categoria.clone()));
        }
        if let Some(genero) = &self.genero {
            pairs.push(("genero", genero.clone()));
        }
        pairs
    }
}

/// One page of products plus the catalog-wide total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub total: u64,
}

impl ProductPage {
    /// Product `id` if it is on this page.
    #[must_use]
    pub fn find(&self, id: ProductId) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    /// Number of pages of `limit` items needed for `total`.
    #[must_use]
    pub fn page_count(&self, limit: u32) -> u64 {
        if limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(limit))
    }
}

/// Image attached to a new product.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    #[must_use]
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

impl std::fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Fields of a product create or edit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductDraft {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    /// Units in stock.
    pub stock: u32,
    pub categoria_id: i64,
}

impl ProductDraft {
    #[must_use]
    pub fn new(name: impl Into<String>, price: f64, stock: u32, categoria_id: i64) -> Self {
        Self {
            name: name.into(),
            description: None,
            price,
            stock,
            categoria_id,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the constraints the API enforces on product fields.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] naming the first field that fails.
    pub fn validate(&self) -> Result<(), Error> {
        let name = self.name.trim();
        if name.chars().count() < MIN_NAME_LEN {
            return Err(Error::Validation(format!(
                "product name must have at least {MIN_NAME_LEN} characters"
            )));
        }
        if !name.chars().all(|c| c.is_alphanumeric() || c == ' ') {
            return Err(Error::Validation(
                "product name may only contain letters, digits and spaces".into(),
            ));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(Error::Validation("price must be greater than 0".into()));
        }
        Ok(())
    }

    fn into_form(self, image: Option<ImageUpload>) -> Vec<FormPart> {
        let mut form = vec![
            FormPart::text("nombre", self.name.trim()),
            FormPart::text("descripcion", self.description.unwrap_or_default()),
            FormPart::text("precio", self.price),
            FormPart::text("cantidad", self.stock),
            FormPart::text("categoria_id", self.categoria_id),
        ];
        if let Some(image) = image {
            form.push(FormPart::File {
                name: "image".into(),
                file_name: image.file_name,
                content_type: image.content_type,
                bytes: image.bytes,
            });
        }
        form
    }

    fn into_request(self) -> ProductRequest {
        ProductRequest {
            name: self.name.trim().to_owned(),
            description: self.description,
            price: self.price,
            stock: self.stock,
            categoria_id: self.categoria_id,
            image_url: None,
        }
    }
}

impl From<&Product> for ProductDraft {
    fn from(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price,
            stock: product
                .stock
                .and_then(|s| u32::try_from(s).ok())
                .unwrap_or_default(),
            categoria_id: product.categoria_id.unwrap_or_default(),
        }
    }
}

/// Product browsing and management. Image locations come back absolute.
pub struct Catalog<T> {
    api: Arc<ApiClient<T>>,
}

impl<T: Transport> Catalog<T> {
    #[must_use]
    pub fn new(api: Arc<ApiClient<T>>) -> Self {
        Self { api }
    }

    /// Fetch one page of products matching `query`.
    ///
    /// # Errors
    ///
    /// API errors as-is.
    pub async fn page(&self, query: &ProductQuery) -> Result<ProductPage, Error> {
        let page = self.api.list_products(query).await?;
        tracing::debug!(count = page.products.len(), total = page.total, "Product page fetched");
        Ok(page)
    }

    /// Fetch a single product.
    ///
    /// # Errors
    ///
    /// API errors as-is; an unknown id is `Error::Api` with status 404.
    pub async fn product(&self, id: ProductId) -> Result<Product, Error> {
        self.api.get_product(id).await
    }

    /// Categories products can be filed under.
    ///
    /// # Errors
    ///
    /// API errors as-is.
    pub async fn categories(&self) -> Result<Vec<Category>, Error> {
        self.api.list_categories().await
    }

    /// Publish a new product, optionally with an image.
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`], [`Error::PermissionDenied`] or
    /// [`Error::Validation`] before anything is sent; API errors otherwise.
    pub async fn create_product(
        &self,
        draft: ProductDraft,
        image: Option<ImageUpload>,
    ) -> Result<Product, Error> {
        self.require_manager()?;
        draft.validate()?;
        let created = self.api.create_product(draft.into_form(image)).await?;
        tracing::info!(product_id = %created.id, "Product created");
        Ok(created)
    }

    /// Replace the fields of product `id`. The stored image is kept.
    ///
    /// # Errors
    ///
    /// Same as [`Catalog::create_product`]; an unknown id is `Error::Api`
    /// with status 404.
    pub async fn update_product(
        &self,
        id: ProductId,
        draft: ProductDraft,
    ) -> Result<Product, Error> {
        self.require_manager()?;
        draft.validate()?;
        let updated = self.api.update_product(id, &draft.into_request()).await?;
        tracing::info!(product_id = %id, "Product updated");
        Ok(updated)
    }

    /// Remove product `id` and return what was removed.
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`] or [`Error::PermissionDenied`] before
    /// anything is sent; API errors otherwise.
    pub async fn delete_product(&self, id: ProductId) -> Result<Product, Error> {
        self.require_manager()?;
        let removed = self.api.delete_product(id).await?;
        tracing::info!(product_id = %id, "Product deleted");
        Ok(removed)
    }

    fn require_manager(&self) -> Result<(), Error> {
        let session = self
            .api
            .sessions()
            .current_session()
            .ok_or(Error::NotAuthenticated)?;
        if !has_capability(Some(&session), &Capability::MANAGE_PRODUCTS) {
            tracing::debug!(role = %session.role, "Product management denied");
            return Err(Error::PermissionDenied);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiResponse, Method};
    use crate::testing::{FakeTransport, api_with, product, signed_in_as};
    use crate::types::Role;
    use serde_json::json;

    fn catalog() -> (Catalog<FakeTransport>, FakeTransport) {
        let (api, fake) = api_with(FakeTransport::new());
        (Catalog::new(Arc::new(api)), fake)
    }

    #[test]
    fn pairs_skip_unset_filters() {
        let q = ProductQuery::default().with_page(1).with_genero("mujer");
        assert_eq!(
            q.pairs(),
            vec![("page", "1".to_string()), ("genero", "mujer".to_string())]
        );
        assert!(ProductQuery::default().pairs().is_empty());
    }

    #[test]
    fn page_lookup_and_count() {
        let page = ProductPage {
            products: vec![product(1, 10.0), product(2, 20.0)],
            total: 25,
        };
        assert_eq!(page.find(ProductId(2)).unwrap().price, 20.0);
        assert!(page.find(ProductId(3)).is_none());
        assert_eq!(page.page_count(12), 3);
        assert_eq!(page.page_count(0), 0);
    }

    #[tokio::test]
    async fn page_resolves_images_and_total() {
        let (api, fake) = api_with(FakeTransport::new());
        let mut polera = product(1, 9990.0);
        polera.images = vec!["polera_azul.jpg".into()];
        fake.add_product(polera);
        fake.add_product(product(2, 4990.0));

        let catalog = Catalog::new(Arc::new(api));
        let page = catalog.page(&ProductQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(
            page.find(ProductId(1)).unwrap().images,
            vec!["http://127.0.0.1:8000/uploads/CarpetasDeProductos/polera/polera_azul.jpg"]
        );
    }

    #[test]
    fn draft_validation_mirrors_the_api() {
        assert!(ProductDraft::new("Polera Azul 2", 9990.0, 0, 1).validate().is_ok());
        for bad in [
            ProductDraft::new("ab", 10.0, 1, 1),
            ProductDraft::new("Polera-azul", 10.0, 1, 1),
            ProductDraft::new("Polera", 0.0, 1, 1),
            ProductDraft::new("Polera", f64::NAN, 1, 1),
        ] {
            assert!(matches!(bad.validate(), Err(Error::Validation(_))), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn vendor_creates_product_as_multipart() {
        let (catalog, fake) = catalog();
        signed_in_as(&catalog.api, 7, Role::Vendedor);

        let draft = ProductDraft::new(" Gorro Lana ", 4990.0, 12, 3).with_description("Tejido");
        let image = ImageUpload::new("gorro_1.jpg", "image/jpeg", vec![0xff, 0xd8]);
        let created = catalog.create_product(draft, Some(image)).await.unwrap();

        assert_eq!(created.name, "Gorro Lana");
        assert_eq!(created.stock, Some(12));
        assert_eq!(
            created.images,
            vec!["http://127.0.0.1:8000/uploads/CarpetasDeProductos/gorro/gorro_1.jpg"]
        );
        let requests = fake.requests();
        let sent = &requests[0];
        assert_eq!(sent.method, Method::Post);
        assert_eq!(sent.path, "/api/productos/");
        assert!(sent.body.is_none());
        assert_eq!(sent.form_value("precio"), Some("4990"));
        assert_eq!(sent.form_value("categoria_id"), Some("3"));
        assert!(
            sent.form
                .as_ref()
                .unwrap()
                .iter()
                .any(|p| matches!(p, FormPart::File { name, .. } if name == "image"))
        );
    }

    #[tokio::test]
    async fn update_keeps_image_and_delete_returns_removed() {
        let (catalog, fake) = catalog();
        signed_in_as(&catalog.api, 1, Role::Admin);
        let mut polera = product(4, 9990.0);
        polera.images = vec!["polera_azul.jpg".into()];
        fake.add_product(polera);

        let current = catalog.product(ProductId(4)).await.unwrap();
        let mut draft = ProductDraft::from(&current);
        draft.price = 7990.0;
        let updated = catalog.update_product(ProductId(4), draft).await.unwrap();
        assert_eq!(updated.price, 7990.0);
        assert_eq!(updated.images, current.images);

        let requests = fake.requests();
        let put = &requests[1];
        assert_eq!(put.method, Method::Put);
        assert_eq!(put.body.as_ref().unwrap()["image_url"], json!(null));

        let removed = catalog.delete_product(ProductId(4)).await.unwrap();
        assert_eq!(removed.id, ProductId(4));
        assert_eq!(
            catalog.product(ProductId(4)).await.unwrap_err().status(),
            Some(404)
        );
    }

    #[tokio::test]
    async fn management_needs_the_capability() {
        let (catalog, fake) = catalog();
        let draft = ProductDraft::new("Polera", 10.0, 1, 1);

        let err = catalog.create_product(draft, None).await.unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));

        signed_in_as(&catalog.api, 2, Role::Usuario);
        let err = catalog.delete_product(ProductId(1)).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied));
        assert!(err.notice().is_none());
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn invalid_draft_is_not_sent() {
        let (catalog, fake) = catalog();
        signed_in_as(&catalog.api, 7, Role::Vendedor);
        let err = catalog
            .update_product(ProductId(1), ProductDraft::new("x", 10.0, 1, 1))
            .await
            .unwrap_err();
        assert!(err.notice().is_some());
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn categories_are_listed() {
        let (catalog, fake) = catalog();
        fake.respond_next(ApiResponse::ok(json!([
            {"id": 1, "nombre": "Poleras", "descripcion": "Algodón", "genero": "mujer"},
            {"id": 2, "nombre": "Gorros", "descripcion": null, "genero": "hombre"}
        ])));
        let categories = catalog.categories().await.unwrap();
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[1].genero, "hombre");
        assert_eq!(fake.requests()[0].path, "/api/categorias/");
    }
}
