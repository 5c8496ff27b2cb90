//! Wire models shared by several services.
//!
//! The API is loose about some field shapes (a field may arrive as a string,
//! a list, or be missing). Those are normalized here during deserialization so
//! consumers only ever see one canonical shape.

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::types::{ProductId, Role, UserId};

/// Account identity as returned by the API and persisted under the `user` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "correo", alias = "email", default)]
    pub email: String,
    /// Absent on some legacy payloads.
    #[serde(rename = "rol", default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "metodo_pago", default)]
    pub payment_methods: PaymentMethods,
}

/// Payment methods of a user, normalized from `null`, a single string or a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PaymentMethodsWire")]
pub struct PaymentMethods(pub Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum PaymentMethodsWire {
    Many(Vec<String>),
    One(String),
    Missing(Option<()>),
}

impl From<PaymentMethodsWire> for PaymentMethods {
    fn from(wire: PaymentMethodsWire) -> Self {
        match wire {
            PaymentMethodsWire::Many(v) => Self(v),
            PaymentMethodsWire::One(s) if s.trim().is_empty() => Self::default(),
            PaymentMethodsWire::One(s) => Self(vec![s]),
            PaymentMethodsWire::Missing(_) => Self::default(),
        }
    }
}

/// Catalog product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(rename = "precio")]
    pub price: f64,
    /// Units in stock.
    #[serde(rename = "cantidad", default)]
    pub stock: Option<i64>,
    #[serde(default)]
    pub categoria_id: Option<i64>,
    /// Image locations. Relative until [`Product::absolutize_images`] runs.
    #[serde(rename = "image_url", default, deserialize_with = "image_list")]
    pub images: Vec<String>,
}

impl Product {
    /// Rewrite every image location into an absolute URL under `origin`.
    ///
    /// - `http…` URLs are kept.
    /// - paths containing `/CarpetasDeProductos/` are joined to the origin.
    /// - bare file names map to `/uploads/CarpetasDeProductos/<folder>/<file>`,
    ///   where `<folder>` is the file name up to the first `_`, or up to the
    ///   extension when there is no `_`.
    pub fn absolutize_images(&mut self, origin: &Url) {
        for image in &mut self.images {
            *image = absolute_image_url(origin, image);
        }
    }
}

fn absolute_image_url(origin: &Url, raw: &str) -> String {
    if raw.starts_with("http") {
        return raw.to_owned();
    }
    let path = if raw.contains("/CarpetasDeProductos/") {
        raw.to_owned()
    } else {
        let filename = raw.rsplit('/').next().unwrap_or(raw);
        let folder = match filename.split_once('_') {
            Some((folder, _)) => folder,
            None => filename.split('.').next().unwrap_or(filename),
        };
        format!("/uploads/CarpetasDeProductos/{folder}/{filename}")
    };
    let base = origin.as_str().trim_end_matches('/');
    let joined = format!("{base}{path}");
    // percent-encode spaces and the like the same way a browser would
    Url::parse(&joined).map_or(joined, String::from)
}

/// Product category; `genero` is the storefront section it is listed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genero: String,
}

/// Identity of a cart line: one product in one color and size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CartKey {
    pub product_id: ProductId,
    pub color: String,
    pub size: String,
}

impl CartKey {
    #[must_use]
    pub fn new(product_id: ProductId, color: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            product_id,
            color: color.into(),
            size: size.into(),
        }
    }
}

/// One line of the server-side cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    #[serde(rename = "producto_id")]
    pub product_id: ProductId,
    #[serde(rename = "cantidad")]
    pub quantity: u32,
    pub color: String,
    #[serde(rename = "talla")]
    pub size: String,
    /// Present when the API embeds the product in the line.
    #[serde(rename = "producto", default, skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
}

impl CartLine {
    #[must_use]
    pub fn key(&self) -> CartKey {
        CartKey::new(self.product_id, self.color.clone(), self.size.clone())
    }

    #[must_use]
    pub fn matches(&self, key: &CartKey) -> bool {
        self.product_id == key.product_id && self.color == key.color && self.size == key.size
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImageWire {
    Many(Vec<String>),
    One(String),
}

fn image_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let wire = Option::<ImageWire>::deserialize(deserializer)?;
    let list = match wire {
        None => Vec::new(),
        Some(ImageWire::Many(v)) => v,
        Some(ImageWire::One(s)) => split_encoded_list(&s),
    };
    Ok(list
        .into_iter()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Some rows store the list as text, e.g. `"[""a.jpg"",""b.jpg""]"`.
fn split_encoded_list(raw: &str) -> Vec<String> {
    let mut s = raw.trim();
    if s.starts_with("\"[") && s.ends_with("]\"") {
        s = &s[1..s.len() - 1];
    }
    let unquoted = s.replace("\"\"", "\"");
    if let Ok(list) = serde_json::from_str::<Vec<String>>(&unquoted) {
        return list;
    }
    let inner = unquoted.trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .map(|part| part.trim().trim_matches('"').to_owned())
        .collect()
}
