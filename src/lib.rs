#![doc = include_str!("../README.md")]

pub mod api;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod error;
pub mod favorites;
pub mod guard;
pub mod models;
pub mod payment;
pub mod permissions;
pub mod session;
pub mod storage;
pub mod storefront;
pub mod theme;
pub mod types;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use api::{ApiClient, ApiRequest, ApiResponse, FormPart, Method, Transport};
#[cfg(feature = "http")]
pub use api::HttpTransport;
pub use auth::{AuthService, Credentials, Registration};
pub use cart::CartSynchronizer;
pub use catalog::{Catalog, ImageUpload, ProductDraft, ProductPage, ProductQuery};
pub use config::ClientConfig;
pub use error::{Error, Notice, NoticeKind};
pub use favorites::FavoritesSynchronizer;
pub use guard::{GuardDecision, RouteGuard};
pub use models::{CartKey, CartLine, Category, PaymentMethods, Product, UserProfile};
pub use payment::{PaymentOutcome, PaymentService};
pub use permissions::has_capability;
pub use session::{EndReason, Session, SessionEvent, SessionStore};
pub use storage::{ClientStorage, FileStorage, MemoryStorage};
pub use storefront::Storefront;
pub use theme::{Theme, ThemeStore};
pub use types::{BearerToken, Capability, ProductId, Role, UserId};
pub use users::{UserDirectory, UserDraft};
