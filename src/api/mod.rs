//! Storefront HTTP API access.
//!
//! [`Transport`] moves one request over the wire; [`ApiClient`] is the
//! cross-cutting layer on top of it that attaches the bearer credential and
//! turns credential rejections into a global logout. Services only ever talk
//! to [`ApiClient`].

mod client;
#[cfg(feature = "http")]
mod http;
mod transport;

pub use client::{
    ApiClient, CartItemRequest, LoginRequest, LoginResponse, NewUser, ProductRequest,
};
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use transport::{ApiRequest, ApiResponse, FormPart, Method, Transport};
