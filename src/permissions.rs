//! Role to capability mapping.
//!
//! This table is the only place capabilities are granted. The route guard
//! and any "may I show this control" check both go through
//! [`has_capability`].

use crate::session::Session;
use crate::types::{Capability, Role};

const ADMIN: &[Capability] = &[Capability::ALL];

const VENDEDOR: &[Capability] = &[
    Capability::VIEW_PRODUCTS,
    Capability::MANAGE_PRODUCTS,
    Capability::VIEW_PROFILE,
    Capability::MANAGE_FAVORITES,
    Capability::VIEW_CART,
];

const USUARIO: &[Capability] = &[
    Capability::VIEW_PRODUCTS,
    Capability::VIEW_PROFILE,
    Capability::MANAGE_FAVORITES,
    Capability::VIEW_CART,
];

const PUBLIC: &[Capability] = &[Capability::VIEW_PRODUCTS, Capability::AUTH];

/// Capabilities granted to `role`. Unknown roles get none.
#[must_use]
pub fn capabilities_of(role: &Role) -> &'static [Capability] {
    match role {
        Role::Admin => ADMIN,
        Role::Vendedor => VENDEDOR,
        Role::Usuario => USUARIO,
        Role::Public => PUBLIC,
        Role::Unknown(_) => &[],
    }
}

/// Whether `role` holds `capability`, directly or through [`Capability::ALL`].
#[must_use]
pub fn role_has_capability(role: &Role, capability: &Capability) -> bool {
    let granted = capabilities_of(role);
    granted.contains(&Capability::ALL) || granted.contains(capability)
}

/// Whether the given session (or the anonymous client) holds `capability`.
#[must_use]
pub fn has_capability(session: Option<&Session>, capability: &Capability) -> bool {
    let role = session.map_or(&Role::Public, |s| &s.role);
    role_has_capability(role, capability)
}
