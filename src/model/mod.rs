//! Domain entities shared by the auth subsystem and the storage layer.
//!
//! Accounts and tenants are plain data; behavior shared across entity types
//! (soft deletion, URL keys) is expressed as capability traits so the storage
//! layer can apply default-scope filtering without knowing the concrete type.

mod account;
mod soft_delete;
mod tenant;

pub use account::{Account, AccountStatus, Role};
pub use soft_delete::SoftDeletable;
pub use tenant::{Tenant, URL_KEY_LENGTH, UrlKeyed, generate_url_key};
