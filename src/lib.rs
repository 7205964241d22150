pub mod cache;
pub mod config;
pub mod elevated;
pub mod error;
pub mod identity;
pub mod manager;
pub mod membership;
pub mod metrics;
pub mod password;
pub mod policy;
pub mod principal;
pub mod roles;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::SecurityConfig;
pub use elevated::EffectivePrincipal;
pub use error::{AuthError, Result};
pub use manager::SecurityManager;
pub use principal::{Group, PrincipalSet, User};
pub use store::MemoryDirectory;
pub use types::{ContainerId, Permission, PrincipalId, ResourceId};
