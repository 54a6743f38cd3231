//! Ports and services of the authorization engine.

#![forbid(unsafe_code)]

mod assignment_service;
mod authorization_service;
mod catalog_service;
mod engine_config;
mod event_publisher;
mod permission_cache;
mod request_context;
mod role_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use assignment_service::{AssignmentRepository, AssignmentService};
pub use authorization_service::AuthorizationService;
pub use catalog_service::{CatalogService, PermissionCatalog};
pub use engine_config::EngineConfig;
pub use event_publisher::EventPublisher;
pub use permission_cache::PermissionCache;
pub use request_context::RequestContext;
pub use role_service::{CreateRoleInput, RoleRepository, RoleService};
