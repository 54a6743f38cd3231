//! Infrastructure adapters for the authorization engine ports.

#![forbid(unsafe_code)]

mod broadcast_invalidation_channel;
mod in_memory_authz_store;
mod in_memory_permission_cache;
mod postgres_assignment_repository;
mod postgres_permission_catalog;
mod postgres_role_repository;
mod redis_permission_cache;

pub use broadcast_invalidation_channel::{
    BroadcastInvalidationChannel, CacheInvalidationListener,
};
pub use in_memory_authz_store::InMemoryAuthzStore;
pub use in_memory_permission_cache::InMemoryPermissionCache;
pub use postgres_assignment_repository::PostgresAssignmentRepository;
pub use postgres_permission_catalog::PostgresPermissionCatalog;
pub use postgres_role_repository::PostgresRoleRepository;
pub use redis_permission_cache::RedisPermissionCache;
