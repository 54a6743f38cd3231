use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use grantline_core::{AuthzError, OrganizationId, UserId};
use tokio::time::Instant;

use crate::engine_config::EngineConfig;
use crate::permission_cache::PermissionCache;
use crate::request_context::RequestContext;
use crate::test_support::{TestEngine, create_role_input};

#[tokio::test]
async fn billing_viewer_scenario() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();
    let admin = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    engine.permission("PAYMENTS", "WRITE");

    let role = service
        .create_role(
            &ctx,
            organization_id,
            create_role_input("billing-viewer", &[payments_read]),
            admin,
        )
        .await;
    let role = match role {
        Ok(role) => role,
        Err(error) => panic!("role creation should succeed: {error}"),
    };

    let assigned = service
        .assign_role(&ctx, user_id, role.id, organization_id, admin, None)
        .await;
    assert!(assigned.is_ok());

    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
            .await
            .ok(),
        Some(true)
    );
    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "WRITE")
            .await
            .ok(),
        Some(false)
    );

    let removed = service
        .remove_role(&ctx, user_id, role.id, organization_id, admin, None)
        .await;
    assert!(removed.is_ok());

    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
            .await
            .ok(),
        Some(false)
    );
}

#[tokio::test]
async fn batch_check_matches_individual_checks() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    engine.permission("USERS", "WRITE");
    let role_id = engine
        .seed_custom_role(organization_id, "viewer", &[payments_read])
        .await;
    let assigned = service
        .assign_role(&ctx, user_id, role_id, organization_id, UserId::new(), None)
        .await;
    assert!(assigned.is_ok());

    let requests = vec![
        ("PAYMENTS".to_owned(), "READ".to_owned()),
        ("USERS".to_owned(), "WRITE".to_owned()),
    ];
    let batch = service
        .check_permissions(&ctx, user_id, organization_id, &requests)
        .await;

    let mut individual = Vec::new();
    for (resource, action) in &requests {
        let answer = service
            .has_permission(&ctx, user_id, organization_id, resource, action)
            .await;
        individual.push(match answer {
            Ok(answer) => answer,
            Err(error) => panic!("individual check should succeed: {error}"),
        });
    }

    assert_eq!(batch.ok(), Some(individual));
}

#[tokio::test]
async fn expired_assignment_never_grants() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    let role_id = engine
        .seed_custom_role(organization_id, "viewer", &[payments_read])
        .await;

    let assigned = service
        .assign_role(
            &ctx,
            user_id,
            role_id,
            organization_id,
            UserId::new(),
            Some(Utc::now() - Duration::seconds(1)),
        )
        .await;
    assert!(assigned.is_ok());

    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
            .await
            .ok(),
        Some(false)
    );
}

#[tokio::test]
async fn permission_update_is_visible_once_the_call_returns() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();
    let admin = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    let payments_write = engine.permission("PAYMENTS", "WRITE");
    let role_id = engine
        .seed_custom_role(organization_id, "viewer", &[payments_read])
        .await;
    let assigned = service
        .assign_role(&ctx, user_id, role_id, organization_id, admin, None)
        .await;
    assert!(assigned.is_ok());

    // Warm the cache with the old permission set.
    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "WRITE")
            .await
            .ok(),
        Some(false)
    );

    let updated = service
        .update_role_permissions(
            &ctx,
            role_id,
            organization_id,
            BTreeSet::from([payments_read, payments_write]),
            admin,
        )
        .await;
    assert!(updated.is_ok());

    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "WRITE")
            .await
            .ok(),
        Some(true)
    );
}

#[tokio::test]
async fn role_deletion_cascades_to_checks() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();
    let admin = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    let role_id = engine
        .seed_custom_role(organization_id, "viewer", &[payments_read])
        .await;
    let assigned = service
        .assign_role(&ctx, user_id, role_id, organization_id, admin, None)
        .await;
    assert!(assigned.is_ok());

    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
            .await
            .ok(),
        Some(true)
    );

    let deleted = service
        .delete_role(&ctx, role_id, organization_id, admin)
        .await;
    assert!(deleted.is_ok());

    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
            .await
            .ok(),
        Some(false)
    );
    assert_eq!(
        service
            .list_active_assignments(user_id, organization_id)
            .await
            .map(|assignments| assignments.len())
            .ok(),
        Some(0)
    );
}

#[tokio::test]
async fn warmed_cache_agrees_with_store_computation() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    let role_id = engine
        .seed_custom_role(organization_id, "viewer", &[payments_read])
        .await;
    let assigned = service
        .assign_role(&ctx, user_id, role_id, organization_id, UserId::new(), None)
        .await;
    assert!(assigned.is_ok());

    let cold = service
        .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
        .await;
    let warm = service
        .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
        .await;

    assert_eq!(cold.ok(), Some(true));
    assert_eq!(warm.ok(), Some(true));
    // The second answer came from the cache, not another store pass.
    assert_eq!(engine.store().assignment_reads.load(Ordering::SeqCst), 1);
    assert_eq!(engine.cache().puts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_coalesce_into_one_recompute() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    let role_id = engine
        .seed_custom_role(organization_id, "viewer", &[payments_read])
        .await;
    let assigned = service
        .assign_role(&ctx, user_id, role_id, organization_id, UserId::new(), None)
        .await;
    assert!(assigned.is_ok());

    engine.store().set_read_delay(StdDuration::from_millis(10));
    let (first, second, third, fourth) = tokio::join!(
        service.has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ"),
        service.has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ"),
        service.has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ"),
        service.has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ"),
    );

    assert_eq!(first.ok(), Some(true));
    assert_eq!(second.ok(), Some(true));
    assert_eq!(third.ok(), Some(true));
    assert_eq!(fourth.ok(), Some(true));
    // One leader recomputed; the other three waited and re-probed the cache.
    assert_eq!(engine.store().assignment_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_store_surfaces_timeout() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();

    engine.store().set_read_delay(StdDuration::from_secs(1));

    let result = service
        .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
        .await;
    assert!(matches!(result, Err(AuthzError::Timeout(_))));
}

#[tokio::test(start_paused = true)]
async fn explicit_deadline_is_honored() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let user_id = UserId::new();

    engine.store().set_read_delay(StdDuration::from_millis(50));
    let ctx = RequestContext::default().with_deadline(Instant::now() + StdDuration::from_millis(10));

    let result = service
        .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
        .await;
    assert!(matches!(result, Err(AuthzError::Timeout(_))));
}

#[tokio::test]
async fn cache_read_failure_falls_back_to_stores() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    let role_id = engine
        .seed_custom_role(organization_id, "viewer", &[payments_read])
        .await;
    let assigned = service
        .assign_role(&ctx, user_id, role_id, organization_id, UserId::new(), None)
        .await;
    assert!(assigned.is_ok());

    engine.cache().fail_reads.store(true, Ordering::SeqCst);

    let result = service
        .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
        .await;
    assert_eq!(result.ok(), Some(true));
    assert_eq!(engine.cache().puts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cache_write_failure_does_not_fail_the_check() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    let role_id = engine
        .seed_custom_role(organization_id, "viewer", &[payments_read])
        .await;
    let assigned = service
        .assign_role(&ctx, user_id, role_id, organization_id, UserId::new(), None)
        .await;
    assert!(assigned.is_ok());

    engine.cache().fail_writes.store(true, Ordering::SeqCst);

    let result = service
        .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
        .await;
    assert_eq!(result.ok(), Some(true));
}

#[tokio::test]
async fn assignment_is_visible_after_a_cached_denial() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    let role_id = engine
        .seed_custom_role(organization_id, "viewer", &[payments_read])
        .await;

    // Cache an empty effective set first.
    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
            .await
            .ok(),
        Some(false)
    );

    let assigned = service
        .assign_role(&ctx, user_id, role_id, organization_id, UserId::new(), None)
        .await;
    assert!(assigned.is_ok());

    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
            .await
            .ok(),
        Some(true)
    );
}

#[tokio::test(start_paused = true)]
async fn ttl_expiry_triggers_recompute() {
    let engine = TestEngine::with_config(EngineConfig {
        cache_ttl: StdDuration::from_secs(1),
        ..EngineConfig::default()
    });
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();

    let first = service
        .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
        .await;
    assert_eq!(first.ok(), Some(false));
    assert_eq!(engine.store().assignment_reads.load(Ordering::SeqCst), 1);

    tokio::time::advance(StdDuration::from_secs(2)).await;

    let second = service
        .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
        .await;
    assert_eq!(second.ok(), Some(false));
    assert_eq!(engine.store().assignment_reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn require_permission_denies_with_an_error() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();

    let result = service
        .require_permission(&ctx, UserId::new(), organization_id, "PAYMENTS", "READ")
        .await;
    assert!(matches!(result, Err(AuthzError::AccessDenied(_))));
}

#[tokio::test]
async fn retired_permission_stops_granting() {
    let engine = TestEngine::new();
    let service = engine.authorization_service();
    let organization_id = OrganizationId::new();
    let ctx = RequestContext::default();
    let user_id = UserId::new();

    let payments_read = engine.permission("PAYMENTS", "READ");
    let role_id = engine
        .seed_custom_role(organization_id, "viewer", &[payments_read])
        .await;
    let assigned = service
        .assign_role(&ctx, user_id, role_id, organization_id, UserId::new(), None)
        .await;
    assert!(assigned.is_ok());

    engine.store().retire_permission(payments_read);
    let evicted = service
        .effective_permissions(&ctx, user_id, organization_id)
        .await;
    assert!(evicted.is_ok());

    // The cached set predates the retirement; force a recompute.
    let cleared = engine.cache().invalidate(user_id, organization_id).await;
    assert!(cleared.is_ok());

    assert_eq!(
        service
            .has_permission(&ctx, user_id, organization_id, "PAYMENTS", "READ")
            .await
            .ok(),
        Some(false)
    );
}
