//! Command flows against the in-memory coordinator.

use std::sync::Arc;

use cascade_cli::commands::cm::{self, CmAction, CmArgs};
use cascade_cli::commands::role::{self, RoleAction, RoleArgs};
use cascade_coordinator::Coordinator;
use cascade_roll::ROLL_KEY;
use cascade_test_utils::FakeCoordinator;

fn fake() -> Arc<FakeCoordinator> {
    Arc::new(FakeCoordinator::new())
}

fn cm_args(action: CmAction) -> CmArgs {
    CmArgs { action }
}

#[tokio::test]
async fn roll_without_role_requires_force() {
    let coordinator = fake();
    coordinator.register_node("alpha", &[]);

    let err = cm::execute(
        coordinator.clone(),
        cm_args(CmAction::Roll {
            role: None,
            force: false,
        }),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("--force"));

    // Nothing was locked or dispatched.
    assert!(coordinator.kv_peek(ROLL_KEY).is_none());
    assert!(coordinator.fired_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn forced_roll_dispatches_and_releases() {
    let coordinator = fake();
    coordinator.register_node("alpha", &[]);
    coordinator.script_replies("alpha", &["success"]);

    cm::execute(
        coordinator.clone(),
        cm_args(CmAction::Roll {
            role: None,
            force: true,
        }),
    )
    .await
    .unwrap();

    assert_eq!(coordinator.fired_events().len(), 1);
    let pair = coordinator.kv_peek(ROLL_KEY).unwrap();
    assert!(pair.session.is_none());
}

#[tokio::test]
async fn single_rejects_unknown_node() {
    let coordinator = fake();
    coordinator.register_node("alpha", &[]);

    let err = cm::execute(
        coordinator.clone(),
        cm_args(CmAction::Single {
            node: "ghost".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "node not found");
    assert!(coordinator.fired_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn single_rolls_exactly_one_host() {
    let coordinator = fake();
    coordinator.register_node("alpha", &[]);
    coordinator.register_node("foo", &[]);
    coordinator.script_replies("foo", &["success"]);

    cm::execute(
        coordinator.clone(),
        cm_args(CmAction::Single {
            node: "foo".to_string(),
        }),
    )
    .await
    .unwrap();

    let fired = coordinator.fired_events();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].node_filter, "^foo");

    let pair = coordinator.kv_peek(ROLL_KEY).unwrap();
    assert!(pair.session.is_none());
}

#[tokio::test(start_paused = true)]
async fn local_rolls_the_agents_own_node() {
    let coordinator = fake();
    coordinator.register_node("web1", &[]);
    coordinator.set_local_agent("web1", "10.0.0.5");
    coordinator.add_local_service("cascade", "cascade", &["web"], 0);
    coordinator.script_replies("web1", &["success"]);

    cm::execute(coordinator.clone(), cm_args(CmAction::Local))
        .await
        .unwrap();

    let fired = coordinator.fired_events();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].node_filter, "^web1");
}

#[tokio::test]
async fn local_refuses_unmanaged_node() {
    let coordinator = fake();
    coordinator.register_node("web1", &[]);
    coordinator.set_local_agent("web1", "10.0.0.5");
    coordinator.add_local_service("postgres", "postgres", &[], 5432);

    let err = cm::execute(coordinator.clone(), cm_args(CmAction::Local))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "node not managed by cascade");
}

#[tokio::test]
async fn role_set_registers_the_local_service() {
    let coordinator = fake();
    coordinator.set_local_agent("web1", "10.0.0.5");

    role::execute(
        coordinator.clone(),
        RoleArgs {
            action: RoleAction::Set {
                roles: vec!["db".to_string(), "web".to_string()],
            },
        },
    )
    .await
    .unwrap();

    let services = coordinator.agent_services().await.unwrap();
    let cascade = services.get("cascade").expect("service registered");
    assert_eq!(cascade.tags, vec!["db".to_string(), "web".to_string()]);
}
