//! Resource action flows through the middleware.
//!
//! Solvency, then the operation, then sync, and how each failure is
//! reported back to the caller.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p grid-e2e --test middleware_flows
//! ```

mod common;

use std::sync::Arc;

use common::{cluster, node, Harness, TWIN};
use grid_id::{ContractId, GroupId};
use grid_reconcile::kinds::ClusterNodeObserved;
use grid_reconcile::middleware::READ_WARNING_SUMMARY;
use grid_reconcile::{Action, ActionMiddleware, GroupState, Reconciler, ResourceState, Severity};
use grid_testing::{FakeGateway, FakeLedger};

struct Flow {
    gateway: Arc<FakeGateway>,
    ledger: Arc<FakeLedger>,
    middleware: ActionMiddleware<FakeGateway, FakeLedger>,
}

fn flow() -> Flow {
    let Harness {
        gateway,
        ledger,
        reconciler,
    } = Harness::new();
    Flow {
        gateway,
        ledger,
        middleware: ActionMiddleware::new(reconciler),
    }
}

#[tokio::test]
async fn test_create_deploys_and_imports() {
    let f = flow();

    let outcome = f
        .middleware
        .run(Action::Create, ResourceState::new(cluster(&[2])))
        .await;

    assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
    assert_eq!(outcome.state.id, "100");
    assert_eq!(outcome.state.contracts.len(), 2);
    assert_eq!(outcome.state.observed.master.ip, "10.20.1.2");
    assert!(!outcome.state.observed.workers["worker0"].console_url.is_empty());
}

#[tokio::test]
async fn test_insufficient_balance_blocks_every_mutation() {
    let f = flow();
    f.ledger.set_balance(TWIN, 19_999);

    let outcome = f
        .middleware
        .run(Action::Create, ResourceState::new(cluster(&[2])))
        .await;

    assert!(outcome.has_errors());
    assert!(outcome.diagnostics[0].summary.contains("minimum required is 20000"));
    assert!(f.gateway.calls().is_empty());
    assert!(outcome.state.contracts.is_empty());
}

#[tokio::test]
async fn test_unknown_account_counts_as_empty() {
    let middleware = ActionMiddleware::new(Reconciler::new(
        Arc::new(FakeGateway::new()),
        Arc::new(FakeLedger::new()),
        TWIN,
        common::fast_config(),
    ));

    let outcome = middleware
        .run(Action::Create, ResourceState::new(cluster(&[2])))
        .await;

    assert!(outcome.has_errors());
    assert!(outcome.diagnostics[0].summary.contains("account contains 0"));
}

#[tokio::test]
async fn test_partial_failure_still_writes_back_state() {
    let f = flow();
    f.gateway.fail_apply(node(2));

    let outcome = f
        .middleware
        .run(Action::Create, ResourceState::new(cluster(&[2])))
        .await;

    assert!(outcome.has_errors());
    assert!(outcome.diagnostics[0].summary.contains("node 2"));
    assert_eq!(outcome.state.id, "100");
    assert_eq!(
        outcome.state.contracts.get(node(1)),
        Some(ContractId::new(100))
    );
    assert!(!outcome.state.contracts.contains(node(2)));
    // Sync still ran for the node that made it.
    assert!(!outcome.state.observed.master.ip.is_empty());
}

#[tokio::test]
async fn test_sync_failure_after_mutation_is_an_error() {
    let f = flow();
    f.gateway.fail_get(node(2));

    let outcome = f
        .middleware
        .run(Action::Create, ResourceState::new(cluster(&[2])))
        .await;

    assert!(outcome.has_errors());
    assert_eq!(outcome.warnings().count(), 0);
    assert_eq!(outcome.state.contracts.len(), 2);
}

#[tokio::test]
async fn test_read_failure_is_downgraded_and_keeps_fields() {
    let f = flow();
    let created = f
        .middleware
        .run(Action::Create, ResourceState::new(cluster(&[2])))
        .await;
    assert!(!created.has_errors());
    let known = created.state.observed.clone();

    f.gateway.fail_get(node(2));
    let outcome = f.middleware.run(Action::Read, created.state).await;

    assert!(!outcome.has_errors());
    let warning = outcome.warnings().next().unwrap();
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.summary, READ_WARNING_SUMMARY);
    assert!(warning.detail.contains("node 2"), "{}", warning.detail);
    assert_eq!(outcome.state.observed, known);
    assert_eq!(outcome.state.id, "100");
}

#[tokio::test]
async fn test_read_with_ledger_down_returns_cached_state() {
    let f = flow();
    let created = f
        .middleware
        .run(Action::Create, ResourceState::new(cluster(&[2])))
        .await;
    let known = created.state.clone();

    f.ledger.set_unavailable(true);
    let outcome = f.middleware.run(Action::Read, created.state).await;

    assert!(!outcome.has_errors());
    assert_eq!(outcome.warnings().count(), 1);
    assert_eq!(outcome.state.contracts, known.contracts);
    assert_eq!(outcome.state.observed, known.observed);
}

#[tokio::test]
async fn test_read_after_external_cancel_clears_id() {
    let f = flow();
    let created = f
        .middleware
        .run(Action::Create, ResourceState::new(cluster(&[])))
        .await;
    assert_eq!(created.state.id, "100");

    f.ledger.invalidate(ContractId::new(100));
    let outcome = f.middleware.run(Action::Read, created.state).await;

    assert!(outcome.diagnostics.is_empty());
    assert!(!outcome.state.is_deployed());
    assert_eq!(outcome.state.observed.master, ClusterNodeObserved::default());
}

#[tokio::test]
async fn test_delete_clears_everything() {
    let f = flow();
    let created = f
        .middleware
        .run(Action::Create, ResourceState::new(cluster(&[2])))
        .await;

    let outcome = f.middleware.run(Action::Delete, created.state).await;

    assert!(outcome.diagnostics.is_empty());
    assert_eq!(outcome.state.id, "");
    assert!(outcome.state.contracts.is_empty());
    assert!(f.gateway.live_contracts().is_empty());
}

#[tokio::test]
async fn test_group_lifecycle() {
    let f = flow();

    let created = f.middleware.run_group(Action::Create, GroupState::default()).await;
    assert!(created.diagnostics.is_empty());
    assert_eq!(created.state.id, Some(GroupId::new(1)));

    let updated = f.middleware.run_group(Action::Update, created.state.clone()).await;
    assert!(updated.has_errors());
    assert!(updated.diagnostics[0].summary.contains("not allowed"));
    assert_eq!(updated.state, created.state);

    let read = f.middleware.run_group(Action::Read, created.state.clone()).await;
    assert!(read.diagnostics.is_empty());
    assert_eq!(read.state.id, Some(GroupId::new(1)));

    let deleted = f.middleware.run_group(Action::Delete, read.state).await;
    assert!(deleted.diagnostics.is_empty());
    assert_eq!(deleted.state.id, None);
    assert!(f.ledger.groups().is_empty());
}

#[tokio::test]
async fn test_group_gone_from_ledger_reads_as_absent() {
    let f = flow();
    let created = f.middleware.run_group(Action::Create, GroupState::default()).await;

    f.ledger.drop_group(GroupId::new(1));
    let read = f.middleware.run_group(Action::Read, created.state).await;

    assert!(read.diagnostics.is_empty());
    assert_eq!(read.state.id, None);
}

#[tokio::test]
async fn test_every_action_checks_solvency_once() {
    let f = flow();
    let created = f
        .middleware
        .run(Action::Create, ResourceState::new(cluster(&[2])))
        .await;
    let read = f.middleware.run(Action::Read, created.state).await;
    f.middleware.run(Action::Delete, read.state).await;

    assert_eq!(f.ledger.balance_checks(), 3);
}
