//! Reconciler scenarios against in-memory nodes and ledger.
//!
//! Covers the partial-failure contract end to end: what the registry holds
//! after deploy, cancel, and sync when some nodes fail, and what a retry
//! touches.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p grid-e2e --test reconcile_scenarios
//! ```

mod common;

use std::sync::Arc;

use common::{cluster, name_proxy, node, Harness};
use grid_id::ContractId;
use grid_reconcile::kinds::{ClusterNodeObserved, KubernetesCluster};
use grid_reconcile::{
    ActionKind, ContractRegistry, ReadError, ReconcileError, ReconcilerConfig, ResourceState,
    ValidationError,
};
use grid_testing::GatewayCall;

fn registry(entries: &[(u32, u64)]) -> ContractRegistry {
    entries
        .iter()
        .map(|(n, c)| (node(*n), ContractId::new(*c)))
        .collect()
}

#[tokio::test]
async fn test_partial_failure_keeps_succeeded_nodes() {
    let h = Harness::new();
    h.gateway.fail_apply(node(2));
    let mut state = ResourceState::new(cluster(&[2]));

    let err = h.reconciler.deploy(&mut state).await.unwrap_err();

    let ReconcileError::Apply(apply) = &err else {
        panic!("expected apply error, got {err}");
    };
    assert_eq!(apply.failed_nodes(), vec![node(2)]);
    assert_eq!(apply.failures[&node(2)].action, ActionKind::Create);
    assert!(err.to_string().contains("node 2"), "{err}");

    assert_eq!(state.contracts, registry(&[(1, 100)]));
    assert_eq!(state.id, "100");
}

#[tokio::test]
async fn test_retry_after_partial_failure_only_touches_failed_node() {
    let h = Harness::new();
    h.gateway.fail_apply(node(2));
    let mut state = ResourceState::new(cluster(&[2]));
    h.reconciler.deploy(&mut state).await.unwrap_err();

    h.gateway.heal(node(2));
    h.gateway.clear_calls();
    let report = h.reconciler.deploy(&mut state).await.unwrap();

    assert_eq!(
        h.gateway.mutating_calls(),
        vec![GatewayCall::Apply {
            node: node(2),
            existing: None
        }]
    );
    assert_eq!(report.created, vec![node(2)]);
    assert_eq!(report.unchanged, vec![node(1)]);
    assert_eq!(state.contracts, registry(&[(1, 100), (2, 200)]));
    assert_eq!(state.id, "100");
}

#[tokio::test]
async fn test_failed_primary_still_counts_as_deployed() {
    let h = Harness::new();
    h.gateway.fail_apply(node(1));
    let mut state = ResourceState::new(cluster(&[2]));

    h.reconciler.deploy(&mut state).await.unwrap_err();

    assert_eq!(state.contracts, registry(&[(2, 100)]));
    assert_eq!(state.id, "");
    assert!(state.is_deployed());
    assert_eq!(h.gateway.live_contracts().len(), 1);

    h.gateway.heal(node(1));
    h.reconciler.deploy(&mut state).await.unwrap();

    assert_eq!(state.contracts, registry(&[(1, 200), (2, 100)]));
    assert_eq!(state.id, "200");
}

#[tokio::test]
async fn test_deploy_is_idempotent() {
    let h = Harness::new();
    let mut state = ResourceState::new(cluster(&[2, 3]));

    let first = h.reconciler.deploy(&mut state).await.unwrap();
    assert_eq!(first.created, vec![node(1), node(2), node(3)]);
    let contracts = state.contracts.clone();

    h.gateway.clear_calls();
    let second = h.reconciler.deploy(&mut state).await.unwrap();

    assert!(second.is_noop());
    assert_eq!(second.unchanged, vec![node(1), node(2), node(3)]);
    assert!(h.gateway.mutating_calls().is_empty());
    assert_eq!(state.contracts, contracts);
}

#[tokio::test]
async fn test_changed_definition_updates_in_place() {
    let h = Harness::new();
    let mut state = ResourceState::new(cluster(&[2]));
    h.reconciler.deploy(&mut state).await.unwrap();

    state.definition.workers[0].cpu = 4;
    h.gateway.clear_calls();
    let report = h.reconciler.deploy(&mut state).await.unwrap();

    assert_eq!(report.updated, vec![node(2)]);
    assert_eq!(report.unchanged, vec![node(1)]);
    assert_eq!(
        h.gateway.mutating_calls(),
        vec![GatewayCall::Apply {
            node: node(2),
            existing: Some(ContractId::new(200))
        }]
    );
    assert_eq!(state.contracts, registry(&[(1, 100), (2, 200)]));
}

#[tokio::test]
async fn test_remote_drift_is_repaired() {
    let h = Harness::new();
    let mut state = ResourceState::new(cluster(&[2]));
    h.reconciler.deploy(&mut state).await.unwrap();

    h.gateway.remove_workload(ContractId::new(200), "worker0");
    let report = h.reconciler.deploy(&mut state).await.unwrap();

    assert_eq!(report.updated, vec![node(2)]);
    let remote = h.gateway.deployment(ContractId::new(200)).unwrap();
    assert!(remote.get("worker0").is_some());
}

#[tokio::test]
async fn test_moving_a_worker_deletes_the_old_node() {
    let h = Harness::new();
    let mut state = ResourceState::new(cluster(&[2]));
    h.reconciler.deploy(&mut state).await.unwrap();

    state.definition = cluster(&[3]);
    let report = h.reconciler.deploy(&mut state).await.unwrap();

    assert_eq!(report.created, vec![node(3)]);
    assert_eq!(report.deleted, vec![node(2)]);
    assert_eq!(state.contracts, registry(&[(1, 100), (3, 300)]));
    assert!(!h.gateway.live_contracts().contains_key(&ContractId::new(200)));
}

#[tokio::test]
async fn test_failed_update_fetch_leaves_node_tracked() {
    let h = Harness::new();
    let mut state = ResourceState::new(cluster(&[2]));
    h.reconciler.deploy(&mut state).await.unwrap();

    h.gateway.fail_get(node(2));
    let err = h.reconciler.deploy(&mut state).await.unwrap_err();

    let ReconcileError::Apply(apply) = err else {
        panic!("expected apply error");
    };
    assert_eq!(apply.failures[&node(2)].action, ActionKind::Update);
    assert_eq!(apply.failures[&node(2)].contract_id, Some(ContractId::new(200)));
    assert_eq!(state.contracts, registry(&[(1, 100), (2, 200)]));
}

#[tokio::test]
async fn test_parallel_apply_keeps_partial_failure_contract() {
    let h = Harness::with_config(ReconcilerConfig {
        apply_parallelism: 4,
        ..common::fast_config()
    });
    h.gateway.fail_apply(node(3));
    let mut state = ResourceState::new(cluster(&[2, 3, 4]));

    let err = h.reconciler.deploy(&mut state).await.unwrap_err();

    let ReconcileError::Apply(apply) = err else {
        panic!("expected apply error");
    };
    assert_eq!(apply.failed_nodes(), vec![node(3)]);
    assert_eq!(state.contracts.len(), 3);
    assert!(!state.contracts.contains(node(3)));
    for (_, contract_id) in state.contracts.iter() {
        assert!(h.gateway.live_contracts().contains_key(&contract_id));
    }
}

#[tokio::test]
async fn test_unreachable_node_blocks_deploy() {
    let h = Harness::new();
    h.gateway.set_offline(node(2), true);
    let mut state = ResourceState::new(cluster(&[2]));

    let err = h.reconciler.deploy(&mut state).await.unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::Validation(ValidationError::NodeUnreachable { node: n, .. }) if n == node(2)
    ));
    assert!(h.gateway.mutating_calls().is_empty());
    assert!(state.contracts.is_empty());
    assert_eq!(state.id, "");
}

#[tokio::test]
async fn test_gateway_requires_public_config() {
    let h = Harness::new();
    let mut state = ResourceState::new(name_proxy(5));

    let err = h.reconciler.deploy(&mut state).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Validation(ValidationError::NoPublicConfig { .. })
    ));
    assert!(h.gateway.mutating_calls().is_empty());

    h.gateway.set_public_config(node(5));
    h.reconciler.deploy(&mut state).await.unwrap();
    assert_eq!(state.contracts, registry(&[(5, 100)]));
    assert_eq!(state.id, "100");
}

#[tokio::test]
async fn test_bad_definition_makes_no_calls() {
    let h = Harness::new();
    let mut def = cluster(&[2]);
    def.name = "my-cluster".to_string();
    let mut state = ResourceState::new(def);

    let err = h.reconciler.deploy(&mut state).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Definition(_)));
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_partial_failure() {
    let h = Harness::new();
    let mut state = ResourceState::new(cluster(&[2]));
    h.reconciler.deploy(&mut state).await.unwrap();
    assert_eq!(state.contracts, registry(&[(1, 100), (2, 200)]));

    h.gateway.fail_delete(node(2));
    let err = h.reconciler.cancel(&mut state).await.unwrap_err();

    let ReconcileError::Apply(apply) = &err else {
        panic!("expected apply error, got {err}");
    };
    assert_eq!(apply.failed_nodes(), vec![node(2)]);
    assert!(err.to_string().contains("node 2"), "{err}");
    assert_eq!(state.contracts, registry(&[(2, 200)]));

    h.gateway.heal(node(2));
    h.gateway.clear_calls();
    let report = h.reconciler.cancel(&mut state).await.unwrap();

    assert_eq!(report.deleted, vec![node(2)]);
    assert_eq!(
        h.gateway.mutating_calls(),
        vec![GatewayCall::Delete {
            node: node(2),
            contract_id: ContractId::new(200)
        }]
    );
    assert!(state.contracts.is_empty());
    assert_eq!(state.id, "");
    assert!(h.gateway.live_contracts().is_empty());
}

#[tokio::test]
async fn test_sync_prunes_invalid_contract() {
    let h = Harness::new();
    h.gateway.set_public_config(node(1));
    let mut state = ResourceState::new(name_proxy(1));
    h.reconciler.deploy(&mut state).await.unwrap();
    h.reconciler.sync(&mut state).await.unwrap();
    assert_eq!(state.observed.fqdn, "web.gent01.grid.tf");

    h.ledger.invalidate(ContractId::new(100));
    h.reconciler.sync(&mut state).await.unwrap();

    assert!(state.contracts.is_empty());
    assert_eq!(state.id, "");
    assert_eq!(state.observed, Default::default());
}

#[tokio::test]
async fn test_prune_aborts_when_ledger_fails() {
    let h = Harness::new();
    let mut state = ResourceState::new(cluster(&[2]));
    h.reconciler.deploy(&mut state).await.unwrap();

    h.ledger.invalidate(ContractId::new(200));
    h.ledger.set_unavailable(true);
    let err = h.reconciler.sync(&mut state).await.unwrap_err();

    assert!(matches!(err, ReadError::Prune(_)));
    assert_eq!(state.contracts, registry(&[(1, 100), (2, 200)]));
}

#[tokio::test]
async fn test_sync_imports_and_resets_missing_workloads() {
    let h = Harness::new();
    let mut state = ResourceState::new(cluster(&[2]));
    h.reconciler.deploy(&mut state).await.unwrap();
    h.reconciler.sync(&mut state).await.unwrap();

    let master = state.observed.master.clone();
    assert_eq!(master.ip, "10.20.1.2");
    assert_eq!(state.observed.workers["worker0"].ip, "10.20.2.2");
    assert!(!master.planetary_ip.is_empty());
    assert_ne!(state.observed.workers["worker0"], ClusterNodeObserved::default());

    h.gateway.mark_unhealthy(ContractId::new(200), "worker0");
    h.reconciler.sync(&mut state).await.unwrap();

    assert_eq!(state.observed.master, master);
    assert_eq!(state.observed.workers["worker0"], ClusterNodeObserved::default());
    assert_eq!(state.contracts, registry(&[(1, 100), (2, 200)]));
}

#[tokio::test]
async fn test_sync_fetch_failure_keeps_previous_fields() {
    let h = Harness::new();
    let mut state = ResourceState::new(cluster(&[2]));
    h.reconciler.deploy(&mut state).await.unwrap();
    h.reconciler.sync(&mut state).await.unwrap();
    let before = state.observed.clone();

    h.gateway.fail_get(node(2));
    let err = h.reconciler.sync(&mut state).await.unwrap_err();

    let ReadError::Fetch { failures } = err else {
        panic!("expected fetch error");
    };
    assert_eq!(failures.keys().copied().collect::<Vec<_>>(), vec![node(2)]);
    assert_eq!(state.observed, before);
    assert_eq!(state.contracts, registry(&[(1, 100), (2, 200)]));
}

#[tokio::test]
async fn test_no_orphaned_contracts() {
    let h = Harness::with_config(ReconcilerConfig {
        apply_parallelism: 2,
        ..common::fast_config()
    });
    let mut state = ResourceState::new(cluster(&[2, 3]));

    h.gateway.fail_apply(node(3));
    let _ = h.reconciler.deploy(&mut state).await;
    h.gateway.heal(node(3));
    h.gateway.fail_delete(node(1));
    state.definition = cluster(&[4]);
    let _ = h.reconciler.deploy(&mut state).await;
    let _ = h.reconciler.cancel(&mut state).await;
    h.gateway.heal(node(1));

    let tracked: Vec<ContractId> = state.contracts.iter().map(|(_, c)| c).collect();
    let live = h.gateway.live_contracts();
    for contract_id in h.gateway.created_contracts() {
        assert!(
            tracked.contains(&contract_id) || !live.contains_key(&contract_id),
            "contract {contract_id} is live but untracked"
        );
    }

    h.reconciler.cancel(&mut state).await.unwrap();
    assert!(h.gateway.live_contracts().is_empty());
}

#[tokio::test]
async fn test_persisted_state_round_trips_between_calls() {
    let h = Harness::new();
    h.gateway.fail_apply(node(2));
    let mut state = ResourceState::new(cluster(&[2]));
    h.reconciler.deploy(&mut state).await.unwrap_err();

    let saved = serde_json::to_string(&state).unwrap();
    let mut restored: ResourceState<KubernetesCluster> = serde_json::from_str(&saved).unwrap();
    assert_eq!(restored.contracts, registry(&[(1, 100)]));

    h.gateway.heal(node(2));
    h.reconciler.deploy(&mut restored).await.unwrap();
    assert_eq!(restored.contracts, registry(&[(1, 100), (2, 200)]));
}

#[tokio::test]
async fn test_shared_gateway_serves_many_resources() {
    let h = Arc::new(Harness::new());
    let tasks: Vec<_> = [2u32, 3, 4]
        .into_iter()
        .map(|worker| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let mut def = cluster(&[worker]);
                def.name = format!("k8s{worker}");
                let mut state = ResourceState::new(def);
                h.reconciler.deploy(&mut state).await.map(|_| state)
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        let state = task.await.unwrap().unwrap();
        assert_eq!(state.contracts.len(), 2);
        ids.push(state.id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(h.gateway.live_contracts().len(), 6);
}
