use std::time::Duration;

use autocluster_core::test_utils::{
    MemoryBackend,
    MemoryMembershipStore,
    StaticProbe,
    StoreCall,
};
use autocluster_core::{
    AutoclusterBuilder,
    AutoclusterConfig,
    AutoclusterError,
    BackendKind,
    ConfigError,
    DiscoveryOp,
    FailureMode,
    JoinDecision,
    JoinStep,
    MembershipScope,
    NodeId,
    NodeSet,
    NodeType,
    Orchestrator,
    Outcome,
    RegistrationOutcome,
};

fn nodes(ids: &[&str]) -> NodeSet {
    ids.iter().copied().collect()
}

fn config(local: &str, mode: FailureMode) -> AutoclusterConfig {
    AutoclusterConfig::new(local)
        .with_backend(BackendKind::Consul)
        .with_failure_mode(mode)
        .with_startup_delay(Duration::ZERO)
}

fn orchestrator(
    config: AutoclusterConfig,
    backend: &MemoryBackend,
    store: &MemoryMembershipStore,
    probe: &StaticProbe,
) -> Orchestrator {
    AutoclusterBuilder::new(config, store.clone(), store.clone(), probe.clone())
        .with_backend(BackendKind::Consul, backend.factory())
        .with_delay_seed(1)
        .build()
}

fn join_sequence(peer: &str, node_type: NodeType) -> Vec<StoreCall> {
    vec![
        StoreCall::StopService,
        StoreCall::StopStore,
        StoreCall::ResetStore,
        StoreCall::Join(NodeId::from(peer), node_type),
        StoreCall::StartStore,
        StoreCall::StartService,
    ]
}

#[tokio::test]
async fn test_joins_discovered_peer_when_store_is_alone() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Success);
    assert!(report.error.is_none());
    assert_eq!(report.registration, Some(RegistrationOutcome::AlreadyMember));
    assert_eq!(
        report.decision,
        Some(JoinDecision::SingleKnownNode(nodes(&["node-b"])))
    );
    assert_eq!(report.joined, Some(NodeId::from("node-b")));
    assert_eq!(backend.num_register_calls(), 0);
    assert_eq!(probe.probed(), vec![NodeId::from("node-b")]);
    assert_eq!(store.join_steps(), join_sequence("node-b", NodeType::Disc));
    assert_eq!(
        store.calls().first(),
        Some(&StoreCall::CurrentMembers(MembershipScope::All))
    );

    let stats = orchestrator.statistics();
    assert_eq!(stats.num_runs(), 1);
    assert_eq!(stats.num_joins(), 1);
    assert_eq!(stats.num_failures(), 0);
}

#[tokio::test]
async fn test_first_node_seeds_cluster() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a"]);
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.decision, Some(JoinDecision::NoOtherNodes));
    assert_eq!(report.joined, None);
    assert_eq!(backend.num_node_list_calls(), 1);
    assert_eq!(backend.num_register_calls(), 0);
    assert!(store.join_steps().is_empty());
    assert!(probe.probed().is_empty());
}

#[tokio::test]
async fn test_registers_absent_node_and_uses_first_listing() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", Vec::<&str>::new());
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.registration, Some(RegistrationOutcome::Registered));
    assert_eq!(report.decision, Some(JoinDecision::NoOtherNodes));
    assert_eq!(backend.num_register_calls(), 1);
    // The backend isn't listed a second time after registering.
    assert_eq!(backend.num_node_list_calls(), 1);
    assert!(backend.nodes().contains(&NodeId::from("node-a")));
    assert_eq!(orchestrator.statistics().num_registrations(), 1);
}

#[tokio::test]
async fn test_registration_failure_is_resolved_by_failure_mode() {
    let _ = tracing_subscriber::fmt::try_init();

    for (mode, expected) in [
        (FailureMode::Stop, Outcome::Failure),
        (FailureMode::Ignore, Outcome::Success),
    ] {
        let backend = MemoryBackend::new("node-a", ["node-b"]);
        backend.fail_register("lease rejected");
        let store = MemoryMembershipStore::new("node-a");
        let probe = StaticProbe::all_reachable();
        let orchestrator = orchestrator(config("node-a", mode), &backend, &store, &probe);

        let report = orchestrator.run_with_report().await;

        assert_eq!(report.outcome, expected);
        assert!(matches!(
            report.registration,
            Some(RegistrationOutcome::RegistrationFailed(ref reason)) if reason.contains("lease rejected")
        ));
        assert!(matches!(
            report.error,
            Some(AutoclusterError::Discovery {
                backend: BackendKind::Consul,
                op: DiscoveryOp::Register,
                ..
            })
        ));
        assert!(store.calls().is_empty());
    }
}

#[tokio::test]
async fn test_discovery_failure_ignored() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    backend.fail_node_list("connection refused");
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Ignore), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Success);
    assert!(matches!(
        report.error,
        Some(AutoclusterError::Discovery { op: DiscoveryOp::NodeList, .. })
    ));
    assert_eq!(report.registration, None);
    assert_eq!(backend.num_register_calls(), 0);
    assert!(store.calls().is_empty());

    let stats = orchestrator.statistics();
    assert_eq!(stats.num_ignored_failures(), 1);
    assert_eq!(stats.num_failures(), 0);
}

#[tokio::test]
async fn test_unreachable_sole_candidate_stops_startup() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::reachable(Vec::<&str>::new());
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Failure);
    assert!(matches!(
        report.error,
        Some(AutoclusterError::NoReachablePeer { ref candidates }) if candidates == &nodes(&["node-b"])
    ));
    assert!(store.join_steps().is_empty());

    let stats = orchestrator.statistics();
    assert_eq!(stats.num_unreachable_peers(), 1);
    assert_eq!(stats.num_failures(), 1);
}

#[tokio::test]
async fn test_unreachable_candidates_ignored() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b", "node-c"]);
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::reachable(Vec::<&str>::new());
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Ignore), &backend, &store, &probe);

    assert_eq!(orchestrator.run().await, Outcome::Success);
    assert!(store.join_steps().is_empty());
    assert_eq!(orchestrator.statistics().num_unreachable_peers(), 2);
}

#[tokio::test]
async fn test_first_reachable_candidate_is_joined() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-d", "node-a", "node-c", "node-b"]);
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::reachable(["node-c", "node-d"]);
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.joined, Some(NodeId::from("node-c")));
    assert_eq!(store.join_steps(), join_sequence("node-c", NodeType::Disc));
}

#[tokio::test]
async fn test_already_clustered_is_a_no_op() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::with_members("node-a", ["node-a", "node-c"]);
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.decision, Some(JoinDecision::AlreadyClustered));
    assert!(store.join_steps().is_empty());
    assert!(probe.probed().is_empty());
}

#[tokio::test]
async fn test_store_view_trusted_over_discovery() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::with_members("node-a", ["node-d", "node-c"]);
    let probe = StaticProbe::reachable(["node-b", "node-d"]);
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(
        report.decision,
        Some(JoinDecision::NeedsJoin(nodes(&["node-c", "node-d"])))
    );
    assert_eq!(report.joined, Some(NodeId::from("node-d")));
    assert!(!probe.probed().contains(&NodeId::from("node-b")));
}

#[tokio::test]
async fn test_repeated_runs_do_not_rejoin() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::with_members("node-a", ["node-a", "node-b"]);
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    for _ in 0..2 {
        let report = orchestrator.run_with_report().await;
        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.registration, Some(RegistrationOutcome::AlreadyMember));
        assert_eq!(report.decision, Some(JoinDecision::AlreadyClustered));
    }

    assert!(store.join_steps().is_empty());
    assert_eq!(backend.num_register_calls(), 0);
    assert_eq!(orchestrator.statistics().num_runs(), 2);
}

#[tokio::test]
async fn test_run_after_join_is_a_no_op() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    assert_eq!(orchestrator.run().await, Outcome::Success);
    assert_eq!(store.members(), nodes(&["node-a", "node-b"]));
    let num_steps = store.join_steps().len();

    let report = orchestrator.run_with_report().await;
    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.decision, Some(JoinDecision::AlreadyClustered));
    assert_eq!(store.join_steps().len(), num_steps);
    assert_eq!(orchestrator.statistics().num_joins(), 1);
}

#[tokio::test]
async fn test_join_failure_leaves_services_stopped() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::new("node-a");
    store.fail_on(JoinStep::JoinStore);
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Failure);
    assert_eq!(report.joined, None);
    assert!(matches!(
        report.error,
        Some(AutoclusterError::JoinExecution { step: JoinStep::JoinStore, ref peer, .. })
            if peer == &NodeId::from("node-b")
    ));

    let mut expected = join_sequence("node-b", NodeType::Disc);
    expected.truncate(4);
    assert_eq!(store.join_steps(), expected);
    assert_eq!(orchestrator.statistics().num_joins(), 0);
}

#[tokio::test]
async fn test_join_failure_aborts_remaining_steps() {
    let _ = tracing_subscriber::fmt::try_init();

    for (step, num_issued) in [(JoinStep::StopService, 1), (JoinStep::StartService, 6)] {
        let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
        let store = MemoryMembershipStore::new("node-a");
        store.fail_on(step);
        let probe = StaticProbe::all_reachable();
        let orchestrator =
            orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

        let report = orchestrator.run_with_report().await;

        assert_eq!(report.outcome, Outcome::Failure);
        assert_eq!(report.joined, None);
        assert!(matches!(
            report.error,
            Some(AutoclusterError::JoinExecution { step: failed, .. }) if failed == step
        ));

        let mut expected = join_sequence("node-b", NodeType::Disc);
        expected.truncate(num_issued);
        assert_eq!(store.join_steps(), expected);
        assert_eq!(orchestrator.statistics().num_failures(), 1);
    }
}

#[tokio::test]
async fn test_late_join_failure_ignored() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::new("node-a");
    store.fail_on(JoinStep::StartService);
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Ignore), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.joined, None);
    // The store joined before the host service failed to come back.
    assert_eq!(store.members(), nodes(&["node-a", "node-b"]));
    assert_eq!(orchestrator.statistics().num_ignored_failures(), 1);
    assert_eq!(orchestrator.statistics().num_joins(), 0);
}

#[tokio::test]
async fn test_registers_then_joins_discovered_peer() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-b"]);
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.registration, Some(RegistrationOutcome::Registered));
    assert_eq!(
        report.decision,
        Some(JoinDecision::SingleKnownNode(nodes(&["node-b"])))
    );
    assert_eq!(report.joined, Some(NodeId::from("node-b")));
    assert_eq!(backend.nodes(), nodes(&["node-a", "node-b"]));
    assert_eq!(store.join_steps(), join_sequence("node-b", NodeType::Disc));

    let stats = orchestrator.statistics();
    assert_eq!(stats.num_registrations(), 1);
    assert_eq!(stats.num_joins(), 1);
}

#[tokio::test]
async fn test_node_type_passed_to_join() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::all_reachable();
    let cfg = config("node-a", FailureMode::Stop).with_node_type(NodeType::Ram);
    let orchestrator = orchestrator(cfg, &backend, &store, &probe);

    assert_eq!(orchestrator.run().await, Outcome::Success);
    assert_eq!(store.join_steps(), join_sequence("node-b", NodeType::Ram));
}

#[tokio::test]
async fn test_backend_selection_failure_is_resolved_by_failure_mode() {
    let _ = tracing_subscriber::fmt::try_init();

    for (mode, expected) in [
        (FailureMode::Stop, Outcome::Failure),
        (FailureMode::Ignore, Outcome::Success),
    ] {
        let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
        let store = MemoryMembershipStore::new("node-a");
        let probe = StaticProbe::all_reachable();

        let mut unconfigured = config("node-a", mode.clone());
        unconfigured.backend = None;
        let unconfigured = orchestrator(unconfigured, &backend, &store, &probe);
        let report = unconfigured.run_with_report().await;
        assert_eq!(report.outcome, expected);
        assert!(matches!(
            report.error,
            Some(AutoclusterError::Configuration(ConfigError::MissingBackend))
        ));

        let unsupported = config("node-a", mode).with_backend(BackendKind::Etcd);
        let report = orchestrator(unsupported, &backend, &store, &probe)
            .run_with_report()
            .await;
        assert_eq!(report.outcome, expected);
        assert!(matches!(
            report.error,
            Some(AutoclusterError::Configuration(ConfigError::UnsupportedBackend(
                BackendKind::Etcd
            )))
        ));

        assert_eq!(report.registration, None);
        assert_eq!(backend.num_node_list_calls(), 0);
        assert!(store.calls().is_empty());

        let stats = unconfigured.statistics();
        let num_resolved = stats.num_failures() + stats.num_ignored_failures();
        assert_eq!(num_resolved, 1);
    }
}

#[tokio::test]
async fn test_default_env_config_without_backend_continues_startup() -> anyhow::Result<()>
{
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::all_reachable();
    let cfg = AutoclusterConfig::from_env_map(
        "node-a",
        [("AUTOCLUSTER_TYPE", "unconfigured"), ("AUTOCLUSTER_DELAY", "0")],
    )?;
    let orchestrator = orchestrator(cfg, &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Success);
    assert!(matches!(
        report.error,
        Some(AutoclusterError::Configuration(ConfigError::MissingBackend))
    ));
    assert_eq!(orchestrator.statistics().num_ignored_failures(), 1);
    assert!(store.calls().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_invalid_failure_mode_continues_startup() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a"]);
    backend.fail_node_list("timeout");
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::all_reachable();
    let mode = FailureMode::Invalid("explode".to_string());
    let orchestrator = orchestrator(config("node-a", mode), &backend, &store, &probe);

    assert_eq!(orchestrator.run().await, Outcome::Success);
    assert_eq!(orchestrator.statistics().num_ignored_failures(), 1);
}

#[tokio::test]
async fn test_membership_store_failure_is_resolved_by_failure_mode() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a", "node-b"]);
    let store = MemoryMembershipStore::new("node-a");
    store.fail_current_members();
    let probe = StaticProbe::all_reachable();
    let orchestrator =
        orchestrator(config("node-a", FailureMode::Stop), &backend, &store, &probe);

    let report = orchestrator.run_with_report().await;

    assert_eq!(report.outcome, Outcome::Failure);
    assert!(matches!(report.error, Some(AutoclusterError::Membership(_))));
    assert!(store.join_steps().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_startup_delay_is_bounded() {
    let _ = tracing_subscriber::fmt::try_init();

    let backend = MemoryBackend::new("node-a", ["node-a"]);
    let store = MemoryMembershipStore::new("node-a");
    let probe = StaticProbe::all_reachable();
    let max = Duration::from_secs(30);
    let cfg = config("node-a", FailureMode::Stop).with_startup_delay(max);
    let orchestrator = orchestrator(cfg, &backend, &store, &probe);

    let start = tokio::time::Instant::now();
    assert_eq!(orchestrator.run().await, Outcome::Success);
    assert!(start.elapsed() <= max);
}
