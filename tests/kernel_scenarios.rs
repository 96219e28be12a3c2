//! End-to-end scenarios exercising the kernel through its public API:
//! consensus flows, budget pressure with rebalancing, conflict
//! resolution, and heartbeat failure/recovery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use swarmflow::consensus::{ConsensusManager, WeightedConsensus};
use swarmflow::core::{AgentInfo, Placement, SwarmCoordinator, TopologyMode};
use swarmflow::state::{ConflictResolver, ResolutionStrategy, StateVersion};
use swarmflow::utils::config::{ConsensusConfig, HeartbeatConfig, TokenBudgetConfig};
use swarmflow::{ConsensusDecision, HealthState, HeartbeatMonitor, ResourceController, VoteChoice};

async fn mesh(ids: &[&str]) -> Arc<SwarmCoordinator> {
    let coordinator = Arc::new(SwarmCoordinator::new(TopologyMode::Mesh));
    for id in ids {
        let inbox = coordinator
            .register_agent(AgentInfo::new(id, "worker"), Placement::default())
            .await
            .unwrap();
        std::mem::forget(inbox);
    }
    coordinator
}

#[tokio::test]
async fn quorum_accept_two_of_three() {
    let coordinator = mesh(&["a1", "a2", "a3"]).await;
    let manager =
        Arc::new(ConsensusManager::new(coordinator, &ConsensusConfig::default()).unwrap());

    let voter = Arc::clone(&manager);
    let votes = tokio::spawn(async move {
        // The request publishes the proposal id inside the broadcast; in
        // these tests we discover it by polling the active set.
        loop {
            if voter.active_proposal_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // The only active proposal is ours.
        let proposal_id = voter
            .active_proposal_ids()
            .await
            .into_iter()
            .next()
            .unwrap();
        for (agent, choice) in [
            ("a1", VoteChoice::For),
            ("a2", VoteChoice::For),
            ("a3", VoteChoice::Against),
        ] {
            voter
                .record_vote(&proposal_id, agent, choice, 1.0, HashMap::new())
                .await
                .unwrap();
        }
    });

    let outcome = manager
        .request_consensus(json!({"id": "p1"}), Some("quorum"), Some(2_000))
        .await
        .unwrap();
    votes.await.unwrap();

    assert_eq!(outcome.decision, ConsensusDecision::Approved);
    assert_eq!(outcome.votes_for, 2);
    assert_eq!(outcome.votes_against, 1);
}

#[tokio::test]
async fn weighted_reject_below_threshold() {
    let coordinator = mesh(&["a1", "a2", "a3"]).await;
    let manager =
        Arc::new(ConsensusManager::new(coordinator, &ConsensusConfig::default()).unwrap());

    let weights = HashMap::from([
        ("a1".to_string(), 2.0),
        ("a2".to_string(), 1.0),
        ("a3".to_string(), 1.0),
    ]);
    manager
        .register_algorithm(
            "expert_weighted",
            Arc::new(WeightedConsensus::new(0.6, weights).unwrap()),
        )
        .await
        .unwrap();

    let voter = Arc::clone(&manager);
    let votes = tokio::spawn(async move {
        loop {
            if voter.active_proposal_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let proposal_id = voter
            .active_proposal_ids()
            .await
            .into_iter()
            .next()
            .unwrap();
        for (agent, choice) in [
            ("a1", VoteChoice::For),
            ("a2", VoteChoice::Against),
            ("a3", VoteChoice::Against),
        ] {
            voter
                .record_vote(&proposal_id, agent, choice, 1.0, HashMap::new())
                .await
                .unwrap();
        }
    });

    let outcome = manager
        .request_consensus(json!({"id": "p2"}), Some("expert_weighted"), Some(2_000))
        .await
        .unwrap();
    votes.await.unwrap();

    // Weighted FOR = 2 of total weight 4 = 0.5 < 0.6.
    assert_eq!(outcome.decision, ConsensusDecision::Rejected);
}

#[tokio::test]
async fn byzantine_flags_vote_changer_and_approves() {
    let ids = ["a1", "a2", "a3", "a4", "a5", "a6", "a7"];
    let coordinator = mesh(&ids).await;
    let config = ConsensusConfig::default();
    let manager = Arc::new(ConsensusManager::new(coordinator, &config).unwrap());
    manager
        .register_algorithm(
            "byzantine_f2",
            Arc::new(swarmflow::consensus::ByzantineConsensus::new(2, 3).unwrap()),
        )
        .await
        .unwrap();

    let voter = Arc::clone(&manager);
    let votes = tokio::spawn(async move {
        loop {
            if voter.active_proposal_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let proposal_id = voter
            .active_proposal_ids()
            .await
            .into_iter()
            .next()
            .unwrap();

        for round in 0..3 {
            if round > 0 {
                voter.advance_round(&proposal_id).await.unwrap();
            }
            for i in 1..=5 {
                voter
                    .record_vote(
                        &proposal_id,
                        &format!("a{i}"),
                        VoteChoice::For,
                        1.0,
                        HashMap::new(),
                    )
                    .await
                    .unwrap();
            }
            voter
                .record_vote(&proposal_id, "a6", VoteChoice::Against, 1.0, HashMap::new())
                .await
                .unwrap();
            // a7 lies: FOR in round 1, AGAINST afterwards.
            let choice = if round == 0 {
                VoteChoice::For
            } else {
                VoteChoice::Against
            };
            voter
                .record_vote(&proposal_id, "a7", choice, 1.0, HashMap::new())
                .await
                .unwrap();
        }
    });

    let outcome = manager
        .request_consensus(json!({"id": "p3"}), Some("byzantine_f2"), Some(3_000))
        .await
        .unwrap();
    votes.await.unwrap();

    assert_eq!(outcome.decision, ConsensusDecision::Approved);
    assert_eq!(outcome.votes_for, 5);
    assert_eq!(outcome.metadata["malicious_detected"], json!(1));
}

#[tokio::test]
async fn token_exhaustion_warning_then_rebalance() {
    let controller = ResourceController::new(TokenBudgetConfig::default());
    controller
        .tokens()
        .allocate("swarm-a", Some(100_000))
        .await
        .unwrap();
    controller
        .tokens()
        .allocate("swarm-b", Some(100_000))
        .await
        .unwrap();

    let alerts = controller.tokens().consume("swarm-a", 85_000).await.unwrap();
    assert!(alerts.iter().any(|a| a.swarm_id == "swarm-a"));

    let bottlenecks = controller.get_bottlenecks().await;
    assert!(bottlenecks.iter().any(|b| b.kind == "token_exhaustion"));

    let plan = controller.tokens().rebalance().await.unwrap();
    // base = (200k - 10k) / 2 = 95_000 >= consumed + 1k headroom.
    assert_eq!(plan["swarm-a"], 95_000);
    assert_eq!(plan["swarm-b"], 95_000);
}

#[tokio::test]
async fn lww_conflict_picks_latest_timestamp() {
    let resolver = ConflictResolver::new(ResolutionStrategy::Lww);
    let at = |ms| DateTime::<Utc>::from_timestamp_millis(ms).unwrap();

    let versions = vec![
        StateVersion::new("task_queue", json!(1), 1, "a1").with_timestamp(at(1_000)),
        StateVersion::new("task_queue", json!(2), 2, "a2").with_timestamp(at(2_000)),
        StateVersion::new("task_queue", json!(3), 3, "a3").with_timestamp(at(1_500)),
    ];

    let merged = resolver.resolve("task_queue", &versions).unwrap();
    assert_eq!(merged.value, json!(2));
    assert_eq!(merged.agent_id, "a2");
}

#[tokio::test]
async fn heartbeat_failure_then_recovery() {
    // Literal scenario: 1s interval, threshold 3, 3.5s of silence.
    let config = HeartbeatConfig {
        interval_ms: 1_000,
        failure_threshold: 3,
        history_size: 10,
        check_interval_ms: 100,
        initial_state_healthy: true,
    };
    let monitor = HeartbeatMonitor::new(config);
    monitor.start().await;
    monitor.start_monitoring("agent-001", None, None).await;
    monitor
        .record_heartbeat("agent-001", HashMap::new())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(
        monitor.check_agent_health("agent-001").await.unwrap(),
        HealthState::Failed
    );

    monitor
        .record_heartbeat("agent-001", HashMap::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        monitor.check_agent_health("agent-001").await.unwrap(),
        HealthState::Healthy
    );

    monitor.shutdown().await;
}
