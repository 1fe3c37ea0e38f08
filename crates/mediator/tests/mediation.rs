//! Conversation mediation scenarios over in-memory stores.

use serde_json::json;
use std::sync::Arc;

use sentinel_bus::{InMemoryMessageStore, MessageBus, MessageTypeRegistry};
use sentinel_config::{BusConfig, ConsensusConfig, MediatorConfig};
use sentinel_consensus::{ConsensusEngine, InMemoryConsensusStore};
use sentinel_core::{
    ConflictType, ConversationState, EndReason, Error, Participant, ParticipantRole,
    ResolutionStrategy,
};
use sentinel_mediator::{ConversationMediator, ConversationMessage, InMemoryConversationStore};

fn mediator() -> ConversationMediator {
    let bus = Arc::new(MessageBus::new(
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(MessageTypeRegistry::with_system_types()),
        BusConfig::default(),
    ));
    let consensus = ConsensusEngine::new(
        Arc::new(InMemoryConsensusStore::new()),
        ConsensusConfig::default(),
    );
    ConversationMediator::new(
        Arc::new(InMemoryConversationStore::new()),
        bus,
        consensus,
        MediatorConfig::default(),
    )
}

fn participants() -> Vec<Participant> {
    vec![
        Participant::new("p1", ParticipantRole::Initiator, 1.0),
        Participant::new("p2", ParticipantRole::Contributor, 1.0),
        Participant::new("p3", ParticipantRole::Contributor, 1.0),
    ]
}

#[tokio::test]
async fn test_conflict_to_majority_vote_resolution() {
    let mediator = mediator();
    let conversation_id = mediator
        .initiate("release gating", "approve or reject the release", participants(), None)
        .await
        .unwrap();

    for (agent, decision) in [("p1", "approve"), ("p2", "approve"), ("p3", "reject")] {
        mediator
            .broadcast(conversation_id, agent, json!({"decision": decision}))
            .await
            .unwrap();
    }

    let conflicts = mediator.detect_conflicts(conversation_id).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::ContradictoryResponses);
    assert_eq!(
        mediator.state(conversation_id).await.unwrap(),
        ConversationState::ConflictDetected
    );

    let result = mediator
        .resolve(
            conversation_id,
            conflicts[0].conflict_id,
            Some(ResolutionStrategy::MajorityVote),
            None,
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.decision.as_deref(), Some("approve"));
    let agreement = result.agreement_ratio.unwrap();
    assert!((agreement - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(
        mediator.state(conversation_id).await.unwrap(),
        ConversationState::Active
    );

    let snapshot = mediator.context(conversation_id).await.unwrap();
    let stored = &snapshot.conflicts[0];
    assert_eq!(stored.strategy_used, Some(ResolutionStrategy::MajorityVote));
    assert_eq!(stored.resolved_successfully, Some(true));
    assert!(stored.resolved_at.is_some());
}

#[tokio::test]
async fn test_mediate_runs_detection_and_resolution() {
    let mediator = mediator();
    let conversation_id = mediator
        .initiate("limits", "set exposure limit", participants(), None)
        .await
        .unwrap();

    for (agent, decision) in [("p1", "approve"), ("p2", "reject"), ("p3", "approve")] {
        mediator
            .broadcast(conversation_id, agent, json!({"decision": decision}))
            .await
            .unwrap();
    }

    let results = mediator.mediate(conversation_id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].decision.as_deref(), Some("approve"));
}

#[tokio::test]
async fn test_turn_taking_blocks_other_senders() {
    let mediator = mediator();
    let conversation_id = mediator
        .initiate("review", "collect assessment", participants(), None)
        .await
        .unwrap();

    mediator
        .send(
            conversation_id,
            ConversationMessage::new("p1", "p2", json!({"question": "assessment?"}))
                .expecting_response(),
        )
        .await
        .unwrap();
    assert_eq!(
        mediator.state(conversation_id).await.unwrap(),
        ConversationState::WaitingForResponse
    );

    // An out-of-turn message is recorded but does not advance state.
    mediator
        .send(
            conversation_id,
            ConversationMessage::new("p3", "p1", json!({"note": "interjection"})),
        )
        .await
        .unwrap();
    assert_eq!(
        mediator.state(conversation_id).await.unwrap(),
        ConversationState::WaitingForResponse
    );

    // The awaited respondent advances it.
    mediator
        .send(
            conversation_id,
            ConversationMessage::new("p2", "p1", json!({"decision": "approve"})),
        )
        .await
        .unwrap();
    assert_eq!(
        mediator.state(conversation_id).await.unwrap(),
        ConversationState::Active
    );

    let history = mediator.history(conversation_id).await.unwrap();
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn test_expert_arbitration_uses_highest_expertise() {
    let mediator = mediator();
    let experts = vec![
        Participant::new("senior", ParticipantRole::Arbiter, 5.0),
        Participant::new("junior", ParticipantRole::Contributor, 1.0),
    ];
    let conversation_id = mediator
        .initiate("dispute", "rank remediation", experts, None)
        .await
        .unwrap();

    mediator
        .broadcast(conversation_id, "senior", json!({"decision": "hold"}))
        .await
        .unwrap();
    mediator
        .broadcast(conversation_id, "junior", json!({"decision": "release"}))
        .await
        .unwrap();

    let conflicts = mediator.detect_conflicts(conversation_id).await.unwrap();
    let result = mediator
        .resolve(
            conversation_id,
            conflicts[0].conflict_id,
            Some(ResolutionStrategy::ExpertArbitration),
            None,
        )
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.decision.as_deref(), Some("hold"));
}

#[tokio::test]
async fn test_manual_override_requires_decision() {
    let mediator = mediator();
    let conversation_id = mediator
        .initiate("override", "manual call", participants(), None)
        .await
        .unwrap();

    mediator
        .broadcast(conversation_id, "p1", json!({"decision": "approve"}))
        .await
        .unwrap();
    mediator
        .broadcast(conversation_id, "p2", json!({"decision": "reject"}))
        .await
        .unwrap();

    let conflicts = mediator.detect_conflicts(conversation_id).await.unwrap();
    let err = mediator
        .resolve(
            conversation_id,
            conflicts[0].conflict_id,
            Some(ResolutionStrategy::ManualOverride),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let result = mediator
        .resolve(
            conversation_id,
            conflicts[0].conflict_id,
            Some(ResolutionStrategy::ManualOverride),
            Some("hold pending review".to_string()),
        )
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.decision.as_deref(), Some("hold pending review"));
}

#[tokio::test]
async fn test_terminal_conversation_rejects_operations() {
    let mediator = mediator();
    let conversation_id = mediator
        .initiate("done", "finish", participants(), None)
        .await
        .unwrap();

    mediator
        .end(conversation_id, EndReason::ObjectiveMet)
        .await
        .unwrap();
    assert_eq!(
        mediator.state(conversation_id).await.unwrap(),
        ConversationState::Completed
    );

    let err = mediator
        .broadcast(conversation_id, "p1", json!({"decision": "late"}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StateConflict(_)));

    let err = mediator.end(conversation_id, EndReason::Cancelled).await.unwrap_err();
    assert!(matches!(err, Error::StateConflict(_)));
}

#[tokio::test]
async fn test_non_participant_cannot_send() {
    let mediator = mediator();
    let conversation_id = mediator
        .initiate("closed circle", "members only", participants(), None)
        .await
        .unwrap();

    let err = mediator
        .broadcast(conversation_id, "outsider", json!({"decision": "approve"}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}
