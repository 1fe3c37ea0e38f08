//! Resolution strategy building blocks
//!
//! The deterministic pieces of conflict resolution. Voting strategies
//! run through the consensus engine; the helpers here pick defaults,
//! build the session, and compute the strategies that need no vote.

use sentinel_core::{
    ConflictType, ConsensusAlgorithm, ConsensusSessionConfig, Participant, ResolutionStrategy,
};

use crate::conflict::Stance;

/// Default strategy applied when the caller does not pick one.
pub fn default_strategy(conflict_type: ConflictType) -> ResolutionStrategy {
    match conflict_type {
        ConflictType::ContradictoryResponses => ResolutionStrategy::MajorityVote,
        ConflictType::ResourceConflict => ResolutionStrategy::WeightedVote,
        ConflictType::PriorityConflict => ResolutionStrategy::ExpertArbitration,
        ConflictType::TimingConflict => ResolutionStrategy::CompromiseNegotiation,
        ConflictType::ProtocolMismatch => ResolutionStrategy::Escalation,
        ConflictType::ConsensusFailure => ResolutionStrategy::Escalation,
        ConflictType::ExternalConstraint => ResolutionStrategy::ExternalMediation,
    }
}

/// Build the consensus session for a vote among conversation
/// participants. Majority votes weigh everyone 1.0; weighted votes use
/// expertise weights.
pub fn vote_session(
    topic: &str,
    participants: &[Participant],
    weighted: bool,
    threshold: f64,
) -> ConsensusSessionConfig {
    let algorithm = if weighted {
        ConsensusAlgorithm::WeightedMajority
    } else {
        ConsensusAlgorithm::Majority
    };
    let mut config = ConsensusSessionConfig::new(topic, algorithm)
        .with_threshold(threshold)
        .with_max_rounds(1)
        // The mediator closes the round itself once stances are cast.
        .with_timeout_per_round_secs(0);
    for participant in participants {
        let weight = if weighted {
            participant.expertise_weight
        } else {
            1.0
        };
        config = config.with_participant(participant.agent_id.clone(), weight);
    }
    config
}

/// Decision of the highest-expertise participant with a stance.
/// Ties break lexicographically on agent id for determinism.
pub fn expert_arbitration(
    participants: &[Participant],
    stances: &[Stance],
) -> Option<(String, String)> {
    let mut experts: Vec<&Participant> = participants
        .iter()
        .filter(|p| stances.iter().any(|s| s.agent_id == p.agent_id))
        .collect();
    experts.sort_by(|a, b| {
        b.expertise_weight
            .partial_cmp(&a.expertise_weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });
    let expert = experts.first()?;
    let stance = stances.iter().find(|s| s.agent_id == expert.agent_id)?;
    Some((expert.agent_id.clone(), stance.decision.clone()))
}

/// Midpoint compromise over numeric stances; `None` when stances are not
/// all numeric (no automatic compromise exists).
pub fn numeric_compromise(stances: &[Stance]) -> Option<String> {
    if stances.is_empty() {
        return None;
    }
    let values: Vec<f64> = stances
        .iter()
        .map(|s| s.decision.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(format!("{mean:.2}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_core::ParticipantRole;
    use uuid::Uuid;

    fn stance(agent: &str, decision: &str) -> Stance {
        Stance {
            agent_id: agent.to_string(),
            decision: decision.to_string(),
            confidence: 0.8,
            message_id: Uuid::new_v4(),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn test_every_conflict_type_has_a_default() {
        for conflict_type in [
            ConflictType::ContradictoryResponses,
            ConflictType::ResourceConflict,
            ConflictType::PriorityConflict,
            ConflictType::TimingConflict,
            ConflictType::ProtocolMismatch,
            ConflictType::ConsensusFailure,
            ConflictType::ExternalConstraint,
        ] {
            // Must not panic and must be deterministic.
            assert_eq!(default_strategy(conflict_type), default_strategy(conflict_type));
        }
    }

    #[test]
    fn test_vote_session_weights() {
        let participants = vec![
            Participant::new("a", ParticipantRole::Contributor, 2.5),
            Participant::new("b", ParticipantRole::Contributor, 1.0),
        ];
        let majority = vote_session("t", &participants, false, 0.5);
        assert!(majority.participants.iter().all(|p| p.voting_weight == 1.0));

        let weighted = vote_session("t", &participants, true, 0.5);
        assert_eq!(weighted.participants[0].voting_weight, 2.5);
        assert_eq!(weighted.algorithm, ConsensusAlgorithm::WeightedMajority);
    }

    #[test]
    fn test_expert_arbitration_prefers_expertise_then_id() {
        let participants = vec![
            Participant::new("zed", ParticipantRole::Contributor, 3.0),
            Participant::new("amy", ParticipantRole::Contributor, 3.0),
            Participant::new("bob", ParticipantRole::Contributor, 1.0),
        ];
        let stances = vec![stance("zed", "hold"), stance("amy", "release"), stance("bob", "hold")];
        let (expert, decision) = expert_arbitration(&participants, &stances).unwrap();
        assert_eq!(expert, "amy");
        assert_eq!(decision, "release");
    }

    #[test]
    fn test_expert_arbitration_ignores_silent_experts() {
        let participants = vec![
            Participant::new("expert", ParticipantRole::Arbiter, 9.0),
            Participant::new("junior", ParticipantRole::Contributor, 1.0),
        ];
        let stances = vec![stance("junior", "approve")];
        let (expert, decision) = expert_arbitration(&participants, &stances).unwrap();
        assert_eq!(expert, "junior");
        assert_eq!(decision, "approve");
    }

    #[test]
    fn test_numeric_compromise() {
        let stances = vec![stance("a", "10"), stance("b", "20")];
        assert_eq!(numeric_compromise(&stances).as_deref(), Some("15.00"));

        let mixed = vec![stance("a", "10"), stance("b", "reject")];
        assert!(numeric_compromise(&mixed).is_none());
    }
}
