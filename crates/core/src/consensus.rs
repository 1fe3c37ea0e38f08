//! Consensus session types
//!
//! A consensus session runs bounded multi-round voting among weighted
//! participants and yields a single decision with a confidence score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Voting algorithm for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusAlgorithm {
    Unanimous,
    Majority,
    WeightedMajority,
    RankedChoice,
    Quorum,
}

impl ConsensusAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unanimous => "unanimous",
            Self::Majority => "majority",
            Self::WeightedMajority => "weighted_majority",
            Self::RankedChoice => "ranked_choice",
            Self::Quorum => "quorum",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unanimous" => Some(Self::Unanimous),
            "majority" => Some(Self::Majority),
            "weighted_majority" => Some(Self::WeightedMajority),
            "ranked_choice" => Some(Self::RankedChoice),
            "quorum" => Some(Self::Quorum),
            _ => None,
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusState {
    Created,
    RoundOpen,
    RoundClosed,
    RoundTimeout,
    Completed,
    Deadlock,
}

impl ConsensusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::RoundOpen => "round_open",
            Self::RoundClosed => "round_closed",
            Self::RoundTimeout => "round_timeout",
            Self::Completed => "completed",
            Self::Deadlock => "deadlock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "round_open" => Some(Self::RoundOpen),
            "round_closed" => Some(Self::RoundClosed),
            "round_timeout" => Some(Self::RoundTimeout),
            "completed" => Some(Self::Completed),
            "deadlock" => Some(Self::Deadlock),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Deadlock)
    }
}

/// A voting participant with a non-negative weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusParticipant {
    pub agent_id: String,
    pub voting_weight: f64,
}

impl ConsensusParticipant {
    pub fn new(agent_id: impl Into<String>, voting_weight: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            voting_weight: voting_weight.max(0.0),
        }
    }
}

/// Configuration for a consensus session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSessionConfig {
    pub topic: String,
    pub algorithm: ConsensusAlgorithm,
    pub participants: Vec<ConsensusParticipant>,
    pub min_participants: usize,
    /// Pass threshold in (0, 1].
    pub threshold: f64,
    pub timeout_per_round_secs: u64,
    pub require_justification: bool,
    pub max_rounds: u32,
}

impl ConsensusSessionConfig {
    pub fn new(topic: impl Into<String>, algorithm: ConsensusAlgorithm) -> Self {
        Self {
            topic: topic.into(),
            algorithm,
            participants: Vec::new(),
            min_participants: 1,
            threshold: 0.5,
            timeout_per_round_secs: 60,
            require_justification: false,
            max_rounds: 3,
        }
    }

    pub fn with_participant(mut self, agent_id: impl Into<String>, weight: f64) -> Self {
        self.participants.push(ConsensusParticipant::new(agent_id, weight));
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(f64::EPSILON, 1.0);
        self
    }

    pub fn with_min_participants(mut self, min: usize) -> Self {
        self.min_participants = min;
        self
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    pub fn with_timeout_per_round_secs(mut self, secs: u64) -> Self {
        self.timeout_per_round_secs = secs;
        self
    }

    pub fn require_justification(mut self, required: bool) -> Self {
        self.require_justification = required;
        self
    }

    pub fn total_weight(&self) -> f64 {
        self.participants.iter().map(|p| p.voting_weight).sum()
    }
}

/// One participant's vote in one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opinion {
    pub consensus_id: Uuid,
    pub round: u32,
    pub agent_id: String,
    pub decision: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    pub supporting_data: Value,
    /// Full preference order for ranked-choice elimination; the first
    /// entry must equal `decision`.
    pub ranking: Option<Vec<String>>,
    pub submitted_at: DateTime<Utc>,
}

impl Opinion {
    pub fn new(agent_id: impl Into<String>, decision: impl Into<String>, confidence: f64) -> Self {
        Self {
            consensus_id: Uuid::nil(),
            round: 0,
            agent_id: agent_id.into(),
            decision: decision.into(),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: String::new(),
            supporting_data: Value::Null,
            ranking: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_supporting_data(mut self, data: Value) -> Self {
        self.supporting_data = data;
        self
    }

    pub fn with_ranking(mut self, ranking: Vec<String>) -> Self {
        self.ranking = Some(ranking);
        self
    }
}

/// Session outcome; `Pending` only appears in provisional calculations
/// over a still-open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusOutcome {
    Passed,
    Deadlock,
    InsufficientParticipants,
    Pending,
}

/// Per-choice tally across the deciding round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceTally {
    pub decision: String,
    pub votes: usize,
    pub weight: f64,
    pub avg_confidence: f64,
}

/// Result of `calculate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub consensus_id: Uuid,
    pub outcome: ConsensusOutcome,
    pub decision: Option<String>,
    /// min(1.0, agreement_ratio * participation_ratio * avg_confidence).
    pub confidence: f64,
    pub agreement_ratio: f64,
    pub participation_ratio: f64,
    pub rounds_used: u32,
    /// Every tie-break rule applied, in application order.
    pub tie_breakers: Vec<String>,
    pub tallies: Vec<ChoiceTally>,
    pub calculated_at: DateTime<Utc>,
}

impl ConsensusResult {
    pub fn reached(&self) -> bool {
        self.outcome == ConsensusOutcome::Passed
    }
}

/// Persisted session snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSessionRecord {
    pub consensus_id: Uuid,
    pub config: ConsensusSessionConfig,
    pub state: ConsensusState,
    pub current_round: u32,
    pub rounds_used: u32,
    pub created_at: DateTime<Utc>,
    pub result: Option<ConsensusResult>,
}

/// Persisted per-round bookkeeping, including abstentions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRoundRecord {
    pub consensus_id: Uuid,
    pub round: u32,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub timed_out: bool,
    /// Participants that submitted no opinion before the round closed.
    pub abstained: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opinion_confidence_clamped() {
        assert_eq!(Opinion::new("a", "approve", 1.7).confidence, 1.0);
        assert_eq!(Opinion::new("a", "approve", -0.3).confidence, 0.0);
    }

    #[test]
    fn test_threshold_clamped_to_unit_interval() {
        let config = ConsensusSessionConfig::new("t", ConsensusAlgorithm::Majority)
            .with_threshold(1.8);
        assert_eq!(config.threshold, 1.0);
    }

    #[test]
    fn test_total_weight() {
        let config = ConsensusSessionConfig::new("t", ConsensusAlgorithm::WeightedMajority)
            .with_participant("a", 2.0)
            .with_participant("b", 1.0);
        assert_eq!(config.total_weight(), 3.0);
    }

    #[test]
    fn test_algorithm_round_trip() {
        for algorithm in [
            ConsensusAlgorithm::Unanimous,
            ConsensusAlgorithm::Majority,
            ConsensusAlgorithm::WeightedMajority,
            ConsensusAlgorithm::RankedChoice,
            ConsensusAlgorithm::Quorum,
        ] {
            assert_eq!(ConsensusAlgorithm::parse(algorithm.as_str()), Some(algorithm));
        }
    }
}
