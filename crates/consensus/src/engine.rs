//! Consensus engine
//!
//! One logical coordinator per session: submissions serialize on a
//! per-session mutex, calculation is a pure read. Round timeouts
//! auto-advance the session; exhausting `max_rounds` terminates it in
//! `deadlock` and the caller (typically the mediator) decides escalation.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use sentinel_config::ConsensusConfig;
use sentinel_core::{
    ConsensusOutcome, ConsensusResult, ConsensusRoundRecord, ConsensusSessionConfig,
    ConsensusSessionRecord, ConsensusState, ConsensusStore, Opinion, Result,
};

use crate::algorithms::{evaluate_round, RoundEvaluation};
use crate::ConsensusError;

struct SessionState {
    record: ConsensusSessionRecord,
    /// Opinions per round number.
    opinions: HashMap<u32, Vec<Opinion>>,
}

struct EngineInner {
    sessions: DashMap<Uuid, Arc<Mutex<SessionState>>>,
    store: Arc<dyn ConsensusStore>,
    defaults: ConsensusConfig,
}

/// Multi-round voting engine. Cheap to clone; clones share sessions.
#[derive(Clone)]
pub struct ConsensusEngine {
    inner: Arc<EngineInner>,
}

impl ConsensusEngine {
    pub fn new(store: Arc<dyn ConsensusStore>, defaults: ConsensusConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                sessions: DashMap::new(),
                store,
                defaults,
            }),
        }
    }

    /// A session config seeded with the engine defaults.
    pub fn session_config(
        &self,
        topic: impl Into<String>,
        algorithm: sentinel_core::ConsensusAlgorithm,
    ) -> ConsensusSessionConfig {
        ConsensusSessionConfig::new(topic, algorithm)
            .with_threshold(self.inner.defaults.threshold)
            .with_max_rounds(self.inner.defaults.max_rounds)
            .with_timeout_per_round_secs(self.inner.defaults.timeout_per_round_secs)
    }

    /// Create a session. The first round opens on `start_round`.
    pub async fn initiate(&self, config: ConsensusSessionConfig) -> Result<Uuid> {
        Self::validate_config(&config)?;

        let record = ConsensusSessionRecord {
            consensus_id: Uuid::new_v4(),
            config,
            state: ConsensusState::Created,
            current_round: 0,
            rounds_used: 0,
            created_at: Utc::now(),
            result: None,
        };
        let consensus_id = record.consensus_id;
        self.inner.store.save_session(&record).await?;
        self.inner.sessions.insert(
            consensus_id,
            Arc::new(Mutex::new(SessionState {
                record,
                opinions: HashMap::new(),
            })),
        );
        tracing::info!(consensus_id = %consensus_id, "consensus session created");
        Ok(consensus_id)
    }

    /// Open the next voting round and arm its timeout.
    pub async fn start_round(&self, consensus_id: Uuid) -> Result<u32> {
        let session = self.session_handle(consensus_id)?;
        let mut state = session.lock().await;

        if state.record.state.is_terminal() {
            return Err(ConsensusError::Terminal.into());
        }
        if state.record.state == ConsensusState::RoundOpen {
            return Err(ConsensusError::InvalidConfig("round already open".into()).into());
        }

        state.record.current_round += 1;
        state.record.state = ConsensusState::RoundOpen;
        let round = state.record.current_round;
        let timeout_secs = state.record.config.timeout_per_round_secs;
        self.inner.store.save_session(&state.record).await?;
        self.inner
            .store
            .record_round(&ConsensusRoundRecord {
                consensus_id,
                round,
                opened_at: Utc::now(),
                closed_at: None,
                timed_out: false,
                abstained: Vec::new(),
            })
            .await?;
        drop(state);

        self.arm_round_timeout(consensus_id, round, timeout_secs);
        tracing::debug!(consensus_id = %consensus_id, round, "round opened");
        Ok(round)
    }

    /// Submit one opinion for the current round.
    pub async fn submit(&self, consensus_id: Uuid, opinion: Opinion) -> Result<()> {
        let session = self.session_handle(consensus_id)?;
        let mut state = session.lock().await;

        if state.record.state.is_terminal() {
            return Err(ConsensusError::Terminal.into());
        }
        if state.record.state != ConsensusState::RoundOpen {
            return Err(ConsensusError::StaleRound {
                submitted: opinion.round,
                current: state.record.current_round,
            }
            .into());
        }

        if !state
            .record
            .config
            .participants
            .iter()
            .any(|p| p.agent_id == opinion.agent_id)
        {
            return Err(ConsensusError::NotParticipant(opinion.agent_id).into());
        }
        if state.record.config.require_justification && opinion.reasoning.trim().is_empty() {
            return Err(ConsensusError::JustificationRequired.into());
        }

        let round = state.record.current_round;
        let submitted = state.opinions.entry(round).or_default();
        if submitted.iter().any(|o| o.agent_id == opinion.agent_id) {
            return Err(ConsensusError::AlreadyVoted(opinion.agent_id).into());
        }

        let mut opinion = opinion;
        opinion.consensus_id = consensus_id;
        opinion.round = round;
        opinion.confidence = opinion.confidence.clamp(0.0, 1.0);
        opinion.submitted_at = Utc::now();

        submitted.push(opinion.clone());
        self.inner.store.record_opinion(&opinion).await?;
        tracing::trace!(consensus_id = %consensus_id, round, agent = %opinion.agent_id, "opinion recorded");
        Ok(())
    }

    /// Close the current round, evaluate it, and advance the session.
    pub async fn end_round(&self, consensus_id: Uuid) -> Result<ConsensusResult> {
        let session = self.session_handle(consensus_id)?;
        let mut state = session.lock().await;

        if state.record.state.is_terminal() {
            return Err(ConsensusError::Terminal.into());
        }
        if state.record.state != ConsensusState::RoundOpen {
            return Err(ConsensusError::RoundNotOpen.into());
        }

        let round = state.record.current_round;
        let opinions = state.opinions.get(&round).cloned().unwrap_or_default();
        let evaluation = evaluate_round(&state.record.config, &opinions);

        state.record.rounds_used += 1;
        self.inner
            .store
            .record_round(&ConsensusRoundRecord {
                consensus_id,
                round,
                opened_at: Utc::now(),
                closed_at: Some(Utc::now()),
                timed_out: false,
                abstained: Self::abstainers(&state.record.config, &opinions),
            })
            .await?;

        let result = if evaluation.passed {
            state.record.state = ConsensusState::Completed;
            Self::build_result(&state.record, &evaluation, ConsensusOutcome::Passed)
        } else if state.record.rounds_used >= state.record.config.max_rounds {
            state.record.state = ConsensusState::Deadlock;
            Self::build_result(&state.record, &evaluation, ConsensusOutcome::Deadlock)
        } else {
            state.record.state = ConsensusState::RoundClosed;
            Self::build_result(&state.record, &evaluation, ConsensusOutcome::Pending)
        };

        if state.record.state.is_terminal() {
            state.record.result = Some(result.clone());
            tracing::info!(
                consensus_id = %consensus_id,
                outcome = ?result.outcome,
                decision = ?result.decision,
                rounds = state.record.rounds_used,
                "consensus session terminal"
            );
        }
        self.inner.store.save_session(&state.record).await?;
        Ok(result)
    }

    /// Pure read: the stored result for a terminal session, or a
    /// provisional evaluation of the current round.
    pub async fn calculate(&self, consensus_id: Uuid) -> Result<ConsensusResult> {
        let session = self.session_handle(consensus_id)?;
        let state = session.lock().await;

        if let Some(result) = &state.record.result {
            return Ok(result.clone());
        }

        let round = state.record.current_round;
        let opinions = state.opinions.get(&round).cloned().unwrap_or_default();
        let evaluation = evaluate_round(&state.record.config, &opinions);
        let outcome = if evaluation.passed {
            ConsensusOutcome::Passed
        } else if opinions.len() < state.record.config.min_participants {
            ConsensusOutcome::InsufficientParticipants
        } else {
            ConsensusOutcome::Pending
        };
        Ok(Self::build_result(&state.record, &evaluation, outcome))
    }

    pub async fn state(&self, consensus_id: Uuid) -> Result<ConsensusState> {
        let session = self.session_handle(consensus_id)?;
        let state = session.lock().await;
        Ok(state.record.state)
    }

    /// Snapshot of the session record.
    pub async fn session(&self, consensus_id: Uuid) -> Result<ConsensusSessionRecord> {
        let session = self.session_handle(consensus_id)?;
        let state = session.lock().await;
        Ok(state.record.clone())
    }

    fn session_handle(&self, consensus_id: Uuid) -> Result<Arc<Mutex<SessionState>>> {
        self.inner
            .sessions
            .get(&consensus_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| ConsensusError::SessionNotFound(consensus_id).into())
    }

    fn validate_config(config: &ConsensusSessionConfig) -> Result<()> {
        if config.participants.is_empty() {
            return Err(ConsensusError::InvalidConfig("no participants".into()).into());
        }
        let mut ids: Vec<&str> = config
            .participants
            .iter()
            .map(|p| p.agent_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != config.participants.len() {
            return Err(ConsensusError::InvalidConfig("duplicate participant".into()).into());
        }
        if !(config.threshold > 0.0 && config.threshold <= 1.0) {
            return Err(
                ConsensusError::InvalidConfig("threshold must be in (0, 1]".into()).into(),
            );
        }
        if config.min_participants == 0 || config.min_participants > config.participants.len() {
            return Err(ConsensusError::InvalidConfig(
                "min_participants must be in 1..=participants".into(),
            )
            .into());
        }
        if config.max_rounds == 0 {
            return Err(ConsensusError::InvalidConfig("max_rounds must be >= 1".into()).into());
        }
        Ok(())
    }

    fn abstainers(config: &ConsensusSessionConfig, opinions: &[Opinion]) -> Vec<String> {
        config
            .participants
            .iter()
            .filter(|p| !opinions.iter().any(|o| o.agent_id == p.agent_id))
            .map(|p| p.agent_id.clone())
            .collect()
    }

    fn build_result(
        record: &ConsensusSessionRecord,
        evaluation: &RoundEvaluation,
        outcome: ConsensusOutcome,
    ) -> ConsensusResult {
        let confidence = if outcome == ConsensusOutcome::Passed {
            (evaluation.agreement_ratio
                * evaluation.participation_ratio
                * evaluation.avg_confidence)
                .min(1.0)
        } else {
            0.0
        };
        ConsensusResult {
            consensus_id: record.consensus_id,
            outcome,
            decision: if outcome == ConsensusOutcome::Passed {
                evaluation.winner.clone()
            } else {
                None
            },
            confidence,
            agreement_ratio: evaluation.agreement_ratio,
            participation_ratio: evaluation.participation_ratio,
            rounds_used: record.rounds_used,
            tie_breakers: evaluation.tie_breakers.clone(),
            tallies: evaluation.tallies.clone(),
            calculated_at: Utc::now(),
        }
    }

    /// Watchdog: if the round is still open when the per-round timeout
    /// lapses, mark it timed out and auto-advance (or deadlock).
    fn arm_round_timeout(&self, consensus_id: Uuid, round: u32, timeout_secs: u64) {
        if timeout_secs == 0 {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(timeout_secs)).await;
            if let Err(e) = engine.handle_round_timeout(consensus_id, round).await {
                tracing::warn!(consensus_id = %consensus_id, round, error = %e, "round timeout handling failed");
            }
        });
    }

    async fn handle_round_timeout(&self, consensus_id: Uuid, round: u32) -> Result<()> {
        let session = match self.session_handle(consensus_id) {
            Ok(session) => session,
            // Session was dropped; nothing to time out.
            Err(_) => return Ok(()),
        };
        let mut state = session.lock().await;
        if state.record.state != ConsensusState::RoundOpen || state.record.current_round != round {
            return Ok(());
        }

        let opinions = state.opinions.get(&round).cloned().unwrap_or_default();
        state.record.state = ConsensusState::RoundTimeout;
        state.record.rounds_used += 1;
        self.inner
            .store
            .record_round(&ConsensusRoundRecord {
                consensus_id,
                round,
                opened_at: Utc::now(),
                closed_at: Some(Utc::now()),
                timed_out: true,
                abstained: Self::abstainers(&state.record.config, &opinions),
            })
            .await?;
        tracing::debug!(consensus_id = %consensus_id, round, "round timed out");

        if state.record.rounds_used >= state.record.config.max_rounds {
            let evaluation = evaluate_round(&state.record.config, &opinions);
            state.record.state = ConsensusState::Deadlock;
            let result = Self::build_result(&state.record, &evaluation, ConsensusOutcome::Deadlock);
            state.record.result = Some(result);
            self.inner.store.save_session(&state.record).await?;
            return Ok(());
        }

        // Auto-advance into the next round.
        state.record.current_round += 1;
        state.record.state = ConsensusState::RoundOpen;
        let next_round = state.record.current_round;
        let timeout_secs = state.record.config.timeout_per_round_secs;
        self.inner.store.save_session(&state.record).await?;
        self.inner
            .store
            .record_round(&ConsensusRoundRecord {
                consensus_id,
                round: next_round,
                opened_at: Utc::now(),
                closed_at: None,
                timed_out: false,
                abstained: Vec::new(),
            })
            .await?;
        drop(state);
        self.arm_round_timeout(consensus_id, next_round, timeout_secs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryConsensusStore;
    use sentinel_core::{ConsensusAlgorithm, Error};

    fn engine() -> ConsensusEngine {
        ConsensusEngine::new(
            Arc::new(InMemoryConsensusStore::new()),
            ConsensusConfig::default(),
        )
    }

    fn majority_config() -> ConsensusSessionConfig {
        ConsensusSessionConfig::new("approve release", ConsensusAlgorithm::Majority)
            .with_participant("p1", 1.0)
            .with_participant("p2", 1.0)
            .with_participant("p3", 1.0)
            .with_timeout_per_round_secs(0)
    }

    #[tokio::test]
    async fn test_majority_session_completes() {
        let engine = engine();
        let id = engine.initiate(majority_config()).await.unwrap();
        engine.start_round(id).await.unwrap();

        engine.submit(id, Opinion::new("p1", "approve", 0.9)).await.unwrap();
        engine.submit(id, Opinion::new("p2", "approve", 0.8)).await.unwrap();
        engine.submit(id, Opinion::new("p3", "reject", 0.7)).await.unwrap();

        let result = engine.end_round(id).await.unwrap();
        assert_eq!(result.outcome, ConsensusOutcome::Passed);
        assert_eq!(result.decision.as_deref(), Some("approve"));
        assert_eq!(result.rounds_used, 1);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
        assert_eq!(engine.state(id).await.unwrap(), ConsensusState::Completed);

        // The stored result is what calculate returns from now on.
        let stored = engine.calculate(id).await.unwrap();
        assert_eq!(stored.decision, result.decision);
    }

    #[tokio::test]
    async fn test_submit_outside_round_is_stale() {
        let engine = engine();
        let id = engine.initiate(majority_config()).await.unwrap();

        let err = engine
            .submit(id, Opinion::new("p1", "approve", 0.9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));

        engine.start_round(id).await.unwrap();
        engine.submit(id, Opinion::new("p1", "approve", 0.9)).await.unwrap();
        engine.end_round(id).await.unwrap();

        let err = engine
            .submit(id, Opinion::new("p2", "approve", 0.9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_double_vote_rejected() {
        let engine = engine();
        let id = engine.initiate(majority_config()).await.unwrap();
        engine.start_round(id).await.unwrap();
        engine.submit(id, Opinion::new("p1", "approve", 0.9)).await.unwrap();
        let err = engine
            .submit(id, Opinion::new("p1", "reject", 0.9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_non_participant_rejected() {
        let engine = engine();
        let id = engine.initiate(majority_config()).await.unwrap();
        engine.start_round(id).await.unwrap();
        let err = engine
            .submit(id, Opinion::new("intruder", "approve", 0.9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_deadlock_after_max_rounds() {
        let engine = engine();
        let config = ConsensusSessionConfig::new("split", ConsensusAlgorithm::Unanimous)
            .with_participant("p1", 1.0)
            .with_participant("p2", 1.0)
            .with_max_rounds(2)
            .with_timeout_per_round_secs(0);
        let id = engine.initiate(config).await.unwrap();

        for _ in 0..2 {
            engine.start_round(id).await.unwrap();
            engine.submit(id, Opinion::new("p1", "approve", 0.9)).await.unwrap();
            engine.submit(id, Opinion::new("p2", "reject", 0.9)).await.unwrap();
            engine.end_round(id).await.unwrap();
        }

        assert_eq!(engine.state(id).await.unwrap(), ConsensusState::Deadlock);
        let result = engine.calculate(id).await.unwrap();
        assert_eq!(result.outcome, ConsensusOutcome::Deadlock);
        assert!(result.decision.is_none());

        // Terminal sessions accept no further rounds.
        let err = engine.start_round(id).await.unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_round_timeout_auto_advances() {
        let engine = engine();
        let config = ConsensusSessionConfig::new("slow", ConsensusAlgorithm::Majority)
            .with_participant("p1", 1.0)
            .with_participant("p2", 1.0)
            .with_timeout_per_round_secs(1)
            .with_max_rounds(3);
        let id = engine.initiate(config).await.unwrap();
        engine.start_round(id).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1_300)).await;

        let session = engine.session(id).await.unwrap();
        assert_eq!(session.state, ConsensusState::RoundOpen);
        assert_eq!(session.current_round, 2);
        assert_eq!(session.rounds_used, 1);
    }

    #[tokio::test]
    async fn test_justification_enforced() {
        let engine = engine();
        let config = majority_config().require_justification(true);
        let id = engine.initiate(config).await.unwrap();
        engine.start_round(id).await.unwrap();

        let err = engine
            .submit(id, Opinion::new("p1", "approve", 0.9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        engine
            .submit(
                id,
                Opinion::new("p1", "approve", 0.9).with_reasoning("matches policy 4.2"),
            )
            .await
            .unwrap();
    }
}
