//! Durable consensus store on ScyllaDB

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::frame::value::CqlTimestamp;
use uuid::Uuid;

use sentinel_core::{
    ConsensusAlgorithm, ConsensusRoundRecord, ConsensusSessionRecord, ConsensusState,
    ConsensusStore, Opinion, Result,
};

use crate::{PersistenceError, ScyllaClient};

fn ts(at: DateTime<Utc>) -> CqlTimestamp {
    CqlTimestamp(at.timestamp_millis())
}

fn from_ts(at: CqlTimestamp) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(at.0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// ScyllaDB implementation of [`ConsensusStore`].
#[derive(Clone)]
pub struct ScyllaConsensusStore {
    client: ScyllaClient,
}

impl ScyllaConsensusStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConsensusStore for ScyllaConsensusStore {
    async fn save_session(&self, session: &ConsensusSessionRecord) -> Result<()> {
        let query = format!(
            "INSERT INTO {}.consensus_sessions (consensus_id, topic, algorithm, config_json, \
             state, current_round, rounds_used, created_at, result_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        let result_json = match &session.result {
            Some(result) => Some(
                serde_json::to_string(result)
                    .map_err(|e| PersistenceError::Decode(e.to_string()))?,
            ),
            None => None,
        };
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    session.consensus_id,
                    session.config.topic.as_str(),
                    session.config.algorithm.as_str(),
                    serde_json::to_string(&session.config)
                        .map_err(|e| PersistenceError::Decode(e.to_string()))?,
                    session.state.as_str(),
                    session.current_round as i32,
                    session.rounds_used as i32,
                    ts(session.created_at),
                    result_json,
                ),
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    async fn load_session(&self, consensus_id: Uuid) -> Result<Option<ConsensusSessionRecord>> {
        let query = format!(
            "SELECT consensus_id, algorithm, config_json, state, current_round, rounds_used, \
             created_at, result_json FROM {}.consensus_sessions WHERE consensus_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (consensus_id,))
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;

        type Row = (
            Uuid,
            String,
            String,
            String,
            i32,
            i32,
            CqlTimestamp,
            Option<String>,
        );
        let row = result
            .maybe_first_row_typed::<Row>()
            .map_err(|e| PersistenceError::Decode(e.to_string()))?;
        let Some((
            consensus_id,
            algorithm,
            config_json,
            state,
            current_round,
            rounds_used,
            created_at,
            result_json,
        )) = row
        else {
            return Ok(None);
        };

        // The algorithm column exists for ad-hoc queries; the config
        // JSON is authoritative.
        ConsensusAlgorithm::parse(&algorithm)
            .ok_or_else(|| PersistenceError::Decode(format!("algorithm {algorithm}")))?;

        Ok(Some(ConsensusSessionRecord {
            consensus_id,
            config: serde_json::from_str(&config_json)
                .map_err(|e| PersistenceError::Decode(format!("config: {e}")))?,
            state: ConsensusState::parse(&state)
                .ok_or_else(|| PersistenceError::Decode(format!("state {state}")))?,
            current_round: current_round.max(0) as u32,
            rounds_used: rounds_used.max(0) as u32,
            created_at: from_ts(created_at),
            result: match result_json {
                Some(json) => Some(
                    serde_json::from_str(&json)
                        .map_err(|e| PersistenceError::Decode(format!("result: {e}")))?,
                ),
                None => None,
            },
        }))
    }

    async fn record_opinion(&self, opinion: &Opinion) -> Result<()> {
        let query = format!(
            "INSERT INTO {}.consensus_opinions (consensus_id, round, agent_id, decision, \
             confidence, reasoning, supporting_json, ranking_json, submitted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        let ranking_json = match &opinion.ranking {
            Some(ranking) => Some(
                serde_json::to_string(ranking)
                    .map_err(|e| PersistenceError::Decode(e.to_string()))?,
            ),
            None => None,
        };
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    opinion.consensus_id,
                    opinion.round as i32,
                    opinion.agent_id.as_str(),
                    opinion.decision.as_str(),
                    opinion.confidence,
                    opinion.reasoning.as_str(),
                    opinion.supporting_data.to_string(),
                    ranking_json,
                    ts(opinion.submitted_at),
                ),
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }

    async fn record_round(&self, round: &ConsensusRoundRecord) -> Result<()> {
        let query = format!(
            "INSERT INTO {}.consensus_rounds (consensus_id, round, opened_at, closed_at, \
             timed_out, abstained_json) VALUES (?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    round.consensus_id,
                    round.round as i32,
                    ts(round.opened_at),
                    round.closed_at.map(ts),
                    round.timed_out,
                    serde_json::to_string(&round.abstained)
                        .map_err(|e| PersistenceError::Decode(e.to_string()))?,
                ),
            )
            .await
            .map_err(|e| PersistenceError::Query(e.to_string()))?;
        Ok(())
    }
}
