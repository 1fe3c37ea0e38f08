//! In-memory consensus store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use sentinel_core::{
    ConsensusRoundRecord, ConsensusSessionRecord, ConsensusStore, Opinion, Result,
};

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, ConsensusSessionRecord>,
    opinions: Vec<Opinion>,
    rounds: Vec<ConsensusRoundRecord>,
}

/// Lock-guarded in-memory implementation of [`ConsensusStore`].
#[derive(Default)]
pub struct InMemoryConsensusStore {
    inner: RwLock<Inner>,
}

impl InMemoryConsensusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opinions recorded for one session, in submission order.
    pub fn opinions_for(&self, consensus_id: Uuid) -> Vec<Opinion> {
        self.inner
            .read()
            .opinions
            .iter()
            .filter(|o| o.consensus_id == consensus_id)
            .cloned()
            .collect()
    }

    /// Round records for one session.
    pub fn rounds_for(&self, consensus_id: Uuid) -> Vec<ConsensusRoundRecord> {
        self.inner
            .read()
            .rounds
            .iter()
            .filter(|r| r.consensus_id == consensus_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ConsensusStore for InMemoryConsensusStore {
    async fn save_session(&self, session: &ConsensusSessionRecord) -> Result<()> {
        self.inner
            .write()
            .sessions
            .insert(session.consensus_id, session.clone());
        Ok(())
    }

    async fn load_session(&self, consensus_id: Uuid) -> Result<Option<ConsensusSessionRecord>> {
        Ok(self.inner.read().sessions.get(&consensus_id).cloned())
    }

    async fn record_opinion(&self, opinion: &Opinion) -> Result<()> {
        self.inner.write().opinions.push(opinion.clone());
        Ok(())
    }

    async fn record_round(&self, round: &ConsensusRoundRecord) -> Result<()> {
        let mut inner = self.inner.write();
        // Upsert: closing a round updates the record written at open.
        if let Some(existing) = inner
            .rounds
            .iter_mut()
            .find(|r| r.consensus_id == round.consensus_id && r.round == round.round)
        {
            *existing = round.clone();
        } else {
            inner.rounds.push(round.clone());
        }
        Ok(())
    }
}
