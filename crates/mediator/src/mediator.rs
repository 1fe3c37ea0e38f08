//! Conversation mediator
//!
//! One logical coordinator per conversation: every mutation serializes
//! on the conversation's mutex, so independent conversations run in
//! parallel. Message history is derived from bus rows; the mediator
//! never stores message bodies itself.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use sentinel_bus::MessageBus;
use sentinel_config::MediatorConfig;
use sentinel_consensus::ConsensusEngine;
use sentinel_core::{
    CancelSource, CancelToken, Conflict, ConflictType, ConsensusOutcome, ConversationSnapshot,
    ConversationState, ConversationStore, EndReason, Error, MediationResult, Message,
    OutboundMessage, Participant, ResolutionStrategy, Result,
};

use crate::conflict::{detect_conflicts, latest_stances, Stance};
use crate::context::{ConversationContext, ConversationEvent};
use crate::resolution::{default_strategy, expert_arbitration, numeric_compromise, vote_session};
use crate::MediatorError;

/// A message sent into a conversation.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub from: String,
    /// `None` broadcasts to every other participant.
    pub to: Option<String>,
    pub content: Value,
    /// Puts the conversation into `waiting_for_response` for the
    /// recipient.
    pub requires_response: bool,
}

impl ConversationMessage {
    pub fn new(from: impl Into<String>, to: impl Into<String>, content: Value) -> Self {
        Self {
            from: from.into(),
            to: Some(to.into()),
            content,
            requires_response: false,
        }
    }

    pub fn to_all(from: impl Into<String>, content: Value) -> Self {
        Self {
            from: from.into(),
            to: None,
            content,
            requires_response: false,
        }
    }

    pub fn expecting_response(mut self) -> Self {
        self.requires_response = true;
        self
    }
}

struct Inner {
    conversations: DashMap<Uuid, Arc<Mutex<ConversationContext>>>,
    store: Arc<dyn ConversationStore>,
    bus: Arc<MessageBus>,
    consensus: ConsensusEngine,
    config: MediatorConfig,
    events: broadcast::Sender<ConversationEvent>,
}

/// Conversation mediator. Cheap to clone; clones share conversations.
#[derive(Clone)]
pub struct ConversationMediator {
    inner: Arc<Inner>,
}

impl ConversationMediator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        bus: Arc<MessageBus>,
        consensus: ConsensusEngine,
        config: MediatorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                conversations: DashMap::new(),
                store,
                bus,
                consensus,
                config,
                events,
            }),
        }
    }

    /// Subscribe to conversation lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.inner.events.subscribe()
    }

    /// Create a conversation and activate it.
    pub async fn initiate(
        &self,
        topic: impl Into<String>,
        objective: impl Into<String>,
        participants: Vec<Participant>,
        timeout_secs: Option<u64>,
    ) -> Result<Uuid> {
        if participants.is_empty() {
            return Err(MediatorError::Invalid("no participants".into()).into());
        }
        let mut ids: Vec<&str> = participants.iter().map(|p| p.agent_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != participants.len() {
            return Err(MediatorError::Invalid("duplicate participant".into()).into());
        }

        let timeout = timeout_secs.unwrap_or(self.inner.config.conversation_timeout_secs);
        let mut context = ConversationContext::new(topic, objective, participants, timeout);
        let conversation_id = context.conversation_id;

        self.transition(&mut context, ConversationState::Active)?;
        self.inner.store.save(&context.snapshot()).await?;
        self.inner
            .conversations
            .insert(conversation_id, Arc::new(Mutex::new(context)));
        self.emit(ConversationEvent::Started { conversation_id });
        tracing::info!(conversation_id = %conversation_id, "conversation started");
        Ok(conversation_id)
    }

    pub async fn add_participant(
        &self,
        conversation_id: Uuid,
        participant: Participant,
    ) -> Result<()> {
        let handle = self.handle(conversation_id)?;
        let mut context = handle.lock().await;
        self.ensure_open(&context)?;
        if context.is_participant(&participant.agent_id) {
            return Err(MediatorError::DuplicateParticipant(participant.agent_id).into());
        }
        let agent_id = participant.agent_id.clone();
        context.participants.push(participant);
        context.last_activity = Utc::now();
        self.inner.store.save(&context.snapshot()).await?;
        self.emit(ConversationEvent::ParticipantAdded {
            conversation_id,
            agent_id,
        });
        Ok(())
    }

    pub async fn remove_participant(&self, conversation_id: Uuid, agent_id: &str) -> Result<()> {
        let handle = self.handle(conversation_id)?;
        let mut context = handle.lock().await;
        self.ensure_open(&context)?;
        let before = context.participants.len();
        context.participants.retain(|p| p.agent_id != agent_id);
        if context.participants.len() == before {
            return Err(MediatorError::NotParticipant(agent_id.to_string()).into());
        }
        context.pending_respondents.retain(|a| a != agent_id);
        self.inner.store.save(&context.snapshot()).await?;
        self.emit(ConversationEvent::ParticipantRemoved {
            conversation_id,
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// Send a message into the conversation. Out-of-turn messages are
    /// recorded in history but do not advance the turn state.
    pub async fn send(
        &self,
        conversation_id: Uuid,
        message: ConversationMessage,
    ) -> Result<Vec<Uuid>> {
        let handle = self.handle(conversation_id)?;
        let mut context = handle.lock().await;
        self.ensure_open(&context)?;

        if !context.is_participant(&message.from) {
            return Err(MediatorError::NotParticipant(message.from).into());
        }
        if let Some(to) = &message.to {
            if !context.is_participant(to) {
                return Err(MediatorError::NotParticipant(to.clone()).into());
            }
        }

        let payload = json!({
            "content": message.content,
            "requires_response": message.requires_response,
        });

        let recipients: Vec<String> = match &message.to {
            Some(to) => vec![to.clone()],
            None => context
                .participants
                .iter()
                .map(|p| p.agent_id.clone())
                .filter(|id| *id != message.from)
                .collect(),
        };

        let mut message_ids = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            let outbound = OutboundMessage::new(
                &message.from,
                recipient,
                "conversation_message",
                payload.clone(),
            )
            .with_conversation(conversation_id);
            message_ids.push(self.inner.bus.send(outbound).await?);
        }

        // Turn-taking: an awaited respondent answering advances the
        // conversation; anyone else only enters history.
        if context.state == ConversationState::WaitingForResponse {
            let was_pending = context.pending_respondents.iter().any(|a| *a == message.from);
            if was_pending {
                context.pending_respondents.retain(|a| *a != message.from);
                if context.pending_respondents.is_empty() {
                    context.turn_deadline = None;
                    self.transition(&mut context, ConversationState::Active)?;
                }
            }
        } else if message.requires_response && message.to.is_some() {
            context.pending_respondents = recipients.clone();
            context.turn_deadline =
                Some(Utc::now() + Duration::seconds(self.inner.config.turn_timeout_secs as i64));
            self.transition(&mut context, ConversationState::WaitingForResponse)?;
        }

        context.touch(&message.from);
        self.inner.store.save(&context.snapshot()).await?;
        for message_id in &message_ids {
            self.emit(ConversationEvent::MessageSent {
                conversation_id,
                message_id: *message_id,
                from: message.from.clone(),
            });
        }
        Ok(message_ids)
    }

    /// Broadcast to every other participant.
    pub async fn broadcast(
        &self,
        conversation_id: Uuid,
        from: impl Into<String>,
        content: Value,
    ) -> Result<Vec<Uuid>> {
        self.send(conversation_id, ConversationMessage::to_all(from, content))
            .await
    }

    /// Conversation messages awaiting acknowledgement by an agent.
    pub async fn pending(&self, agent_id: &str, max: usize) -> Result<Vec<Message>> {
        self.inner
            .bus
            .receive(agent_id, max, Some("conversation_message"))
            .await
    }

    pub async fn acknowledge(&self, message_id: Uuid, agent_id: &str) -> Result<()> {
        self.inner.bus.acknowledge(message_id, agent_id).await
    }

    /// Full bus-derived history in send order.
    pub async fn history(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.inner.bus.conversation_messages(conversation_id).await
    }

    /// Run the conflict detectors over the current transcript.
    pub async fn detect_conflicts(&self, conversation_id: Uuid) -> Result<Vec<Conflict>> {
        let handle = self.handle(conversation_id)?;
        let mut context = handle.lock().await;
        self.ensure_open(&context)?;

        let history = self.inner.bus.conversation_messages(conversation_id).await?;
        let detected = detect_conflicts(&context, &history);
        if detected.is_empty() {
            return Ok(Vec::new());
        }

        for conflict in &detected {
            context.conflicts.push(conflict.clone());
            self.inner.store.record_conflict(conflict).await?;
            self.emit(ConversationEvent::ConflictDetected {
                conversation_id,
                conflict_id: conflict.conflict_id,
                conflict_type: conflict.conflict_type,
            });
            tracing::info!(
                conversation_id = %conversation_id,
                conflict_id = %conflict.conflict_id,
                conflict_type = %conflict.conflict_type.as_str(),
                "conflict detected"
            );
        }

        if matches!(
            context.state,
            ConversationState::Active | ConversationState::WaitingForResponse
        ) {
            self.transition(&mut context, ConversationState::ConflictDetected)?;
        }
        self.inner.store.save(&context.snapshot()).await?;
        Ok(detected)
    }

    /// Apply a resolution strategy to one conflict.
    pub async fn resolve(
        &self,
        conversation_id: Uuid,
        conflict_id: Uuid,
        strategy: Option<ResolutionStrategy>,
        override_decision: Option<String>,
    ) -> Result<MediationResult> {
        let handle = self.handle(conversation_id)?;
        let mut context = handle.lock().await;
        self.ensure_open(&context)?;

        let conflict = context
            .conflict(conflict_id)
            .cloned()
            .ok_or(MediatorError::ConflictNotFound(conflict_id))?;
        if conflict.is_resolved() {
            return Err(Error::StateConflict(format!(
                "conflict {conflict_id} already resolved"
            )));
        }
        let strategy = strategy.unwrap_or_else(|| default_strategy(conflict.conflict_type));

        if matches!(
            context.state,
            ConversationState::Active | ConversationState::WaitingForResponse
        ) {
            self.transition(&mut context, ConversationState::ConflictDetected)?;
        }
        if context.state == ConversationState::ConflictDetected {
            self.transition(&mut context, ConversationState::ResolvingConflict)?;
        }
        if context.state != ConversationState::ResolvingConflict {
            return Err(Error::StateConflict(format!(
                "cannot resolve conflicts in state {}",
                context.state.as_str()
            )));
        }

        let history = self.inner.bus.conversation_messages(conversation_id).await?;
        let stances: Vec<Stance> = latest_stances(&history)
            .into_iter()
            .filter(|s| conflict.involved_agents.contains(&s.agent_id))
            .collect();

        let outcome = self
            .apply_strategy(&mut context, &conflict, strategy, &stances, override_decision)
            .await?;

        let resolved = outcome.success || outcome.close_conflict;
        if let Some(stored) = context.conflict_mut(conflict_id) {
            stored.strategy_used = Some(strategy);
            if resolved {
                stored.resolved_successfully = Some(outcome.success);
                stored.resolution_summary = Some(outcome.summary.clone());
                stored.resolved_at = Some(Utc::now());
            }
        }
        if let Some(stored) = context.conflict(conflict_id) {
            self.inner.store.record_conflict(stored).await?;
        }
        self.emit(ConversationEvent::ConflictResolved {
            conversation_id,
            conflict_id,
            success: outcome.success,
        });

        // A deadlocked vote surfaces as a fresh consensus_failure
        // conflict for the next mediation pass to escalate.
        if outcome.consensus_deadlock {
            let failure = Conflict::new(
                conversation_id,
                ConflictType::ConsensusFailure,
                "consensus vote deadlocked",
                conflict.involved_agents.clone(),
            );
            self.inner.store.record_conflict(&failure).await?;
            self.emit(ConversationEvent::ConflictDetected {
                conversation_id,
                conflict_id: failure.conflict_id,
                conflict_type: failure.conflict_type,
            });
            context.conflicts.push(failure);
        }

        if !context.state.is_terminal() {
            self.transition(&mut context, ConversationState::Active)?;
        }
        self.inner.store.save(&context.snapshot()).await?;

        tracing::info!(
            conversation_id = %conversation_id,
            conflict_id = %conflict_id,
            strategy = %strategy.as_str(),
            success = outcome.success,
            "conflict resolution applied"
        );

        Ok(MediationResult {
            conversation_id,
            conflict_id,
            strategy,
            success: outcome.success,
            decision: outcome.decision,
            agreement_ratio: outcome.agreement_ratio,
            tie_breakers: outcome.tie_breakers,
            summary: outcome.summary,
            resolved_at: Utc::now(),
        })
    }

    /// One mediation pass: handle turn timeouts, detect fresh conflicts,
    /// and resolve every open conflict with its default strategy.
    pub async fn mediate(&self, conversation_id: Uuid) -> Result<Vec<MediationResult>> {
        self.mediate_cancellable(conversation_id, &CancelToken::never())
            .await
    }

    pub async fn mediate_cancellable(
        &self,
        conversation_id: Uuid,
        cancel: &CancelToken,
    ) -> Result<Vec<MediationResult>> {
        cancel.check()?;
        self.handle_turn_timeout(conversation_id).await?;
        {
            let handle = self.handle(conversation_id)?;
            let context = handle.lock().await;
            if context.state.is_terminal() {
                return Ok(Vec::new());
            }
        }

        self.detect_conflicts(conversation_id).await?;

        let open_conflicts: Vec<Uuid> = {
            let handle = self.handle(conversation_id)?;
            let context = handle.lock().await;
            context
                .conflicts
                .iter()
                .filter(|c| !c.is_resolved())
                .map(|c| c.conflict_id)
                .collect()
        };

        let mut results = Vec::new();
        for conflict_id in open_conflicts {
            cancel.check()?;
            results.push(self.resolve(conversation_id, conflict_id, None, None).await?);
        }
        Ok(results)
    }

    /// End the conversation in the terminal state for `reason`.
    pub async fn end(&self, conversation_id: Uuid, reason: EndReason) -> Result<()> {
        let handle = self.handle(conversation_id)?;
        let mut context = handle.lock().await;
        if context.state.is_terminal() {
            return Err(MediatorError::Terminal(context.state.as_str()).into());
        }
        let from = context.state;
        context.state = reason.terminal_state();
        context.last_activity = Utc::now();
        self.inner.store.save(&context.snapshot()).await?;
        self.emit(ConversationEvent::StateChanged {
            conversation_id,
            from,
            to: context.state,
        });
        self.emit(ConversationEvent::Ended {
            conversation_id,
            reason,
        });
        tracing::info!(conversation_id = %conversation_id, reason = ?reason, "conversation ended");
        Ok(())
    }

    /// Snapshot of the conversation state.
    pub async fn context(&self, conversation_id: Uuid) -> Result<ConversationSnapshot> {
        let handle = self.handle(conversation_id)?;
        let context = handle.lock().await;
        Ok(context.snapshot())
    }

    pub async fn state(&self, conversation_id: Uuid) -> Result<ConversationState> {
        let handle = self.handle(conversation_id)?;
        let context = handle.lock().await;
        Ok(context.state)
    }

    /// Ids of conversations not yet terminal.
    pub fn active_conversations(&self) -> Vec<Uuid> {
        self.inner
            .conversations
            .iter()
            .map(|e| *e.key())
            .collect()
    }

    /// Sweep one conversation for turn timeout and inactivity.
    /// Called by [`MediatorRunner`] and usable directly in tests.
    pub async fn sweep_conversation(&self, conversation_id: Uuid) -> Result<()> {
        self.handle_turn_timeout(conversation_id).await?;

        let handle = self.handle(conversation_id)?;
        let inactive = {
            let context = handle.lock().await;
            !context.state.is_terminal() && context.is_inactive(Utc::now())
        };
        if inactive {
            self.end(conversation_id, EndReason::Timeout).await?;
        }
        Ok(())
    }

    async fn handle_turn_timeout(&self, conversation_id: Uuid) -> Result<()> {
        let handle = self.handle(conversation_id)?;
        let mut context = handle.lock().await;
        if context.state != ConversationState::WaitingForResponse {
            return Ok(());
        }
        let Some(deadline) = context.turn_deadline else {
            return Ok(());
        };
        if Utc::now() < deadline {
            return Ok(());
        }

        // Unresponsive respondents: emit the timeout marker and proceed.
        let pending = std::mem::take(&mut context.pending_respondents);
        for agent_id in pending {
            self.emit(ConversationEvent::TurnTimeout {
                conversation_id,
                agent_id: agent_id.clone(),
            });
            tracing::debug!(conversation_id = %conversation_id, agent_id = %agent_id, "turn timeout");
        }
        context.turn_deadline = None;
        self.transition(&mut context, ConversationState::Active)?;
        self.inner.store.save(&context.snapshot()).await?;
        Ok(())
    }

    async fn apply_strategy(
        &self,
        context: &mut ConversationContext,
        conflict: &Conflict,
        strategy: ResolutionStrategy,
        stances: &[Stance],
        override_decision: Option<String>,
    ) -> Result<StrategyOutcome> {
        match strategy {
            ResolutionStrategy::MajorityVote | ResolutionStrategy::WeightedVote => {
                self.run_vote(
                    context,
                    conflict,
                    stances,
                    strategy == ResolutionStrategy::WeightedVote,
                )
                .await
            }
            ResolutionStrategy::ExpertArbitration => {
                match expert_arbitration(&context.participants, stances) {
                    Some((expert, decision)) => Ok(StrategyOutcome::success(
                        Some(decision.clone()),
                        format!("arbitrated by {expert}: {decision}"),
                    )),
                    None => Ok(StrategyOutcome::failure("no expert stance available")),
                }
            }
            ResolutionStrategy::CompromiseNegotiation => {
                context.negotiation_rounds += 1;
                if context.negotiation_rounds > self.inner.config.max_negotiation_rounds {
                    return Ok(StrategyOutcome::failure("negotiation rounds exhausted"));
                }
                match numeric_compromise(stances) {
                    Some(decision) => Ok(StrategyOutcome::success(
                        Some(decision.clone()),
                        format!("compromise at {decision}"),
                    )),
                    None => Ok(StrategyOutcome::failure(format!(
                        "no compromise in round {}",
                        context.negotiation_rounds
                    ))),
                }
            }
            ResolutionStrategy::Escalation => {
                let supervisor = context
                    .metadata
                    .get("supervisor")
                    .and_then(Value::as_str)
                    .unwrap_or("supervisor")
                    .to_string();
                self.inner
                    .bus
                    .send(
                        OutboundMessage::new(
                            "mediator",
                            &supervisor,
                            "escalation",
                            json!({
                                "reason": conflict.description,
                                "conversation_id": context.conversation_id.to_string(),
                                "conflict_id": conflict.conflict_id.to_string(),
                            }),
                        )
                        .with_conversation(context.conversation_id),
                    )
                    .await?;
                Ok(StrategyOutcome::closed(format!("escalated to {supervisor}")))
            }
            ResolutionStrategy::ExternalMediation => {
                if !context.metadata.is_object() {
                    context.metadata = json!({});
                }
                if let Some(object) = context.metadata.as_object_mut() {
                    object.insert("requires_human_review".to_string(), json!(true));
                }
                Ok(StrategyOutcome::closed("marked for human review"))
            }
            ResolutionStrategy::TimeoutAbort => {
                let from = context.state;
                context.state = ConversationState::Timeout;
                self.emit(ConversationEvent::StateChanged {
                    conversation_id: context.conversation_id,
                    from,
                    to: context.state,
                });
                self.emit(ConversationEvent::Ended {
                    conversation_id: context.conversation_id,
                    reason: EndReason::Timeout,
                });
                Ok(StrategyOutcome::closed("conversation aborted on timeout"))
            }
            ResolutionStrategy::ManualOverride => match override_decision {
                Some(decision) => Ok(StrategyOutcome::success(
                    Some(decision.clone()),
                    format!("manual override: {decision}"),
                )),
                None => Err(MediatorError::OverrideWithoutDecision.into()),
            },
        }
    }

    /// Run a one-round consensus vote over the involved agents' stances.
    async fn run_vote(
        &self,
        context: &ConversationContext,
        conflict: &Conflict,
        stances: &[Stance],
        weighted: bool,
    ) -> Result<StrategyOutcome> {
        if stances.is_empty() {
            return Ok(StrategyOutcome::failure("no stances to vote on"));
        }

        let voters: Vec<Participant> = context
            .participants
            .iter()
            .filter(|p| conflict.involved_agents.contains(&p.agent_id))
            .cloned()
            .collect();
        let session = vote_session(&context.topic, &voters, weighted, 0.5);

        let consensus_id = self.inner.consensus.initiate(session).await?;
        self.inner.consensus.start_round(consensus_id).await?;
        for stance in stances {
            self.inner
                .consensus
                .submit(
                    consensus_id,
                    sentinel_core::Opinion::new(&stance.agent_id, &stance.decision, stance.confidence),
                )
                .await?;
        }
        let result = self.inner.consensus.end_round(consensus_id).await?;

        match result.outcome {
            ConsensusOutcome::Passed => Ok(StrategyOutcome {
                success: true,
                close_conflict: true,
                consensus_deadlock: false,
                decision: result.decision.clone(),
                agreement_ratio: Some(result.agreement_ratio),
                tie_breakers: result.tie_breakers,
                summary: format!(
                    "vote passed for {}",
                    result.decision.as_deref().unwrap_or("(none)")
                ),
            }),
            ConsensusOutcome::Deadlock => Ok(StrategyOutcome {
                success: false,
                close_conflict: false,
                consensus_deadlock: true,
                decision: None,
                agreement_ratio: Some(result.agreement_ratio),
                tie_breakers: result.tie_breakers,
                summary: "vote deadlocked".to_string(),
            }),
            _ => Ok(StrategyOutcome::failure("vote did not reach a decision")),
        }
    }

    fn transition(&self, context: &mut ConversationContext, to: ConversationState) -> Result<()> {
        if !context.state.can_transition_to(to) {
            return Err(Error::StateConflict(format!(
                "illegal conversation transition {} -> {}",
                context.state.as_str(),
                to.as_str()
            )));
        }
        let from = context.state;
        context.state = to;
        self.emit(ConversationEvent::StateChanged {
            conversation_id: context.conversation_id,
            from,
            to,
        });
        Ok(())
    }

    fn ensure_open(&self, context: &ConversationContext) -> Result<()> {
        if context.state.is_terminal() {
            return Err(MediatorError::Terminal(context.state.as_str()).into());
        }
        Ok(())
    }

    fn handle(&self, conversation_id: Uuid) -> Result<Arc<Mutex<ConversationContext>>> {
        self.inner
            .conversations
            .get(&conversation_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| MediatorError::ConversationNotFound(conversation_id).into())
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.inner.events.send(event);
    }
}

/// Internal outcome of one strategy application.
struct StrategyOutcome {
    success: bool,
    /// Close the conflict even when unsuccessful (handed off elsewhere).
    close_conflict: bool,
    consensus_deadlock: bool,
    decision: Option<String>,
    agreement_ratio: Option<f64>,
    tie_breakers: Vec<String>,
    summary: String,
}

impl StrategyOutcome {
    fn success(decision: Option<String>, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            close_conflict: true,
            consensus_deadlock: false,
            decision,
            agreement_ratio: None,
            tie_breakers: Vec::new(),
            summary: summary.into(),
        }
    }

    fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            close_conflict: false,
            consensus_deadlock: false,
            decision: None,
            agreement_ratio: None,
            tie_breakers: Vec::new(),
            summary: summary.into(),
        }
    }

    /// Handed off (escalated, human review, aborted): the conflict is
    /// closed here even though no decision was produced.
    fn closed(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            close_conflict: true,
            consensus_deadlock: false,
            decision: None,
            agreement_ratio: None,
            tie_breakers: Vec::new(),
            summary: summary.into(),
        }
    }
}

/// Periodic sweeper for turn timeouts and conversation inactivity.
pub struct MediatorRunner {
    cancel: CancelSource,
    task: tokio::task::JoinHandle<()>,
}

impl MediatorRunner {
    pub fn start(mediator: ConversationMediator) -> Self {
        let cancel = CancelSource::new();
        let token = cancel.token();
        let interval =
            std::time::Duration::from_millis(mediator.inner.config.sweep_interval_ms);
        let task = tokio::spawn(async move {
            tracing::debug!("mediator sweeper started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                for conversation_id in mediator.active_conversations() {
                    if let Err(e) = mediator.sweep_conversation(conversation_id).await {
                        // Terminal conversations racing the sweep are fine.
                        tracing::trace!(conversation_id = %conversation_id, error = %e, "sweep skipped");
                    }
                }
            }
            tracing::debug!("mediator sweeper stopped");
        });
        Self { cancel, task }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}
