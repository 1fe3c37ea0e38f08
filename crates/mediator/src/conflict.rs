//! Conflict detection
//!
//! Pure functions over a conversation's participants and its bus-derived
//! message history. Detection is deterministic: the same transcript
//! always yields the same conflicts.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use sentinel_core::{Conflict, ConflictType, Message};

use crate::context::ConversationContext;

/// One agent's latest declared position in a conversation.
#[derive(Debug, Clone)]
pub struct Stance {
    pub agent_id: String,
    pub decision: String,
    pub confidence: f64,
    pub message_id: Uuid,
    pub sent_at: DateTime<Utc>,
}

/// Latest stance per agent, read from `decision` fields in message
/// payloads, ordered by agent id for determinism.
pub fn latest_stances(messages: &[Message]) -> Vec<Stance> {
    let mut by_agent: HashMap<&str, Stance> = HashMap::new();
    for message in messages {
        let Some(decision) = payload_field(&message.payload, "decision").and_then(Value::as_str)
        else {
            continue;
        };
        let confidence = payload_field(&message.payload, "confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let stance = Stance {
            agent_id: message.from_agent.clone(),
            decision: decision.to_string(),
            confidence,
            message_id: message.message_id,
            sent_at: message.created_at,
        };
        match by_agent.get(message.from_agent.as_str()) {
            Some(existing) if existing.sent_at >= stance.sent_at => {}
            _ => {
                by_agent.insert(message.from_agent.as_str(), stance);
            }
        }
    }
    let mut stances: Vec<Stance> = by_agent.into_values().collect();
    stances.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    stances
}

/// Run every detector over the transcript, returning conflicts not
/// already tracked (same type and involved-agent set, unresolved).
pub fn detect_conflicts(context: &ConversationContext, messages: &[Message]) -> Vec<Conflict> {
    let mut detected = Vec::new();
    detected.extend(contradictory_responses(context, messages));
    detected.extend(resource_conflicts(context, messages));
    detected.extend(priority_conflicts(context, messages));
    detected.extend(timing_conflicts(context, messages));
    detected.extend(protocol_mismatches(context, messages));
    detected.extend(external_constraints(context, messages));

    detected
        .into_iter()
        .filter(|candidate| {
            !context.conflicts.iter().any(|known| {
                !known.is_resolved()
                    && known.conflict_type == candidate.conflict_type
                    && same_agents(&known.involved_agents, &candidate.involved_agents)
            })
        })
        .collect()
}

fn same_agents(a: &[String], b: &[String]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

fn payload_field<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
    // Conversation payloads nest the body under `content`.
    payload
        .get("content")
        .and_then(|content| content.get(key))
        .or_else(|| payload.get(key))
}

/// Two or more agents answering the same question with incompatible
/// decisions.
fn contradictory_responses(context: &ConversationContext, messages: &[Message]) -> Vec<Conflict> {
    let stances = latest_stances(messages);
    if stances.len() < 2 {
        return Vec::new();
    }
    let mut decisions: Vec<&str> = stances.iter().map(|s| s.decision.as_str()).collect();
    decisions.sort_unstable();
    decisions.dedup();
    if decisions.len() < 2 {
        return Vec::new();
    }

    let involved: Vec<String> = stances.iter().map(|s| s.agent_id.clone()).collect();
    vec![Conflict::new(
        context.conversation_id,
        ConflictType::ContradictoryResponses,
        format!("incompatible decisions: {}", decisions.join(" vs ")),
        involved,
    )]
}

/// Two or more proposals claiming the same exclusive resource.
fn resource_conflicts(context: &ConversationContext, messages: &[Message]) -> Vec<Conflict> {
    let mut claims: HashMap<&str, Vec<&str>> = HashMap::new();
    for message in messages {
        let exclusive = payload_field(&message.payload, "exclusive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !exclusive {
            continue;
        }
        if let Some(resource) = payload_field(&message.payload, "resource").and_then(Value::as_str)
        {
            let claimants = claims.entry(resource).or_default();
            if !claimants.contains(&message.from_agent.as_str()) {
                claimants.push(&message.from_agent);
            }
        }
    }

    let mut conflicts = Vec::new();
    let mut resources: Vec<&str> = claims.keys().copied().collect();
    resources.sort_unstable();
    for resource in resources {
        let claimants = &claims[resource];
        if claimants.len() >= 2 {
            conflicts.push(Conflict::new(
                context.conversation_id,
                ConflictType::ResourceConflict,
                format!("exclusive resource '{resource}' claimed by multiple agents"),
                claimants.iter().map(|a| a.to_string()).collect(),
            ));
        }
    }
    conflicts
}

/// Agents assigning different priorities to the same item.
fn priority_conflicts(context: &ConversationContext, messages: &[Message]) -> Vec<Conflict> {
    let mut rankings: HashMap<&str, HashMap<&str, i64>> = HashMap::new();
    for message in messages {
        let (Some(item), Some(priority)) = (
            payload_field(&message.payload, "item").and_then(Value::as_str),
            payload_field(&message.payload, "priority").and_then(Value::as_i64),
        ) else {
            continue;
        };
        rankings
            .entry(item)
            .or_default()
            .insert(&message.from_agent, priority);
    }

    let mut conflicts = Vec::new();
    let mut items: Vec<&str> = rankings.keys().copied().collect();
    items.sort_unstable();
    for item in items {
        let by_agent = &rankings[item];
        let mut priorities: Vec<i64> = by_agent.values().copied().collect();
        priorities.sort_unstable();
        priorities.dedup();
        if priorities.len() >= 2 {
            let mut involved: Vec<String> = by_agent.keys().map(|a| a.to_string()).collect();
            involved.sort();
            conflicts.push(Conflict::new(
                context.conversation_id,
                ConflictType::PriorityConflict,
                format!("conflicting priorities for '{item}'"),
                involved,
            ));
        }
    }
    conflicts
}

/// Agents declaring incompatible deadlines for the same task.
fn timing_conflicts(context: &ConversationContext, messages: &[Message]) -> Vec<Conflict> {
    let mut deadlines: HashMap<&str, HashMap<&str, &str>> = HashMap::new();
    for message in messages {
        let (Some(task), Some(deadline)) = (
            payload_field(&message.payload, "task").and_then(Value::as_str),
            payload_field(&message.payload, "deadline").and_then(Value::as_str),
        ) else {
            continue;
        };
        deadlines
            .entry(task)
            .or_default()
            .insert(&message.from_agent, deadline);
    }

    let mut conflicts = Vec::new();
    let mut tasks: Vec<&str> = deadlines.keys().copied().collect();
    tasks.sort_unstable();
    for task in tasks {
        let by_agent = &deadlines[task];
        let mut distinct: Vec<&str> = by_agent.values().copied().collect();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() >= 2 {
            let mut involved: Vec<String> = by_agent.keys().map(|a| a.to_string()).collect();
            involved.sort();
            conflicts.push(Conflict::new(
                context.conversation_id,
                ConflictType::TimingConflict,
                format!("incompatible deadlines for '{task}'"),
                involved,
            ));
        }
    }
    conflicts
}

/// Messages whose type is outside the conversation's declared protocol.
fn protocol_mismatches(context: &ConversationContext, messages: &[Message]) -> Vec<Conflict> {
    let Some(allowed) = context
        .metadata
        .get("protocol")
        .and_then(|p| p.get("allowed_types"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    let allowed: Vec<&str> = allowed.iter().filter_map(Value::as_str).collect();
    if allowed.is_empty() {
        return Vec::new();
    }

    let mut offenders: Vec<String> = Vec::new();
    for message in messages {
        if !allowed.contains(&message.message_type.as_str())
            && !offenders.contains(&message.from_agent)
        {
            offenders.push(message.from_agent.clone());
        }
    }
    if offenders.is_empty() {
        return Vec::new();
    }
    offenders.sort();
    vec![Conflict::new(
        context.conversation_id,
        ConflictType::ProtocolMismatch,
        format!("message types outside protocol [{}]", allowed.join(", ")),
        offenders,
    )]
}

/// A participant reporting an external block.
fn external_constraints(context: &ConversationContext, messages: &[Message]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for message in messages {
        let blocked = payload_field(&message.payload, "external_block")
            .map(|v| v.as_bool().unwrap_or(true))
            .unwrap_or(false);
        if blocked {
            let constraint = payload_field(&message.payload, "constraint")
                .and_then(Value::as_str)
                .unwrap_or("unspecified external constraint");
            conflicts.push(Conflict::new(
                context.conversation_id,
                ConflictType::ExternalConstraint,
                constraint.to_string(),
                vec![message.from_agent.clone()],
            ));
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_core::{MessagePriority, MessageStatus, Participant, ParticipantRole};
    use serde_json::json;

    fn conversation() -> ConversationContext {
        ConversationContext::new(
            "release gating",
            "approve or reject",
            vec![
                Participant::new("p1", ParticipantRole::Contributor, 1.0),
                Participant::new("p2", ParticipantRole::Contributor, 1.0),
                Participant::new("p3", ParticipantRole::Contributor, 1.0),
            ],
            600,
        )
    }

    fn msg(context: &ConversationContext, from: &str, payload: Value) -> Message {
        let now = Utc::now();
        Message {
            message_id: Uuid::new_v4(),
            from_agent: from.to_string(),
            to_agent: Some("p-all".to_string()),
            message_type: "conversation_message".to_string(),
            payload: json!({"content": payload}),
            priority: MessagePriority::Normal,
            status: MessageStatus::Delivered,
            created_at: now,
            delivered_at: Some(now),
            acknowledged_at: None,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: now,
            expires_at: None,
            error: None,
            correlation_id: None,
            parent_message_id: None,
            conversation_id: Some(context.conversation_id),
        }
    }

    #[test]
    fn test_contradictory_responses_detected() {
        let context = conversation();
        let messages = vec![
            msg(&context, "p1", json!({"decision": "approve"})),
            msg(&context, "p2", json!({"decision": "approve"})),
            msg(&context, "p3", json!({"decision": "reject"})),
        ];
        let conflicts = detect_conflicts(&context, &messages);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::ContradictoryResponses);
        assert_eq!(conflicts[0].involved_agents.len(), 3);
    }

    #[test]
    fn test_agreement_is_not_a_conflict() {
        let context = conversation();
        let messages = vec![
            msg(&context, "p1", json!({"decision": "approve"})),
            msg(&context, "p2", json!({"decision": "approve"})),
        ];
        assert!(detect_conflicts(&context, &messages).is_empty());
    }

    #[test]
    fn test_latest_stance_wins_per_agent() {
        let context = conversation();
        let mut first = msg(&context, "p1", json!({"decision": "reject"}));
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let messages = vec![
            first,
            msg(&context, "p1", json!({"decision": "approve"})),
            msg(&context, "p2", json!({"decision": "approve"})),
        ];
        assert!(detect_conflicts(&context, &messages).is_empty());
    }

    #[test]
    fn test_exclusive_resource_claims() {
        let context = conversation();
        let messages = vec![
            msg(&context, "p1", json!({"resource": "ledger-lock", "exclusive": true})),
            msg(&context, "p2", json!({"resource": "ledger-lock", "exclusive": true})),
        ];
        let conflicts = detect_conflicts(&context, &messages);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::ResourceConflict);
    }

    #[test]
    fn test_known_unresolved_conflict_not_duplicated() {
        let mut context = conversation();
        let messages = vec![
            msg(&context, "p1", json!({"decision": "approve"})),
            msg(&context, "p2", json!({"decision": "reject"})),
        ];
        let first = detect_conflicts(&context, &messages);
        assert_eq!(first.len(), 1);
        context.conflicts.extend(first);
        assert!(detect_conflicts(&context, &messages).is_empty());
    }

    #[test]
    fn test_protocol_mismatch() {
        let mut context = conversation();
        context.metadata = json!({"protocol": {"allowed_types": ["conversation_message"]}});
        let mut off_protocol = msg(&context, "p2", json!({"decision": "approve"}));
        off_protocol.message_type = "escalation".to_string();
        let conflicts = detect_conflicts(&context, &[off_protocol]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::ProtocolMismatch);
    }

    #[test]
    fn test_external_constraint() {
        let context = conversation();
        let messages = vec![msg(
            &context,
            "p3",
            json!({"external_block": true, "constraint": "upstream regulator freeze"}),
        )];
        let conflicts = detect_conflicts(&context, &messages);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::ExternalConstraint);
        assert_eq!(conflicts[0].description, "upstream regulator freeze");
    }
}
