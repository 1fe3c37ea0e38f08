//! Message Type Registry
//!
//! Every message carries a `type` drawn from this registry. A descriptor
//! supplies the payload schema, default priority and default expiry; a
//! message with an unknown type is rejected before it is persisted.

use dashmap::DashMap;
use jsonschema::JSONSchema;
use serde_json::{json, Value};

use sentinel_core::{MessagePriority, MessageTypeDescriptor};

use crate::BusError;

struct RegisteredType {
    descriptor: MessageTypeDescriptor,
    validator: Option<JSONSchema>,
}

/// Concurrent registry of message type descriptors with compiled payload
/// validators.
pub struct MessageTypeRegistry {
    types: DashMap<String, RegisteredType>,
}

impl MessageTypeRegistry {
    /// An empty registry. Most deployments want `with_system_types()`.
    pub fn new() -> Self {
        Self {
            types: DashMap::new(),
        }
    }

    /// A registry pre-seeded with the platform system types.
    pub fn with_system_types() -> Self {
        let registry = Self::new();
        for descriptor in system_types() {
            // System descriptors carry valid schemas; a compile failure
            // here is a programming error.
            registry
                .register(descriptor)
                .expect("system message type schema must compile");
        }
        registry
    }

    /// Register or replace a type descriptor, compiling its schema.
    pub fn register(&self, descriptor: MessageTypeDescriptor) -> Result<(), BusError> {
        let validator = match &descriptor.payload_schema {
            Some(schema) => Some(
                JSONSchema::compile(schema)
                    .map_err(|e| BusError::SchemaViolation(e.to_string()))?,
            ),
            None => None,
        };
        self.types.insert(
            descriptor.message_type.clone(),
            RegisteredType {
                descriptor,
                validator,
            },
        );
        Ok(())
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.types.contains_key(message_type)
    }

    pub fn get(&self, message_type: &str) -> Option<MessageTypeDescriptor> {
        self.types.get(message_type).map(|t| t.descriptor.clone())
    }

    pub fn type_names(&self) -> Vec<String> {
        self.types.iter().map(|t| t.key().clone()).collect()
    }

    /// Validate a payload against the registered schema for `message_type`.
    pub fn validate(&self, message_type: &str, payload: &Value) -> Result<(), BusError> {
        let registered = self
            .types
            .get(message_type)
            .ok_or_else(|| BusError::UnknownType(message_type.to_string()))?;

        if let Some(validator) = &registered.validator {
            if let Err(errors) = validator.validate(payload) {
                let detail = errors
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(BusError::SchemaViolation(format!(
                    "{message_type}: {detail}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for MessageTypeRegistry {
    fn default() -> Self {
        Self::with_system_types()
    }
}

/// Descriptors for the platform system types.
pub fn system_types() -> Vec<MessageTypeDescriptor> {
    vec![
        MessageTypeDescriptor::new("decision_request")
            .with_schema(json!({
                "type": "object",
                "required": ["agent_type", "context"],
                "properties": {
                    "agent_type": {"type": "string"},
                    "context": {"type": "object"}
                }
            }))
            .with_default_priority(MessagePriority::High)
            .requires_response(true)
            .system_type(),
        MessageTypeDescriptor::new("decision_feedback")
            .with_schema(json!({
                "type": "object",
                "required": ["decision_id", "score"],
                "properties": {
                    "decision_id": {"type": "string"},
                    "score": {"type": "number"}
                }
            }))
            .system_type(),
        MessageTypeDescriptor::new("conversation_message")
            .with_schema(json!({
                "type": "object",
                "required": ["content"],
                "properties": {
                    "content": {}
                }
            }))
            .system_type(),
        MessageTypeDescriptor::new("consensus_ballot")
            .with_schema(json!({
                "type": "object",
                "required": ["consensus_id", "round"],
                "properties": {
                    "consensus_id": {"type": "string"},
                    "round": {"type": "integer", "minimum": 0}
                }
            }))
            .with_default_priority(MessagePriority::High)
            .system_type(),
        MessageTypeDescriptor::new("escalation")
            .with_schema(json!({
                "type": "object",
                "required": ["reason"],
                "properties": {
                    "reason": {"type": "string"}
                }
            }))
            .with_default_priority(MessagePriority::Critical)
            .requires_response(true)
            .system_type(),
        MessageTypeDescriptor::new("health_probe")
            .with_default_priority(MessagePriority::Background)
            .with_default_expiry_secs(30)
            .system_type(),
        MessageTypeDescriptor::new("broadcast_alert")
            .with_schema(json!({
                "type": "object",
                "required": ["alert"],
                "properties": {
                    "alert": {"type": "string"}
                }
            }))
            .with_default_priority(MessagePriority::Critical)
            .system_type(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_rejected() {
        let registry = MessageTypeRegistry::with_system_types();
        let err = registry.validate("bogus_type", &json!({})).unwrap_err();
        assert!(matches!(err, BusError::UnknownType(_)));
    }

    #[test]
    fn test_schema_violation_rejected() {
        let registry = MessageTypeRegistry::with_system_types();
        let err = registry
            .validate("decision_request", &json!({"agent_type": "x"}))
            .unwrap_err();
        assert!(matches!(err, BusError::SchemaViolation(_)));
    }

    #[test]
    fn test_valid_payload_accepted() {
        let registry = MessageTypeRegistry::with_system_types();
        registry
            .validate(
                "decision_request",
                &json!({"agent_type": "transaction_guardian", "context": {}}),
            )
            .unwrap();
    }

    #[test]
    fn test_schemaless_type_accepts_anything() {
        let registry = MessageTypeRegistry::with_system_types();
        registry
            .validate("health_probe", &json!({"anything": [1, 2, 3]}))
            .unwrap();
    }

    #[test]
    fn test_custom_registration() {
        let registry = MessageTypeRegistry::new();
        registry
            .register(MessageTypeDescriptor::new("audit_event").with_schema(json!({
                "type": "object",
                "required": ["event"],
            })))
            .unwrap();
        assert!(registry.contains("audit_event"));
        assert!(registry.validate("audit_event", &json!({})).is_err());
        assert!(registry
            .validate("audit_event", &json!({"event": "login"}))
            .is_ok());
    }
}
