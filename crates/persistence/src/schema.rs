//! ScyllaDB schema creation

use crate::PersistenceError;
use scylla::Session;

/// Create the keyspace if it doesn't exist.
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );
    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create keyspace: {e}")))?;
    Ok(())
}

/// Create all required tables.
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    // Per-recipient message rows. Reads by status/recipient use
    // secondary indexes below; the hot claim path filters on
    // (status, next_retry_at) and sorts client-side.
    let agent_messages = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.agent_messages (
            message_id UUID,
            from_agent TEXT,
            to_agent TEXT,
            message_type TEXT,
            payload TEXT,
            priority INT,
            status TEXT,
            created_at TIMESTAMP,
            delivered_at TIMESTAMP,
            acknowledged_at TIMESTAMP,
            retry_count INT,
            max_retries INT,
            next_retry_at TIMESTAMP,
            expires_at TIMESTAMP,
            error TEXT,
            correlation_id UUID,
            parent_message_id UUID,
            conversation_id UUID,
            PRIMARY KEY (message_id)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(agent_messages, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create agent_messages: {e}")))?;

    for index in [
        format!("CREATE INDEX IF NOT EXISTS ON {}.agent_messages (status)", keyspace),
        format!("CREATE INDEX IF NOT EXISTS ON {}.agent_messages (to_agent)", keyspace),
        format!(
            "CREATE INDEX IF NOT EXISTS ON {}.agent_messages (conversation_id)",
            keyspace
        ),
    ] {
        session
            .query_unpaged(index, &[])
            .await
            .map_err(|e| PersistenceError::Schema(format!("failed to create index: {e}")))?;
    }

    let delivery_attempts = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.message_delivery_attempts (
            message_id UUID,
            attempt_number INT,
            attempted_at TIMESTAMP,
            outcome TEXT,
            error TEXT,
            PRIMARY KEY ((message_id), attempt_number)
        ) WITH CLUSTERING ORDER BY (attempt_number ASC)
    "#,
        keyspace
    );
    session
        .query_unpaged(delivery_attempts, &[])
        .await
        .map_err(|e| {
            PersistenceError::Schema(format!("failed to create message_delivery_attempts: {e}"))
        })?;

    let conversations = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.conversations (
            conversation_id UUID,
            topic TEXT,
            objective TEXT,
            state TEXT,
            started_at TIMESTAMP,
            last_activity TIMESTAMP,
            timeout_secs BIGINT,
            metadata_json TEXT,
            participants_json TEXT,
            conflicts_json TEXT,
            PRIMARY KEY (conversation_id)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(conversations, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create conversations: {e}")))?;
    session
        .query_unpaged(
            format!("CREATE INDEX IF NOT EXISTS ON {}.conversations (state)", keyspace),
            &[],
        )
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create index: {e}")))?;

    let conflict_resolutions = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.conflict_resolutions (
            conversation_id UUID,
            conflict_id UUID,
            conflict_type TEXT,
            description TEXT,
            involved_agents_json TEXT,
            strategy_used TEXT,
            resolved_successfully BOOLEAN,
            resolution_summary TEXT,
            detected_at TIMESTAMP,
            resolved_at TIMESTAMP,
            PRIMARY KEY ((conversation_id), conflict_id)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(conflict_resolutions, &[])
        .await
        .map_err(|e| {
            PersistenceError::Schema(format!("failed to create conflict_resolutions: {e}"))
        })?;

    let consensus_sessions = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.consensus_sessions (
            consensus_id UUID,
            topic TEXT,
            algorithm TEXT,
            config_json TEXT,
            state TEXT,
            current_round INT,
            rounds_used INT,
            created_at TIMESTAMP,
            result_json TEXT,
            PRIMARY KEY (consensus_id)
        )
    "#,
        keyspace
    );
    session
        .query_unpaged(consensus_sessions, &[])
        .await
        .map_err(|e| {
            PersistenceError::Schema(format!("failed to create consensus_sessions: {e}"))
        })?;

    let consensus_opinions = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.consensus_opinions (
            consensus_id UUID,
            round INT,
            agent_id TEXT,
            decision TEXT,
            confidence DOUBLE,
            reasoning TEXT,
            supporting_json TEXT,
            ranking_json TEXT,
            submitted_at TIMESTAMP,
            PRIMARY KEY ((consensus_id), round, agent_id)
        ) WITH CLUSTERING ORDER BY (round ASC, agent_id ASC)
    "#,
        keyspace
    );
    session
        .query_unpaged(consensus_opinions, &[])
        .await
        .map_err(|e| {
            PersistenceError::Schema(format!("failed to create consensus_opinions: {e}"))
        })?;

    let consensus_rounds = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.consensus_rounds (
            consensus_id UUID,
            round INT,
            opened_at TIMESTAMP,
            closed_at TIMESTAMP,
            timed_out BOOLEAN,
            abstained_json TEXT,
            PRIMARY KEY ((consensus_id), round)
        ) WITH CLUSTERING ORDER BY (round ASC)
    "#,
        keyspace
    );
    session
        .query_unpaged(consensus_rounds, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("failed to create consensus_rounds: {e}")))?;

    tracing::info!("all tables created");
    Ok(())
}
