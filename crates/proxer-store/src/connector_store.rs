//! Connectors, pair tokens, and connector credentials (spec §4.3).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use proxer_auth::{generate_secret, hash_secret};
use proxer_proto::{normalize_identifier, IdentifierError};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Connector, Credential, PairToken};

#[derive(Debug, Error)]
pub enum ConnectorStoreError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
    #[error("connector '{0}' not found")]
    NotFound(String),
    #[error("pair token not found or already reaped")]
    UnknownPairToken,
    #[error("pair token already used")]
    PairTokenUsed,
    #[error("pair token expired")]
    PairTokenExpired,
}

pub type ConnectorStoreResult<T> = Result<T, ConnectorStoreError>;

impl From<ConnectorStoreError> for proxer_proto::ProxerError {
    fn from(err: ConnectorStoreError) -> Self {
        use proxer_proto::ErrorKind;
        let kind = match &err {
            ConnectorStoreError::NotFound(_)
            | ConnectorStoreError::UnknownPairToken
            | ConnectorStoreError::PairTokenExpired => ErrorKind::NotFound,
            ConnectorStoreError::PairTokenUsed => ErrorKind::Conflict,
            ConnectorStoreError::InvalidIdentifier(_) => ErrorKind::Conflict,
        };
        proxer_proto::ProxerError::new(kind, err.to_string())
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    connectors: HashMap<String, Connector>,
    credentials: HashMap<String, Credential>,
    pair_tokens: HashMap<String, PairToken>,
}

/// Thread-safe registry for connectors, their credentials, and the
/// single-use pair tokens used to bootstrap them.
#[derive(Debug, Default)]
pub struct ConnectorStore {
    state: RwLock<ConnectorState>,
}

impl ConnectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_connector(&self, tenant_id: &str, name: &str) -> ConnectorStoreResult<Connector> {
        normalize_identifier(tenant_id)?;
        let now = Utc::now();
        let connector = Connector {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        let mut state = self.state.write().unwrap();
        state.connectors.insert(connector.id.clone(), connector.clone());
        tracing::info!(connector_id = %connector.id, tenant_id = %tenant_id, "connector created");
        Ok(connector)
    }

    pub fn get_connector(&self, id: &str) -> Option<Connector> {
        self.state.read().unwrap().connectors.get(id).cloned()
    }

    pub fn connector_exists(&self, id: &str) -> bool {
        self.get_connector(id).is_some()
    }

    pub fn list_connectors(&self, tenant_id: &str) -> Vec<Connector> {
        self.state
            .read()
            .unwrap()
            .connectors
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Removes the connector, its credential, and revokes all its pair
    /// tokens. Routes still referencing the connector are not touched here
    /// (spec §4.3: "any route still referencing it becomes orphan but is
    /// not auto-deleted").
    pub fn delete_connector(&self, id: &str) -> ConnectorStoreResult<()> {
        let mut state = self.state.write().unwrap();
        if state.connectors.remove(id).is_none() {
            return Err(ConnectorStoreError::NotFound(id.to_string()));
        }
        state.credentials.remove(id);
        state.pair_tokens.retain(|_, t| t.connector_id != id);
        Ok(())
    }

    /// Issues a single-use pair token with the given TTL.
    pub fn issue_pair_token(&self, connector_id: &str, ttl: Duration) -> ConnectorStoreResult<PairToken> {
        let mut state = self.state.write().unwrap();
        if !state.connectors.contains_key(connector_id) {
            return Err(ConnectorStoreError::NotFound(connector_id.to_string()));
        }
        let now = Utc::now();
        let token = PairToken {
            token: generate_secret(),
            connector_id: connector_id.to_string(),
            created_at: now,
            expires_at: now + ttl,
            used: false,
        };
        state.pair_tokens.insert(token.token.clone(), token.clone());
        Ok(token)
    }

    /// Atomically verifies a pair token is unused and unexpired, rotates
    /// the connector's secret, and marks the token used (spec I7, §4.3).
    /// Returns the plaintext secret (shown to the agent exactly once).
    pub fn consume_pair_token(&self, token: &str) -> ConnectorStoreResult<(String, String)> {
        let mut state = self.state.write().unwrap();
        let now = Utc::now();

        let entry = state
            .pair_tokens
            .get(token)
            .ok_or(ConnectorStoreError::UnknownPairToken)?;
        if entry.used {
            return Err(ConnectorStoreError::PairTokenUsed);
        }
        if entry.is_expired(now) {
            return Err(ConnectorStoreError::PairTokenExpired);
        }
        let connector_id = entry.connector_id.clone();

        let secret = generate_secret();
        let credential = Credential {
            connector_id: connector_id.clone(),
            secret_hash: hash_secret(&secret),
            updated_at: now,
        };
        state.credentials.insert(connector_id.clone(), credential);
        state.pair_tokens.get_mut(token).unwrap().used = true;

        Ok((connector_id, secret))
    }

    /// Verifies a presented connector secret against the stored hash.
    pub fn verify_secret(&self, connector_id: &str, secret: &str) -> bool {
        let state = self.state.read().unwrap();
        match state.credentials.get(connector_id) {
            Some(cred) => proxer_auth::verify_secret(secret, &cred.secret_hash).unwrap_or(false),
            None => false,
        }
    }

    /// Opportunistically removes expired or used pair tokens older than
    /// their TTL window; callers may run this on a timer (spec §4.3:
    /// "reaped opportunistically").
    pub fn reap_pair_tokens(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write().unwrap();
        let before = state.pair_tokens.len();
        state
            .pair_tokens
            .retain(|_, t| !t.used && !t.is_expired(now));
        before - state.pair_tokens.len()
    }

    pub fn restore(&self, connectors: Vec<Connector>, credentials: Vec<Credential>, pair_tokens: Vec<PairToken>) {
        let mut state = self.state.write().unwrap();
        state.connectors = connectors.into_iter().map(|c| (c.id.clone(), c)).collect();
        state.credentials = credentials
            .into_iter()
            .map(|c| (c.connector_id.clone(), c))
            .collect();
        state.pair_tokens = pair_tokens
            .into_iter()
            .map(|t| (t.token.clone(), t))
            .collect();
    }

    pub fn snapshot(&self) -> (Vec<Connector>, Vec<Credential>, Vec<PairToken>) {
        let state = self.state.read().unwrap();
        (
            state.connectors.values().cloned().collect(),
            state.credentials.values().cloned().collect(),
            state.pair_tokens.values().cloned().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_token_consumable_at_most_once() {
        let store = ConnectorStore::new();
        let connector = store.create_connector("team-a", "conn-a").unwrap();
        let token = store
            .issue_pair_token(&connector.id, Duration::minutes(10))
            .unwrap();

        let (connector_id, secret) = store.consume_pair_token(&token.token).unwrap();
        assert_eq!(connector_id, connector.id);
        assert!(store.verify_secret(&connector.id, &secret));

        assert!(matches!(
            store.consume_pair_token(&token.token),
            Err(ConnectorStoreError::PairTokenUsed)
        ));
    }

    #[test]
    fn consuming_rotates_secret() {
        let store = ConnectorStore::new();
        let connector = store.create_connector("team-a", "conn-a").unwrap();
        let t1 = store
            .issue_pair_token(&connector.id, Duration::minutes(10))
            .unwrap();
        let (_, secret1) = store.consume_pair_token(&t1.token).unwrap();

        let t2 = store
            .issue_pair_token(&connector.id, Duration::minutes(10))
            .unwrap();
        let (_, secret2) = store.consume_pair_token(&t2.token).unwrap();

        assert_ne!(secret1, secret2);
        assert!(!store.verify_secret(&connector.id, &secret1));
        assert!(store.verify_secret(&connector.id, &secret2));
    }

    #[test]
    fn expired_pair_token_rejected() {
        let store = ConnectorStore::new();
        let connector = store.create_connector("team-a", "conn-a").unwrap();
        let token = store
            .issue_pair_token(&connector.id, Duration::seconds(-1))
            .unwrap();
        assert!(matches!(
            store.consume_pair_token(&token.token),
            Err(ConnectorStoreError::PairTokenExpired)
        ));
    }

    #[test]
    fn delete_connector_cascades_credential_and_tokens() {
        let store = ConnectorStore::new();
        let connector = store.create_connector("team-a", "conn-a").unwrap();
        let token = store
            .issue_pair_token(&connector.id, Duration::minutes(10))
            .unwrap();
        store.consume_pair_token(&token.token).unwrap();

        store.delete_connector(&connector.id).unwrap();
        assert!(!store.connector_exists(&connector.id));
        assert!(!store.verify_secret(&connector.id, "anything"));
    }
}
