use proxer_proto::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("agent token is missing or does not match")]
    Unauthorized,
    #[error("registration payload is invalid: {0}")]
    BadRequest(String),
    #[error("session {0} is unknown or has expired")]
    UnknownSession(String),
    #[error("session {0} was evicted while a request was in flight")]
    SessionEvictedMidDispatch(String),
    #[error("tunnel {0} has no connected agent")]
    TunnelNotConnected(String),
    #[error("connector {0} has no connected agent")]
    ConnectorNotConnected(String),
    #[error("the agent's pending queue is full")]
    AgentQueueFull,
    #[error("the gateway is over its global pending-request limit")]
    GlobalBackpressure,
    #[error("the in-flight request timed out waiting for an agent response")]
    ProxyRequestTimeout,
    #[error("request {0} is not a pending request for this session")]
    UnknownPending(String),
    #[error("request {0} belongs to a different session")]
    SessionMismatch(String),
    #[error("request {0} was dispatched against a different tunnel")]
    TunnelMismatch(String),
}

impl HubError {
    /// Maps a hub failure onto the wire error taxonomy (spec §7).
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::Unauthorized => ErrorKind::Unauthorized,
            HubError::BadRequest(_) => ErrorKind::NotFound,
            HubError::UnknownSession(_) => ErrorKind::Unauthorized,
            HubError::SessionEvictedMidDispatch(_) => ErrorKind::BadGateway,
            HubError::TunnelNotConnected(_) | HubError::ConnectorNotConnected(_) => {
                ErrorKind::BadGateway
            }
            HubError::AgentQueueFull | HubError::GlobalBackpressure => {
                ErrorKind::ServiceUnavailable
            }
            HubError::ProxyRequestTimeout => ErrorKind::GatewayTimeout,
            HubError::UnknownPending(_)
            | HubError::SessionMismatch(_)
            | HubError::TunnelMismatch(_) => ErrorKind::NotFound,
        }
    }
}

impl From<HubError> for proxer_proto::ProxerError {
    fn from(err: HubError) -> Self {
        let kind = err.kind();
        proxer_proto::ProxerError::new(kind, err.to_string())
    }
}
