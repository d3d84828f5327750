//! Proxer wire protocol definitions.
//!
//! Shared types exchanged between the gateway and connector agents over the
//! long-poll control channel, plus the identifier validation rules and error
//! taxonomy that both the gateway's stores and its HTTP surface depend on.

pub mod error;
pub mod identifier;
pub mod wire;

pub use error::{ErrorKind, ProxerError};
pub use identifier::{normalize_identifier, validate_identifier, IdentifierError};
pub use wire::{
    AgentHeartbeatRequest, AgentPairRequest, AgentPairResponse, AgentPullResponse,
    AgentRegisterRequest, AgentRegisterResponse, AgentRespondRequest, LocalTarget, ProxyRequest,
    ProxyResponse, TunnelRegistration, TunnelSummary,
};

/// Protocol version for the agent control channel. Bumped when the wire
/// records in [`wire`] gain incompatible fields.
pub const PROTOCOL_VERSION: u32 = 1;
