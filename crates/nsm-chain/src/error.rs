//! Error taxonomy for chain processing.
//!
//! Stage errors fall into a few families with different handling rules:
//! validation errors fail the call synchronously and are never retried,
//! transport errors surface to the caller but also feed the heal loop for
//! established connections, and namespace resolution errors are fatal for the
//! attempt until new mechanism input arrives.

use thiserror::Error;

use nsm_model::ModelError;

/// Errors raised by chain stages during Request/Close processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Path index points past the end of the segment list.
    #[error("path index {index} out of range for {len} segment(s)")]
    PathIndexOutOfRange { index: usize, len: usize },

    /// No mechanism preference matched what the local side supports.
    #[error("no agreed mechanism for connection {connection_id}")]
    NoMechanismAgreed { connection_id: String },

    /// No `/proc/*/ns/net` entry matched the peer's namespace inode.
    #[error("no network namespace found for inode {inode}")]
    NamespaceNotFound { inode: u64 },

    /// The connection or request failed model validation.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Dialing a downstream peer failed.
    #[error("failed to dial {url}: {reason}")]
    Dial { url: String, reason: String },

    /// A downstream Request/Close returned an error.
    #[error("downstream call failed: {reason}")]
    Downstream { reason: String },

    /// No endpoint candidate matched the requested network service.
    #[error("no endpoint found for network service {network_service}")]
    NoEndpoint { network_service: String },

    /// The identity/authorization provider rejected the request.
    #[error("request not authorized: {reason}")]
    Unauthorized { reason: String },

    /// The forwarder agent rejected the configuration push.
    #[error("forwarder agent error: {reason}")]
    Agent { reason: String },

    /// A subsystem actor is gone and can no longer accept work.
    #[error("{subsystem} is shut down")]
    Shutdown { subsystem: &'static str },

    /// Address allocation against the prefix pool failed.
    #[error("prefix allocation failed: {reason}")]
    PrefixPool { reason: String },
}

impl ChainError {
    pub fn path_index_out_of_range(index: usize, len: usize) -> Self {
        ChainError::PathIndexOutOfRange { index, len }
    }

    pub fn no_mechanism_agreed(connection_id: impl Into<String>) -> Self {
        ChainError::NoMechanismAgreed {
            connection_id: connection_id.into(),
        }
    }

    pub fn namespace_not_found(inode: u64) -> Self {
        ChainError::NamespaceNotFound { inode }
    }

    pub fn dial(url: impl Into<String>, reason: impl Into<String>) -> Self {
        ChainError::Dial {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn downstream(reason: impl Into<String>) -> Self {
        ChainError::Downstream {
            reason: reason.into(),
        }
    }

    pub fn no_endpoint(network_service: impl Into<String>) -> Self {
        ChainError::NoEndpoint {
            network_service: network_service.into(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        ChainError::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn agent(reason: impl Into<String>) -> Self {
        ChainError::Agent {
            reason: reason.into(),
        }
    }

    pub fn shutdown(subsystem: &'static str) -> Self {
        ChainError::Shutdown { subsystem }
    }

    pub fn prefix_pool(reason: impl Into<String>) -> Self {
        ChainError::PrefixPool {
            reason: reason.into(),
        }
    }

    /// True for transient infrastructure failures that the heal loop may
    /// retry for an established connection. Validation and namespace errors
    /// need new input before another attempt can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Dial { .. } | ChainError::Downstream { .. } | ChainError::Agent { .. }
        )
    }
}
