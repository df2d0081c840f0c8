//! The request envelope carried through the chain.

use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::mechanism::Mechanism;

/// A desired connection plus the mechanisms the requester will accept,
/// in preference order. Downstream components pick exactly one preference
/// and discard the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkServiceRequest {
    pub connection: Connection,
    #[serde(default)]
    pub mechanism_preferences: Vec<Mechanism>,
}

impl NetworkServiceRequest {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            mechanism_preferences: Vec::new(),
        }
    }

    /// Adds a mechanism preference (lowest index = most preferred).
    pub fn with_preference(mut self, mechanism: Mechanism) -> Self {
        self.mechanism_preferences.push(mechanism);
        self
    }
}
