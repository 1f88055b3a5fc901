use std::sync::Mutex;

use crate::error::Error;

#[derive(Clone, PartialEq, Eq, Debug)]
enum UpstreamState {
    Unconnected,
    Unsuitable(String),
    Ok { node_version: String },
}

/// Tracks whether the upstream node is usable. Every ingress path (HTTP
/// handlers, block notifications) short-circuits while the gate is closed.
/// The lock is held only to copy the state out.
pub struct HealthGate {
    state: Mutex<UpstreamState>,
}

impl Default for HealthGate {
    fn default() -> Self {
        HealthGate {
            state: Mutex::new(UpstreamState::Unconnected),
        }
    }
}

impl HealthGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ok(&self, node_version: String) {
        *self.state.lock().expect("health lock") = UpstreamState::Ok { node_version };
    }

    pub fn set_unconnected(&self) {
        *self.state.lock().expect("health lock") = UpstreamState::Unconnected;
    }

    pub fn set_unsuitable(&self, reason: String) {
        *self.state.lock().expect("health lock") = UpstreamState::Unsuitable(reason);
    }

    /// Record the outcome of a suitability probe.
    pub fn set_from_check(&self, outcome: &Result<String, Error>) {
        match outcome {
            Ok(version) => self.set_ok(version.clone()),
            Err(Error::DcrdUnsuitable(reason)) => self.set_unsuitable(reason.clone()),
            Err(_) => self.set_unconnected(),
        }
    }

    pub fn check(&self) -> Result<(), Error> {
        match &*self.state.lock().expect("health lock") {
            UpstreamState::Ok { .. } => Ok(()),
            UpstreamState::Unconnected => Err(Error::DcrdUnconnected),
            UpstreamState::Unsuitable(reason) => Err(Error::DcrdUnsuitable(reason.clone())),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.check().is_ok()
    }

    pub fn node_version(&self) -> String {
        match &*self.state.lock().expect("health lock") {
            UpstreamState::Ok { node_version } => node_version.clone(),
            _ => String::new(),
        }
    }
}
