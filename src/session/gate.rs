use std::sync::Arc;

use crate::network::NetworkStatus;

use super::AuthState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    NotAuthenticated,
    Offline,
}

#[derive(Clone)]
pub struct SessionGate {
    auth: Arc<dyn AuthState>,
    network: Arc<dyn NetworkStatus>,
}

impl SessionGate {
    pub fn new(auth: Arc<dyn AuthState>, network: Arc<dyn NetworkStatus>) -> Self {
        Self { auth, network }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_logged_in() && self.auth.session_token().is_some()
    }

    pub fn is_reachable(&self) -> bool {
        self.network.is_connected()
    }

    pub fn check(&self) -> Result<(), GateRejection> {
        if !self.is_authenticated() {
            return Err(GateRejection::NotAuthenticated);
        }
        if !self.is_reachable() {
            return Err(GateRejection::Offline);
        }
        Ok(())
    }

    pub fn auth(&self) -> &Arc<dyn AuthState> {
        &self.auth
    }
}
