//! Virtual-switch protocol double that records every request.

use async_trait::async_trait;
use parking_lot::Mutex;
use sdn_controller::switch::{PortRequest, SwitchProtocol, SwitchSession};
use sdn_controller::SwitchError;
use sdn_types::{ObjectId, PrivateNetworkId};
use std::collections::HashSet;

/// One `add_interface_and_port` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCall {
    pub host: ObjectId,
    pub endpoint: String,
    pub request: PortRequest,
}

/// One `reset_for_network` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetCall {
    pub host: ObjectId,
    pub network: ObjectId,
    pub private_network: PrivateNetworkId,
}

#[derive(Default)]
struct State {
    ports: Vec<PortCall>,
    resets: Vec<ResetCall>,
    failing_hosts: HashSet<ObjectId>,
    stalled_resets: bool,
}

/// Records requests and answers with a bridge name derived from the network.
#[derive(Default)]
pub struct RecordingSwitch {
    state: Mutex<State>,
}

impl RecordingSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridge name returned for a network.
    pub fn bridge_for(network: &ObjectId) -> String {
        format!("br-{network}")
    }

    /// Makes every call toward `host` fail.
    pub fn fail_host(&self, host: &ObjectId) {
        self.state.lock().failing_hosts.insert(host.clone());
    }

    /// Makes every later reset hang until the caller gives up.
    pub fn stall_resets(&self) {
        self.state.lock().stalled_resets = true;
    }

    pub fn ports(&self) -> Vec<PortCall> {
        self.state.lock().ports.clone()
    }

    pub fn ports_for(&self, host: &ObjectId) -> Vec<PortCall> {
        self.state
            .lock()
            .ports
            .iter()
            .filter(|c| &c.host == host)
            .cloned()
            .collect()
    }

    pub fn resets(&self) -> Vec<ResetCall> {
        self.state.lock().resets.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.ports.clear();
        state.resets.clear();
    }
}

#[async_trait]
impl SwitchProtocol for RecordingSwitch {
    async fn add_interface_and_port(
        &self,
        session: &SwitchSession<'_>,
        request: &PortRequest,
    ) -> Result<String, SwitchError> {
        let mut state = self.state.lock();
        if state.failing_hosts.contains(&session.host.id) {
            return Err(SwitchError::Rejected {
                host: session.host.name_label.clone(),
                message: "injected failure".to_string(),
            });
        }
        state.ports.push(PortCall {
            host: session.host.id.clone(),
            endpoint: session.endpoint.clone(),
            request: request.clone(),
        });
        Ok(Self::bridge_for(&request.network))
    }

    async fn reset_for_network(
        &self,
        session: &SwitchSession<'_>,
        network: &ObjectId,
        private_network: &PrivateNetworkId,
    ) -> Result<(), SwitchError> {
        if self.state.lock().stalled_resets {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock();
        if state.failing_hosts.contains(&session.host.id) {
            return Err(SwitchError::Connection {
                host: session.host.name_label.clone(),
                message: "injected failure".to_string(),
            });
        }
        state.resets.push(ResetCall {
            host: session.host.id.clone(),
            network: network.clone(),
            private_network: private_network.clone(),
        });
        Ok(())
    }
}
