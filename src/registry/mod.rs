//! Instance registry: the daemon-wide context owning every simulated server
//! and client session, guarded by a single mutex.
//!
//! Handlers lock the registry once on entry and hold it for their whole
//! body; the stack's connection-indication callback writes through the
//! instance's shared `clients` handle instead, so stack tasks never contend
//! for (or re-enter) the registry lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::iec::{IedConnection, IedServer, IedServerConfig, SharedModel};

pub type SharedContext = Arc<Mutex<BackendContext>>;

/// One peer currently connected to a simulated server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: String,
    pub connected_at: String,
}

/// Shared list the stack's connection-indication callback appends to.
pub type SharedClients = Arc<StdMutex<Vec<ClientInfo>>>;

/// UTC timestamp with second precision, e.g. `2026-08-02T10:15:00Z`.
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub struct ServerInstance {
    pub instance_id: String,
    pub ied_name: String,
    pub ip_address: String,
    pub port: u16,
    pub running: bool,
    pub ip_configured: bool,
    pub model: Option<SharedModel>,
    pub config: Option<IedServerConfig>,
    pub server: Option<IedServer>,
    pub clients: SharedClients,
}

impl ServerInstance {
    fn new(instance_id: &str) -> Self {
        ServerInstance {
            instance_id: instance_id.to_string(),
            ied_name: "IED".to_string(),
            ip_address: "0.0.0.0".to_string(),
            port: 102,
            running: false,
            ip_configured: false,
            model: None,
            config: None,
            server: None,
            clients: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Release stack resources in the mandated order: stop the server,
    /// destroy it, then the config, then the model. Each handle is taken out
    /// of its slot exactly once, so repeated calls are harmless.
    pub fn release_stack_resources(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop();
            self.running = false;
        }
        self.config.take();
        self.model.take();
    }
}

pub struct ClientInstance {
    pub instance_id: String,
    pub target_host: String,
    pub target_port: u16,
    pub ied_name: String,
    pub connection: Option<IedConnection>,
    pub connected: bool,
}

impl ClientInstance {
    fn new(instance_id: &str) -> Self {
        ClientInstance {
            instance_id: instance_id.to_string(),
            target_host: String::new(),
            target_port: 102,
            ied_name: "IED".to_string(),
            connection: None,
            connected: false,
        }
    }
}

/// Daemon-wide shared state. Constructed once in `main` and threaded into
/// the transport and the dispatcher; not a hidden singleton.
pub struct BackendContext {
    pub server_instances: HashMap<String, ServerInstance>,
    pub client_instances: HashMap<String, ClientInstance>,
    pub global_interface_name: String,
    pub global_prefix_len: u8,
}

impl BackendContext {
    pub fn new() -> Self {
        BackendContext {
            server_instances: HashMap::new(),
            client_instances: HashMap::new(),
            global_interface_name: String::new(),
            global_prefix_len: 24,
        }
    }

    pub fn get_server_instance(&mut self, instance_id: &str) -> Option<&mut ServerInstance> {
        self.server_instances.get_mut(instance_id)
    }

    pub fn get_or_create_server_instance(&mut self, instance_id: &str) -> &mut ServerInstance {
        self.server_instances
            .entry(instance_id.to_string())
            .or_insert_with(|| ServerInstance::new(instance_id))
    }

    pub fn remove_server_instance(&mut self, instance_id: &str) {
        self.server_instances.remove(instance_id);
    }

    pub fn get_client_instance(&mut self, instance_id: &str) -> Option<&mut ClientInstance> {
        self.client_instances.get_mut(instance_id)
    }

    pub fn get_or_create_client_instance(&mut self, instance_id: &str) -> &mut ClientInstance {
        self.client_instances
            .entry(instance_id.to_string())
            .or_insert_with(|| ClientInstance::new(instance_id))
    }

    pub fn remove_client_instance(&mut self, instance_id: &str) {
        self.client_instances.remove(instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_instance_defaults() {
        let mut ctx = BackendContext::new();
        let inst = ctx.get_or_create_server_instance("a");
        assert_eq!(inst.ied_name, "IED");
        assert_eq!(inst.ip_address, "0.0.0.0");
        assert_eq!(inst.port, 102);
        assert!(!inst.running);
        assert!(inst.model.is_none());
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut ctx = BackendContext::new();
        ctx.get_or_create_server_instance("a").port = 10102;
        assert_eq!(ctx.get_or_create_server_instance("a").port, 10102);
        assert_eq!(ctx.server_instances.len(), 1);

        ctx.remove_server_instance("a");
        assert!(ctx.get_server_instance("a").is_none());
    }

    #[test]
    fn client_instance_defaults() {
        let mut ctx = BackendContext::new();
        let inst = ctx.get_or_create_client_instance("c");
        assert_eq!(inst.target_port, 102);
        assert!(!inst.connected);
        assert!(inst.connection.is_none());
    }

    #[test]
    fn default_prefix_len_is_24() {
        let ctx = BackendContext::new();
        assert!(ctx.global_interface_name.is_empty());
        assert_eq!(ctx.global_prefix_len, 24);
    }
}
