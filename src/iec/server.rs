//! Simulated IED server: owns a TCP listener bound to the instance's
//! `ip:port`, serves session requests against the shared model, and reports
//! peer arrivals/departures through the connection-indication handler.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::IedError;
use super::model::SharedModel;
use super::wire::{self, SessionRequest, SessionResponse};

/// Called with the peer address and `true` on connect / `false` on
/// disconnect. Invoked from the server's own tasks, never from a control
/// plane handler, so it may take its own locks freely.
pub type ConnectionHandler = Arc<dyn Fn(&str, bool) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct IedServerConfig {
    pub max_connections: usize,
}

impl Default for IedServerConfig {
    fn default() -> Self {
        IedServerConfig {
            max_connections: 10,
        }
    }
}

impl IedServerConfig {
    pub fn set_max_connections(&mut self, max: usize) {
        self.max_connections = max;
    }
}

pub struct IedServer {
    model: SharedModel,
    max_connections: usize,
    local_ip: Option<String>,
    handler: Option<ConnectionHandler>,
    running: Arc<AtomicBool>,
    shutdown: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
}

impl IedServer {
    pub fn new(model: SharedModel, config: &IedServerConfig) -> Self {
        IedServer {
            model,
            max_connections: config.max_connections,
            local_ip: None,
            handler: None,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            accept_task: None,
        }
    }

    pub fn set_connection_handler(&mut self, handler: ConnectionHandler) {
        self.handler = Some(handler);
    }

    pub fn set_local_ip(&mut self, ip: &str) {
        self.local_ip = Some(ip.to_string());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind the listener and begin accepting sessions. A failed bind leaves
    /// the server stopped.
    pub async fn start(&mut self, port: u16) -> Result<(), IedError> {
        if self.is_running() {
            return Ok(());
        }

        let bind_ip = self.local_ip.as_deref().unwrap_or("0.0.0.0");
        let listener = TcpListener::bind((bind_ip, port))
            .await
            .map_err(|e| IedError::ServiceError(format!("bind {bind_ip}:{port}: {e}")))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let model = self.model.clone();
        let handler = self.handler.clone();
        let running = self.running.clone();
        let max_connections = self.max_connections;
        let active = Arc::new(AtomicUsize::new(0));

        running.store(true, Ordering::SeqCst);
        self.shutdown = Some(stop_tx);
        self.accept_task = Some(tokio::spawn(async move {
            let mut stop = stop_rx.clone();
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    accepted = listener.accept() => {
                        let (mut stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!("IED server accept failed: {}", e);
                                continue;
                            }
                        };
                        if active.load(Ordering::SeqCst) >= max_connections {
                            debug!("IED server refusing {}: connection limit reached", peer);
                            // Tell the peer why before dropping the socket;
                            // its next request reads the rejection.
                            tokio::spawn(async move {
                                let _ = wire::write_frame(
                                    &mut stream,
                                    &SessionResponse::Error(IedError::ConnectionRejected),
                                )
                                .await;
                            });
                            continue;
                        }
                        active.fetch_add(1, Ordering::SeqCst);
                        let model = model.clone();
                        let handler = handler.clone();
                        let active = active.clone();
                        let stop = stop_rx.clone();
                        tokio::spawn(async move {
                            serve_session(stream, peer.to_string(), model, handler, stop).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        }));

        Ok(())
    }

    /// Stop listening and drop all sessions. Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop) = self.shutdown.take() {
            let _ = stop.send(true);
        }
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for IedServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve_session(
    mut stream: TcpStream,
    peer: String,
    model: SharedModel,
    handler: Option<ConnectionHandler>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("IED session from {}", peer);
    if let Some(h) = &handler {
        h(&peer, true);
    }

    loop {
        let frame = tokio::select! {
            _ = stop.changed() => break,
            frame = wire::read_frame::<_, SessionRequest>(&mut stream) => frame,
        };
        let request = match frame {
            Ok(request) => request,
            Err(e) => {
                debug!("IED session {} ended: {}", peer, e);
                break;
            }
        };
        let response = serve_request(&model, request);
        if let Err(e) = wire::write_frame(&mut stream, &response).await {
            debug!("IED session {} write failed: {}", peer, e);
            break;
        }
    }

    if let Some(h) = &handler {
        h(&peer, false);
    }
}

fn serve_request(model: &SharedModel, request: SessionRequest) -> SessionResponse {
    match request {
        SessionRequest::LogicalDevices => {
            let model = model.read().expect("model lock poisoned");
            SessionResponse::Names(model.devices.iter().map(|d| d.name.clone()).collect())
        }
        SessionRequest::DeviceDirectory { device } => {
            let model = model.read().expect("model lock poisoned");
            match model.device(&device) {
                Some(ld) => {
                    SessionResponse::Names(ld.nodes.iter().map(|n| n.name.clone()).collect())
                }
                None => SessionResponse::Error(IedError::ObjectDoesNotExist),
            }
        }
        SessionRequest::NodeVariables { node_ref } => {
            let model = model.read().expect("model lock poisoned");
            match split_node_ref(&node_ref)
                .and_then(|(ld, ln)| model.device(ld).and_then(|d| d.node(ln)))
            {
                Some(node) => SessionResponse::Names(
                    node.objects
                        .iter()
                        .map(|o| o.name.clone())
                        .chain(node.attributes.iter().map(|a| a.name.clone()))
                        .collect(),
                ),
                None => SessionResponse::Error(IedError::ObjectDoesNotExist),
            }
        }
        SessionRequest::DataDirectory { object_ref } => {
            let model = model.read().expect("model lock poisoned");
            match resolve_object(&model, &object_ref) {
                Some(children) => SessionResponse::Names(children),
                None => SessionResponse::Error(IedError::ObjectDoesNotExist),
            }
        }
        SessionRequest::Read { reference, fc } => {
            let model = model.read().expect("model lock poisoned");
            match model.resolve_attribute(&reference) {
                Some(attr) if attr.fc == fc => match attr.current_value() {
                    Some(value) => SessionResponse::Value(value),
                    None => SessionResponse::Error(IedError::ObjectAccessUnsupported),
                },
                _ => SessionResponse::Error(IedError::ObjectDoesNotExist),
            }
        }
        SessionRequest::Write {
            reference,
            fc,
            value,
        } => {
            let mut model = model.write().expect("model lock poisoned");
            match model.resolve_attribute_mut(&reference) {
                Some(attr) if attr.fc == fc => match attr.update_coerced(&value) {
                    Ok(()) => SessionResponse::Written,
                    Err(e) => SessionResponse::Error(e),
                },
                _ => SessionResponse::Error(IedError::ObjectDoesNotExist),
            }
        }
    }
}

fn split_node_ref(node_ref: &str) -> Option<(&str, &str)> {
    node_ref.split_once('/')
}

fn resolve_object(model: &super::model::IedModel, object_ref: &str) -> Option<Vec<String>> {
    let (ld_name, rest) = object_ref.split_once('/')?;
    let (ln_name, do_path) = rest.split_once('.')?;
    let node = model.device(ld_name)?.node(ln_name)?;

    let segments: Vec<&str> = do_path.split('.').collect();
    let first = *segments.first()?;

    fn attribute_children(
        attr: &super::model::DataAttribute,
        rest: &[&str],
    ) -> Option<Vec<String>> {
        let mut current = attr;
        for seg in rest {
            current = current.child(seg)?;
        }
        Some(current.children.iter().map(|c| c.name.clone()).collect())
    }

    let Some(mut object) = node.object(first) else {
        let attr = node.attribute(first)?;
        return attribute_children(attr, &segments[1..]);
    };

    let mut index = 1;
    while index < segments.len() {
        match object
            .children
            .iter()
            .find(|c| c.name() == segments[index])?
        {
            super::model::ModelChild::Object(o) => {
                object = o;
                index += 1;
            }
            // Attribute children are listed through the data directory too.
            super::model::ModelChild::Attribute(a) => {
                return attribute_children(a, &segments[index + 1..]);
            }
        }
    }
    Some(object.children.iter().map(|c| c.name().to_string()).collect())
}
