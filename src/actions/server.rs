//! Handlers for the `server.*` actions: per-instance lifecycle of simulated
//! IEDs, typed data access, and the global interface setting.

use std::sync::Arc;

use rmpv::Value;
use tracing::{debug, error, info, warn};

use super::{map_value, payload_map, require_instance_id, Outcome};
use crate::iec::model::DataAttribute;
use crate::iec::{DaType, IedServer, IedServerConfig, MmsValue};
use crate::ipc::protocol::{as_bool, as_f64, as_i64, as_str, find_key};
use crate::model::build_model;
use crate::network;
use crate::registry::{now_iso, BackendContext, ClientInfo};

pub(super) async fn load_model(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let payload = match payload_map(action, payload) {
        Ok(p) => p,
        Err(outcome) => return outcome,
    };
    let instance_id = match require_instance_id(action, payload) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };

    info!("server.load_model requested for instance {}", instance_id);

    let Some(model_obj) = find_key(payload, "model") else {
        error!(
            "server.load_model: model is required for instance {}",
            instance_id
        );
        return Outcome::failure("model payload is required");
    };
    let config_obj = find_key(payload, "config").filter(|c| c.is_map());

    let inst = ctx.get_or_create_server_instance(&instance_id);

    // Rebuilding over a live instance tears the old stack objects down in
    // order before anything new is created.
    inst.release_stack_resources();

    let built = build_model(model_obj);
    inst.ied_name = built.ied_name;
    inst.model = Some(built.model);

    let mut config = IedServerConfig::default();
    let mut port: u16 = 102;
    let mut ip_address = "0.0.0.0".to_string();

    if let Some(cfg) = config_obj {
        if let Some(v) = find_key(cfg, "max_connections") {
            config.set_max_connections(as_i64(v, 10).max(0) as usize);
            debug!("max_connections set to {}", config.max_connections);
        }
        if let Some(v) = find_key(cfg, "port") {
            port = as_i64(v, 102) as u16;
            debug!("port set to {}", port);
        }
        if let Some(v) = find_key(cfg, "ip_address") {
            ip_address = as_str(v, "0.0.0.0").to_string();
            debug!("ip_address set to {}", ip_address);
        }
    }

    inst.config = Some(config);
    inst.port = port;
    inst.ip_address = ip_address;

    info!(
        "Server instance {} loaded model ({}), ready to start on {}:{}",
        instance_id, inst.ied_name, inst.ip_address, inst.port
    );

    Outcome::Success(map_value(vec![
        ("success", Value::from(true)),
        ("instance_id", Value::from(instance_id.as_str())),
    ]))
}

pub(super) async fn start(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let payload = match payload_map(action, payload) {
        Ok(p) => p,
        Err(outcome) => return outcome,
    };
    let instance_id = match require_instance_id(action, payload) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };

    info!("server.start requested for instance {}", instance_id);

    let interface_name = ctx.global_interface_name.clone();
    let prefix_len = ctx.global_prefix_len;

    let Some(inst) = ctx.get_server_instance(&instance_id) else {
        error!(
            "server.start: server not initialized for instance {}",
            instance_id
        );
        return Outcome::failure("Server not initialized. Call server.load_model first");
    };
    let Some(model) = inst.model.clone() else {
        error!(
            "server.start: server not initialized for instance {}",
            instance_id
        );
        return Outcome::failure("Server not initialized. Call server.load_model first");
    };

    if inst.server.is_none() {
        let config = inst
            .config
            .get_or_insert_with(IedServerConfig::default)
            .clone();
        let mut server = IedServer::new(model, &config);

        let clients = inst.clients.clone();
        server.set_connection_handler(Arc::new(move |peer, connected| {
            let mut list = clients.lock().expect("clients lock poisoned");
            if connected {
                list.push(ClientInfo {
                    id: peer.to_string(),
                    connected_at: now_iso(),
                });
            } else {
                list.retain(|client| client.id != peer);
            }
        }));

        if inst.ip_address != "0.0.0.0" {
            server.set_local_ip(&inst.ip_address);
        }
        inst.server = Some(server);
    }

    if inst.running {
        if let Some(server) = inst.server.as_mut() {
            server.stop();
        }
        inst.running = false;
    }

    let mut port = inst.port;
    let mut ip_address = inst.ip_address.clone();

    if let Some(cfg) = find_key(payload, "config").filter(|c| c.is_map()) {
        if let Some(v) = find_key(cfg, "port") {
            port = as_i64(v, i64::from(inst.port)) as u16;
            inst.port = port;
        }
        if let Some(v) = find_key(cfg, "ip_address") {
            ip_address = as_str(v, &inst.ip_address).to_string();
            if ip_address != "0.0.0.0" {
                if let Some(server) = inst.server.as_mut() {
                    server.set_local_ip(&ip_address);
                }
                inst.ip_address = ip_address.clone();
            }
        }
    }

    if network::should_configure_ip(&ip_address) && !interface_name.is_empty() {
        let label = network::alias_label(&interface_name, &instance_id);
        if network::add_ip_address(&interface_name, &ip_address, prefix_len, &label).await {
            inst.ip_configured = true;
            info!("Configured IP {} on {}", ip_address, interface_name);
        } else {
            warn!("Failed to configure IP {} on {}", ip_address, interface_name);
        }
    }

    info!(
        "Starting server instance {} on {}:{}",
        instance_id, ip_address, port
    );
    if let Some(server) = inst.server.as_mut() {
        if let Err(e) = server.start(port).await {
            warn!("server.start failed for instance {}: {}", instance_id, e);
        }
        inst.running = server.is_running();
    }

    if inst.running {
        info!(
            "Server instance {} started on {}:{}",
            instance_id, ip_address, port
        );
    }

    Outcome::Success(map_value(vec![
        ("success", Value::from(inst.running)),
        ("instance_id", Value::from(instance_id.as_str())),
    ]))
}

pub(super) async fn stop(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let payload = match payload_map(action, payload) {
        Ok(p) => p,
        Err(outcome) => return outcome,
    };
    let instance_id = match require_instance_id(action, payload) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };

    info!("server.stop requested for instance {}", instance_id);

    if let Some(inst) = ctx.get_server_instance(&instance_id) {
        if inst.running {
            if let Some(server) = inst.server.as_mut() {
                server.stop();
            }
            inst.running = false;
            info!("Server instance {} stopped", instance_id);
        }
    }

    Outcome::Success(map_value(vec![("success", Value::from(true))]))
}

pub(super) async fn remove(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let payload = match payload_map(action, payload) {
        Ok(p) => p,
        Err(outcome) => return outcome,
    };
    let instance_id = match require_instance_id(action, payload) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };

    info!("server.remove requested for instance {}", instance_id);

    let interface_name = ctx.global_interface_name.clone();
    let prefix_len = ctx.global_prefix_len;

    let mut found = false;
    if let Some(inst) = ctx.get_server_instance(&instance_id) {
        found = true;

        if inst.ip_configured && !interface_name.is_empty() {
            network::remove_ip_address(&interface_name, &inst.ip_address, prefix_len).await;
            inst.ip_configured = false;
            info!("Cleaned up IP {} from {}", inst.ip_address, interface_name);
        } else if !interface_name.is_empty() {
            // A previous daemon run may have left an alias behind for this
            // instance id; the label is the ownership marker.
            let label = network::alias_label(&interface_name, &instance_id);
            network::remove_by_label(&interface_name, &label).await;
        }

        inst.release_stack_resources();
        inst.clients.lock().expect("clients lock poisoned").clear();
    }

    if found {
        ctx.remove_server_instance(&instance_id);
        info!("Server instance {} removed", instance_id);
    }

    Outcome::Success(map_value(vec![("success", Value::from(true))]))
}

pub(super) async fn set_data_value(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let payload = match payload_map(action, payload) {
        Ok(p) => p,
        Err(outcome) => return outcome,
    };
    let instance_id = match require_instance_id(action, payload) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };

    let reference_obj = find_key(payload, "reference");
    let value_obj = find_key(payload, "value");

    let inst = ctx.get_server_instance(&instance_id);
    let model = inst.as_ref().and_then(|i| i.model.clone());
    let has_server = inst.map(|i| i.server.is_some()).unwrap_or(false);

    let (Some(model), true, Some(reference_obj), Some(value_obj)) =
        (model, has_server, reference_obj, value_obj)
    else {
        error!(
            "server.set_data_value invalid request for instance {}",
            instance_id
        );
        return Outcome::failure("Invalid request: missing server, model, reference, or value");
    };

    let reference = as_str(reference_obj, "");
    debug!("Update value: {}", reference);

    // The write lock on the model is the stack's data-model lock.
    let mut guard = model.write().expect("model lock poisoned");
    if let Some(attr) = guard.resolve_attribute_mut(reference) {
        update_attribute_from_payload(attr, value_obj);
    }

    Outcome::Success(map_value(vec![("success", Value::from(true))]))
}

pub(super) async fn get_values(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let payload = match payload_map(action, payload) {
        Ok(p) => p,
        Err(outcome) => return outcome,
    };
    let instance_id = match require_instance_id(action, payload) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };

    let references = find_key(payload, "references").and_then(Value::as_array);

    let inst = ctx.get_server_instance(&instance_id);
    let model = inst.as_ref().and_then(|i| i.model.clone());
    let has_server = inst.map(|i| i.server.is_some()).unwrap_or(false);

    let (Some(model), true, Some(references)) = (model, has_server, references) else {
        error!(
            "server.get_values invalid request for instance {}",
            instance_id
        );
        return Outcome::failure("Invalid request: missing server, model, or references array");
    };

    let guard = model.read().expect("model lock poisoned");
    let mut values = Vec::with_capacity(references.len());
    for entry in references {
        let reference = as_str(entry, "");
        let record = attribute_value_record(guard.resolve_attribute(reference));
        values.push((Value::from(reference), record));
    }

    Outcome::Success(map_value(vec![("values", Value::Map(values))]))
}

pub(super) async fn get_clients(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let payload = match payload_map(action, payload) {
        Ok(p) => p,
        Err(outcome) => return outcome,
    };
    let instance_id = match require_instance_id(action, payload) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };

    debug!("server.get_clients requested for instance {}", instance_id);

    let clients = match ctx.get_server_instance(&instance_id) {
        Some(inst) => {
            let list = inst.clients.lock().expect("clients lock poisoned");
            Value::Array(
                list.iter()
                    .map(|client| {
                        map_value(vec![
                            ("id", Value::from(client.id.as_str())),
                            ("connected_at", Value::from(client.connected_at.as_str())),
                        ])
                    })
                    .collect(),
            )
        }
        None => Value::Array(Vec::new()),
    };

    Outcome::Success(map_value(vec![("clients", clients)]))
}

pub(super) async fn list_instances(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    if let Err(outcome) = payload_map(action, payload) {
        return outcome;
    }

    debug!("server.list_instances requested");

    let instances: Vec<Value> = ctx
        .server_instances
        .iter()
        .map(|(id, inst)| {
            map_value(vec![
                ("instance_id", Value::from(id.as_str())),
                (
                    "state",
                    Value::from(if inst.running { "RUNNING" } else { "STOPPED" }),
                ),
                ("port", Value::from(inst.port)),
                ("ied_name", Value::from(inst.ied_name.as_str())),
            ])
        })
        .collect();

    Outcome::Success(map_value(vec![("instances", Value::Array(instances))]))
}

pub(super) async fn get_interfaces(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    if let Err(outcome) = payload_map(action, payload) {
        return outcome;
    }

    info!("server.get_interfaces requested");

    let interfaces: Vec<Value> = network::get_network_interfaces()
        .into_iter()
        .map(|iface| {
            map_value(vec![
                ("name", Value::from(iface.name.as_str())),
                ("description", Value::from(iface.description.as_str())),
                ("is_up", Value::from(iface.is_up)),
                (
                    "addresses",
                    Value::Array(
                        iface
                            .addresses
                            .iter()
                            .map(|a| Value::from(a.as_str()))
                            .collect(),
                    ),
                ),
            ])
        })
        .collect();

    let current = if ctx.global_interface_name.is_empty() {
        Value::Nil
    } else {
        map_value(vec![
            ("name", Value::from(ctx.global_interface_name.as_str())),
            ("prefix_len", Value::from(ctx.global_prefix_len)),
        ])
    };

    Outcome::Success(map_value(vec![
        ("interfaces", Value::Array(interfaces)),
        ("current_interface", current),
    ]))
}

pub(super) async fn set_interface(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let payload = match payload_map(action, payload) {
        Ok(p) => p,
        Err(outcome) => return outcome,
    };

    info!("server.set_interface requested");

    let Some(iface_obj) = find_key(payload, "interface_name") else {
        error!("server.set_interface: interface_name is required");
        return Outcome::failure("interface_name is required");
    };

    let interface_name = as_str(iface_obj, "").to_string();
    let prefix_len = find_key(payload, "prefix_len")
        .map(|v| as_i64(v, 24))
        .unwrap_or(24) as u8;

    ctx.global_interface_name = interface_name.clone();
    ctx.global_prefix_len = prefix_len;

    info!(
        "Global interface set to: {} (prefix_len: {})",
        interface_name, prefix_len
    );

    Outcome::Success(map_value(vec![
        ("interface_name", Value::from(interface_name.as_str())),
        ("prefix_len", Value::from(prefix_len)),
    ]))
}

/// Store an RPC value into a data attribute according to its declared type,
/// with the permissive coercions of the wire contract.
fn update_attribute_from_payload(attr: &mut DataAttribute, value: &Value) {
    match attr.da_type {
        DaType::Boolean => {
            attr.value = Some(MmsValue::Boolean(as_bool(value, false)));
        }
        DaType::Int8 | DaType::Int16 | DaType::Int32 | DaType::Enumerated => {
            attr.value = Some(MmsValue::Integer(i64::from(as_i64(value, 0) as i32)));
        }
        DaType::Int64 => {
            attr.value = Some(MmsValue::Integer(as_i64(value, 0)));
        }
        DaType::Int8u | DaType::Int16u | DaType::Int24u | DaType::Int32u => {
            attr.value = Some(MmsValue::Unsigned(as_i64(value, 0) as u32));
        }
        DaType::Float32 => {
            attr.value = Some(MmsValue::Float(f64::from(as_f64(value, 0.0) as f32)));
        }
        DaType::Float64 => {
            attr.value = Some(MmsValue::Float(as_f64(value, 0.0)));
        }
        DaType::VisString32
        | DaType::VisString64
        | DaType::VisString129
        | DaType::VisString255 => {
            attr.value = Some(MmsValue::VisibleString(as_str(value, "").to_string()));
        }
        DaType::UnicodeString255 => {
            attr.value = Some(MmsValue::MmsString(as_str(value, "").to_string()));
        }
        _ => {}
    }
}

/// Pack one `{value, quality, timestamp}` record for `server.get_values`.
fn attribute_value_record(attr: Option<&DataAttribute>) -> Value {
    // TODO: surface real quality and timestamps once the stack tracks them
    // per attribute; both are placeholders today.
    let value = match attr {
        Some(attr) => packed_attribute_value(attr),
        None => Value::Nil,
    };
    map_value(vec![
        ("value", value),
        ("quality", Value::from(0)),
        ("timestamp", Value::Nil),
    ])
}

fn packed_attribute_value(attr: &DataAttribute) -> Value {
    let current = attr.current_value();
    match attr.da_type {
        DaType::Boolean => Value::from(
            current
                .as_ref()
                .and_then(MmsValue::as_bool)
                .unwrap_or(false),
        ),
        DaType::Int8 | DaType::Int16 | DaType::Int32 | DaType::Enumerated => Value::from(
            current.as_ref().and_then(MmsValue::as_i64).unwrap_or(0) as i32,
        ),
        DaType::Int64 => Value::from(current.as_ref().and_then(MmsValue::as_i64).unwrap_or(0)),
        DaType::Int8u | DaType::Int16u | DaType::Int24u | DaType::Int32u => {
            Value::from(current.as_ref().and_then(MmsValue::as_u32).unwrap_or(0))
        }
        DaType::Float32 => Value::F32(
            current.as_ref().and_then(MmsValue::as_f64).unwrap_or(0.0) as f32,
        ),
        DaType::Float64 => {
            Value::F64(current.as_ref().and_then(MmsValue::as_f64).unwrap_or(0.0))
        }
        DaType::VisString32
        | DaType::VisString64
        | DaType::VisString129
        | DaType::VisString255
        | DaType::UnicodeString255 => {
            Value::from(current.as_ref().and_then(MmsValue::as_str).unwrap_or(""))
        }
        _ => Value::Nil,
    }
}
