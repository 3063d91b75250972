//! Handlers for the `client.*` actions: outbound SCADA sessions browsing,
//! reading and writing remote IEDs.

use rmpv::Value;
use tracing::{debug, error, info};

use super::{map_value, require_instance_id, Outcome};
use crate::iec::{Fc, IedConnection, IedError, MmsType, MmsValue};
use crate::ipc::protocol::{as_i64, as_str, find_key};
use crate::registry::BackendContext;

/// FC probe order for reads.
const READ_FCS: [Fc; 4] = [Fc::St, Fc::Mx, Fc::Sp, Fc::Cf];
/// FC probe order for writes.
const WRITE_FCS: [Fc; 4] = [Fc::Sp, Fc::Cf, Fc::St, Fc::Mx];

/// The client handlers treat a missing payload as a missing `instance_id`.
fn client_payload<'a>(
    action: &str,
    payload: Option<&'a Value>,
) -> Result<(&'a Value, String), Outcome> {
    let Some(payload) = payload else {
        error!("{}: instance_id is required", action);
        return Err(Outcome::failure("instance_id is required"));
    };
    let instance_id = require_instance_id(action, payload)?;
    Ok((payload, instance_id))
}

pub(super) async fn connect(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let (payload, instance_id) = match client_payload(action, payload) {
        Ok(parts) => parts,
        Err(outcome) => return outcome,
    };

    let host_obj = find_key(payload, "host");
    let port_obj = find_key(payload, "port");
    let (Some(host_obj), Some(port_obj)) = (host_obj, port_obj) else {
        error!("client.connect invalid request");
        return Outcome::failure("Invalid request");
    };

    let host = as_str(host_obj, "").to_string();
    let port = as_i64(port_obj, 102) as u16;

    info!(
        "client.connect to {}:{} for instance {}",
        host, port, instance_id
    );

    let inst = ctx.get_or_create_client_instance(&instance_id);

    if let Some(mut previous) = inst.connection.take() {
        previous.close();
    }

    let mut connection = IedConnection::new();
    inst.target_host = host.clone();
    inst.target_port = port;

    if let Some(cfg) = find_key(payload, "config").filter(|c| c.is_map()) {
        if let Some(timeout_obj) = find_key(cfg, "timeout_ms") {
            let timeout_ms = as_i64(timeout_obj, 5000).max(0) as u64;
            connection.set_connect_timeout(timeout_ms);
            connection.set_request_timeout(timeout_ms);
        }
    }

    match connection.connect(&host, port).await {
        Ok(()) => {
            inst.connected = true;
            inst.connection = Some(connection);
            info!("client.connect success for instance {}", instance_id);
            Outcome::Success(map_value(vec![
                ("success", Value::from(true)),
                ("instance_id", Value::from(instance_id.as_str())),
            ]))
        }
        Err(e) => {
            inst.connected = false;
            inst.connection = Some(connection);
            error!("client.connect failed: {}", e);
            Outcome::failure(e.to_string())
        }
    }
}

pub(super) async fn disconnect(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let (_payload, instance_id) = match client_payload(action, payload) {
        Ok(parts) => parts,
        Err(outcome) => return outcome,
    };

    info!("client.disconnect requested for instance {}", instance_id);

    let mut erase = false;
    if let Some(inst) = ctx.get_client_instance(&instance_id) {
        if let Some(mut connection) = inst.connection.take() {
            connection.close();
            inst.connected = false;
            erase = true;
        }
    }
    if erase {
        ctx.remove_client_instance(&instance_id);
    }

    Outcome::Success(map_value(vec![("success", Value::from(true))]))
}

pub(super) async fn browse(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let (_payload, instance_id) = match client_payload(action, payload) {
        Ok(parts) => parts,
        Err(outcome) => return outcome,
    };

    let Some(inst) = ctx.get_client_instance(&instance_id) else {
        error!("client.browse when not connected");
        return Outcome::failure("Client not connected");
    };
    let ied_name = inst.ied_name.clone();
    let Some(connection) = inst.connection.as_mut() else {
        error!("client.browse when not connected");
        return Outcome::failure("Client not connected");
    };

    debug!("client.browse requested");
    let model = pack_remote_model(connection, &ied_name).await;
    Outcome::Success(map_value(vec![("model", model)]))
}

pub(super) async fn read(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let (payload, instance_id) = match client_payload(action, payload) {
        Ok(parts) => parts,
        Err(outcome) => return outcome,
    };

    let reference_obj = find_key(payload, "reference");
    let connection = ctx
        .get_client_instance(&instance_id)
        .and_then(|inst| inst.connection.as_mut());

    let (Some(connection), Some(reference_obj)) = (connection, reference_obj) else {
        error!("client.read invalid request");
        return Outcome::failure("Invalid request");
    };

    let reference = as_str(reference_obj, "");
    debug!("client.read {}", reference);

    let record = read_record(connection, reference).await;
    Outcome::Success(map_value(vec![("value", record)]))
}

pub(super) async fn read_batch(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let (payload, instance_id) = match client_payload(action, payload) {
        Ok(parts) => parts,
        Err(outcome) => return outcome,
    };

    let references = find_key(payload, "references").and_then(Value::as_array);
    let connection = ctx
        .get_client_instance(&instance_id)
        .and_then(|inst| inst.connection.as_mut());

    let (Some(connection), Some(references)) = (connection, references) else {
        error!("client.read_batch invalid request");
        return Outcome::failure("Invalid request");
    };

    debug!("client.read_batch requested");

    let mut values = Vec::with_capacity(references.len());
    for entry in references {
        let reference = as_str(entry, "");
        let record = read_record(connection, reference).await;
        values.push((Value::from(reference), record));
    }

    Outcome::Success(map_value(vec![("values", Value::Map(values))]))
}

pub(super) async fn write(
    action: &str,
    ctx: &mut BackendContext,
    payload: Option<&Value>,
) -> Outcome {
    let (payload, instance_id) = match client_payload(action, payload) {
        Ok(parts) => parts,
        Err(outcome) => return outcome,
    };

    let reference_obj = find_key(payload, "reference");
    let value_obj = find_key(payload, "value");
    let connection = ctx
        .get_client_instance(&instance_id)
        .and_then(|inst| inst.connection.as_mut());

    let (Some(connection), Some(reference_obj), Some(value_obj)) =
        (connection, reference_obj, value_obj)
    else {
        error!("client.write invalid request");
        return Outcome::failure("Invalid request");
    };

    let reference = as_str(reference_obj, "");
    debug!("client.write {}", reference);

    // The MessagePack type of the payload selects the write primitive.
    let result = match value_obj {
        Value::Boolean(b) => try_write(connection, reference, WriteOp::Boolean(*b)).await,
        Value::F32(_) | Value::F64(_) => {
            let v = value_obj.as_f64().unwrap_or(0.0) as f32;
            try_write(connection, reference, WriteOp::Float(v)).await
        }
        Value::String(_) => {
            try_write(connection, reference, WriteOp::Text(as_str(value_obj, ""))).await
        }
        _ => {
            let v = as_i64(value_obj, 0) as i32;
            try_write(connection, reference, WriteOp::Int32(v)).await
        }
    };

    match result {
        Ok(()) => {
            info!("client.write success");
            Outcome::Success(map_value(vec![("success", Value::from(true))]))
        }
        Err(e) => {
            error!("client.write failed: {}", e);
            Outcome::failure(e.to_string())
        }
    }
}

pub(super) async fn list_instances(
    _action: &str,
    ctx: &mut BackendContext,
    _payload: Option<&Value>,
) -> Outcome {
    debug!("client.list_instances requested");

    let instances: Vec<Value> = ctx
        .client_instances
        .iter()
        .map(|(id, inst)| {
            map_value(vec![
                ("instance_id", Value::from(id.as_str())),
                (
                    "state",
                    Value::from(if inst.connected {
                        "CONNECTED"
                    } else {
                        "DISCONNECTED"
                    }),
                ),
                ("target_host", Value::from(inst.target_host.as_str())),
                ("target_port", Value::from(inst.target_port)),
            ])
        })
        .collect();

    Outcome::Success(map_value(vec![("instances", Value::Array(instances))]))
}

enum WriteOp<'a> {
    Boolean(bool),
    Float(f32),
    Text(&'a str),
    Int32(i32),
}

/// Try the write against each functional constraint in order, returning on
/// the first success.
async fn try_write(
    connection: &mut IedConnection,
    reference: &str,
    op: WriteOp<'_>,
) -> Result<(), IedError> {
    let mut last = IedError::ObjectDoesNotExist;
    for fc in WRITE_FCS {
        let result = match &op {
            WriteOp::Boolean(v) => connection.write_boolean_value(reference, fc, *v).await,
            WriteOp::Float(v) => connection.write_float_value(reference, fc, *v).await,
            WriteOp::Text(v) => connection.write_visible_string_value(reference, fc, v).await,
            WriteOp::Int32(v) => connection.write_int32_value(reference, fc, *v).await,
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) => last = e,
        }
    }
    Err(last)
}

/// One `{value, quality, timestamp, error}` record; the per-read error stays
/// inside the record, never in the outer envelope.
async fn read_record(connection: &mut IedConnection, reference: &str) -> Value {
    let mut value = None;
    let mut last_err = None;
    for fc in READ_FCS {
        match connection.read_object(reference, fc).await {
            Ok(v) => {
                value = Some(v);
                last_err = None;
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }

    let (packed, error) = match &value {
        Some(v) => (mms_to_rpc_value(v), Value::Nil),
        None => (
            Value::Nil,
            last_err
                .map(|e| Value::from(e.to_string().as_str()))
                .unwrap_or(Value::Nil),
        ),
    };

    map_value(vec![
        ("value", packed),
        ("quality", Value::from(0)),
        ("timestamp", Value::Nil),
        ("error", error),
    ])
}

/// Coerce a stack value for the RPC reply, keyed off the MMS type tag:
/// booleans, integers, unsigned, floats and strings pass through.
fn mms_to_rpc_value(value: &MmsValue) -> Value {
    match value.mms_type() {
        MmsType::Boolean => value.as_bool().map(Value::from).unwrap_or(Value::Nil),
        MmsType::Integer => value.as_i64().map(Value::from).unwrap_or(Value::Nil),
        MmsType::Unsigned => value.as_u32().map(Value::from).unwrap_or(Value::Nil),
        MmsType::Float => value.as_f64().map(Value::F64).unwrap_or(Value::Nil),
        MmsType::VisibleString | MmsType::MmsString => {
            value.as_str().map(Value::from).unwrap_or(Value::Nil)
        }
    }
}

/// Assemble the nested browse result from the four directory levels; a
/// failed listing at any level yields an empty map at that level.
async fn pack_remote_model(connection: &mut IedConnection, ied_name: &str) -> Value {
    let mut device_entries = Vec::new();

    if let Ok(devices) = connection.get_logical_device_list().await {
        for device in devices {
            let nodes = connection
                .get_logical_device_directory(&device)
                .await
                .unwrap_or_default();

            let mut node_entries = Vec::new();
            for node in nodes {
                let node_ref = format!("{device}/{node}");
                let objects = connection
                    .get_logical_node_variables(&node_ref)
                    .await
                    .unwrap_or_default();

                let mut object_entries = Vec::new();
                for object in objects {
                    let object_ref = format!("{node_ref}.{object}");
                    let attributes = connection
                        .get_data_directory(&object_ref)
                        .await
                        .unwrap_or_default();

                    let attribute_entries: Vec<(Value, Value)> = attributes
                        .iter()
                        .map(|attr| {
                            (
                                Value::from(attr.as_str()),
                                map_value(vec![("name", Value::from(attr.as_str()))]),
                            )
                        })
                        .collect();

                    object_entries.push((
                        Value::from(object.as_str()),
                        map_value(vec![
                            ("cdc", Value::from("")),
                            ("description", Value::from("")),
                            ("attributes", Value::Map(attribute_entries)),
                        ]),
                    ));
                }

                node_entries.push((
                    Value::from(node.as_str()),
                    map_value(vec![
                        ("class", Value::from("")),
                        ("description", Value::from("")),
                        ("data_objects", Value::Map(object_entries)),
                    ]),
                ));
            }

            device_entries.push((
                Value::from(device.as_str()),
                map_value(vec![
                    ("description", Value::from("")),
                    ("logical_nodes", Value::Map(node_entries)),
                ]),
            ));
        }
    }

    map_value(vec![
        ("ied_name", Value::from(ied_name)),
        ("logical_devices", Value::Map(device_entries)),
    ])
}
