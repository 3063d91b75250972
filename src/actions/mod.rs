//! Action dispatch: routes decoded RPC requests to the named handler and
//! packs the uniform response envelope.
//!
//! The dispatcher owns the outer `id`/`type` keys; handlers produce the
//! `payload`/`error` halves as an [`Outcome`]. Routing is a static table:
//! one `match` over the literal action names.

mod client;
mod server;

use rmpv::Value;
use tracing::{debug, error, warn};

use crate::ipc::protocol::{self, as_str, find_key};
use crate::registry::{BackendContext, SharedContext};

/// What a handler produced: a success payload map, or an error message that
/// becomes `{"message": …}` with an empty payload.
pub(crate) enum Outcome {
    Success(Value),
    Failure(String),
}

impl Outcome {
    pub(crate) fn failure(message: impl Into<String>) -> Self {
        Outcome::Failure(message.into())
    }
}

/// Build a MessagePack map from string keys.
pub(crate) fn map_value(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

/// Handle one raw request frame and return the complete response bytes.
pub async fn dispatch(request_bytes: &[u8], context: &SharedContext) -> Vec<u8> {
    let request = match protocol::decode_request(request_bytes) {
        Ok(request) => request,
        Err(e) => {
            error!("Decode error: {}", e);
            return protocol::encode_response(
                "",
                Value::Map(Vec::new()),
                Some(&format!("Decode error: {e}")),
            );
        }
    };

    debug!("IPC action: {} id={}", request.action, request.id);

    let outcome = {
        let mut ctx = context.lock().await;
        route(&request.action, &mut ctx, request.payload.as_ref()).await
    };

    match outcome {
        Outcome::Success(payload) => protocol::encode_response(&request.id, payload, None),
        Outcome::Failure(message) => {
            protocol::encode_response(&request.id, Value::Map(Vec::new()), Some(&message))
        }
    }
}

async fn route(action: &str, ctx: &mut BackendContext, payload: Option<&Value>) -> Outcome {
    match action {
        "server.load_model" => server::load_model(action, ctx, payload).await,
        "server.start" => server::start(action, ctx, payload).await,
        "server.stop" => server::stop(action, ctx, payload).await,
        "server.remove" => server::remove(action, ctx, payload).await,
        "server.set_data_value" => server::set_data_value(action, ctx, payload).await,
        "server.get_values" => server::get_values(action, ctx, payload).await,
        "server.get_clients" => server::get_clients(action, ctx, payload).await,
        "server.list_instances" => server::list_instances(action, ctx, payload).await,
        "server.get_interfaces" => server::get_interfaces(action, ctx, payload).await,
        "server.set_interface" => server::set_interface(action, ctx, payload).await,
        "client.connect" => client::connect(action, ctx, payload).await,
        "client.disconnect" => client::disconnect(action, ctx, payload).await,
        "client.browse" => client::browse(action, ctx, payload).await,
        "client.read" => client::read(action, ctx, payload).await,
        "client.read_batch" => client::read_batch(action, ctx, payload).await,
        "client.write" => client::write(action, ctx, payload).await,
        "client.list_instances" => client::list_instances(action, ctx, payload).await,
        _ => {
            warn!("Unknown action: {}", action);
            Outcome::failure("Unknown action")
        }
    }
}

/// Reject requests without a map payload.
pub(crate) fn payload_map<'a>(
    action: &str,
    payload: Option<&'a Value>,
) -> Result<&'a Value, Outcome> {
    match payload {
        Some(payload) if payload.is_map() => Ok(payload),
        _ => {
            error!("{} missing payload", action);
            Err(Outcome::failure("Missing payload"))
        }
    }
}

/// Fetch a non-empty `instance_id` from the payload.
pub(crate) fn require_instance_id(action: &str, payload: &Value) -> Result<String, Outcome> {
    let id = find_key(payload, "instance_id")
        .map(|v| as_str(v, ""))
        .unwrap_or("");
    if id.is_empty() {
        error!("{}: instance_id is required", action);
        return Err(Outcome::failure("instance_id is required"));
    }
    Ok(id.to_string())
}
