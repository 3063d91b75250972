//! End-to-end client sessions: a simulated server instance and an outbound
//! client driven through the dispatcher, talking over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use rmpv::Value;
use tokio::sync::Mutex;

use iecsim::actions::dispatch;
use iecsim::ipc::protocol::find_key;
use iecsim::registry::{BackendContext, SharedContext};

fn context() -> SharedContext {
    Arc::new(Mutex::new(BackendContext::new()))
}

fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

fn encode_request(id: &str, action: &str, payload: Value) -> Vec<u8> {
    let envelope = Value::Map(vec![
        (Value::from("id"), Value::from(id)),
        (Value::from("type"), Value::from("request")),
        (Value::from("action"), Value::from(action)),
        (Value::from("payload"), payload),
    ]);
    let mut bytes = Vec::new();
    rmpv::encode::write_value(&mut bytes, &envelope).unwrap();
    bytes
}

async fn call(ctx: &SharedContext, id: &str, action: &str, payload: Value) -> Value {
    let response = dispatch(&encode_request(id, action, payload), ctx).await;
    rmpv::decode::read_value(&mut &response[..]).unwrap()
}

fn error_message(response: &Value) -> Option<String> {
    let error = find_key(response, "error")?;
    find_key(error, "message")?.as_str().map(String::from)
}

fn payload_of(response: &Value) -> Value {
    find_key(response, "payload").cloned().unwrap()
}

/// Breaker position (ST), a measurement (MX) and a setpoint (SP).
fn simulator_model() -> Value {
    let pos = map(vec![
        ("cdc", Value::from("DPC")),
        (
            "attributes",
            map(vec![(
                "stVal",
                map(vec![
                    ("type", Value::from("BOOLEAN")),
                    ("fc", Value::from("ST")),
                    ("value", Value::from(false)),
                ]),
            )]),
        ),
    ]);
    let amps = map(vec![
        ("cdc", Value::from("MV")),
        (
            "attributes",
            map(vec![(
                "mag",
                map(vec![
                    ("type", Value::from("FLOAT32")),
                    ("fc", Value::from("MX")),
                    ("value", Value::from(12.5)),
                ]),
            )]),
        ),
    ]);
    let set_mag = map(vec![
        ("cdc", Value::from("ASG")),
        (
            "attributes",
            map(vec![(
                "setMag",
                map(vec![
                    ("type", Value::from("FLOAT32")),
                    ("fc", Value::from("SP")),
                ]),
            )]),
        ),
    ]);

    map(vec![
        ("name", Value::from("IED_E2E")),
        (
            "logical_devices",
            map(vec![(
                "PROT",
                map(vec![(
                    "logical_nodes",
                    map(vec![
                        (
                            "XCBR1",
                            map(vec![("data_objects", map(vec![("Pos", pos)]))]),
                        ),
                        (
                            "MMXU1",
                            map(vec![("data_objects", map(vec![("A", amps)]))]),
                        ),
                        (
                            "ATCC1",
                            map(vec![("data_objects", map(vec![("SetPt", set_mag)]))]),
                        ),
                    ]),
                )]),
            )]),
        ),
    ])
}

async fn start_simulator(ctx: &SharedContext, instance_id: &str, port: u16) {
    let response = call(
        ctx,
        "setup-load",
        "server.load_model",
        map(vec![
            ("instance_id", Value::from(instance_id)),
            ("model", simulator_model()),
        ]),
    )
    .await;
    assert!(error_message(&response).is_none());

    let response = call(
        ctx,
        "setup-start",
        "server.start",
        map(vec![
            ("instance_id", Value::from(instance_id)),
            (
                "config",
                map(vec![
                    ("port", Value::from(port)),
                    ("ip_address", Value::from("127.0.0.1")),
                ]),
            ),
        ]),
    )
    .await;
    assert!(error_message(&response).is_none());
    let payload = payload_of(&response);
    assert_eq!(find_key(&payload, "success").unwrap().as_bool(), Some(true));
}

async fn connect_client(ctx: &SharedContext, instance_id: &str, port: u16) {
    let response = call(
        ctx,
        "setup-connect",
        "client.connect",
        map(vec![
            ("instance_id", Value::from(instance_id)),
            ("host", Value::from("127.0.0.1")),
            ("port", Value::from(port)),
            ("config", map(vec![("timeout_ms", Value::from(2000))])),
        ]),
    )
    .await;
    assert!(error_message(&response).is_none());
}

#[tokio::test]
async fn write_then_read_round_trip() {
    let ctx = context();
    start_simulator(&ctx, "srv", 18202).await;
    connect_client(&ctx, "cli", 18202).await;

    // Boolean write falls through SP/CF and lands on the ST attribute.
    let response = call(
        &ctx,
        "w1",
        "client.write",
        map(vec![
            ("instance_id", Value::from("cli")),
            ("reference", Value::from("PROT/XCBR1.Pos.stVal")),
            ("value", Value::from(true)),
        ]),
    )
    .await;
    assert!(error_message(&response).is_none());
    let payload = payload_of(&response);
    assert_eq!(find_key(&payload, "success").unwrap().as_bool(), Some(true));

    let response = call(
        &ctx,
        "r1",
        "client.read",
        map(vec![
            ("instance_id", Value::from("cli")),
            ("reference", Value::from("PROT/XCBR1.Pos.stVal")),
        ]),
    )
    .await;
    assert!(error_message(&response).is_none());
    let record = find_key(&payload_of(&response), "value").cloned().unwrap();
    assert_eq!(find_key(&record, "value").unwrap().as_bool(), Some(true));
    assert!(find_key(&record, "error").unwrap().is_nil());

    // The write is visible through the control plane as well.
    let response = call(
        &ctx,
        "g1",
        "server.get_values",
        map(vec![
            ("instance_id", Value::from("srv")),
            (
                "references",
                Value::Array(vec![Value::from("PROT/XCBR1.Pos.stVal")]),
            ),
        ]),
    )
    .await;
    let payload = payload_of(&response);
    let values = find_key(&payload, "values").unwrap();
    let record = find_key(values, "PROT/XCBR1.Pos.stVal").unwrap();
    assert_eq!(find_key(record, "value").unwrap().as_bool(), Some(true));
}

#[tokio::test]
async fn float_setpoint_write_and_batch_read() {
    let ctx = context();
    start_simulator(&ctx, "srv", 18203).await;
    connect_client(&ctx, "cli", 18203).await;

    let response = call(
        &ctx,
        "w1",
        "client.write",
        map(vec![
            ("instance_id", Value::from("cli")),
            ("reference", Value::from("PROT/ATCC1.SetPt.setMag")),
            ("value", Value::F64(3.25)),
        ]),
    )
    .await;
    assert!(error_message(&response).is_none());

    let response = call(
        &ctx,
        "rb1",
        "client.read_batch",
        map(vec![
            ("instance_id", Value::from("cli")),
            (
                "references",
                Value::Array(vec![
                    Value::from("PROT/MMXU1.A.mag"),
                    Value::from("PROT/ATCC1.SetPt.setMag"),
                    Value::from("PROT/XCBR1.Bogus.stVal"),
                ]),
            ),
        ]),
    )
    .await;
    assert!(error_message(&response).is_none());

    let payload = payload_of(&response);
    let values = find_key(&payload, "values").unwrap();

    let mag = find_key(values, "PROT/MMXU1.A.mag").unwrap();
    assert_eq!(find_key(mag, "value").unwrap().as_f64(), Some(12.5));
    assert!(find_key(mag, "error").unwrap().is_nil());

    let set_mag = find_key(values, "PROT/ATCC1.SetPt.setMag").unwrap();
    assert_eq!(find_key(set_mag, "value").unwrap().as_f64(), Some(3.25));

    // Unknown references carry the stack error inside the record.
    let bogus = find_key(values, "PROT/XCBR1.Bogus.stVal").unwrap();
    assert!(find_key(bogus, "value").unwrap().is_nil());
    assert!(find_key(bogus, "error").unwrap().as_str().is_some());
}

#[tokio::test]
async fn browse_returns_the_nested_model() {
    let ctx = context();
    start_simulator(&ctx, "srv", 18204).await;
    connect_client(&ctx, "cli", 18204).await;

    let response = call(
        &ctx,
        "b1",
        "client.browse",
        map(vec![("instance_id", Value::from("cli"))]),
    )
    .await;
    assert!(error_message(&response).is_none());

    let payload = payload_of(&response);
    let model = find_key(&payload, "model").unwrap();
    let devices = find_key(model, "logical_devices").unwrap();
    let prot = find_key(devices, "PROT").unwrap();
    let nodes = find_key(prot, "logical_nodes").unwrap();
    let xcbr = find_key(nodes, "XCBR1").unwrap();
    assert_eq!(find_key(xcbr, "class").unwrap().as_str(), Some(""));

    let objects = find_key(xcbr, "data_objects").unwrap();
    let pos = find_key(objects, "Pos").unwrap();
    assert_eq!(find_key(pos, "cdc").unwrap().as_str(), Some(""));

    let attributes = find_key(pos, "attributes").unwrap();
    let stval = find_key(attributes, "stVal").unwrap();
    assert_eq!(find_key(stval, "name").unwrap().as_str(), Some("stVal"));
}

#[tokio::test]
async fn connected_peers_show_up_in_get_clients() {
    let ctx = context();
    start_simulator(&ctx, "srv", 18205).await;
    connect_client(&ctx, "cli", 18205).await;

    // The accept loop registers the peer outside the request path.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = call(
        &ctx,
        "c1",
        "server.get_clients",
        map(vec![("instance_id", Value::from("srv"))]),
    )
    .await;
    let payload = payload_of(&response);
    let clients = find_key(&payload, "clients").unwrap().as_array().unwrap();
    assert_eq!(clients.len(), 1);
    let entry = &clients[0];
    assert!(find_key(entry, "id")
        .unwrap()
        .as_str()
        .unwrap()
        .contains("127.0.0.1"));
    assert!(find_key(entry, "connected_at")
        .unwrap()
        .as_str()
        .unwrap()
        .ends_with('Z'));
}

#[tokio::test]
async fn list_and_disconnect_client_instances() {
    let ctx = context();
    start_simulator(&ctx, "srv", 18206).await;
    connect_client(&ctx, "cli", 18206).await;

    let response = call(&ctx, "l1", "client.list_instances", map(vec![])).await;
    let payload = payload_of(&response);
    let instances = find_key(&payload, "instances").unwrap().as_array().unwrap();
    assert_eq!(instances.len(), 1);
    let entry = &instances[0];
    assert_eq!(find_key(entry, "instance_id").unwrap().as_str(), Some("cli"));
    assert_eq!(find_key(entry, "state").unwrap().as_str(), Some("CONNECTED"));
    assert_eq!(
        find_key(entry, "target_host").unwrap().as_str(),
        Some("127.0.0.1")
    );
    assert_eq!(
        find_key(entry, "target_port").unwrap().as_i64(),
        Some(18206)
    );

    let response = call(
        &ctx,
        "d1",
        "client.disconnect",
        map(vec![("instance_id", Value::from("cli"))]),
    )
    .await;
    assert!(error_message(&response).is_none());

    let response = call(&ctx, "l2", "client.list_instances", map(vec![])).await;
    let payload = payload_of(&response);
    assert!(find_key(&payload, "instances")
        .unwrap()
        .as_array()
        .unwrap()
        .is_empty());

    // Disconnecting again stays a success.
    let response = call(
        &ctx,
        "d2",
        "client.disconnect",
        map(vec![("instance_id", Value::from("cli"))]),
    )
    .await;
    assert!(error_message(&response).is_none());
}

#[tokio::test]
async fn connect_failure_reports_the_stack_error() {
    let ctx = context();

    // Grab a port that nothing is listening on.
    let closed_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let response = call(
        &ctx,
        "c1",
        "client.connect",
        map(vec![
            ("instance_id", Value::from("cli")),
            ("host", Value::from("127.0.0.1")),
            ("port", Value::from(closed_port)),
            ("config", map(vec![("timeout_ms", Value::from(500))])),
        ]),
    )
    .await;
    assert!(error_message(&response).is_some());

    // The instance stays in the registry for a later disconnect.
    let response = call(&ctx, "l1", "client.list_instances", map(vec![])).await;
    let payload = payload_of(&response);
    let instances = find_key(&payload, "instances").unwrap().as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(
        find_key(&instances[0], "state").unwrap().as_str(),
        Some("DISCONNECTED")
    );

    let response = call(
        &ctx,
        "d1",
        "client.disconnect",
        map(vec![("instance_id", Value::from("cli"))]),
    )
    .await;
    assert!(error_message(&response).is_none());
}

#[tokio::test]
async fn connection_limit_rejects_extra_sessions() {
    let ctx = context();

    let response = call(
        &ctx,
        "setup-load",
        "server.load_model",
        map(vec![
            ("instance_id", Value::from("srv")),
            ("model", simulator_model()),
            ("config", map(vec![("max_connections", Value::from(1))])),
        ]),
    )
    .await;
    assert!(error_message(&response).is_none());

    let response = call(
        &ctx,
        "setup-start",
        "server.start",
        map(vec![
            ("instance_id", Value::from("srv")),
            (
                "config",
                map(vec![
                    ("port", Value::from(18207)),
                    ("ip_address", Value::from("127.0.0.1")),
                ]),
            ),
        ]),
    )
    .await;
    assert!(error_message(&response).is_none());

    let mut first = iecsim::iec::IedConnection::new();
    first.connect("127.0.0.1", 18207).await.unwrap();
    // A round trip guarantees the session slot is taken before the second
    // connection arrives.
    first.get_logical_device_list().await.unwrap();

    let mut second = iecsim::iec::IedConnection::new();
    second.connect("127.0.0.1", 18207).await.unwrap();
    let err = second.get_logical_device_list().await.unwrap_err();
    assert_eq!(err, iecsim::iec::IedError::ConnectionRejected);

    // The admitted session keeps working.
    assert_eq!(
        first.get_logical_device_list().await.unwrap(),
        vec!["PROT".to_string()]
    );
}

#[tokio::test]
async fn missing_host_or_port_is_an_invalid_request() {
    let ctx = context();
    let response = call(
        &ctx,
        "c1",
        "client.connect",
        map(vec![
            ("instance_id", Value::from("cli")),
            ("host", Value::from("127.0.0.1")),
        ]),
    )
    .await;
    assert_eq!(error_message(&response).as_deref(), Some("Invalid request"));
}
