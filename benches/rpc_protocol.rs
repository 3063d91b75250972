use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, Criterion};
use rmpv::Value;

use iecsim::ipc::protocol::{decode_request, encode_frame, encode_response, extract_frame};

fn request_bytes() -> Vec<u8> {
    let envelope = Value::Map(vec![
        (Value::from("id"), Value::from("bench-1")),
        (Value::from("type"), Value::from("request")),
        (Value::from("action"), Value::from("server.set_data_value")),
        (
            Value::from("payload"),
            Value::Map(vec![
                (Value::from("instance_id"), Value::from("a")),
                (
                    Value::from("reference"),
                    Value::from("PROT/XCBR1.Pos.stVal"),
                ),
                (Value::from("value"), Value::from(true)),
            ]),
        ),
    ]);
    let mut bytes = Vec::new();
    rmpv::encode::write_value(&mut bytes, &envelope).unwrap();
    bytes
}

fn bench_decode_request(c: &mut Criterion) {
    let bytes = request_bytes();
    c.bench_function("decode_request", |b| {
        b.iter(|| decode_request(&bytes).unwrap())
    });
}

fn bench_encode_response(c: &mut Criterion) {
    c.bench_function("encode_response", |b| {
        b.iter(|| {
            encode_response(
                "bench-1",
                Value::Map(vec![(Value::from("success"), Value::from(true))]),
                None,
            )
        })
    });
}

fn bench_frame_extraction(c: &mut Criterion) {
    let framed = encode_frame(&request_bytes());
    c.bench_function("extract_frame", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&framed[..]);
            extract_frame(&mut buf).unwrap().unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_decode_request,
    bench_encode_response,
    bench_frame_extraction
);
criterion_main!(benches);
