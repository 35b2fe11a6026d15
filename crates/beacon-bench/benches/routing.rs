//! Routing benchmarks for Beacon.
//!
//! Covers the per-frame path: parsing, classification, channel signatures
//! and payload formatting.

use beacon_core::{auth, classify, Application, ChannelManager, Connection};
use beacon_protocol::codec;
use beacon_transport::{QueuedSocket, SocketId};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;

/// Benchmark inbound frame parsing.
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    let subscribe = r#"{"event":"channel:subscribe","data":{"channel":"private-orders","auth":"key:00ff"}}"#;
    group.bench_function("subscribe", |b| b.iter(|| codec::parse(black_box(subscribe))));

    let client = json!({
        "event": "client-update",
        "channel": "private-doc",
        "data": {"ops": (0..64).collect::<Vec<_>>()}
    })
    .to_string();
    group.bench_function("client_event", |b| b.iter(|| codec::parse(black_box(&client))));

    group.bench_function("malformed", |b| b.iter(|| codec::parse(black_box("{nope"))));

    group.finish();
}

/// Benchmark outbound payload formatting.
fn bench_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("format");

    let data = json!({"user_id": "42", "user_info": {"name": "Ada"}});
    group.bench_function("channel_event", |b| {
        b.iter(|| codec::channel_event("member_added", "user-aware-room", black_box(data.clone())))
    });

    group.finish();
}

/// Benchmark channel signatures.
fn bench_auth(c: &mut Criterion) {
    let mut group = c.benchmark_group("auth");
    let app = Application::new(1, "bench", "a-reasonably-long-application-secret");
    let token = auth::sign(&app, "1234.5678", "private-orders", None);

    group.bench_function("sign", |b| {
        b.iter(|| auth::sign(&app, black_box("1234.5678"), "private-orders", None))
    });
    group.bench_function("verify", |b| {
        b.iter(|| auth::verify(&app, "1234.5678", "private-orders", None, black_box(&token)))
    });

    group.finish();
}

/// Benchmark classify and respond for a ping.
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let manager = ChannelManager::new();
    let (socket, mut rx) = QueuedSocket::channel();
    let conn = Connection::new(socket);
    conn.assign_socket_id(SocketId::new("1.1"));
    conn.bind_application(Arc::new(Application::new(1, "bench", "secret")));
    let conn = Arc::new(conn);

    group.bench_function("ping", |b| {
        b.iter(|| {
            if let Ok(message) = classify(black_box(r#"{"event":"channel:ping"}"#), &conn, &manager) {
                let _ = message.respond();
            }
            while rx.try_recv().is_ok() {}
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_format, bench_auth, bench_dispatch);
criterion_main!(benches);
