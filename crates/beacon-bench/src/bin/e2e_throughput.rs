//! End-to-end throughput benchmark for Beacon.
//!
//! Every client joins one private channel and relays client events through a
//! running server, which fans each event out to all other members.
//!
//! ```bash
//! e2e_throughput [clients] [app_key] [app_secret] [base_url]
//! ```

use beacon_core::{auth, Application};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:6001/app";
const CHANNEL: &str = "private-benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone)]
struct Target {
    url: String,
    app: Arc<Application>,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let key = args.get(2).map_or("bench", String::as_str);
    let secret = args.get(3).map_or("secret", String::as_str);
    let base = args.get(4).map_or(DEFAULT_URL, String::as_str);

    let target = Target {
        url: format!("{}/{}", base.trim_end_matches('/'), key),
        app: Arc::new(Application::new(0, key, secret)),
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Beacon End-to-End Throughput Benchmark               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_relay_benchmark(num_clients, target).await;
}

async fn run_relay_benchmark(num_clients: usize, target: Target) {
    println!("📊 Relay Benchmark: {} clients on {}", num_clients, target.url);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);
        let target = target.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, target, msg_count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    barrier.wait().await;
    println!("✓ All {} clients subscribed", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);

    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Delivered:            {:>10}                           ║",
        total_messages
    );
    println!(
        "║  Throughput:           {:>10.0} msg/s                    ║",
        msgs_per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} msg/s                    ║",
        msgs_per_sec_per_client
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

/// Read text frames until one with `event` arrives.
async fn expect_event<S>(receiver: &mut S, event: &str) -> Result<Value, BoxError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(result) = receiver.next().await {
        if let Message::Text(text) = result? {
            let value: Value = serde_json::from_str(&text)?;
            if value["event"] == event {
                return Ok(value);
            }
            if value["event"] == "system:error" {
                return Err(format!("server error: {value}").into());
            }
        }
    }
    Err(format!("connection closed before {event}").into())
}

async fn run_client(
    client_id: usize,
    target: Target,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(target.url.as_str()).await?;
    let (mut sender, mut receiver) = ws.split();

    let established = expect_event(&mut receiver, "system:connection_established").await?;
    let socket_id = established["socket_id"]
        .as_str()
        .ok_or("connection_established without socket_id")?
        .to_string();

    let subscribe = json!({
        "event": "channel:subscribe",
        "data": {
            "channel": CHANNEL,
            "auth": auth::sign(&target.app, &socket_id, CHANNEL, None),
        }
    });
    sender.send(Message::Text(subscribe.to_string())).await?;
    expect_event(&mut receiver, "system:subscription_succeeded").await?;

    barrier.wait().await;

    let publish = json!({
        "event": "client-bench",
        "channel": CHANNEL,
        "data": {"from": client_id, "payload": "x".repeat(64)}
    });
    let publish_msg = Message::Text(publish.to_string());

    let recv_count = Arc::clone(&message_count);
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(text)) = result {
                if text.contains("\"client-bench\"") {
                    recv_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    loop {
        if sender.send(publish_msg.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
