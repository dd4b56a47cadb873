//! `stresszoom` — load generator for the ingestion daemon's webhook
//! endpoint. Ticks once per millisecond and, each tick, enqueues
//! `rate / 1000` requests for a fixed worker pool to drain, so sustained
//! throughput tracks `--rate` requests/sec regardless of `--workers`.
//!
//! Corrected per the documented redesign: the source this was ported from
//! computed the per-tick burst as `rate/1000` but a stray comment made the
//! surrounding logic a no-op, so every tick actually enqueued `rate` requests
//! — about a thousand-fold overshoot above a few requests/sec. This binary
//! implements the intended `rate / 1000` sizing.

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use zoom_ingest_core::signature;

#[derive(Parser, Debug)]
#[command(name = "stresszoom", about = "Load generator for the signed webhook ingestion daemon")]
struct Cli {
    /// Target URL.
    #[arg(long, default_value = "http://127.0.0.1:8080/webhook/zoom")]
    url: String,

    /// Requests per second.
    #[arg(long, default_value_t = 3000)]
    rate: u64,

    /// Max parallel connections held open to the target.
    #[arg(long, default_value_t = 800)]
    conns: usize,

    /// Payload size in bytes.
    #[arg(long, default_value_t = 512)]
    body: usize,

    /// Duration of the run, in seconds.
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Number of concurrent worker tasks draining the request queue.
    #[arg(long, default_value_t = default_workers())]
    workers: usize,

    /// Zoom secret token. Defaults to $ZOOM_WEBHOOK_SECRET_TOKEN.
    #[arg(long)]
    token: Option<String>,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4) * 2
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    ok: AtomicU64,
    bad: AtomicU64,
    transport_err: AtomicU64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("ZOOM_WEBHOOK_SECRET_TOKEN").ok())
        .ok_or_else(|| anyhow::anyhow!("set ZOOM_WEBHOOK_SECRET_TOKEN or pass --token"))?;

    let body: Arc<[u8]> = Arc::from(vec![b'a'; cli.body].into_boxed_slice());
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(cli.conns)
        .timeout(Duration::from_secs(3))
        .build()?;

    let counters = Arc::new(Counters::default());
    let (work_tx, work_rx) = tokio::sync::mpsc::channel::<()>(cli.workers * 2);
    let work_rx = Arc::new(Mutex::new(work_rx));

    let mut workers = Vec::with_capacity(cli.workers);
    for _ in 0..cli.workers {
        let work_rx = work_rx.clone();
        let client = client.clone();
        let counters = counters.clone();
        let url = cli.url.clone();
        let body = body.clone();
        let token = token.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let permit = work_rx.lock().await.recv().await;
                if permit.is_none() {
                    break;
                }
                send_one(&client, &url, &body, &token, &counters).await;
            }
        }));
    }

    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    progress.enable_steady_tick(Duration::from_millis(200));

    println!("attack {} for {}s @ {} rps (conns={})", cli.url, cli.duration, cli.rate, cli.conns);

    let per_tick = (cli.rate / 1000).max(1);
    let mut ticker = tokio::time::interval(Duration::from_millis(1));
    let deadline = Instant::now() + Duration::from_secs(cli.duration);

    while Instant::now() < deadline {
        ticker.tick().await;
        for _ in 0..per_tick {
            if work_tx.try_send(()).is_err() {
                break; // workers saturated; drop this slot's request rather than block the ticker
            }
        }
        progress.set_message(format!(
            "sent={} ok={} bad={} err={}",
            counters.sent.load(Ordering::Relaxed),
            counters.ok.load(Ordering::Relaxed),
            counters.bad.load(Ordering::Relaxed),
            counters.transport_err.load(Ordering::Relaxed),
        ));
    }

    drop(work_tx);
    for w in workers {
        let _ = w.await;
    }
    progress.finish_and_clear();

    println!(
        "sent={} ok={} bad={} transport_err={}",
        counters.sent.load(Ordering::Relaxed),
        counters.ok.load(Ordering::Relaxed),
        counters.bad.load(Ordering::Relaxed),
        counters.transport_err.load(Ordering::Relaxed),
    );

    Ok(())
}

async fn send_one(client: &reqwest::Client, url: &str, body: &[u8], token: &str, counters: &Counters) {
    let ts = unix_seconds().to_string();
    let sig = signature::compute(ts.as_bytes(), body, token.as_bytes());

    counters.sent.fetch_add(1, Ordering::Relaxed);
    let result = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("x-zm-request-timestamp", &ts)
        .header("x-zm-signature", sig)
        .body(body.to_vec())
        .send()
        .await;

    match result {
        Err(_) => {
            counters.transport_err.fetch_add(1, Ordering::Relaxed);
        }
        Ok(resp) => {
            let status = resp.status().as_u16();
            let _ = resp.bytes().await;
            if matches!(status, 200 | 202 | 204) {
                counters.ok.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.bad.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn unix_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}
