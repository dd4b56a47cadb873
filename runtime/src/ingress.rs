//! Ingress Handler (IH): composes the CRC pre-handler with the fast enqueue
//! path, exactly as function composition (`ingress = CRC ∘ fast`) rather
//! than stateful middleware.

use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};
use zoom_ingest_core::{crc, metrics, shard::IngressEvent, Pipeline};

pub const WEBHOOK_PATH: &str = "webhook/zoom";

pub struct IngressState {
    pub pipeline: Pipeline,
    pub secret: Arc<Vec<u8>>,
    pub max_body_bytes: u64,
}

pub fn routes(
    state: Arc<IngressState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let webhook = warp::post()
        .and(warp::path("webhook"))
        .and(warp::path("zoom"))
        .and(warp::path::end())
        .and(warp::body::content_length_limit(state.max_body_bytes))
        .and(warp::header::optional::<String>("x-zm-signature"))
        .and(warp::header::optional::<String>("x-zm-request-timestamp"))
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .and_then(handle_webhook);

    let health = warp::get()
        .and(warp::path("health"))
        .and(warp::path::end())
        .map(|| warp::reply::with_status("ok", StatusCode::OK));

    let metrics_route = warp::get()
        .and(warp::path("metrics"))
        .and(warp::path::end())
        .map(|| warp::reply::with_status(metrics::gather_text(), StatusCode::OK));

    webhook.or(health).or(metrics_route)
}

fn with_state(
    state: Arc<IngressState>,
) -> impl Filter<Extract = (Arc<IngressState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn handle_webhook(
    sig_header: Option<String>,
    ts_header: Option<String>,
    body: bytes::Bytes,
    state: Arc<IngressState>,
) -> Result<warp::reply::Response, Rejection> {
    let body = body.to_vec();

    // CRC short-circuit: never enters the ring, never gated.
    if let Some(plain_token) = crc::detect(&body) {
        let response = crc::respond(&plain_token, &state.secret);
        metrics::REQUESTS_BY_STATUS.with_label_values(&["200"]).inc();
        return Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::OK).into_response());
    }

    let (sig, ts) = match (sig_header, ts_header) {
        (Some(sig), Some(ts)) if !sig.is_empty() && !ts.is_empty() => (sig, ts),
        _ => {
            metrics::REQUESTS_BY_STATUS.with_label_values(&["400"]).inc();
            return Ok(warp::reply::with_status("", StatusCode::BAD_REQUEST).into_response());
        }
    };

    if state.pipeline.shard_count() == 0 {
        metrics::REQUESTS_BY_STATUS.with_label_values(&["503"]).inc();
        return Ok(warp::reply::with_status("", StatusCode::SERVICE_UNAVAILABLE).into_response());
    }

    let event = IngressEvent {
        body,
        sig: sig.into_bytes(),
        ts: ts.into_bytes(),
    };

    if state.pipeline.try_enqueue(event) {
        metrics::RECEIVED_TOTAL.inc();
        metrics::REQUESTS_BY_STATUS.with_label_values(&["202"]).inc();
        Ok(warp::reply::with_status("", StatusCode::ACCEPTED).into_response())
    } else {
        metrics::DROPPED_429_TOTAL.inc();
        metrics::REQUESTS_BY_STATUS.with_label_values(&["429"]).inc();
        Ok(warp::reply::with_header(
            warp::reply::with_status("", StatusCode::TOO_MANY_REQUESTS),
            "Retry-After",
            "1",
        )
        .into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zoom_ingest_core::sink::SinkManager;
    use zoom_ingest_core::PipelineConfig;

    async fn build_state(shard_count: usize, queue_size: usize) -> Arc<IngressState> {
        let sink = Arc::new(SinkManager::new(vec![]));
        let secret = Arc::new(b"s".to_vec());
        let config = PipelineConfig {
            shard_count,
            queue_size,
            validators_per_shard: 1,
            batch_max_count: 256,
            batch_linger: std::time::Duration::from_millis(5),
            fanout_timeout: std::time::Duration::from_secs(1),
        };
        let pipeline = Pipeline::start(config, sink, secret.clone()).await.unwrap();
        Arc::new(IngressState {
            pipeline,
            secret,
            max_body_bytes: 8 * 1024 * 1024,
        })
    }

    #[tokio::test]
    async fn happy_path_returns_202() {
        let state = build_state(4, 8).await;
        let filter = routes(state);

        let ts = "1700000000";
        let body = br#"{"a":1}"#;
        let sig = zoom_ingest_core::signature::compute(ts.as_bytes(), body, b"s");

        let resp = warp::test::request()
            .method("POST")
            .path("/webhook/zoom")
            .header("x-zm-signature", sig)
            .header("x-zm-request-timestamp", ts)
            .body(body.to_vec())
            .reply(&filter)
            .await;

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn missing_headers_return_400() {
        let state = build_state(4, 8).await;
        let filter = routes(state);

        let resp = warp::test::request()
            .method("POST")
            .path("/webhook/zoom")
            .body(br#"{"a":1}"#.to_vec())
            .reply(&filter)
            .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn zero_shards_return_503() {
        let state = build_state(0, 8).await;
        let filter = routes(state);

        let resp = warp::test::request()
            .method("POST")
            .path("/webhook/zoom")
            .header("x-zm-signature", "v0=deadbeef")
            .header("x-zm-request-timestamp", "1")
            .body(br#"{"a":1}"#.to_vec())
            .reply(&filter)
            .await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn handshake_bypasses_ring_and_returns_200() {
        let state = build_state(4, 8).await;
        let filter = routes(state);

        let body = br#"{"event":"endpoint.url_validation","payload":{"plainToken":"abc"}}"#;
        let resp = warp::test::request()
            .method("POST")
            .path("/webhook/zoom")
            .body(body.to_vec())
            .reply(&filter)
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(value["plainToken"], "abc");
        assert_eq!(
            value["encryptedToken"],
            zoom_ingest_core::signature::hmac_hex(b"s", b"abc")
        );
    }

    // Backpressure (ring-full → 429) is exercised deterministically at the
    // ring level in `zoom_ingest_core::shard` — running validators here
    // would race the pop against the assertion, since nothing stops them
    // draining the ring between requests.

    #[tokio::test]
    async fn health_returns_200_ok() {
        let state = build_state(4, 8).await;
        let filter = routes(state);

        let resp = warp::test::request().method("GET").path("/health").reply(&filter).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body(), "ok");
    }
}
