mod common;

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use common::{serve, Reply};
use vodpipe_core::ingest::{CatalogIngest, HttpCatalogIngest, IngestError, IngestRequest};

async fn endpoint(reply: Reply) -> (HttpCatalogIngest, std::sync::Arc<std::sync::Mutex<Vec<common::Seen>>>) {
    let mut routes = HashMap::new();
    routes.insert("/functions/v1/r2-ingest".to_string(), reply);
    let (base, seen) = serve(routes).await;
    let ingest = HttpCatalogIngest::new(
        Client::new(),
        format!("{base}/functions/v1/r2-ingest"),
        "secret-key",
    );
    (ingest, seen)
}

fn json_reply(status: u16, body: &str) -> Reply {
    Reply {
        status,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: body.as_bytes().to_vec(),
        delay: Duration::ZERO,
    }
}

#[tokio::test]
async fn posts_prefix_and_key_header() {
    let (ingest, seen) = endpoint(json_reply(200, r#"{"ok":true,"hls":"https://media/x"}"#)).await;
    let request = IngestRequest::new("/Acao/Filmes/Movie", "https://media.example.com", true).unwrap();

    let body = ingest.notify(&request).await.unwrap();

    assert_eq!(body["hls"], "https://media/x");
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].headers["x-ingest-key"], "secret-key");
    let sent: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(sent["r2_prefix"], "Acao/Filmes/Movie/");
    assert_eq!(sent["r2_public_base"], "https://media.example.com");
    assert_eq!(sent["has_4k"], true);
}

#[tokio::test]
async fn success_status_without_ok_flag_is_rejected() {
    let (ingest, _) = endpoint(json_reply(200, r#"{"ok":false,"error":"unknown prefix"}"#)).await;
    let request = IngestRequest::new("Acao/Filmes/Movie", "https://media.example.com", false).unwrap();

    let err = ingest.notify(&request).await.unwrap_err();

    match err {
        IngestError::Rejected { status, body } => {
            assert_eq!(status, 200);
            assert!(body.contains("unknown prefix"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn error_status_carries_raw_body() {
    let (ingest, _) = endpoint(Reply::status(502, "bad gateway")).await;
    let request = IngestRequest::new("Acao/Filmes/Movie", "https://media.example.com", false).unwrap();

    let err = ingest.notify(&request).await.unwrap_err();

    match err {
        IngestError::Rejected { status, body } => {
            assert_eq!(status, 502);
            assert_eq!(body, "bad gateway");
        }
        other => panic!("unexpected error {other}"),
    }
}
