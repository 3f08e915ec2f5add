mod common;

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use common::{serve, Reply};
use vodpipe_core::source::{HttpSource, OpenOptions, SourceAcquirer, SourceError};

fn acquirer() -> SourceAcquirer {
    let http = HttpSource::new("vodpipe-tests/1.0", Duration::from_secs(5)).unwrap();
    SourceAcquirer::new(http, None)
}

fn options() -> OpenOptions {
    OpenOptions {
        headers: Vec::new(),
        timeout: Duration::from_secs(5),
        max_redirects: 5,
    }
}

fn routes(entries: Vec<(&str, Reply)>) -> HashMap<String, Reply> {
    entries
        .into_iter()
        .map(|(path, reply)| (path.to_string(), reply))
        .collect()
}

#[tokio::test]
async fn follows_relative_redirect_chain() {
    let (base, seen) = serve(routes(vec![
        ("/start", Reply::redirect("/hop")),
        ("/hop", Reply::redirect("/media/movie.mkv")),
        ("/media/movie.mkv", Reply::ok("movie bytes")),
    ]))
    .await;

    let mut handle = acquirer()
        .open(&format!("{base}/start"), &options())
        .await
        .unwrap();
    assert_eq!(handle.content_length(), Some(11));
    let mut body = String::new();
    handle.reader().read_to_string(&mut body).await.unwrap();

    assert_eq!(body, "movie bytes");
    let paths: Vec<String> = seen.lock().unwrap().iter().map(|s| s.path.clone()).collect();
    assert_eq!(paths, vec!["/start", "/hop", "/media/movie.mkv"]);
}

#[tokio::test]
async fn forwards_custom_headers_on_every_hop() {
    let (base, seen) = serve(routes(vec![
        ("/a", Reply::redirect("/b")),
        ("/b", Reply::ok("ok")),
    ]))
    .await;
    let options = options().with_headers(vec![
        ("Referer".to_string(), "https://origin.example".to_string()),
        ("Cookie".to_string(), "session=1".to_string()),
    ]);

    acquirer().open(&format!("{base}/a"), &options).await.unwrap();

    for request in seen.lock().unwrap().iter() {
        assert_eq!(request.headers["referer"], "https://origin.example");
        assert_eq!(request.headers["cookie"], "session=1");
        assert_eq!(request.headers["user-agent"], "vodpipe-tests/1.0");
    }
}

#[tokio::test]
async fn gives_up_after_redirect_budget() {
    let (base, seen) = serve(routes(vec![
        ("/r0", Reply::redirect("/r1")),
        ("/r1", Reply::redirect("/r2")),
        ("/r2", Reply::redirect("/r3")),
        ("/r3", Reply::redirect("/r4")),
        ("/r4", Reply::redirect("/r5")),
        ("/r5", Reply::redirect("/r6")),
        ("/r6", Reply::ok("unreachable")),
    ]))
    .await;

    let err = acquirer()
        .open(&format!("{base}/r0"), &options())
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::TooManyRedirects { max: 5, .. }), "{err}");
    assert_eq!(seen.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn five_redirects_are_within_budget() {
    let (base, _) = serve(routes(vec![
        ("/r0", Reply::redirect("/r1")),
        ("/r1", Reply::redirect("/r2")),
        ("/r2", Reply::redirect("/r3")),
        ("/r3", Reply::redirect("/r4")),
        ("/r4", Reply::redirect("/r5")),
        ("/r5", Reply::ok("made it")),
    ]))
    .await;

    let handle = acquirer().open(&format!("{base}/r0"), &options()).await;
    assert!(handle.is_ok());
}

#[tokio::test]
async fn redirect_without_location_fails() {
    let (base, _) = serve(routes(vec![("/bare", Reply::status(302, ""))])).await;

    let err = acquirer()
        .open(&format!("{base}/bare"), &options())
        .await
        .unwrap_err();

    assert!(
        matches!(err, SourceError::RedirectWithoutLocation { status: 302, .. }),
        "{err}"
    );
}

#[tokio::test]
async fn error_status_is_reported() {
    let (base, _) = serve(routes(vec![("/gone", Reply::status(403, "forbidden"))])).await;

    let err = acquirer()
        .open(&format!("{base}/gone"), &options())
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::HttpStatus { status: 403, .. }), "{err}");
}

#[tokio::test]
async fn slow_origin_hits_request_timeout() {
    let (base, _) = serve(routes(vec![(
        "/slow.mkv",
        Reply::ok("late bytes").delayed(Duration::from_secs(2)),
    )]))
    .await;
    let mut options = options();
    options.timeout = Duration::from_millis(200);

    let started = std::time::Instant::now();
    let err = acquirer()
        .open(&format!("{base}/slow.mkv"), &options)
        .await
        .unwrap_err();

    match err {
        SourceError::RequestTimeout { url } => assert_eq!(url, format!("{base}/slow.mkv")),
        other => panic!("unexpected error {other}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn magnet_without_engine_is_rejected() {
    let err = acquirer()
        .open("magnet:?xt=urn:btih:ABCDEF0123456789ABCDEF0123456789ABCDEF01", &options())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::TorrentEngineUnavailable));
}

#[tokio::test]
async fn unsupported_scheme_is_rejected() {
    let err = acquirer()
        .open("ftp://example.com/movie.mkv", &options())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::UnsupportedProtocol(_)));
}
