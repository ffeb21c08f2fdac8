use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use flate2::Compression;
use flate2::write::GzEncoder;
use meter_auth::{CIPHERED_HEADER, DecryptionKey, HASH_HEADER, REAL_IP_HEADER, SigningKey};
use meter_config::Config;
use meter_metrics::MetricSample;
use meter_server::{MetricService, ServiceState, make_app};
use meter_store::MemoryStore;
use rand_core::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use similar_asserts::assert_eq;
use tower::ServiceExt;

fn state(yaml: &str) -> ServiceState {
    let config = Arc::new(Config::from_yaml_str(yaml).unwrap());
    let service = MetricService::new(Arc::new(MemoryStore::new()), Duration::from_secs(300));
    ServiceState::new(config, service).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn compressed_post(uri: &str) -> axum::http::request::Builder {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
}

#[tokio::test]
async fn test_plain_update_and_value() {
    let app = make_app(state("{}"));

    for _ in 0..2 {
        let request = post("/update/counter/PollCount/5", Body::empty());
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    let (status, _) = send(&app, post("/update/gauge/Alloc/1.5", Body::empty())).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        send(&app, get("/value/counter/PollCount")).await,
        (StatusCode::OK, "10".to_owned())
    );
    assert_eq!(
        send(&app, get("/value/gauge/Alloc")).await,
        (StatusCode::OK, "1.5".to_owned())
    );

    // Stored with another type.
    let (status, _) = send(&app, get("/value/gauge/PollCount")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/value/gauge/Unknown")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/value/histogram/Alloc")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_plain_update_rejections() {
    let app = make_app(state("{}"));

    let cases = [
        ("/update/histogram/x/1", StatusCode::BAD_REQUEST),
        ("/update/counter/x/1.5", StatusCode::BAD_REQUEST),
        ("/update/gauge/x/abc", StatusCode::BAD_REQUEST),
        ("/update/gauge/x/NaN", StatusCode::BAD_REQUEST),
        ("/update/counter/5", StatusCode::NOT_FOUND),
        ("/update/counter/", StatusCode::NOT_FOUND),
    ];

    for (uri, expected) in cases {
        let (status, _) = send(&app, post(uri, Body::empty())).await;
        assert_eq!(status, expected, "{uri}");
    }
}

#[tokio::test]
async fn test_json_update() {
    let app = make_app(state("{}"));
    let sample = r#"{"id":"PollCount","type":"counter","delta":3}"#;

    send(&app, post("/update/", sample)).await;
    let (status, body) = send(&app, post("/update/", sample)).await;
    assert_eq!(status, StatusCode::OK);
    insta::assert_snapshot!(body, @r###"{"id":"PollCount","type":"counter","delta":6}"###);

    let gauge = r#"{"id":"Alloc","type":"gauge","value":2.25}"#;
    let (status, body) = send(&app, post("/update/", gauge)).await;
    assert_eq!(status, StatusCode::OK);
    insta::assert_snapshot!(body, @r###"{"id":"Alloc","type":"gauge","value":2.25}"###);
}

#[tokio::test]
async fn test_json_update_malformed() {
    let app = make_app(state("{}"));

    let bodies = [
        r#"{"id":"x","type":"counter","value":1.0}"#,
        r#"{"id":"x","type":"gauge","delta":1}"#,
        r#"{"id":"x","type":"gauge","delta":1,"value":1.0}"#,
        r#"{"id":"x","type":"gauge"}"#,
        r#"{"id":"","type":"gauge","value":1.0}"#,
        r#"{"id":"x","type":"summary","value":1.0}"#,
        "not json",
    ];

    for body in bodies {
        let (status, _) = send(&app, post("/update/", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }

    let (status, body) = send(&app, get("/value/gauge/x")).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
}

#[tokio::test]
async fn test_compressed_batch() {
    let state = state("{}");
    let app = make_app(state.clone());

    let batch = r#"[
        {"id":"PollCount","type":"counter","delta":1},
        {"id":"Alloc","type":"gauge","value":1.0},
        {"id":"PollCount","type":"counter","delta":4},
        {"id":"Alloc","type":"gauge","value":2.5}
    ]"#;
    let body = gzip(batch.as_bytes());
    let request = compressed_post("/updates/")
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    insta::assert_snapshot!(body, @r###"[{"id":"PollCount","type":"counter","delta":5},{"id":"Alloc","type":"gauge","value":2.5}]"###);

    assert_eq!(
        state.metrics().get("PollCount").await.unwrap(),
        Some(MetricSample::counter("PollCount", 5).unwrap())
    );
}

#[tokio::test]
async fn test_batch_rejects_malformed_sample() {
    let state = state("{}");
    let app = make_app(state.clone());

    let batch = r#"[
        {"id":"Alloc","type":"gauge","value":1.0},
        {"id":"PollCount","type":"counter"}
    ]"#;
    let (status, _) = send(&app, post("/updates", batch)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.metrics().get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_json_value() {
    let app = make_app(state("{}"));
    send(&app, post("/update/gauge/Alloc/7", Body::empty())).await;

    let query = r#"{"id":"Alloc","type":"gauge"}"#;
    let (status, body) = send(&app, post("/value/", query)).await;
    assert_eq!(status, StatusCode::OK);
    insta::assert_snapshot!(body, @r###"{"id":"Alloc","type":"gauge","value":7.0}"###);

    let (status, _) = send(&app, post("/value/", r#"{"id":"Alloc","type":"counter"}"#)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, post("/value/", r#"{"id":"Sys","type":"gauge"}"#)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, post("/value/", r#"{"id":"Alloc","type":"summary"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ping_and_listing() {
    let app = make_app(state("{}"));

    let (status, _) = send(&app, get("/ping")).await;
    assert_eq!(status, StatusCode::OK);

    send(&app, post("/update/gauge/Sys/3", Body::empty())).await;
    send(&app, post("/update/counter/PollCount/2", Body::empty())).await;

    let response = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );

    let (_, body) = send(&app, get("/")).await;
    let rows: Vec<_> = body.lines().filter(|l| l.starts_with("<tr><td>")).collect();
    assert_eq!(
        rows,
        [
            "<tr><td>PollCount</td><td>counter</td><td>2</td></tr>",
            "<tr><td>Sys</td><td>gauge</td><td>3</td></tr>",
        ]
    );
}

#[tokio::test]
async fn test_integrity_verified_on_compressed_body() {
    let state = state("collector:\n  key: secret\n");
    let app = make_app(state.clone());
    let key = SigningKey::new("secret");

    let body = gzip(br#"[{"id":"PollCount","type":"counter","delta":2}]"#);
    let request = compressed_post("/updates/")
        .header(HASH_HEADER, key.sign(&body))
        .body(Body::from(body))
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_integrity_rejects_tampered_payload() {
    let state = state("collector:\n  key: secret\n");
    let app = make_app(state.clone());
    let key = SigningKey::new("secret");

    let body = br#"{"id":"PollCount","type":"counter","delta":2}"#.to_vec();
    let signature = key.sign(&body);

    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");

    let request = Request::post("/update/")
        .header(HASH_HEADER, signature)
        .body(Body::from(tampered))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(state.metrics().get("PollCount").await.unwrap(), None);

    for signature in ["", "zz", "abcd"] {
        let request = Request::post("/update/")
            .header(HASH_HEADER, signature)
            .body(Body::from(body.clone()))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{signature:?}");
    }
    assert_eq!(state.metrics().get("PollCount").await.unwrap(), None);

    // Requests without the header are not checked.
    let (status, _) = send(&app, post("/update/", body)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_integrity_ignored_without_key() {
    let app = make_app(state("{}"));

    let request = Request::post("/update/counter/PollCount/1")
        .header(HASH_HEADER, "not a digest")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_trusted_subnet() {
    let app = make_app(state("collector:\n  trusted_subnet: 10.0.0.0/8\n"));

    let request = |ip: Option<&str>| {
        let mut builder = Request::post("/update/counter/PollCount/1");
        if let Some(ip) = ip {
            builder = builder.header(REAL_IP_HEADER, ip);
        }
        builder.body(Body::empty()).unwrap()
    };

    let (status, _) = send(&app, request(None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, request(Some("192.168.1.10"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, request(Some("garbage"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, request(Some("10.1.2.3"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_encrypted_batch() {
    let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
    let mut pem = tempfile::NamedTempFile::new().unwrap();
    pem.write_all(private.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes())
        .unwrap();

    let yaml = format!(
        "collector:\n  key: secret\n  crypto_key: {}\n",
        pem.path().display()
    );
    let state = state(&yaml);
    let app = make_app(state.clone());

    let public = DecryptionKey::try_from(private).unwrap().encryption_key();
    let ciphertext = public
        .encrypt(br#"[{"id":"Alloc","type":"gauge","value":4.5}]"#)
        .unwrap();
    let body = gzip(&ciphertext);

    let request = compressed_post("/updates/")
        .header(CIPHERED_HEADER, "true")
        .header(HASH_HEADER, SigningKey::new("secret").sign(&body))
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        state.metrics().get("Alloc").await.unwrap(),
        Some(MetricSample::gauge("Alloc", 4.5).unwrap())
    );

    // Garbage that claims to be encrypted.
    let body = gzip(b"not encrypted");
    let request = compressed_post("/updates/")
        .header(CIPHERED_HEADER, "true")
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signed_response() {
    let app = make_app(state("collector:\n  key: secret\n"));
    let key = SigningKey::new("secret");

    let request = Request::post("/update/counter/PollCount/3")
        .header(HASH_HEADER, key.sign(b""))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let signature = response.headers()[HASH_HEADER].to_str().unwrap().to_owned();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"OK");
    key.verify(&body, &signature).unwrap();

    // Unsigned requests get unsigned responses.
    let response = app
        .oneshot(post("/update/counter/PollCount/1", Body::empty()))
        .await
        .unwrap();
    assert!(!response.headers().contains_key(HASH_HEADER));
}

#[tokio::test]
async fn test_response_unsigned_without_key() {
    let app = make_app(state("{}"));

    let request = Request::get("/value/counter/PollCount")
        .header(HASH_HEADER, "0000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert!(!response.headers().contains_key(HASH_HEADER));
}

#[tokio::test]
async fn test_body_limit() {
    let state = state("collector:\n  key: secret\n  max_body_size: 64\n");
    let app = make_app(state.clone());

    let batch: Vec<_> = (0..10)
        .map(|i| format!(r#"{{"id":"g{i}","type":"gauge","value":{i}}}"#))
        .collect();
    let body = format!("[{}]", batch.join(","));
    assert!(body.len() > 64);

    // Buffered by the endpoint.
    let (status, _) = send(&app, post("/updates/", body.clone())).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    // Buffered by the integrity check.
    let request = Request::post("/updates/")
        .header(header::CONTENT_LENGTH, body.len())
        .header(HASH_HEADER, SigningKey::new("secret").sign(body.as_bytes()))
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    // The limit also applies after decompression.
    let (status, _) = send(
        &app,
        compressed_post("/updates/")
            .body(Body::from(gzip(body.as_bytes())))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    assert!(state.metrics().get_all().await.unwrap().is_empty());
}
