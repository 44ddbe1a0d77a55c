//! End-to-end tests: client → proxy → mock downstream.

use std::io::Read;

use flate2::read::GzDecoder;
use flex_proxy::config::ModifierConfig;
use flex_proxy::modifier::Phase;

mod common;

use common::{client, closed_port, config_for, start_mock_backend, start_mock_backend_with, start_proxy, MockResponse};

const PAGE: &str = "<html><head></head><body><p>hi</p></body></html>";

fn modifier(priority: i64, phase: Phase, target: &str, script: &str) -> ModifierConfig {
    ModifierConfig {
        name: None,
        priority,
        phase,
        target_content_type: target.to_string(),
        script: script.to_string(),
    }
}

#[tokio::test]
async fn test_html_response_is_modified() {
    let backend = start_mock_backend(MockResponse::new(200, "text/html; charset=utf-8", PAGE).header("ETag", "\"v1\"")).await;
    let mut config = config_for(backend.addr);
    config.modifiers.push(modifier(
        0,
        Phase::Response,
        "text/html",
        r#"document.append_child("/html/body", "div").set_attribute("id", "x");"#,
    ));
    let (proxy, shutdown) = start_proxy(config).await;

    let res = client().get(format!("http://{proxy}/page")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().get("etag").is_none());
    assert!(res.headers().get("x-request-id").is_some());
    let body = res.text().await.unwrap();
    assert_eq!(body.matches("<div id=\"x\">").count(), 1);
    assert!(body.contains("<p>hi</p>"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_chunked_response_within_limit_is_modified() {
    let backend = start_mock_backend(MockResponse::new(200, "text/html", PAGE).chunked()).await;
    let mut config = config_for(backend.addr);
    config.modifiers.push(modifier(
        0,
        Phase::Response,
        "text/html",
        r#"document.append_child("/html/body", "div").set_attribute("id", "x");"#,
    ));
    let (proxy, shutdown) = start_proxy(config).await;

    let body = client().get(format!("http://{proxy}/")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body.matches("<div id=\"x\">").count(), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn test_oversized_chunked_response_streams_unmodified() {
    let page = format!("<html><head></head><body>{}</body></html>", "<p>filler</p>".repeat(20));
    let backend = start_mock_backend(MockResponse::new(200, "text/html", page.clone()).chunked()).await;
    let mut config = config_for(backend.addr);
    config.proxy.max_body_size = 64;
    config.compression.enabled = false;
    config.modifiers.push(modifier(
        0,
        Phase::Response,
        "text/html",
        r#"document.append_child("/html/body", "div").set_attribute("id", "x");"#,
    ));
    let (proxy, shutdown) = start_proxy(config).await;

    let res = client().get(format!("http://{proxy}/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), page);

    shutdown.trigger();
}

#[tokio::test]
async fn test_unmatched_type_streams_untouched() {
    let backend = start_mock_backend(MockResponse::new(200, "text/plain", "plain body")).await;
    let mut config = config_for(backend.addr);
    config.compression.enabled = false;
    config.modifiers.push(modifier(0, Phase::Response, "text/html", r#"document.remove("/html/body");"#));
    let (proxy, shutdown) = start_proxy(config).await;

    let res = client().get(format!("http://{proxy}/notes.txt")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "plain body");

    shutdown.trigger();
}

#[tokio::test]
async fn test_malformed_json_passes_through() {
    let malformed = r#"{"a": [1, 2"#;
    let backend = start_mock_backend(MockResponse::new(200, "application/json", malformed)).await;
    let mut config = config_for(backend.addr);
    config.modifiers.push(modifier(0, Phase::Response, "application/json", r#"document.remove("/a");"#));
    let (proxy, shutdown) = start_proxy(config).await;

    let res = client().get(format!("http://{proxy}/api")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.bytes().await.unwrap().as_ref(), malformed.as_bytes());

    shutdown.trigger();
}

#[tokio::test]
async fn test_failing_modifier_does_not_stop_the_next() {
    let backend = start_mock_backend(MockResponse::new(200, "text/html", PAGE)).await;
    let mut config = config_for(backend.addr);
    config.modifiers.push(modifier(
        0,
        Phase::Response,
        "text/html",
        r#"document.append_child("/html/body", "span"); throw "boom";"#,
    ));
    config.modifiers.push(modifier(
        1,
        Phase::Response,
        "text/html",
        r#"document.append_child("/html/body", "footer").set_text("done");"#,
    ));
    let (proxy, shutdown) = start_proxy(config).await;

    let body = client()
        .get(format!("http://{proxy}/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(!body.contains("<span>"));
    assert!(body.contains("<footer>done</footer>"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_request_is_forwarded_to_downstream() {
    let backend = start_mock_backend(MockResponse::new(200, "text/plain", "ok")).await;
    let mut config = config_for(backend.addr);
    config.proxy.internal_cookies = vec!["debug".into()];
    let (proxy, shutdown) = start_proxy(config).await;

    let res = client()
        .get(format!("http://{proxy}/page?q=1"))
        .header("Cookie", "debug=1; keep=2")
        .header("Referer", format!("http://{proxy}/from"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let seen = backend.last_request();
    assert_eq!(seen.request_line(), "GET /page?q=1 HTTP/1.1");
    assert_eq!(seen.header("host"), Some(backend.addr.to_string()));
    assert_eq!(seen.header("cookie").as_deref(), Some("keep=2"));
    assert_eq!(seen.header("referer"), Some(format!("http://{}/from", backend.addr)));
    assert_eq!(seen.header("x-forwarded-host"), Some(proxy.to_string()));
    assert_eq!(seen.header("x-forwarded-proto").as_deref(), Some("http"));
    assert!(seen.header("x-request-id").is_some());

    shutdown.trigger();
}

#[tokio::test]
async fn test_redirect_location_points_at_proxy() {
    let backend = start_mock_backend_with(|addr| {
        MockResponse::new(302, "text/plain", "").header("Location", &format!("http://{addr}/next"))
    })
    .await;
    let (proxy, shutdown) = start_proxy(config_for(backend.addr)).await;

    let res = client().get(format!("http://{proxy}/start")).send().await.unwrap();
    assert_eq!(res.status(), 302);
    assert_eq!(res.headers()["location"], format!("http://{proxy}/next").as_str());

    shutdown.trigger();
}

#[tokio::test]
async fn test_request_json_body_is_modified() {
    let backend = start_mock_backend(MockResponse::new(200, "text/plain", "ok")).await;
    let mut config = config_for(backend.addr);
    config.modifiers.push(modifier(0, Phase::Request, "application/json", r#"document.remove("/token");"#));
    let (proxy, shutdown) = start_proxy(config).await;

    let res = client()
        .post(format!("http://{proxy}/submit"))
        .header("Content-Type", "application/json")
        .body(r#"{"token":"secret","name":"ann"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let seen = backend.last_request();
    assert_eq!(String::from_utf8(seen.body).unwrap(), r#"{"name":"ann"}"#);

    shutdown.trigger();
}

#[tokio::test]
async fn test_gzip_response_is_modified_and_recompressed() {
    let packed = {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(PAGE.as_bytes()).unwrap();
        encoder.finish().unwrap()
    };
    let backend = start_mock_backend(MockResponse::new(200, "text/html", packed).header("Content-Encoding", "gzip")).await;
    let mut config = config_for(backend.addr);
    config.modifiers.push(modifier(
        0,
        Phase::Response,
        "text/html",
        r#"document.append_child("/html/body", "div").set_attribute("id", "x");"#,
    ));
    let (proxy, shutdown) = start_proxy(config).await;

    let res = client()
        .get(format!("http://{proxy}/"))
        .header("Accept-Encoding", "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["content-encoding"], "gzip");
    let packed = res.bytes().await.unwrap();
    let mut body = String::new();
    GzDecoder::new(packed.as_ref()).read_to_string(&mut body).unwrap();
    assert_eq!(body.matches("<div id=\"x\">").count(), 1);

    // A client without gzip support gets identity.
    let res = client().get(format!("http://{proxy}/")).send().await.unwrap();
    assert!(res.headers().get("content-encoding").is_none());
    assert!(res.text().await.unwrap().contains("<div id=\"x\">"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_identity_response_is_compressed_for_client() {
    let backend = start_mock_backend(MockResponse::new(200, "text/css", "body { color: red; }")).await;
    let (proxy, shutdown) = start_proxy(config_for(backend.addr)).await;

    let res = client()
        .get(format!("http://{proxy}/site.css"))
        .header("Accept-Encoding", "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["content-encoding"], "gzip");
    assert_eq!(res.headers()["vary"], "accept-encoding");
    let packed = res.bytes().await.unwrap();
    let mut body = String::new();
    GzDecoder::new(packed.as_ref()).read_to_string(&mut body).unwrap();
    assert_eq!(body, "body { color: red; }");

    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_downstream_is_bad_gateway() {
    let (proxy, shutdown) = start_proxy(config_for(closed_port().await)).await;

    let res = client().get(format!("http://{proxy}/")).send().await.unwrap();
    assert_eq!(res.status(), 502);

    shutdown.trigger();
}

#[tokio::test]
async fn test_loopback_health_probe() {
    let backend = start_mock_backend(MockResponse::new(200, "text/plain", "up")).await;
    let (proxy, shutdown) = start_proxy(config_for(backend.addr)).await;

    let res = client().get(format!("http://{proxy}/healthcheck")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "Healthy");
    assert_eq!(backend.last_request().request_line(), "GET / HTTP/1.1");

    shutdown.trigger();
}

#[tokio::test]
async fn test_strict_host_rejects_other_hosts() {
    let backend = start_mock_backend(MockResponse::new(200, "text/plain", "ok")).await;
    let mut config = config_for(backend.addr);
    config.host_mapping.strict_host = true;
    let (proxy, shutdown) = start_proxy(config).await;

    let res = client()
        .get(format!("http://{proxy}/"))
        .header("Host", "elsewhere.local")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 421);

    let res = client().get(format!("http://{proxy}/")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    shutdown.trigger();
}

#[tokio::test]
async fn test_session_cookie_issued_when_enabled() {
    let backend = start_mock_backend(MockResponse::new(200, "text/plain", "ok")).await;
    let mut config = config_for(backend.addr);
    config.session.enabled = true;
    let (proxy, shutdown) = start_proxy(config).await;

    let res = client().get(format!("http://{proxy}/")).send().await.unwrap();
    let cookie = res.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("flexproxy_session="));

    let res = client()
        .get(format!("http://{proxy}/"))
        .header("Cookie", "flexproxy_session=abc")
        .send()
        .await
        .unwrap();
    assert!(res.headers().get("set-cookie").is_none());
    assert_eq!(backend.last_request().header("cookie"), None);

    shutdown.trigger();
}
