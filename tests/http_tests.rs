mod common;

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use toon_motion::Error;
use toon_motion::codec;
use toon_motion::provider::{
    ContentPart, GeminiProvider, ImageProvider, InlineImage, ProviderError, ProviderRequest,
};

fn request() -> ProviderRequest {
    ProviderRequest {
        model: "gemini-2.5-flash-image".into(),
        source: InlineImage {
            mime_type: "image/png".into(),
            data: common::png_bytes(2, 2),
        },
        instruction: "frame 1 of a 2-frame animation".into(),
        seed: 1234,
        temperature: 0.2,
    }
}

#[tokio::test]
async fn remote_png_is_fetched_and_encoded() {
    let png = common::png_bytes(5, 5);
    let (url, _captured) = common::serve_once("200 OK", "image/png", png.clone()).await;

    let encoded = codec::encode_from_url(&reqwest::Client::new(), &format!("{url}/cat.png"))
        .await
        .unwrap();
    let decoded = codec::decode(&encoded).unwrap();
    assert_eq!(decoded.bytes, png);
    assert_eq!(decoded.mime_type, "image/png");
}

#[tokio::test]
async fn remote_404_is_a_fetch_error() {
    let (url, _captured) = common::serve_once("404 Not Found", "text/plain", b"gone".to_vec()).await;
    let err = codec::encode_from_url(&reqwest::Client::new(), &format!("{url}/x.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Fetch { ref reason, .. } if reason.contains("404")), "{err:?}");
}

#[tokio::test]
async fn remote_html_is_a_decode_error() {
    let (url, _captured) =
        common::serve_once("200 OK", "text/html", b"<html>nope</html>".to_vec()).await;
    let err = codec::encode_from_url(&reqwest::Client::new(), &url)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "{err:?}");
}

#[tokio::test]
async fn gemini_request_targets_model_and_sends_key() {
    let payload = STANDARD.encode(b"frame-bytes");
    let body = serde_json::json!({
        "candidates": [{
            "content": {
                "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/webp", "data": payload } }
                ]
            }
        }]
    });
    let (url, captured) =
        common::serve_once("200 OK", "application/json", body.to_string().into_bytes()).await;

    let provider = GeminiProvider::new(format!("{url}/"), Duration::from_secs(5)).unwrap();
    let response = provider
        .generate_image(&common::credential(), &request())
        .await
        .unwrap();
    assert_eq!(
        response.parts[1],
        ContentPart::InlineImage {
            mime_type: "image/webp".into(),
            data: payload.clone(),
        }
    );
    assert_eq!(response.first_image(), Some(("image/webp", payload.as_str())));

    let seen = captured.await.unwrap();
    let head = seen.head.to_ascii_lowercase();
    assert!(
        head.starts_with("post /v1beta/models/gemini-2.5-flash-image:generatecontent "),
        "{}",
        seen.head
    );
    assert!(head.contains("x-goog-api-key: test-key"));

    let sent: serde_json::Value = serde_json::from_slice(&seen.body).unwrap();
    assert_eq!(sent["generationConfig"]["seed"], 1234);
    assert_eq!(sent["contents"][0]["parts"][1]["text"], "frame 1 of a 2-frame animation");
}

#[tokio::test]
async fn gemini_error_status_is_reported_with_body() {
    let (url, _captured) = common::serve_once(
        "500 Internal Server Error",
        "application/json",
        br#"{"error":"boom"}"#.to_vec(),
    )
    .await;
    let provider = GeminiProvider::new(url, Duration::from_secs(5)).unwrap();
    let err = provider
        .generate_image(&common::credential(), &request())
        .await
        .unwrap_err();
    match err {
        ProviderError::Status { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("boom"));
        }
        other => panic!("unexpected {other:?}"),
    }
}
