#![allow(dead_code)]

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Rgba, RgbaImage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, oneshot};
use toon_motion::codec::EncodedImage;
use toon_motion::provider::{
    ContentPart, Credential, ImageProvider, ProviderError, ProviderRequest, ProviderResponse,
};

/// What the scripted provider does on a given call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Image,
    TextOnly,
    Fail,
}

/// Provider stub that records every request and answers call `n` with an
/// image whose payload is `call-<n>`.
pub struct ScriptedProvider {
    calls: Mutex<Vec<ProviderRequest>>,
    script: Box<dyn Fn(usize) -> Step + Send + Sync>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedProvider {
    pub fn always_ok() -> Self {
        Self::with_script(|_| Step::Image)
    }

    pub fn with_script(script: impl Fn(usize) -> Step + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Box::new(script),
            gate: None,
        }
    }

    /// Every call waits for a permit from `gate` before answering.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<ProviderRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageProvider for ScriptedProvider {
    async fn generate_image(
        &self,
        _credential: &Credential,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len() - 1
        };
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        match (self.script)(call) {
            Step::Image => Ok(ProviderResponse {
                parts: vec![
                    ContentPart::Text("ok".into()),
                    ContentPart::InlineImage {
                        mime_type: "image/png".into(),
                        data: STANDARD.encode(format!("call-{call}")),
                    },
                ],
            }),
            Step::TextOnly => Ok(ProviderResponse {
                parts: vec![ContentPart::Text("I cannot draw that".into())],
            }),
            Step::Fail => Err(ProviderError::Status {
                status: 503,
                body: "overloaded".into(),
            }),
        }
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn source_image() -> EncodedImage {
    EncodedImage::from_bytes(&png_bytes(4, 4), "image/png")
}

pub fn credential() -> Credential {
    Credential::new("test-key")
}

/// A request as seen by [`serve_once`].
#[derive(Debug)]
pub struct CapturedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

/// Serve exactly one HTTP response on a random local port and return the base URL.
pub async fn serve_once(
    status: &str,
    content_type: &str,
    body: Vec<u8>,
) -> (String, oneshot::Receiver<CapturedRequest>) {
    serve_once_after(Duration::ZERO, status, content_type, body).await
}

/// Like [`serve_once`], but holds the response back for `delay` after the request arrives.
pub async fn serve_once_after(
    delay: Duration,
    status: &str,
    content_type: &str,
    body: Vec<u8>,
) -> (String, oneshot::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let status = status.to_string();
    let content_type = content_type.to_string();
    let (captured_tx, captured_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 8192];
        let head_end = loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            raw.extend_from_slice(&buf[..n]);
            if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&raw[..head_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while raw.len() < head_end + content_length {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
        }
        let _ = captured_tx.send(CapturedRequest {
            head,
            body: raw[head_end..].to_vec(),
        });

        tokio::time::sleep(delay).await;
        let response_head = format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(response_head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        let _ = socket.shutdown().await;
    });

    (format!("http://{addr}"), captured_rx)
}
