use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{ImageFormat, Rgb, RgbImage};

use tray_inspector::api::{ApiConfig, ApiHandle, ApiServer};
use tray_inspector::detect::SharedBackend;
use tray_inspector::{
    BoundingBox, DetectParams, Detection, DetectorBackend, StubBackend, TrayAnalyzer, TrayReport,
};

fn test_config(max_upload_bytes: usize) -> ApiConfig {
    ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        max_upload_bytes,
        ..ApiConfig::default()
    }
}

fn spawn_with(backend: SharedBackend, cfg: ApiConfig) -> ApiHandle {
    let analyzer = TrayAnalyzer::new(backend, DetectParams::default());
    ApiServer::new(cfg, analyzer).spawn().expect("spawn api")
}

fn spawn_server(detections: Vec<Detection>, max_upload_bytes: usize) -> ApiHandle {
    let backend: SharedBackend = Arc::new(Mutex::new(StubBackend::with_detections(detections)));
    spawn_with(backend, test_config(max_upload_bytes))
}

fn tray_png() -> Vec<u8> {
    let img = RgbImage::from_pixel(120, 90, Rgb([210, 190, 160]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).expect("encode png");
    out.into_inner()
}

fn send(addr: SocketAddr, head: &str, body: &[u8]) -> (u16, String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    stream.write_all(head.as_bytes()).expect("write head");
    stream.write_all(body).expect("write body");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    (status, head, raw[split + 4..].to_vec())
}

fn post(addr: SocketAddr, path: &str, content_type: &str, body: &[u8]) -> (u16, String, Vec<u8>) {
    let head = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    send(addr, &head, body)
}

#[test]
fn predict_accepts_multipart_upload() {
    let egg = Detection {
        class_id: 0,
        class_name: "egg".to_string(),
        confidence: 0.88,
        bbox: BoundingBox::new(20, 30, 70, 80).expect("box"),
    };
    let handle = spawn_server(vec![egg], 1 << 20);

    let mut body = Vec::new();
    body.extend_from_slice(
        b"------tray\r\nContent-Disposition: form-data; name=\"file\"; filename=\"tray.png\"\r\nContent-Type: image/png\r\n\r\n",
    );
    body.extend_from_slice(&tray_png());
    body.extend_from_slice(b"\r\n------tray--\r\n");

    let (status, head, body) = post(
        handle.addr,
        "/predict/",
        "multipart/form-data; boundary=----tray",
        &body,
    );
    assert_eq!(status, 200);
    assert!(head.contains("Access-Control-Allow-Origin: *"));

    let report: TrayReport = serde_json::from_slice(&body).expect("report json");
    assert_eq!(report.num_eggs, 1);
    assert_eq!(report.num_empty_slots, 0);
    let image_bytes = BASE64
        .decode(report.annotated_image_base64)
        .expect("base64 image");
    let annotated = image::load_from_memory(&image_bytes).expect("annotated image");
    assert_eq!((annotated.width(), annotated.height()), (120, 90));

    handle.stop().expect("stop api");
}

#[test]
fn predict_accepts_raw_body_and_rejects_garbage() {
    let handle = spawn_server(Vec::new(), 1 << 20);

    let (status, _, body) = post(handle.addr, "/predict", "image/png", &tray_png());
    assert_eq!(status, 200);
    let report: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(report["tray_status"], "OK");

    let (status, _, body) = post(handle.addr, "/predict", "image/png", b"garbage bytes");
    assert_eq!(status, 400);
    let err: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(err["error"], "invalid_image");

    handle.stop().expect("stop api");
}

#[test]
fn oversized_upload_is_rejected_before_reading() {
    let handle = spawn_server(Vec::new(), 64);
    let head = "POST /predict HTTP/1.1\r\nHost: localhost\r\nContent-Type: image/png\r\nContent-Length: 100000\r\n\r\n";
    let (status, _, body) = send(handle.addr, head, b"");
    assert_eq!(status, 413);
    let err: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(err["error"], "payload_too_large");

    handle.stop().expect("stop api");
}

#[test]
fn health_preflight_and_unknown_routes() {
    let handle = spawn_server(Vec::new(), 1 << 20);

    let (status, _, body) = send(handle.addr, "GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n", b"");
    assert_eq!(status, 200);
    let health: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["backend"], "stub");

    let (status, head, _) = send(
        handle.addr,
        "OPTIONS /predict/ HTTP/1.1\r\nHost: localhost\r\nOrigin: http://example.test\r\n\r\n",
        b"",
    );
    assert_eq!(status, 204);
    assert!(head.contains("Access-Control-Allow-Methods"));

    let (status, _, _) = send(handle.addr, "GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n", b"");
    assert_eq!(status, 404);

    let (status, _, _) = send(handle.addr, "POST /predict HTTP/1.1\r\nHost: localhost\r\n\r\n", b"");
    assert_eq!(status, 411);

    handle.stop().expect("stop api");
}

/// Panics on its first call, then behaves like an empty detector.
struct PanicsOnce {
    panicked: bool,
}

impl DetectorBackend for PanicsOnce {
    fn name(&self) -> &'static str {
        "panics_once"
    }

    fn detect(&mut self, _image: &RgbImage, _params: &DetectParams) -> anyhow::Result<Vec<Detection>> {
        if !self.panicked {
            self.panicked = true;
            panic!("backend blew up");
        }
        Ok(Vec::new())
    }
}

#[test]
fn detector_panic_fails_one_request_and_server_keeps_serving() {
    let backend: SharedBackend = Arc::new(Mutex::new(PanicsOnce { panicked: false }));
    let handle = spawn_with(backend, test_config(1 << 20));

    let (status, _, body) = post(handle.addr, "/predict", "image/png", &tray_png());
    assert_eq!(status, 500);
    let err: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(err["error"], "detector_failure");

    let (status, _, body) = post(handle.addr, "/predict", "image/png", &tray_png());
    assert_eq!(status, 200);
    let report: TrayReport = serde_json::from_slice(&body).expect("report json");
    assert_eq!(report.num_eggs, 0);

    handle.stop().expect("stop api");
}

#[test]
fn slow_client_does_not_hold_the_server() {
    let cfg = ApiConfig {
        io_timeout: Duration::from_millis(200),
        request_deadline: Duration::from_millis(800),
        ..test_config(1 << 20)
    };
    let handle = spawn_with(Arc::new(Mutex::new(StubBackend::new())), cfg);
    let addr = handle.addr;

    // Sends one byte of the request head every 100 ms, never finishing it.
    let dripper = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).expect("connect");
        for byte in b"POST /predict HTTP/1.1\r\nHost: localhost\r\nX-Slow: aaaaaaaaaaaaaaaaaaaa" {
            if stream.write_all(&[*byte]).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
    });
    // Declares a body it never sends.
    let mut stalled = TcpStream::connect(addr).expect("connect");
    stalled
        .write_all(b"POST /predict HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5000\r\n\r\nabc")
        .expect("write partial request");

    thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    let (status, _, _) = send(addr, "GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n", b"");
    assert_eq!(status, 200);
    assert!(started.elapsed() < Duration::from_secs(5));

    drop(stalled);
    dripper.join().expect("dripper thread");
    handle.stop().expect("stop api");
}
