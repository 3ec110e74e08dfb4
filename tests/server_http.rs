//! HTTP server end to end with the local-disk store.

use catalog_images::config::Config;
use catalog_images::server;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::io::Cursor;
use tempfile::TempDir;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start a local-mode server rooted in a fresh temp dir.
async fn start_server(customize: impl FnOnce(&mut Config)) -> (TempDir, String) {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let mut cfg = Config::local(tmp.path().join("uploads"), format!("127.0.0.1:{}", port));
    customize(&mut cfg);

    tokio::spawn(async move {
        server::run_server(&cfg).await.unwrap();
    });
    wait_for_server(port).await;

    (tmp, format!("http://127.0.0.1:{}", port))
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, _| image::Rgb([(x % 256) as u8, 40, 90]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn image_part(name: &str, bytes: Vec<u8>) -> Part {
    Part::bytes(bytes)
        .file_name(name.to_string())
        .mime_str("image/png")
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (_tmp, base) = start_server(|_| {}).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "local");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_create_with_images_and_serve_them() {
    let (tmp, base) = start_server(|_| {}).await;
    let client = reqwest::Client::new();

    let form = Form::new()
        .text("existingImages", r#"["https://cdn.example.com/kept.jpg"]"#)
        .part("images", image_part("front view.png", png(64, 32)))
        .part("images", image_part("empty.png", Vec::new()));

    let resp = client
        .post(format!("{}/api/products/42/images", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    let images = body["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0], "https://cdn.example.com/kept.jpg");
    let reference = images[1].as_str().unwrap();
    assert!(reference.starts_with("/uploads/"), "{}", reference);
    assert!(reference.ends_with("_front_view.png"), "{}", reference);
    assert_eq!(body["failed"].as_array().unwrap().len(), 0);

    // The raw file exists right away and is served statically.
    let name = reference.strip_prefix("/uploads/").unwrap();
    assert!(tmp.path().join("uploads").join(name).exists());

    let served = client
        .get(format!("{}{}", base, reference))
        .send()
        .await
        .unwrap();
    assert_eq!(served.status(), 200);
    assert!(!served.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_without_new_images_keeps_existing() {
    let (_tmp, base) = start_server(|_| {}).await;

    let form = Form::new().text("existingImages", r#"["/uploads/a.jpg", "/uploads/b.jpg"]"#);
    let resp = reqwest::Client::new()
        .put(format!("{}/api/categories/7/images", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["images"],
        serde_json::json!(["/uploads/a.jpg", "/uploads/b.jpg"])
    );
}

#[tokio::test]
async fn test_malformed_existing_images_is_bad_request() {
    let (tmp, base) = start_server(|_| {}).await;

    let form = Form::new()
        .text("existingImages", "[\"unterminated")
        .part("images", image_part("a.png", png(8, 8)));
    let resp = reqwest::Client::new()
        .put(format!("{}/api/products/1/images", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // Nothing was stored.
    let stored = std::fs::read_dir(tmp.path().join("uploads")).unwrap().count();
    assert_eq!(stored, 0);
}

#[tokio::test]
async fn test_unknown_collection_is_not_found() {
    let (_tmp, base) = start_server(|_| {}).await;

    let form = Form::new().part("images", image_part("a.png", png(8, 8)));
    let resp = reqwest::Client::new()
        .post(format!("{}/api/orders/1/images", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (_tmp, base) = start_server(|cfg| cfg.server.max_body_bytes = 1024).await;

    let form = Form::new().part("images", image_part("big.png", vec![0u8; 8 * 1024]));
    let resp = reqwest::Client::new()
        .post(format!("{}/api/products/1/images", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "payload_too_large");
}

#[tokio::test]
async fn test_custom_public_prefix() {
    let (_tmp, base) = start_server(|cfg| cfg.local.public_prefix = "/media/".to_string()).await;
    let client = reqwest::Client::new();

    let form = Form::new().part("images", image_part("p.png", png(16, 16)));
    let body: Value = client
        .post(format!("{}/api/products/9/images", base))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let reference = body["images"][0].as_str().unwrap().to_string();
    assert!(reference.starts_with("/media/"), "{}", reference);

    let served = client.get(format!("{}{}", base, reference)).send().await.unwrap();
    assert_eq!(served.status(), 200);
}
