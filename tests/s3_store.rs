//! S3 store against an in-process S3-compatible endpoint.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::put,
    Router,
};
use bytes::Bytes;
use catalog_images::config::RemoteStoreConfig;
use catalog_images::error::StoreError;
use catalog_images::ingest::ImageIngestor;
use catalog_images::models::UploadItem;
use catalog_images::store_s3::{AwsCredentials, S3Store};
use catalog_images::traits::ObjectStore;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Captured {
    path: String,
    authorization: String,
    content_type: String,
    content_sha256: String,
    security_token: Option<String>,
    body: Bytes,
}

#[derive(Clone)]
struct MockS3 {
    status: StatusCode,
    requests: Arc<Mutex<Vec<Captured>>>,
}

async fn handle_put(
    State(mock): State<MockS3>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    mock.requests.lock().unwrap().push(Captured {
        path,
        authorization: header("authorization").unwrap_or_default(),
        content_type: header("content-type").unwrap_or_default(),
        content_sha256: header("x-amz-content-sha256").unwrap_or_default(),
        security_token: header("x-amz-security-token"),
        body,
    });
    if mock.status.is_success() {
        (mock.status, "")
    } else {
        (mock.status, "<Error><Code>AccessDenied</Code></Error>")
    }
}

/// Start a mock endpoint answering every PUT with `status`.
async fn start_mock(status: StatusCode) -> (String, Arc<Mutex<Vec<Captured>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/{*path}", put(handle_put))
        .with_state(MockS3 {
            status,
            requests: requests.clone(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), requests)
}

fn remote_config(endpoint: &str) -> RemoteStoreConfig {
    RemoteStoreConfig {
        bucket: "catalog".to_string(),
        region: "us-east-1".to_string(),
        endpoint_url: Some(endpoint.to_string()),
        public_base_url: None,
        timeout_secs: 5,
    }
}

fn creds(session_token: Option<&str>) -> AwsCredentials {
    AwsCredentials {
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
        session_token: session_token.map(str::to_string),
    }
}

#[tokio::test]
async fn test_put_object_signed_path_style() {
    let (endpoint, requests) = start_mock(StatusCode::OK).await;
    let store = S3Store::new(&remote_config(&endpoint), creds(None)).unwrap();

    let item = UploadItem::new(Some("red shoe.png".into()), vec![7u8; 500])
        .with_content_type("image/png");
    let reference = store.upload(&item, "products").await.unwrap();

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];

    // Path-style: /{bucket}/{folder}/{uuid}_{sanitized}
    assert!(req.path.starts_with("catalog/products/"), "{}", req.path);
    assert!(req.path.ends_with("_red_shoe.png"), "{}", req.path);
    assert_eq!(req.body.len(), 500);
    assert_eq!(req.content_type, "image/png");
    assert_eq!(req.content_sha256.len(), 64);
    assert!(req
        .authorization
        .starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
    assert!(req.authorization.contains("/us-east-1/s3/aws4_request"));
    assert!(req.security_token.is_none());

    assert_eq!(
        reference.as_str(),
        format!("{}/{}", endpoint, req.path)
    );
}

#[tokio::test]
async fn test_session_token_forwarded() {
    let (endpoint, requests) = start_mock(StatusCode::OK).await;
    let store = S3Store::new(&remote_config(&endpoint), creds(Some("tok123"))).unwrap();

    let item = UploadItem::new(Some("a.jpg".into()), vec![1u8; 10]);
    store.upload(&item, "categories").await.unwrap();

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].security_token.as_deref(), Some("tok123"));
    assert!(requests[0]
        .authorization
        .contains("x-amz-security-token"));
    // Content type falls back to the extension.
    assert_eq!(requests[0].content_type, "image/jpeg");
}

#[tokio::test]
async fn test_public_base_url_used_for_reference() {
    let (endpoint, _requests) = start_mock(StatusCode::OK).await;
    let mut cfg = remote_config(&endpoint);
    cfg.public_base_url = Some("https://cdn.example.com/".to_string());
    let store = S3Store::new(&cfg, creds(None)).unwrap();

    let item = UploadItem::new(Some("a.jpg".into()), vec![1u8; 10]);
    let reference = store.upload(&item, "products").await.unwrap();
    assert!(reference
        .as_str()
        .starts_with("https://cdn.example.com/products/"));
    assert!(reference.as_str().ends_with("_a.jpg"));
}

#[tokio::test]
async fn test_error_status_is_rejected() {
    let (endpoint, _requests) = start_mock(StatusCode::FORBIDDEN).await;
    let store = S3Store::new(&remote_config(&endpoint), creds(None)).unwrap();

    let item = UploadItem::new(Some("a.jpg".into()), vec![1u8; 10]);
    let err = store.upload(&item, "products").await.unwrap_err();
    match err {
        StoreError::Rejected { status, message } => {
            assert_eq!(status, 403);
            assert!(message.contains("AccessDenied"));
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_unavailable() {
    // Bind then drop to get a port that nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let store = S3Store::new(
        &remote_config(&format!("http://127.0.0.1:{}", port)),
        creds(None),
    )
    .unwrap();

    let item = UploadItem::new(Some("a.jpg".into()), vec![1u8; 10]);
    let err = store.upload(&item, "products").await.unwrap_err();
    assert!(err.is_unavailable(), "{:?}", err);
}

#[tokio::test]
async fn test_coordinator_reports_storage_unavailable() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let store = S3Store::new(
        &remote_config(&format!("http://127.0.0.1:{}", port)),
        creds(None),
    )
    .unwrap();
    let ingestor = ImageIngestor::new(Arc::new(store));

    let uploads = vec![
        UploadItem::new(Some("a.jpg".into()), vec![1u8; 10]),
        UploadItem::new(Some("b.jpg".into()), vec![2u8; 10]),
    ];
    let err = ingestor
        .ingest(Some(r#"["https://cdn/x.jpg"]"#), uploads, "products")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        catalog_images::error::PipelineError::StorageUnavailable(_)
    ));
}

#[tokio::test]
async fn test_concurrent_uploads_all_reach_store() {
    let (endpoint, requests) = start_mock(StatusCode::OK).await;
    let store = S3Store::new(&remote_config(&endpoint), creds(None)).unwrap();
    let ingestor = ImageIngestor::new(Arc::new(store));

    let uploads: Vec<UploadItem> = (0..5)
        .map(|i| UploadItem::new(Some(format!("img{}.jpg", i)), vec![i as u8 + 1; 32]))
        .collect();
    let result = ingestor.ingest(None, uploads, "products").await.unwrap();

    assert_eq!(result.images.len(), 5);
    assert!(result.failed.is_empty());
    for (i, image) in result.images.iter().enumerate() {
        assert!(
            image.as_str().ends_with(&format!("_img{}.jpg", i)),
            "{} out of order",
            image
        );
    }
    assert_eq!(requests.lock().unwrap().len(), 5);
}
