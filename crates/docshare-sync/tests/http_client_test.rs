//! HTTP contract tests for `HttpRemoteClient`.
//!
//! Each test stands up a wiremock server and checks the exact request the
//! client sends and how it maps the `{code, msg, data}` envelope back.

use docshare_core::ShareKind;
use docshare_sync::protocol::{
    AccessUpdateRequest, ChunkUpload, DeleteRequest, ShareMetadata, UploadInitRequest,
};
use docshare_sync::{ErrorClass, HttpRemoteClient, RemoteClient, ServerSettings, SyncError};
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "test-key";

fn client(server: &MockServer) -> HttpRemoteClient {
    let settings = ServerSettings {
        url: Some(format!("{}/api", server.uri())),
        api_key: Some(API_KEY.to_string()),
        request_timeout_secs: 5,
    };
    HttpRemoteClient::new(&settings).expect("Failed to create client")
}

fn ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "msg": "", "data": data }))
}

#[tokio::test]
async fn test_verify_sends_api_key_and_decodes_info() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/verify"))
        .and(header("X-Api-Key", API_KEY))
        .respond_with(ok(json!({
            "user": { "id": "u1", "name": "Ada" },
            "limits": { "minChunkSize": 524288, "maxChunkSize": 4194304 },
            "features": { "incrementalShare": true }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = client(&server).verify().await.unwrap();

    assert_eq!(info.user.name, "Ada");
    assert_eq!(info.limits.min_chunk_size, Some(512 * 1024));
    assert_eq!(info.limits.max_chunk_size, Some(4 * 1024 * 1024));
    assert!(info.features.incremental_share);
}

#[tokio::test]
async fn test_list_shares_is_a_get() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/shares"))
        .and(header("X-Api-Key", API_KEY))
        .respond_with(ok(json!({
            "shares": [{
                "shareId": "s1",
                "docId": "nb-1",
                "kind": "notebook",
                "title": "Notes",
                "url": "https://share.test/s/s1",
                "hasPassword": true,
                "expiresAt": 1767225600000i64,
                "viewCount": 12
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let shares = client(&server).list_shares().await.unwrap();

    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].share_id, "s1");
    assert_eq!(shares[0].kind, ShareKind::Notebook);
    assert!(shares[0].has_password);
    assert_eq!(shares[0].expires_at.map(|t| t.timestamp_millis()), Some(1_767_225_600_000));
    assert_eq!(shares[0].visitor_limit, None);
}

#[tokio::test]
async fn test_snapshot_request_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/shares/snapshot"))
        .and(body_json(json!({ "shareId": "s1" })))
        .respond_with(ok(json!({
            "docs": [{ "docId": "d1", "contentHash": "AB", "metaHash": "", "sortOrder": 2 }],
            "assets": [{ "path": "assets/a.png", "docId": "d1", "hash": "cd" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = client(&server).fetch_snapshot("s1").await.unwrap();

    assert_eq!(snapshot.docs[0].doc_id, "d1");
    assert_eq!(snapshot.docs[0].sort_order, 2);
    assert_eq!(snapshot.assets[0].path, "assets/a.png");
}

#[tokio::test]
async fn test_init_uses_kind_endpoint_and_requires_upload_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/shares/notebook/init"))
        .and(body_string_contains("\"targetId\":\"nb-1\""))
        .respond_with(ok(json!({ "uploadId": "up-7" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/shares/doc/init"))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let request = UploadInitRequest {
        metadata: ShareMetadata {
            target_id: "nb-1".into(),
            title: "Notes".into(),
            ..Default::default()
        },
        assets: vec![],
    };

    let id = client.init_upload(ShareKind::Notebook, &request).await.unwrap();
    assert_eq!(id, "up-7");

    let err = client.init_upload(ShareKind::Doc, &request).await.unwrap_err();
    assert!(matches!(err, SyncError::MissingUploadId));
    assert_eq!(err.classify(), ErrorClass::Fatal);
}

#[tokio::test]
async fn test_chunk_upload_is_multipart() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/shares/asset/chunk"))
        .and(header("X-Api-Key", API_KEY))
        .and(body_string_contains("name=\"uploadId\""))
        .and(body_string_contains("up-1"))
        .and(body_string_contains("name=\"assetPath\""))
        .and(body_string_contains("assets/img/a.png"))
        .and(body_string_contains("name=\"assetDocId\""))
        .and(body_string_contains("name=\"chunkIndex\""))
        .and(body_string_contains("name=\"chunk\""))
        .and(body_string_contains("chunk-bytes"))
        .respond_with(ok(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    let chunk = ChunkUpload {
        upload_id: "up-1".into(),
        asset_path: "assets/img/a.png".into(),
        asset_doc_id: Some("d1".into()),
        chunk_index: 0,
        total_chunks: 1,
        total_size: 11,
        data: b"chunk-bytes".to_vec(),
    };

    client(&server).upload_chunk(chunk).await.unwrap();
}

#[tokio::test]
async fn test_missing_chunks_response_is_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/shares/asset/chunk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "msg": "incomplete",
            "data": { "missingChunks": [2, 5] }
        })))
        .mount(&server)
        .await;

    let chunk = ChunkUpload {
        upload_id: "up-1".into(),
        asset_path: "assets/big.bin".into(),
        asset_doc_id: None,
        chunk_index: 6,
        total_chunks: 7,
        total_size: 7000,
        data: vec![0; 1000],
    };

    let err = client(&server).upload_chunk(chunk).await.unwrap_err();
    match &err {
        SyncError::MissingChunks { asset_path, indices } => {
            assert_eq!(asset_path, "assets/big.bin");
            assert_eq!(indices, &vec![2, 5]);
        }
        other => panic!("expected MissingChunks, got {other:?}"),
    }
    assert_eq!(err.classify(), ErrorClass::NonRetryableMissingChunks(vec![2, 5]));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_application_error_is_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/shares/upload/complete"))
        .and(body_json(json!({ "uploadId": "up-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 3,
            "msg": "upload expired"
        })))
        .mount(&server)
        .await;

    let err = client(&server).complete_upload("up-1").await.unwrap_err();
    assert!(matches!(err, SyncError::Api { code: 3, ref msg } if msg == "upload expired"));
    assert_eq!(err.classify(), ErrorClass::Fatal);
}

#[tokio::test]
async fn test_complete_accepts_bare_ack() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/shares/upload/complete"))
        .respond_with(ok(json!(true)))
        .mount(&server)
        .await;

    let record = client(&server).complete_upload("up-1").await.unwrap();
    assert!(record.is_none());
}

#[tokio::test]
async fn test_server_unavailable_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/shares/upload/cancel"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client(&server).cancel_upload("up-1").await.unwrap_err();
    assert!(matches!(err, SyncError::HttpStatus { status: 503, ref body } if body == "maintenance"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_access_update_and_delete_bodies() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/shares/access/update"))
        .and(body_json(json!({
            "shareId": "s1",
            "password": "pw",
            "clearExpires": true
        })))
        .respond_with(ok(json!({ "shareId": "s1", "hasPassword": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/shares/delete"))
        .and(body_json(json!({ "shareId": "s1", "hardDelete": true })))
        .respond_with(ok(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let record = client
        .update_access(&AccessUpdateRequest {
            share_id: "s1".into(),
            password: Some("pw".into()),
            clear_expires: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(record.has_password);

    client
        .delete_share(&DeleteRequest {
            share_id: "s1".into(),
            hard_delete: true,
        })
        .await
        .unwrap();
}
