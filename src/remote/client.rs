// 远端 multipart 协议客户端
//
// 五个远端操作：直传、初始化、分片预签名、分片上传、完成，外加中止
// 客户端不持有任何状态，只负责请求/响应

use crate::auth::AuthSession;
use crate::remote::types::{
    normalize_etag, AbortRequest, CompleteRequest, CompletedPart, ErrorBody, InitiateRequest,
    InitiateResponse, ObjectMetadata, PresignPartRequest, PresignPartResponse,
};
use crate::uploader::error::{UploadError, UploadResult};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 累计已传输字节数回调
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// 直传时按此大小切片发送，用于进度上报
const STREAM_SLICE_SIZE: usize = 256 * 1024;

/// 错误消息最大长度
const MAX_ERROR_TEXT_LEN: usize = 512;

/// 上传请求按此最低速率放宽超时（32 KB/s）
const MIN_UPLOAD_BYTES_PER_SEC: u64 = 32 * 1024;

/// 远端存储协议
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 单次请求上传整个文件
    async fn upload_direct(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        progress: ProgressCallback,
    ) -> UploadResult<()>;

    /// 初始化 multipart 会话，返回 upload_id
    async fn initiate(&self, key: &str, content_type: &str) -> UploadResult<String>;

    /// 获取单个分片的预签名上传地址
    async fn presign_part(&self, key: &str, upload_id: &str, part_number: u32)
        -> UploadResult<String>;

    /// 上传分片数据到预签名地址，返回规范化后的完成标签
    async fn upload_part_bytes(&self, url: &str, part_number: u32, data: Bytes)
        -> UploadResult<String>;

    /// 完成 multipart 会话（parts 必须按分片编号升序）
    async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<ObjectMetadata>;

    /// 中止 multipart 会话并释放已上传分片（幂等）
    async fn abort(&self, key: &str, upload_id: &str) -> UploadResult<()>;
}

/// 基于 HTTP 的远端存储客户端
#[derive(Clone)]
pub struct HttpRemoteStore {
    /// HTTP客户端
    client: Client,
    /// 应用服务器地址，如 `https://files.example.com`
    base_url: String,
    /// 认证会话
    auth: Arc<AuthSession>,
    /// 普通 JSON 请求的超时；上传请求在此基础上按数据量放宽
    request_timeout: Duration,
}

impl HttpRemoteStore {
    /// 创建新的远端客户端
    ///
    /// # 参数
    /// * `base_url` - 应用服务器地址
    /// * `auth` - 认证会话
    /// * `timeout_secs` - 连接超时和 JSON 请求超时
    pub fn new(base_url: &str, auth: Arc<AuthSession>, timeout_secs: u64) -> anyhow::Result<Self> {
        let request_timeout = Duration::from_secs(timeout_secs);
        // 客户端级别只限制连接，整体超时按请求设置，避免大文件直传被总时长截断
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!("初始化远端存储客户端: base_url={}", base_url);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            request_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 上传 size 字节允许的总时长
    fn upload_timeout(&self, size: usize) -> Duration {
        self.request_timeout + Duration::from_secs(size as u64 / MIN_UPLOAD_BYTES_PER_SEC)
    }

    /// 附加认证头并发送请求
    ///
    /// 401/403 视为凭证失效，清除缓存的凭证
    async fn send_authorized(&self, builder: RequestBuilder) -> UploadResult<Response> {
        let bearer = self.auth.bearer().await?;
        let response = builder.header(AUTHORIZATION, bearer).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let (status, message) = read_error(response).await;
        let err = UploadError::from_status(status, message);
        if err.is_authorization() {
            warn!("应用服务器拒绝凭证 (HTTP {})，清除缓存凭证", status);
            self.auth.invalidate();
        }
        Err(err)
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> UploadResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let builder = self
            .client
            .post(self.endpoint(path))
            .timeout(self.request_timeout)
            .json(body);
        let response = self.send_authorized(builder).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            UploadError::InvalidResponse(format!("{}: {}", e, text.chars().take(200).collect::<String>()))
        })
    }
}

/// 读取非 2xx 响应的状态码和错误消息
///
/// 优先取 JSON 中的 message/error，否则取原文（截断）或状态码描述
async fn read_error(response: Response) -> (u16, String) {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                text.chars().take(MAX_ERROR_TEXT_LEN).collect()
            }
        });
    (status.as_u16(), message)
}

/// 将数据切片成流，每发送一片上报累计字节数
///
/// 数据交给连接不代表远端已接收，流式上报最多到 99%，
/// 100% 由调用方在收到 2xx 后上报
fn progress_stream(
    data: Bytes,
    progress: ProgressCallback,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let len = data.len();
    let slices: Vec<Bytes> = (0..len)
        .step_by(STREAM_SLICE_SIZE)
        .map(|start| data.slice(start..std::cmp::min(start + STREAM_SLICE_SIZE, len)))
        .collect();

    let cap = len as u64 * 99 / 100;
    let sent = Arc::new(AtomicU64::new(0));
    futures::stream::iter(slices).map(move |slice| {
        let total = sent.fetch_add(slice.len() as u64, Ordering::SeqCst) + slice.len() as u64;
        progress(total.min(cap));
        Ok(slice)
    })
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upload_direct(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        progress: ProgressCallback,
    ) -> UploadResult<()> {
        let size = data.len();
        info!("直传文件: key={}, size={}", key, size);

        let builder = self
            .client
            .put(self.endpoint("/api/objects"))
            .timeout(self.upload_timeout(size))
            .query(&[("key", key)])
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(progress_stream(
                data,
                Arc::clone(&progress),
            )));

        self.send_authorized(builder).await?;
        progress(size as u64);
        debug!("直传成功: key={}", key);
        Ok(())
    }

    async fn initiate(&self, key: &str, content_type: &str) -> UploadResult<String> {
        let request = InitiateRequest {
            key: key.to_string(),
            content_type: content_type.to_string(),
        };
        let response: InitiateResponse = self
            .post_json("/api/multipart/initiate", &request)
            .await?;

        if response.upload_id.is_empty() {
            error!("初始化 multipart 失败：未获取到 uploadId, key={}", key);
            return Err(UploadError::InvalidResponse("未获取到 uploadId".to_string()));
        }

        info!(
            "初始化 multipart 成功: key={}, uploadId={}...",
            key,
            response.upload_id.chars().take(8).collect::<String>()
        );
        Ok(response.upload_id)
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> UploadResult<String> {
        let request = PresignPartRequest {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            part_number,
        };
        let response: PresignPartResponse = self
            .post_json("/api/multipart/presign", &request)
            .await?;

        if response.url.is_empty() {
            return Err(UploadError::InvalidResponse(format!(
                "分片 #{} 未获取到预签名地址",
                part_number
            )));
        }
        Ok(response.url)
    }

    async fn upload_part_bytes(
        &self,
        url: &str,
        part_number: u32,
        data: Bytes,
    ) -> UploadResult<String> {
        let size = data.len();
        debug!("上传分片 #{}: size={}", part_number, size);

        // 预签名地址直连对象存储，不经过应用服务器，也不携带认证头
        let response = self
            .client
            .put(url)
            .timeout(self.upload_timeout(size))
            .header(CONTENT_LENGTH, size)
            .body(data)
            .send()
            .await?;

        // 对象存储的 401/403 表示签名过期或被拒绝，与用户凭证无关
        if !response.status().is_success() {
            let (status, message) = read_error(response).await;
            warn!("分片 #{} 被对象存储拒绝: HTTP {}", part_number, status);
            return Err(UploadError::RemoteRejected { status, message });
        }

        let tag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(normalize_etag)
            .filter(|tag| !tag.is_empty())
            .ok_or(UploadError::Integrity { part_number })?;

        debug!("分片 #{} 上传成功: etag={}", part_number, tag);
        Ok(tag)
    }

    async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<ObjectMetadata> {
        info!("完成 multipart: key={}, parts={}", key, parts.len());
        let request = CompleteRequest {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            parts: parts.to_vec(),
        };
        self.post_json("/api/multipart/complete", &request).await
    }

    async fn abort(&self, key: &str, upload_id: &str) -> UploadResult<()> {
        info!("中止 multipart: key={}", key);
        let request = AbortRequest {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        };
        self.send_authorized(
            self.client
                .post(self.endpoint("/api/multipart/abort"))
                .timeout(self.request_timeout)
                .json(&request),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, CredentialProvider, StaticCredentials};
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{post, put};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn test_store() -> HttpRemoteStore {
        let provider = Arc::new(StaticCredentials::new(Credential::new("t", None)));
        let auth = Arc::new(AuthSession::new(provider, 60));
        HttpRemoteStore::new("https://files.example.com/", auth, 30).unwrap()
    }

    /// 记录 current() 调用次数，用于观察缓存凭证是否被清除
    struct CountingProvider {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        async fn current(&self) -> UploadResult<Credential> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Credential::new("t", None))
        }

        async fn refresh(&self) -> UploadResult<Credential> {
            self.current().await
        }
    }

    /// 在随机端口启动本地服务，返回地址
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn store_for(router: Router) -> (HttpRemoteStore, String, Arc<CountingProvider>) {
        let base_url = serve(router).await;
        let provider = Arc::new(CountingProvider {
            lookups: AtomicUsize::new(0),
        });
        let auth = Arc::new(AuthSession::new(provider.clone(), 60));
        let store = HttpRemoteStore::new(&base_url, auth, 5).unwrap();
        (store, base_url, provider)
    }

    fn recording_progress() -> (ProgressCallback, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let progress: ProgressCallback = Arc::new(move |n| seen_clone.lock().unwrap().push(n));
        (progress, seen)
    }

    #[tokio::test]
    async fn test_empty_payload_produces_no_slices() {
        let calls = Arc::new(AtomicU64::new(0));
        let calls_clone = calls.clone();
        let progress: ProgressCallback = Arc::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        let mut stream = Box::pin(progress_stream(Bytes::new(), progress));
        assert!(stream.next().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let store = test_store();
        assert_eq!(
            store.endpoint("/api/multipart/initiate"),
            "https://files.example.com/api/multipart/initiate"
        );
    }

    #[test]
    fn test_upload_timeout_grows_with_payload() {
        let store = test_store();
        assert_eq!(store.upload_timeout(0), Duration::from_secs(30));
        // 100 MiB 按 32 KB/s 放宽 3200 秒
        assert_eq!(
            store.upload_timeout(100 * 1024 * 1024),
            Duration::from_secs(30 + 3200)
        );
    }

    #[tokio::test]
    async fn test_streamed_progress_stops_short_of_complete() {
        let (progress, seen) = recording_progress();

        let len = STREAM_SLICE_SIZE * 2 + 10;
        let mut stream = Box::pin(progress_stream(Bytes::from(vec![1u8; len]), progress));
        let mut received = 0usize;
        while let Some(item) = stream.next().await {
            received += item.unwrap().len();
        }
        assert_eq!(received, len);

        let cap = len as u64 * 99 / 100;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![STREAM_SLICE_SIZE as u64, cap, cap]
        );
    }

    #[tokio::test]
    async fn test_direct_upload_sends_bearer_and_reports_full_progress() {
        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        let router = Router::new().route(
            "/api/objects",
            put(
                move |Query(query): Query<HashMap<String, String>>,
                      headers: HeaderMap,
                      body: Bytes| {
                    let received = received_clone.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        *received.lock().unwrap() =
                            Some((query.get("key").cloned(), auth, body.len()));
                        StatusCode::OK
                    }
                },
            ),
        );
        let (store, _, _) = store_for(router).await;
        let (progress, seen) = recording_progress();

        store
            .upload_direct("docs/a.txt", Bytes::from(vec![7u8; 1000]), "text/plain", progress)
            .await
            .unwrap();

        assert_eq!(
            *received.lock().unwrap(),
            Some((
                Some("docs/a.txt".to_string()),
                Some("Bearer t".to_string()),
                1000
            ))
        );
        assert_eq!(seen.lock().unwrap().last(), Some(&1000));
    }

    #[tokio::test]
    async fn test_rejected_direct_upload_never_reports_full_progress() {
        let router = Router::new().route(
            "/api/objects",
            put(|_body: Bytes| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "StorageUnavailable" })),
                )
            }),
        );
        let (store, _, _) = store_for(router).await;
        let (progress, seen) = recording_progress();

        let err = store
            .upload_direct("a.bin", Bytes::from(vec![0u8; 1000]), "application/octet-stream", progress)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            UploadError::RemoteRejected {
                status: 500,
                message: "StorageUnavailable".to_string()
            }
        );
        assert!(seen.lock().unwrap().iter().all(|n| *n < 1000));
    }

    #[tokio::test]
    async fn test_part_upload_normalizes_quoted_etag_without_bearer() {
        let router = Router::new().route(
            "/bucket/part",
            put(|headers: HeaderMap, _body: Bytes| async move {
                if headers.contains_key("authorization") {
                    return (StatusCode::BAD_REQUEST, [("etag", "")]);
                }
                (StatusCode::OK, [("etag", "\"9b2cf535f27731c974343645a3985328\"")])
            }),
        );
        let (store, base_url, _) = store_for(router).await;

        let tag = store
            .upload_part_bytes(&format!("{}/bucket/part", base_url), 1, Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(tag, "9b2cf535f27731c974343645a3985328");
    }

    #[tokio::test]
    async fn test_part_upload_without_etag_is_integrity_error() {
        let router = Router::new().route("/bucket/part", put(|_body: Bytes| async { StatusCode::OK }));
        let (store, base_url, _) = store_for(router).await;

        let err = store
            .upload_part_bytes(&format!("{}/bucket/part", base_url), 4, Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert_eq!(err, UploadError::Integrity { part_number: 4 });
    }

    #[tokio::test]
    async fn test_expired_presigned_url_is_rejection_and_keeps_credential() {
        const EXPIRED: &str =
            "<Error><Code>AccessDenied</Code><Message>Request has expired</Message></Error>";
        let router = Router::new()
            .route(
                "/bucket/part",
                put(|_body: Bytes| async { (StatusCode::FORBIDDEN, EXPIRED) }),
            )
            .route(
                "/api/multipart/presign",
                post(|| async { Json(serde_json::json!({ "url": "https://bucket/p1" })) }),
            );
        let (store, base_url, provider) = store_for(router).await;

        // 先发一次认证请求，让凭证进入缓存
        store.presign_part("a.bin", "mpu-1", 1).await.unwrap();
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);

        let err = store
            .upload_part_bytes(&format!("{}/bucket/part", base_url), 2, Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(!err.is_authorization());
        assert_eq!(
            err,
            UploadError::RemoteRejected {
                status: 403,
                message: EXPIRED.to_string()
            }
        );

        // 缓存凭证仍然有效，不会重新获取
        store.presign_part("a.bin", "mpu-1", 3).await.unwrap();
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_app_call_invalidates_cached_credential() {
        let router = Router::new()
            .route(
                "/api/multipart/initiate",
                post(|| async {
                    (
                        StatusCode::UNAUTHORIZED,
                        Json(serde_json::json!({ "message": "token expired" })),
                    )
                }),
            )
            .route(
                "/api/multipart/presign",
                post(|| async { Json(serde_json::json!({ "url": "https://bucket/p1" })) }),
            );
        let (store, _, provider) = store_for(router).await;

        store.presign_part("a.bin", "mpu-1", 1).await.unwrap();
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);

        let err = store.initiate("a.bin", "text/plain").await.unwrap_err();
        assert_eq!(err, UploadError::Authorization("token expired".to_string()));

        // 缓存已清除，下一次请求重新获取凭证
        store.presign_part("a.bin", "mpu-1", 1).await.unwrap();
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_json_error_body_is_surfaced() {
        let router = Router::new().route(
            "/api/multipart/complete",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": "InvalidPart" })),
                )
            }),
        );
        let (store, _, _) = store_for(router).await;

        let parts = vec![CompletedPart {
            part_number: 1,
            completion_tag: "etag-1".to_string(),
        }];
        let err = store.complete("a.bin", "mpu-1", &parts).await.unwrap_err();
        assert_eq!(
            err,
            UploadError::RemoteRejected {
                status: 400,
                message: "InvalidPart".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_upload_id_and_url_are_invalid_responses() {
        let router = Router::new()
            .route(
                "/api/multipart/initiate",
                post(|| async { Json(serde_json::json!({ "uploadId": "" })) }),
            )
            .route(
                "/api/multipart/presign",
                post(|| async { Json(serde_json::json!({ "url": "" })) }),
            );
        let (store, _, _) = store_for(router).await;

        let err = store.initiate("a.bin", "text/plain").await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidResponse(_)));

        let err = store.presign_part("a.bin", "mpu-1", 1).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidResponse(_)));
    }
}
