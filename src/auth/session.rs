// 认证会话
//
// 认证本身由外部协作方负责，这里只负责：
// - 每次请求提供当前有效的 Bearer 凭证
// - 开始传输前，凭证即将过期时主动刷新

use crate::auth::types::Credential;
use crate::uploader::error::{UploadError, UploadResult};
use async_trait::async_trait;
use chrono::Duration;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 凭证提供方（外部认证协作方）
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// 当前凭证
    async fn current(&self) -> UploadResult<Credential>;

    /// 请求刷新凭证
    async fn refresh(&self) -> UploadResult<Credential>;
}

/// 固定凭证（来自配置文件）
///
/// 无法刷新，refresh 返回原凭证
#[derive(Debug)]
pub struct StaticCredentials {
    credential: RwLock<Credential>,
}

impl StaticCredentials {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(credential),
        }
    }

    /// 替换凭证（外部重新登录后调用）
    pub fn replace(&self, credential: Credential) {
        *self.credential.write() = credential;
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn current(&self) -> UploadResult<Credential> {
        Ok(self.credential.read().clone())
    }

    async fn refresh(&self) -> UploadResult<Credential> {
        Ok(self.credential.read().clone())
    }
}

/// 认证会话
pub struct AuthSession {
    provider: Arc<dyn CredentialProvider>,
    /// 提前刷新窗口
    refresh_window: Duration,
    /// 缓存的凭证
    cached: RwLock<Option<Credential>>,
}

impl AuthSession {
    pub fn new(provider: Arc<dyn CredentialProvider>, refresh_window_secs: u64) -> Self {
        Self {
            provider,
            refresh_window: Duration::seconds(refresh_window_secs as i64),
            cached: RwLock::new(None),
        }
    }

    /// 确保凭证在刷新窗口之外
    ///
    /// 在每次传输开始前调用；刷新后仍已过期则返回认证错误
    pub async fn ensure_fresh(&self) -> UploadResult<Credential> {
        let cached = self.cached.read().clone();
        let current = match cached {
            Some(credential) => credential,
            None => self.provider.current().await?,
        };

        if !current.expires_within(self.refresh_window) {
            *self.cached.write() = Some(current.clone());
            return Ok(current);
        }

        info!("凭证即将过期，请求刷新");
        let refreshed = self.provider.refresh().await?;
        if refreshed.is_expired() {
            warn!("刷新后的凭证仍已过期");
            *self.cached.write() = None;
            return Err(UploadError::Authorization("凭证已过期，请重新登录".to_string()));
        }
        if refreshed.expires_within(self.refresh_window) {
            debug!("刷新后的凭证仍在刷新窗口内，继续使用");
        }

        *self.cached.write() = Some(refreshed.clone());
        Ok(refreshed)
    }

    /// 当前请求使用的 Authorization 头
    pub async fn bearer(&self) -> UploadResult<String> {
        let cached = self.cached.read().clone();
        let credential = match cached {
            Some(credential) => credential,
            None => self.ensure_fresh().await?,
        };
        if credential.is_expired() {
            return Err(UploadError::Authorization("凭证已过期，请重新登录".to_string()));
        }
        Ok(credential.bearer())
    }

    /// 清除缓存（收到认证错误后调用）
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 每次刷新签发一个一小时有效的新令牌
    struct RotatingProvider {
        initial: Credential,
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for RotatingProvider {
        async fn current(&self) -> UploadResult<Credential> {
            Ok(self.initial.clone())
        }

        async fn refresh(&self) -> UploadResult<Credential> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential::new(
                format!("refreshed-{}", n),
                Some(Utc::now() + Duration::hours(1)),
            ))
        }
    }

    #[tokio::test]
    async fn test_fresh_credential_is_not_refreshed() {
        let provider = Arc::new(RotatingProvider {
            initial: Credential::new("t0", Some(Utc::now() + Duration::hours(1))),
            refreshes: AtomicUsize::new(0),
        });
        let session = AuthSession::new(provider.clone(), 60);

        let credential = session.ensure_fresh().await.unwrap();
        assert_eq!(credential.token, "t0");
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(session.bearer().await.unwrap(), "Bearer t0");
    }

    #[tokio::test]
    async fn test_expiring_credential_is_refreshed() {
        let provider = Arc::new(RotatingProvider {
            initial: Credential::new("t0", Some(Utc::now() + Duration::seconds(10))),
            refreshes: AtomicUsize::new(0),
        });
        let session = AuthSession::new(provider.clone(), 60);

        let credential = session.ensure_fresh().await.unwrap();
        assert_eq!(credential.token, "refreshed-1");
        assert_eq!(session.bearer().await.unwrap(), "Bearer refreshed-1");

        // 新凭证在窗口之外，不再刷新
        session.ensure_fresh().await.unwrap();
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrefreshable_expired_credential_is_authorization_error() {
        let expired = Credential::new("old", Some(Utc::now() - Duration::seconds(5)));
        let session = AuthSession::new(Arc::new(StaticCredentials::new(expired)), 60);

        let err = session.ensure_fresh().await.unwrap_err();
        assert!(err.is_authorization());
        assert!(session.bearer().await.unwrap_err().is_authorization());
    }

    #[tokio::test]
    async fn test_replaced_static_credential_recovers_session() {
        let expired = Credential::new("old", Some(Utc::now() - Duration::seconds(5)));
        let credentials = Arc::new(StaticCredentials::new(expired));
        let session = AuthSession::new(credentials.clone(), 60);
        assert!(session.ensure_fresh().await.is_err());

        credentials.replace(Credential::new("new", None));
        session.invalidate();
        assert_eq!(session.bearer().await.unwrap(), "Bearer new");
    }
}
