// 认证模块数据类型定义

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Bearer 凭证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// 访问令牌
    pub token: String,
    /// 过期时间（None 表示不过期）
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// 是否已过期
    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }

    /// 是否将在 `window` 内过期
    pub fn expires_within(&self, window: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Utc::now() <= window,
            None => false,
        }
    }

    /// Authorization 头的值
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}
