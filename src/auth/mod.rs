// 认证模块
//
// 凭证签发与登录由外部负责，这里只定义凭证来源和刷新策略

pub mod session;
pub mod types;

pub use session::{AuthSession, CredentialProvider, StaticCredentials};
pub use types::Credential;
