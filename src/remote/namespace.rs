// 远端 key 命名空间
//
// 逻辑 key（目录 + 文件名）交给命名空间转换为远端实际 key，
// 上传器本身把 key 当作不透明字符串

/// 目标 key 解析
pub trait KeyNamespace: Send + Sync {
    /// 逻辑 key -> 远端 key
    fn namespaced(&self, logical_key: &str) -> String;
}

/// 前缀命名空间（如按账户划分的 `u123/`）
#[derive(Debug, Clone, Default)]
pub struct PrefixNamespace {
    prefix: String,
}

impl PrefixNamespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { prefix }
    }
}

impl KeyNamespace for PrefixNamespace {
    fn namespaced(&self, logical_key: &str) -> String {
        let key = logical_key.trim_start_matches('/');
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}
