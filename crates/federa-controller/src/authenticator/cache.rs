//! 认证器缓存
//!
//! 验证通过的认证器按 `(kind, name)` 缓存，供令牌认证路径使用。
//! 未就绪或已删除的资源会被移出缓存。

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::jwt::JwtAuthenticator;
use super::webhook::WebhookAuthenticator;

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// 资源类型
    pub kind: &'static str,
    /// 资源名称
    pub name: String,
}

impl CacheKey {
    /// 创建缓存键
    pub fn new(kind: &'static str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
        }
    }
}

/// 缓存中的认证器
#[derive(Debug, Clone)]
pub enum CachedAuthenticator {
    /// JWT 认证器
    Jwt(Arc<JwtAuthenticator>),
    /// Webhook 认证器
    Webhook(Arc<WebhookAuthenticator>),
}

/// 认证器缓存
#[derive(Debug, Default)]
pub struct AuthenticatorCache {
    entries: RwLock<HashMap<CacheKey, CachedAuthenticator>>,
}

impl AuthenticatorCache {
    /// 创建空缓存
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入或替换一个认证器
    pub async fn insert(&self, key: CacheKey, authenticator: CachedAuthenticator) {
        debug!(kind = key.kind, name = %key.name, "缓存认证器");
        self.entries.write().await.insert(key, authenticator);
    }

    /// 移除一个认证器，返回是否存在
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            debug!(kind = key.kind, name = %key.name, "移除缓存的认证器");
        }
        removed
    }

    /// 查找认证器
    pub async fn get(&self, key: &CacheKey) -> Option<CachedAuthenticator> {
        self.entries.read().await.get(key).cloned()
    }

    /// 缓存中的全部键
    pub async fn keys(&self) -> Vec<CacheKey> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// 缓存大小
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// 缓存是否为空
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
