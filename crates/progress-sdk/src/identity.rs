//! 调用方身份解析
//!
//! 已登录用户使用账号 ID；未登录用户在会话内生成一次随机访客 ID，
//! 此后该会话的所有持久化键都复用它。身份仍在加载时本次追踪跳过。

use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::TrackingError;

/// 身份提供方给出的当前身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIdentity {
    /// 已登录
    Authenticated(String),
    /// 未登录（访客）
    Anonymous,
    /// 尚未确定
    Loading,
}

/// 身份提供方（由宿主实现，例如桥接登录态）
pub trait IdentityProvider: Send + Sync + std::fmt::Debug {
    fn current_identity(&self) -> UserIdentity;
}

/// 可手动切换的身份提供方
#[derive(Debug)]
pub struct StaticIdentityProvider {
    identity: RwLock<UserIdentity>,
}

impl StaticIdentityProvider {
    pub fn new(identity: UserIdentity) -> Self {
        Self {
            identity: RwLock::new(identity),
        }
    }

    pub fn set(&self, identity: UserIdentity) {
        *self.identity.write() = identity;
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn current_identity(&self) -> UserIdentity {
        self.identity.read().clone()
    }
}

/// 解析后的身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub id: String,
    pub is_guest: bool,
}

#[derive(Debug)]
pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
    guest_id: OnceLock<String>,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            guest_id: OnceLock::new(),
        }
    }

    pub fn resolve(&self) -> Result<ResolvedIdentity, TrackingError> {
        match self.provider.current_identity() {
            UserIdentity::Authenticated(id) if !id.trim().is_empty() => Ok(ResolvedIdentity {
                id,
                is_guest: false,
            }),
            UserIdentity::Authenticated(_) | UserIdentity::Loading => {
                Err(TrackingError::MissingIdentity)
            }
            UserIdentity::Anonymous => Ok(ResolvedIdentity {
                id: self.guest_id().to_string(),
                is_guest: true,
            }),
        }
    }

    /// 本会话的访客 ID（首次调用时生成）
    pub fn guest_id(&self) -> &str {
        self.guest_id.get_or_init(|| {
            let id = format!("guest_{}", Uuid::new_v4().simple());
            debug!("生成访客 ID: {}", id);
            id
        })
    }
}
