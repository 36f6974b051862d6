//! # 用户与会话
//!
//! 会话存储与用户目录都是外部协作者，框架只依赖 [`SessionStore`] 与 [`UserDirectory`] 两个 trait。
//! 这里提供的内存实现仅用于开发和测试。

use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::hash::{BuildHasher, Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use log::debug;
use uuid::Uuid;

use crate::exception::Exception;
use crate::template::Template;

/// 管理员权限名
pub const ADMIN_PERMISSION: &str = "admin_access";

/// 默认角色
pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    id: i64,
    email: String,
    role: String,
    permissions: BTreeSet<String>,
    logged_in: bool,
}

impl Default for User {
    fn default() -> Self {
        Self::guest()
    }
}

impl User {
    /// 未登录的访客
    pub fn guest() -> Self {
        Self {
            id: 0,
            email: String::new(),
            role: String::new(),
            permissions: BTreeSet::new(),
            logged_in: false,
        }
    }

    pub fn new(id: i64, email: &str, role: &str) -> Self {
        Self {
            id,
            email: email.to_string(),
            role: role.to_string(),
            permissions: BTreeSet::new(),
            logged_in: false,
        }
    }

    pub fn with_permission(mut self, permission: &str) -> Self {
        self.permissions.insert(permission.to_string());
        self
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_admin(&self) -> bool {
        self.has_permission(ADMIN_PERMISSION)
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in && self.id > 0
    }

    pub(crate) fn set_logged_in(&mut self, logged_in: bool) {
        self.logged_in = logged_in;
    }

    /// 写入 `LOGGED_IN`、`USER_ID`、`USER_EMAIL`、`USER_IS_ADMIN`、`USER_ROLE`
    pub fn set_to_template(&self, template: &mut Template) {
        template.set("LOGGED_IN", self.is_logged_in());
        template.set("USER_ID", self.id);
        template.set("USER_EMAIL", self.email.as_str());
        template.set("USER_IS_ADMIN", self.is_admin());
        template.set("USER_ROLE", self.role.as_str());
    }
}

/// 会话令牌到用户 id 的映射，带有效期
#[cfg_attr(test, mockall::automock)]
pub trait SessionStore: Send {
    /// 令牌在有效期内时返回用户 id，过期的会话被移除
    fn current(&mut self, token: &str, now: DateTime<Utc>) -> Result<Option<i64>, Exception>;

    /// 刷新或新建会话，返回使用的令牌
    fn update(
        &mut self,
        token: Option<String>,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<String, Exception>;

    fn remove(&mut self, token: &str) -> Result<(), Exception>;
}

/// 用户查询与创建。密码散列由实现方负责。
#[cfg_attr(test, mockall::automock)]
pub trait UserDirectory: Send {
    fn find_by_id(&self, id: i64) -> Result<Option<User>, Exception>;

    fn find_by_email(&self, email: &str) -> Result<Option<User>, Exception>;

    fn create(&mut self, email: &str, password: &str) -> Result<User, Exception>;

    fn verify_password(&self, user: &User, password: &str) -> Result<bool, Exception>;
}

#[derive(Debug, Clone)]
struct Session {
    user_id: i64,
    updated: DateTime<Utc>,
}

/// 内存会话存储
pub struct MemorySessionStore {
    sessions: HashMap<String, Session>,
    max_length: Duration,
}

impl MemorySessionStore {
    pub fn new(max_length_hours: i64) -> Self {
        Self {
            sessions: HashMap::new(),
            max_length: Duration::hours(max_length_hours),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 32 位十六进制的随机令牌
    fn new_token() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

impl SessionStore for MemorySessionStore {
    fn current(&mut self, token: &str, now: DateTime<Utc>) -> Result<Option<i64>, Exception> {
        let expired = match self.sessions.get(token) {
            Some(session) if now - session.updated <= self.max_length => {
                return Ok(Some(session.user_id))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!("会话{}已过期", token);
            self.sessions.remove(token);
        }
        Ok(None)
    }

    fn update(
        &mut self,
        token: Option<String>,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<String, Exception> {
        let token = match token {
            Some(t) if self.sessions.contains_key(&t) => t,
            _ => Self::new_token(),
        };
        self.sessions.insert(
            token.clone(),
            Session {
                user_id,
                updated: now,
            },
        );
        Ok(token)
    }

    fn remove(&mut self, token: &str) -> Result<(), Exception> {
        self.sessions.remove(token);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password_hash: u64,
}

/// 内存用户目录。密码以带随机种子的散列保存，仅供开发使用。
pub struct MemoryUserDirectory {
    accounts: Vec<Account>,
    hasher: RandomState,
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            accounts: Vec::new(),
            hasher: RandomState::new(),
        }
    }

    /// 直接添加一个已有账户
    pub fn insert(&mut self, user: User, password: &str) {
        let password_hash = self.hash(password);
        self.accounts.push(Account {
            user,
            password_hash,
        });
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn hash(&self, password: &str) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        password.hash(&mut hasher);
        hasher.finish()
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn find_by_id(&self, id: i64) -> Result<Option<User>, Exception> {
        Ok(self
            .accounts
            .iter()
            .find(|a| a.user.id() == id)
            .map(|a| a.user.clone()))
    }

    fn find_by_email(&self, email: &str) -> Result<Option<User>, Exception> {
        Ok(self
            .accounts
            .iter()
            .find(|a| a.user.email().eq_ignore_ascii_case(email))
            .map(|a| a.user.clone()))
    }

    fn create(&mut self, email: &str, password: &str) -> Result<User, Exception> {
        let id = self.accounts.iter().map(|a| a.user.id()).max().unwrap_or(0) + 1;
        let user = User::new(id, email, DEFAULT_ROLE);
        self.insert(user.clone(), password);
        Ok(user)
    }

    fn verify_password(&self, user: &User, password: &str) -> Result<bool, Exception> {
        let hash = self.hash(password);
        Ok(self
            .accounts
            .iter()
            .any(|a| a.user.id() == user.id() && a.password_hash == hash))
    }
}
