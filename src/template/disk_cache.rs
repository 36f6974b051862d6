//! 解析缓存：把指令树以 JSON 形式持久化到 `<views>/cached/` 目录。
//!
//! 新鲜度规则：
//! - 源文件比缓存新时，缓存仍可在 `max_age` 秒内继续使用，超过后删除缓存并视为未命中；
//! - 源文件不比缓存新（或源文件已经不存在）时，缓存一直有效。
//!
//! 写入与删除都是尽力而为，失败只记录警告。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, warn};

use super::ast::Node;
use crate::param::{CACHE_DIR_NAME, CACHE_FILE_PREFIX};

#[derive(Debug, Clone)]
pub struct ParseCache {
    dir: PathBuf,
    max_age: i64,
}

impl ParseCache {
    pub fn new(views_dir: &Path, max_age: i64) -> Self {
        Self {
            dir: views_dir.join(CACHE_DIR_NAME),
            max_age,
        }
    }

    /// `max_age` 不为正数时不读也不写
    pub fn enabled(&self) -> bool {
        self.max_age > 0
    }

    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 缓存文件名：前缀加上把路径分隔符替换为 `_` 的模板名
    pub fn file_name(name: &str) -> String {
        format!("{}{}", CACHE_FILE_PREFIX, name.replace(['/', '\\'], "_"))
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(Self::file_name(name))
    }

    /// 查找 `name` 的解析结果，`source` 为模板源文件路径。
    pub fn lookup(&self, name: &str, source: &Path) -> Option<Vec<Node>> {
        if !self.enabled() {
            return None;
        }
        let path = self.path_for(name);
        let cached_at = fs::metadata(&path).and_then(|m| m.modified()).ok()?;

        if let Ok(source_modified) = fs::metadata(source).and_then(|m| m.modified()) {
            if source_modified > cached_at {
                let age = SystemTime::now()
                    .duration_since(cached_at)
                    .unwrap_or_default()
                    .as_secs();
                if age >= self.max_age as u64 {
                    debug!("模板{}的解析缓存已过期，删除", name);
                    self.remove(name);
                    return None;
                }
            }
        }

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!("无法读取解析缓存{}：{}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(nodes) => {
                debug!("模板{}命中解析缓存", name);
                Some(nodes)
            }
            Err(e) => {
                warn!("解析缓存{}已损坏，删除：{}", path.display(), e);
                self.remove(name);
                None
            }
        }
    }

    /// 缓存文件存在且不比源文件旧
    pub fn is_current(&self, name: &str, source: &Path) -> bool {
        let cached_at = match fs::metadata(self.path_for(name)).and_then(|m| m.modified()) {
            Ok(time) => time,
            Err(_) => return false,
        };
        match fs::metadata(source).and_then(|m| m.modified()) {
            Ok(source_modified) => source_modified <= cached_at,
            Err(_) => true,
        }
    }

    pub fn store(&self, name: &str, nodes: &[Node]) {
        if !self.enabled() {
            return;
        }
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("无法创建缓存目录{}：{}", self.dir.display(), e);
            return;
        }
        let path = self.path_for(name);
        let text = match serde_json::to_string(nodes) {
            Ok(text) => text,
            Err(e) => {
                warn!("无法序列化模板{}的解析结果：{}", name, e);
                return;
            }
        };
        if let Err(e) = fs::write(&path, text) {
            warn!("无法写入解析缓存{}：{}", path.display(), e);
        }
    }

    pub fn remove(&self, name: &str) {
        let path = self.path_for(name);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("无法删除解析缓存{}：{}", path.display(), e);
            }
        }
    }
}
