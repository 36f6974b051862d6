//! 模板的加载与存放。
//!
//! 加载顺序：进程内的原始内容缓存（按源文件修改时间校验）→ 解析缓存 → 视图目录中的源文件。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use bytes::Bytes;
use log::{debug, warn};

use super::ast::Node;
use super::disk_cache::ParseCache;
use super::parser::SourceLoader;
use super::value::{Context, Value, Vars};
use crate::cache::ContentCache;
use crate::config::Config;
use crate::exception::Exception;

/// 模板系统的共享环境：视图目录、两级缓存与常量表。
#[derive(Clone)]
pub struct TemplateEnv {
    views_dir: PathBuf,
    parse_cache: ParseCache,
    contents: Arc<Mutex<ContentCache>>,
    constants: BTreeMap<String, String>,
}

impl TemplateEnv {
    pub fn new<P: Into<PathBuf>>(views_dir: P, max_cache_age: i64, capacity: usize) -> Self {
        let views_dir = views_dir.into();
        let parse_cache = ParseCache::new(&views_dir, max_cache_age);
        if parse_cache.enabled() {
            if let Err(e) = fs::create_dir_all(parse_cache.dir()) {
                warn!("无法创建缓存目录{}：{}", parse_cache.dir().display(), e);
            }
        }
        Self {
            views_dir,
            parse_cache,
            contents: Arc::new(Mutex::new(ContentCache::from_capacity(capacity))),
            constants: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.views_dir(),
            config.template_cache_time(),
            config.cache_size(),
        )
        .with_constants(config.constants().clone())
    }

    pub fn with_constants(mut self, constants: BTreeMap<String, String>) -> Self {
        self.constants = constants;
        self
    }

    pub fn set_constant(&mut self, name: &str, value: &str) {
        self.constants.insert(name.to_string(), value.to_string());
    }

    pub fn constants(&self) -> &BTreeMap<String, String> {
        &self.constants
    }

    pub fn views_dir(&self) -> &Path {
        &self.views_dir
    }

    pub fn parse_cache(&self) -> &ParseCache {
        &self.parse_cache
    }

    /// 模板名对应的源文件路径。绝对路径和包含 `..` 的名称会被拒绝。
    pub fn source_path(&self, name: &str) -> Result<PathBuf, Exception> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return Err(Exception::InvalidPath);
        }
        Ok(self.views_dir.join(relative))
    }

    fn lock_contents(&self) -> MutexGuard<'_, ContentCache> {
        match self.contents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("模板内容缓存的锁已被污染，继续使用");
                poisoned.into_inner()
            }
        }
    }

    /// 内存中仍然有效的原始内容
    pub(crate) fn cached_source(&self, name: &str) -> Option<String> {
        let path = self.source_path(name).ok()?;
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        let mut contents = self.lock_contents();
        let bytes = contents.find(name, modified)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// 从视图目录读取源文件并放入内存缓存。文件不存在时返回 `Ok(None)`。
    pub(crate) fn read_source(&self, name: &str) -> Result<Option<String>, Exception> {
        let path = self.source_path(name)?;
        let metadata = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            _ => {
                self.lock_contents().invalidate(name);
                return Ok(None);
            }
        };
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("无法读取模板{}：{}", path.display(), e);
                return Ok(None);
            }
        };
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        self.lock_contents()
            .push(name, Bytes::from(bytes), modified);
        debug!("从文件读入模板{}", name);
        Ok(Some(content))
    }
}

impl SourceLoader for TemplateEnv {
    fn load_source(&self, name: &str) -> Result<String, Exception> {
        if let Some(content) = self.cached_source(name) {
            return Ok(content);
        }
        match self.read_source(name)? {
            Some(content) => Ok(content),
            None => Err(Exception::TemplateNotFound(name.to_string())),
        }
    }
}

/// 一个模板单元：文件名、原始内容、解析结果、输出以及变量上下文。
#[derive(Debug, Clone, Default)]
pub struct Template {
    filename: String,
    content: String,
    parsed: Option<Vec<Node>>,
    compiled: Option<String>,
    loaded: bool,
    /// 内容来自视图目录中的文件
    from_views: bool,
    context: Context,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建并加载
    pub fn open(env: &TemplateEnv, name: &str) -> Result<Self, Exception> {
        let mut template = Self::new();
        template.load(env, name)?;
        Ok(template)
    }

    /// 直接使用给定源码，不经过任何缓存
    pub fn from_source(name: &str, source: &str) -> Self {
        Self {
            filename: name.to_string(),
            content: source.to_string(),
            loaded: true,
            ..Self::default()
        }
    }

    pub fn load(&mut self, env: &TemplateEnv, name: &str) -> Result<(), Exception> {
        let path = env.source_path(name)?;
        self.filename = name.to_string();
        self.content.clear();
        self.parsed = None;
        self.compiled = None;
        self.loaded = false;
        self.from_views = false;

        if let Some(content) = env.cached_source(name) {
            debug!("模板{}命中内容缓存", name);
            self.content = content;
        } else if let Some(nodes) = env.parse_cache().lookup(name, &path) {
            self.parsed = Some(nodes);
        } else if let Some(content) = env.read_source(name)? {
            self.content = content;
        } else {
            return Err(Exception::TemplateNotFound(name.to_string()));
        }
        self.loaded = true;
        self.from_views = true;
        Ok(())
    }

    pub fn set<V: Into<Value>>(&mut self, name: &str, value: V) {
        self.context.set(name, value.into());
        self.compiled = None;
    }

    pub fn set_many<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in pairs {
            self.set(name.as_ref(), value);
        }
    }

    /// 向循环追加一行，见 [`Context::set_loop`]
    pub fn set_loop(&mut self, path: &str, row: Vars) -> bool {
        self.compiled = None;
        self.context.set_loop(path, row)
    }

    pub fn set_overwrite(&mut self, overwrite: bool) {
        self.context.set_overwrite(overwrite);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.context.get(name)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn parsed(&self) -> Option<&Vec<Node>> {
        self.parsed.as_ref()
    }

    pub fn compiled(&self) -> Option<&str> {
        self.compiled.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_from_views(&self) -> bool {
        self.from_views
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed.is_some()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    pub(crate) fn set_parsed(&mut self, nodes: Vec<Node>) {
        self.parsed = Some(nodes);
    }

    pub(crate) fn set_compiled(&mut self, output: String) {
        self.compiled = Some(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env_with(files: &[(&str, &str)], max_age: i64) -> (TempDir, TemplateEnv) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let env = TemplateEnv::new(dir.path(), max_age, 8);
        (dir, env)
    }

    #[test]
    fn test_rejects_escaping_names() {
        let (_dir, env) = env_with(&[], 0);
        assert_eq!(env.source_path("../secret"), Err(Exception::InvalidPath));
        assert_eq!(env.source_path("/etc/passwd"), Err(Exception::InvalidPath));
        assert_eq!(env.source_path(""), Err(Exception::InvalidPath));
        assert!(env.source_path("auth/login.html").is_ok());
    }

    #[test]
    fn test_load_reads_file_then_memory() {
        let (_dir, env) = env_with(&[("page.html", "hi {NAME}")], 0);
        let template = Template::open(&env, "page.html").unwrap();
        assert!(template.is_loaded());
        assert_eq!(template.content(), "hi {NAME}");
        assert_eq!(env.cached_source("page.html").as_deref(), Some("hi {NAME}"));
    }

    #[test]
    fn test_missing_template() {
        let (_dir, env) = env_with(&[], 0);
        assert_eq!(
            Template::open(&env, "none.html").err(),
            Some(Exception::TemplateNotFound("none.html".into()))
        );
    }

    #[test]
    fn test_parse_cache_serves_deleted_source() {
        let (dir, env) = env_with(&[("page.html", "x")], 300);
        let nodes = vec![Node::Text("cached".into())];
        env.parse_cache().store("page.html", &nodes);
        fs::remove_file(dir.path().join("page.html")).unwrap();

        let template = Template::open(&env, "page.html").unwrap();
        assert_eq!(template.parsed(), Some(&nodes));
    }

    #[test]
    fn test_set_respects_overwrite_flag() {
        let mut template = Template::from_source("t.html", "");
        template.set("NAME", "first");
        template.set_overwrite(false);
        template.set("NAME", "second");
        assert_eq!(template.get("NAME"), Some(&Value::from("first")));
        template.set_many([("A1", 1), ("B1", 2)]);
        assert_eq!(template.get("B1"), Some(&Value::Int(2)));
    }
}
