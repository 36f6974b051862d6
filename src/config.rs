use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use core::str;
use log::{error, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::prelude::*;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    views_dir: String,
    port: u16,
    worker_threads: usize,
    cache_size: usize,
    local: bool,
    #[serde(default = "default_index_root")]
    index_root: String,
    // 秒。小于等于 0 时关闭解析缓存
    #[serde(default = "default_template_cache_time")]
    template_cache_time: i64,
    #[serde(default)]
    debug: bool,
    #[serde(default = "default_safe_error_message")]
    safe_error_message: String,
    #[serde(default = "default_session_length_hours")]
    session_length_hours: i64,
    #[serde(default)]
    reroutes: BTreeMap<String, String>,
    #[serde(default)]
    constants: BTreeMap<String, String>,
}

fn default_index_root() -> String {
    "/".to_string()
}

fn default_template_cache_time() -> i64 {
    300 // 5 分钟
}

fn default_safe_error_message() -> String {
    "Apologies, there has been an application error that has been logged.".to_string()
}

fn default_session_length_hours() -> i64 {
    24 * 7
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            views_dir: "views".to_string(),
            port: 7878,
            worker_threads: 0,
            cache_size: 64,
            local: true,
            index_root: default_index_root(),
            template_cache_time: default_template_cache_time(),
            debug: false,
            safe_error_message: default_safe_error_message(),
            session_length_hours: default_session_length_hours(),
            reroutes: BTreeMap::new(),
            constants: BTreeMap::new(),
        }
    }

    pub fn from_toml(filename: &str) -> Self {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => panic!("no such file {} exception:{}", filename, e),
        };
        let mut str_val = String::new();
        match file.read_to_string(&mut str_val) {
            Ok(s) => s,
            Err(e) => panic!("Error Reading file: {}", e),
        };
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(str_val: &str) -> Self {
        let mut raw_config = match toml::from_str(str_val) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.cache_size == 0 {
            warn!("cache_size被设置为0，但目前尚不支持禁用内存模板缓存，因此该值将被改为64。");
            raw_config.cache_size = 64;
        }
        if raw_config.debug && raw_config.template_cache_time > 0 {
            warn!("调试模式已开启，模板解析缓存将被禁用");
            raw_config.template_cache_time = 0;
        }
        raw_config
    }
}

impl Config {
    pub fn views_dir(&self) -> &str {
        &self.views_dir
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn index_root(&self) -> &str {
        &self.index_root
    }

    pub fn template_cache_time(&self) -> i64 {
        self.template_cache_time
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn safe_error_message(&self) -> &str {
        &self.safe_error_message
    }

    pub fn session_length_hours(&self) -> i64 {
        self.session_length_hours
    }

    pub fn reroutes(&self) -> &BTreeMap<String, String> {
        &self.reroutes
    }

    pub fn constants(&self) -> &BTreeMap<String, String> {
        &self.constants
    }
}

impl Config {
    pub fn with_views_dir(mut self, dir: &str) -> Self {
        self.views_dir = dir.to_string();
        self
    }

    pub fn with_template_cache_time(mut self, seconds: i64) -> Self {
        self.template_cache_time = seconds;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_reroute(mut self, from: &str, to: &str) -> Self {
        self.reroutes.insert(from.to_string(), to.to_string());
        self
    }

    pub fn with_constant(mut self, name: &str, value: &str) -> Self {
        self.constants.insert(name.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let text = r#"
            views_dir = "app/views"
            port = 8080
            worker_threads = 2
            cache_size = 10
            local = false
            index_root = "/app/"
            template_cache_time = 600
            safe_error_message = "oops"

            [reroutes]
            login = "auth/login"
            "profile/update" = "users/update"

            [constants]
            SITE_NAME = "Demo"
        "#;
        let config = Config::from_toml_str(text);
        assert_eq!(config.views_dir(), "app/views");
        assert_eq!(config.port(), 8080);
        assert_eq!(config.index_root(), "/app/");
        assert_eq!(config.template_cache_time(), 600);
        assert_eq!(config.safe_error_message(), "oops");
        assert_eq!(config.reroutes().get("login").map(|s| s.as_str()), Some("auth/login"));
        assert_eq!(config.constants().get("SITE_NAME").map(|s| s.as_str()), Some("Demo"));
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let text = r#"
            views_dir = "views"
            port = 7878
            worker_threads = 0
            cache_size = 0
            local = true
        "#;
        let config = Config::from_toml_str(text);
        assert!(config.worker_threads() > 0);
        assert_eq!(config.cache_size(), 64);
        assert_eq!(config.index_root(), "/");
        assert_eq!(config.template_cache_time(), 300);
        assert!(config.reroutes().is_empty());
    }

    #[test]
    fn test_debug_disables_parse_cache() {
        let text = r#"
            views_dir = "views"
            port = 7878
            worker_threads = 1
            cache_size = 4
            local = true
            debug = true
        "#;
        let config = Config::from_toml_str(text);
        assert!(config.debug());
        assert_eq!(config.template_cache_time(), 0);
    }

    #[test]
    fn test_invalid_toml_falls_back_to_defaults() {
        let config = Config::from_toml_str("this is = = not toml");
        assert_eq!(config.port(), 7878);
        assert_eq!(config.views_dir(), "views");
    }
}
