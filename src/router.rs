//! # 路由
//!
//! 把请求路径拆分为 `controller/module/id`，按重路由表改写后交给控制器注册表校验。
//!
//! ```text
//! /controller
//! /controller/module
//! /controller/id
//! /controller/module/id
//! /controller/module/id1/id2/...
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::{debug, info};

use crate::config::Config;
use crate::exception::Exception;
use crate::param::INDEX_CONTROLLER;

/// 路由中的 id 段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteId {
    Int(i64),
    Str(String),
    /// 超过三段时，从第三段起的所有段
    List(Vec<String>),
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteId::Int(i) => write!(f, "{}", i),
            RouteId::Str(s) => write!(f, "{}", s),
            RouteId::List(parts) => write!(f, "{}", parts.join("/")),
        }
    }
}

impl RouteId {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RouteId::Int(i) => Some(*i),
            _ => None,
        }
    }
}

fn numeric(segment: &str) -> Option<i64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

fn non_empty(segment: &str) -> Option<String> {
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

/// 一次请求解析出的路由
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Route {
    pub controller: Option<String>,
    pub module: Option<String>,
    pub id: Option<RouteId>,
    index: bool,
    valid: bool,
}

impl Route {
    pub fn index() -> Self {
        Self {
            controller: Some(INDEX_CONTROLLER.to_string()),
            index: true,
            ..Self::default()
        }
    }

    /// 按路径拆分，不做重路由
    pub fn from_path(path: &str) -> Self {
        let mut route = Self::default();
        route.overlay(path);
        route
    }

    /// 把 `path` 拆分后覆盖到当前路由上，`path` 中没有的字段保持不变
    pub fn overlay(&mut self, path: &str) {
        let path = path.trim_matches('/');
        let segments: Vec<&str> = path.split('/').collect();

        self.controller = non_empty(segments[0]);

        if let Some(second) = segments.get(1) {
            match numeric(second) {
                Some(id) => self.id = Some(RouteId::Int(id)),
                None => self.module = non_empty(second),
            }
        }

        if let Some(third) = segments.get(2) {
            self.id = Some(match numeric(third) {
                Some(id) => RouteId::Int(id),
                None => RouteId::Str(third.to_string()),
            });
        }

        if segments.len() > 3 {
            self.id = Some(RouteId::List(
                segments[2..].iter().map(|s| s.to_string()).collect(),
            ));
        }
    }

    pub fn controller(&self) -> Option<&str> {
        self.controller.as_deref()
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn id(&self) -> Option<&RouteId> {
        self.id.as_ref()
    }

    pub fn is_index(&self) -> bool {
        self.index
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.controller().unwrap_or(""))?;
        if let Some(module) = self.module() {
            write!(f, "/{}", module)?;
        }
        if let Some(id) = self.id() {
            write!(f, "/{}", id)?;
        }
        Ok(())
    }
}

/// 重路由表：`controller/module` 或 `controller` 到新路径的映射。
///
/// 这不是 URL 重写，不支持正则，只做整段匹配。
#[derive(Debug, Clone, Default)]
pub struct RerouteTable {
    routes: BTreeMap<String, String>,
}

impl RerouteTable {
    /// 构造并检查环路。
    ///
    /// 改写只取决于 `(controller, module)`，而表外的模块名与没有模块的效果相同，
    /// 所以表中出现的控制器与 `{无模块} ∪ 表中出现的模块` 的组合覆盖了请求能到达的全部起点。
    pub fn new(routes: BTreeMap<String, String>) -> Result<Self, Exception> {
        let table = Self { routes };
        let mut controllers = BTreeSet::new();
        let mut modules: BTreeSet<Option<String>> = BTreeSet::from([None]);
        for key in table.routes.keys() {
            let route = Route::from_path(key);
            controllers.extend(route.controller);
            modules.insert(route.module);
        }
        for controller in &controllers {
            for module in &modules {
                let mut route = Route {
                    controller: Some(controller.clone()),
                    module: module.clone(),
                    ..Route::default()
                };
                table.apply(&mut route)?;
            }
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// 先找 `controller/module`，再找 `controller`
    pub fn lookup(&self, controller: &str, module: Option<&str>) -> Option<(String, &str)> {
        if let Some(module) = module {
            let key = format!("{}/{}", controller, module);
            if let Some(target) = self.routes.get(&key) {
                return Some((key, target.as_str()));
            }
        }
        self.routes
            .get(controller)
            .map(|target| (controller.to_string(), target.as_str()))
    }

    /// 反复改写路由直到没有匹配项。
    ///
    /// 同一个键可以以不同的模块命中多次；只有 `(controller, module)` 重复出现才是环路。
    pub fn apply(&self, route: &mut Route) -> Result<(), Exception> {
        let mut visited: BTreeSet<(String, Option<String>)> = BTreeSet::new();
        let mut chain: Vec<String> = Vec::new();
        loop {
            let controller = match route.controller() {
                Some(c) => c.to_string(),
                None => return Ok(()),
            };
            let (key, target) = match self.lookup(&controller, route.module()) {
                Some(hit) => hit,
                None => return Ok(()),
            };
            chain.push(key);
            if !visited.insert((controller, route.module.clone())) {
                return Err(Exception::RerouteCycle(chain));
            }
            debug!("重路由 {} -> {}", route, target);
            route.overlay(target);
        }
    }
}

/// 请求路径到路由的解析器
#[derive(Debug, Clone)]
pub struct Router {
    index_root: String,
    reroutes: RerouteTable,
}

impl Router {
    pub fn new(index_root: &str, reroutes: RerouteTable) -> Self {
        let index_root = if index_root.is_empty() {
            "/".to_string()
        } else {
            index_root.to_string()
        };
        Self {
            index_root,
            reroutes,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        let reroutes = RerouteTable::new(config.reroutes().clone())?;
        info!("已载入{}条重路由规则", reroutes.len());
        Ok(Self::new(config.index_root(), reroutes))
    }

    pub fn index_root(&self) -> &str {
        &self.index_root
    }

    pub fn reroutes(&self) -> &RerouteTable {
        &self.reroutes
    }

    /// 与入口根目录比较，两边的结尾斜杠都会被去掉
    pub fn is_index(&self, path: &str) -> bool {
        path.trim_end_matches('/') == self.index_root.trim_end_matches('/')
    }

    /// 解析请求 URI（可带查询串），完成重路由，但不校验
    pub fn route(&self, uri: &str) -> Result<Route, Exception> {
        let path = match uri.split_once('?') {
            Some((path, _)) => path,
            None => uri,
        };
        if self.is_index(path) {
            return Ok(Route::index());
        }
        let relative = path.strip_prefix(self.index_root.as_str()).unwrap_or(path);
        let mut route = Route::from_path(relative);
        self.reroutes.apply(&mut route)?;
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, &str)]) -> Result<RerouteTable, Exception> {
        RerouteTable::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_split_shapes() {
        let route = Route::from_path("users");
        assert_eq!(route.controller(), Some("users"));
        assert_eq!(route.module(), None);

        let route = Route::from_path("users/5");
        assert_eq!(route.module(), None);
        assert_eq!(route.id(), Some(&RouteId::Int(5)));

        let route = Route::from_path("users/edit/7");
        assert_eq!(route.module(), Some("edit"));
        assert_eq!(route.id(), Some(&RouteId::Int(7)));

        let route = Route::from_path("users/edit/abc");
        assert_eq!(route.id(), Some(&RouteId::Str("abc".into())));

        let route = Route::from_path("/users/5/a/b");
        assert_eq!(route.controller(), Some("users"));
        assert_eq!(route.id(), Some(&RouteId::List(vec!["a".into(), "b".into()])));
    }

    #[test]
    fn test_index_detection() {
        let router = Router::new("/", RerouteTable::default());
        assert!(router.route("/").unwrap().is_index());
        assert!(router.route("/?page=2").unwrap().is_index());
        assert!(!router.route("/users").unwrap().is_index());

        let router = Router::new("/app/", RerouteTable::default());
        assert!(router.route("/app").unwrap().is_index());
        assert_eq!(router.route("/app/users/3").unwrap().controller(), Some("users"));
    }

    #[test]
    fn test_query_string_is_ignored() {
        let router = Router::new("/", RerouteTable::default());
        let route = router.route("/auth/login?next=/users").unwrap();
        assert_eq!(route.module(), Some("login"));
    }

    #[test]
    fn test_module_reroute_beats_controller_reroute() {
        let reroutes = table(&[("users/old", "people/new"), ("users", "members")]).unwrap();
        let router = Router::new("/", reroutes);

        let route = router.route("/users/old").unwrap();
        assert_eq!(route.controller(), Some("people"));
        assert_eq!(route.module(), Some("new"));

        let route = router.route("/users/other").unwrap();
        assert_eq!(route.controller(), Some("members"));
        assert_eq!(route.module(), Some("other"));
    }

    #[test]
    fn test_chained_reroutes() {
        let reroutes = table(&[("update", "users/update"), ("users/update", "profile/update")]).unwrap();
        let route = Router::new("/", reroutes).route("/update").unwrap();
        assert_eq!(route.to_string(), "profile/update");
    }

    #[test]
    fn test_cycle_rejected_at_load() {
        match table(&[("a", "b"), ("b", "a")]) {
            Err(Exception::RerouteCycle(chain)) => assert!(chain.len() >= 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(table(&[("self", "self")]).is_err());
    }

    #[test]
    fn test_key_hit_twice_with_different_module_terminates() {
        let reroutes = table(&[("a", "b"), ("b/m", "a/n")]).unwrap();
        let route = Router::new("/", reroutes).route("/a/m").unwrap();
        assert_eq!(route.to_string(), "b/n");
    }

    #[test]
    fn test_cycle_reachable_only_through_module_rejected_at_load() {
        // 只有带模块 m 的请求会进入 a/m -> b/m -> a/m
        assert!(matches!(
            table(&[("a/m", "b"), ("b", "a")]),
            Err(Exception::RerouteCycle(_))
        ));
    }

    #[test]
    fn test_route_display() {
        let route = Route::from_path("users/edit/7");
        assert_eq!(route.to_string(), "users/edit/7");
    }
}
