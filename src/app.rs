//! # 应用上下文
//!
//! [`AppContext`] 保存进程内共享的状态：配置、模板环境、路由、控制器注册表、会话与用户存储。
//! 每个请求创建一个 [`RequestContext`]，处理完毕即丢弃。

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, info, warn};

use crate::auth::{MemorySessionStore, MemoryUserDirectory, SessionStore, User, UserDirectory};
use crate::config::Config;
use crate::controller::{ControllerRegistry, View};
use crate::error_handler;
use crate::exception::Exception;
use crate::param::{HttpRequestMethod, ALLOWED_METHODS, SESSION_COOKIE};
use crate::request::Request;
use crate::response::Response;
use crate::router::{Route, Router};
use crate::template::{Compiler, Template, TemplateEnv};

/// 404 页模板
pub const NOT_FOUND_TEMPLATE: &str = "error/404.html";

fn lock<'m, T: ?Sized>(mutex: &'m Mutex<Box<T>>, what: &str) -> MutexGuard<'m, Box<T>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{}的锁已中毒，继续使用其中的数据", what);
            poisoned.into_inner()
        }
    }
}

pub struct AppContext {
    config: Config,
    templates: TemplateEnv,
    router: Router,
    registry: ControllerRegistry,
    sessions: Mutex<Box<dyn SessionStore>>,
    users: Mutex<Box<dyn UserDirectory>>,
}

impl AppContext {
    pub fn new(
        config: Config,
        registry: ControllerRegistry,
        sessions: Box<dyn SessionStore>,
        users: Box<dyn UserDirectory>,
    ) -> Result<Self, Exception> {
        let templates = TemplateEnv::from_config(&config);
        let router = Router::from_config(&config)?;
        info!(
            "应用初始化完成，视图目录：{}，共{}个控制器",
            config.views_dir(),
            registry.len()
        );
        Ok(Self {
            config,
            templates,
            router,
            registry,
            sessions: Mutex::new(sessions),
            users: Mutex::new(users),
        })
    }

    /// 内置控制器加内存存储
    pub fn development(config: Config) -> Result<Self, Exception> {
        let sessions = MemorySessionStore::new(config.session_length_hours());
        Self::new(
            config,
            ControllerRegistry::with_defaults()?,
            Box::new(sessions),
            Box::new(MemoryUserDirectory::new()),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn templates(&self) -> &TemplateEnv {
        &self.templates
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> MutexGuard<'_, Box<dyn SessionStore>> {
        lock(&self.sessions, "会话存储")
    }

    pub fn users(&self) -> MutexGuard<'_, Box<dyn UserDirectory>> {
        lock(&self.users, "用户目录")
    }

    /// 入口根目录下的链接
    pub fn link(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.router.index_root().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// 处理一个请求，所有错误都在这里转换为响应
    pub fn handle(&self, request: &Request, id: u128) -> Response {
        if !ALLOWED_METHODS.contains(&request.method()) {
            debug!("[ID{}]不允许的请求方法{}", id, request.method());
            return Response::response_405(request, id);
        }
        match self.dispatch(request, id) {
            Ok((view, cookies)) => {
                let response = match view {
                    View::Page { status, html } => Response::from_html(&html, status, request, id),
                    View::Redirect(location) => Response::redirect(&location, id),
                };
                cookies
                    .into_iter()
                    .fold(response, |response, cookie| response.with_cookie(cookie))
            }
            Err(e) => error_handler::handle(&e, self, request, id),
        }
    }

    fn dispatch(&self, request: &Request, id: u128) -> Result<(View, Vec<String>), Exception> {
        let mut route = self.router.route(request.path())?;
        if !self.registry.validate(&mut route) {
            info!("[ID{}]路由{}无效", id, route);
            return Ok((self.not_found(id)?, Vec::new()));
        }
        debug!("[ID{}]分派到{}", id, route);
        let mut ctx = RequestContext::new(self, request, route, id)?;
        let view = self.registry.dispatch(&mut ctx)?;
        Ok((view, ctx.into_cookies()))
    }

    fn not_found(&self, id: u128) -> Result<View, Exception> {
        let mut template = match Template::open(&self.templates, NOT_FOUND_TEMPLATE) {
            Ok(t) => t,
            Err(Exception::TemplateNotFound(_)) => {
                debug!("[ID{}]没有404模板，使用内置页面", id);
                let html = crate::util::HtmlBuilder::from_status_code(404, None).build();
                return Ok(View::Page { status: 404, html });
            }
            Err(e) => return Err(e),
        };
        template.set("PAGE_TITLE", "Not Found");
        let html = Compiler::new(&self.templates).compile(&mut template)?;
        Ok(View::Page { status: 404, html })
    }
}

/// 单个请求的状态
pub struct RequestContext<'a> {
    app: &'a AppContext,
    request: &'a Request,
    route: Route,
    user: User,
    session: Option<String>,
    cookies: Vec<String>,
    id: u128,
}

impl<'a> RequestContext<'a> {
    /// 根据 `SESSION_ID` Cookie 还原当前用户
    pub fn new(
        app: &'a AppContext,
        request: &'a Request,
        route: Route,
        id: u128,
    ) -> Result<Self, Exception> {
        let mut ctx = Self {
            app,
            request,
            route,
            user: User::guest(),
            session: None,
            cookies: Vec::new(),
            id,
        };
        if let Some(token) = request.cookie(SESSION_COOKIE) {
            let user_id = app.sessions().current(token, Utc::now())?;
            if let Some(user_id) = user_id {
                if let Some(mut user) = app.users().find_by_id(user_id)? {
                    user.set_logged_in(true);
                    debug!("[ID{}]会话对应用户{}", id, user_id);
                    ctx.user = user;
                }
                ctx.session = Some(token.to_string());
            }
        }
        Ok(ctx)
    }

    pub fn app(&self) -> &'a AppContext {
        self.app
    }

    pub fn request(&self) -> &'a Request {
        self.request
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    pub fn into_cookies(self) -> Vec<String> {
        self.cookies
    }

    /// 建立或刷新会话，并通过 Cookie 下发令牌
    pub fn log_in(&mut self, mut user: User) -> Result<(), Exception> {
        let token = self
            .app
            .sessions()
            .update(self.session.take(), user.id(), Utc::now())?;
        let max_age = self.app.config().session_length_hours() * 3600;
        self.cookies.push(format!(
            "{}={}; Path=/; HttpOnly; Max-Age={}",
            SESSION_COOKIE, token, max_age
        ));
        self.session = Some(token);
        user.set_logged_in(true);
        self.user = user;
        Ok(())
    }

    pub fn log_out(&mut self) -> Result<(), Exception> {
        if let Some(token) = self.session.take() {
            self.app.sessions().remove(&token)?;
        }
        self.cookies
            .push(format!("{}=; Path=/; HttpOnly; Max-Age=0", SESSION_COOKIE));
        self.user = User::guest();
        Ok(())
    }

    pub fn is_post(&self) -> bool {
        self.request.method() == HttpRequestMethod::Post
    }
}
