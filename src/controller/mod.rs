//! # 控制器
//!
//! 路由解析出的 `controller` 段在 [`ControllerRegistry`] 中查找对应的控制器，
//! `module` 段必须在该控制器的允许列表中。分派顺序为：
//!
//! 1. [`Controller::create`] 构造控制器；
//! 2. [`Controller::before`]；
//! 3. 若该模块注册了处理函数，调用之；
//! 4. 渲染控制器的模板。
//!
//! 任何一步返回 `Some(View)` 都会提前结束请求。

pub mod auth;
pub mod index;

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use crate::app::RequestContext;
use crate::exception::Exception;
use crate::router::Route;
use crate::template::{Compiler, Template, Value, Vars};
use crate::util::url;

pub use self::auth::AuthController;
pub use self::index::IndexController;

/// 提示信息页模板
pub const INFO_TEMPLATE: &str = "common/info_message.html";

/// 确认页模板
pub const CONFIRM_TEMPLATE: &str = "common/confirm_message.html";

/// 一次请求的最终输出
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Page { status: u16, html: String },
    Redirect(String),
}

impl View {
    pub fn page(html: String) -> Self {
        View::Page { status: 200, html }
    }
}

/// 控制器各步骤的返回值，`Some` 表示提前结束
pub type Step = Result<Option<View>, Exception>;

/// 模块处理函数
pub type Handler<C> = fn(&mut C, &mut RequestContext<'_>) -> Step;

pub trait Controller: Sized + 'static {
    fn create(ctx: &mut RequestContext<'_>) -> Result<Self, Exception>;

    fn base(&mut self) -> &mut ControllerBase;

    fn before(&mut self, _ctx: &mut RequestContext<'_>) -> Step {
        Ok(None)
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 所有控制器共用的状态和页面辅助方法
#[derive(Debug, Clone, Default)]
pub struct ControllerBase {
    controller: String,
    module: Option<String>,
    title: Option<String>,
    template: Template,
}

impl ControllerBase {
    pub fn new(route: &Route) -> Self {
        Self {
            controller: route.controller().unwrap_or_default().to_string(),
            module: route.module().map(str::to_string),
            title: None,
            template: Template::new(),
        }
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn template_mut(&mut self) -> &mut Template {
        &mut self.template
    }

    /// 载入模板文件，已经设置的变量保留
    pub fn set_template(&mut self, ctx: &RequestContext<'_>, name: &str) -> Result<(), Exception> {
        self.template.load(ctx.app().templates(), name)
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = Some(title.to_string());
    }

    pub fn set<V: Into<Value>>(&mut self, name: &str, value: V) {
        self.template.set(name, value);
    }

    pub fn set_loop(&mut self, path: &str, row: Vars) -> bool {
        self.template.set_loop(path, row)
    }

    /// 编译模板。标题缺省为首字母大写的控制器名。
    pub fn render(&mut self, ctx: &RequestContext<'_>) -> Result<View, Exception> {
        if !self.template.is_loaded() {
            return Err(Exception::NoTemplate(self.controller.clone()));
        }
        let title = match &self.title {
            Some(t) => t.clone(),
            None => capitalize(&self.controller),
        };
        self.template.set("PAGE_TITLE", title);
        self.template.set("DEBUG_MODE", ctx.app().config().debug());
        ctx.user().set_to_template(&mut self.template);
        self.template.set("CONTROLLER", self.controller.as_str());
        self.template
            .set("MODULE", self.module.clone().unwrap_or_default());
        let html = Compiler::new(ctx.app().templates()).compile(&mut self.template)?;
        debug!("[ID{}]控制器{}渲染完成", ctx.id(), self.controller);
        Ok(View::page(html))
    }

    /// 通用提示页。`link` 为 `(url, text)`。
    pub fn info_page(
        &mut self,
        ctx: &RequestContext<'_>,
        title: &str,
        message: &str,
        class_name: &str,
        link: Option<(&str, &str)>,
    ) -> Step {
        self.set_template(ctx, INFO_TEMPLATE)?;
        self.set("INFO_BOX_CLASSNAME", class_name);
        self.set("INFO_BOX_MESSAGE", message);
        match link {
            Some((href, text)) => {
                self.set("INFO_BOX_LINK_URL", href);
                self.set("INFO_BOX_LINK_TEXT", text);
            }
            None => {
                self.set("INFO_BOX_LINK_URL", false);
                self.set("INFO_BOX_LINK_TEXT", false);
            }
        }
        self.set_title(title);
        self.render(ctx).map(Some)
    }

    pub fn success_page(
        &mut self,
        ctx: &RequestContext<'_>,
        title: &str,
        message: &str,
        link: Option<(&str, &str)>,
    ) -> Step {
        self.info_page(ctx, title, message, "success", link)
    }

    pub fn error_page(
        &mut self,
        ctx: &RequestContext<'_>,
        title: &str,
        message: &str,
        link: Option<(&str, &str)>,
    ) -> Step {
        self.info_page(ctx, title, message, "error", link)
    }

    /// 在当前模板上显示错误信息，多条以 `<br>` 分隔
    pub fn error_display<S: AsRef<str>>(&mut self, ctx: &RequestContext<'_>, messages: &[S]) -> Step {
        let joined: Vec<&str> = messages.iter().map(|m| m.as_ref()).collect();
        self.set("ERROR_MESSAGE", joined.join("<br>"));
        self.render(ctx).map(Some)
    }

    /// 确认页，确认链接为 `confirm_url` 加上 `confirm=1`
    pub fn confirm_message(
        &mut self,
        ctx: &RequestContext<'_>,
        text: &str,
        confirm_url: &str,
        no_url: &str,
    ) -> Step {
        self.set_template(ctx, CONFIRM_TEMPLATE)?;
        self.set("CONFIRM_BOX_TEXT", text);
        self.set("NO_URL", no_url);
        self.set("YES_URL", url(confirm_url, &[("confirm", "1".to_string())]));
        self.set_title("Confirm");
        self.render(ctx).map(Some)
    }
}

type Dispatch = Box<dyn Fn(&mut RequestContext<'_>) -> Result<View, Exception> + Send + Sync>;

struct Entry {
    modules: BTreeSet<String>,
    dispatch: Dispatch,
}

/// 一个控制器的注册信息
pub struct Registration<C: Controller> {
    name: String,
    modules: Vec<String>,
    handlers: Vec<(String, Handler<C>)>,
}

impl<C: Controller> Registration<C> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            modules: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// 允许的模块，没有处理函数，只做渲染
    pub fn module(mut self, name: &str) -> Self {
        self.modules.push(name.to_string());
        self
    }

    /// 允许的模块及其处理函数
    pub fn handler(mut self, name: &str, handler: Handler<C>) -> Self {
        self.modules.push(name.to_string());
        self.handlers.push((name.to_string(), handler));
        self
    }
}

fn check_name(kind: &str, name: &str) -> Result<(), Exception> {
    if name.is_empty() {
        return Err(Exception::InvalidRegistration(format!("empty {} name", kind)));
    }
    if name.contains('/') || name.contains('?') {
        return Err(Exception::InvalidRegistration(format!(
            "{} name '{}' contains a path separator",
            kind, name
        )));
    }
    if name.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Exception::InvalidRegistration(format!(
            "{} name '{}' is numeric and would be routed as an id",
            kind, name
        )));
    }
    Ok(())
}

/// 控制器名到构造、模块允许列表与处理函数的映射
#[derive(Default)]
pub struct ControllerRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置的 `index` 与 `auth` 控制器
    pub fn with_defaults() -> Result<Self, Exception> {
        let mut registry = Self::new();
        registry.register(Registration::<IndexController>::new("index"))?;
        registry.register(
            Registration::<AuthController>::new("auth")
                .handler("login", AuthController::login)
                .handler("register", AuthController::register)
                .handler("logout", AuthController::logout),
        )?;
        Ok(registry)
    }

    pub fn register<C: Controller>(&mut self, registration: Registration<C>) -> Result<(), Exception> {
        let Registration {
            name,
            modules,
            handlers,
        } = registration;
        check_name("controller", &name)?;
        if self.entries.contains_key(&name) {
            return Err(Exception::InvalidRegistration(format!(
                "controller '{}' registered twice",
                name
            )));
        }
        let mut allowed = BTreeSet::new();
        for module in &modules {
            check_name("module", module)?;
            if !allowed.insert(module.clone()) {
                return Err(Exception::InvalidRegistration(format!(
                    "module '{}/{}' registered twice",
                    name, module
                )));
            }
        }
        let handlers: BTreeMap<String, Handler<C>> = handlers.into_iter().collect();
        let dispatch: Dispatch =
            Box::new(move |ctx: &mut RequestContext<'_>| run::<C>(&handlers, ctx));
        info!("注册控制器{}，模块：{:?}", name, allowed);
        self.entries.insert(
            name,
            Entry {
                modules: allowed,
                dispatch,
            },
        );
        Ok(())
    }

    pub fn contains(&self, controller: &str) -> bool {
        self.entries.contains_key(controller)
    }

    pub fn modules(&self, controller: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(controller).map(|e| &e.modules)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 控制器已注册，且给出的模块在允许列表中
    pub fn validate(&self, route: &mut Route) -> bool {
        let valid = match route.controller().and_then(|c| self.entries.get(c)) {
            Some(entry) => match route.module() {
                Some(module) => entry.modules.contains(module),
                None => true,
            },
            None => false,
        };
        route.set_valid(valid);
        valid
    }

    /// 分派到路由对应的控制器。路由必须已经通过校验。
    pub fn dispatch(&self, ctx: &mut RequestContext<'_>) -> Result<View, Exception> {
        let controller = ctx.route().controller().unwrap_or_default().to_string();
        match self.entries.get(&controller) {
            Some(entry) if ctx.route().valid() => (entry.dispatch)(ctx),
            _ => Err(Exception::InvalidPath),
        }
    }
}

fn run<C: Controller>(
    handlers: &BTreeMap<String, Handler<C>>,
    ctx: &mut RequestContext<'_>,
) -> Result<View, Exception> {
    let mut controller = C::create(ctx)?;
    if let Some(view) = controller.before(ctx)? {
        return Ok(view);
    }
    let module = ctx.route().module().map(str::to_string);
    if let Some(handler) = module.as_deref().and_then(|m| handlers.get(m)) {
        if let Some(view) = handler(&mut controller, ctx)? {
            return Ok(view);
        }
    }
    controller.base().render(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        base: ControllerBase,
    }

    impl Controller for Dummy {
        fn create(ctx: &mut RequestContext<'_>) -> Result<Self, Exception> {
            Ok(Self {
                base: ControllerBase::new(ctx.route()),
            })
        }

        fn base(&mut self) -> &mut ControllerBase {
            &mut self.base
        }
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("users"), "Users");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_registration_errors() {
        let mut registry = ControllerRegistry::new();
        registry
            .register(Registration::<Dummy>::new("users").module("edit"))
            .unwrap();
        assert!(matches!(
            registry.register(Registration::<Dummy>::new("users")),
            Err(Exception::InvalidRegistration(_))
        ));
        assert!(registry
            .register(Registration::<Dummy>::new("posts").module("12"))
            .is_err());
        assert!(registry
            .register(Registration::<Dummy>::new("tags").module("a").module("a"))
            .is_err());
        assert!(registry.register(Registration::<Dummy>::new("a/b")).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_validate_route() {
        let mut registry = ControllerRegistry::new();
        registry
            .register(Registration::<Dummy>::new("users").module("edit"))
            .unwrap();

        let mut route = Route::from_path("users/edit/3");
        assert!(registry.validate(&mut route));
        assert!(route.valid());

        let mut route = Route::from_path("users/5");
        assert!(registry.validate(&mut route));

        let mut route = Route::from_path("users/delete");
        assert!(!registry.validate(&mut route));
        assert!(!route.valid());

        let mut route = Route::from_path("nothing");
        assert!(!registry.validate(&mut route));
    }

    #[test]
    fn test_default_registry() {
        let registry = ControllerRegistry::with_defaults().unwrap();
        assert!(registry.contains("index"));
        let modules: Vec<&str> = registry
            .modules("auth")
            .unwrap()
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(modules, vec!["login", "logout", "register"]);
    }
}
