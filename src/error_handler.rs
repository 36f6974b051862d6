//! 顶层错误处理：记录日志，渲染错误页。
//!
//! 调试模式下页面包含完整的错误描述，否则只显示配置中的安全提示。
//! 错误页模板本身不可用时（或错误来自模板系统），返回不依赖模板的静态页面。

use log::error;

use crate::app::AppContext;
use crate::exception::Exception;
use crate::param::ERROR_TEMPLATE;
use crate::request::Request;
use crate::response::Response;
use crate::template::{Compiler, Template};
use crate::util::{escape_html, HtmlBuilder};

pub const ERROR_STATUS: u16 = 500;

/// 对外展示的错误文本，已转义
pub fn error_message(e: &Exception, debug: bool, safe_message: &str) -> String {
    if debug {
        escape_html(&e.public_message(true)).replace('\n', "<br>")
    } else {
        escape_html(safe_message)
    }
}

fn render_template(app: &AppContext, message: &str) -> Result<String, Exception> {
    let mut template = Template::open(app.templates(), ERROR_TEMPLATE)?;
    template.set("PAGE_TITLE", "Application Error");
    template.set("DEBUG_MODE", app.config().debug());
    template.set("ERROR_MESSAGE", message);
    Compiler::new(app.templates()).compile(&mut template)
}

/// 生成错误页 HTML
pub fn render_page(e: &Exception, app: &AppContext, id: u128) -> String {
    let config = app.config();
    let message = error_message(e, config.debug(), config.safe_error_message());
    if !e.is_template_error() {
        match render_template(app, &message) {
            Ok(html) => return html,
            Err(inner) => error!("[ID{}]错误页模板渲染失败: {}", id, inner),
        }
    }
    HtmlBuilder::from_error(&message).build()
}

pub fn handle(e: &Exception, app: &AppContext, request: &Request, id: u128) -> Response {
    error!("[ID{}]{} {}: {}", id, request.method(), request.path(), e);
    let html = render_page(e, app, id);
    Response::from_html(&html, ERROR_STATUS, request, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use tempfile::TempDir;

    fn app(dir: &TempDir, debug: bool) -> AppContext {
        let config = Config::new()
            .with_views_dir(dir.path().to_str().unwrap())
            .with_template_cache_time(0)
            .with_debug(debug);
        AppContext::development(config).unwrap()
    }

    fn with_error_template() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("error")).unwrap();
        fs::write(
            dir.path().join("error/errorpage.html"),
            "<h1>{PAGE_TITLE}</h1><p>{ERROR_MESSAGE}</p>",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_safe_message_outside_debug() {
        let dir = with_error_template();
        let e = Exception::QueryExecution {
            query: "SELECT <secret>".to_string(),
            detail: "boom".to_string(),
        };
        let html = render_page(&e, &app(&dir, false), 0);
        assert_eq!(
            html,
            "<h1>Application Error</h1><p>Apologies, there has been an application error that has been logged.</p>"
        );
    }

    #[test]
    fn test_debug_shows_escaped_detail() {
        let dir = with_error_template();
        let e = Exception::QueryExecution {
            query: "SELECT <secret>".to_string(),
            detail: "boom".to_string(),
        };
        let html = render_page(&e, &app(&dir, true), 0);
        assert!(html.contains("Query failed: boom<br>Query: SELECT &lt;secret&gt;"));
    }

    #[test]
    fn test_template_errors_use_static_page() {
        let dir = with_error_template();
        let e = Exception::TemplateNotFound("missing.html".to_string());
        let html = render_page(&e, &app(&dir, false), 0);
        assert!(html.contains("Fatal Application Error"));
        assert!(html.contains("Apologies"));
    }

    #[test]
    fn test_missing_error_template_falls_back() {
        let dir = TempDir::new().unwrap();
        let e = Exception::InvalidPath;
        let html = render_page(&e, &app(&dir, false), 0);
        assert!(html.contains("<title>Application Error</title>"));
    }
}
