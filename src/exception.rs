// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了框架在请求处理生命周期中可能抛出的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖了协议解析错误、模板加载/解析/求值错误、路由配置错误以及外部存储错误。
//! - **语义映射**：上层的统一异常处理器（`error_handler`）根据变体决定输出安全页面还是调试信息。
//! - **调试/生产区分**：`QueryExecution` 这类携带敏感上下文的变体，只有在调试模式下才输出完整细节，
//!   见 [`Exception::public_message`]。

use std::fmt;

/// 框架处理请求过程中发生的异常类型。
///
/// 该枚举通常作为 `Result` 的 `Err` 部分返回，并通过 `?` 一路传播到顶层处理器。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 客户端使用了框架暂不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 请求的路径格式非法或包含越权尝试（如目录遍历）。
    InvalidPath,
    /// 模板源文件不存在，且没有可用的解析缓存。
    TemplateNotFound(String),
    /// 模板标记结构错误：未闭合的块、不匹配的结束标签、无法解析的条件表达式等。
    TemplateSyntax {
        file: String,
        line: usize,
        message: String,
    },
    /// 模板求值阶段的运行时错误，携带出错的源码行号和经过转义的代码片段。
    TemplateCompile {
        file: String,
        line: usize,
        snippet: String,
        message: String,
    },
    /// 控制器在渲染时没有设置任何模板。
    NoTemplate(String),
    /// 重路由表中存在环路，例如 `a -> b`、`b -> a`。
    RerouteCycle(Vec<String>),
    /// 控制器注册表的配置错误，在启动时报告。
    InvalidRegistration(String),
    /// 校验规则名不存在或参数不正确。
    InvalidValidationRule(String),
    /// 无法连接到后端存储。
    DatabaseConnection(String),
    /// 后端存储执行查询失败。`query` 只在调试模式下对外展示。
    QueryExecution { query: String, detail: String },
}

use Exception::*;

impl Exception {
    /// 生成可以展示给最终用户的描述。
    ///
    /// 非调试模式下隐藏查询语句等内部上下文，只返回通用描述。
    pub fn public_message(&self, debug: bool) -> String {
        match self {
            QueryExecution { .. } | DatabaseConnection(_) if !debug => {
                "A database error occurred while processing the request".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// 是否属于模板系统自身的错误。顶层处理器据此判断是否还能用模板渲染错误页。
    pub fn is_template_error(&self) -> bool {
        matches!(
            self,
            TemplateNotFound(_) | TemplateSyntax { .. } | TemplateCompile { .. } | NoTemplate(_)
        )
    }
}

/// 为 `Exception` 实现 `Display` 特性，使其支持字符串格式化输出。
impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            InvalidPath => write!(f, "Invalid path (400)"),
            TemplateNotFound(name) => write!(f, "Could not find template file [{}]", name),
            TemplateSyntax {
                file,
                line,
                message,
            } => write!(f, "Template syntax error in {} at line {}: {}", file, line, message),
            TemplateCompile {
                file,
                line,
                snippet,
                message,
            } => write!(
                f,
                "Error compiling template {}: {}\n at line {}: {}",
                file, message, line, snippet
            ),
            NoTemplate(controller) => {
                write!(f, "No template file defined for controller [{}]", controller)
            }
            RerouteCycle(chain) => write!(f, "Re-route cycle detected: {}", chain.join(" -> ")),
            InvalidRegistration(msg) => write!(f, "Invalid controller registration: {}", msg),
            InvalidValidationRule(rule) => write!(f, "Invalid rule provided [{}]", rule),
            DatabaseConnection(msg) => write!(f, "Could not connect to database: {}", msg),
            QueryExecution { query, detail } => {
                write!(f, "Query failed: {}\nQuery: {}", detail, query)
            }
        }
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_hidden_outside_debug() {
        let e = QueryExecution {
            query: "SELECT * FROM users WHERE user_email = ?".to_string(),
            detail: "table missing".to_string(),
        };
        assert!(!e.public_message(false).contains("SELECT"));
        assert!(e.public_message(true).contains("SELECT"));
    }

    #[test]
    fn test_template_errors_are_flagged() {
        assert!(TemplateNotFound("a.html".into()).is_template_error());
        assert!(!RerouteCycle(vec!["a".into(), "b".into()]).is_template_error());
    }

    #[test]
    fn test_cycle_display() {
        let e = RerouteCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(e.to_string(), "Re-route cycle detected: a -> b -> a");
    }
}
