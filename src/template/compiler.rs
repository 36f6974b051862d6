//! 指令树求值。
//!
//! 求值是纯函数：输入指令树、变量上下文和常量表，输出最终文本。循环按栈展开，
//! 每一层记录循环名、当前行以及位置，位置标志 `IS_FIRST_ROW` 等在访问时计算。

use std::borrow::Cow;
use std::collections::BTreeMap;

use log::debug;

use super::ast::{Node, Span, VarRef};
use super::expr::Scope;
use super::parser;
use super::store::{Template, TemplateEnv};
use super::value::{lookup, Value, Vars};
use crate::exception::Exception;
use crate::util::escape_html;

pub const IS_FIRST_ROW: &str = "IS_FIRST_ROW";
pub const IS_LAST_ROW: &str = "IS_LAST_ROW";
pub const IS_ODD_ROW: &str = "IS_ODD_ROW";
pub const IS_EVEN_ROW: &str = "IS_EVEN_ROW";

struct Frame<'a> {
    name: &'a str,
    row: &'a Vars,
    index: usize,
    count: usize,
}

impl<'a> Frame<'a> {
    fn flag(&self, name: &str) -> Option<bool> {
        match name {
            IS_FIRST_ROW => Some(self.index == 0),
            IS_LAST_ROW => Some(self.index + 1 == self.count),
            // 从 0 开始计数，第一行为奇数行
            IS_ODD_ROW => Some(self.index % 2 == 0),
            IS_EVEN_ROW => Some(self.index % 2 == 1),
            _ => None,
        }
    }
}

struct Renderer<'a> {
    vars: &'a Vars,
    constants: &'a BTreeMap<String, String>,
    frames: Vec<Frame<'a>>,
}

impl<'a> Renderer<'a> {
    fn frame(&self, name: &str) -> Option<&Frame<'a>> {
        self.frames.iter().rev().find(|f| f.name == name)
    }

    fn resolve(&self, var: &VarRef) -> Option<Cow<'a, Value>> {
        match &var.scope {
            None => lookup(self.vars, &var.path).map(Cow::Borrowed),
            Some(scope) => {
                let frame = self.frame(scope)?;
                if let [single] = &var.path[..] {
                    if let Some(flag) = frame.flag(single) {
                        return Some(Cow::Owned(Value::Bool(flag)));
                    }
                }
                let row: &'a Vars = frame.row;
                lookup(row, &var.path).map(Cow::Borrowed)
            }
        }
    }

    fn render(&mut self, nodes: &'a [Node], out: &mut String) -> Result<(), Exception> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Print(var) => {
                    if let Some(value) = self.resolve(var) {
                        out.push_str(&value.to_string());
                    }
                }
                Node::Constant(name) => {
                    if let Some(value) = self.constants.get(name) {
                        out.push_str(value);
                    }
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for branch in branches {
                        let value = branch
                            .condition
                            .evaluate(&*self)
                            .map_err(|message| compile_error(&branch.span, message))?;
                        if value.is_truthy() {
                            self.render(&branch.body, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        if let Some(body) = otherwise {
                            self.render(body, out)?;
                        }
                    }
                }
                Node::Loop {
                    name,
                    parent,
                    key,
                    body,
                    span,
                } => {
                    let source: Option<&'a Value> = match parent {
                        None => self.vars.get(key),
                        Some(parent) => {
                            let frame = self.frame(parent).ok_or_else(|| {
                                compile_error(span, format!("loop '{}' is not active", parent))
                            })?;
                            let row: &'a Vars = frame.row;
                            row.get(key)
                        }
                    };
                    let rows = match source {
                        Some(Value::List(rows)) => rows,
                        // 未设置的循环输出为空
                        _ => continue,
                    };
                    let count = rows.len();
                    for (index, row) in rows.iter().enumerate() {
                        self.frames.push(Frame {
                            name,
                            row,
                            index,
                            count,
                        });
                        let result = self.render(body, out);
                        self.frames.pop();
                        result?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<'a> Scope for Renderer<'a> {
    fn variable(&self, var: &VarRef) -> Value {
        self.resolve(var)
            .map(Cow::into_owned)
            .unwrap_or(Value::Null)
    }

    fn constant(&self, name: &str) -> Option<Value> {
        self.constants.get(name).map(|v| Value::Str(v.clone()))
    }
}

fn compile_error(span: &Span, message: String) -> Exception {
    Exception::TemplateCompile {
        file: span.file.clone(),
        line: span.line,
        snippet: escape_html(&span.snippet),
        message,
    }
}

/// 对指令树求值
pub fn render(
    nodes: &[Node],
    vars: &Vars,
    constants: &BTreeMap<String, String>,
) -> Result<String, Exception> {
    let mut renderer = Renderer {
        vars,
        constants,
        frames: Vec::new(),
    };
    let mut out = String::new();
    renderer.render(nodes, &mut out)?;
    Ok(out)
}

/// 模板编译器：负责解析（并写入解析缓存）与求值两个阶段。
pub struct Compiler<'e> {
    env: &'e TemplateEnv,
}

impl<'e> Compiler<'e> {
    pub fn new(env: &'e TemplateEnv) -> Self {
        Self { env }
    }

    /// 解析模板。已有解析结果（例如来自解析缓存）时直接返回。
    pub fn parse(&self, template: &mut Template) -> Result<(), Exception> {
        if template.is_parsed() {
            return Ok(());
        }
        if !template.is_loaded() {
            return Err(Exception::TemplateNotFound(template.filename().to_string()));
        }
        let nodes = parser::parse(template.content(), template.filename(), self.env)?;
        debug!("模板{}解析完成，共{}个顶层节点", template.filename(), nodes.len());
        self.store_parsed(template, &nodes);
        template.set_parsed(nodes);
        Ok(())
    }

    /// 视图目录中的模板在缓存文件缺失或比源文件旧时写入解析缓存
    fn store_parsed(&self, template: &Template, nodes: &[Node]) {
        let cache = self.env.parse_cache();
        if !cache.enabled() || !template.is_from_views() {
            return;
        }
        let source = match self.env.source_path(template.filename()) {
            Ok(path) => path,
            Err(_) => return,
        };
        if !cache.is_current(template.filename(), &source) {
            cache.store(template.filename(), nodes);
        }
    }

    /// 求值并返回输出文本，必要时先解析。
    pub fn compile(&self, template: &mut Template) -> Result<String, Exception> {
        self.parse(template)?;
        let output = match template.parsed() {
            Some(nodes) => render(nodes, template.context().vars(), self.env.constants())?,
            None => return Err(Exception::TemplateNotFound(template.filename().to_string())),
        };
        template.set_compiled(output.clone());
        Ok(output)
    }
}
