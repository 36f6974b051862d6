//! # 模板引擎
//!
//! 模板是带有少量标签的 HTML 文本：
//!
//! - `{NAME}`、`{USER:EMAIL}`：输出变量，`:` 为命名空间；
//! - `{C:NAME}`：输出常量；
//! - `{IF: expr}` / `{ELSEIF: expr}` / `{ELSE:}` / `{/IF}`：条件分支；
//! - `{LOOP: name}` / `{/LOOP: name}`：循环，`{name.FIELD}` 读取当前行，`a.b` 表示嵌套循环；
//! - `{INCLUDE: file}`：包含其他模板；
//! - `{IGNORE}` / `{/IGNORE}`：其中的内容原样输出。
//!
//! 源码先被解析为 [`Node`] 树（可写入磁盘缓存），再结合变量上下文求值。

pub mod ast;
pub mod compiler;
pub mod disk_cache;
pub mod expr;
pub mod lexer;
pub mod parser;
pub mod store;
pub mod value;

pub use ast::Node;
pub use compiler::{render, Compiler};
pub use disk_cache::ParseCache;
pub use store::{Template, TemplateEnv};
pub use value::{row, Context, Value, Vars};
