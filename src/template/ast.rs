//! 模板解析阶段的产物：类型化的指令树。
//!
//! 指令树可以序列化，解析缓存直接持久化它。

use serde_derive::{Deserialize, Serialize};

use super::expr::Expr;

/// 源码位置：所在文件、行号以及该行的原文，用于报错。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub file: String,
    pub line: usize,
    pub snippet: String,
}

/// 变量引用。
///
/// `scope` 为循环名时从该循环的当前行读取，否则从顶层上下文读取；
/// `path` 为按 `:` 拆开的命名空间路径。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarRef {
    pub scope: Option<String>,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Node>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// 原样输出的文本，包括 IGNORE 块的内容
    Text(String),
    /// 输出变量，不存在时输出空串
    Print(VarRef),
    /// 输出常量，未定义时不输出
    Constant(String),
    /// IF / ELSEIF 分支与可选的 ELSE
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Node>>,
    },
    /// 循环。`parent` 为直接外层的循环名，此时从外层当前行的 `key` 取行列表；
    /// 只有最外层循环的 `parent` 为空
    Loop {
        name: String,
        parent: Option<String>,
        key: String,
        body: Vec<Node>,
        span: Span,
    },
}
