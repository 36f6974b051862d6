//! 模板变量上下文。
//!
//! 变量按约定使用大写名称；名称中的 `:` 表示命名空间，会生成嵌套的映射；
//! 循环（loop）是按顺序追加的行映射列表，`.` 分隔的路径表示嵌套循环。

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde_derive::{Deserialize, Serialize};

/// 一层变量映射
pub type Vars = BTreeMap<String, Value>;

/// 命名空间分隔符
pub const NAMESPACE_SEPARATOR: char = ':';

/// 循环路径分隔符
pub const LOOP_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(Vars),
    List(Vec<Vars>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty() && s != "0",
            Value::Map(m) => !m.is_empty(),
            Value::List(l) => !l.is_empty(),
        }
    }

    /// 数值视图。数字字符串同样视为数值，其余类型返回 `None`。
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// 宽松相等：两侧都能视为数值时按数值比较，涉及布尔值时按真值比较，其余按输出文本比较。
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(_), _) | (_, Value::Bool(_)) => self.is_truthy() == other.is_truthy(),
            (Value::Null, Value::Null) => true,
            (Value::Null, v) | (v, Value::Null) => !v.is_truthy() && !matches!(v, Value::Str(s) if s == "0"),
            (Value::Map(_), _) | (_, Value::Map(_)) | (Value::List(_), _) | (_, Value::List(_)) => {
                self == other
            }
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => self.to_string() == other.to_string(),
            },
        }
    }

    /// 大小比较。映射与列表不可比较，返回错误描述。
    pub fn compare(&self, other: &Value) -> Result<Ordering, String> {
        match (self, other) {
            (Value::Map(_), _) | (_, Value::Map(_)) | (Value::List(_), _) | (_, Value::List(_)) => {
                Err(format!(
                    "cannot compare {} with {}",
                    self.type_name(),
                    other.type_name()
                ))
            }
            (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                Ok(self.is_truthy().cmp(&other.is_truthy()))
            }
            _ => {
                let left = self.as_number().or(match self {
                    Value::Null => Some(0.0),
                    _ => None,
                });
                let right = other.as_number().or(match other {
                    Value::Null => Some(0.0),
                    _ => None,
                });
                match (left, right) {
                    (Some(a), Some(b)) => Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal)),
                    _ => Ok(self.to_string().cmp(&other.to_string())),
                }
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Map(_) => "map",
            Value::List(_) => "loop",
        }
    }
}

/// 输出到模板时的文本形式。`false`、`null` 与容器类型输出为空。
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null | Value::Bool(false) | Value::Map(_) | Value::List(_) => Ok(()),
            Value::Bool(true) => write!(f, "1"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Str(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Vars> for Value {
    fn from(m: Vars) -> Self {
        Value::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        match o {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// 用 `(名称, 值)` 对构造一行循环数据
pub fn row<K, V, I>(pairs: I) -> Vars
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// 模板单元的变量树
#[derive(Debug, Clone)]
pub struct Context {
    vars: Vars,
    overwrite: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            vars: Vars::new(),
            overwrite: true,
        }
    }

    /// 已存在的变量是否允许被覆盖
    pub fn set_overwrite(&mut self, overwrite: bool) {
        self.overwrite = overwrite;
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    /// 设置变量。映射值会被展开为 `name:KEY` 形式的命名空间变量。
    pub fn set(&mut self, name: &str, value: Value) {
        match value {
            Value::Map(map) => {
                for (key, inner) in map {
                    self.set(&format!("{}{}{}", name, NAMESPACE_SEPARATOR, key), inner);
                }
            }
            value => self.assign(name, value),
        }
    }

    fn assign(&mut self, path: &str, value: Value) {
        let overwrite = self.overwrite;
        let mut parts: Vec<&str> = path.split(NAMESPACE_SEPARATOR).collect();
        let leaf = match parts.pop() {
            Some(leaf) => leaf,
            None => return,
        };

        let mut current = &mut self.vars;
        for part in parts {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Map(Vars::new()));
            if !matches!(entry, Value::Map(_)) {
                if !overwrite {
                    return;
                }
                *entry = Value::Map(Vars::new());
            }
            current = match entry {
                Value::Map(map) => map,
                _ => return,
            };
        }

        if overwrite || !current.contains_key(leaf) {
            current.insert(leaf.to_string(), value);
        }
    }

    /// 向循环追加一行。
    ///
    /// `path` 以 `.` 分隔，外层循环必须已经至少有一行，新行追加到外层最后一行之下。
    /// 中间段不是循环或没有任何行时不做任何事，返回 `false`。
    pub fn set_loop(&mut self, path: &str, values: Vars) -> bool {
        let mut parts: Vec<&str> = path.split(LOOP_SEPARATOR).collect();
        let last = match parts.pop() {
            Some(last) if !last.is_empty() => last,
            _ => return false,
        };

        let mut level = &mut self.vars;
        for part in parts {
            level = match level.get_mut(part) {
                Some(Value::List(rows)) => match rows.last_mut() {
                    Some(row) => row,
                    None => return false,
                },
                _ => return false,
            };
        }

        match level.get_mut(last) {
            Some(Value::List(rows)) => rows.push(values),
            _ => {
                level.insert(last.to_string(), Value::List(vec![values]));
            }
        }
        true
    }

    /// 按 `:` 路径读取变量
    pub fn get(&self, path: &str) -> Option<&Value> {
        let segments: Vec<&str> = path.split(NAMESPACE_SEPARATOR).collect();
        lookup(&self.vars, &segments)
    }

    /// 某个循环当前的行数
    pub fn loop_len(&self, path: &str) -> usize {
        let mut level = &self.vars;
        let mut parts: Vec<&str> = path.split(LOOP_SEPARATOR).collect();
        let last = match parts.pop() {
            Some(last) => last,
            None => return 0,
        };
        for part in parts {
            level = match level.get(part) {
                Some(Value::List(rows)) => match rows.last() {
                    Some(row) => row,
                    None => return 0,
                },
                _ => return 0,
            };
        }
        match level.get(last) {
            Some(Value::List(rows)) => rows.len(),
            _ => 0,
        }
    }
}

/// 在映射树中按路径查找
pub fn lookup<'a, S: AsRef<str>>(vars: &'a Vars, path: &[S]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let value = vars.get(first.as_ref())?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Value::Map(inner) => lookup(inner, rest),
        _ => None,
    }
}
