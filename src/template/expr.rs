//! `{IF: ...}` 条件表达式：词法分析、递归下降解析与求值。
//!
//! 文法（优先级由低到高）：
//!
//! ```text
//! or    := and ( ("||" | "or") and )*
//! and   := eq ( ("&&" | "and") eq )*
//! eq    := rel ( ("==" | "eq" | "!=" | "neq") rel )*
//! rel   := unary ( ("<" | "lt" | ">" | "gt" | "<=" | "lte" | ">=" | "gte") unary )*
//! unary := ("!" | "not") unary | primary
//! primary := literal | variable | "(" or ")"
//! ```

use serde_derive::{Deserialize, Serialize};

use super::ast::VarRef;
use super::lexer::{classify_name, Reference};
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Value),
    Var(VarRef),
    Constant(String),
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    Op(BinOp),
    Literal(Value),
    Reference(Reference),
}

/// 求值时的变量来源
pub trait Scope {
    fn variable(&self, var: &VarRef) -> Value;
    fn constant(&self, name: &str) -> Option<Value>;
}

fn is_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '!' | '=' | '<' | '>' | '&' | '|' | '\'' | '"' | '`')
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(BinOp::Ne));
                } else {
                    tokens.push(Token::Not);
                }
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err("unexpected '=', did you mean '=='?".to_string());
                }
                tokens.push(Token::Op(BinOp::Eq));
            }
            '>' | '<' => {
                chars.next();
                let or_equal = chars.peek() == Some(&'=');
                if or_equal {
                    chars.next();
                }
                tokens.push(Token::Op(match (c, or_equal) {
                    ('>', false) => BinOp::Gt,
                    ('>', true) => BinOp::Ge,
                    ('<', false) => BinOp::Lt,
                    _ => BinOp::Le,
                }));
            }
            '&' | '|' => {
                chars.next();
                if chars.next() != Some(c) {
                    return Err(format!("unexpected '{}', did you mean '{}{}'?", c, c, c));
                }
                tokens.push(Token::Op(if c == '&' { BinOp::And } else { BinOp::Or }));
            }
            '\'' | '"' | '`' => {
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    literal.push(next);
                }
                if !closed {
                    return Err(format!("unterminated string literal starting with {}", c));
                }
                tokens.push(Token::Literal(Value::Str(literal)));
            }
            _ => {
                let mut word = String::new();
                while let Some(&next) = chars.peek() {
                    if is_boundary(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(classify_word(&word)?);
            }
        }
    }

    Ok(tokens)
}

fn classify_word(word: &str) -> Result<Token, String> {
    let token = match word {
        "eq" => Token::Op(BinOp::Eq),
        "neq" => Token::Op(BinOp::Ne),
        "gt" => Token::Op(BinOp::Gt),
        "lt" => Token::Op(BinOp::Lt),
        "gte" => Token::Op(BinOp::Ge),
        "lte" => Token::Op(BinOp::Le),
        "and" => Token::Op(BinOp::And),
        "or" => Token::Op(BinOp::Or),
        "not" => Token::Not,
        "true" => Token::Literal(Value::Bool(true)),
        "false" => Token::Literal(Value::Bool(false)),
        "null" => Token::Literal(Value::Null),
        _ => {
            if let Ok(i) = word.parse::<i64>() {
                Token::Literal(Value::Int(i))
            } else if let Ok(f) = word.parse::<f64>() {
                Token::Literal(Value::Float(f))
            } else if let Some(reference) = classify_name(word) {
                Token::Reference(reference)
            } else {
                return Err(format!("unexpected token '{}'", word));
            }
        }
    };
    Ok(token)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn binary<F>(&mut self, ops: &[BinOp], mut operand: F) -> Result<Expr, String>
    where
        F: FnMut(&mut Self) -> Result<Expr, String>,
    {
        let mut left = operand(self)?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !ops.contains(&op) {
                break;
            }
            self.pos += 1;
            let right = operand(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, String> {
        self.binary(&[BinOp::Or], Self::and)
    }

    fn and(&mut self) -> Result<Expr, String> {
        self.binary(&[BinOp::And], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr, String> {
        self.binary(&[BinOp::Eq, BinOp::Ne], Self::relation)
    }

    fn relation(&mut self) -> Result<Expr, String> {
        self.binary(&[BinOp::Gt, BinOp::Lt, BinOp::Ge, BinOp::Le], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(Expr::Literal(value)),
            Some(Token::Reference(Reference::Var(var))) => Ok(Expr::Var(var)),
            Some(Token::Reference(Reference::Constant(name))) => Ok(Expr::Constant(name)),
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing closing ')'".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected {:?}", other)),
            None => Err("unexpected end of condition".to_string()),
        }
    }
}

/// 解析条件表达式
pub fn parse(source: &str) -> Result<Expr, String> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err("empty condition".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("unexpected {:?} after condition", token)),
    }
}

impl Expr {
    pub fn evaluate(&self, scope: &dyn Scope) -> Result<Value, String> {
        let value = match self {
            Expr::Literal(value) => value.clone(),
            Expr::Var(var) => scope.variable(var),
            Expr::Constant(name) => scope.constant(name).unwrap_or(Value::Null),
            Expr::Not(inner) => Value::Bool(!inner.evaluate(scope)?.is_truthy()),
            Expr::Binary { op, left, right } => {
                let lhs = left.evaluate(scope)?;
                match op {
                    BinOp::And => {
                        Value::Bool(lhs.is_truthy() && right.evaluate(scope)?.is_truthy())
                    }
                    BinOp::Or => Value::Bool(lhs.is_truthy() || right.evaluate(scope)?.is_truthy()),
                    BinOp::Eq => Value::Bool(lhs.loose_eq(&right.evaluate(scope)?)),
                    BinOp::Ne => Value::Bool(!lhs.loose_eq(&right.evaluate(scope)?)),
                    BinOp::Gt => Value::Bool(lhs.compare(&right.evaluate(scope)?)?.is_gt()),
                    BinOp::Lt => Value::Bool(lhs.compare(&right.evaluate(scope)?)?.is_lt()),
                    BinOp::Ge => Value::Bool(lhs.compare(&right.evaluate(scope)?)?.is_ge()),
                    BinOp::Le => Value::Bool(lhs.compare(&right.evaluate(scope)?)?.is_le()),
                }
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::value::{lookup, Vars};

    struct MapScope(Vars);

    impl Scope for MapScope {
        fn variable(&self, var: &VarRef) -> Value {
            lookup(&self.0, &var.path).cloned().unwrap_or(Value::Null)
        }

        fn constant(&self, name: &str) -> Option<Value> {
            (name == "LIMIT").then(|| Value::Int(3))
        }
    }

    fn eval(source: &str, vars: &[(&str, Value)]) -> bool {
        let scope = MapScope(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        );
        parse(source).unwrap().evaluate(&scope).unwrap().is_truthy()
    }

    #[test]
    fn test_operator_aliases() {
        let age = [("AGE", Value::Int(20))];
        assert!(eval("AGE gt 17", &age));
        assert!(eval("AGE gte 20", &age));
        assert!(!eval("AGE lt 17", &age));
        assert!(eval("AGE neq 3 and AGE eq 20", &age));
        assert!(eval("not AGE lt 18", &age));
    }

    #[test]
    fn test_symbol_operators_without_spaces() {
        let age = [("AGE", Value::Int(20))];
        assert!(eval("AGE>17", &age));
        assert!(eval("AGE!=17&&(AGE<=20)", &age));
        assert!(eval("!(AGE==1)||AGE==2", &age));
    }

    #[test]
    fn test_string_literals() {
        let name = [("NAME", Value::from("Ann Lee"))];
        assert!(eval("NAME == 'Ann Lee'", &name));
        assert!(eval("NAME != \"Bob\"", &name));
        assert!(eval("NAME eq `Ann Lee`", &name));
    }

    #[test]
    fn test_missing_variable_is_falsy() {
        assert!(!eval("MISSING", &[]));
        assert!(eval("!MISSING", &[]));
        assert!(eval("MISSING eq ''", &[]));
    }

    #[test]
    fn test_constants() {
        assert!(eval("C:LIMIT gt 2", &[]));
        assert!(!eval("C:UNDEFINED", &[]));
    }

    #[test]
    fn test_precedence() {
        let vars = [("YES", Value::Bool(true)), ("NO", Value::Bool(false))];
        // or 的优先级低于 and
        assert!(eval("YES or NO and NO", &vars));
        assert!(!eval("(YES or NO) and NO", &vars));
    }

    #[test]
    fn test_loop_variable_reference() {
        match parse("items.IS_FIRST_ROW").unwrap() {
            Expr::Var(var) => {
                assert_eq!(var.scope.as_deref(), Some("items"));
                assert_eq!(var.path, vec!["IS_FIRST_ROW".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("AGE = 3").is_err());
        assert!(parse("(AGE gt 3").is_err());
        assert!(parse("AGE gt").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("lowercase").is_err());
        assert!(parse("AGE NAME").is_err());
    }

    #[test]
    fn test_compare_list_is_runtime_error() {
        let vars = [("ROWS", Value::List(vec![]))];
        let scope = MapScope(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        );
        assert!(parse("ROWS gt 1").unwrap().evaluate(&scope).is_err());
    }
}
