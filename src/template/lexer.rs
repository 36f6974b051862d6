//! 模板标记的词法分析。
//!
//! 从左到右扫描原始文本，遇到 `{` 时尝试匹配各类标签；不构成标签的花括号（CSS、JS、
//! 小写内容等）原样作为文本保留。`{IGNORE}` 块在这一步整体取出，内部不再解释。

use lazy_static::lazy_static;
use regex::Regex;

use super::ast::{Span, VarRef};
use super::value::{LOOP_SEPARATOR, NAMESPACE_SEPARATOR};
use crate::exception::Exception;

lazy_static! {
    static ref VAR_TAG: Regex =
        Regex::new(r"^\{((?:C:)|(?:[0-9a-z_]+\.)+)?([0-9A-Z_]{2,}(?::[0-9A-Z_]+)*)\}").unwrap();
    static ref CONDITION_TAG: Regex = Regex::new(r"^\{(IF|ELSEIF):\s(.+?)\}").unwrap();
    static ref ELSE_TAG: Regex = Regex::new(r"^\{ELSE:\s?\}").unwrap();
    static ref LOOP_TAG: Regex = Regex::new(r"^\{(/?)LOOP: ([0-9a-z_.]{2,})\}").unwrap();
    static ref INCLUDE_TAG: Regex = Regex::new(r"^\{INCLUDE: (.*?)\}").unwrap();
    static ref VAR_NAME: Regex = Regex::new(r"^[0-9A-Z_]{2,}(?::[0-9A-Z_]+)*$").unwrap();
    static ref LOOP_VAR_NAME: Regex =
        Regex::new(r"^((?:[0-9a-z_]+\.)+)([0-9A-Z_]{2,}(?::[0-9A-Z_]+)*)$").unwrap();
    static ref CONSTANT_NAME: Regex = Regex::new(r"^C:([A-Z0-9_:]+)$").unwrap();
}

const IGNORE_OPEN: &str = "{IGNORE}";
const IGNORE_CLOSE: &str = "{/IGNORE}";
const END_IF: &str = "{/IF}";

/// 变量或常量引用
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Var(VarRef),
    Constant(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Text(String),
    Reference(Reference),
    If(String),
    ElseIf(String),
    Else,
    EndIf,
    Loop(String),
    EndLoop(String),
    Include(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

fn var_ref(scope: Option<&str>, name: &str) -> Option<VarRef> {
    // 纯数字不是变量名
    if name.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(VarRef {
        scope: scope.map(|s| s.trim_end_matches(LOOP_SEPARATOR).to_string()),
        path: name
            .split(NAMESPACE_SEPARATOR)
            .map(|s| s.to_string())
            .collect(),
    })
}

/// 判断一个裸名称是普通变量、循环变量还是常量
pub fn classify_name(word: &str) -> Option<Reference> {
    if let Some(caps) = CONSTANT_NAME.captures(word) {
        return Some(Reference::Constant(caps[1].to_string()));
    }
    if let Some(caps) = LOOP_VAR_NAME.captures(word) {
        return var_ref(Some(&caps[1]), &caps[2]).map(Reference::Var);
    }
    if VAR_NAME.is_match(word) {
        return var_ref(None, word).map(Reference::Var);
    }
    None
}

/// 取第 `line` 行（从 1 开始）的内容；该行为空白时向前寻找最近的非空行。
pub fn source_line(source: &str, line: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    line_at(&lines, line)
}

fn line_at(lines: &[&str], line: usize) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut index = line.clamp(1, lines.len()) - 1;
    while lines[index].trim().is_empty() && index > 0 {
        index -= 1;
    }
    lines[index].trim().to_string()
}

struct Lexer<'a> {
    source: &'a str,
    lines: Vec<&'a str>,
    file: &'a str,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
    text: String,
}

impl<'a> Lexer<'a> {
    fn span(&self) -> Span {
        Span {
            file: self.file.to_string(),
            line: self.line,
            snippet: line_at(&self.lines, self.line),
        }
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            let span = self.span();
            self.tokens.push(Token {
                kind: TokenKind::Text(std::mem::take(&mut self.text)),
                span,
            });
        }
    }

    fn push(&mut self, kind: TokenKind, consumed: usize) {
        self.flush_text();
        let span = self.span();
        self.tokens.push(Token { kind, span });
        self.advance(consumed);
    }

    fn advance(&mut self, consumed: usize) {
        let taken = &self.source[self.pos..self.pos + consumed];
        self.line += taken.matches('\n').count();
        self.pos += consumed;
    }

    fn error(&self, message: String) -> Exception {
        Exception::TemplateSyntax {
            file: self.file.to_string(),
            line: self.line,
            message,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, Exception> {
        let source = self.source;
        while self.pos < source.len() {
            let rest = &source[self.pos..];
            let brace = match rest.find('{') {
                Some(offset) => offset,
                None => {
                    self.text.push_str(rest);
                    self.advance(rest.len());
                    break;
                }
            };
            if brace > 0 {
                self.text.push_str(&rest[..brace]);
                self.advance(brace);
                continue;
            }
            self.tag(rest)?;
        }
        self.flush_text();
        Ok(self.tokens)
    }

    /// `rest` 以 `{` 开头
    fn tag(&mut self, rest: &'a str) -> Result<(), Exception> {
        if rest.starts_with(IGNORE_OPEN) {
            let body_start = IGNORE_OPEN.len();
            let close = match rest[body_start..].find(IGNORE_CLOSE) {
                Some(close) => close,
                None => return Err(self.error("unterminated {IGNORE} block".to_string())),
            };
            self.text.push_str(&rest[body_start..body_start + close]);
            self.advance(body_start + close + IGNORE_CLOSE.len());
            return Ok(());
        }
        if rest.starts_with(IGNORE_CLOSE) {
            return Err(self.error("{/IGNORE} without matching {IGNORE}".to_string()));
        }

        if let Some(caps) = VAR_TAG.captures(rest) {
            let consumed = caps[0].len();
            let name = &caps[2];
            let reference = match caps.get(1).map(|m| m.as_str()) {
                Some("C:") => Some(Reference::Constant(name.to_string())),
                scope => var_ref(scope, name).map(Reference::Var),
            };
            if let Some(reference) = reference {
                self.push(TokenKind::Reference(reference), consumed);
                return Ok(());
            }
        }

        if let Some(caps) = CONDITION_TAG.captures(rest) {
            let expr = caps[2].to_string();
            let kind = if &caps[1] == "IF" {
                TokenKind::If(expr)
            } else {
                TokenKind::ElseIf(expr)
            };
            self.push(kind, caps[0].len());
            return Ok(());
        }

        if let Some(m) = ELSE_TAG.find(rest) {
            self.push(TokenKind::Else, m.end());
            return Ok(());
        }

        if rest.starts_with(END_IF) {
            self.push(TokenKind::EndIf, END_IF.len());
            return Ok(());
        }

        if let Some(caps) = LOOP_TAG.captures(rest) {
            let name = caps[2].to_string();
            let kind = if caps[1].is_empty() {
                TokenKind::Loop(name)
            } else {
                TokenKind::EndLoop(name)
            };
            self.push(kind, caps[0].len());
            return Ok(());
        }

        if let Some(caps) = INCLUDE_TAG.captures(rest) {
            let name = caps[1].trim().to_string();
            self.push(TokenKind::Include(name), caps[0].len());
            return Ok(());
        }

        // 不是标签，花括号按普通文本处理
        self.text.push('{');
        self.advance(1);
        Ok(())
    }
}

/// 把一段模板源码切分为标记序列
pub fn tokenize(source: &str, file: &str) -> Result<Vec<Token>, Exception> {
    Lexer {
        source,
        lines: source.lines().collect(),
        file,
        pos: 0,
        line: 1,
        tokens: Vec::new(),
        text: String::new(),
    }
    .run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, "test.html")
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn var(scope: Option<&str>, path: &[&str]) -> TokenKind {
        TokenKind::Reference(Reference::Var(VarRef {
            scope: scope.map(|s| s.to_string()),
            path: path.iter().map(|s| s.to_string()).collect(),
        }))
    }

    #[test]
    fn test_variables_and_text() {
        assert_eq!(
            kinds("Hello {NAME}, {C:COUNT} {posts.TITLE} {USER:EMAIL}"),
            vec![
                TokenKind::Text("Hello ".into()),
                var(None, &["NAME"]),
                TokenKind::Text(", ".into()),
                TokenKind::Reference(Reference::Constant("COUNT".into())),
                TokenKind::Text(" ".into()),
                var(Some("posts"), &["TITLE"]),
                TokenKind::Text(" ".into()),
                var(None, &["USER", "EMAIL"]),
            ]
        );
    }

    #[test]
    fn test_non_tags_are_text() {
        assert_eq!(
            kinds("a { color: red; } {x} {A} {12}"),
            vec![TokenKind::Text("a { color: red; } {x} {A} {12}".into())]
        );
    }

    #[test]
    fn test_block_tags() {
        assert_eq!(
            kinds("{IF: AGE gt 17}{ELSEIF: AGE eq 3}{ELSE:}{/IF}{LOOP: a.b}{/LOOP: a.b}{INCLUDE: common/header.html }"),
            vec![
                TokenKind::If("AGE gt 17".into()),
                TokenKind::ElseIf("AGE eq 3".into()),
                TokenKind::Else,
                TokenKind::EndIf,
                TokenKind::Loop("a.b".into()),
                TokenKind::EndLoop("a.b".into()),
                TokenKind::Include("common/header.html".into()),
            ]
        );
    }

    #[test]
    fn test_ignore_block_is_verbatim() {
        assert_eq!(
            kinds("x{IGNORE}{NAME}{IF: A}{/IGNORE}y"),
            vec![TokenKind::Text("x{NAME}{IF: A}y".into())]
        );
    }

    #[test]
    fn test_unterminated_ignore_is_error() {
        assert!(matches!(
            tokenize("{IGNORE} never closed", "t.html"),
            Err(Exception::TemplateSyntax { .. })
        ));
        assert!(tokenize("stray {/IGNORE}", "t.html").is_err());
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("line1\n\nline3 {NAME}\n{IF: X1}", "t.html").unwrap();
        let name = tokens.iter().find(|t| matches!(t.kind, TokenKind::Reference(_))).unwrap();
        assert_eq!(name.span.line, 3);
        assert_eq!(name.span.snippet, "line3 {NAME}");
        let cond = tokens.last().unwrap();
        assert_eq!(cond.span.line, 4);
    }

    #[test]
    fn test_source_line_scans_backwards() {
        let source = "first\nsecond\n\n   \n";
        assert_eq!(source_line(source, 4), "second");
        assert_eq!(source_line(source, 1), "first");
        assert_eq!(source_line("", 3), "");
    }

    #[test]
    fn test_classify_name() {
        assert_eq!(
            classify_name("C:MAX_ROWS"),
            Some(Reference::Constant("MAX_ROWS".into()))
        );
        assert!(matches!(classify_name("a.b.NAME"), Some(Reference::Var(v)) if v.scope.as_deref() == Some("a.b")));
        assert_eq!(classify_name("name"), None);
        assert_eq!(classify_name("42"), None);
    }
}
