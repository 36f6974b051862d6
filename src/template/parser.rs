//! 把标记序列组装为指令树。
//!
//! 先展开 `{INCLUDE: ...}`（递归，被包含文件的标记直接拼接进来，因此块可以跨文件配对），
//! 再按块结构构建 IF / LOOP 节点。结构错误一律报告为 `TemplateSyntax`。

use super::ast::{Branch, Node, Span};
use super::expr;
use super::lexer::{tokenize, Reference, Token, TokenKind};
use crate::exception::Exception;

/// 包含的最大嵌套层数，超过视为递归包含
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// 为 `{INCLUDE: ...}` 提供被包含模板的原始内容
pub trait SourceLoader {
    fn load_source(&self, name: &str) -> Result<String, Exception>;
}

fn syntax_error(span: &Span, message: String) -> Exception {
    Exception::TemplateSyntax {
        file: span.file.clone(),
        line: span.line,
        message,
    }
}

fn expand_includes(
    tokens: Vec<Token>,
    loader: &dyn SourceLoader,
    depth: usize,
) -> Result<Vec<Token>, Exception> {
    let mut expanded = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token.kind {
            TokenKind::Include(name) => {
                if depth >= MAX_INCLUDE_DEPTH {
                    return Err(syntax_error(
                        &token.span,
                        format!(
                            "include of '{}' nested deeper than {} levels, is it including itself?",
                            name, MAX_INCLUDE_DEPTH
                        ),
                    ));
                }
                let source = loader.load_source(&name)?;
                let included = tokenize(&source, &name)?;
                expanded.extend(expand_includes(included, loader, depth + 1)?);
            }
            kind => expanded.push(Token {
                kind,
                span: token.span,
            }),
        }
    }
    Ok(expanded)
}

/// 块结束的原因
enum Stop {
    Eof,
    ElseIf(String, Span),
    Else(Span),
    EndIf(Span),
    EndLoop(String, Span),
}

fn unexpected(stop: Stop, context: &str) -> Exception {
    match stop {
        Stop::Eof => Exception::TemplateSyntax {
            file: String::new(),
            line: 0,
            message: format!("unexpected end of template {}", context),
        },
        Stop::ElseIf(_, span) => syntax_error(&span, format!("{{ELSEIF:}} {}", context)),
        Stop::Else(span) => syntax_error(&span, format!("{{ELSE:}} {}", context)),
        Stop::EndIf(span) => syntax_error(&span, format!("{{/IF}} {}", context)),
        Stop::EndLoop(name, span) => {
            syntax_error(&span, format!("{{/LOOP: {}}} {}", name, context))
        }
    }
}

struct TreeBuilder {
    tokens: std::vec::IntoIter<Token>,
    loops: Vec<String>,
}

impl TreeBuilder {
    fn block(&mut self) -> Result<(Vec<Node>, Stop), Exception> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.next() {
            match token.kind {
                TokenKind::Text(text) => match nodes.last_mut() {
                    Some(Node::Text(previous)) => previous.push_str(&text),
                    _ => nodes.push(Node::Text(text)),
                },
                TokenKind::Reference(Reference::Var(var)) => nodes.push(Node::Print(var)),
                TokenKind::Reference(Reference::Constant(name)) => {
                    nodes.push(Node::Constant(name))
                }
                TokenKind::If(source) => nodes.push(self.conditional(source, token.span)?),
                TokenKind::Loop(name) => nodes.push(self.repeat(name, token.span)?),
                TokenKind::ElseIf(source) => return Ok((nodes, Stop::ElseIf(source, token.span))),
                TokenKind::Else => return Ok((nodes, Stop::Else(token.span))),
                TokenKind::EndIf => return Ok((nodes, Stop::EndIf(token.span))),
                TokenKind::EndLoop(name) => return Ok((nodes, Stop::EndLoop(name, token.span))),
                TokenKind::Include(name) => {
                    return Err(syntax_error(
                        &token.span,
                        format!("unresolved include '{}'", name),
                    ))
                }
            }
        }
        Ok((nodes, Stop::Eof))
    }

    fn conditional(&mut self, source: String, span: Span) -> Result<Node, Exception> {
        let opened = span.clone();
        let mut branches = Vec::new();
        let mut otherwise = None;
        let mut source = source;
        let mut span = span;

        loop {
            let condition = expr::parse(&source).map_err(|message| {
                syntax_error(&span, format!("invalid condition '{}': {}", source, message))
            })?;
            let (body, stop) = self.block()?;
            branches.push(Branch {
                condition,
                body,
                span: span.clone(),
            });
            match stop {
                Stop::ElseIf(next, next_span) => {
                    source = next;
                    span = next_span;
                }
                Stop::Else(_) => {
                    let (body, stop) = self.block()?;
                    match stop {
                        Stop::EndIf(_) => {
                            otherwise = Some(body);
                            break;
                        }
                        Stop::Eof => {
                            return Err(syntax_error(&opened, "unterminated {IF:} block".to_string()))
                        }
                        other => {
                            return Err(unexpected(
                                other,
                                &format!("after {{ELSE:}} of the {{IF:}} opened at line {}", opened.line),
                            ))
                        }
                    }
                }
                Stop::EndIf(_) => break,
                Stop::Eof => {
                    return Err(syntax_error(&opened, "unterminated {IF:} block".to_string()))
                }
                other => {
                    return Err(unexpected(
                        other,
                        &format!("inside the {{IF:}} opened at line {}", opened.line),
                    ))
                }
            }
        }

        Ok(Node::If {
            branches,
            otherwise,
        })
    }

    fn repeat(&mut self, name: String, span: Span) -> Result<Node, Exception> {
        let (parent, key) = match name.rsplit_once('.') {
            Some((parent, key)) => {
                if parent.is_empty() || key.is_empty() {
                    return Err(syntax_error(&span, format!("invalid loop name '{}'", name)));
                }
                if self.loops.last().map(|s| s.as_str()) != Some(parent) {
                    return Err(syntax_error(
                        &span,
                        format!(
                            "loop '{}' must be placed directly inside loop '{}'",
                            name, parent
                        ),
                    ));
                }
                (Some(parent.to_string()), key.to_string())
            }
            // 不带点的循环写在其他循环内时，从外层当前行取数据
            None => (self.loops.last().cloned(), name.clone()),
        };

        self.loops.push(name.clone());
        let (body, stop) = self.block()?;
        self.loops.pop();

        match stop {
            Stop::EndLoop(closing, _) if closing == name => Ok(Node::Loop {
                name,
                parent,
                key,
                body,
                span,
            }),
            Stop::Eof => Err(syntax_error(
                &span,
                format!("unterminated {{LOOP: {}}} block", name),
            )),
            other => Err(unexpected(
                other,
                &format!("inside {{LOOP: {}}} opened at line {}", name, span.line),
            )),
        }
    }
}

/// 解析模板源码，得到指令树
pub fn parse(source: &str, file: &str, loader: &dyn SourceLoader) -> Result<Vec<Node>, Exception> {
    let tokens = expand_includes(tokenize(source, file)?, loader, 0)?;
    let mut builder = TreeBuilder {
        tokens: tokens.into_iter(),
        loops: Vec::new(),
    };
    let (nodes, stop) = builder.block()?;
    match stop {
        Stop::Eof => Ok(nodes),
        other => Err(unexpected(other, "without a matching opening tag")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Sources(HashMap<&'static str, &'static str>);

    impl SourceLoader for Sources {
        fn load_source(&self, name: &str) -> Result<String, Exception> {
            self.0
                .get(name)
                .map(|s| s.to_string())
                .ok_or_else(|| Exception::TemplateNotFound(name.to_string()))
        }
    }

    fn none() -> Sources {
        Sources(HashMap::new())
    }

    fn syntax_message(result: Result<Vec<Node>, Exception>) -> String {
        match result {
            Err(Exception::TemplateSyntax { message, .. }) => message,
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_if_elseif_else_tree() {
        let nodes = parse(
            "{IF: AGE gt 17}adult{ELSEIF: AGE gt 12}teen{ELSE:}child{/IF}",
            "t.html",
            &none(),
        )
        .unwrap();
        match &nodes[..] {
            [Node::If {
                branches,
                otherwise: Some(otherwise),
            }] => {
                assert_eq!(branches.len(), 2);
                assert_eq!(branches[1].body, vec![Node::Text("teen".into())]);
                assert_eq!(otherwise, &vec![Node::Text("child".into())]);
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_nested_loop_tree() {
        let nodes = parse(
            "{LOOP: posts}{posts.TITLE}{LOOP: posts.tags}{posts.tags.TAG}{/LOOP: posts.tags}{/LOOP: posts}",
            "t.html",
            &none(),
        )
        .unwrap();
        match &nodes[..] {
            [Node::Loop { name, parent, body, .. }] => {
                assert_eq!(name, "posts");
                assert!(parent.is_none());
                assert!(matches!(
                    &body[1],
                    Node::Loop { parent: Some(p), key, .. } if p == "posts" && key == "tags"
                ));
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_undotted_inner_loop_reads_enclosing_row() {
        let nodes = parse(
            "{LOOP: posts}{LOOP: tags}{tags.NAME}{/LOOP: tags}{/LOOP: posts}",
            "t.html",
            &none(),
        )
        .unwrap();
        match &nodes[..] {
            [Node::Loop { parent: None, body, .. }] => assert!(matches!(
                &body[0],
                Node::Loop { name, parent: Some(p), key, .. }
                    if name == "tags" && p == "posts" && key == "tags"
            )),
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_includes_are_spliced_before_pairing() {
        let sources = Sources(HashMap::from([
            ("open.html", "{IF: SHOW}<b>{INCLUDE: inner.html}"),
            ("inner.html", "{NAME}"),
        ]));
        let nodes = parse("{INCLUDE: open.html}</b>{/IF}", "page.html", &sources).unwrap();
        assert!(matches!(&nodes[..], [Node::If { .. }]));
    }

    #[test]
    fn test_recursive_include_is_rejected() {
        let sources = Sources(HashMap::from([("self.html", "x{INCLUDE: self.html}")]));
        let message = syntax_message(parse("{INCLUDE: self.html}", "page.html", &sources));
        assert!(message.contains("nested deeper"));
    }

    #[test]
    fn test_missing_include_is_not_found() {
        assert_eq!(
            parse("{INCLUDE: nope.html}", "page.html", &none()),
            Err(Exception::TemplateNotFound("nope.html".into()))
        );
    }

    #[test]
    fn test_malformed_blocks() {
        assert!(syntax_message(parse("{IF: AGE gt 1}x", "t.html", &none())).contains("unterminated"));
        assert!(syntax_message(parse("x{/IF}", "t.html", &none())).contains("without a matching"));
        assert!(syntax_message(parse("{ELSE:}", "t.html", &none())).contains("{ELSE:}"));
        assert!(syntax_message(parse("{LOOP: rows}x", "t.html", &none())).contains("unterminated"));
        assert!(syntax_message(parse(
            "{LOOP: rows}{/LOOP: cols}",
            "t.html",
            &none()
        ))
        .contains("{/LOOP: cols}"));
        assert!(syntax_message(parse(
            "{IF: AA}{ELSE:}{ELSE:}{/IF}",
            "t.html",
            &none()
        ))
        .contains("after {ELSE:}"));
        assert!(syntax_message(parse(
            "{IF: AA}{LOOP: rows}{/IF}{/LOOP: rows}",
            "t.html",
            &none()
        ))
        .contains("inside {LOOP: rows}"));
    }

    #[test]
    fn test_nested_loop_needs_its_parent() {
        let message = syntax_message(parse("{LOOP: posts.tags}{/LOOP: posts.tags}", "t.html", &none()));
        assert!(message.contains("directly inside loop 'posts'"));
    }

    #[test]
    fn test_invalid_condition_reports_line() {
        match parse("a\nb\n{IF: AGE = 3}{/IF}", "t.html", &none()) {
            Err(Exception::TemplateSyntax { line, message, .. }) => {
                assert_eq!(line, 3);
                assert!(message.contains("AGE = 3"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
