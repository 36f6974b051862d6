use std::collections::BTreeMap;

use ::url::form_urlencoded;

use crate::param::STATUS_CODES;

/// 不依赖模板系统的静态 HTML 页面，用于 404 页面和模板系统本身出错时的兜底输出。
pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

const BASE_CSS: &str = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            ";

impl HtmlBuilder {
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let description = match note {
            Some(n) => n,
            None => match STATUS_CODES.get(&code) {
                Some(d) => *d,
                None => {
                    panic!("非法的状态码：{}", code);
                }
            },
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            ",
            code, description
        );
        Self {
            title,
            css: BASE_CSS.to_string(),
            body,
        }
    }

    /// 致命错误页。`message` 原样插入，调用方负责转义。
    pub fn from_error(message: &str) -> Self {
        let body = format!(
            r"
            <h2>Fatal Application Error</h2>
            <h3>This error will need fixed internally.</h3>
            <p>{}</p>
            ",
            message
        );
        Self {
            title: "Application Error".to_string(),
            css: BASE_CSS.to_string(),
            body,
        }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.title, self.css, self.body
        )
    }
}

/// 转义 HTML 特殊字符
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// 解析 `application/x-www-form-urlencoded` 形式的 `a=1&b=2`，同名参数以后出现的为准。
/// `+` 解码为空格，非法的 `%` 转义原样保留。
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// 把参数合并进 URL 的查询串，已存在的同名参数会被替换
pub fn url(base: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return base.to_string();
    }
    let (path, current) = match base.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (base, BTreeMap::new()),
    };
    let mut query = current;
    for (name, value) in params {
        query.insert(name.to_string(), value.clone());
    }
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter())
        .finish();
    format!("{}?{}", path, encoded)
}
