// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 负责将 TCP 流中读取的原始字节解析为强类型的 `Request` 结构体：
//! 1. 请求行（方法、路径、版本）以及路径上的查询参数。
//! 2. 常用标头：`User-Agent`、`Accept-Encoding`、`Cookie`、`Content-Type`、`Content-Length`。
//! 3. `application/x-www-form-urlencoded` 表单请求体。
//!
//! 另外提供控制器常用的输入读取方法，如 [`Request::get_input`]、[`Request::submitted`]。

use std::collections::BTreeMap;

use log::{debug, error};

use crate::{
    exception::Exception,
    param::*,
    util::parse_query,
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// 表示一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法（GET, POST 等）
    method: HttpRequestMethod,
    /// 请求的资源路径（包含查询字符串）
    path: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 客户端标识字符串
    user_agent: String,
    /// 客户端支持的压缩编码列表（按解析顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    /// 查询串参数
    query: BTreeMap<String, String>,
    /// 表单参数，仅在 POST 且为 urlencoded 时存在
    form: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
    /// 标头声明的请求体长度
    content_length: usize,
}

/// 在原始报文中定位标头结束位置，返回请求体起始下标
pub fn header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
}

/// 连接上已读取数据的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    Incomplete,
    Complete,
    /// 标头或声明的请求体超过上限
    TooLarge,
}

/// 标头中声明的 `Content-Length`。全为数字但超出 `usize` 的值视为 `usize::MAX`。
fn declared_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| {
            let value = value.trim();
            match value.parse() {
                Ok(length) => length,
                Err(_) if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                    usize::MAX
                }
                Err(_) => 0,
            }
        })
        .unwrap_or(0)
}

/// 判断缓冲区中的请求是否已经读完，`limit` 为标头加请求体的最大字节数
pub fn read_progress(buffer: &[u8], limit: usize) -> ReadProgress {
    match header_end(buffer) {
        Some(end) => {
            let length = declared_length(&buffer[..end]);
            if end > limit || length > limit - end {
                ReadProgress::TooLarge
            } else if buffer.len() >= end + length {
                ReadProgress::Complete
            } else {
                ReadProgress::Incomplete
            }
        }
        None if buffer.len() > limit => ReadProgress::TooLarge,
        None => ReadProgress::Incomplete,
    }
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据（标头与请求体）。
    /// * `id` - 全局请求 ID，用于在多线程环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let request_string = match std::str::from_utf8(buffer) {
            Ok(string) => string.trim_end_matches('\0'),
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let (head, body) = match request_string.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body),
            None => (request_string, ""),
        };
        let request_lines: Vec<&str> = head.split(CRLF).collect();

        // 1. 解析请求行 (e.g., "GET /index HTTP/1.1")
        let first_line_parts: Vec<&str> = request_lines[0].split(' ').collect();
        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_lines[0]);
            return Err(Exception::UnSupportedRequestMethod);
        }

        let method_str = first_line_parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "OPTIONS" => HttpRequestMethod::Options,
            "POST" => HttpRequestMethod::Post,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        let path = first_line_parts[1..first_line_parts.len() - 1].join(" ");
        let query = match path.split_once('?') {
            Some((_, q)) => parse_query(q),
            None => BTreeMap::new(),
        };

        // 2. 标头
        let mut user_agent = String::new();
        let mut accept_encoding = vec![];
        let mut cookies = BTreeMap::new();
        let mut content_type = String::new();
        let mut content_length = 0;
        for line in request_lines.iter().skip(1) {
            let (name, value) = match line.split_once(':') {
                Some((name, value)) => (name.trim().to_lowercase(), value.trim()),
                None => continue,
            };
            match name.as_str() {
                "user-agent" => user_agent = value.to_string(),
                "accept-encoding" => {
                    // 只要包含关键词即视为支持
                    if value.contains("gzip") {
                        accept_encoding.push(HttpEncoding::Gzip);
                    }
                    if value.contains("deflate") {
                        accept_encoding.push(HttpEncoding::Deflate);
                    }
                    if value.contains("br") {
                        accept_encoding.push(HttpEncoding::Br);
                    }
                }
                "cookie" => {
                    for pair in value.split(';') {
                        if let Some((k, v)) = pair.split_once('=') {
                            cookies.insert(k.trim().to_string(), v.trim().to_string());
                        }
                    }
                }
                "content-type" => content_type = value.to_lowercase(),
                "content-length" => content_length = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        // 3. 表单
        let form = if method == HttpRequestMethod::Post && content_type.starts_with(FORM_CONTENT_TYPE)
        {
            debug!("[ID{}]解析表单请求体，长度{}", id, body.len());
            parse_query(body)
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            method,
            path,
            version,
            user_agent,
            accept_encoding,
            query,
            form,
            cookies,
            content_length,
        })
    }
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 获取请求路径（含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// 获取客户端支持的压缩算法列表
    pub fn accept_encoding(&self) -> &Vec<HttpEncoding> {
        &self.accept_encoding
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn form(&self) -> &BTreeMap<String, String> {
        &self.form
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|s| s.as_str())
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }
}

// --- 控制器使用的输入读取 ---

impl Request {
    /// 按名称读取输入，先查表单再查查询串
    pub fn get_input(&self, name: &str) -> Option<&str> {
        self.form
            .get(name)
            .or_else(|| self.query.get(name))
            .map(|s| s.as_str())
    }

    /// 读取字符串输入，不存在时返回默认值
    pub fn input_or(&self, name: &str, default: &str) -> String {
        self.get_input(name).unwrap_or(default).to_string()
    }

    /// 读取整数输入。值存在但不是整数时同样返回默认值。
    pub fn input_int(&self, name: &str, default: i64) -> i64 {
        self.get_input(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// 读取布尔输入，识别 `1/true/on/yes` 与 `0/false/off/no`
    pub fn input_bool(&self, name: &str, default: bool) -> bool {
        match self.get_input(name).map(|v| v.trim().to_lowercase()) {
            Some(v) if matches!(v.as_str(), "1" | "true" | "on" | "yes") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "off" | "no" | "") => false,
            _ => default,
        }
    }

    /// 请求中是否带有 `confirm=1`
    pub fn confirmed(&self) -> bool {
        self.input_int("confirm", 0) == 1
    }

    /// 是否提交了表单（存在非空的 `submit` 字段）
    pub fn submitted(&self) -> bool {
        !self.input_or("submit", "").is_empty()
    }
}
