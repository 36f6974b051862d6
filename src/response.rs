use crate::{
    param::*,
    request::Request,
    util::HtmlBuilder,
};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error};

use std::io::{self, Write};

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: u64,
    date: DateTime<Utc>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    location: Option<String>,
    set_cookies: Vec<String>,
    content: Option<Bytes>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_length: 0,
            date: Utc::now(),
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            allow: None,
            location: None,
            set_cookies: Vec::new(),
            content: None,
        }
    }

    /// 生成 HTML 响应，按 `Accept-Encoding` 压缩；HEAD 请求只返回标头。
    pub fn from_html(html: &str, code: u16, request: &Request, id: u128) -> Response {
        let mut response = Self::new();
        response.set_code(code);
        response.content_type = Some("text/html;charset=utf-8".to_string());
        if request.method() == HttpRequestMethod::Head {
            debug!("[ID{}]请求方法为HEAD，不发送响应体", id);
            response.content_length = html.len() as u64;
            return response;
        }
        response.content_encoding = decide_encoding(request.accept_encoding());
        match response.content_encoding {
            Some(HttpEncoding::Gzip) => debug!("[ID{}]使用Gzip压缩编码", id),
            Some(HttpEncoding::Br) => debug!("[ID{}]使用Brotli压缩编码", id),
            Some(HttpEncoding::Deflate) => debug!("[ID{}]使用Deflate压缩编码", id),
            None => debug!("[ID{}]不进行压缩", id),
        };
        let content_compressed = match compress(Vec::from(html), response.content_encoding) {
            Ok(c) => c,
            Err(e) => {
                error!("[ID{}]压缩HTML失败: {}，返回未压缩内容", id, e);
                response.content_encoding = None;
                Vec::from(html)
            }
        };
        response.content_length = content_compressed.len() as u64;
        response.content = Some(Bytes::from(content_compressed));
        response
    }

    /// 303 跳转
    pub fn redirect(location: &str, id: u128) -> Response {
        debug!("[ID{}]跳转到{}", id, location);
        let mut response = Self::new();
        response.set_code(303);
        response.location = Some(location.to_string());
        response
    }

    pub fn from_status_code(code: u16, request: &Request, id: u128) -> Response {
        let html = HtmlBuilder::from_status_code(code, None).build();
        Self::from_html(&html, code, request, id)
    }

    pub fn response_404(request: &Request, id: u128) -> Self {
        Self::from_status_code(404, request, id)
    }

    pub fn response_405(request: &Request, id: u128) -> Self {
        let mut response = Self::from_status_code(405, request, id);
        response.allow = Some(ALLOWED_METHODS.to_vec());
        response
    }

    /// 无法解析请求时使用，此时没有 `Request` 可用于内容协商
    pub fn response_400() -> Self {
        Self::without_request(400)
    }

    /// 请求超过大小上限，不再读取剩余数据
    pub fn response_413() -> Self {
        Self::without_request(413)
    }

    fn without_request(code: u16) -> Self {
        let html = HtmlBuilder::from_status_code(code, None).build();
        let mut response = Self::new();
        response.set_code(code);
        response.content_type = Some("text/html;charset=utf-8".to_string());
        response.content_length = html.len() as u64;
        response.content = Some(Bytes::from(html));
        response
    }

    pub fn with_cookie(mut self, cookie: String) -> Self {
        self.set_cookies.push(cookie);
        self
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                panic!();
            }
        };
        self
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        if self.content.is_none() && self.content_type.is_none() {
            assert_eq!(self.content_encoding, None);
        }
        let version: &str = match self.version {
            HttpVersion::V1_1 => "HTTP/1.1",
        };

        let mut header = format!(
            "{} {} {}{}",
            version, self.status_code, self.information, CRLF
        );
        if let Some(t) = &self.content_type {
            header.push_str(&["Content-Type: ", t.as_str(), CRLF].concat());
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&format!("Content-Encoding: {}{}", e, CRLF));
        }
        header.push_str(&format!("Content-Length: {}{}", self.content_length, CRLF));
        header.push_str(&["Date: ", format_date(&self.date).as_str(), CRLF].concat());
        header.push_str(&["Server: ", self.server_name.as_str(), CRLF].concat());
        if let Some(location) = &self.location {
            header.push_str(&["Location: ", location.as_str(), CRLF].concat());
        }
        for cookie in &self.set_cookies {
            header.push_str(&["Set-Cookie: ", cookie.as_str(), CRLF].concat());
        }
        if let Some(a) = &self.allow {
            let methods: Vec<String> = a.iter().map(|m| m.to_string()).collect();
            header.push_str(&["Allow: ", methods.join(", ").as_str(), CRLF].concat());
        }
        header.push_str(CRLF);

        [
            header.as_bytes(),
            match &self.content {
                Some(c) => &c[..],
                None => &b""[..],
            },
        ]
        .concat()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn cookies(&self) -> &[String] {
        &self.set_cookies
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc2822()
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let Ok(ref compressed) = result {
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes",
            mode,
            original_size,
            compressed.len()
        );
    }

    result
}

/// 优先 Brotli，其次 Gzip、Deflate
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    [HttpEncoding::Br, HttpEncoding::Gzip, HttpEncoding::Deflate]
        .into_iter()
        .find(|e| accept_encoding.contains(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn request(raw: &str) -> Request {
        Request::try_from(raw.as_bytes(), 0).unwrap()
    }

    fn text(response: &Response) -> String {
        String::from_utf8_lossy(&response.as_bytes()).into_owned()
    }

    #[test]
    fn test_response_as_bytes_basic() {
        let response_str = text(&Response::new());
        assert!(response_str.starts_with("HTTP/1.1 200 OK"));
        assert!(response_str.contains("Content-Length: 0"));
        assert!(response_str.contains("Server: mvcframe"));
        assert!(response_str.contains("Date: "));
        assert!(response_str.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_html_without_compression() {
        let response = Response::from_html("<p>hi</p>", 200, &request("GET / HTTP/1.1\r\n\r\n"), 0);
        let response_str = text(&response);
        assert!(response_str.contains("Content-Type: text/html;charset=utf-8"));
        assert!(response_str.contains("Content-Length: 9"));
        assert!(response_str.ends_with("<p>hi</p>"));
    }

    #[test]
    fn test_html_gzip_round_trip() {
        let html = "<p>hello</p>".repeat(50);
        let response = Response::from_html(
            &html,
            200,
            &request("GET / HTTP/1.1\r\nAccept-Encoding: gzip\r\n\r\n"),
            0,
        );
        assert_eq!(response.content_encoding(), Some(HttpEncoding::Gzip));
        let mut decoded = String::new();
        GzDecoder::new(&response.content().unwrap()[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, html);
        assert!(text(&response).contains("Content-Encoding: gzip"));
    }

    #[test]
    fn test_head_has_no_body() {
        let response = Response::from_html("<p>hi</p>", 200, &request("HEAD / HTTP/1.1\r\n\r\n"), 0);
        assert!(response.content().is_none());
        assert!(text(&response).ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_redirect_with_cookie() {
        let response = Response::redirect("/", 0).with_cookie("SESSION_ID=abc; Path=/".into());
        let response_str = text(&response);
        assert!(response_str.starts_with("HTTP/1.1 303 See Other"));
        assert!(response_str.contains("Location: /\r\n"));
        assert!(response_str.contains("Set-Cookie: SESSION_ID=abc; Path=/\r\n"));
    }

    #[test]
    fn test_405_lists_allowed_methods() {
        let response = Response::response_405(&request("OPTIONS / HTTP/1.1\r\n\r\n"), 0);
        assert_eq!(response.status_code(), 405);
        assert!(text(&response).contains("Allow: GET, HEAD, POST"));
    }

    #[test]
    fn test_decide_encoding() {
        assert_eq!(decide_encoding(&[HttpEncoding::Gzip, HttpEncoding::Br]), Some(HttpEncoding::Br));
        assert_eq!(decide_encoding(&[HttpEncoding::Deflate]), Some(HttpEncoding::Deflate));
        assert_eq!(decide_encoding(&[]), None);
    }

    #[test]
    fn test_compress_large_data() {
        let data = vec![b'A'; 10000];
        for mode in [HttpEncoding::Gzip, HttpEncoding::Deflate, HttpEncoding::Br] {
            assert!(compress(data.clone(), Some(mode)).unwrap().len() < data.len());
        }
        assert_eq!(compress(data.clone(), None).unwrap(), data);
    }
}
