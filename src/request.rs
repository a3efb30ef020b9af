/// HTTP 请求解析
///
/// 只在没有命中任何协议签名时使用：识别 CONNECT 目标，或者重建请求后转发给默认后端。
/// 不支持 chunked 编码和折叠头部。
use crate::address::Address;
use crate::error::{RelayError, Result};
use http::Method;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// 有序的头部集合
///
/// 重名头部（大小写不敏感）以最后一次出现的值为准，位置保持第一次出现的位置。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 解析后的 HTTP 请求
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: Method,
    pub target: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// 超出 `Content-Length` 的剩余字节，不属于本请求
    pub trailing: Vec<u8>,
}

impl ParsedRequest {
    /// 从缓冲区解析请求
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        let (head, rest) = match find(buffer, HEADER_END) {
            Some(pos) => (&buffer[..pos], &buffer[pos + HEADER_END.len()..]),
            None => (buffer, &buffer[buffer.len()..]),
        };

        let mut lines = split_lines(head);
        let request_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| RelayError::malformed("empty request line"))?;
        let (method, target, version) = parse_request_line(request_line)?;

        let mut headers = Headers::new();
        for line in lines {
            let line = String::from_utf8_lossy(line);
            // 没有冒号的行直接忽略
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() {
                    headers.insert(name, value.trim());
                }
            }
        }

        let body_len = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .map_or(rest.len(), |len| len.min(rest.len()));

        Ok(Self {
            method,
            target,
            version,
            headers,
            body: rest[..body_len].to_vec(),
            trailing: rest[body_len..].to_vec(),
        })
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    /// CONNECT 请求的目标地址；其他方法或目标无法解析时返回 `None`
    pub fn connect_target(&self) -> Option<Address> {
        if !self.is_connect() {
            return None;
        }
        self.target.parse().ok()
    }

    /// 请求头之后客户端已经发送的全部字节：正文加剩余部分
    pub fn payload(&self) -> Vec<u8> {
        [self.body.as_slice(), self.trailing.as_slice()].concat()
    }

    /// 重新序列化为请求行 + 头部 + 空行 + 正文
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.target.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.version.as_bytes());
        out.extend_from_slice(CRLF);
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CRLF);
        out.extend_from_slice(&self.body);
        out
    }
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, String)> {
    let line = std::str::from_utf8(line)
        .map_err(|_| RelayError::malformed("request line is not valid UTF-8"))?;
    let mut parts = line.split(' ').filter(|p| !p.is_empty());
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RelayError::malformed(format!(
            "expected 'METHOD TARGET VERSION', got {:?}",
            line
        )));
    };

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| RelayError::malformed(format!("invalid method {:?}", method)))?;

    Ok((method, target.to_string(), version.to_string()))
}

/// 按 CRLF 切分；末尾不带 CRLF 的残行也保留
fn split_lines(head: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = Some(head);
    std::iter::from_fn(move || {
        let current = rest?;
        match find(current, CRLF) {
            Some(pos) => {
                rest = Some(&current[pos + CRLF.len()..]);
                Some(&current[..pos])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
    .filter(|line| !line.is_empty())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
