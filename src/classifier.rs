/// 协议嗅探
///
/// 根据客户端第一块数据的前缀字节判断隧道协议。规则按顺序匹配，先命中者生效：
/// OpenVPN 的标记本身以 `0x00` 开头，所以必须排在 VMess 规则之前。
use crate::address::Address;
use crate::registry::BackendRegistry;
use std::fmt;

/// OpenVPN hard-reset 标记
pub const OPENVPN_HARD_RESET: &[u8] = &[0x00, 0x68];

/// VMess 类协议的首字节
pub const VMESS_LEADING_BYTE: &[u8] = &[0x00];

/// SSH 版本交换 banner 前缀
pub const SSH_BANNER: &[u8] = b"SSH-";

/// 嗅探出的协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    Ssh,
    OpenVpn,
    VMess,
    Unknown,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Ssh => write!(f, "ssh"),
            ProtocolKind::OpenVpn => write!(f, "openvpn"),
            ProtocolKind::VMess => write!(f, "vmess"),
            ProtocolKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// 一条前缀规则
#[derive(Debug, Clone, Copy)]
pub struct SignatureRule {
    pub prefix: &'static [u8],
    pub kind: ProtocolKind,
}

impl SignatureRule {
    pub fn matches(&self, chunk: &[u8]) -> bool {
        chunk.starts_with(self.prefix)
    }
}

/// 有序规则表
pub const SIGNATURE_RULES: &[SignatureRule] = &[
    SignatureRule {
        prefix: OPENVPN_HARD_RESET,
        kind: ProtocolKind::OpenVpn,
    },
    SignatureRule {
        prefix: VMESS_LEADING_BYTE,
        kind: ProtocolKind::VMess,
    },
    SignatureRule {
        prefix: SSH_BANNER,
        kind: ProtocolKind::Ssh,
    },
];

/// 分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub kind: ProtocolKind,
    pub backend: Option<Address>,
}

impl ClassificationResult {
    pub fn is_unknown(&self) -> bool {
        self.kind == ProtocolKind::Unknown
    }
}

/// 只看前缀判断协议，不做任何 I/O
pub fn detect(chunk: &[u8]) -> ProtocolKind {
    SIGNATURE_RULES
        .iter()
        .find(|rule| rule.matches(chunk))
        .map(|rule| rule.kind)
        .unwrap_or(ProtocolKind::Unknown)
}

/// 协议分类器，持有只读的后端注册表
#[derive(Debug, Clone, Copy)]
pub struct ProtocolClassifier<'a> {
    registry: &'a BackendRegistry,
}

impl<'a> ProtocolClassifier<'a> {
    pub fn new(registry: &'a BackendRegistry) -> Self {
        Self { registry }
    }

    pub fn classify(&self, first_chunk: &[u8]) -> ClassificationResult {
        let kind = detect(first_chunk);
        ClassificationResult {
            kind,
            backend: self.registry.backend_for(kind).cloned(),
        }
    }
}
