use crate::address::Address;
use crate::classifier::ProtocolKind;

/// 后端注册表：协议 → 后端地址
///
/// 启动时构造一次，之后只读；通过 `Arc<RelaySettings>` 在所有会话间共享
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRegistry {
    ssh: Address,
    openvpn: Address,
    vmess: Address,
    default: Address,
}

impl BackendRegistry {
    /// 创建注册表，未知流量默认转发到 SSH 后端
    pub fn new(ssh: Address, openvpn: Address, vmess: Address) -> Self {
        Self {
            default: ssh.clone(),
            ssh,
            openvpn,
            vmess,
        }
    }

    /// 覆盖默认后端（非 CONNECT 的未知流量）
    pub fn with_default(mut self, default: Address) -> Self {
        self.default = default;
        self
    }

    /// 查找协议对应的后端；`Unknown` 没有固定后端
    pub fn backend_for(&self, kind: ProtocolKind) -> Option<&Address> {
        match kind {
            ProtocolKind::Ssh => Some(&self.ssh),
            ProtocolKind::OpenVpn => Some(&self.openvpn),
            ProtocolKind::VMess => Some(&self.vmess),
            ProtocolKind::Unknown => None,
        }
    }

    pub fn default_backend(&self) -> &Address {
        &self.default
    }

    pub fn ssh(&self) -> &Address {
        &self.ssh
    }

    pub fn openvpn(&self) -> &Address {
        &self.openvpn
    }

    pub fn vmess(&self) -> &Address {
        &self.vmess
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new(
            Address::new("127.0.0.1", 22),
            Address::new("127.0.0.1", 1194),
            Address::new("127.0.0.1", 1080),
        )
    }
}
