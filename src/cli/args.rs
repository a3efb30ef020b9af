use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "disguise-relay")]
#[command(
    author,
    version,
    about = "Single-port relay that hides SSH, OpenVPN and VMess tunnels behind an HTTP upgrade",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 按配置文件运行
    Run {
        /// 配置文件路径
        #[arg(short, long, default_value = "relay.toml")]
        config: String,
    },
    /// 只用命令行参数运行单个监听器
    Serve(ServeArgs),
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,
    },
    /// 输出示例配置
    Template {
        /// 输出文件路径（默认打印到标准输出）
        #[arg(short, long)]
        output: Option<String>,
    },
    /// 生成自签名证书
    Cert {
        /// 证书输出路径
        #[arg(long, default_value = "cert.pem")]
        cert_out: String,

        /// 私钥输出路径
        #[arg(long, default_value = "key.pem")]
        key_out: String,

        /// 证书的 Common Name
        #[arg(long, default_value = "localhost")]
        common_name: String,

        /// 证书的 SubjectAltName（用逗号分隔多个）
        #[arg(long, value_delimiter = ',', value_name = "DNS,...")]
        alt_names: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// 监听地址
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// 监听端口
    #[arg(short, long, default_value_t = 80)]
    pub port: u16,

    /// listen 队列长度
    #[arg(long, default_value_t = 128)]
    pub backlog: u32,

    /// 后端所在主机
    #[arg(long, default_value = "127.0.0.1")]
    pub backend_host: String,

    /// SSH 后端端口
    #[arg(long, default_value_t = 22)]
    pub ssh_port: u16,

    /// OpenVPN 后端端口
    #[arg(long, default_value_t = 1194)]
    pub openvpn_port: u16,

    /// V2Ray (VMess) 后端端口
    #[arg(long, default_value_t = 1080)]
    pub v2ray_port: u16,

    /// 以 TLS 方式接入
    #[arg(long)]
    pub https: bool,

    /// TLS 证书（可与私钥合并在同一个 PEM 文件中）；省略时自动生成
    #[arg(long, value_name = "PATH", requires = "https")]
    pub cert: Option<PathBuf>,

    /// TLS 私钥
    #[arg(long, value_name = "PATH", requires = "cert")]
    pub key: Option<PathBuf>,

    /// 未识别的流量只回复伪装响应，等待隧道数据
    #[arg(long)]
    pub await_tunnel: bool,
}
