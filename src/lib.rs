/// Disguise Relay 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod address;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod rate_limiter;
pub mod registry;
pub mod request;
pub mod server;
pub mod session;
pub mod settings;
pub mod sys;
pub mod tls;
pub mod transport;

// 重新导出常用类型
pub use address::Address;
pub use classifier::{ClassificationResult, ProtocolClassifier, ProtocolKind};
pub use config::{ListenerConfig, RelayConfig, TlsListenerConfig};
pub use connection::{Connection, Role};
pub use error::{RelayError, Result};
pub use listener::Listener;
pub use registry::BackendRegistry;
pub use server::{run_server, RelayServer};
pub use session::{plan_route, ProxySession, RoutePlan, SessionState, SessionSummary};
pub use settings::{RelaySettings, UnknownTrafficPolicy};
