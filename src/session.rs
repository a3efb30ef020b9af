/// 代理会话
///
/// 每个接入连接一个会话：读取第一块数据并分类、拨号后端、回复伪装响应，
/// 之后在两条连接之间原样搬运字节，直到任意一方关闭。
use crate::address::Address;
use crate::classifier::{ClassificationResult, ProtocolClassifier, ProtocolKind};
use crate::connection::{Connection, Outbound, Role};
use crate::error::{RelayError, Result};
use crate::request::ParsedRequest;
use crate::settings::{RelaySettings, UnknownTrafficPolicy};
use crate::transport::BoxedStream;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

/// 收到 EOF 后，把另一侧积压数据写完的最长时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Classifying,
    AwaitingBackend,
    Relaying,
    Closed,
}

/// 后端是怎么选出来的
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteVia {
    Signature(ProtocolKind),
    Connect,
    DefaultBackend,
}

impl fmt::Display for RouteVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteVia::Signature(kind) => write!(f, "{}", kind),
            RouteVia::Connect => write!(f, "connect"),
            RouteVia::DefaultBackend => write!(f, "default"),
        }
    }
}

/// 对第一块数据的处理决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePlan {
    /// 拨号到 `backend`，连接建立后先把 `forward` 发给后端
    Dial {
        via: RouteVia,
        backend: Address,
        forward: Vec<u8>,
    },
    /// 只回复伪装响应，等待下一块数据
    Await,
}

/// 纯函数：根据客户端数据和设置决定路由
pub fn plan_route(chunk: &[u8], settings: &RelaySettings) -> (ClassificationResult, RoutePlan) {
    let classification = ProtocolClassifier::new(&settings.registry).classify(chunk);
    if let Some(backend) = classification.backend.clone() {
        let plan = RoutePlan::Dial {
            via: RouteVia::Signature(classification.kind),
            backend,
            forward: chunk.to_vec(),
        };
        return (classification, plan);
    }

    let forward = match ParsedRequest::parse(chunk) {
        Ok(request) => {
            if let Some(target) = request.connect_target() {
                let classification = ClassificationResult {
                    kind: ProtocolKind::Unknown,
                    backend: Some(target.clone()),
                };
                // CONNECT 头部被消费，只转发空行之后的数据
                let plan = RoutePlan::Dial {
                    via: RouteVia::Connect,
                    backend: target,
                    forward: request.payload(),
                };
                return (classification, plan);
            }
            if request.is_connect() {
                warn!(
                    "CONNECT target {:?} is not host:port, using default backend",
                    request.target
                );
            }
            debug!("{} {} {}", request.method, request.target, request.version);
            // 正文之后的字节（通常是紧跟在请求头后面的隧道数据）原样接在后面
            let mut forward = request.build();
            forward.extend_from_slice(&request.trailing);
            forward
        }
        Err(e) => {
            debug!("Unknown payload is not HTTP ({}), forwarding raw bytes", e);
            chunk.to_vec()
        }
    };

    let plan = match settings.unknown_traffic {
        UnknownTrafficPolicy::ForwardDefault => RoutePlan::Dial {
            via: RouteVia::DefaultBackend,
            backend: settings.registry.default_backend().clone(),
            forward,
        },
        UnknownTrafficPolicy::AwaitTunnel => RoutePlan::Await,
    };
    (classification, plan)
}

/// 会话结束时的统计
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: Uuid,
    pub classification: Option<ClassificationResult>,
    pub bytes_from_client: u64,
    pub bytes_from_server: u64,
}

/// 一次就绪等待的结果
enum Event {
    Data(Role, usize),
    Eof(Role),
    Flushed(Role, usize),
    Failed(Role, RelayError),
    Tick,
}

pub struct ProxySession {
    id: Uuid,
    client: Connection,
    server: Option<Connection>,
    state: SessionState,
    classification: Option<ClassificationResult>,
    disguise_sent: bool,
    settings: Arc<RelaySettings>,
    bytes_from_client: u64,
    bytes_from_server: u64,
}

impl ProxySession {
    pub fn new(client: Connection, settings: Arc<RelaySettings>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            server: None,
            state: SessionState::Init,
            classification: None,
            disguise_sent: false,
            settings,
            bytes_from_client: 0,
            bytes_from_server: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 运行会话直到结束；无论成功与否两条连接都会被关闭
    pub async fn run(mut self) -> Result<SessionSummary> {
        let span = info_span!("session", id = %self.id.simple(), peer = %self.client.peer());
        async move {
            info!("Client connected");
            let result = self.pump().await;
            self.shutdown().await;
            debug!(
                bytes_from_client = self.bytes_from_client,
                bytes_from_server = self.bytes_from_server,
                "Relay totals"
            );
            info!("Client disconnected");
            result.map(|_| SessionSummary {
                id: self.id,
                classification: self.classification.take(),
                bytes_from_client: self.bytes_from_client,
                bytes_from_server: self.bytes_from_server,
            })
        }
        .instrument(span)
        .await
    }

    async fn pump(&mut self) -> Result<()> {
        let mut client_scratch = vec![0u8; self.settings.read_buffer_size];
        let mut server_scratch = vec![0u8; self.settings.read_buffer_size];

        loop {
            if self.client.is_closed() || self.server.as_ref().is_some_and(Connection::is_closed) {
                return Ok(());
            }

            match self.wait(&mut client_scratch, &mut server_scratch).await {
                Event::Data(Role::Client, n) => self.on_client_data(&client_scratch[..n]).await?,
                Event::Data(Role::Server, n) => self.on_server_data(&server_scratch[..n])?,
                Event::Eof(Role::Client) => {
                    debug!("Client sent EOF");
                    if let Some(server) = self.server.as_mut() {
                        drain(server).await;
                    }
                    return Ok(());
                }
                Event::Eof(Role::Server) => {
                    debug!("Server sent EOF");
                    drain(&mut self.client).await;
                    return Ok(());
                }
                Event::Flushed(role, n) => trace!("{} <- {} bytes", role, n),
                Event::Failed(role, e) => {
                    debug!("{} I/O failed: {}", role, e);
                    return Err(e);
                }
                Event::Tick => {}
            }
        }
    }

    /// 等待任一方向就绪：两侧可读、有积压的一侧可写，或者轮询间隔到期
    async fn wait(&mut self, client_scratch: &mut [u8], server_scratch: &mut [u8]) -> Event {
        let tick = self.settings.poll_interval;
        // 对端积压到上限后不再读取这一侧，等写方向追上来
        let limit = self.settings.max_backlog;
        let client_readable = self.server.as_ref().map_or(true, |s| s.pending() < limit);
        let server_readable = self.client.pending() < limit;

        let (client_rx, client_tx) = self.client.split();
        let (server_rx, server_tx) = match self.server.as_mut() {
            Some(server) => {
                let (rx, tx) = server.split();
                (Some(rx), Some(tx))
            }
            None => (None, None),
        };

        tokio::select! {
            biased;
            res = flush_pending(Some(client_tx)) => match res {
                Ok(n) => Event::Flushed(Role::Client, n),
                Err(e) => Event::Failed(Role::Client, e),
            },
            res = flush_pending(server_tx) => match res {
                Ok(n) => Event::Flushed(Role::Server, n),
                Err(e) => Event::Failed(Role::Server, e),
            },
            res = read_optional(Some(client_rx).filter(|_| client_readable), client_scratch) => match res {
                Ok(0) => Event::Eof(Role::Client),
                Ok(n) => Event::Data(Role::Client, n),
                Err(e) => Event::Failed(Role::Client, e.into()),
            },
            res = read_optional(server_rx.filter(|_| server_readable), server_scratch) => match res {
                Ok(0) => Event::Eof(Role::Server),
                Ok(n) => Event::Data(Role::Server, n),
                Err(e) => Event::Failed(Role::Server, e.into()),
            },
            _ = tokio::time::sleep(tick) => Event::Tick,
        }
    }

    async fn on_client_data(&mut self, data: &[u8]) -> Result<()> {
        self.bytes_from_client += data.len() as u64;

        if let Some(server) = self.server.as_mut() {
            server.queue(data)?;
            return Ok(());
        }

        self.state = SessionState::Classifying;
        let (classification, plan) = plan_route(data, &self.settings);
        match plan {
            RoutePlan::Await => {
                info!(
                    "Unrecognized payload ({} bytes), answering with disguise and waiting",
                    data.len()
                );
                self.send_disguise()
            }
            RoutePlan::Dial {
                via,
                backend,
                forward,
            } => {
                info!("Mode {} -> {}", via, backend);
                self.classification = Some(classification);
                self.state = SessionState::AwaitingBackend;

                let mut server = dial(&backend, self.settings.connect_timeout).await?;
                if !forward.is_empty() {
                    server.queue(&forward)?;
                }
                self.server = Some(server);
                self.send_disguise()?;
                self.state = SessionState::Relaying;
                Ok(())
            }
        }
    }

    fn on_server_data(&mut self, data: &[u8]) -> Result<()> {
        self.bytes_from_server += data.len() as u64;
        self.client.queue(data)?;
        Ok(())
    }

    /// 伪装响应每个会话最多发送一次
    fn send_disguise(&mut self) -> Result<()> {
        if self.disguise_sent {
            return Ok(());
        }
        self.client.queue(&self.settings.disguise)?;
        self.disguise_sent = true;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(server) = self.server.as_mut() {
            server.close().await;
        }
        self.client.close().await;
        self.state = SessionState::Closed;
    }
}

/// 拨号后端，超时由设置决定
async fn dial(backend: &Address, timeout: Duration) -> Result<Connection> {
    let connect = TcpStream::connect((backend.host(), backend.port()));
    let stream = match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(RelayError::dial(backend.to_string(), e)),
        Err(_) => return Err(RelayError::dial_timeout(backend.to_string(), timeout)),
    };

    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for backend {}: {}", backend, e);
    }
    debug!("Backend {} connected", backend);

    Ok(Connection::new(Role::Server, backend.clone(), Box::new(stream)))
}

async fn flush_pending(outbound: Option<&mut Outbound>) -> Result<usize> {
    match outbound {
        Some(outbound) if outbound.wants_flush() => outbound.flush().await,
        _ => std::future::pending().await,
    }
}

async fn read_optional(
    reader: Option<&mut ReadHalf<BoxedStream>>,
    scratch: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read(scratch).await,
        None => std::future::pending().await,
    }
}

/// 尽力把积压数据写完
async fn drain(conn: &mut Connection) {
    if conn.is_closed() {
        return;
    }
    let result = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while conn.wants_flush() {
            conn.flush().await?;
        }
        Ok::<_, RelayError>(())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Dropping {} pending bytes for {}: {}", conn.pending(), conn, e),
        Err(_) => debug!(
            "Drain timed out, dropping {} pending bytes for {}",
            conn.pending(),
            conn
        ),
    }
}
