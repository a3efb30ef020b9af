/// 单条连接：独占一个（明文或 TLS）流，外加一个待发送队列
///
/// 读取使用调用方提供的临时缓冲区；写入积压保存在 `Outbound` 中，跨循环保留。
/// `flush` 每次只做一次写调用，并且只从队首移除内核实际接收的字节数。
use crate::address::Address;
use crate::error::{RelayError, Result};
use crate::transport::BoxedStream;
use bytes::{Buf, BytesMut};
use std::fmt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::debug;

/// 连接在会话中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// 一次读取的结果
#[derive(Debug, PartialEq, Eq)]
pub enum Received<'a> {
    Data(&'a [u8]),
    EndOfStream,
}

/// 写方向：写半部 + 积压队列
pub struct Outbound {
    writer: WriteHalf<BoxedStream>,
    backlog: BytesMut,
    // TLS 流在写调用之后可能仍有记录留在内部缓冲区
    unflushed: bool,
}

impl Outbound {
    fn new(writer: WriteHalf<BoxedStream>) -> Self {
        Self {
            writer,
            backlog: BytesMut::new(),
            unflushed: false,
        }
    }

    /// 追加到积压队列，返回新的队列长度
    pub fn queue(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(RelayError::EmptyWrite);
        }
        self.backlog.extend_from_slice(data);
        Ok(self.backlog.len())
    }

    /// 积压字节数
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.backlog.is_empty()
    }

    /// 还有积压字节，或者传输层还没有 flush
    pub fn wants_flush(&self) -> bool {
        self.has_pending() || self.unflushed
    }

    /// 单次写调用
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(RelayError::EmptyWrite);
        }
        let written = self.writer.write(data).await?;
        if written == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }
        self.unflushed = true;
        Ok(written)
    }

    /// 尝试把整个积压队列写出，移除实际写出的部分
    ///
    /// 队列为空时只 flush 传输层并返回 0
    pub async fn flush(&mut self) -> Result<usize> {
        if self.backlog.is_empty() {
            if self.unflushed {
                self.writer.flush().await?;
                self.unflushed = false;
            }
            return Ok(0);
        }
        let written = self.writer.write(&self.backlog).await?;
        if written == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }
        self.backlog.advance(written);
        self.unflushed = true;
        Ok(written)
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Shutdown error ignored: {}", e);
        }
    }
}

/// 一条被会话独占的连接
pub struct Connection {
    role: Role,
    peer: Address,
    reader: ReadHalf<BoxedStream>,
    outbound: Outbound,
    closed: bool,
}

impl Connection {
    pub fn new(role: Role, peer: Address, stream: BoxedStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            role,
            peer,
            reader,
            outbound: Outbound::new(writer),
            closed: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> &Address {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn pending(&self) -> usize {
        self.outbound.pending()
    }

    pub fn wants_flush(&self) -> bool {
        self.outbound.wants_flush()
    }

    /// 单次读取；对端正常关闭返回 `EndOfStream`
    pub async fn read<'a>(&mut self, scratch: &'a mut [u8]) -> Result<Received<'a>> {
        self.ensure_open()?;
        let n = self.reader.read(scratch).await?;
        if n == 0 {
            Ok(Received::EndOfStream)
        } else {
            Ok(Received::Data(&scratch[..n]))
        }
    }

    /// 单次写调用，剩余部分由调用方重新排队
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        self.outbound.write(data).await
    }

    pub fn queue(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        self.outbound.queue(data)
    }

    pub async fn flush(&mut self) -> Result<usize> {
        self.ensure_open()?;
        self.outbound.flush().await
    }

    /// 关闭连接，可重复调用
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.outbound.shutdown().await;
        debug!("{} closed", self);
    }

    /// 拆分为读、写两个方向，供会话在同一次就绪等待中同时使用
    pub(crate) fn split(&mut self) -> (&mut ReadHalf<BoxedStream>, &mut Outbound) {
        (&mut self.reader, &mut self.outbound)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(RelayError::ConnectionClosed(self.to_string()))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.role, self.peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn pair(capacity: usize) -> (Connection, tokio::io::DuplexStream) {
        let (local, remote) = duplex(capacity);
        let conn = Connection::new(
            Role::Client,
            Address::new("127.0.0.1", 40000),
            Box::new(local),
        );
        (conn, remote)
    }

    #[tokio::test]
    async fn test_queue_rejects_empty() {
        let (mut conn, _remote) = pair(64);
        assert!(matches!(conn.queue(b""), Err(RelayError::EmptyWrite)));
        assert!(matches!(conn.write(b"").await, Err(RelayError::EmptyWrite)));
        assert_eq!(conn.queue(b"abc").unwrap(), 3);
        assert_eq!(conn.queue(b"de").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_flush_empty_returns_zero() {
        let (mut conn, _remote) = pair(64);
        assert_eq!(conn.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_partial_flush_keeps_remainder() {
        let (mut conn, mut remote) = pair(4);
        conn.queue(b"abcdefgh").unwrap();

        // duplex 容量为 4，一次写调用最多接收 4 字节
        let written = conn.flush().await.unwrap();
        assert_eq!(written, 4);
        assert_eq!(conn.pending(), 4);

        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abcd");

        assert_eq!(conn.flush().await.unwrap(), 4);
        assert_eq!(conn.pending(), 0);
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"efgh");
    }

    #[tokio::test]
    async fn test_flush_drains_in_order() {
        let (mut conn, mut remote) = pair(64);

        let chunks: Vec<Vec<u8>> = (0..40)
            .map(|i| (0..(1 + i * 37 % 300)).map(|_| rand::random::<u8>()).collect())
            .collect();
        let expected: Vec<u8> = chunks.concat();

        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            remote.read_to_end(&mut received).await.unwrap();
            received
        });

        let mut total_written = 0;
        for chunk in &chunks {
            conn.queue(chunk).unwrap();
            // 每轮只刷一次，制造积压
            total_written += conn.flush().await.unwrap();
        }
        while conn.pending() > 0 {
            let n = conn.flush().await.unwrap();
            assert!(n > 0);
            total_written += n;
        }
        conn.close().await;

        assert_eq!(total_written, expected.len());
        assert_eq!(reader.await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_read_data_and_eof() {
        let (mut conn, mut remote) = pair(64);
        remote.write_all(b"SSH-2.0-test\r\n").await.unwrap();

        let mut scratch = [0u8; 64];
        match conn.read(&mut scratch).await.unwrap() {
            Received::Data(data) => assert_eq!(data, b"SSH-2.0-test\r\n"),
            Received::EndOfStream => panic!("unexpected EOF"),
        }

        drop(remote);
        assert_eq!(
            conn.read(&mut scratch).await.unwrap(),
            Received::EndOfStream
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut conn, mut remote) = pair(64);
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());

        let mut scratch = [0u8; 8];
        assert!(matches!(
            conn.read(&mut scratch).await,
            Err(RelayError::ConnectionClosed(_))
        ));
        assert!(matches!(
            conn.queue(b"x"),
            Err(RelayError::ConnectionClosed(_))
        ));
        assert!(matches!(
            conn.flush().await,
            Err(RelayError::ConnectionClosed(_))
        ));

        // 对端看到写方向已关闭
        let mut buf = Vec::new();
        remote.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_write_to_dropped_peer_fails() {
        let (mut conn, remote) = pair(64);
        drop(remote);
        let err = conn.write(b"hello").await.unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_display() {
        let (conn, _remote) = pair(8);
        assert_eq!(conn.to_string(), "client 127.0.0.1:40000");
        assert_eq!(conn.role(), Role::Client);
    }
}
