use crate::{
    addr::{SerialSocketAddr, TransportKind},
    config::SocketConfig,
    error::{self, SerialSocketError, map_io_error, writer_gone},
};
use bytes::{Bytes, BytesMut};
use std::{
    io,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, tcp},
    sync::{Mutex as AsyncMutex, mpsc, oneshot},
};
#[cfg(unix)]
use tokio::net::{UnixStream, unix};
use tracing::{debug, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 一次写入的完成信号。
///
/// 仅由 [`SocketChannel::submit`] 产生；等待它即等待对应字节被完整交付给内核。
#[derive(Debug)]
pub(crate) struct PendingWrite {
    done: oneshot::Receiver<Result<(), SerialSocketError>>,
}

impl PendingWrite {
    /// 等待完成信号；取消后可再次等待，完成后不得再调用。
    pub(crate) async fn wait(&mut self) -> Result<(), SerialSocketError> {
        match (&mut self.done).await {
            Ok(result) => result,
            Err(_) => Err(writer_gone()),
        }
    }
}

enum WriteCommand {
    Data {
        payload: Bytes,
        done: oneshot::Sender<Result<(), SerialSocketError>>,
    },
    Shutdown,
}

enum ReadHalf {
    Tcp(tcp::OwnedReadHalf),
    #[cfg(unix)]
    Unix(unix::OwnedReadHalf),
}

impl ReadHalf {
    async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            Self::Tcp(half) => half.read_buf(buf).await,
            #[cfg(unix)]
            Self::Unix(half) => half.read_buf(buf).await,
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(half) => half.try_read(buf),
            #[cfg(unix)]
            Self::Unix(half) => half.try_read(buf),
        }
    }
}

enum WriteHalf {
    Tcp(tcp::OwnedWriteHalf),
    #[cfg(unix)]
    Unix(unix::OwnedWriteHalf),
}

impl WriteHalf {
    async fn write_all(&mut self, payload: &[u8]) -> io::Result<()> {
        match self {
            Self::Tcp(half) => {
                half.write_all(payload).await?;
                half.flush().await
            }
            #[cfg(unix)]
            Self::Unix(half) => {
                half.write_all(payload).await?;
                half.flush().await
            }
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(half) => half.shutdown().await,
            #[cfg(unix)]
            Self::Unix(half) => half.shutdown().await,
        }
    }
}

/// 与单个对端之间的双工字节流。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把 TCP 与 Unix 域套接字统一成同一种连接对象，读路径与写路径互不阻塞：
///   读操作挂起时依旧可以提交写入；
/// - 为串口语义提供“单次接收事件”“有序提交 + 完成信号”“优雅半关闭”三个原语。
///
/// ## 逻辑 (How)
/// - 建连后立即拆分为读半部与写半部；
/// - 读半部放在 `tokio::sync::Mutex` 中，`receive` 持锁完成一次 `read_buf`，
///   锁守卫在任意返回路径上释放；
/// - 写半部交给独立的写任务，写任务按队列顺序逐条执行，因此多次提交的字节顺序与提交顺序一致；
///   每条提交携带 `oneshot` 发送端回报完成结果；
/// - `close` 向队列追加 `Shutdown` 命令：排在它之前的写入仍会完成，然后执行写方向半关闭。
///
/// ## 契约 (What)
/// - `receive`：返回一次接收事件得到的字节，空结果表示对端已结束写方向；
/// - `submit`：写任务已退出时返回 [`SerialSocketError::NotConnected`]；
/// - `discard_pending_input`：尽力丢弃内核中尚未读取的数据，读操作进行中时直接跳过；
/// - **后置条件**：`close` 之后的提交全部失败，读半部在最后一个引用释放时关闭。
///
/// ## 注意事项 (Trade-offs)
/// - 写队列无界：串口语义不提供背压，调用方可通过 `drain` 自行节流；
/// - 写任务遇到错误后仍继续消费队列，后续写入大概率同样失败并各自回报。
pub struct SocketChannel {
    id: u64,
    peer: String,
    reader: AsyncMutex<ReadHalf>,
    writer: mpsc::UnboundedSender<WriteCommand>,
}

impl std::fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketChannel")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl SocketChannel {
    /// 以客户端角色建立到目标地址的连接。
    pub(crate) async fn connect(
        addr: &SerialSocketAddr,
        config: &SocketConfig,
    ) -> Result<Self, SerialSocketError> {
        match addr.transport() {
            TransportKind::Tcp => {
                let target = addr
                    .tcp_target()
                    .ok_or(SerialSocketError::HostnameMissing)?;
                let stream = TcpStream::connect(target.as_str())
                    .await
                    .map_err(|err| map_io_error(error::TCP_CONNECT, err))?;
                Self::from_tcp(stream, config)
            }
            TransportKind::Unix => Self::connect_unix(addr).await,
        }
    }

    #[cfg(unix)]
    async fn connect_unix(addr: &SerialSocketAddr) -> Result<Self, SerialSocketError> {
        let path = addr.path().ok_or(SerialSocketError::PathMissing)?;
        let stream = UnixStream::connect(path)
            .await
            .map_err(|err| map_io_error(error::UNIX_CONNECT, err))?;
        Ok(Self::from_unix(stream, path.display().to_string()))
    }

    #[cfg(not(unix))]
    async fn connect_unix(_addr: &SerialSocketAddr) -> Result<Self, SerialSocketError> {
        Err(SerialSocketError::UnsupportedProtocol("unix".to_owned()))
    }

    pub(crate) fn from_tcp(
        stream: TcpStream,
        config: &SocketConfig,
    ) -> Result<Self, SerialSocketError> {
        config
            .apply_tcp(&stream)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "tcp peer".to_owned());
        let (read, write) = stream.into_split();
        Ok(Self::from_halves(
            ReadHalf::Tcp(read),
            WriteHalf::Tcp(write),
            peer,
        ))
    }

    #[cfg(unix)]
    pub(crate) fn from_unix(stream: UnixStream, peer: String) -> Self {
        let (read, write) = stream.into_split();
        Self::from_halves(ReadHalf::Unix(read), WriteHalf::Unix(write), peer)
    }

    fn from_halves(read: ReadHalf, write: WriteHalf, peer: String) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (writer, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(id, write, queue));
        Self {
            id,
            peer,
            reader: AsyncMutex::new(read),
            writer,
        }
    }

    /// 连接 ID，仅用于日志。
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 对端描述：TCP 为 `ip:port`，Unix 为套接字路径。
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// 等待恰好一次接收事件，最多读取 `limit` 字节。
    pub(crate) async fn receive(&self, limit: usize) -> Result<Bytes, SerialSocketError> {
        let mut chunk = BytesMut::with_capacity(limit.max(1));
        let mut reader = self.reader.lock().await;
        reader
            .read_buf(&mut chunk)
            .await
            .map_err(|err| map_io_error(error::READ, err))?;
        Ok(chunk.freeze())
    }

    /// 提交一次写入，返回其完成信号。
    pub(crate) fn submit(&self, payload: Bytes) -> Result<PendingWrite, SerialSocketError> {
        let (done, rx) = oneshot::channel();
        self.writer
            .send(WriteCommand::Data { payload, done })
            .map_err(|_| SerialSocketError::NotConnected)?;
        Ok(PendingWrite { done: rx })
    }

    /// 丢弃内核接收缓冲区中尚未读取的数据。
    pub(crate) fn discard_pending_input(&self) -> usize {
        let Ok(reader) = self.reader.try_lock() else {
            return 0;
        };
        let mut scratch = [0u8; 4096];
        let mut discarded = 0;
        loop {
            match reader.try_read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        discarded
    }

    /// 在已排队的写入完成后半关闭写方向。
    pub(crate) fn close(&self) {
        // 写任务已退出时说明连接早已关闭。
        let _ = self.writer.send(WriteCommand::Shutdown);
    }
}

async fn run_writer(
    id: u64,
    mut half: WriteHalf,
    mut queue: mpsc::UnboundedReceiver<WriteCommand>,
) {
    while let Some(command) = queue.recv().await {
        match command {
            WriteCommand::Data { payload, done } => {
                let result = half
                    .write_all(&payload)
                    .await
                    .map_err(|err| map_io_error(error::WRITE, err));
                if let Err(err) = &result {
                    warn!(connection = id, error = %err, "write failed");
                }
                let _ = done.send(result);
            }
            WriteCommand::Shutdown => {
                if let Err(err) = half.shutdown().await {
                    debug!(connection = id, error = %err, "half-close failed");
                }
                break;
            }
        }
    }
    debug!(connection = id, "writer stopped");
}
