use crate::{
    addr::SerialSocketAddr,
    config::{DEFAULT_BAUD_RATE, OpenOptions, SocketConfig},
    error::SerialSocketError,
    listener::{ListenerHandle, establish},
    reader::OverflowReader,
    signals::{BaudRate, ModemStatus, PortInfo, SignalOptions, UpdateOptions},
    slot::ChannelSlot,
    writer::WriteTracker,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 绑定生命周期状态。
///
/// `Closed → Opening → Open → Closed`；离开初始 `Closed` 之后实例不可再次打开。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingState {
    Closed,
    Opening,
    Open,
}

#[derive(Debug)]
struct Lifecycle {
    state: BindingState,
    /// 已尝试过 `open`，实例进入不可复用阶段。
    retired: bool,
    baud_rate: u32,
    address: Option<SerialSocketAddr>,
    listener: Option<ListenerHandle>,
}

/// 以串口契约暴露的套接字绑定句柄。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 宿主把网络连接当作串口使用：打开、有界读取、提交写入并排空、刷新、关闭，以及若干线路状态查询；
/// - 本类型拥有生命周期状态，把地址解析、建连、溢出读取与写入跟踪组合在同一个句柄之后。
///
/// ## 逻辑 (How)
/// - `open`：`Closed → Opening`，解析地址并建连，成功后安装连接与监听器并进入 `Open`；
///   失败则回到 `Closed` 并封存槽位；
/// - `close`：仅在 `Open` 时生效，先停止接受循环并回收 Unix 套接字文件，再封存槽位并半关闭当前连接；
/// - 读写操作通过共享的连接槽位访问当前连接，二者互不阻塞。
///
/// ## 契约 (What)
/// - 每个实例只能成功或失败地 `open` 一次，之后再次 `open` 返回 [`SerialSocketError::InvalidState`]；
/// - `read` 恒满足 `bytes_read <= buf.len()`，对端结束时返回 `Ok(0)`；
/// - `get`/`set`/`update`/`baud_rate` 不与传输交互；
/// - **后置条件**：`close` 之后溢出缓冲不会被清空，但实例已不可再用。
///
/// ## 注意事项 (Trade-offs)
/// - 没有超时与取消：挂起的读取或排空会一直等待到传输产生对应信号，调用方可用
///   `tokio::time::timeout` 在外层设限；
/// - `open` 的 Future 若在 `Opening` 阶段被丢弃，实例停留在 `Opening`，只能被丢弃。
#[derive(Debug)]
pub struct SocketSerialPort {
    config: SocketConfig,
    slot: Arc<ChannelSlot>,
    lifecycle: Mutex<Lifecycle>,
    reader: OverflowReader,
    writer: WriteTracker,
}

impl SocketSerialPort {
    pub fn new() -> Self {
        Self::with_config(SocketConfig::default())
    }

    pub fn with_config(config: SocketConfig) -> Self {
        let slot = Arc::new(ChannelSlot::new());
        Self {
            reader: OverflowReader::new(Arc::clone(&slot), config.read_chunk_size()),
            writer: WriteTracker::new(Arc::clone(&slot)),
            slot,
            config,
            lifecycle: Mutex::new(Lifecycle {
                state: BindingState::Closed,
                retired: false,
                baud_rate: DEFAULT_BAUD_RATE,
                address: None,
                listener: None,
            }),
        }
    }

    /// 创建句柄并立即打开。
    pub async fn connect(options: &OpenOptions) -> Result<Self, SerialSocketError> {
        let port = Self::new();
        port.open(options).await?;
        Ok(port)
    }

    /// 套接字不可被枚举。
    pub fn list() -> Vec<PortInfo> {
        Vec::new()
    }

    #[tracing::instrument(skip(self, options), fields(address = %options.path))]
    pub async fn open(&self, options: &OpenOptions) -> Result<(), SerialSocketError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != BindingState::Closed || lifecycle.retired {
                return Err(SerialSocketError::InvalidState {
                    state: lifecycle.state,
                });
            }
            lifecycle.state = BindingState::Opening;
            lifecycle.retired = true;
            lifecycle.baud_rate = options.baud_rate;
        }

        let result = match SerialSocketAddr::parse(&options.path) {
            Ok(addr) => establish(&addr, &self.config, &self.slot)
                .await
                .map(|listener| (addr, listener)),
            Err(err) => Err(err),
        };

        let mut lifecycle = self.lifecycle.lock();
        match result {
            Ok((addr, listener)) => {
                lifecycle.state = BindingState::Open;
                lifecycle.listener = listener;
                lifecycle.address = Some(addr);
                info!("binding open");
                Ok(())
            }
            Err(err) => {
                lifecycle.state = BindingState::Closed;
                drop(lifecycle);
                if let Some(channel) = self.slot.seal() {
                    channel.close();
                }
                warn!(error = %err, code = err.code(), "open failed");
                Err(err)
            }
        }
    }

    /// 关闭绑定；非 `Open` 状态下为空操作。
    pub fn close(&self) {
        let (listener, address) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != BindingState::Open {
                return;
            }
            lifecycle.state = BindingState::Closed;
            (lifecycle.listener.take(), lifecycle.address.take())
        };
        if let Some(mut listener) = listener {
            listener.close();
        }
        if let Some(channel) = self.slot.seal() {
            channel.close();
        }
        match address {
            Some(address) => info!(address = %address, "binding closed"),
            None => info!("binding closed"),
        }
    }

    /// 读取至多 `buf.len()` 字节。
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, SerialSocketError> {
        self.reader.read(buf).await
    }

    /// 读取至多 `length` 字节写入 `buf[offset..offset + length]`。
    pub async fn read_at(
        &self,
        buf: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<usize, SerialSocketError> {
        let capacity = buf.len();
        let out_of_range = || SerialSocketError::BufferOutOfRange {
            offset,
            length,
            capacity,
        };
        let end = offset.checked_add(length).ok_or_else(out_of_range)?;
        if end > capacity {
            return Err(out_of_range());
        }
        self.reader.read(&mut buf[offset..end]).await
    }

    pub fn write(&self, payload: impl Into<Bytes>) -> Result<(), SerialSocketError> {
        self.writer.write(payload)
    }

    pub async fn drain(&self) -> Result<(), SerialSocketError> {
        self.writer.drain().await
    }

    pub fn flush(&self) {
        self.writer.flush();
    }

    /// 是否存在尚未被 `drain` 观察的写入。
    pub fn has_pending_write(&self) -> bool {
        self.writer.has_pending()
    }

    pub fn get(&self) -> ModemStatus {
        ModemStatus::FIXED
    }

    pub fn set(&self, options: &SignalOptions) {
        debug!(?options, "line signal change ignored");
    }

    pub fn update(&self, options: &UpdateOptions) {
        debug!(?options, "line parameter update ignored");
    }

    pub fn baud_rate(&self) -> BaudRate {
        BaudRate {
            baud_rate: self.lifecycle.lock().baud_rate,
        }
    }

    pub fn state(&self) -> BindingState {
        self.lifecycle.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == BindingState::Open
    }

    /// 已打开绑定的解析后地址。
    pub fn address(&self) -> Option<SerialSocketAddr> {
        self.lifecycle.lock().address.clone()
    }

    /// 当前连接的对端描述。
    pub fn peer(&self) -> Option<String> {
        self.slot.current().map(|channel| channel.peer().to_owned())
    }

    /// 溢出缓冲中等待交付的字节数。
    pub async fn buffered(&self) -> usize {
        self.reader.buffered().await
    }
}

impl Default for SocketSerialPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SocketSerialPort {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn shim_queries_are_static() {
        let port = SocketSerialPort::new();
        assert_eq!(port.get(), ModemStatus::FIXED);
        assert_eq!(port.baud_rate().baud_rate, DEFAULT_BAUD_RATE);
        port.set(&SignalOptions::default());
        port.update(&UpdateOptions {
            baud_rate: Some(1200),
        });
        assert_eq!(port.baud_rate().baud_rate, DEFAULT_BAUD_RATE);
        assert!(SocketSerialPort::list().is_empty());
    }

    #[test]
    fn close_before_open_is_noop() {
        let port = SocketSerialPort::new();
        port.close();
        assert_eq!(port.state(), BindingState::Closed);
        assert!(!port.is_open());
    }

    #[tokio::test]
    async fn invalid_address_retires_instance() {
        let port = SocketSerialPort::new();
        let err = port
            .open(&OpenOptions::new("tcp://:9999").with_baud_rate(57_600))
            .await
            .expect_err("empty host must fail");
        assert!(matches!(err, SerialSocketError::HostnameMissing));
        assert_eq!(port.state(), BindingState::Closed);
        assert_eq!(port.baud_rate().baud_rate, 57_600);

        let err = port
            .open(&OpenOptions::new("tcp://localhost:1"))
            .await
            .expect_err("retired instance must refuse");
        assert!(matches!(
            err,
            SerialSocketError::InvalidState {
                state: BindingState::Closed
            }
        ));
    }

    #[tokio::test]
    async fn io_without_connection_is_rejected() {
        let port = SocketSerialPort::new();
        let mut buf = [0u8; 4];
        assert!(matches!(
            port.read(&mut buf).await,
            Err(SerialSocketError::NotConnected)
        ));
        assert!(matches!(
            port.write(&b"hi"[..]),
            Err(SerialSocketError::NotConnected)
        ));
        port.drain().await.expect("nothing tracked");
        port.flush();
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn lifecycle_is_traced() {
        let peer = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind peer");
        let addr = peer.local_addr().expect("peer addr");

        let port = SocketSerialPort::new();
        port.open(&OpenOptions::new(format!("tcp://{addr}")))
            .await
            .expect("open tcp client");
        assert!(logs_contain("connected"));
        assert!(logs_contain("binding open"));
        assert_eq!(port.address().and_then(|addr| addr.port()), Some(addr.port()));

        port.close();
        assert!(logs_contain("binding closed"));
        assert!(matches!(
            port.open(&OpenOptions::new(format!("tcp://{addr}"))).await,
            Err(SerialSocketError::InvalidState {
                state: BindingState::Closed
            })
        ));
    }

    #[tokio::test]
    async fn zero_length_read_needs_no_connection() {
        let port = SocketSerialPort::new();
        let mut buf = [0u8; 4];
        assert_eq!(port.read_at(&mut buf, 2, 0).await.expect("empty read"), 0);
        assert!(matches!(
            port.read_at(&mut buf, 3, 2).await,
            Err(SerialSocketError::BufferOutOfRange { capacity: 4, .. })
        ));
    }
}
