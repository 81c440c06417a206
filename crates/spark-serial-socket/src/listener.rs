use crate::{
    addr::{SerialSocketAddr, TransportKind},
    channel::SocketChannel,
    config::SocketConfig,
    error::{self, SerialSocketError, map_io_error},
    slot::ChannelSlot,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};

/// 接受失败后暂停片刻，避免 `EMFILE` 之类的持续错误把循环打满。
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// 服务端角色下的监听端点。
enum SocketListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl SocketListener {
    async fn bind(addr: &SerialSocketAddr) -> Result<Self, SerialSocketError> {
        match addr.transport() {
            TransportKind::Tcp => {
                let target = addr
                    .tcp_target()
                    .ok_or(SerialSocketError::HostnameMissing)?;
                let listener = TcpListener::bind(target.as_str())
                    .await
                    .map_err(|err| map_io_error(error::TCP_BIND, err))?;
                Ok(Self::Tcp(listener))
            }
            TransportKind::Unix => Self::bind_unix(addr),
        }
    }

    #[cfg(unix)]
    fn bind_unix(addr: &SerialSocketAddr) -> Result<Self, SerialSocketError> {
        let path = addr.path().ok_or(SerialSocketError::PathMissing)?;
        if std::fs::symlink_metadata(path).is_ok() {
            std::fs::remove_file(path).map_err(|err| map_io_error(error::REMOVE_STALE, err))?;
            debug!(path = %path.display(), "removed stale socket file");
        }
        let listener =
            UnixListener::bind(path).map_err(|err| map_io_error(error::UNIX_BIND, err))?;
        Ok(Self::Unix(listener, path.to_path_buf()))
    }

    #[cfg(not(unix))]
    fn bind_unix(_addr: &SerialSocketAddr) -> Result<Self, SerialSocketError> {
        Err(SerialSocketError::UnsupportedProtocol("unix-server".to_owned()))
    }

    async fn accept(&self, config: &SocketConfig) -> Result<SocketChannel, SerialSocketError> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener
                    .accept()
                    .await
                    .map_err(|err| map_io_error(error::ACCEPT, err))?;
                SocketChannel::from_tcp(stream, config)
            }
            #[cfg(unix)]
            Self::Unix(listener, path) => {
                let (stream, _) = listener
                    .accept()
                    .await
                    .map_err(|err| map_io_error(error::ACCEPT, err))?;
                Ok(SocketChannel::from_unix(stream, path.display().to_string()))
            }
        }
    }

    fn socket_path(&self) -> Option<PathBuf> {
        match self {
            Self::Tcp(_) => None,
            #[cfg(unix)]
            Self::Unix(_, path) => Some(path.clone()),
        }
    }
}

/// 运行中的接受循环及其清理信息。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务端绑定在整个生命周期内持续接受新对端，每个新对端替换槽位中的旧连接；
/// - 关闭绑定时必须同时停止接受循环并回收 Unix 套接字文件。
///
/// ## 契约（What）
/// - `close`：中止接受循环，删除本绑定创建的 Unix 套接字文件；可重复调用；
/// - `Drop` 同样会中止接受循环，避免句柄泄漏后监听器继续存活。
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    task: JoinHandle<()>,
    socket_path: Option<PathBuf>,
}

impl ListenerHandle {
    pub(crate) fn close(&mut self) {
        self.task.abort();
        if let Some(path) = self.socket_path.take()
            && let Err(err) = std::fs::remove_file(&path)
        {
            debug!(path = %path.display(), error = %err, "socket file cleanup skipped");
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 按地址建立连接，并把首个连接安装到槽位。
///
/// - 客户端：一次建连，成功即安装；
/// - 服务端：绑定后启动接受循环，等待**首个**可用对端被接受后返回监听句柄；
///   之后到来的对端由接受循环继续替换槽位。
///
/// 只有绑定与建连失败会让本函数失败；单个对端的接受或配置失败只记录日志，
/// 接受循环继续等待下一个对端。失败时不会在槽位中留下连接，也不会保留监听器。
pub(crate) async fn establish(
    addr: &SerialSocketAddr,
    config: &SocketConfig,
    slot: &Arc<ChannelSlot>,
) -> Result<Option<ListenerHandle>, SerialSocketError> {
    if !addr.is_server() {
        let channel = SocketChannel::connect(addr, config).await?;
        info!(connection = channel.id(), peer = %channel.peer(), "connected");
        slot.install(Arc::new(channel));
        return Ok(None);
    }

    let listener = SocketListener::bind(addr).await?;
    let socket_path = listener.socket_path();
    info!(address = %addr, "listening for peer");

    let (first_tx, first_rx) = oneshot::channel();
    let task = tokio::spawn(accept_loop(
        listener,
        config.clone(),
        Arc::clone(slot),
        first_tx,
    ));
    let mut handle = ListenerHandle { task, socket_path };

    match first_rx.await {
        Ok(()) => Ok(Some(handle)),
        Err(_) => {
            handle.close();
            Err(SerialSocketError::NotConnected)
        }
    }
}

async fn accept_loop(
    listener: SocketListener,
    config: SocketConfig,
    slot: Arc<ChannelSlot>,
    first: oneshot::Sender<()>,
) {
    let mut first = Some(first);
    loop {
        let outcome = listener.accept(&config).await;
        if !admit(outcome, &slot, &mut first) {
            tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
        }
    }
}

/// 处理一次接受结果：成功则安装并在首个对端时通知 `open`，失败只记录日志。
///
/// 返回是否成功安装。
fn admit(
    outcome: Result<SocketChannel, SerialSocketError>,
    slot: &ChannelSlot,
    first: &mut Option<oneshot::Sender<()>>,
) -> bool {
    match outcome {
        Ok(channel) => {
            info!(connection = channel.id(), peer = %channel.peer(), "peer accepted");
            slot.install(Arc::new(channel));
            if let Some(first) = first.take() {
                let _ = first.send(());
            }
            true
        }
        Err(err) => {
            warn!(
                error = %err,
                code = err.code(),
                awaiting_first = first.is_some(),
                "accepting peer failed"
            );
            false
        }
    }
}
