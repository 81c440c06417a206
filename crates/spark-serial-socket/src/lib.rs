#![doc = r#"
# spark-serial-socket

## 设计动机（Why）
- **定位**：该 crate 把 TCP 或 Unix 域套接字连接包装成“串口”形态：打开/关闭、有界读取、
  提交写入并排空、刷新与线路状态查询，宿主可以像操作串口一样操作网络连接。
- **架构角色**：位于宿主插件适配层之下，负责唯一带状态的部分：建连协议与字节读写路径；
  线路控制（校验位、波特率、RTS/CTS）只以固定应答满足接口形态。
- **设计理念**：所有校验在触碰资源前完成；读写互不阻塞；服务端始终只服务一个对端。

## 核心契约（What）
- **地址**：`tcp://host:port`、`tcp-server://host:port`、`unix:///path`、`unix-server:///path`；
- **建连**：客户端以连接成功或失败为准；服务端在接受**首个**对端后完成，之后每个新对端都会
  替换当前连接，旧连接被优雅半关闭；Unix 服务端绑定前会删除残留的套接字文件；
- **读取**：先交付溢出缓冲，再等待恰好一次接收事件，多余字节进入溢出缓冲；对端结束时返回 0；
- **写入**：提交即返回，`drain` 等待最近一次提交完成；
- **错误**：统一为 [`SerialSocketError`]，传输错误保留原始 `io::Error`。

## 实现策略（How）
- **执行框架**：基于 Tokio 的 `TcpStream`/`UnixStream`，建连后拆分读写半部；
  写半部由独立任务按提交顺序消费，读半部在一次读取期间被异步锁独占；
- **单槽位**：当前连接保存在一个互斥槽位中，只有接受循环与 `close` 会替换它；
- **可观测性**：生命周期、对端替换、写入失败等节点通过 `tracing` 输出结构化事件，
  crate 本身不安装任何 Subscriber。

## 风险与考量（Trade-offs）
- **无超时**：打开、读取、写入与排空都不带超时，调用方需在外层组合 `tokio::time::timeout`；
- **无背压**：写队列无界，持续写入而不 `drain` 会占用内存；
- **平台**：Unix 域套接字仅在 `cfg(unix)` 下可用，其他平台返回 `UnsupportedProtocol`。
"#]

mod addr;
mod channel;
mod config;
mod error;
mod listener;
mod port;
mod reader;
mod signals;
mod slot;
mod writer;

pub use addr::{Role, SerialSocketAddr, TransportKind};
pub use config::{
    DEFAULT_BAUD_RATE, DEFAULT_READ_CHUNK_SIZE, FlowControl, OpenOptions, Parity, SocketConfig,
};
pub use error::{OperationKind, SerialSocketError};
pub use port::{BindingState, SocketSerialPort};
pub use reader::OverflowBuffer;
pub use signals::{BaudRate, ModemStatus, PortInfo, SignalOptions, UpdateOptions};

/// crate 内统一的返回别名。
pub type Result<T, E = SerialSocketError> = std::result::Result<T, E>;
