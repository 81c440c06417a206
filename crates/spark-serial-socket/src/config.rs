use serde::{Deserialize, Serialize};
use socket2::SockRef;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// 未显式配置时回显的波特率。
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// 单次接收事件的默认上限。
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// 校验位设置，仅被保存，不影响字节流。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// 流控设置，仅被保存，不影响字节流。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Hardware,
}

/// 宿主插件传入的打开参数。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 宿主以“串口”形态下发参数：除目标地址外还包含波特率、校验位等线路字段；
/// - 套接字没有线路概念，这些字段只需被接受并保存，其中 `baud_rate` 会原样回显给查询方。
///
/// ## 契约（What）
/// - 反序列化使用 camelCase 键名，地址键为 `path`（兼容别名 `address`）；
/// - 未提供的线路字段采用常见串口默认值：9600 波特、8 数据位、1 停止位、无校验、无流控；
/// - **后置条件**：解析成功不代表地址合法，地址校验在 `open` 阶段由地址解析器完成。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOptions {
    #[serde(alias = "address")]
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub flow_control: FlowControl,
}

impl OpenOptions {
    /// 以目标地址创建参数，其余字段取默认值。
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            buffer_size: default_buffer_size(),
            flow_control: FlowControl::default(),
        }
    }

    /// 设置需要回显的波特率。
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_buffer_size() -> usize {
    255
}

/// 套接字级配置项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将“每次接收事件最多读取多少字节”“TCP 是否关闭 Nagle”“关闭时的 `SO_LINGER`”
///   显式配置化，避免调用方直接操作 `socket2` 或 Tokio 的具体类型；
///
/// ## 契约（What）
/// - `read_chunk_size`：一次接收事件的缓冲上限，至少为 1；超过调用方请求长度的部分进入溢出缓冲；
/// - `nodelay`：仅对 TCP 生效，默认开启；
/// - `linger`：仅对 TCP 生效，`None` 表示遵循内核默认策略。
///
/// ## 设计取舍（Trade-offs）
/// - `SO_LINGER` 在不同平台的精度不同（Linux 取整到秒）；设置过小可能导致发送缓冲区中的
///   数据被丢弃并触发对端 `ECONNRESET`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    read_chunk_size: usize,
    nodelay: bool,
    linger: Option<Duration>,
}

impl SocketConfig {
    pub const fn new() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            nodelay: true,
            linger: None,
        }
    }

    /// 设置单次接收事件的缓冲上限，`0` 会被提升为 `1`。
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub(crate) fn apply_tcp(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        let sock = SockRef::from(stream);
        sock.set_linger(self.linger)
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_never_drops_to_zero() {
        let config = SocketConfig::new().with_read_chunk_size(0);
        assert_eq!(config.read_chunk_size(), 1);
        assert!(config.nodelay());
        assert_eq!(config.linger(), None);
    }

    #[test]
    fn options_builder_keeps_defaults() {
        let options = OpenOptions::new("tcp://localhost:1").with_baud_rate(115_200);
        assert_eq!(options.baud_rate, 115_200);
        assert_eq!(options.data_bits, 8);
        assert_eq!(options.stop_bits, 1);
        assert_eq!(options.parity, Parity::None);
        assert_eq!(options.flow_control, FlowControl::None);
        assert_eq!(options.buffer_size, 255);
    }
}
