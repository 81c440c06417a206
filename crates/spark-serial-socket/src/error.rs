use crate::port::BindingState;
use std::io;
use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const TCP_BIND: OperationKind = OperationKind {
    code: "spark.serial.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const TCP_CONNECT: OperationKind = OperationKind {
    code: "spark.serial.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const UNIX_BIND: OperationKind = OperationKind {
    code: "spark.serial.unix.bind_failed",
    message: "unix bind",
};
pub(crate) const UNIX_CONNECT: OperationKind = OperationKind {
    code: "spark.serial.unix.connect_failed",
    message: "unix connect",
};
pub(crate) const REMOVE_STALE: OperationKind = OperationKind {
    code: "spark.serial.unix.remove_stale_failed",
    message: "unix remove stale socket",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.serial.accept_failed",
    message: "accept",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.serial.configure_failed",
    message: "configure",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.serial.read_failed",
    message: "read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.serial.write_failed",
    message: "write",
};

/// 串口套接字绑定对外暴露的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把地址校验、连接状态与底层 IO 失败归并到同一枚举，调用方只需匹配一个类型
///   即可区分“配置错误”“尚未连接”“对端异常”三类问题；
/// - **契约 (What)**：
///   - 地址类变体（`ProtocolUnspecified`…`UnsupportedProtocol`）一定在触碰任何套接字或文件系统前返回；
///   - [`SerialSocketError::Transport`] 保留原始 [`io::Error`]，`source()` 可取回底层错误与 OS 错误码；
///   - 每个变体都能通过 [`SerialSocketError::code`] 映射为稳定错误码，便于日志与告警聚合；
/// - **设计权衡 (Trade-offs)**：`io::Error` 不可克隆，因此整个枚举也不实现 `Clone`；
///   需要跨任务广播时由调用方自行包装 `Arc`。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SerialSocketError {
    /// 地址字符串缺少协议前缀。
    #[error("address has no protocol scheme")]
    ProtocolUnspecified,
    /// TCP 地址缺少主机名。
    #[error("tcp address is missing a hostname")]
    HostnameMissing,
    /// TCP 地址缺少端口，或端口不是合法的 `u16`。
    #[error("tcp address is missing a valid port")]
    PortMissing,
    /// Unix 地址缺少套接字路径。
    #[error("unix address is missing a socket path")]
    PathMissing,
    /// 协议前缀不在 `tcp`/`tcp-server`/`unix`/`unix-server` 之内。
    #[error("unsupported protocol `{0}`")]
    UnsupportedProtocol(String),
    /// 当前没有可用的活动连接。
    #[error("no active connection")]
    NotConnected,
    /// 底层传输失败，保留原始 IO 错误。
    #[error("{}: {source}", .kind.message)]
    Transport {
        kind: OperationKind,
        #[source]
        source: io::Error,
    },
    /// 绑定状态不允许执行该操作（例如重复 `open`）。
    #[error("binding cannot be opened from state {state:?}")]
    InvalidState { state: BindingState },
    /// `read_at` 请求的区间超出了调用方缓冲区。
    #[error("read range {offset}+{length} exceeds buffer of {capacity} bytes")]
    BufferOutOfRange {
        offset: usize,
        length: usize,
        capacity: usize,
    },
}

impl SerialSocketError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProtocolUnspecified => "spark.serial.protocol_unspecified",
            Self::HostnameMissing => "spark.serial.hostname_missing",
            Self::PortMissing => "spark.serial.port_missing",
            Self::PathMissing => "spark.serial.path_missing",
            Self::UnsupportedProtocol(_) => "spark.serial.unsupported_protocol",
            Self::NotConnected => "spark.serial.not_connected",
            Self::Transport { kind, .. } => kind.code,
            Self::InvalidState { .. } => "spark.serial.invalid_state",
            Self::BufferOutOfRange { .. } => "spark.serial.buffer_out_of_range",
        }
    }

    /// 复制一份等价错误，供多个等待方观察同一次写入结果。
    ///
    /// `io::Error` 不可克隆：带 OS 错误码时按错误码重建，否则保留分类与文案。
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::ProtocolUnspecified => Self::ProtocolUnspecified,
            Self::HostnameMissing => Self::HostnameMissing,
            Self::PortMissing => Self::PortMissing,
            Self::PathMissing => Self::PathMissing,
            Self::UnsupportedProtocol(scheme) => Self::UnsupportedProtocol(scheme.clone()),
            Self::NotConnected => Self::NotConnected,
            Self::Transport { kind, source } => Self::Transport {
                kind: *kind,
                source: match source.raw_os_error() {
                    Some(code) => io::Error::from_raw_os_error(code),
                    None => io::Error::new(source.kind(), source.to_string()),
                },
            },
            Self::InvalidState { state } => Self::InvalidState { state: *state },
            Self::BufferOutOfRange {
                offset,
                length,
                capacity,
            } => Self::BufferOutOfRange {
                offset: *offset,
                length: *length,
                capacity: *capacity,
            },
        }
    }

    /// 若为传输错误，返回底层 IO 错误的分类。
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Transport { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// 将 IO 错误映射为 [`SerialSocketError::Transport`]。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> SerialSocketError {
    SerialSocketError::Transport {
        kind,
        source: error,
    }
}

/// 写任务在完成前退出时使用的错误。
pub(crate) fn writer_gone() -> SerialSocketError {
    map_io_error(
        WRITE,
        io::Error::new(
            io::ErrorKind::BrokenPipe,
            "connection closed before the write completed",
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_keeps_code_and_source() {
        let err = map_io_error(
            TCP_CONNECT,
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(err.code(), "spark.serial.tcp.connect_failed");
        assert_eq!(err.io_kind(), Some(io::ErrorKind::ConnectionRefused));
        assert_eq!(err.to_string(), "tcp connect: refused");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn replicated_transport_error_keeps_kind_and_os_code() {
        let err = writer_gone();
        let copy = err.replicate();
        assert_eq!(copy.code(), err.code());
        assert_eq!(copy.io_kind(), Some(io::ErrorKind::BrokenPipe));
        assert_eq!(copy.to_string(), err.to_string());

        let os = map_io_error(WRITE, io::Error::from_raw_os_error(32));
        match os.replicate() {
            SerialSocketError::Transport { source, .. } => assert_eq!(source.raw_os_error(), Some(32)),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn validation_errors_have_no_io_kind() {
        assert_eq!(SerialSocketError::HostnameMissing.io_kind(), None);
        assert_eq!(
            SerialSocketError::UnsupportedProtocol("udp".into()).to_string(),
            "unsupported protocol `udp`"
        );
    }
}
