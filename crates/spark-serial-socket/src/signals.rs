//! 串口线路信号的固定应答。
//!
//! 套接字没有调制解调器控制线，这里的类型只为满足宿主插件的请求/应答形态：
//! 查询返回固定值，设置被接受但不产生任何传输交互。

use serde::{Deserialize, Serialize};

/// `get` 的应答：CTS/DSR 恒为置位，DCD 恒为复位。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemStatus {
    pub cts: bool,
    pub dsr: bool,
    pub dcd: bool,
}

impl ModemStatus {
    pub const FIXED: Self = Self {
        cts: true,
        dsr: true,
        dcd: false,
    };
}

/// `set` 的参数，全部被忽略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalOptions {
    #[serde(default)]
    pub data_terminal_ready: Option<bool>,
    #[serde(default)]
    pub request_to_send: Option<bool>,
    #[serde(default, rename = "break")]
    pub brk: Option<bool>,
}

/// `update` 的参数，打开后的线路参数更新被接受但不生效。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOptions {
    #[serde(default)]
    pub baud_rate: Option<u32>,
}

/// `baud_rate` 的应答，回显打开时配置的波特率。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaudRate {
    pub baud_rate: u32,
}

/// 端口枚举条目。套接字不可被发现，`list` 永远返回空集合。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub path: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}
