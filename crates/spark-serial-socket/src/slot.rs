use crate::channel::SocketChannel;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// “当前连接”单槽位。
///
/// # 教案式说明
/// - **意图 (Why)**：服务端任一时刻只服务一个对端；新对端到来时以“换槽 + 关闭旧占用者”
///   完成所有权转移，而不是维护连接池；
/// - **契约 (What)**：
///   - `install`：写入新连接，旧连接（若有）被优雅半关闭；槽位已封存时新连接被立即关闭；
///   - `current`：克隆当前连接引用，读写路径只读不写；
///   - `seal`：封存槽位并取出当前连接，此后再无连接能被安装；
/// - **执行逻辑 (How)**：`parking_lot::Mutex` 仅保护一次指针交换，临界区内不跨越 `.await`，
///   关闭旧连接的动作放在锁外执行；
/// - **设计权衡 (Trade-offs)**：仍在旧连接上挂起的读操作持有 `Arc`，会在旧对端结束后自然返回，
///   不会被强行打断。
#[derive(Debug, Default)]
pub(crate) struct ChannelSlot {
    inner: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    current: Option<Arc<SocketChannel>>,
    sealed: bool,
}

impl ChannelSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn install(&self, channel: Arc<SocketChannel>) {
        let previous = {
            let mut state = self.inner.lock();
            if state.sealed {
                drop(state);
                channel.close();
                return;
            }
            state.current.replace(channel.clone())
        };
        if let Some(previous) = previous {
            info!(
                previous = previous.id(),
                connection = channel.id(),
                peer = %channel.peer(),
                "replacing active connection"
            );
            previous.close();
        }
    }

    pub(crate) fn current(&self) -> Option<Arc<SocketChannel>> {
        self.inner.lock().current.clone()
    }

    pub(crate) fn seal(&self) -> Option<Arc<SocketChannel>> {
        let mut state = self.inner.lock();
        state.sealed = true;
        state.current.take()
    }
}
