use crate::{channel::PendingWrite, error::SerialSocketError, slot::ChannelSlot};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// 被跟踪写入的完成状态，可被多个 `drain` 共享。
#[derive(Debug)]
enum Completion {
    Waiting(PendingWrite),
    Settled(Result<(), SerialSocketError>),
}

impl Completion {
    async fn settle(&mut self) -> Result<(), SerialSocketError> {
        let result = match self {
            Self::Waiting(pending) => pending.wait().await,
            Self::Settled(result) => return replicate(result),
        };
        let observed = replicate(&result);
        *self = Self::Settled(result);
        observed
    }
}

fn replicate(result: &Result<(), SerialSocketError>) -> Result<(), SerialSocketError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => Err(err.replicate()),
    }
}

/// 写入提交与排空跟踪。
///
/// # 教案式说明
/// - **意图 (Why)**：串口写入是“提交即返回”，调用方通过 `drain` 等待数据真正交付给传输层；
/// - **契约 (What)**：
///   - `write`：要求存在活动连接，提交后把本次提交记为“最近一次写入”，覆盖之前的跟踪；
///   - `drain`：若存在被跟踪的写入，则等待其完成信号，完成后清除跟踪并传播失败；否则立即返回；
///   - `flush`：尽力丢弃内核中尚未读取的入站数据，不影响读取器的溢出缓冲；
/// - **执行逻辑 (How)**：字节顺序由连接的写任务保证，本结构只持有最近一次提交的完成状态；
///   完成状态以 `Arc` 共享，等待期间仍留在槽中，`drain` 被取消（例如外层 `timeout` 到期）
///   后跟踪不丢失；完成后仅当槽中仍是同一次写入时才清除，等待期间的新写入留给下一次 `drain`；
/// - **设计权衡 (Trade-offs)**：被覆盖的旧写入若失败，其错误不会被任何 `drain` 观察到，
///   只会出现在日志中。
#[derive(Debug)]
pub struct WriteTracker {
    slot: Arc<ChannelSlot>,
    last: Mutex<Option<Arc<AsyncMutex<Completion>>>>,
}

impl WriteTracker {
    pub(crate) fn new(slot: Arc<ChannelSlot>) -> Self {
        Self {
            slot,
            last: Mutex::new(None),
        }
    }

    pub fn write(&self, payload: impl Into<Bytes>) -> Result<(), SerialSocketError> {
        let channel = self.slot.current().ok_or(SerialSocketError::NotConnected)?;
        let pending = channel.submit(payload.into())?;
        *self.last.lock() = Some(Arc::new(AsyncMutex::new(Completion::Waiting(pending))));
        Ok(())
    }

    pub async fn drain(&self) -> Result<(), SerialSocketError> {
        let tracked = self.last.lock().clone();
        let Some(completion) = tracked else {
            return Ok(());
        };
        let result = completion.lock().await.settle().await;

        let mut last = self.last.lock();
        if last
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &completion))
        {
            *last = None;
        }
        result
    }

    /// 是否存在尚未被 `drain` 观察的写入。
    pub fn has_pending(&self) -> bool {
        self.last.lock().is_some()
    }

    pub fn flush(&self) {
        if let Some(channel) = self.slot.current() {
            let discarded = channel.discard_pending_input();
            if discarded > 0 {
                debug!(connection = channel.id(), discarded, "discarded unread input");
            }
        }
    }
}
