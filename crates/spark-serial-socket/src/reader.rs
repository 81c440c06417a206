use crate::{error::SerialSocketError, slot::ChannelSlot};
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// 已从连接收到、但尚未交付给调用方的字节。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 一次接收事件可能带来比调用方请求更多的字节，多出的后缀必须保留到下一次读取，
///   否则字节会丢失；
///
/// ## 契约（What）
/// - `peek_into`：按序复制 `min(out.len(), len)` 字节但不消费；
/// - `consume`：在确认交付后前移读指针；
/// - `absorb`：把一次接收事件的字节写入调用方剩余空间，放不下的后缀追加到缓冲末尾；
/// - **不变式**：进入传输等待前缓冲一定已被完整交付，因此任一时刻至多缓存一次接收事件的余量；
///   严格 FIFO。
#[derive(Debug, Default)]
pub struct OverflowBuffer {
    pending: BytesMut,
}

impl OverflowBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 复制缓冲前部到 `out`，返回复制的字节数，不改变缓冲。
    pub fn peek_into(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.pending.len());
        out[..n].copy_from_slice(&self.pending[..n]);
        n
    }

    /// 丢弃已交付的前 `n` 字节。
    pub fn consume(&mut self, n: usize) {
        self.pending.advance(n.min(self.pending.len()));
    }

    /// 交付一次接收事件：能放下的部分写入 `out`，其余追加到缓冲。返回写入 `out` 的字节数。
    pub fn absorb(&mut self, chunk: &[u8], out: &mut [u8]) -> usize {
        let n = out.len().min(chunk.len());
        out[..n].copy_from_slice(&chunk[..n]);
        if chunk.len() > n {
            self.pending.extend_from_slice(&chunk[n..]);
        }
        n
    }
}

/// 面向当前连接的有界读取器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 串口读取是“最多读 N 字节”的语义：允许部分读取，但绝不能超过 N，也不能越过一次接收事件继续等待；
///
/// ## 逻辑 (How)
/// 1. 先从溢出缓冲按序交付；
/// 2. 请求已满足则立即返回，不触碰传输；
/// 3. 否则要求槽位中存在活动连接，并等待**恰好一次**接收事件：
///    - 空事件（对端结束）：只返回溢出部分，视作干净的零字节读取；
///    - 错误：本次读取失败，溢出部分保留在缓冲中，连接不受影响；
///    - 非空事件：放得下的部分交付，放不下的后缀进入溢出缓冲。
///
/// ## 契约 (What)
/// - 返回值恒满足 `bytes_read <= out.len()`；
/// - 所有成功读取的结果依次拼接，等于连接交付的字节流，无重复、无丢失；
/// - 内部锁让并发读取依次执行，但调用方仍应自行串行化读取。
///
/// ## 注意事项 (Trade-offs)
/// - 先 `peek` 后 `consume`：等待期间出错时不会吞掉已复制的溢出字节。
#[derive(Debug)]
pub struct OverflowReader {
    slot: Arc<ChannelSlot>,
    overflow: AsyncMutex<OverflowBuffer>,
    chunk_size: usize,
}

impl OverflowReader {
    pub(crate) fn new(slot: Arc<ChannelSlot>, chunk_size: usize) -> Self {
        Self {
            slot,
            overflow: AsyncMutex::new(OverflowBuffer::new()),
            chunk_size: chunk_size.max(1),
        }
    }

    /// 读取至多 `out.len()` 字节，返回实际写入 `out` 的字节数。
    pub async fn read(&self, out: &mut [u8]) -> Result<usize, SerialSocketError> {
        let mut overflow = self.overflow.lock().await;
        let served = overflow.peek_into(out);
        if served == out.len() {
            overflow.consume(served);
            return Ok(served);
        }

        let channel = self.slot.current().ok_or(SerialSocketError::NotConnected)?;
        let chunk = channel.receive(self.chunk_size).await?;
        overflow.consume(served);
        let delivered = overflow.absorb(&chunk, &mut out[served..]);
        Ok(served + delivered)
    }

    /// 当前溢出缓冲中的字节数。
    pub async fn buffered(&self) -> usize {
        self.overflow.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    /// 以内存中的接收事件序列模拟读取算法：与 `OverflowReader::read` 同一套缓冲操作。
    fn simulated_read(
        overflow: &mut OverflowBuffer,
        events: &mut VecDeque<Vec<u8>>,
        out: &mut [u8],
    ) -> usize {
        let served = overflow.peek_into(out);
        if served == out.len() {
            overflow.consume(served);
            return served;
        }
        overflow.consume(served);
        match events.pop_front() {
            Some(chunk) => served + overflow.absorb(&chunk, &mut out[served..]),
            None => served,
        }
    }

    #[test]
    fn surplus_is_served_before_new_data() {
        let mut overflow = OverflowBuffer::new();
        let mut out = [0u8; 5];
        assert_eq!(overflow.absorb(b"0123456789", &mut out), 5);
        assert_eq!(&out, b"01234");
        assert_eq!(overflow.len(), 5);

        let mut out = [0u8; 5];
        assert_eq!(overflow.peek_into(&mut out), 5);
        overflow.consume(5);
        assert_eq!(&out, b"56789");
        assert!(overflow.is_empty());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut overflow = OverflowBuffer::new();
        let mut sink = [0u8; 0];
        overflow.absorb(b"abc", &mut sink);
        let mut out = [0u8; 2];
        assert_eq!(overflow.peek_into(&mut out), 2);
        assert_eq!(overflow.len(), 3);
        overflow.consume(10);
        assert!(overflow.is_empty());
    }

    #[test]
    fn zero_length_request_touches_nothing() {
        let mut overflow = OverflowBuffer::new();
        let mut events = VecDeque::from([b"xyz".to_vec()]);
        let mut out = [0u8; 0];
        assert_eq!(simulated_read(&mut overflow, &mut events, &mut out), 0);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn partial_overflow_then_one_event() {
        let mut overflow = OverflowBuffer::new();
        let mut events = VecDeque::from([b"abcdef".to_vec(), b"ghij".to_vec()]);

        let mut out = [0u8; 4];
        assert_eq!(simulated_read(&mut overflow, &mut events, &mut out), 4);
        assert_eq!(&out, b"abcd");

        // 两字节来自溢出，随后只消费一次接收事件。
        let mut out = [0u8; 8];
        assert_eq!(simulated_read(&mut overflow, &mut events, &mut out), 6);
        assert_eq!(&out[..6], b"efghij");
        assert!(events.is_empty());
    }

    proptest! {
        #[test]
        fn prop_reads_reassemble_delivered_stream(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..24),
            requests in proptest::collection::vec(0usize..48, 1..64),
        ) {
            let expected: Vec<u8> = chunks.iter().flatten().copied().collect();
            let mut events: VecDeque<Vec<u8>> = chunks.into_iter().collect();
            let mut overflow = OverflowBuffer::new();
            let mut received = Vec::new();

            let mut idx = 0;
            while !(events.is_empty() && overflow.is_empty()) {
                let max = requests[idx % requests.len()].max(1);
                idx += 1;
                let mut out = vec![0u8; max];
                let n = simulated_read(&mut overflow, &mut events, &mut out);
                prop_assert!(n <= max);
                received.extend_from_slice(&out[..n]);
            }
            prop_assert_eq!(received, expected);
        }

        #[test]
        fn prop_overflow_holds_at_most_one_event_surplus(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 1..16),
            max in 1usize..32,
        ) {
            let mut events: VecDeque<Vec<u8>> = chunks.iter().cloned().collect();
            let mut overflow = OverflowBuffer::new();
            while !(events.is_empty() && overflow.is_empty()) {
                let before = events.front().map(Vec::len).unwrap_or(0);
                let had_overflow = !overflow.is_empty();
                let mut out = vec![0u8; max];
                simulated_read(&mut overflow, &mut events, &mut out);
                if !had_overflow {
                    prop_assert!(overflow.len() <= before);
                }
            }
        }
    }
}
