//! # 进程内传输替身
//!
//! ## 意图（Why）
//! - 连接池、发布端点与失败恢复的行为不依赖 TLS；用一个不碰套接字的传输变体即可在
//!   单元测试与集成测试中精确编排“第 N 次写失败”“强制断开”等场景；
//! - 与 TLS 变体实现同一组能力接口（[`ClientPoolFactory`] / [`TransportClient`]），
//!   在构造时二选一。
//!
//! ## 契约（What）
//! - [`MemoryReceiver`] 是共享的接收端状态：收到的帧（含解码后的事件）、故障脚本与计数器；
//! - [`MemoryClientFactory`] 与 TLS 工厂一样只接受 `ssl` 协议标识；
//! - 写入先进入连接自身的缓冲，`flush` 时按帧解码并记入接收端，未刷新的字节不算送达。

use std::{
    borrow::Cow,
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use spark_databridge_core::{
    ClientPoolFactory, DataBridgeError, Event, ReceiverAddress, Result, SSL_PROTOCOL,
    TransportClient, decode_json_frame,
};

/// 接收端收到的一帧。
#[derive(Clone, Debug)]
pub struct ReceivedFrame {
    pub address: ReceiverAddress,
    pub client_id: String,
    pub events: Vec<Event>,
}

#[derive(Debug, Default)]
struct ReceiverState {
    frames: Mutex<Vec<ReceivedFrame>>,
    connect_failures: AtomicUsize,
    write_failures: AtomicUsize,
    write_delay_ms: AtomicU64,
    epoch: AtomicU64,
    created: AtomicUsize,
    terminated: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

/// 共享的进程内接收端。克隆共享同一份状态。
#[derive(Clone, Debug, Default)]
pub struct MemoryReceiver {
    state: Arc<ReceiverState>,
}

impl MemoryReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来的 `n` 次建连失败。
    pub fn fail_next_connects(&self, n: usize) {
        self.state.connect_failures.store(n, Ordering::SeqCst);
    }

    /// 接下来的 `n` 次写入失败；失败的连接随即视为断开。
    pub fn fail_next_writes(&self, n: usize) {
        self.state.write_failures.store(n, Ordering::SeqCst);
    }

    /// 每次写入前等待的时长。
    pub fn set_write_delay(&self, delay: Duration) {
        self.state
            .write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// 断开当前所有连接；之后新建的连接不受影响。
    pub fn disconnect_all(&self) {
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<ReceivedFrame> {
        self.state.frames.lock().clone()
    }

    /// 按到达顺序展开的全部事件。
    pub fn events(&self) -> Vec<Event> {
        self.state
            .frames
            .lock()
            .iter()
            .flat_map(|frame| frame.events.iter().cloned())
            .collect()
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.state.terminated.load(Ordering::SeqCst)
    }

    /// 当前未关闭的连接数。
    pub fn open(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// 同时存在的连接数峰值。
    pub fn max_open(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }

    fn take_scripted(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// 进程内连接。
#[derive(Debug)]
pub struct MemoryClient {
    id: String,
    address: ReceiverAddress,
    receiver: MemoryReceiver,
    epoch: u64,
    broken: bool,
    closed: bool,
    pending: BytesMut,
}

impl MemoryClient {
    fn release_slot(&mut self) {
        if !self.closed {
            self.closed = true;
            self.receiver.state.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl TransportClient for MemoryClient {
    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }

    fn address(&self) -> &ReceiverAddress {
        &self.address
    }

    fn is_connected(&self) -> bool {
        !self.closed && !self.broken && self.epoch == self.receiver.state.epoch.load(Ordering::SeqCst)
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if !self.is_connected() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "memory client disconnected"));
        }
        let delay = self.receiver.state.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if MemoryReceiver::take_scripted(&self.receiver.state.write_failures) {
            self.broken = true;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write failure"));
        }
        self.pending.put_slice(buf);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        if !self.is_connected() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "memory client disconnected"));
        }
        while let Some(events) = decode_json_frame(&mut self.pending)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?
        {
            self.receiver.state.frames.lock().push(ReceivedFrame {
                address: self.address.clone(),
                client_id: self.id.clone(),
                events,
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.release_slot();
            self.receiver.state.terminated.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.release_slot();
    }
}

/// 进程内连接工厂。
#[derive(Clone, Debug)]
pub struct MemoryClientFactory {
    receiver: MemoryReceiver,
}

impl MemoryClientFactory {
    pub fn new(receiver: MemoryReceiver) -> Self {
        Self { receiver }
    }

    pub fn receiver(&self) -> &MemoryReceiver {
        &self.receiver
    }
}

#[async_trait]
impl ClientPoolFactory for MemoryClientFactory {
    fn protocol(&self) -> &'static str {
        SSL_PROTOCOL
    }

    async fn create(&self, address: &ReceiverAddress) -> Result<Box<dyn TransportClient>> {
        if !address.protocol().eq_ignore_ascii_case(SSL_PROTOCOL) {
            return Err(DataBridgeError::UnsupportedProtocol {
                protocol: address.protocol().to_owned(),
                supported: SSL_PROTOCOL,
            });
        }
        let state = &self.receiver.state;
        if MemoryReceiver::take_scripted(&state.connect_failures) {
            return Err(DataBridgeError::TransportSetup {
                address: address.clone(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "scripted connect failure"),
            });
        }

        let serial = state.created.fetch_add(1, Ordering::SeqCst) + 1;
        let open = state.open.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MemoryClient {
            id: format!("memory-{serial}"),
            address: address.clone(),
            receiver: self.receiver.clone(),
            epoch: state.epoch.load(Ordering::SeqCst),
            broken: false,
            closed: false,
            pending: BytesMut::new(),
        }))
    }
}
