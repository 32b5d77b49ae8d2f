//! # 连接池
//!
//! ## 意图（Why）
//! - TLS 握手代价远高于单次写入，按接收端复用连接可以把握手摊薄到多次发布；
//! - 每个接收端的连接数有上限，扇出负载下套接字总量因此有界；
//! - 借用在容量耗尽时有界等待，形成对发布方的背压。
//!
//! ## 结构（How）
//! - `DashMap<ReceiverAddress, Arc<ReceiverSlot>>`：按地址分片，不同地址互不竞争；
//! - `ReceiverSlot` 持有本地址的空闲栈（`parking_lot::Mutex`）与容量信号量；
//! - 每条借出的连接占用一个许可，许可随 [`PooledClient`] 的归还、驱逐或析构释放。
//!
//! ## 不变式（What）
//! - 空闲连接不占许可；借用方拿到许可后先复用空闲连接，只有空闲栈为空时才新建，
//!   且归还时“压栈”先于“释放许可”，因此 `空闲 + 借出 + 建连中 ≤ 容量` 始终成立；
//! - 未通过校验的连接只会被终止，绝不会重新进入空闲栈；
//! - 关闭后所有等待者与后续借用得到 `PoolClosed`，之后归还的连接一律终止。

use std::{
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use spark_databridge_core::{
    AgentConfiguration, ClientPoolFactory, DataBridgeError, ReceiverAddress, Result,
    TransportClient,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 连接池的容量参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    /// 每个接收端最多同时存在的连接数。
    pub max_per_receiver: usize,
    /// 容量耗尽时借用的最长等待时间。
    pub wait_timeout: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &AgentConfiguration) -> Self {
        Self {
            max_per_receiver: config.max_connections_per_receiver,
            wait_timeout: config.pool_wait_timeout(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfiguration::default())
    }
}

/// 单个接收端的连接计数快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub lent: usize,
    /// `idle + lent`。
    pub open: usize,
    /// 累计新建的连接数。
    pub created: u64,
    /// 累计因校验失败、驱逐或析构而终止的连接数。
    pub evicted: u64,
}

struct ReceiverSlot {
    idle: Mutex<Vec<Box<dyn TransportClient>>>,
    permits: Arc<Semaphore>,
    lent: AtomicUsize,
    created: AtomicU64,
    evicted: AtomicU64,
}

impl ReceiverSlot {
    fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            permits: Arc::new(Semaphore::new(capacity)),
            lent: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().len();
        let lent = self.lent.load(Ordering::SeqCst);
        PoolStats {
            idle,
            lent,
            open: idle + lent,
            created: self.created.load(Ordering::SeqCst),
            evicted: self.evicted.load(Ordering::SeqCst),
        }
    }
}

struct PoolInner {
    factory: Arc<dyn ClientPoolFactory>,
    settings: PoolSettings,
    receivers: DashMap<ReceiverAddress, Arc<ReceiverSlot>>,
    closed: AtomicBool,
}

/// 按接收端分片的有界连接池。
///
/// 克隆只增加引用计数，所有克隆共享同一组连接。
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ClientPoolFactory>, settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory,
                settings,
                receivers: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> PoolSettings {
        self.inner.settings
    }

    pub fn factory(&self) -> &Arc<dyn ClientPoolFactory> {
        &self.inner.factory
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// 借出一条到 `address` 的连接。
    ///
    /// # 教案级注释
    ///
    /// ## 逻辑（How）
    /// 1. 在 `wait_timeout` 内获取本地址的容量许可，超时返回 `PoolExhausted`，
    ///    信号量已关闭返回 `PoolClosed`；
    /// 2. 自栈顶（最近归还者）起逐个弹出空闲连接并校验，失败者终止后继续；
    /// 3. 空闲栈耗尽时经工厂新建；建连失败时许可随错误一起释放。
    ///
    /// ## 契约（What）
    /// - 返回的 [`PooledClient`] 独占该连接，直到 `release` / `evict` 或析构；
    /// - 工厂错误（如 `UnsupportedProtocol`、`TransportSetup`）原样返回。
    pub async fn borrow(&self, address: &ReceiverAddress) -> Result<PooledClient> {
        if self.is_closed() {
            return Err(DataBridgeError::PoolClosed {
                address: address.clone(),
            });
        }

        let slot = self.slot(address);
        let wait = self.inner.settings.wait_timeout;
        let started = Instant::now();
        let permit = match tokio::time::timeout(wait, Arc::clone(&slot.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(DataBridgeError::PoolClosed {
                    address: address.clone(),
                });
            }
            Err(_) => {
                tracing::warn!(
                    receiver = %address,
                    max = self.inner.settings.max_per_receiver,
                    waited_ms = wait.as_millis() as u64,
                    "connection pool exhausted"
                );
                return Err(DataBridgeError::PoolExhausted {
                    address: address.clone(),
                    max: self.inner.settings.max_per_receiver,
                    waited: started.elapsed(),
                });
            }
        };
        if self.is_closed() {
            return Err(DataBridgeError::PoolClosed {
                address: address.clone(),
            });
        }

        loop {
            let candidate = slot.idle.lock().pop();
            let Some(mut client) = candidate else { break };
            if self.inner.factory.validate(client.as_ref()) {
                tracing::debug!(receiver = %address, client = %client.id(), "reusing pooled connection");
                return Ok(self.lend(address, slot, permit, client, true));
            }
            tracing::warn!(
                receiver = %address,
                client = %client.id(),
                "pooled connection failed validation, terminating"
            );
            self.inner.factory.terminate(client.as_mut()).await;
            slot.evicted.fetch_add(1, Ordering::SeqCst);
        }

        let client = self.inner.factory.create(address).await?;
        slot.created.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(receiver = %address, client = %client.id(), "opened new pooled connection");
        Ok(self.lend(address, slot, permit, client, false))
    }

    /// 归还连接：重新校验后压回空闲栈，未通过校验或池已关闭时终止。
    pub async fn release(&self, mut lent: PooledClient) {
        let Some(mut client) = lent.client.take() else {
            return;
        };
        let slot = Arc::clone(&lent.slot);
        slot.lent.fetch_sub(1, Ordering::SeqCst);

        if self.is_closed() {
            self.inner.factory.terminate(client.as_mut()).await;
        } else if self.inner.factory.validate(client.as_ref()) {
            slot.idle.lock().push(client);
            // 与 shutdown 竞争时，压栈可能发生在清空之后。
            if self.is_closed() {
                self.drain(&slot).await;
            }
        } else {
            tracing::warn!(
                receiver = %lent.address,
                client = %client.id(),
                "released connection failed validation, terminating"
            );
            self.inner.factory.terminate(client.as_mut()).await;
            slot.evicted.fetch_add(1, Ordering::SeqCst);
        }
        drop(lent);
    }

    /// 无条件终止连接（发布失败后调用）。
    pub async fn evict(&self, mut lent: PooledClient) {
        let Some(mut client) = lent.client.take() else {
            return;
        };
        lent.slot.lent.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(receiver = %lent.address, client = %client.id(), "evicting connection");
        self.inner.factory.terminate(client.as_mut()).await;
        lent.slot.evicted.fetch_add(1, Ordering::SeqCst);
    }

    /// 关闭连接池：唤醒全部等待者并终止所有空闲连接。幂等。
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let slots: Vec<Arc<ReceiverSlot>> = self
            .inner
            .receivers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for slot in &slots {
            slot.permits.close();
        }
        for slot in &slots {
            self.drain(slot).await;
        }
        tracing::info!(receivers = slots.len(), "connection pool shut down");
    }

    /// 某接收端的连接计数；从未借用过的地址返回全零。
    pub fn stats(&self, address: &ReceiverAddress) -> PoolStats {
        self.inner
            .receivers
            .get(address)
            .map(|slot| slot.stats())
            .unwrap_or_default()
    }

    fn slot(&self, address: &ReceiverAddress) -> Arc<ReceiverSlot> {
        let capacity = self.inner.settings.max_per_receiver;
        let entry = self
            .inner
            .receivers
            .entry(address.clone())
            .or_insert_with(|| Arc::new(ReceiverSlot::new(capacity)));
        Arc::clone(entry.value())
    }

    fn lend(
        &self,
        address: &ReceiverAddress,
        slot: Arc<ReceiverSlot>,
        permit: OwnedSemaphorePermit,
        client: Box<dyn TransportClient>,
        reused: bool,
    ) -> PooledClient {
        slot.lent.fetch_add(1, Ordering::SeqCst);
        PooledClient {
            client: Some(client),
            address: address.clone(),
            reused,
            slot,
            factory: Arc::clone(&self.inner.factory),
            permit: Some(permit),
        }
    }

    async fn drain(&self, slot: &ReceiverSlot) {
        let idle = std::mem::take(&mut *slot.idle.lock());
        for mut client in idle {
            self.inner.factory.terminate(client.as_mut()).await;
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("factory", &self.inner.factory)
            .field("settings", &self.inner.settings)
            .field("receivers", &self.inner.receivers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 借出中的连接。
///
/// 持有一个容量许可；未经 `release` / `evict` 而被丢弃时（例如发布被超时取消），
/// 连接被视为不可信：在 Tokio 运行时内异步终止，否则直接随析构关闭套接字。
/// 许可总是在连接关闭之后才归还，容量上限因此在取消路径上同样成立。
pub struct PooledClient {
    client: Option<Box<dyn TransportClient>>,
    address: ReceiverAddress,
    reused: bool,
    slot: Arc<ReceiverSlot>,
    factory: Arc<dyn ClientPoolFactory>,
    // 终止完成后才释放，被丢弃的连接在关闭前始终计入容量。
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledClient {
    pub fn address(&self) -> &ReceiverAddress {
        &self.address
    }

    /// 是否复用了空闲连接（而非新建）。
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn client(&self) -> Option<&dyn TransportClient> {
        self.client.as_deref()
    }

    /// 写出一帧并刷新。
    pub async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let client = self.client.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "connection already returned to pool")
        })?;
        client.write_all(frame).await?;
        client.flush().await
    }
}

impl fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("address", &self.address)
            .field("client", &self.client)
            .field("reused", &self.reused)
            .finish()
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };
        self.slot.lent.fetch_sub(1, Ordering::SeqCst);
        self.slot.evicted.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            receiver = %self.address,
            client = %client.id(),
            "pooled connection dropped without release, discarding"
        );
        let permit = self.permit.take();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let factory = Arc::clone(&self.factory);
            handle.spawn(async move {
                factory.terminate(client.as_mut()).await;
                drop(permit);
            });
        } else {
            drop(client);
            drop(permit);
        }
    }
}
