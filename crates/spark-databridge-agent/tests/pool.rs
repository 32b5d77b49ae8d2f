//! 连接池的容量、校验与关闭语义。

use std::{sync::Arc, time::Duration};

use spark_databridge_agent::{
    Agent, ConnectionPool, PoolSettings,
    memory::{MemoryClientFactory, MemoryReceiver},
};
use spark_databridge_core::{AgentConfiguration, DataBridgeError, Event, ReceiverAddress};

fn pool(receiver: &MemoryReceiver, max_per_receiver: usize, wait: Duration) -> ConnectionPool {
    ConnectionPool::new(
        Arc::new(MemoryClientFactory::new(receiver.clone())),
        PoolSettings {
            max_per_receiver,
            wait_timeout: wait,
        },
    )
}

fn address() -> ReceiverAddress {
    ReceiverAddress::ssl("receiver.local", 9711)
}

fn client_id(lent: &spark_databridge_agent::PooledClient) -> String {
    lent.client().map(|client| client.id().into_owned()).unwrap_or_default()
}

/// 并发借用下同一地址的连接数从不超过容量，包括归还与借用交错的时刻。
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_borrowers_never_exceed_capacity() -> anyhow::Result<()> {
    let receiver = MemoryReceiver::new();
    let pool = pool(&receiver, 3, Duration::from_secs(5));

    let mut tasks = Vec::new();
    for _ in 0..24 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let lent = pool.borrow(&address()).await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
            pool.release(lent).await;
            Ok::<_, DataBridgeError>(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    assert!(receiver.max_open() <= 3);
    let stats = pool.stats(&address());
    assert_eq!(stats.lent, 0);
    assert!(stats.idle <= 3);
    assert_eq!(stats.created as usize, receiver.created());
    Ok(())
}

/// 空闲连接按后进先出复用。
#[tokio::test(flavor = "multi_thread")]
async fn idle_connections_are_reused() -> anyhow::Result<()> {
    let receiver = MemoryReceiver::new();
    let pool = pool(&receiver, 2, Duration::from_secs(1));

    let first = pool.borrow(&address()).await?;
    let first_id = client_id(&first);
    assert!(!first.is_reused());
    pool.release(first).await;

    let again = pool.borrow(&address()).await?;
    assert!(again.is_reused());
    assert_eq!(client_id(&again), first_id);
    assert_eq!(receiver.created(), 1);
    pool.release(again).await;
    Ok(())
}

/// 未通过校验的连接不会被再次借出。
#[tokio::test(flavor = "multi_thread")]
async fn invalid_connection_is_never_reborrowed() -> anyhow::Result<()> {
    let receiver = MemoryReceiver::new();
    let pool = pool(&receiver, 2, Duration::from_secs(1));

    let lent = pool.borrow(&address()).await?;
    let stale_id = client_id(&lent);
    pool.release(lent).await;
    assert_eq!(pool.stats(&address()).idle, 1);

    receiver.disconnect_all();
    let fresh = pool.borrow(&address()).await?;
    assert_ne!(client_id(&fresh), stale_id);
    assert!(!fresh.is_reused());

    let stats = pool.stats(&address());
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.created, 2);
    assert_eq!(receiver.terminated(), 1);
    pool.release(fresh).await;
    Ok(())
}

/// 归还时才失效的连接直接终止，不进入空闲栈。
#[tokio::test(flavor = "multi_thread")]
async fn release_terminates_connection_that_went_bad() -> anyhow::Result<()> {
    let receiver = MemoryReceiver::new();
    let pool = pool(&receiver, 1, Duration::from_secs(1));

    let lent = pool.borrow(&address()).await?;
    receiver.disconnect_all();
    pool.release(lent).await;

    let stats = pool.stats(&address());
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.evicted, 1);
    assert_eq!(receiver.open(), 0);
    Ok(())
}

/// 容量为 1 时，后来者在有界等待内等到归还；等待不足则 `PoolExhausted`。
#[tokio::test(flavor = "multi_thread")]
async fn capacity_one_blocks_until_release() -> anyhow::Result<()> {
    let receiver = MemoryReceiver::new();
    let pool = pool(&receiver, 1, Duration::from_millis(50));

    let held = pool.borrow(&address()).await?;
    let err = pool.borrow(&address()).await.expect_err("capacity exhausted");
    match err {
        DataBridgeError::PoolExhausted { max, waited, .. } => {
            assert_eq!(max, 1);
            assert!(waited >= Duration::from_millis(50));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.borrow(&address()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    pool.release(held).await;
    let lent = waiter.await??;
    assert!(lent.is_reused());
    pool.release(lent).await;
    assert_eq!(receiver.created(), 1);
    Ok(())
}

/// 未归还就丢弃的借用释放许可并丢弃连接。
#[tokio::test(flavor = "multi_thread")]
async fn dropped_handle_frees_capacity() -> anyhow::Result<()> {
    let receiver = MemoryReceiver::new();
    let pool = pool(&receiver, 1, Duration::from_millis(200));

    let lent = pool.borrow(&address()).await?;
    drop(lent);

    let next = pool.borrow(&address()).await?;
    assert!(!next.is_reused());
    let stats = pool.stats(&address());
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.lent, 1);
    pool.release(next).await;
    Ok(())
}

/// 超时取消的发布丢弃了借出的连接：旧连接终止之前，容量为 1 的池不会再建第二条连接。
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_publish_holds_capacity_until_connection_closes() -> anyhow::Result<()> {
    let receiver = MemoryReceiver::new();
    receiver.set_write_delay(Duration::from_millis(200));
    let config = AgentConfiguration::default()
        .with_pool_capacity(1)
        .with_pool_wait_timeout(Duration::from_secs(2));
    let agent = Agent::with_factory(config, Arc::new(MemoryClientFactory::new(receiver.clone())))?;
    let endpoint = agent.endpoint(address());

    let events = vec![Event::new("org.throttle.stream", 1)];
    let cancelled = tokio::time::timeout(Duration::from_millis(20), endpoint.publish(events)).await;
    assert!(cancelled.is_err());

    let next = agent.pool().borrow(&address()).await?;
    assert!(!next.is_reused());
    assert!(receiver.max_open() <= 1);
    assert_eq!(receiver.terminated(), 1);
    assert_eq!(receiver.open(), 1);
    agent.pool().release(next).await;
    Ok(())
}

/// 关闭后：等待者与新借用得到 `PoolClosed`，空闲连接被终止，迟到的归还同样被终止。
#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_everything() -> anyhow::Result<()> {
    let receiver = MemoryReceiver::new();
    let pool = pool(&receiver, 2, Duration::from_secs(5));
    let other = ReceiverAddress::ssl("other.local", 9711);

    let idle = pool.borrow(&other).await?;
    pool.release(idle).await;
    let first = pool.borrow(&address()).await?;
    let second = pool.borrow(&address()).await?;

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.borrow(&address()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.shutdown().await;
    pool.shutdown().await;
    assert!(pool.is_closed());
    assert!(matches!(
        waiter.await?,
        Err(DataBridgeError::PoolClosed { .. })
    ));
    assert!(matches!(
        pool.borrow(&address()).await,
        Err(DataBridgeError::PoolClosed { .. })
    ));
    assert_eq!(pool.stats(&other).idle, 0);

    pool.release(first).await;
    pool.evict(second).await;
    assert_eq!(receiver.open(), 0);
    assert_eq!(receiver.terminated(), 3);
    Ok(())
}

/// 工厂拒绝的协议原样返回，且不计入新建连接。
#[tokio::test(flavor = "multi_thread")]
async fn unsupported_protocol_is_reported_by_borrow() -> anyhow::Result<()> {
    let receiver = MemoryReceiver::new();
    let pool = pool(&receiver, 1, Duration::from_millis(100));
    let plaintext = ReceiverAddress::new("PLAINTEXT", "receiver.local", 9711);

    let err = pool.borrow(&plaintext).await.expect_err("unsupported");
    assert!(matches!(err, DataBridgeError::UnsupportedProtocol { .. }));
    // 失败的建连不占用许可。
    let err = pool.borrow(&plaintext).await.expect_err("still unsupported");
    assert!(matches!(err, DataBridgeError::UnsupportedProtocol { .. }));
    assert_eq!(receiver.created(), 0);
    Ok(())
}
