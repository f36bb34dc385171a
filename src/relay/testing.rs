//! Test helpers shared by the relay modules

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWrite;

use crate::bus::{BusError, BusSubscription, MemoryBus, MessageBus};

/// Memory bus that counts subscribes, widens the subscribe race window and
/// can be told to fail subscriptions
#[derive(Clone, Default)]
pub(crate) struct TestBus {
    pub inner: MemoryBus,
    pub subscribe_calls: Arc<AtomicUsize>,
    pub fail_subscribe: Arc<AtomicBool>,
}

impl TestBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageBus for TestBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        self.inner.publish(topic, payload).await
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;

        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BusError::SubscribeFailed {
                topic: topic.to_string(),
                reason: "injected".into(),
            });
        }
        self.inner.subscribe(topic).await
    }
}

/// Poll `cond` for up to two seconds
pub(crate) async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Writer that never accepts a byte, like a client that stopped reading
pub(crate) struct StalledWriter;

impl AsyncWrite for StalledWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Pending
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
