use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use rehydrate_core::error::{Error, Result};

/// Bounded pool of store connections.
///
/// This is the only resource shared between concurrent requests. A checkout
/// that cannot be served within `acquire_timeout`, or any checkout after
/// [`ConnectionPool::close`], is reported as `StoreUnavailable`.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    permits: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
}

/// A checked-out connection; returned to the pool on drop.
#[derive(Debug)]
pub struct PooledConnection {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPool {
    pub const DEFAULT_SIZE: usize = 8;
    pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(1000);

    pub fn new(size: usize, acquire_timeout: Duration) -> Self {
        let size = size.max(1);
        Self { permits: Arc::new(Semaphore::new(size)), size, acquire_timeout }
    }

    pub async fn acquire(&self) -> Result<PooledConnection> {
        match tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(PooledConnection { _permit: permit }),
            Ok(Err(_)) => Err(Error::StoreUnavailable("connection pool is closed".into())),
            Err(_) => Err(Error::StoreUnavailable(format!("no connection available within {}ms", self.acquire_timeout.as_millis()))),
        }
    }

    /// Refuse all further checkouts. Connections already out stay valid.
    pub fn close(&self) { self.permits.close(); }

    pub fn is_closed(&self) -> bool { self.permits.is_closed() }

    pub fn size(&self) -> usize { self.size }

    pub fn available(&self) -> usize { self.permits.available_permits() }
}

impl Default for ConnectionPool {
    fn default() -> Self { Self::new(Self::DEFAULT_SIZE, Self::DEFAULT_ACQUIRE_TIMEOUT) }
}
