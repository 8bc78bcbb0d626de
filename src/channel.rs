//! Bounded FIFO channels: the only primitive that guarantees safe
//! concurrent handoff between coroutines.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::time::{timeout, Duration};

use crate::error::{LexFlowError, LexFlowResult};
use crate::value::Value;

/// A bounded FIFO queue. `capacity == 0` means unbuffered/synchronous
/// rendezvous: a `send` only completes once a matching `receive` has
/// taken the value.
pub struct Channel {
    capacity: usize,
    buffer: Mutex<VecDeque<Value>>,
    closed: AtomicBool,
    not_empty: Notify,
    not_full: Notify,
}

impl Channel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    fn room(&self) -> bool {
        // An unbuffered channel only ever has room when empty: the
        // receiver must drain the single slot before another send may
        // proceed, approximating synchronous rendezvous FIFO ordering.
        let len = self.buffer.lock().len();
        if self.capacity == 0 {
            len == 0
        } else {
            len < self.capacity
        }
    }

    /// Suspends until capacity is available; errors if closed.
    pub async fn send(&self, v: Value) -> LexFlowResult<()> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(LexFlowError::RuntimeError("send on a closed channel".into()));
            }
            if self.room() {
                self.buffer.lock().push_back(v);
                self.not_empty.notify_one();
                return Ok(());
            }
            let notified = self.not_full.notified();
            if self.room() || self.closed.load(Ordering::SeqCst) {
                continue;
            }
            notified.await;
        }
    }

    /// Non-blocking: succeeds only if there is room and the channel is open.
    pub fn try_send(&self, v: Value) -> bool {
        if self.closed.load(Ordering::SeqCst) || !self.room() {
            return false;
        }
        self.buffer.lock().push_back(v);
        self.not_empty.notify_one();
        true
    }

    /// Suspends until a value is available, the channel is closed (and
    /// drained), or `timeout_secs` elapses.
    pub async fn receive(&self, timeout_secs: Option<f64>) -> LexFlowResult<Value> {
        let fut = self.receive_inner();
        match timeout_secs {
            None => fut.await,
            Some(secs) => timeout(Duration::from_secs_f64(secs.max(0.0)), fut)
                .await
                .map_err(|_| LexFlowError::Timeout)?,
        }
    }

    async fn receive_inner(&self) -> LexFlowResult<Value> {
        loop {
            if let Some(v) = self.buffer.lock().pop_front() {
                self.not_full.notify_one();
                return Ok(v);
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(LexFlowError::RuntimeError(
                    "receive on a closed, empty channel".into(),
                ));
            }
            let notified = self.not_empty.notified();
            if !self.buffer.lock().is_empty() || self.closed.load(Ordering::SeqCst) {
                continue;
            }
            notified.await;
        }
    }

    /// Non-blocking: `(value, true)` if one was available, else `(Null, false)`.
    pub fn try_receive(&self) -> (Value, bool) {
        match self.buffer.lock().pop_front() {
            Some(v) => {
                self.not_full.notify_one();
                (v, true)
            }
            None => (Value::Null, false),
        }
    }

    /// No further sends; pending receives drain the buffer then raise.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn buffered_capacity_is_never_exceeded() {
        let ch = Arc::new(Channel::new(2));
        ch.send(Value::Int(1)).await.unwrap();
        ch.send(Value::Int(2)).await.unwrap();
        assert!(!ch.try_send(Value::Int(3)));
        assert_eq!(ch.len(), 2);
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let ch = Arc::new(Channel::new(4));
        for i in 0..4 {
            ch.send(Value::Int(i)).await.unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(ch.receive(None).await.unwrap().as_int().unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn closed_empty_channel_raises_on_receive() {
        let ch = Channel::new(1);
        ch.close();
        assert!(ch.receive(None).await.is_err());
    }

    #[tokio::test]
    async fn receive_timeout_raises_timeout_error() {
        let ch = Channel::new(0);
        let err = ch.receive(Some(0.01)).await.unwrap_err();
        assert!(matches!(err, LexFlowError::Timeout));
    }

    #[tokio::test]
    async fn unbuffered_channel_rendezvous() {
        let ch = Arc::new(Channel::new(0));
        let sender = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.send(Value::Int(42)).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let v = ch.receive(None).await.unwrap();
        assert_eq!(v.as_int(), Some(42));
        sender.await.unwrap().unwrap();
    }
}
