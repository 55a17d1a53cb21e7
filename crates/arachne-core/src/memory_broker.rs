//! In-process [`Broker`] implementation.
//!
//! Backs single-node runs (`arachne crawl --local`) and every unit test of the
//! worker loops, nodes and orchestrator. All state sits behind one mutex, so
//! each operation is trivially atomic; blocking pops park on a [`Notify`] that
//! is signalled on every push.
//!
//! [`MemoryBroker::set_offline`] simulates a lost connection: every operation
//! fails with [`AppError::BrokerError`] and open subscriptions are closed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use crate::broker::{Broker, StreamEntry};
use crate::error::AppError;

#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    pushed: Notify,
}

#[derive(Default)]
struct State {
    offline: bool,
    values: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
    queues: HashMap<String, VecDeque<String>>,
    streams: HashMap<String, Vec<StreamEntry>>,
    next_stream_id: u64,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated connection loss.
    pub fn set_offline(&self, offline: bool) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.offline = offline;
        if offline {
            state.subscribers.clear();
        }
        drop(state);
        self.inner.pushed.notify_waiters();
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, AppError> {
        let state = self
            .inner
            .state
            .lock()
            .map_err(|_| AppError::BrokerError("memory broker state poisoned".into()))?;
        if state.offline {
            return Err(AppError::BrokerError("memory broker is offline".into()));
        }
        Ok(state)
    }

    fn try_pop(&self, queue: &str) -> Result<Option<String>, AppError> {
        let mut state = self.state()?;
        Ok(state.queues.get_mut(queue).and_then(VecDeque::pop_front))
    }
}

impl Broker for MemoryBroker {
    async fn incr(&self, key: &str) -> Result<i64, AppError> {
        let mut state = self.state()?;
        let current = match state.values.get(key) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                AppError::BrokerError(format!("value at '{key}' is not an integer"))
            })?,
            None => 0,
        };
        let next = current + 1;
        state.values.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<bool, AppError> {
        let mut state = self.state()?;
        Ok(state
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool, AppError> {
        let state = self.state()?;
        Ok(state.sets.get(set).is_some_and(|s| s.contains(member)))
    }

    async fn set_card(&self, set: &str) -> Result<u64, AppError> {
        let state = self.state()?;
        Ok(state.sets.get(set).map_or(0, |s| s.len() as u64))
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<(), AppError> {
        {
            let mut state = self.state()?;
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(payload.to_string());
        }
        self.inner.pushed.notify_waiters();
        Ok(())
    }

    async fn pop_blocking(&self, queue: &str, timeout: Duration) -> Result<Option<String>, AppError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking, so a push between the check
            // and the wait still wakes us.
            let notified = self.inner.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(queue)? {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, AppError> {
        let state = self.state()?;
        Ok(state.queues.get(queue).map_or(0, |q| q.len() as u64))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), AppError> {
        let mut state = self.state()?;
        if let Some(subscribers) = state.subscribers.get_mut(channel) {
            subscribers.retain(|tx| tx.send(message.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>, AppError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state()?;
        state
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn stream_append(&self, stream: &str, payload: &str) -> Result<u64, AppError> {
        let mut state = self.state()?;
        state.next_stream_id += 1;
        let id = state.next_stream_id;
        state
            .streams
            .entry(stream.to_string())
            .or_default()
            .push(StreamEntry {
                id,
                payload: payload.to_string(),
            });
        Ok(id)
    }

    async fn stream_range(&self, stream: &str) -> Result<Vec<StreamEntry>, AppError> {
        let state = self.state()?;
        Ok(state.streams.get(stream).cloned().unwrap_or_default())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let state = self.state()?;
        Ok(state.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut state = self.state()?;
        state.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut state = self.state()?;
        state.values.remove(key);
        state.sets.remove(key);
        state.queues.remove(key);
        state.streams.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[tokio::test]
    async fn test_set_add_exactly_one_winner() {
        let broker = MemoryBroker::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                broker
                    .set_add("visited_urls", "https://a.com/")
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(broker.set_card("visited_urls").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let broker = MemoryBroker::new();
        broker.push("q", "a").await.unwrap();
        broker.push("q", "b").await.unwrap();
        assert_eq!(broker.queue_len("q").await.unwrap(), 2);

        let timeout = Duration::from_millis(10);
        assert_eq!(broker.pop_blocking("q", timeout).await.unwrap().as_deref(), Some("a"));
        assert_eq!(broker.pop_blocking("q", timeout).await.unwrap().as_deref(), Some("b"));
        assert_eq!(broker.pop_blocking("q", timeout).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_popped_items_reach_one_consumer() {
        let broker = MemoryBroker::new();
        let mut consumers = Vec::new();
        for _ in 0..8 {
            let broker = broker.clone();
            consumers.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(item) = broker
                    .pop_blocking("q", Duration::from_millis(100))
                    .await
                    .unwrap()
                {
                    got.push(item);
                }
                got
            }));
        }
        for i in 0..200 {
            broker.push("q", &i.to_string()).await.unwrap();
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for consumer in consumers {
            for item in consumer.await.unwrap() {
                total += 1;
                assert!(seen.insert(item), "item delivered twice");
            }
        }
        assert_eq!(total, 200);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let broker = MemoryBroker::new();
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.pop_blocking("q", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.push("q", "late").await.unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let broker = MemoryBroker::new();
        let mut a = broker.subscribe("ctl").await.unwrap();
        let mut b = broker.subscribe("ctl").await.unwrap();
        broker.publish("ctl", "hello").await.unwrap();
        broker.publish("other", "ignored").await.unwrap();

        assert_eq!(a.recv().await.as_deref(), Some("hello"));
        assert_eq!(b.recv().await.as_deref(), Some("hello"));
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stream_keeps_append_order() {
        let broker = MemoryBroker::new();
        let first = broker.stream_append("s", "one").await.unwrap();
        let second = broker.stream_append("s", "two").await.unwrap();
        assert!(second > first);

        let entries = broker.stream_range("s").await.unwrap();
        let payloads: Vec<_> = entries.iter().map(|e| e.payload.as_str()).collect();
        assert_eq!(payloads, ["one", "two"]);
    }

    #[tokio::test]
    async fn test_delete_clears_every_kind() {
        let broker = MemoryBroker::new();
        broker.incr("k").await.unwrap();
        broker.set_add("k", "m").await.unwrap();
        broker.push("k", "p").await.unwrap();
        broker.stream_append("k", "r").await.unwrap();

        broker.delete("k").await.unwrap();
        assert_eq!(broker.get("k").await.unwrap(), None);
        assert_eq!(broker.set_card("k").await.unwrap(), 0);
        assert_eq!(broker.queue_len("k").await.unwrap(), 0);
        assert!(broker.stream_range("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_fails_and_closes_subscriptions() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscribe("ctl").await.unwrap();
        broker.set_offline(true);

        assert!(matches!(
            broker.incr("k").await,
            Err(AppError::BrokerError(_))
        ));
        assert!(sub.recv().await.is_none());

        broker.set_offline(false);
        assert_eq!(broker.incr("k").await.unwrap(), 1);
    }
}
