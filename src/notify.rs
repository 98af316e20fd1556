use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Mutex};
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// External side-effect collaborator: mail delivery, calendar export, etc.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, event: &Event) -> Result<(), SinkError>;
}

/// Broadcast hub for committed changes, one channel per space.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a space. Creates the channel if needed.
    pub fn subscribe(&self, space_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(space_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, space_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&space_id) {
            let _ = sender.send(event.clone());
        }
    }
}

/// Hands events to a bounded pool of workers that deliver them to every
/// sink. Delivery is detached from the caller: a full queue drops the event,
/// a failing sink is logged, nothing is retried.
pub struct Dispatcher {
    tx: mpsc::Sender<Event>,
}

impl Dispatcher {
    /// Must be called inside a tokio runtime.
    pub fn spawn(sinks: Vec<Arc<dyn NotificationSink>>, workers: usize, queue: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let sinks: Arc<[Arc<dyn NotificationSink>]> = sinks.into();
        for worker in 0..workers.max(1) {
            tokio::spawn(worker_loop(worker, rx.clone(), sinks.clone()));
        }
        Self { tx }
    }

    /// Queue an event without waiting. Returns false if it was dropped.
    pub fn dispatch(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                let event = match e {
                    mpsc::error::TrySendError::Full(ev) | mpsc::error::TrySendError::Closed(ev) => ev,
                };
                tracing::warn!("notification queue unavailable, dropping {}", event.label());
                metrics::counter!(crate::observability::NOTIFICATIONS_DROPPED_TOTAL).increment(1);
                false
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Event>>>,
    sinks: Arc<[Arc<dyn NotificationSink>]>,
) {
    loop {
        let next = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(event) = next else {
            tracing::debug!("notification worker {worker} stopping");
            break;
        };
        for sink in sinks.iter() {
            match sink.deliver(&event).await {
                Ok(()) => {
                    metrics::counter!(crate::observability::NOTIFICATIONS_DELIVERED_TOTAL).increment(1);
                }
                Err(e) => {
                    tracing::warn!("sink {} failed on {}: {e}", sink.name(), event.label());
                    metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::model::*;

    struct Recording {
        tx: mpsc::UnboundedSender<Event>,
    }

    #[async_trait]
    impl NotificationSink for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, event: &Event) -> Result<(), SinkError> {
            let _ = self.tx.send(event.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl NotificationSink for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn deliver(&self, _event: &Event) -> Result<(), SinkError> {
            Err("smtp down".into())
        }
    }

    fn series_event(space_id: Ulid) -> Event {
        Event::SeriesCreated { series_id: Ulid::new(), space_id, created: 3, failed: 0 }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let sid = Ulid::new();
        let mut rx = hub.subscribe(sid);

        let event = series_event(sid);
        hub.send(sid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let sid = Ulid::new();
        // No subscriber, must not panic
        hub.send(sid, &series_event(sid));
    }

    #[tokio::test]
    async fn dispatcher_survives_failing_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(Broken), Arc::new(Recording { tx })];
        let dispatcher = Dispatcher::spawn(sinks, 2, 16);

        let first = series_event(Ulid::new());
        let second = series_event(Ulid::new());
        assert!(dispatcher.dispatch(first.clone()));
        assert!(dispatcher.dispatch(second.clone()));

        let mut got = Vec::new();
        for _ in 0..2 {
            let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            got.push(ev);
        }
        assert!(got.contains(&first));
        assert!(got.contains(&second));
    }
}
