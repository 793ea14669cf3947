//! Broadcast hub
//!
//! Subscribers are indexed by game and by user. Each subscriber owns a
//! bounded queue; `publish` never waits on a slow consumer. A full queue
//! drops that event for that subscriber, a closed queue removes the
//! subscriber. Dropping a [`Subscription`] unsubscribes it, so a connection
//! task that ends for any reason (clean close, socket error, abort) cannot
//! leak its entry.

use crate::{
    common::{
        traits::Connection,
        types::{current_timestamp_ms, GameId, UserId},
    },
    config::BroadcastConfig,
    games::types::BingoEvent,
};
use dashmap::DashMap;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::interval,
};
use tracing::{debug, info, warn};

/// Subscription key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Game(GameId),
    User(UserId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Game(id) => write!(f, "game:{}", id),
            Topic::User(id) => write!(f, "user:{}", id),
        }
    }
}

type Outbox = mpsc::Sender<Arc<BingoEvent>>;
type Index = DashMap<String, HashMap<u64, Outbox>>;

struct HubInner {
    by_game: Index,
    by_user: Index,
    next_id: AtomicU64,
    queue_capacity: usize,
    heartbeat_interval: Duration,
    dropped: AtomicU64,
}

impl HubInner {
    fn index<'a>(&'a self, topic: &'a Topic) -> (&'a Index, &'a str) {
        match topic {
            Topic::Game(id) => (&self.by_game, id.as_str()),
            Topic::User(id) => (&self.by_user, id.as_str()),
        }
    }

    fn remove(&self, topic: &Topic, id: u64) {
        let (index, key) = self.index(topic);
        if let Some(mut subscribers) = index.get_mut(key) {
            subscribers.remove(&id);
        }
        index.remove_if(key, |_, subscribers| subscribers.is_empty());
    }
}

/// Registry of live subscriber queues
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new(config: &BroadcastConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                by_game: DashMap::new(),
                by_user: DashMap::new(),
                next_id: AtomicU64::new(1),
                queue_capacity: config.connection_queue_capacity.max(1),
                heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms.max(1)),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber; it stays registered until the returned guard is dropped
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);

        let (index, key) = self.inner.index(&topic);
        index.entry(key.to_string()).or_default().insert(id, tx);
        debug!(topic = %topic, subscriber = id, "Subscribed");

        Subscription {
            id,
            topic,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    pub fn unsubscribe(&self, topic: &Topic, id: u64) {
        self.inner.remove(topic, id);
        debug!(topic = %topic, subscriber = id, "Unsubscribed");
    }

    /// Fan an event out to every subscriber of `topic`. Returns how many
    /// subscribers accepted it.
    pub fn publish(&self, topic: &Topic, event: BingoEvent) -> usize {
        let event = Arc::new(event);
        let (index, key) = self.inner.index(topic);
        let mut delivered = 0;
        let mut pruned = false;

        if let Some(mut subscribers) = index.get_mut(key) {
            subscribers.retain(|id, outbox| match outbox.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(topic = %topic, subscriber = id, event = event.name(), "Subscriber queue full, dropping event");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(topic = %topic, subscriber = id, "Pruning closed subscriber");
                    pruned = true;
                    false
                }
            });
        }

        if pruned {
            index.remove_if(key, |_, subscribers| subscribers.is_empty());
        }
        delivered
    }

    pub fn publish_game(&self, game_id: &str, event: BingoEvent) -> usize {
        self.publish(&Topic::Game(game_id.to_string()), event)
    }

    pub fn publish_user(&self, user_id: &str, event: BingoEvent) -> usize {
        self.publish(&Topic::User(user_id.to_string()), event)
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        let (index, key) = self.inner.index(topic);
        index.get(key).map(|s| s.len()).unwrap_or(0)
    }

    /// Events dropped because a subscriber queue was full
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Pump a topic into `connection` until the connection fails or the task
    /// is aborted. The subscription is released either way.
    pub fn attach<C: Connection>(&self, topic: Topic, mut connection: C) -> JoinHandle<()> {
        let mut subscription = self.subscribe(topic);

        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if let Err(e) = connection.send(&event).await {
                    debug!(topic = %subscription.topic(), error = %e, "Connection write failed");
                    break;
                }
            }
            connection.close().await;
        })
    }

    /// Periodic heartbeat to every subscriber of every topic
    pub fn start_heartbeat(&self) -> JoinHandle<()> {
        let hub = self.clone();
        let period = self.inner.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let timestamp = current_timestamp_ms();
                let topics: Vec<Topic> = hub
                    .inner
                    .by_game
                    .iter()
                    .map(|e| Topic::Game(e.key().clone()))
                    .chain(hub.inner.by_user.iter().map(|e| Topic::User(e.key().clone())))
                    .collect();
                for topic in topics {
                    hub.publish(&topic, BingoEvent::Heartbeat { timestamp });
                }
            }
        })
    }

    pub fn log_stats(&self) {
        info!(
            games = self.inner.by_game.len(),
            users = self.inner.by_user.len(),
            dropped = self.dropped_events(),
            "Broadcast hub stats"
        );
    }
}

/// A registered subscriber queue. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    topic: Topic,
    rx: mpsc::Receiver<Arc<BingoEvent>>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub async fn recv(&mut self) -> Option<Arc<BingoEvent>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<BingoEvent>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.topic, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::ConnectionClosed;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn hub(capacity: usize) -> BroadcastHub {
        BroadcastHub::new(&BroadcastConfig {
            connection_queue_capacity: capacity,
            heartbeat_interval_ms: 10,
        })
    }

    fn called(n: u8) -> BingoEvent {
        BingoEvent::NumberCalled {
            game_id: "g1".to_string(),
            number: n,
            called_count: n as usize,
        }
    }

    struct Recorder {
        seen: Arc<Mutex<Vec<BingoEvent>>>,
        fail_after: usize,
        closed: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Connection for Recorder {
        async fn send(&mut self, event: &BingoEvent) -> Result<(), ConnectionClosed> {
            let mut seen = self.seen.lock().unwrap();
            if seen.len() >= self.fail_after {
                return Err(ConnectionClosed("peer gone".to_string()));
            }
            seen.push(event.clone());
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_publish_in_order_to_game_subscribers() {
        let hub = hub(16);
        let mut a = hub.subscribe(Topic::Game("g1".to_string()));
        let mut b = hub.subscribe(Topic::Game("g1".to_string()));
        let mut other = hub.subscribe(Topic::Game("g2".to_string()));

        for n in 1..=3 {
            assert_eq!(hub.publish_game("g1", called(n)), 2);
        }

        for sub in [&mut a, &mut b] {
            for n in 1..=3 {
                assert_eq!(*sub.recv().await.unwrap(), called(n));
            }
        }
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_user_and_game_indexes_are_independent() {
        let hub = hub(4);
        let mut user = hub.subscribe(Topic::User("alice".to_string()));
        assert_eq!(hub.publish_game("alice", called(1)), 0);
        assert!(user.try_recv().is_none());

        let balance = BingoEvent::BalanceChanged {
            user_id: "alice".to_string(),
            balance: 10,
            delta: 10,
            reason: crate::games::types::TransactionType::Deposit,
        };
        assert_eq!(hub.publish_user("alice", balance.clone()), 1);
        assert_eq!(*user.recv().await.unwrap(), balance);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let hub = hub(2);
        let mut slow = hub.subscribe(Topic::Game("g1".to_string()));

        assert_eq!(hub.publish_game("g1", called(1)), 1);
        assert_eq!(hub.publish_game("g1", called(2)), 1);
        assert_eq!(hub.publish_game("g1", called(3)), 0);
        assert_eq!(hub.dropped_events(), 1);

        // Still subscribed after the drop
        assert_eq!(hub.subscriber_count(&Topic::Game("g1".to_string())), 1);
        assert_eq!(*slow.recv().await.unwrap(), called(1));
        assert_eq!(*slow.recv().await.unwrap(), called(2));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = hub(4);
        let topic = Topic::Game("g1".to_string());
        {
            let _a = hub.subscribe(topic.clone());
            let _b = hub.subscribe(topic.clone());
            assert_eq!(hub.subscriber_count(&topic), 2);
        }
        assert_eq!(hub.subscriber_count(&topic), 0);
        assert_eq!(hub.publish(&topic, called(1)), 0);
    }

    #[tokio::test]
    async fn test_attach_prunes_failed_connection() {
        let hub = hub(16);
        let topic = Topic::Game("g1".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicU64::new(0));

        let handle = hub.attach(
            topic.clone(),
            Recorder {
                seen: seen.clone(),
                fail_after: 2,
                closed: closed.clone(),
            },
        );
        assert_eq!(hub.subscriber_count(&topic), 1);

        for n in 1..=3 {
            hub.publish(&topic, called(n));
        }
        handle.await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscriber_count(&topic), 0);
    }

    #[tokio::test]
    async fn test_aborted_writer_releases_subscription() {
        let hub = hub(16);
        let topic = Topic::User("bob".to_string());
        let handle = hub.attach(
            topic.clone(),
            Recorder {
                seen: Arc::new(Mutex::new(Vec::new())),
                fail_after: usize::MAX,
                closed: Arc::new(AtomicU64::new(0)),
            },
        );

        handle.abort();
        let _ = handle.await;
        assert_eq!(hub.subscriber_count(&topic), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_subscribers() {
        let hub = hub(16);
        let mut sub = hub.subscribe(Topic::Game("g1".to_string()));
        let beat = hub.start_heartbeat();

        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(*event, BingoEvent::Heartbeat { .. }));
        beat.abort();
    }
}
