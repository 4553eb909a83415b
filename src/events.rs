use futures_util::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Fan-out publisher with replay depth of 1: every new subscriber immediately receives the most
/// recently published item (if any), followed by everything published after it subscribed.
pub struct ReplayChannel<T> {
    inner: Mutex<ReplayInner<T>>,
}

struct ReplayInner<T> {
    last: Option<T>,
    subscribers: Vec<UnboundedSender<T>>,
}

impl<T: Clone> ReplayChannel<T> {
    pub fn new() -> Self {
        ReplayChannel {
            inner: Mutex::new(ReplayInner {
                last: None,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Publishes an item to all active subscribers and caches it for the future ones.
    /// Subscribers which have dropped their [EventStream] are pruned.
    pub fn publish(&self, item: T) {
        let mut inner = self.inner.lock();
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(item.clone()).is_ok());
        inner.last = Some(item);
    }

    pub fn subscribe(&self) -> EventStream<T> {
        let (tx, rx) = unbounded_channel();
        let mut inner = self.inner.lock();
        if let Some(last) = &inner.last {
            let _ = tx.send(last.clone());
        }
        inner.subscribers.push(tx);
        EventStream { receiver: rx }
    }

    /// Returns the most recently published item.
    pub fn last(&self) -> Option<T> {
        self.inner.lock().last.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.is_closed());
        inner.subscribers.len()
    }
}

impl<T: Clone> Default for ReplayChannel<T> {
    fn default() -> Self {
        ReplayChannel::new()
    }
}

/// Subscription to a [ReplayChannel]. Ends once the channel itself is dropped.
#[derive(Debug)]
pub struct EventStream<T> {
    receiver: UnboundedReceiver<T>,
}

impl<T> EventStream<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns an item if one is already waiting, without suspending.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod test {
    use crate::events::ReplayChannel;
    use futures_util::StreamExt;

    #[test]
    fn late_subscriber_gets_last_item_only() {
        let channel = ReplayChannel::new();
        for i in 1..=5 {
            channel.publish(i);
        }
        let mut events = channel.subscribe();
        assert_eq!(events.try_recv(), Some(5));
        assert_eq!(events.try_recv(), None);

        channel.publish(6);
        assert_eq!(events.try_recv(), Some(6));
    }

    #[test]
    fn nothing_replayed_before_first_publish() {
        let channel = ReplayChannel::<u32>::new();
        let mut events = channel.subscribe();
        assert_eq!(events.try_recv(), None);
        assert_eq!(channel.last(), None);
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let channel = ReplayChannel::new();
        let mut a = channel.subscribe();
        channel.publish("x");
        let mut b = channel.subscribe();
        channel.publish("y");

        assert_eq!(a.next().await, Some("x"));
        assert_eq!(a.next().await, Some("y"));
        assert_eq!(b.next().await, Some("x"));
        assert_eq!(b.next().await, Some("y"));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let channel = ReplayChannel::new();
        let a = channel.subscribe();
        let _b = channel.subscribe();
        assert_eq!(channel.subscriber_count(), 2);
        drop(a);
        channel.publish(1);
        assert_eq!(channel.subscriber_count(), 1);
    }
}
