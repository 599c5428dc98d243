// ABOUTME: Fan-out point delivering live deployment events to subscribers.
// ABOUTME: One broadcaster is open per active deployment; emitting while closed is a no-op.

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::DeploymentEvent;

type Subscribers = Vec<mpsc::UnboundedSender<DeploymentEvent>>;

/// The current subscription point for deployment events.
///
/// Subscribers receive every event emitted after they subscribed; nothing is
/// replayed. Each subscriber has its own unbounded queue, so a slow reader
/// never loses events.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<Option<Subscribers>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh stream, replacing (and completing) any previous one.
    ///
    /// Returns a subscription attached before anything can be emitted.
    pub fn open(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let previous = self.subscribers.lock().replace(vec![sender]);
        drop(previous);
        Subscription { receiver }
    }

    pub fn is_open(&self) -> bool {
        self.subscribers.lock().is_some()
    }

    /// Attach a subscriber. Returns `None` when no deployment is streaming.
    pub fn subscribe(&self) -> Option<Subscription> {
        let mut subscribers = self.subscribers.lock();
        let subscribers = subscribers.as_mut()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        subscribers.push(sender);
        Some(Subscription { receiver })
    }

    /// Push an event to all current subscribers, dropping those that went away.
    pub fn emit(&self, event: DeploymentEvent) {
        if let Some(subscribers) = self.subscribers.lock().as_mut() {
            subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        }
    }

    /// Signal end-of-stream and detach all subscribers.
    pub fn complete(&self) {
        self.subscribers.lock().take();
    }
}

/// A live view of one deployment's events.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<DeploymentEvent>,
}

impl Subscription {
    /// Next event, or `None` once the stream has completed and been drained.
    pub async fn recv(&mut self) -> Option<DeploymentEvent> {
        self.receiver.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = DeploymentEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}
