//! The single ordered entry point for cluster mutations.
//!
//! Any number of [`EventQueue`] clones may push; exactly one [`EventReceiver`]
//! drains the channel, in enqueue order. The channel is bounded, so a slow
//! consumer suspends producers instead of growing memory.

use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tracing::debug;

use crate::{ApiError, ClusterEvent};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Result reported by the consumer for one waitable event.
pub type ApplyResult = Result<(), String>;

/// An event paired with the sending half of its completion signal.
#[derive(Debug)]
pub struct WaitableEvent {
    event: ClusterEvent,
    done: oneshot::Sender<ApplyResult>,
}

impl WaitableEvent {
    pub fn new(event: ClusterEvent) -> (Self, Completion) {
        let (done, rx) = oneshot::channel();
        (Self { event, done }, Completion { rx })
    }

    pub fn event(&self) -> &ClusterEvent {
        &self.event
    }

    /// Signals the waiting producer. Consumes the event, so it fires at most once.
    pub fn complete(self, result: ApplyResult) {
        if self.done.send(result).is_err() {
            debug!(
                event = self.event.kind(),
                "waiter went away before completion"
            );
        }
    }
}

/// Receiving half of a [`WaitableEvent`]'s completion signal.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<ApplyResult>,
}

impl Completion {
    /// Suspends until the consumer has applied the event.
    ///
    /// `None` waits without bound. With a deadline the caller stops waiting
    /// once it elapses, but the event stays queued and is still applied.
    pub async fn wait(self, deadline: Option<Duration>) -> Result<(), ApiError> {
        let outcome = match deadline {
            Some(limit) => timeout(limit, self.rx)
                .await
                .map_err(|_| ApiError::Timeout(limit))?,
            None => self.rx.await,
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(ApiError::Apply(message)),
            Err(_) => Err(ApiError::ConsumerGone),
        }
    }
}

#[derive(Debug)]
pub enum QueuedEvent {
    Waitable(WaitableEvent),
    Notify(ClusterEvent),
}

impl QueuedEvent {
    pub fn event(&self) -> &ClusterEvent {
        match self {
            QueuedEvent::Waitable(waitable) => waitable.event(),
            QueuedEvent::Notify(event) => event,
        }
    }
}

/// Producer handle. Cheap to clone.
#[derive(Clone, Debug)]
pub struct EventQueue {
    tx: mpsc::Sender<QueuedEvent>,
}

/// The one consumer handle.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<QueuedEvent>,
}

pub fn event_queue(capacity: usize) -> (EventQueue, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventQueue { tx }, EventReceiver { rx })
}

impl EventQueue {
    pub async fn push(&self, event: WaitableEvent) -> Result<(), ApiError> {
        self.send(QueuedEvent::Waitable(event)).await
    }

    /// Enqueues an event nobody waits on.
    pub async fn notify(&self, event: ClusterEvent) -> Result<(), ApiError> {
        self.send(QueuedEvent::Notify(event)).await
    }

    /// Pushes `event` as a waitable event and waits for the consumer's verdict.
    pub async fn submit(
        &self,
        event: ClusterEvent,
        deadline: Option<Duration>,
    ) -> Result<(), ApiError> {
        let (waitable, completion) = WaitableEvent::new(event);
        self.push(waitable).await?;
        completion.wait(deadline).await
    }

    async fn send(&self, queued: QueuedEvent) -> Result<(), ApiError> {
        let kind = queued.event().kind();
        self.tx
            .send(queued)
            .await
            .map_err(|_| ApiError::ConsumerGone)?;
        debug!(event = kind, "event enqueued");
        Ok(())
    }
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<QueuedEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use api::MonitorNode;

    use super::*;

    fn marker(producer: usize, seq: usize) -> ClusterEvent {
        ClusterEvent::NodeDiscovered {
            nodes: vec![MonitorNode::new(
                format!("producer-{producer}"),
                seq.to_string(),
                "",
            )],
        }
    }

    #[tokio::test]
    async fn waiter_receives_consumer_result() {
        let (queue, mut receiver) = event_queue(4);
        let consumer = tokio::spawn(async move {
            let Some(QueuedEvent::Waitable(first)) = receiver.recv().await else {
                panic!("expected waitable event");
            };
            first.complete(Ok(()));
            let Some(QueuedEvent::Waitable(second)) = receiver.recv().await else {
                panic!("expected waitable event");
            };
            second.complete(Err("node \"n1\" is busy".to_string()));
        });

        let globals = ClusterEvent::SetGlobals {
            extra_vars: "{}".to_string(),
        };
        queue
            .submit(globals.clone(), None)
            .await
            .expect("first event should apply");
        let err = queue
            .submit(globals, None)
            .await
            .expect_err("second event should fail");
        assert!(matches!(err, ApiError::Apply(ref message) if message == "node \"n1\" is busy"));
        consumer.await.expect("consumer should finish");
    }

    #[tokio::test]
    async fn deadline_bounds_the_wait() {
        let (queue, mut receiver) = event_queue(4);
        let err = queue
            .submit(
                ClusterEvent::SetGlobals {
                    extra_vars: "{}".to_string(),
                },
                Some(Duration::from_millis(20)),
            )
            .await
            .expect_err("nobody completes the event");
        assert!(matches!(err, ApiError::Timeout(_)));
        assert!(receiver.recv().await.is_some(), "event stays queued");
    }

    #[tokio::test]
    async fn dropped_completion_reports_consumer_gone() {
        let (queue, mut receiver) = event_queue(4);
        let consumer = tokio::spawn(async move {
            if let Some(queued) = receiver.recv().await {
                drop(queued);
            }
        });
        let err = queue
            .submit(
                ClusterEvent::SetGlobals {
                    extra_vars: "{}".to_string(),
                },
                None,
            )
            .await
            .expect_err("completion was dropped");
        assert!(matches!(err, ApiError::ConsumerGone));
        consumer.await.expect("consumer should finish");
    }

    #[tokio::test]
    async fn push_fails_once_consumer_is_gone() {
        let (queue, receiver) = event_queue(4);
        drop(receiver);
        let err = queue
            .notify(marker(0, 0))
            .await
            .expect_err("receiver was dropped");
        assert!(matches!(err, ApiError::ConsumerGone));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_keep_their_own_order() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 50;

        let (queue, mut receiver) = event_queue(3);
        let mut producers = Vec::new();
        for producer in 0..PRODUCERS {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for seq in 0..PER_PRODUCER {
                    queue
                        .notify(marker(producer, seq))
                        .await
                        .expect("queue should accept event");
                }
            }));
        }
        drop(queue);

        let mut last_seen: HashMap<String, usize> = HashMap::new();
        let mut total = 0;
        while let Some(queued) = receiver.recv().await {
            let QueuedEvent::Notify(ClusterEvent::NodeDiscovered { nodes }) = queued else {
                panic!("unexpected event");
            };
            let node = &nodes[0];
            let seq: usize = node.serial.parse().expect("serial is a sequence number");
            if let Some(previous) = last_seen.insert(node.label.clone(), seq) {
                assert!(seq > previous, "{} went from {previous} to {seq}", node.label);
            } else {
                assert_eq!(seq, 0);
            }
            total += 1;
        }

        for producer in producers {
            producer.await.expect("producer should finish");
        }
        assert_eq!(total, PRODUCERS * PER_PRODUCER);
    }
}
