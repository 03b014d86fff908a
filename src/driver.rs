//! Tokio event loop hosting a [`SarEngine`] on a single task.
//!
//! The engine itself is synchronous and unsynchronised. [`run`] owns it on
//! one task and feeds it, in arrival order, commands from an `mpsc` channel
//! and expired stall timers from a [`DelayQueueTimer`]. [`spawn`] wraps that
//! loop in an [`EngineHandle`] for callers living on other tasks.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use futures::StreamExt;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::{
    sync::CancellationToken,
    time::{DelayQueue, delay_queue},
};
use tracing::{Instrument, debug, info_span, warn};

use crate::fragment::{
    DeliveryReport,
    FragmentationError,
    IdleTimeout,
    InboundFragment,
    MessageHandler,
    MessageId,
    SarEngine,
    Timer,
    TimerHandle,
    Transport,
};

/// [`Timer`] backed by a tokio-util [`DelayQueue`].
#[derive(Debug, Default)]
pub struct DelayQueueTimer {
    queue: DelayQueue<(TimerHandle, IdleTimeout)>,
    keys: HashMap<TimerHandle, delay_queue::Key>,
    next_handle: u64,
}

impl DelayQueueTimer {
    /// Create an empty timer queue.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of timers still pending.
    #[must_use]
    pub fn pending_len(&self) -> usize { self.keys.len() }

    /// Wait for the next timer to expire.
    ///
    /// Resolves to `None` immediately when no timer is pending.
    pub async fn next_expired(&mut self) -> Option<IdleTimeout> {
        let expired = self.queue.next().await?;
        let (handle, token) = expired.into_inner();
        self.keys.remove(&handle);
        Some(token)
    }
}

impl Timer for DelayQueueTimer {
    fn schedule(&mut self, delay: Duration, token: IdleTimeout) -> TimerHandle {
        self.next_handle = self.next_handle.wrapping_add(1);
        let handle = TimerHandle::new(self.next_handle);
        let key = self.queue.insert((handle, token), delay);
        self.keys.insert(handle, key);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(key) = self.keys.remove(&handle) {
            self.queue.try_remove(&key);
        }
    }
}

/// Reply channel for a [`EngineEvent::Send`] command.
pub type SendReply = oneshot::Sender<Result<MessageId, FragmentationError>>;

/// Command delivered to the engine task.
#[derive(Debug)]
pub enum EngineEvent<A, E> {
    /// Start a fragmented send.
    Send {
        /// Destination address.
        destination: A,
        /// Envelope reused for every fragment.
        envelope: E,
        /// Message bytes.
        payload: Bytes,
        /// Where to report the outcome of starting the send.
        reply: Option<SendReply>,
    },
    /// A transport delivery report for an outbound fragment.
    Delivered(DeliveryReport),
    /// An inbound fragment.
    Received(InboundFragment<A, E>),
    /// Explicitly free a reassembly.
    Release {
        /// Sender of the message.
        source: A,
        /// Message to free.
        message_id: MessageId,
    },
}

/// Errors raised by [`EngineHandle`].
#[derive(Debug, Error)]
pub enum DriverError {
    /// The engine task has stopped.
    #[error("engine task is no longer running")]
    Closed,
    /// The engine task panicked or was cancelled.
    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

enum Step<A, E> {
    Shutdown,
    Timeout(IdleTimeout),
    Event(Option<EngineEvent<A, E>>),
}

/// Drive `engine` until `shutdown` fires or every event sender is dropped,
/// then return it.
///
/// Commands already queued when `shutdown` fires are applied before the loop
/// exits; later sends on the channel fail.
pub async fn run<T, H>(
    mut engine: SarEngine<T, DelayQueueTimer, H>,
    mut events: mpsc::Receiver<EngineEvent<T::Address, T::Envelope>>,
    shutdown: CancellationToken,
) -> SarEngine<T, DelayQueueTimer, H>
where
    T: Transport,
    H: MessageHandler<T::Address>,
{
    loop {
        let step = tokio::select! {
            biased;
            () = shutdown.cancelled() => Step::Shutdown,
            Some(token) = engine.timer_mut().next_expired() => Step::Timeout(token),
            event = events.recv() => Step::Event(event),
        };

        match step {
            Step::Shutdown => {
                events.close();
                while let Ok(event) = events.try_recv() {
                    dispatch(&mut engine, event);
                }
                debug!("engine shutdown requested");
                break;
            }
            Step::Timeout(token) => {
                if engine.on_idle_timeout(token) {
                    debug!(?token, "stalled reassembly freed");
                }
            }
            Step::Event(Some(event)) => dispatch(&mut engine, event),
            Step::Event(None) => {
                debug!("engine event channel closed");
                break;
            }
        }
    }
    engine
}

fn dispatch<T, H>(
    engine: &mut SarEngine<T, DelayQueueTimer, H>,
    event: EngineEvent<T::Address, T::Envelope>,
) where
    T: Transport,
    H: MessageHandler<T::Address>,
{
    match event {
        EngineEvent::Send {
            destination,
            envelope,
            payload,
            reply,
        } => {
            let result = engine.begin_send(destination, envelope, &payload);
            if let Err(err) = &result {
                debug!(error = %err, "fragmented send not started");
            }
            if let Some(reply) = reply {
                if reply.send(result).is_err() {
                    debug!("send requester dropped before reply");
                }
            }
        }
        EngineEvent::Delivered(report) => engine.on_fragment_delivered(report),
        EngineEvent::Received(fragment) => {
            if let Err(err) = engine.on_fragment_received(fragment) {
                warn!(error = %err, "inbound fragment rejected");
            }
        }
        EngineEvent::Release { source, message_id } => {
            engine.release(&source, message_id);
        }
    }
}

/// Handle to an engine running on its own task.
#[derive(Debug)]
pub struct EngineHandle<T: Transport, H> {
    events: mpsc::Sender<EngineEvent<T::Address, T::Envelope>>,
    shutdown: CancellationToken,
    task: JoinHandle<SarEngine<T, DelayQueueTimer, H>>,
}

/// Spawn `engine` onto the current tokio runtime with an event queue of
/// `capacity` commands.
pub fn spawn<T, H>(engine: SarEngine<T, DelayQueueTimer, H>, capacity: usize) -> EngineHandle<T, H>
where
    T: Transport + Send + 'static,
    T::Address: Send,
    T::Envelope: Send,
    H: MessageHandler<T::Address> + Send + 'static,
{
    let (events, receiver) = mpsc::channel(capacity.max(1));
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(
        run(engine, receiver, shutdown.clone()).instrument(info_span!("sar_engine")),
    );
    EngineHandle {
        events,
        shutdown,
        task,
    }
}

impl<T, H> EngineHandle<T, H>
where
    T: Transport,
{
    /// Start a fragmented send and wait for it to be accepted or rejected.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] if the engine task has stopped. The
    /// inner result carries the engine's own verdict.
    pub async fn send(
        &self,
        destination: T::Address,
        envelope: T::Envelope,
        payload: Bytes,
    ) -> Result<Result<MessageId, FragmentationError>, DriverError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(EngineEvent::Send {
                destination,
                envelope,
                payload,
                reply: Some(reply),
            })
            .await
            .map_err(|_| DriverError::Closed)?;
        response.await.map_err(|_| DriverError::Closed)
    }

    /// Forward a transport delivery report.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] if the engine task has stopped.
    pub async fn deliver(&self, report: DeliveryReport) -> Result<(), DriverError> {
        self.post(EngineEvent::Delivered(report)).await
    }

    /// Forward an inbound fragment.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] if the engine task has stopped.
    pub async fn receive(
        &self,
        fragment: InboundFragment<T::Address, T::Envelope>,
    ) -> Result<(), DriverError> {
        self.post(EngineEvent::Received(fragment)).await
    }

    /// Post any command to the engine task.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] if the engine task has stopped.
    pub async fn post(&self, event: EngineEvent<T::Address, T::Envelope>) -> Result<(), DriverError> {
        self.events.send(event).await.map_err(|_| DriverError::Closed)
    }

    /// Stop the engine task once queued commands are applied, and return the
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Join`] if the task panicked.
    pub async fn shutdown(self) -> Result<SarEngine<T, DelayQueueTimer, H>, DriverError> {
        self.shutdown.cancel();
        Ok(self.task.await?)
    }
}
