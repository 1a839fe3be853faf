//! Connection Supervisor
//!
//! Keeps an event stream open for the life of the process and hands every
//! event to the handler on its own task.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^              |             |
//!      |   connect    |   stream    |
//!      +--- failed ---+--- ended ---+
//! ```
//!
//! A failed connect waits `reconnect_delay` and tries again, forever. A
//! stream that ends after connecting is reopened straight away.
//!
//! Shutdown closes the open stream and returns. Dispatch tasks still in
//! flight are not awaited: all poll state is in memory and dies with the
//! process anyway.

use crate::channels::{ChannelEvent, EventHandler, EventSource, EventStream};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

/// Delay between failed connection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Sleep abstraction so reconnect timing can be observed in tests
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Wait after a failed connect
    pub reconnect_delay: Duration,
    /// Cap on concurrently running dispatch tasks; `None` is unbounded
    pub max_in_flight: Option<usize>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_in_flight: None,
        }
    }
}

/// How one connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Failed,
    Shutdown,
}

/// Owns the event stream and the reconnect loop
pub struct ConnectionSupervisor {
    source: Arc<dyn EventSource>,
    handler: Arc<dyn EventHandler>,
    sleeper: Arc<dyn Sleeper>,
    config: SupervisorConfig,
    limiter: Option<Arc<Semaphore>>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionSupervisor {
    /// Create a supervisor that sleeps on the tokio timer
    pub fn new(
        source: Arc<dyn EventSource>,
        handler: Arc<dyn EventHandler>,
        config: SupervisorConfig,
    ) -> Self {
        let limiter = config
            .max_in_flight
            .map(|permits| Arc::new(Semaphore::new(permits.max(1))));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            source,
            handler,
            sleeper: Arc::new(TokioSleeper),
            config,
            limiter,
            state,
        }
    }

    /// Replace the sleeper
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "connection state changed");
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                result = self.source.connect() => result,
                _ = shutdown.changed() => break,
            };

            let mut stream = match connected {
                Ok(stream) => stream,
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(
                        error = %e,
                        delay_secs = self.config.reconnect_delay.as_secs(),
                        "Event stream connection failed, retrying"
                    );
                    if !self.back_off(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(ConnectionState::Connected);
            info!("Event stream connected");

            let (end, delivered) = self.pump(stream.as_mut(), &mut shutdown).await;
            match end {
                SessionEnd::Shutdown => {
                    info!("Closing event stream");
                    stream.close().await;
                    break;
                }
                SessionEnd::Closed => info!(delivered, "Event stream closed, reconnecting"),
                SessionEnd::Failed => {}
            }
            self.set_state(ConnectionState::Disconnected);

            // a server that accepts and immediately drops us must not be
            // hammered with reconnects
            if delivered == 0 {
                warn!(
                    delay_secs = self.config.reconnect_delay.as_secs(),
                    "Event stream ended before delivering any event, backing off"
                );
                if !self.back_off(&mut shutdown).await {
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Connection supervisor stopped");
    }

    /// Wait out the reconnect delay. Returns false if shutdown came first.
    async fn back_off(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = self.sleeper.sleep(self.config.reconnect_delay) => true,
            _ = shutdown.changed() => false,
        }
    }

    /// Receive events until the stream ends or shutdown is requested.
    /// Also returns how many events the session delivered.
    async fn pump(
        &self,
        stream: &mut dyn EventStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (SessionEnd, usize) {
        let mut delivered = 0;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return (SessionEnd::Shutdown, delivered),
                next = stream.next_event() => match next {
                    Some(Ok(event)) => {
                        delivered += 1;
                        if !self.dispatch(event, shutdown).await {
                            return (SessionEnd::Shutdown, delivered);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Event stream failed, reconnecting");
                        return (SessionEnd::Failed, delivered);
                    }
                    None => return (SessionEnd::Closed, delivered),
                },
            }
        }
    }

    /// Hand one event to the handler on a new task without waiting for it.
    /// With a limit set, waits for a free slot first; returns false if
    /// shutdown is requested while waiting.
    async fn dispatch(&self, event: ChannelEvent, shutdown: &mut watch::Receiver<bool>) -> bool {
        let handler = Arc::clone(&self.handler);

        let permit = match &self.limiter {
            Some(limiter) => {
                let acquire = Arc::clone(limiter).acquire_owned();
                tokio::select! {
                    acquired = acquire => match acquired {
                        Ok(permit) => Some(permit),
                        Err(_) => return true,
                    },
                    _ = shutdown.changed() => {
                        debug!(event = %event.event, "Dropping event, shutdown while waiting for a dispatch slot");
                        return false;
                    }
                }
            }
            None => None,
        };

        tokio::spawn(async move {
            handler.handle_event(event).await;
            drop(permit);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelError, ChannelResult};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Notify};

    /// One scripted item a fake stream yields
    enum Step {
        Event(ChannelEvent),
        Fail,
    }

    /// What a fake source does on each connect call
    enum Attempt {
        Refuse,
        /// Yield the steps, then end the stream
        Serve(Vec<Step>),
        /// Yield the steps, then stay open until closed
        ServeAndHold(Vec<Step>),
    }

    struct ScriptedStream {
        steps: VecDeque<Step>,
        hold: bool,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        async fn next_event(&mut self) -> Option<ChannelResult<ChannelEvent>> {
            match self.steps.pop_front() {
                Some(Step::Event(event)) => Some(Ok(event)),
                Some(Step::Fail) => Some(Err(ChannelError::ConnectionFailed("reset".to_string()))),
                None if self.hold => std::future::pending().await,
                None => None,
            }
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedSource {
        attempts: Mutex<VecDeque<Attempt>>,
        connects: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(attempts: Vec<Attempt>) -> Self {
            Self {
                attempts: Mutex::new(attempts.into()),
                connects: AtomicUsize::new(0),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn connect(&self) -> ChannelResult<Box<dyn EventStream>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let attempt = self.attempts.lock().pop_front();
            let (steps, hold) = match attempt {
                Some(Attempt::Refuse) => {
                    return Err(ChannelError::ConnectionFailed("refused".to_string()))
                }
                Some(Attempt::Serve(steps)) => (steps, false),
                Some(Attempt::ServeAndHold(steps)) => (steps, true),
                // script exhausted: hang like a server that never answers
                None => std::future::pending().await,
            };
            Ok(Box::new(ScriptedStream {
                steps: steps.into(),
                hold,
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    /// Records requested sleeps and returns immediately
    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().push(duration);
        }
    }

    /// Forwards handled events to a channel
    struct ForwardingHandler {
        tx: mpsc::UnboundedSender<ChannelEvent>,
    }

    #[async_trait]
    impl EventHandler for ForwardingHandler {
        async fn handle_event(&self, event: ChannelEvent) {
            let _ = self.tx.send(event);
        }
    }

    /// Blocks every event until released, counting how many run at once
    struct GatedHandler {
        gate: Arc<Notify>,
        running: AtomicUsize,
        peak: AtomicUsize,
        done: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl EventHandler for GatedHandler {
        async fn handle_event(&self, _event: ChannelEvent) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.gate.notified().await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            let _ = self.done.send(());
        }
    }

    fn named(event: &str) -> ChannelEvent {
        ChannelEvent {
            event: event.to_string(),
            ..Default::default()
        }
    }

    fn forwarding() -> (Arc<ForwardingHandler>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ForwardingHandler { tx }), rx)
    }

    #[tokio::test]
    async fn test_retries_with_fixed_delay_until_connected() {
        let source = Arc::new(ScriptedSource::new(vec![
            Attempt::Refuse,
            Attempt::Refuse,
            Attempt::Refuse,
            Attempt::ServeAndHold(vec![Step::Event(named("posted"))]),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let (handler, mut events) = forwarding();

        let supervisor = Arc::new(
            ConnectionSupervisor::new(source.clone(), handler, SupervisorConfig::default())
                .with_sleeper(sleeper.clone()),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.run(shutdown_rx).await })
        };

        let event = events.recv().await.unwrap();
        assert_eq!(event.event, "posted");
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(source.connects.load(Ordering::SeqCst), 4);
        assert_eq!(*sleeper.sleeps.lock(), vec![Duration::from_secs(5); 3]);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(source.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnects_after_stream_ends_or_fails() {
        let source = Arc::new(ScriptedSource::new(vec![
            Attempt::Serve(vec![Step::Event(named("a"))]),
            Attempt::Serve(vec![Step::Event(named("b")), Step::Fail]),
            Attempt::ServeAndHold(vec![Step::Event(named("c"))]),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let (handler, mut events) = forwarding();

        let supervisor = ConnectionSupervisor::new(source.clone(), handler, SupervisorConfig::default())
            .with_sleeper(sleeper.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(events.recv().await.unwrap().event);
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(source.connects.load(Ordering::SeqCst), 3);
        // sessions that delivered events reconnect without waiting
        assert!(sleeper.sleeps.lock().is_empty());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_backs_off_when_stream_ends_without_events() {
        let source = Arc::new(ScriptedSource::new(vec![
            Attempt::Serve(vec![]),
            Attempt::Serve(vec![Step::Fail]),
            Attempt::ServeAndHold(vec![Step::Event(named("a"))]),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let (handler, mut events) = forwarding();

        let supervisor = ConnectionSupervisor::new(source.clone(), handler, SupervisorConfig::default())
            .with_sleeper(sleeper.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

        assert_eq!(events.recv().await.unwrap().event, "a");
        assert_eq!(source.connects.load(Ordering::SeqCst), 3);
        assert_eq!(*sleeper.sleeps.lock(), vec![Duration::from_secs(5); 2]);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_connecting() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let (handler, _events) = forwarding();
        let supervisor = ConnectionSupervisor::new(source.clone(), handler, SupervisorConfig::default());
        let mut states = supervisor.subscribe();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

        states
            .wait_for(|s| *s == ConnectionState::Connecting)
            .await
            .unwrap();
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(source.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_supervisor() {
        let source = Arc::new(ScriptedSource::new(vec![Attempt::ServeAndHold(vec![])]));
        let (handler, _events) = forwarding();
        let supervisor = ConnectionSupervisor::new(source.clone(), handler, SupervisorConfig::default());
        let mut states = supervisor.subscribe();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        drop(shutdown_tx);
        task.await.unwrap();
        assert_eq!(source.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_does_not_wait_for_handlers() {
        let steps = (0..4).map(|_| Step::Event(named("posted"))).collect();
        let source = Arc::new(ScriptedSource::new(vec![Attempt::ServeAndHold(steps)]));
        let gate = Arc::new(Notify::new());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(GatedHandler {
            gate: gate.clone(),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            done: done_tx,
        });

        let supervisor = ConnectionSupervisor::new(source, handler.clone(), SupervisorConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

        while handler.running.load(Ordering::SeqCst) < 4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(handler.peak.load(Ordering::SeqCst), 4);

        for _ in 0..4 {
            gate.notify_one();
            done_rx.recv().await.unwrap();
        }
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_max_in_flight_bounds_dispatch() {
        let steps = (0..3).map(|_| Step::Event(named("posted"))).collect();
        let source = Arc::new(ScriptedSource::new(vec![Attempt::ServeAndHold(steps)]));
        let gate = Arc::new(Notify::new());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(GatedHandler {
            gate: gate.clone(),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            done: done_tx,
        });

        let config = SupervisorConfig {
            max_in_flight: Some(1),
            ..Default::default()
        };
        let supervisor = ConnectionSupervisor::new(source, handler.clone(), config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

        for _ in 0..3 {
            while handler.running.load(Ordering::SeqCst) < 1 {
                tokio::task::yield_now().await;
            }
            gate.notify_one();
            done_rx.recv().await.unwrap();
        }
        assert_eq!(handler.peak.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_all_dispatch_slots_busy() {
        let steps = (0..2).map(|_| Step::Event(named("posted"))).collect();
        let source = Arc::new(ScriptedSource::new(vec![Attempt::ServeAndHold(steps)]));
        let (done_tx, _done_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(GatedHandler {
            gate: Arc::new(Notify::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            done: done_tx,
        });

        let config = SupervisorConfig {
            max_in_flight: Some(1),
            ..Default::default()
        };
        let supervisor = ConnectionSupervisor::new(source.clone(), handler.clone(), config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

        // the first handler holds the only slot and is never released
        while handler.running.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("supervisor did not stop while dispatch was saturated")
            .unwrap();
        assert_eq!(source.closed.load(Ordering::SeqCst), 1);
        assert_eq!(handler.running.load(Ordering::SeqCst), 1);
    }
}
