//! Caching loader: one request, one cached outcome, explicit lifecycle.
//!
//! # Design
//! A `Loader` is owned by one control thread, which calls every lifecycle
//! operation through `&mut self`. Executions run on a dedicated worker thread,
//! at most one at a time. A worker never touches loader state: it builds a
//! fresh `Outcome` and sends it over a channel. The control thread applies it
//! when it drains the channel (`process_completions` or
//! `wait_for_completion`), so the reset check in `deliver` and the reset
//! itself are always ordered on the same thread. Each execution carries the
//! reset generation it started in; a completion from an earlier generation is
//! released even if the loader was started again before it landed.
//!
//! Outcomes in transit are wrapped in a guard that runs the release hook if
//! the outcome is dropped unhandled (loader dropped, channel closed). Together
//! with the explicit release sites in `deliver`, `reset` and `cancel`, every
//! outcome is released exactly once unless it is the current cache.
//!
//! Lifecycle:
//!
//! ```text
//!          start()              stop()
//! Reset ───────────► Started ───────────► Stopped
//!   ▲                  │  ▲                  │
//!   │     reset()      │  └──── start() ─────┘
//!   └──────────────────┴─────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::http::HttpRequest;
use crate::model::Outcome;
use crate::parser::Parser;
use crate::transport::Transport;

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

type Consumer<T, X> = Box<dyn FnMut(Arc<Outcome<T, X>>) + Send>;
type ReleaseHook<T, X> = Arc<dyn Fn(&Outcome<T, X>) + Send + Sync>;

/// Observable state of a loader.
///
/// Whether an execution is in flight is orthogonal; see [`Loader::is_loading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Reset,
    Idle,
    IdleWithCache,
    StartedNoData,
    StartedWithData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Reset,
    Stopped,
    Started,
}

/// Run one request to completion and classify the result.
///
/// Blocks for the whole round-trip; call it from a worker thread.
pub fn execute<T, X>(
    transport: &dyn Transport,
    parser: &Parser<T, X>,
    request: &HttpRequest,
) -> Outcome<T, X> {
    match transport.execute(request) {
        Ok(response) => parser.classify(response.status, response.body),
        Err(error) => Outcome::transport_failure(error),
    }
}

/// Outcome on its way from a worker to the control thread.
struct PendingOutcome<T, X> {
    outcome: Option<Outcome<T, X>>,
    release: ReleaseHook<T, X>,
}

impl<T, X> PendingOutcome<T, X> {
    fn into_outcome(mut self) -> Option<Outcome<T, X>> {
        self.outcome.take()
    }
}

impl<T, X> Drop for PendingOutcome<T, X> {
    fn drop(&mut self) {
        if let Some(outcome) = self.outcome.take() {
            trace!("releasing outcome dropped in transit");
            (self.release)(&outcome);
        }
    }
}

struct Completion<T, X> {
    ticket: u64,
    generation: u64,
    /// `None` when the execution was canceled before reaching the transport.
    outcome: Option<PendingOutcome<T, X>>,
}

struct InFlight {
    ticket: u64,
    generation: u64,
    cancel: Arc<AtomicBool>,
}

impl InFlight {
    fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Loads one request into a cached `Outcome` and hands it to a consumer
/// according to its start / stop / reset lifecycle.
pub struct Loader<T, X = ()> {
    id: u64,
    transport: Arc<dyn Transport>,
    parser: Parser<T, X>,
    request: HttpRequest,
    lifecycle: Lifecycle,
    cached: Option<Arc<Outcome<T, X>>>,
    in_flight: Option<InFlight>,
    content_changed: bool,
    reload_pending: bool,
    next_ticket: u64,
    /// Bumped by every `reset`; completions from an older generation are
    /// released, never delivered.
    generation: u64,
    consumer: Option<Consumer<T, X>>,
    release: ReleaseHook<T, X>,
    completions_tx: Sender<Completion<T, X>>,
    completions_rx: Receiver<Completion<T, X>>,
}

impl<T, X> Loader<T, X>
where
    T: Send + 'static,
    X: Send + 'static,
{
    /// Create a loader in the `Reset` state. Nothing runs until `start`.
    pub fn new(transport: Arc<dyn Transport>, request: HttpRequest, parser: Parser<T, X>) -> Self {
        let (completions_tx, completions_rx) = crossbeam_channel::bounded(1);
        Self {
            id: NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            parser,
            request,
            lifecycle: Lifecycle::Reset,
            cached: None,
            in_flight: None,
            content_changed: false,
            reload_pending: false,
            next_ticket: 0,
            generation: 0,
            consumer: None,
            release: Arc::new(|_| {}),
            completions_tx,
            completions_rx,
        }
    }

    /// Register the consumer that receives delivered outcomes.
    pub fn on_load_finished(
        mut self,
        consumer: impl FnMut(Arc<Outcome<T, X>>) + Send + 'static,
    ) -> Self {
        self.consumer = Some(Box::new(consumer));
        self
    }

    /// Register the hook run when an outcome is superseded or discarded.
    pub fn on_release(mut self, hook: impl Fn(&Outcome<T, X>) + Send + Sync + 'static) -> Self {
        self.release = Arc::new(hook);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Edit the request for later executions; one already running keeps the
    /// snapshot it started with.
    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    pub fn state(&self) -> LoaderState {
        match (self.lifecycle, self.cached.is_some()) {
            (Lifecycle::Reset, _) => LoaderState::Reset,
            (Lifecycle::Stopped, false) => LoaderState::Idle,
            (Lifecycle::Stopped, true) => LoaderState::IdleWithCache,
            (Lifecycle::Started, false) => LoaderState::StartedNoData,
            (Lifecycle::Started, true) => LoaderState::StartedWithData,
        }
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle == Lifecycle::Started
    }

    pub fn is_reset(&self) -> bool {
        self.lifecycle == Lifecycle::Reset
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether the execution in flight was asked to stop.
    pub fn is_cancel_requested(&self) -> bool {
        self.in_flight.as_ref().is_some_and(InFlight::is_canceled)
    }

    pub fn cached(&self) -> Option<&Arc<Outcome<T, X>>> {
        self.cached.as_ref()
    }

    /// Attach to the consumer: deliver the cache now, and load if there is no
    /// cache or the content changed. Both can happen in one call, so the
    /// consumer may see the stale outcome followed by the fresh one.
    pub fn start(&mut self) {
        debug!(loader = self.id, from = ?self.lifecycle, "start");
        self.lifecycle = Lifecycle::Started;

        if let Some(cached) = self.cached.clone() {
            self.hand_to_consumer(cached);
        }

        let changed = std::mem::take(&mut self.content_changed);
        if changed || self.cached.is_none() {
            match &self.in_flight {
                Some(in_flight)
                    if !changed && !in_flight.is_canceled() && in_flight.generation == self.generation =>
                {
                    trace!(loader = self.id, ticket = in_flight.ticket, "execution already in flight");
                }
                _ => self.force_load(),
            }
        }
    }

    /// Issue an execution now, or once the one in flight has landed.
    pub fn force_load(&mut self) {
        if self.is_reset() {
            debug!(loader = self.id, "force_load ignored while reset");
            return;
        }
        if let Some(in_flight) = &self.in_flight {
            trace!(loader = self.id, ticket = in_flight.ticket, "reload queued behind execution in flight");
            self.reload_pending = true;
            return;
        }
        self.spawn_execution();
    }

    /// Signal that the remote content changed: reload now if started,
    /// otherwise on the next `start`.
    pub fn on_content_changed(&mut self) {
        if self.is_started() {
            self.force_load();
        } else {
            self.content_changed = true;
        }
    }

    /// Detach from the consumer and ask the execution in flight to cancel.
    ///
    /// Best effort: an execution already inside the transport runs to
    /// completion and its outcome still goes through `deliver`.
    pub fn stop(&mut self) {
        debug!(loader = self.id, from = ?self.lifecycle, "stop");
        if let Some(in_flight) = &self.in_flight {
            in_flight.cancel.store(true, Ordering::Release);
        }
        if self.lifecycle == Lifecycle::Started {
            self.lifecycle = Lifecycle::Stopped;
        }
    }

    /// Stop, release and clear the cache, and enter `Reset`. Outcomes that land
    /// afterwards are released without reaching the consumer.
    pub fn reset(&mut self) {
        self.stop();
        debug!(loader = self.id, "reset");
        self.lifecycle = Lifecycle::Reset;
        self.generation += 1;
        self.reload_pending = false;
        self.content_changed = false;
        if let Some(cached) = self.cached.take() {
            self.release(&cached);
        }
    }

    /// Install `outcome` as the cache and hand it to the consumer if started.
    ///
    /// In `Reset` the outcome is released immediately instead. The previous
    /// cache is released before the new one is installed.
    pub fn deliver(&mut self, outcome: Outcome<T, X>) {
        if self.is_reset() {
            debug!(loader = self.id, "discarding outcome delivered after reset");
            self.release(&outcome);
            return;
        }
        if let Some(previous) = self.cached.take() {
            self.release(&previous);
        }
        let outcome = Arc::new(outcome);
        self.cached = Some(Arc::clone(&outcome));
        if self.is_started() {
            self.hand_to_consumer(outcome);
        } else {
            trace!(loader = self.id, "outcome cached while stopped");
        }
    }

    /// Release an outcome the caller decided not to deliver.
    pub fn cancel(&self, outcome: Outcome<T, X>) {
        debug!(loader = self.id, "outcome canceled");
        self.release(&outcome);
    }

    /// Apply every completion that has arrived, without blocking.
    ///
    /// Returns how many completions were applied.
    pub fn process_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.apply_completion(completion);
            applied += 1;
        }
        applied
    }

    /// Block up to `timeout` for the execution in flight, then apply it.
    ///
    /// Returns `false` when nothing was in flight or the timeout elapsed.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> bool {
        if self.process_completions() > 0 {
            return true;
        }
        if self.in_flight.is_none() {
            return false;
        }
        match self.completions_rx.recv_timeout(timeout) {
            Ok(completion) => {
                self.apply_completion(completion);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn apply_completion(&mut self, completion: Completion<T, X>) {
        if self
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.ticket == completion.ticket)
        {
            self.in_flight = None;
        }

        let stale = completion.generation != self.generation;
        match completion.outcome.and_then(PendingOutcome::into_outcome) {
            Some(outcome) if stale => {
                debug!(
                    loader = self.id,
                    ticket = completion.ticket,
                    generation = completion.generation,
                    "discarding outcome started before reset"
                );
                self.release(&outcome);
            }
            Some(outcome) => {
                trace!(loader = self.id, ticket = completion.ticket, success = outcome.is_success(), "execution finished");
                self.deliver(outcome);
            }
            None => {
                trace!(loader = self.id, ticket = completion.ticket, "execution canceled before transport");
            }
        }

        if std::mem::take(&mut self.reload_pending) {
            if self.is_started() {
                self.spawn_execution();
            } else {
                self.content_changed = true;
            }
        }
    }

    fn spawn_execution(&mut self) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let generation = self.generation;
        let cancel = Arc::new(AtomicBool::new(false));

        let transport = Arc::clone(&self.transport);
        let parser = self.parser.clone();
        let request = self.request.clone();
        let release = Arc::clone(&self.release);
        let completions = self.completions_tx.clone();
        let worker_cancel = Arc::clone(&cancel);
        let id = self.id;

        debug!(loader = id, ticket, method = %request.method, url = %request.url, "spawning execution");
        let spawned = thread::Builder::new()
            .name(format!("loader-{id}"))
            .spawn(move || {
                if worker_cancel.load(Ordering::Acquire) {
                    let _ = completions.send(Completion {
                        ticket,
                        generation,
                        outcome: None,
                    });
                    return;
                }
                let outcome = execute(transport.as_ref(), &parser, &request);
                let pending = PendingOutcome {
                    outcome: Some(outcome),
                    release,
                };
                // A closed channel hands the completion back; dropping it releases the outcome.
                let _ = completions.send(Completion {
                    ticket,
                    generation,
                    outcome: Some(pending),
                });
            });

        match spawned {
            Ok(_) => {
                self.in_flight = Some(InFlight {
                    ticket,
                    generation,
                    cancel,
                })
            }
            Err(error) => {
                warn!(loader = id, error = %error, "failed to spawn worker thread");
                self.deliver(Outcome::transport_failure(TransportError::io(format!(
                    "failed to spawn worker thread: {error}"
                ))));
            }
        }
    }

    fn hand_to_consumer(&mut self, outcome: Arc<Outcome<T, X>>) {
        if let Some(consumer) = self.consumer.as_mut() {
            consumer(outcome);
        }
    }

    fn release(&self, outcome: &Outcome<T, X>) {
        trace!(loader = self.id, "releasing outcome");
        (self.release)(outcome);
    }
}

impl<T, X> Drop for Loader<T, X> {
    fn drop(&mut self) {
        if let Some(in_flight) = &self.in_flight {
            in_flight.cancel.store(true, Ordering::Release);
        }
        if let Some(cached) = self.cached.take() {
            (self.release)(&cached);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::{ErrorKind, LoadError};
    use crate::http::HttpResponse;

    const WAIT: Duration = Duration::from_secs(5);

    /// Answers every request with the next body from a list, counting calls.
    struct Scripted {
        bodies: Mutex<Vec<&'static str>>,
        calls: AtomicU64,
    }

    impl Scripted {
        fn new(bodies: &[&'static str]) -> Arc<Self> {
            let mut bodies = bodies.to_vec();
            bodies.reverse();
            Arc::new(Self {
                bodies: Mutex::new(bodies),
                calls: AtomicU64::new(0),
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for Scripted {
        fn execute(&self, _request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self.bodies.lock().unwrap().pop().unwrap_or("");
            Ok(HttpResponse::new(200, body))
        }
    }

    struct Refused;

    impl Transport for Refused {
        fn execute(&self, _request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::io("connection refused"))
        }
    }

    type Seen = Arc<Mutex<Vec<Option<u32>>>>;

    fn loader(transport: Arc<dyn Transport>) -> (Loader<u32>, Seen, Seen) {
        let delivered: Seen = Arc::default();
        let released: Seen = Arc::default();
        let d = Arc::clone(&delivered);
        let r = Arc::clone(&released);
        let loader = Loader::new(transport, HttpRequest::get("http://localhost/n"), Parser::object())
            .on_load_finished(move |outcome| d.lock().unwrap().push(outcome.data().copied()))
            .on_release(move |outcome| r.lock().unwrap().push(outcome.data().copied()));
        (loader, delivered, released)
    }

    #[test]
    fn new_loader_is_reset_and_idle() {
        let (loader, delivered, _) = loader(Scripted::new(&["1"]));
        assert_eq!(loader.state(), LoaderState::Reset);
        assert!(!loader.is_loading());
        assert!(delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn start_loads_and_delivers() {
        let transport = Scripted::new(&["1"]);
        let (mut loader, delivered, _) = loader(transport.clone());
        loader.start();
        assert_eq!(loader.state(), LoaderState::StartedNoData);
        assert!(loader.is_loading());
        assert!(loader.wait_for_completion(WAIT));
        assert_eq!(*delivered.lock().unwrap(), vec![Some(1)]);
        assert_eq!(loader.state(), LoaderState::StartedWithData);
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn second_start_does_not_issue_second_execution() {
        let transport = Scripted::new(&["1", "2"]);
        let (mut loader, delivered, _) = loader(transport.clone());
        loader.start();
        loader.start();
        assert!(loader.wait_for_completion(WAIT));
        assert!(!loader.wait_for_completion(Duration::from_millis(50)));
        assert_eq!(transport.calls(), 1);
        assert_eq!(*delivered.lock().unwrap(), vec![Some(1)]);
    }

    #[test]
    fn restart_with_cache_delivers_cache_without_reloading() {
        let transport = Scripted::new(&["1", "2"]);
        let (mut loader, delivered, _) = loader(transport.clone());
        loader.start();
        assert!(loader.wait_for_completion(WAIT));
        loader.stop();
        assert_eq!(loader.state(), LoaderState::IdleWithCache);
        loader.start();
        assert!(!loader.is_loading());
        assert_eq!(*delivered.lock().unwrap(), vec![Some(1), Some(1)]);
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn content_change_delivers_stale_then_fresh() {
        let transport = Scripted::new(&["1", "2"]);
        let (mut loader, delivered, released) = loader(transport.clone());
        loader.start();
        assert!(loader.wait_for_completion(WAIT));
        loader.stop();
        loader.on_content_changed();
        loader.start();
        assert!(loader.is_loading());
        assert!(loader.wait_for_completion(WAIT));
        assert_eq!(*delivered.lock().unwrap(), vec![Some(1), Some(1), Some(2)]);
        assert_eq!(*released.lock().unwrap(), vec![Some(1)]);
    }

    #[test]
    fn content_change_while_started_reloads_immediately() {
        let transport = Scripted::new(&["1", "2"]);
        let (mut loader, delivered, _) = loader(transport.clone());
        loader.start();
        assert!(loader.wait_for_completion(WAIT));
        loader.on_content_changed();
        assert!(loader.wait_for_completion(WAIT));
        assert_eq!(*delivered.lock().unwrap(), vec![Some(1), Some(2)]);
    }

    #[test]
    fn force_load_while_loading_queues_one_reload() {
        let transport = Scripted::new(&["1", "2", "3"]);
        let (mut loader, delivered, _) = loader(transport.clone());
        loader.start();
        loader.force_load();
        loader.force_load();
        assert!(loader.wait_for_completion(WAIT));
        assert!(loader.is_loading());
        assert!(loader.wait_for_completion(WAIT));
        assert!(!loader.is_loading());
        assert_eq!(transport.calls(), 2);
        assert_eq!(*delivered.lock().unwrap(), vec![Some(1), Some(2)]);
    }

    #[test]
    fn superseded_outcome_released_once() {
        let transport = Scripted::new(&["1", "2"]);
        let (mut loader, _, released) = loader(transport);
        loader.start();
        assert!(loader.wait_for_completion(WAIT));
        assert!(released.lock().unwrap().is_empty());
        loader.force_load();
        assert!(loader.wait_for_completion(WAIT));
        assert_eq!(*released.lock().unwrap(), vec![Some(1)]);
        assert_eq!(loader.cached().and_then(|o| o.data().copied()), Some(2));
    }

    #[test]
    fn deliver_while_stopped_only_caches() {
        let (mut loader, delivered, _) = loader(Scripted::new(&[]));
        loader.start();
        loader.stop();
        loader.deliver(Parser::object().classify(200, "7".to_string()));
        assert!(delivered.lock().unwrap().is_empty());
        assert_eq!(loader.state(), LoaderState::IdleWithCache);
    }

    #[test]
    fn deliver_in_reset_releases_incoming() {
        let (mut loader, delivered, released) = loader(Scripted::new(&[]));
        loader.deliver(Parser::object().classify(200, "9".to_string()));
        assert!(delivered.lock().unwrap().is_empty());
        assert_eq!(*released.lock().unwrap(), vec![Some(9)]);
        assert!(loader.cached().is_none());
    }

    #[test]
    fn reset_releases_cache() {
        let (mut loader, _, released) = loader(Scripted::new(&["4"]));
        loader.start();
        assert!(loader.wait_for_completion(WAIT));
        loader.reset();
        assert_eq!(loader.state(), LoaderState::Reset);
        assert_eq!(*released.lock().unwrap(), vec![Some(4)]);
    }

    #[test]
    fn cancel_always_releases() {
        let (mut loader, _, released) = loader(Scripted::new(&[]));
        loader.cancel(Parser::object().classify(200, "3".to_string()));
        loader.start();
        loader.cancel(Parser::object().classify(200, "5".to_string()));
        assert_eq!(*released.lock().unwrap(), vec![Some(3), Some(5)]);
    }

    #[test]
    fn transport_failure_outcome() {
        let outcomes: Arc<Mutex<Vec<Arc<Outcome<u32>>>>> = Arc::default();
        let sink = Arc::clone(&outcomes);
        let mut loader = Loader::new(Arc::new(Refused), HttpRequest::get("http://x"), Parser::object())
            .on_load_finished(move |outcome| sink.lock().unwrap().push(outcome));
        loader.start();
        assert!(loader.wait_for_completion(WAIT));
        let outcomes = outcomes.lock().unwrap();
        let outcome = &outcomes[0];
        assert!(!outcome.is_success());
        assert_eq!(outcome.error().map(LoadError::kind), Some(ErrorKind::TransportFailure));
        assert_eq!(outcome.http_status_code(), -1);
        assert!(outcome.response().is_none());
    }

    #[test]
    fn dropping_loader_releases_cache() {
        let (mut loader, _, released) = loader(Scripted::new(&["8"]));
        loader.start();
        assert!(loader.wait_for_completion(WAIT));
        drop(loader);
        assert_eq!(*released.lock().unwrap(), vec![Some(8)]);
    }

    #[test]
    fn wait_without_execution_returns_false() {
        let (mut loader, _, _) = loader(Scripted::new(&[]));
        assert!(!loader.wait_for_completion(Duration::from_millis(10)));
        assert_eq!(loader.process_completions(), 0);
    }
}
