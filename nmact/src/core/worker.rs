//! The client's event loop.
//!
//! One task owns the [`ObjectCache`] and the [`Correlator`]. It multiplexes
//! client requests, transport events, call replies and cancellation tokens,
//! handling each to completion before looking at the next. Nothing else
//! touches the cache, so it needs no locking.

use futures::future::BoxFuture;
use futures::stream::{BoxStream, FuturesUnordered};
use futures::{FutureExt, StreamExt, select};
use futures_timer::Delay;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::api::models::{Error, ObjectPath, Result};
use crate::core::call::{CallTag, Completion, Correlator, Followup, Serial};
use crate::core::object_cache::{
    Lookup, ObjectCache, RemoteObject, WaitId, WaitPayload, WaitReply,
};
use crate::core::transport::{Arg, MethodCall, Transport, TransportEvent};
use crate::types::object_registry::resolve_kind;

pub(crate) type ObjectFilter = Box<dyn Fn(&RemoteObject) -> bool + Send>;

/// Requests from [`Client`](crate::Client) handles.
pub(crate) enum Request {
    Call {
        call: MethodCall,
        completion: Completion,
        cancel: Option<CancellationToken>,
    },
    WaitFor {
        path: ObjectPath,
        reply: WaitReply,
        cancel: Option<CancellationToken>,
    },
    Lookup {
        path: ObjectPath,
        reply: oneshot::Sender<Lookup>,
    },
    Visible {
        filter: ObjectFilter,
        reply: oneshot::Sender<Vec<RemoteObject>>,
    },
}

/// What a cancellation token currently guards.
#[derive(Debug, Clone, Copy)]
enum CancelTarget {
    Call(Serial),
    Wait(WaitId),
}

struct Guard {
    target: CancelTarget,
    // Dropping this ends the watcher.
    _done: oneshot::Sender<()>,
}

type CallDone = (Serial, CallTag, Result<Vec<Arg>>);
type Watcher = BoxFuture<'static, Option<u64>>;

enum Step {
    Request(Option<Request>),
    Event(Option<TransportEvent>),
    Reply(CallDone),
    Cancel(Option<u64>),
}

pub(crate) struct Worker {
    transport: Arc<dyn Transport>,
    cache: ObjectCache,
    correlator: Correlator,
    requests: mpsc::Receiver<Request>,
    call_timeout: Duration,
    calls: FuturesUnordered<BoxFuture<'static, CallDone>>,
    watchers: FuturesUnordered<Watcher>,
    guards: HashMap<u64, Guard>,
    // Guard key per guarded wait, released once the wait settles.
    wait_guards: HashMap<WaitId, u64>,
    next_guard: u64,
}

impl Worker {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        cache: ObjectCache,
        requests: mpsc::Receiver<Request>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            cache,
            correlator: Correlator::new(),
            requests,
            call_timeout,
            calls: FuturesUnordered::new(),
            watchers: FuturesUnordered::new(),
            guards: HashMap::new(),
            wait_guards: HashMap::new(),
            next_guard: 0,
        }
    }

    /// Runs until every client handle is dropped.
    pub(crate) async fn run(mut self, mut events: BoxStream<'static, TransportEvent>) {
        loop {
            let step = select! {
                req = self.requests.recv().fuse() => Step::Request(req),
                ev = events.next().fuse() => Step::Event(ev),
                done = self.calls.select_next_some() => Step::Reply(done),
                fired = self.watchers.select_next_some() => Step::Cancel(fired),
            };

            match step {
                Step::Request(Some(req)) => self.handle_request(req),
                Step::Request(None) => break,
                Step::Event(Some(ev)) => self.handle_event(ev),
                Step::Event(None) => {
                    warn!("Transport event stream ended");
                    self.cache.reset();
                    events = futures::stream::pending().boxed();
                }
                Step::Reply(done) => self.handle_reply(done),
                Step::Cancel(Some(key)) => self.handle_cancel(key),
                Step::Cancel(None) => {}
            }
            self.release_settled();
        }

        debug!(
            "Client worker exiting with {} calls and {} waits outstanding",
            self.correlator.in_flight(),
            self.cache.pending_count()
        );
    }

    fn handle_request(&mut self, req: Request) {
        match req {
            Request::Call {
                call,
                completion,
                cancel,
            } => {
                let tag = CallTag {
                    target: call.target.clone(),
                    method: call.method,
                };
                let serial = self.correlator.begin(tag.clone(), completion);
                if let Some(token) = cancel {
                    self.guard(serial, CancelTarget::Call(serial), token);
                }

                let transport = Arc::clone(&self.transport);
                let timeout = self.call_timeout;
                self.calls.push(
                    async move {
                        let result = {
                            let mut reply = transport.call(call).fuse();
                            let mut delay = Delay::new(timeout).fuse();
                            select! {
                                r = reply => r,
                                _ = delay => Err(Error::Timeout),
                            }
                        };
                        (serial, tag, result)
                    }
                    .boxed(),
                );
            }
            Request::WaitFor {
                path,
                reply,
                cancel,
            } => {
                let id = self.cache.wait_for(&path, WaitPayload::default(), reply);
                if let Some(token) = cancel {
                    let key = self.next_key();
                    self.guard(key, CancelTarget::Wait(id), token);
                    self.wait_guards.insert(id, key);
                }
            }
            Request::Lookup { path, reply } => {
                let _ = reply.send(self.cache.lookup(&path));
            }
            Request::Visible { filter, reply } => {
                let _ = reply.send(self.cache.visible_where(filter));
            }
        }
    }

    fn next_key(&mut self) -> u64 {
        // Call guards use the serial; wait-only guards count down from the top.
        self.next_guard += 1;
        u64::MAX - self.next_guard
    }

    fn guard(
        &mut self,
        key: u64,
        target: CancelTarget,
        token: CancellationToken,
    ) {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        self.guards.insert(
            key,
            Guard {
                target,
                _done: done_tx,
            },
        );
        self.watchers.push(
            async move {
                let mut cancelled = token.cancelled_owned().boxed().fuse();
                let mut done = done_rx.fuse();
                select! {
                    _ = cancelled => Some(key),
                    _ = done => None,
                }
            }
            .boxed(),
        );
    }

    fn handle_cancel(&mut self, key: u64) {
        let Some(guard) = self.guards.remove(&key) else {
            return;
        };
        match guard.target {
            CancelTarget::Call(serial) => {
                self.correlator.cancel(serial);
            }
            CancelTarget::Wait(id) => {
                self.cache.cancel_wait(id);
            }
        }
    }

    fn handle_reply(&mut self, (serial, tag, result): CallDone) {
        match self.correlator.complete(serial, &tag, result) {
            Followup::Done => {
                // Call guards are keyed by serial.
                self.guards.remove(&serial);
            }
            Followup::AwaitObject {
                path,
                payload,
                reply,
            } => {
                debug!("Call #{serial} returned {path}; waiting for it to materialize");
                let id = self.cache.wait_for(&path, payload, reply);
                if let Some(guard) = self.guards.get_mut(&serial) {
                    guard.target = CancelTarget::Wait(id);
                    self.wait_guards.insert(id, serial);
                }
            }
        }
    }

    /// Drops the guards of waits the cache has finished with, which also
    /// ends their watchers.
    fn release_settled(&mut self) {
        for id in self.cache.take_settled() {
            if let Some(key) = self.wait_guards.remove(&id) {
                self.guards.remove(&key);
            }
        }
    }

    fn handle_event(&mut self, ev: TransportEvent) {
        match ev {
            TransportEvent::ObjectAdded { path, interfaces } => match resolve_kind(&interfaces) {
                Some(kind) => {
                    self.cache.resolve_or_create(&path, kind);
                }
                None => debug!("Ignoring {path}: no known interfaces"),
            },
            TransportEvent::ObjectInitialized {
                path,
                properties,
                settings,
            } => self.cache.finish_init(&path, properties, settings),
            TransportEvent::ObjectInitFailed { path, message } => {
                self.cache.on_init_failed(&path, &message)
            }
            TransportEvent::ObjectRemoved { path } => self.cache.on_object_removed(&path),
            TransportEvent::PropertiesChanged { path, changed } => {
                for (name, value) in changed {
                    self.cache.property_changed(&path, &name, value);
                }
            }
            TransportEvent::SettingsUpdated { path, settings } => {
                self.cache.update_settings(&path, settings)
            }
            TransportEvent::ServiceOwner { present: true } => {
                info!("NetworkManager appeared on the bus");
            }
            TransportEvent::ServiceOwner { present: false } => {
                warn!("NetworkManager left the bus");
                self.cache.reset();
            }
        }
    }
}
