//! MQTT 3.1.1 client connection state machine.
//!
//! A [`Client`] walks one connection through
//! `Idle → SocketConnecting → Handshaking → Connected → Disconnected`.
//! All state lives in a session behind a `parking_lot::Mutex`; background
//! tasks (connect, handshake, read loop, keep-alive timers, publish/ping
//! writes) only hold a `Weak` reference to it, so dropping the client
//! cancels everything that is still pending.
//!
//! Writes are serialized by a write lock. Whoever holds the lock owns the
//! frame writer; releasing it hands the writer to the next queued operation
//! in FIFO order.
//!
//! Connection events are queued while the session is locked and delivered
//! in order once it is released, so callbacks may call back into the client.

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::codec;
use crate::config::ClientConfig;
use crate::connect::ConnectMessage;
use crate::error::{Error, Result};
use crate::handshake::handshake;
use crate::stream::{FrameReader, FrameWriter, FramedStream};
use crate::transport::Connector;
use crate::types::{ConnectionEvent, ConnectionState, FixedHeader, packet_type};

/// Observer for connection lifecycle events. The error is set for
/// [`ConnectionEvent::SocketDisconnected`] and carries the cause.
pub type ConnectionEventCallback = Arc<dyn Fn(Option<&Error>, ConnectionEvent) + Send + Sync>;

/// Receives every inbound frame after the handshake.
pub type MessageCallback = Arc<dyn Fn(FixedHeader, &[u8]) + Send + Sync>;

/// Adjusts the CONNECT message right before it is encoded.
pub type ConnectDecorator = Box<dyn FnMut(&mut ConnectMessage) + Send>;

type Writer<C> = FrameWriter<WriteHalf<<C as Connector>::Stream>>;
type Reader<C> = FrameReader<ReadHalf<<C as Connector>::Stream>>;
type Shared<C> = Mutex<Session<C>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Publish,
    Ping,
}

/// An operation queued behind the write lock. Sending the writer through
/// the grant transfers the lock; dropping the grant fails the operation
/// with the session's close cause.
enum WriteWaiter<C: Connector> {
    Publish(oneshot::Sender<Writer<C>>),
    Ping(oneshot::Sender<Writer<C>>),
}

impl<C: Connector> WriteWaiter<C> {
    fn new(kind: WriteKind, grant: oneshot::Sender<Writer<C>>) -> Self {
        match kind {
            WriteKind::Publish => WriteWaiter::Publish(grant),
            WriteKind::Ping => WriteWaiter::Ping(grant),
        }
    }

    fn is_ping(&self) -> bool {
        matches!(self, WriteWaiter::Ping(_))
    }

    fn into_grant(self) -> oneshot::Sender<Writer<C>> {
        match self {
            WriteWaiter::Publish(grant) | WriteWaiter::Ping(grant) => grant,
        }
    }
}

enum Acquire<C: Connector> {
    Granted(Writer<C>),
    Queued(oneshot::Receiver<Writer<C>>),
    /// A ping is already waiting for the lock.
    Skipped,
}

struct Acquired<C: Connector> {
    lock: Acquire<C>,
    closed: watch::Receiver<Option<Error>>,
}

#[derive(Debug, Clone, Copy)]
enum TimerKind {
    Ping,
    Timeout,
}

/// A cancellable one-shot wait. Each arm bumps the generation so a wake-up
/// that raced with a cancel is ignored.
#[derive(Default)]
struct Timer {
    generation: u64,
    handle: Option<AbortHandle>,
}

impl Timer {
    fn cancel(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    fn fire(&mut self, generation: u64) -> bool {
        if self.generation != generation || self.handle.is_none() {
            return false;
        }
        self.handle = None;
        true
    }
}

struct Session<C: Connector> {
    this: Weak<Shared<C>>,
    state: ConnectionState,
    config: ClientConfig,
    connector: Option<C>,
    keep_alive: Duration,

    writer: Option<Writer<C>>,
    write_locked: bool,
    waiters: VecDeque<WriteWaiter<C>>,

    run_completion: Option<oneshot::Sender<Error>>,
    closed: watch::Sender<Option<Error>>,

    ping_timer: Timer,
    timeout_timer: Timer,
    tasks: Vec<AbortHandle>,

    on_event: Option<ConnectionEventCallback>,
    on_message: Option<MessageCallback>,
    decorator: Option<ConnectDecorator>,

    pending_events: VecDeque<(Option<Error>, ConnectionEvent)>,
    dispatching: bool,
}

impl<C: Connector> Session<C> {
    fn new(this: Weak<Shared<C>>, connector: C, config: ClientConfig) -> Self {
        let (closed, _) = watch::channel(None);
        Self {
            this,
            state: ConnectionState::Idle,
            keep_alive: config.keep_alive_duration(),
            config,
            connector: Some(connector),
            writer: None,
            write_locked: false,
            waiters: VecDeque::new(),
            run_completion: None,
            closed,
            ping_timer: Timer::default(),
            timeout_timer: Timer::default(),
            tasks: Vec::new(),
            on_event: None,
            on_message: None,
            decorator: None,
            pending_events: VecDeque::new(),
            dispatching: false,
        }
    }

    fn notify(&mut self, cause: Option<Error>, event: ConnectionEvent) {
        self.pending_events.push_back((cause, event));
    }

    fn spawn(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks.push(tokio::spawn(task).abort_handle());
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn start_connecting(&mut self) {
        if self.state != ConnectionState::Idle {
            return;
        }
        let Some(connector) = self.connector.take() else {
            return;
        };

        debug!("Initiating socket connection as {}", self.config.client_id);
        self.state = ConnectionState::SocketConnecting;

        let weak = self.this.clone();
        self.spawn(async move {
            let result = connector.connect().await;
            with_session(&weak, |s| s.on_socket_connected(result));
        });
        self.notify(None, ConnectionEvent::InitiatingSocketConnection);
    }

    fn on_socket_connected(&mut self, result: io::Result<C::Stream>) {
        if self.state != ConnectionState::SocketConnecting {
            return;
        }

        let stream = result.map_err(Error::from).and_then(|transport| {
            FramedStream::with_buffer_sizes(transport, self.config.read_buffer_size, self.config.write_buffer_size)
        });
        let mut stream = match stream {
            Ok(stream) => stream.with_max_frame_size(self.config.max_packet_size),
            Err(e) => {
                warn!("Socket connection failed: {}", e);
                self.disconnect(e);
                return;
            }
        };

        let mut message = self.config.connect_message();
        message.keep_alive = self.keep_alive;
        if let Some(decorate) = self.decorator.as_mut() {
            decorate(&mut message);
        }
        self.keep_alive = message.keep_alive;

        debug!("Socket connected, starting handshake");
        self.state = ConnectionState::Handshaking;

        let weak = self.this.clone();
        self.spawn(async move {
            let result = handshake(&mut stream, &message).await.map(|_| stream);
            with_session(&weak, |s| s.on_handshake(result));
        });
        self.arm_timer(TimerKind::Timeout);
        self.notify(None, ConnectionEvent::SocketConnected);
    }

    fn on_handshake(&mut self, result: Result<FramedStream<C::Stream>>) {
        if self.state != ConnectionState::Handshaking {
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Handshake failed: {}", e);
                self.disconnect(e);
                return;
            }
        };

        debug!("Connected successfully, keep_alive={}s", self.keep_alive.as_secs());
        self.state = ConnectionState::Connected;

        let (reader, writer) = stream.into_split();
        let weak = self.this.clone();
        self.spawn(read_loop(weak, reader));
        self.arm_timer(TimerKind::Timeout);
        self.arm_timer(TimerKind::Ping);
        self.notify(None, ConnectionEvent::HandshakeSuccessful);

        self.release_write_lock(writer);
    }

    fn on_frame(&mut self) -> Option<Option<MessageCallback>> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        self.arm_timer(TimerKind::Timeout);
        self.arm_timer(TimerKind::Ping);
        Some(self.on_message.clone())
    }

    fn disconnect(&mut self, cause: Error) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        debug!("Disconnected: {}", cause);
        self.teardown(cause.clone());
        self.notify(Some(cause), ConnectionEvent::SocketDisconnected);
    }

    /// Called when the client is dropped; no events are reported.
    fn abort(&mut self) {
        self.on_event = None;
        self.on_message = None;
        self.pending_events.clear();
        if self.state != ConnectionState::Disconnected {
            self.teardown(Error::ClientAborted);
        }
    }

    fn teardown(&mut self, cause: Error) {
        self.state = ConnectionState::Disconnected;
        self.ping_timer.cancel();
        self.timeout_timer.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.writer = None;
        self.write_locked = false;

        self.closed.send_replace(Some(cause.clone()));
        self.waiters.clear();
        if let Some(completion) = self.run_completion.take() {
            let _ = completion.send(cause);
        }
    }

    // ------------------------------------------------------------------
    // Write lock
    // ------------------------------------------------------------------

    fn try_acquire_write_lock(&mut self) -> Option<Writer<C>> {
        if self.state != ConnectionState::Connected || self.write_locked {
            return None;
        }
        let writer = self.writer.take()?;
        self.write_locked = true;
        Some(writer)
    }

    fn acquire_write_lock(&mut self, kind: WriteKind) -> Result<Acquired<C>> {
        let closed = self.closed.subscribe();
        if let Some(writer) = self.try_acquire_write_lock() {
            return Ok(Acquired {
                lock: Acquire::Granted(writer),
                closed,
            });
        }

        if self.state == ConnectionState::Disconnected {
            return match &*closed.borrow() {
                Some(Error::ClientAborted) => Err(Error::ClientAborted),
                _ => Err(Error::SocketDisconnected),
            };
        }

        if kind == WriteKind::Ping && self.waiters.iter().any(WriteWaiter::is_ping) {
            return Ok(Acquired {
                lock: Acquire::Skipped,
                closed,
            });
        }

        let (grant, granted) = oneshot::channel();
        self.waiters.push_back(WriteWaiter::new(kind, grant));
        trace!("Queued {:?} behind write lock ({} waiting)", kind, self.waiters.len());
        Ok(Acquired {
            lock: Acquire::Queued(granted),
            closed,
        })
    }

    fn release_write_lock(&mut self, mut writer: Writer<C>) {
        if self.state != ConnectionState::Connected {
            self.write_locked = false;
            return;
        }

        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.into_grant().send(writer) {
                Ok(()) => {
                    self.write_locked = true;
                    return;
                }
                // Waiter went away; try the next one.
                Err(returned) => writer = returned,
            }
        }

        self.write_locked = false;
        self.writer = Some(writer);
    }

    // ------------------------------------------------------------------
    // Keep-alive
    // ------------------------------------------------------------------

    fn timer_mut(&mut self, kind: TimerKind) -> &mut Timer {
        match kind {
            TimerKind::Ping => &mut self.ping_timer,
            TimerKind::Timeout => &mut self.timeout_timer,
        }
    }

    fn arm_timer(&mut self, kind: TimerKind) {
        if self.keep_alive.is_zero() {
            return;
        }
        let after = match kind {
            TimerKind::Ping => self.keep_alive,
            TimerKind::Timeout => self.keep_alive + self.keep_alive / 2,
        };

        let timer = self.timer_mut(kind);
        timer.cancel();
        let generation = timer.generation;

        let weak = self.this.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            with_session(&weak, |s| s.on_timer(kind, generation));
        })
        .abort_handle();
        self.timer_mut(kind).handle = Some(handle);
    }

    fn on_timer(&mut self, kind: TimerKind, generation: u64) {
        if !self.timer_mut(kind).fire(generation) {
            return;
        }
        match kind {
            TimerKind::Ping => self.send_ping(),
            TimerKind::Timeout => {
                warn!("No traffic for {:?}, closing connection", self.keep_alive + self.keep_alive / 2);
                self.disconnect(Error::SocketDisconnected);
            }
        }
    }

    fn send_ping(&mut self) {
        let acquired = self.acquire_write_lock(WriteKind::Ping);
        let weak = self.this.clone();
        tokio::spawn(async move {
            match write_op(weak, acquired, packet_type::PINGREQ, Bytes::new()).await {
                Ok(()) => trace!("Keepalive ping sent"),
                Err(e) => warn!("Keepalive ping failed: {}", e),
            }
        });
    }
}

/// Run `f` on the session, then deliver queued connection events with the
/// lock released. Events raised while another caller is delivering are
/// picked up by that caller, keeping delivery in order.
fn apply<C: Connector, R>(shared: &Shared<C>, f: impl FnOnce(&mut Session<C>) -> R) -> R {
    let mut session = shared.lock();
    let result = f(&mut session);
    if session.dispatching {
        return result;
    }

    session.dispatching = true;
    loop {
        let events = std::mem::take(&mut session.pending_events);
        if events.is_empty() {
            session.dispatching = false;
            return result;
        }
        let callback = session.on_event.clone();
        MutexGuard::unlocked(&mut session, || {
            if let Some(callback) = callback {
                for (cause, event) in events {
                    callback(cause.as_ref(), event);
                }
            }
        });
    }
}

/// [`apply`] through a weak reference; `None` once the client is gone.
fn with_session<C: Connector, R>(weak: &Weak<Shared<C>>, f: impl FnOnce(&mut Session<C>) -> R) -> Option<R> {
    let shared = weak.upgrade()?;
    Some(apply(&shared, f))
}

fn close_cause(closed: &watch::Receiver<Option<Error>>) -> Error {
    closed.borrow().clone().unwrap_or(Error::ClientAborted)
}

/// Wait for the write lock, write one frame, release the lock.
async fn write_op<C: Connector>(
    weak: Weak<Shared<C>>,
    acquired: Result<Acquired<C>>,
    first_byte: u8,
    payload: Bytes,
) -> Result<()> {
    let Acquired { lock, mut closed } = acquired?;
    let mut writer = match lock {
        Acquire::Granted(writer) => writer,
        Acquire::Queued(granted) => match granted.await {
            Ok(writer) => writer,
            Err(_) => return Err(close_cause(&closed)),
        },
        Acquire::Skipped => return Ok(()),
    };

    let written = tokio::select! {
        written = writer.write_frame(first_byte, &payload) => Some(written),
        _ = closed.changed() => None,
    };
    let result = match written {
        Some(written) => written.map(drop),
        None => Err(close_cause(&closed)),
    };

    // A dead peer is detected by the read loop or the timeout timer.
    with_session(&weak, move |s| s.release_write_lock(writer));

    result
}

async fn read_loop<C: Connector>(weak: Weak<Shared<C>>, mut reader: Reader<C>) {
    let mut frame = BytesMut::new();
    loop {
        let result = reader.read_frame(&mut frame).await;
        let Some(shared) = weak.upgrade() else {
            return;
        };

        let header = match result {
            Ok(header) => header,
            Err(e) => {
                debug!("Read failed: {}", e);
                apply(&shared, |s| s.disconnect(e));
                return;
            }
        };

        let Some(callback) = apply(&shared, |s| s.on_frame()) else {
            return;
        };
        drop(shared);

        trace!("Received frame type=0x{:02x} ({} bytes)", header.first_byte, frame.len());
        if let Some(callback) = callback {
            callback(header, &frame);
        }
        frame.clear();
    }
}

fn encode_publish(topic: &str, payload: &[u8]) -> Result<Bytes> {
    let len = codec::prefixed_len(topic.len())? + payload.len();
    let mut buf = BytesMut::with_capacity(len);
    buf.put_u16(topic.len() as u16);
    buf.put_slice(topic.as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Resolves with the reason the connection ended.
#[must_use = "the run completion reports why the connection ended"]
pub struct RunCompletion {
    rx: oneshot::Receiver<Error>,
}

impl Future for RunCompletion {
    type Output = Error;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Error> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Error::ClientAborted))
    }
}

/// Resolves once a publish has been written or has failed.
#[must_use = "the publish completion reports whether the write succeeded"]
pub struct PublishCompletion {
    rx: oneshot::Receiver<Result<()>>,
}

impl PublishCompletion {
    fn ready(result: Result<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for PublishCompletion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(Error::ClientAborted)))
    }
}

/// MQTT 3.1.1 client.
///
/// Methods that start work (`run`, `publish`) spawn onto the current tokio
/// runtime and must be called from within one.
pub struct Client<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Client<C> {
    /// Create an idle client.
    pub fn new(connector: C, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new_cyclic(|this| Mutex::new(Session::new(this.clone(), connector, config)));
        Ok(Self { shared })
    }

    /// Set the connection event observer.
    pub fn set_connection_event_callback(
        &self,
        callback: impl Fn(Option<&Error>, ConnectionEvent) + Send + Sync + 'static,
    ) {
        self.shared.lock().on_event = Some(Arc::new(callback));
    }

    /// Set the inbound frame callback.
    pub fn set_message_callback(&self, callback: impl Fn(FixedHeader, &[u8]) + Send + Sync + 'static) {
        self.shared.lock().on_message = Some(Arc::new(callback));
    }

    /// Set a hook that may edit the CONNECT message before it is sent.
    pub fn set_connect_decorator(&self, decorator: impl FnMut(&mut ConnectMessage) + Send + 'static) {
        self.shared.lock().decorator = Some(Box::new(decorator));
    }

    /// Override the keep-alive used for the next handshake. Zero disables
    /// pings and the inactivity timeout.
    pub fn set_keep_alive(&self, keep_alive: Duration) {
        self.shared.lock().keep_alive = keep_alive;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Start connecting.
    ///
    /// The returned future resolves once, when the connection ends, with the
    /// cause. Calling `run` on a client that is not idle resolves
    /// immediately with [`Error::AlreadyRunning`].
    pub fn run(&self) -> RunCompletion {
        let (tx, rx) = oneshot::channel();
        {
            let mut session = self.shared.lock();
            if session.state != ConnectionState::Idle || session.run_completion.is_some() {
                let _ = tx.send(Error::AlreadyRunning);
                return RunCompletion { rx };
            }
            session.run_completion = Some(tx);
        }

        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            with_session(&weak, |s| s.start_connecting());
        });
        RunCompletion { rx }
    }

    /// Publish at QoS 0.
    ///
    /// Publishes issued before the handshake completes are queued and sent
    /// in call order once connected. On a disconnected client the publish
    /// fails with [`Error::SocketDisconnected`].
    pub fn publish(&self, topic: &str, payload: &[u8]) -> PublishCompletion {
        self.publish_with_retain(topic, payload, false)
    }

    /// Publish at QoS 0 with the retain flag.
    pub fn publish_with_retain(&self, topic: &str, payload: &[u8], retain: bool) -> PublishCompletion {
        let packet = match encode_publish(topic, payload) {
            Ok(packet) => packet,
            Err(e) => return PublishCompletion::ready(Err(e)),
        };
        let first_byte = packet_type::PUBLISH | u8::from(retain);
        trace!("Publishing to {} ({} bytes)", topic, payload.len());

        let acquired = apply(&self.shared, |s| s.acquire_write_lock(WriteKind::Publish));
        let weak = Arc::downgrade(&self.shared);
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(write_op(weak, acquired, first_byte, packet).await);
        });
        PublishCompletion { rx }
    }

    /// Close the connection. The run completion and every queued publish
    /// complete with [`Error::ClientStopped`].
    pub fn stop(&self) {
        debug!("Stopping client");
        apply(&self.shared, |s| s.disconnect(Error::ClientStopped));
    }
}

impl<C: Connector> Drop for Client<C> {
    fn drop(&mut self) {
        self.shared.lock().abort();
    }
}

impl<C: Connector> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("state", &self.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_publish() {
        let packet = encode_publish("a/b", b"hi").unwrap();
        assert_eq!(&packet[..], &[0x00, 0x03, b'a', b'/', b'b', b'h', b'i']);
    }

    #[test]
    fn test_encode_publish_topic_too_long() {
        let topic = "t".repeat(70_000);
        assert!(encode_publish(&topic, b"").is_err());
    }

    #[test]
    fn test_timer_generation() {
        let mut timer = Timer::default();
        assert!(!timer.fire(0));

        timer.cancel();
        let generation = timer.generation;
        timer.handle = None;
        assert!(!timer.fire(generation));
    }
}
