//! Runs one GraphQL over WebSocket connection.
//!
//! A connection is served by a single loop owning the [`ConnectionState`]. Operations run in
//! their own tasks and report back through a bounded channel, so the loop is the only place
//! where the operation table changes and the only writer of frames.

use std::collections::HashMap;
use std::fmt::Display;
use std::future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Sink;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use serde_json_bytes::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tokio::time::Sleep;
use tower::BoxError;
use tracing::Instrument;

use crate::configuration::SubscriptionConfig;
use crate::error::InvocationError;
use crate::error::ProtocolError;
use crate::graphql;
use crate::graphql::IntoGraphQLErrors;
use crate::invocation::Invocation;
use crate::protocols::websocket::ClientMessage;
use crate::protocols::websocket::Frame;
use crate::protocols::websocket::ServerMessage;
use crate::protocols::websocket::WebSocketProtocol;
use crate::transport::TransportRequest;

/// Accepts or rejects a connection from its `connection_init` payload.
#[async_trait]
pub trait ConnectionInitHandler: Send + Sync + 'static {
    async fn on_connection_init(
        &self,
        payload: Option<&Value>,
        transport_request: &TransportRequest,
    ) -> Result<(), BoxError>;
}

#[async_trait]
impl<H> ConnectionInitHandler for Arc<H>
where
    H: ConnectionInitHandler + ?Sized,
{
    async fn on_connection_init(
        &self,
        payload: Option<&Value>,
        transport_request: &TransportRequest,
    ) -> Result<(), BoxError> {
        (**self)
            .on_connection_init(payload, transport_request)
            .await
    }
}

/// Accepts every connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

#[async_trait]
impl ConnectionInitHandler for AcceptAll {
    async fn on_connection_init(
        &self,
        _payload: Option<&Value>,
        _transport_request: &TransportRequest,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Uninitialized,
    Acked,
    Terminated,
}

#[derive(Debug)]
struct OperationHandle {
    generation: u64,
    abort: AbortHandle,
}

/// The phase of a connection and its running operations.
///
/// An id is mapped to at most one running operation. Generations tell apart successive
/// operations that reuse the same id.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    phase: Phase,
    active_operations: HashMap<String, OperationHandle>,
    generations: u64,
}

impl ConnectionState {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
            active_operations: HashMap::new(),
            generations: 0,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn acknowledge(&mut self) {
        if self.phase == Phase::Uninitialized {
            self.phase = Phase::Acked;
        }
    }

    pub(crate) fn is_active(&self, id: &str) -> bool {
        self.active_operations.contains_key(id)
    }

    fn is_current(&self, id: &str, generation: u64) -> bool {
        self.active_operations
            .get(id)
            .is_some_and(|handle| handle.generation == generation)
    }

    /// Registers operation `id`, calling `spawn` with its generation to start it.
    ///
    /// `spawn` is not called when the operation cannot start.
    pub(crate) fn start(
        &mut self,
        id: &str,
        spawn: impl FnOnce(u64) -> AbortHandle,
    ) -> Result<(), ProtocolError> {
        if self.phase != Phase::Acked {
            return Err(ProtocolError::Unacknowledged);
        }
        if self.is_active(id) {
            return Err(ProtocolError::DuplicateOperationId(id.to_string()));
        }
        self.generations += 1;
        let generation = self.generations;
        let abort = spawn(generation);
        self.active_operations
            .insert(id.to_string(), OperationHandle { generation, abort });
        Ok(())
    }

    /// Removes an operation that ended on its own. Returns `false` if it was already gone.
    pub(crate) fn finish(&mut self, id: &str, generation: u64) -> bool {
        if self.is_current(id, generation) {
            self.active_operations.remove(id);
            true
        } else {
            false
        }
    }

    /// Cancels and removes operation `id`. Returns `false` if it was not running.
    pub(crate) fn stop(&mut self, id: &str) -> bool {
        match self.active_operations.remove(id) {
            Some(handle) => {
                handle.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every running operation. Nothing can start afterwards.
    pub(crate) fn terminate(&mut self) {
        self.phase = Phase::Terminated;
        for (id, handle) in self.active_operations.drain() {
            tracing::debug!(%id, "cancelling operation");
            handle.abort.abort();
        }
    }
}

#[derive(Debug)]
enum OperationEvent {
    Next(graphql::Response),
    Failed(InvocationError),
    Completed,
}

#[derive(Debug)]
struct Event {
    id: String,
    generation: u64,
    event: OperationEvent,
}

/// Serves GraphQL over WebSocket connections.
#[derive(Clone)]
pub struct ConnectionHandler {
    invocation: Invocation,
    init_handler: Arc<dyn ConnectionInitHandler>,
    keep_alive_interval: Option<Duration>,
    connection_init_timeout: Option<Duration>,
    queue_capacity: usize,
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("invocation", &self.invocation)
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("connection_init_timeout", &self.connection_init_timeout)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandler {
    pub fn new(invocation: Invocation, configuration: &SubscriptionConfig) -> Self {
        Self {
            invocation,
            init_handler: Arc::new(AcceptAll),
            keep_alive_interval: configuration
                .keep_alive_interval
                .filter(|period| !period.is_zero()),
            connection_init_timeout: configuration.connection_init_timeout,
            queue_capacity: configuration.queue_capacity.max(1),
        }
    }

    pub fn with_init_handler(mut self, init_handler: impl ConnectionInitHandler) -> Self {
        self.init_handler = Arc::new(init_handler);
        self
    }

    /// Runs the connection until the client leaves, the transport fails or the protocol
    /// requires closing it.
    ///
    /// `transport_request` is the upgrade request, handed to every operation of the connection.
    pub async fn serve<Si, St, E>(
        &self,
        protocol: WebSocketProtocol,
        transport_request: TransportRequest,
        sink: Si,
        stream: St,
    ) where
        Si: Sink<Frame> + Send,
        Si::Error: Display,
        St: Stream<Item = Result<Frame, E>> + Send,
        E: Display + Send,
    {
        let span = tracing::info_span!("graphql.ws.connection", protocol = %protocol);
        self.run(protocol, transport_request, sink, stream)
            .instrument(span)
            .await
    }

    async fn run<Si, St, E>(
        &self,
        protocol: WebSocketProtocol,
        transport_request: TransportRequest,
        sink: Si,
        stream: St,
    ) where
        Si: Sink<Frame> + Send,
        Si::Error: Display,
        St: Stream<Item = Result<Frame, E>> + Send,
        E: Display + Send,
    {
        let (events_sender, mut events) = mpsc::channel(self.queue_capacity);
        let mut connection = Connection {
            handler: self,
            protocol,
            transport_request,
            sink: Box::pin(sink),
            state: ConnectionState::new(),
            events: events_sender,
            closed: false,
        };
        let mut stream = Box::pin(stream);
        let mut keep_alive: Option<Interval> = None;
        let mut init_deadline: Option<Pin<Box<Sleep>>> = self
            .connection_init_timeout
            .map(|timeout| Box::pin(tokio::time::sleep(timeout)));

        tracing::debug!("connection opened");
        while connection.state.phase() != Phase::Terminated {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Frame::Text(text))) => connection.on_text(&text).await,
                    Some(Ok(Frame::Close { code, reason })) => {
                        tracing::debug!(code, %reason, "connection closed by the client");
                        connection.state.terminate();
                    }
                    Some(Err(err)) => {
                        tracing::debug!(%err, "cannot read from the connection");
                        connection.state.terminate();
                    }
                    None => {
                        tracing::debug!("connection closed by the client");
                        connection.state.terminate();
                    }
                },
                Some(event) = events.recv() => connection.on_event(event).await,
                () = tick(&mut keep_alive) => connection.send(ServerMessage::KeepAlive).await,
                () = expire(&mut init_deadline) => {
                    connection.reject(ProtocolError::InitialisationTimeout).await;
                    connection.state.terminate();
                }
            }

            if connection.state.phase() != Phase::Uninitialized {
                init_deadline = None;
            }
            if keep_alive.is_none()
                && connection.state.phase() == Phase::Acked
                && protocol.sends_keep_alive()
                && let Some(period) = self.keep_alive_interval
            {
                connection.send(ServerMessage::KeepAlive).await;
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                keep_alive = Some(interval);
            }
        }

        connection.close().await;
        tracing::debug!("connection closed");
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn expire(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(deadline) => deadline.as_mut().await,
        None => future::pending().await,
    }
}

struct Connection<'a, Si> {
    handler: &'a ConnectionHandler,
    protocol: WebSocketProtocol,
    transport_request: TransportRequest,
    sink: Pin<Box<Si>>,
    state: ConnectionState,
    events: mpsc::Sender<Event>,
    closed: bool,
}

impl<Si> Connection<'_, Si>
where
    Si: Sink<Frame> + Send,
    Si::Error: Display,
{
    async fn on_text(&mut self, text: &str) {
        match self.protocol.decode(text) {
            Ok(message) => self.on_message(message).await,
            Err(error) => self.reject(error).await,
        }
    }

    async fn on_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::ConnectionInit { payload } => {
                if self.state.phase() != Phase::Uninitialized {
                    return self
                        .reject(ProtocolError::TooManyInitialisationRequests)
                        .await;
                }
                match self
                    .handler
                    .init_handler
                    .on_connection_init(payload.as_ref(), &self.transport_request)
                    .await
                {
                    Ok(()) => {
                        self.state.acknowledge();
                        tracing::debug!("connection acknowledged");
                        self.send(ServerMessage::ConnectionAck).await;
                    }
                    Err(err) => {
                        self.reject(ProtocolError::Forbidden(err.to_string()))
                            .await;
                        self.state.terminate();
                    }
                }
            }
            ClientMessage::Start { id, payload } => self.start(id, payload).await,
            ClientMessage::Stop { id } => {
                if self.state.stop(&id) {
                    tracing::debug!(%id, "operation stopped by the client");
                    if let Some(message) = self.protocol.stopped(id) {
                        self.send(message).await;
                    }
                } else {
                    tracing::trace!(%id, "ignoring stop for an operation that is not running");
                }
            }
            ClientMessage::ConnectionTerminate => {
                tracing::debug!("connection terminated by the client");
                self.state.terminate();
            }
            ClientMessage::Ping { .. } => self.send(ServerMessage::Pong { payload: None }).await,
            ClientMessage::Pong { .. } => {}
        }
    }

    async fn start(&mut self, id: String, request: graphql::Request) {
        let invocation = self.handler.invocation.clone();
        let transport_request = self.transport_request.clone();
        let events = self.events.clone();
        let operation_id = id.clone();

        let started = self.state.start(&id, move |generation| {
            let span = tracing::info_span!("graphql.ws.operation", id = %operation_id);
            tokio::spawn(
                run_operation(
                    invocation,
                    request,
                    transport_request,
                    operation_id,
                    generation,
                    events,
                )
                .instrument(span),
            )
            .abort_handle()
        });
        match started {
            Ok(()) => tracing::debug!(%id, "operation started"),
            Err(error) => self.reject(error).await,
        }
    }

    async fn on_event(&mut self, Event { id, generation, event }: Event) {
        if !self.state.is_current(&id, generation) {
            tracing::trace!(%id, "discarding event of an operation that is no longer running");
            return;
        }
        match event {
            OperationEvent::Next(payload) => self.send(ServerMessage::Data { id, payload }).await,
            OperationEvent::Failed(error) => {
                self.state.finish(&id, generation);
                tracing::debug!(%id, %error, "operation failed");
                for message in self
                    .protocol
                    .execution_failed(id, error.into_graphql_errors())
                {
                    self.send(message).await;
                }
            }
            OperationEvent::Completed => {
                self.state.finish(&id, generation);
                tracing::debug!(%id, "operation completed");
                self.send(ServerMessage::Complete { id }).await;
            }
        }
    }

    async fn reject(&mut self, error: ProtocolError) {
        tracing::warn!(%error, "protocol error");
        let acknowledged = self.state.phase() == Phase::Acked;
        let messages = self
            .protocol
            .report(&error, acknowledged, |id| self.state.is_active(id));
        for message in messages {
            self.send(message).await;
        }
    }

    async fn send(&mut self, message: ServerMessage) {
        if self.closed {
            return;
        }
        let frame = match self.protocol.encode(&message) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(%err, "cannot serialize websocket message");
                return;
            }
        };
        let closing = matches!(frame, Frame::Close { .. });
        if let Err(err) = self.sink.send(frame).await {
            tracing::debug!(%err, "cannot write to the connection");
            self.closed = true;
            self.state.terminate();
        } else if closing {
            self.closed = true;
            self.state.terminate();
        }
    }

    async fn close(&mut self) {
        self.state.terminate();
        if let Err(err) = self.sink.close().await {
            tracing::trace!(%err, "cannot close the connection");
        }
    }
}

async fn run_operation(
    invocation: Invocation,
    request: graphql::Request,
    transport_request: TransportRequest,
    id: String,
    generation: u64,
    events: mpsc::Sender<Event>,
) {
    let mut results = invocation.invoke(request, transport_request, None);
    while let Some(result) = results.next().await {
        let (event, last) = match result {
            Ok(response) => (OperationEvent::Next(response), false),
            Err(error) => (OperationEvent::Failed(error), true),
        };
        let event = Event {
            id: id.clone(),
            generation,
            event,
        };
        if events.send(event).await.is_err() {
            tracing::trace!(%id, "connection is gone, dropping the operation");
            return;
        }
        if last {
            return;
        }
    }
    let completed = Event {
        id,
        generation,
        event: OperationEvent::Completed,
    };
    if let Err(error) = events.send(completed).await {
        tracing::trace!(id = %error.0.id, "connection is gone, dropping the completion");
    }
}
