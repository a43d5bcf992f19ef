//! Client secure channel
//!
//! A [`SecureChannel`] owns one logical channel to a server. Per connection
//! it runs a reader task and a writer task; a supervisor task renews the
//! token at 75% of its lifetime, sweeps timed out requests and reacts to
//! transport loss.
//!
//! ```text
//!  callers --submit--> pending table          supervisor
//!     |                    ^                 (renew, sweep,
//!     v                    | complete         reconnect)
//!  write queue --> writer --> transport --> reader
//! ```
//!
//! Outgoing messages are protected by the writer with the token that is
//! current when they reach the wire, in submission order. Responses complete
//! their request by request id in whatever order they arrive.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant, MissedTickBehavior};

use super::config::ChannelSettings;
use super::pending::{PendingRequest, PendingTable};
use super::protection::{
    decode_asymmetric, decode_symmetric, encode_asymmetric, encode_symmetric, AsymmetricHeaders,
    SizeLimit,
};
use super::reconnect::ReconnectSchedule;
use super::sequence::{SequenceCounter, SequenceValidator};
use super::tokens::TokenSet;
use crate::crypto::{
    Certificate, CryptoProvider, KeyPair, PolicyRegistry, ProviderRegistry, SecurityToken,
    TokenParams,
};
use crate::message::body::{
    encode_body, OpenSecureChannelRequest, OpenSecureChannelResponse, SecurityTokenRequestType,
    ServiceFault, CLOSE_SECURE_CHANNEL_REQUEST, OPEN_SECURE_CHANNEL_RESPONSE, PROTOCOL_VERSION,
    SERVICE_FAULT,
};
use crate::message::header::{MessageHeader, MessageType, SequenceHeader, HEADER_SIZE};
use crate::security::{SecurityConfiguration, SecurityMode};
use crate::service::{RequestChannel, ServiceRequest, ServiceResponse};
use crate::status::{Error, Result, StatusCode};
use crate::sync::{AsyncResult, ChannelState, StateMachine, WriteOperation, WriteState};
use crate::transport::{Connector, FrameSink, FrameSource, Transport};

/// A message waiting for the writer
struct Outgoing {
    message_type: MessageType,
    request_id: u32,
    body: Bytes,
    write: Arc<WriteOperation>,
    ack: Option<oneshot::Sender<Result<()>>>,
}

impl Outgoing {
    fn acknowledge(&mut self, outcome: Result<()>) {
        if let Some(ack) = self.ack.take() {
            // The closer may have stopped waiting
            let _ = ack.send(outcome);
        }
    }
}

/// The message the writer has taken off the queue and not finished writing
struct InFlight {
    request_id: u32,
    write: Arc<WriteOperation>,
}

/// Reported by the I/O tasks to the supervisor
#[derive(Debug)]
enum Event {
    /// The transport failed; reconnecting may help
    TransportLost { generation: u64, error: Error },

    /// A protocol or security fault; the channel must close
    Fatal { generation: u64, error: Error },
}

type EventSender = mpsc::UnboundedSender<Event>;

fn report(events: &Option<EventSender>, event: Event) {
    if let Some(events) = events {
        if events.send(event).is_err() {
            log::trace!("Supervisor gone, event dropped");
        }
    }
}

fn is_transport_fault(error: &Error) -> bool {
    matches!(
        error.status(),
        StatusCode::BadConnectionClosed | StatusCode::BadCommunicationError
    )
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct Inner {
    settings: ChannelSettings,
    security: SecurityConfiguration,
    provider: Arc<dyn CryptoProvider>,
    connector: Arc<dyn Connector>,

    state: StateMachine<ChannelState>,
    disposed: AtomicBool,
    channel_id: AtomicU32,
    tokens: RwLock<Option<TokenSet>>,

    pending: PendingTable,
    next_request_id: AtomicU32,
    /// Request id of the open or renew in flight
    handshake: Mutex<Option<u32>>,

    send_sequence: Mutex<SequenceCounter>,
    recv_sequence: Mutex<SequenceValidator>,

    queue: mpsc::UnboundedSender<Outgoing>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Outgoing>>>,
    writing: Mutex<Option<InFlight>>,

    events: Mutex<Option<EventSender>>,
    generation: AtomicU64,
    io_tasks: Mutex<Vec<JoinHandle<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn check_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::internal("channel has been disposed"));
        }
        Ok(())
    }

    fn channel_id(&self) -> u32 {
        self.channel_id.load(Ordering::SeqCst)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn current_token(&self) -> Option<Arc<SecurityToken>> {
        self.tokens.read().as_ref().map(TokenSet::current)
    }

    fn next_request_id(&self) -> u32 {
        loop {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn enqueue(
        &self,
        message_type: MessageType,
        request_id: u32,
        body: Bytes,
        write: Arc<WriteOperation>,
        ack: Option<oneshot::Sender<Result<()>>>,
    ) -> Result<()> {
        write.queue()?;
        self.queue
            .send(Outgoing {
                message_type,
                request_id,
                body,
                write,
                ack,
            })
            .map_err(|_| Error::channel_closed("write queue closed"))
    }

    /// Spawn reader and writer over a new transport
    fn start_io(self: &Arc<Self>, transport: Transport) {
        self.stop_io();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let events = self.events.lock().clone();
        let Transport { source, sink } = transport;

        let reader = tokio::spawn(read_loop(
            Arc::clone(self),
            source,
            generation,
            events.clone(),
        ));
        let writer = tokio::spawn(write_loop(Arc::clone(self), sink, generation, events));
        self.io_tasks.lock().extend([reader, writer]);
        log::debug!("Started connection {}", generation);
    }

    fn stop_io(&self) {
        for task in self.io_tasks.lock().drain(..) {
            task.abort();
        }
        self.fail_interrupted();
    }

    /// Fail the message an aborted writer left half written
    ///
    /// It is not sent again: the peer may already have received it.
    fn fail_interrupted(&self) {
        let Some(interrupted) = self.writing.lock().take() else {
            return;
        };
        interrupted.write.fail();
        let error = Error::new(
            StatusCode::BadCommunicationError,
            format!("connection lost while writing request {}", interrupted.request_id),
        );
        if self.pending.complete(interrupted.request_id, Err(error)) {
            log::debug!("Failed request {}, interrupted while writing", interrupted.request_id);
        }
    }

    /// Fail the open or renew in flight
    fn abort_handshake(&self, error: &Error) {
        let request_id = *self.handshake.lock();
        if let Some(request_id) = request_id {
            self.pending.complete(request_id, Err(error.clone()));
        }
    }

    /// Run an open (`Issue`) or renew handshake and activate the new token
    async fn handshake(self: &Arc<Self>, request_type: SecurityTokenRequestType) -> Result<()> {
        let policy = self.security.mode().policy();
        let nonce = self.provider.random_bytes(policy.nonce_length);
        let request = OpenSecureChannelRequest {
            client_protocol_version: PROTOCOL_VERSION,
            request_type,
            security_mode: self.security.mode().message_mode(),
            client_nonce: Bytes::from(nonce.clone()),
            requested_lifetime: self.settings.requested_lifetime,
        };

        let request_id = self.next_request_id();
        let pending = Arc::new(PendingRequest::new(request_id));
        self.pending.insert(Arc::clone(&pending))?;
        *self.handshake.lock() = Some(request_id);

        let outcome = match self.enqueue(
            MessageType::Open,
            request_id,
            request.to_body(),
            Arc::clone(&pending.write),
            None,
        ) {
            Ok(()) => pending.result().wait(self.settings.operation_timeout).await,
            Err(e) => Err(e),
        };
        *self.handshake.lock() = None;
        if outcome.is_err() {
            self.pending.remove(request_id);
            pending.write.fail();
        }

        let response = outcome?;
        let mut body = response.body;
        if response.type_id == SERVICE_FAULT {
            return Err(ServiceFault::decode(&mut body)?.into());
        }
        if response.type_id != OPEN_SECURE_CHANNEL_RESPONSE {
            return Err(Error::new(
                StatusCode::BadUnknownResponse,
                format!("unexpected response type {} to open", response.type_id),
            ));
        }
        let response = OpenSecureChannelResponse::decode(&mut body)?;
        let issued = response.security_token;

        let renewing = matches!(request_type, SecurityTokenRequestType::Renew);
        if issued.channel_id == 0 || (renewing && issued.channel_id != self.channel_id()) {
            return Err(Error::new(
                StatusCode::BadSecureChannelIdInvalid,
                format!("server answered with channel {}", issued.channel_id),
            ));
        }

        let params = TokenParams {
            channel_id: issued.channel_id,
            token_id: issued.token_id,
            created_at: issued.created_at,
            lifetime: issued.revised_lifetime,
        };
        let token =
            SecurityToken::derive(&*self.provider, policy, params, &nonce, &response.server_nonce)?;

        self.channel_id.store(issued.channel_id, Ordering::SeqCst);
        {
            let mut tokens = self.tokens.write();
            *tokens = match tokens.take() {
                Some(mut set) => {
                    set.activate(token);
                    Some(set)
                }
                None => Some(TokenSet::new(token)),
            };
        }
        log::info!(
            "{} token {} for channel {}, lifetime {} ms",
            if renewing { "Renewed" } else { "Issued" },
            issued.token_id,
            issued.channel_id,
            issued.revised_lifetime.as_millis()
        );
        Ok(())
    }

    /// Protect an outgoing message
    fn protect(&self, item: &Outgoing) -> Result<Bytes> {
        let sequence = SequenceHeader {
            sequence_number: self.send_sequence.lock().next(),
            request_id: item.request_id,
        };
        let limit = SizeLimit::request(self.settings.max_message_size);
        match item.message_type {
            MessageType::Open => encode_asymmetric(
                &*self.provider,
                self.security.mode().policy(),
                self.security.local(),
                self.security.remote(),
                self.channel_id(),
                sequence,
                &item.body,
                limit,
            ),
            message_type => {
                let token = self
                    .current_token()
                    .ok_or_else(|| Error::channel_closed("no active token"))?;
                encode_symmetric(
                    &*self.provider,
                    self.security.mode(),
                    &token,
                    message_type,
                    sequence,
                    &item.body,
                    limit,
                )
            }
        }
    }

    /// Handle one incoming chunk
    fn receive(&self, frame: Bytes) -> Result<()> {
        let header = MessageHeader::decode(&mut frame.clone())?;
        match header.message_type {
            MessageType::Open => self.receive_open(frame),
            MessageType::Message => self.receive_message(frame),
            MessageType::Error => {
                let mut payload = frame.slice(HEADER_SIZE..);
                let fault = ServiceFault::decode(&mut payload)?;
                Err(Error::new(
                    fault.status,
                    format!("server reported an error: {}", fault.reason),
                ))
            }
            MessageType::Close => Err(Error::channel_closed("server closed the channel")),
        }
    }

    fn receive_open(&self, frame: Bytes) -> Result<()> {
        let headers = AsymmetricHeaders::decode(&frame)?;
        let policy = self.security.mode().policy();
        if headers.security.policy_uri != policy.uri {
            return Err(Error::new(
                StatusCode::BadSecurityPolicyRejected,
                format!("server answered with policy {}", headers.security.policy_uri),
            ));
        }

        let sender = if policy.is_none() {
            None
        } else {
            let server = self.security.require_remote()?;
            if headers.security.sender_certificate.as_ref() != Some(server.as_bytes()) {
                return Err(Error::new(
                    StatusCode::BadCertificateInvalid,
                    "response signed with an unexpected server certificate",
                ));
            }
            let thumbprint = self.security.require_local()?.certificate.thumbprint();
            if headers.security.receiver_thumbprint.as_deref() != Some(&thumbprint[..]) {
                return Err(Error::new(
                    StatusCode::BadCertificateInvalid,
                    "response encrypted for another certificate",
                ));
            }
            Some(server.public_key())
        };

        let (sequence, body) = decode_asymmetric(
            &*self.provider,
            policy,
            self.security.local(),
            sender,
            &headers,
            &frame,
        )?;
        self.recv_sequence.lock().check(sequence.sequence_number)?;
        let response = ServiceResponse::from_body(body)?;
        if !self.pending.complete(sequence.request_id, Ok(response)) {
            log::debug!("Unexpected open response {}", sequence.request_id);
        }
        Ok(())
    }

    fn receive_message(&self, frame: Bytes) -> Result<()> {
        // Snapshot, so no lock is held while verifying
        let tokens = self
            .tokens
            .read()
            .clone()
            .ok_or_else(|| Error::channel_closed("no active token"))?;
        let chunk = decode_symmetric(&*self.provider, self.security.mode(), &tokens, frame)?;
        self.recv_sequence
            .lock()
            .check(chunk.sequence.sequence_number)?;

        let request_id = chunk.sequence.request_id;
        let response = ServiceResponse::from_body(chunk.body)?;
        log::trace!(
            "Response {} (type {}) under token {}",
            request_id,
            response.type_id,
            chunk.token.token_id()
        );
        if !self.pending.complete(request_id, Ok(response)) {
            log::debug!("Dropped response to request {}, no longer pending", request_id);
        }
        Ok(())
    }

    /// Stop everything and fail what is outstanding
    fn teardown(&self, cause: &Error) {
        let failed = self
            .pending
            .close(&Error::channel_closed(format!("channel closed: {}", cause)));
        if failed > 0 {
            log::debug!("Failed {} pending requests", failed);
        }
        self.stop_io();
        *self.events.lock() = None;
        *self.tokens.write() = None;
        *self.handshake.lock() = None;
    }

    /// Close after a fatal fault; a no-op if the channel is already closing
    fn fail(&self, cause: &Error) {
        if !self.state.try_transition(ChannelState::Closing) {
            return;
        }
        log::error!("Closing channel {}: {}", self.channel_id(), cause);
        self.teardown(cause);
        if let Err(e) = self.state.transition(ChannelState::Closed) {
            log::error!("{}", e);
        }
    }

    /// React to a transport loss; true if the channel is open again
    async fn recover(self: &Arc<Self>, error: Error) -> bool {
        // Decided before the writer's interrupted request is failed
        let reconnect =
            self.settings.reconnect && self.connector.is_stateful() && !self.pending.is_empty();
        if !reconnect {
            log::info!("Transport lost ({}), closing channel {}", error, self.channel_id());
            self.fail(&error);
            return false;
        }
        self.stop_io();
        if let Err(e) = self.state.transition(ChannelState::Opening) {
            self.fail(&e);
            return false;
        }
        let Some(expires_at) = self.current_token().map(|t| t.expires_at()) else {
            self.fail(&Error::channel_closed("no token to reconnect with"));
            return false;
        };
        log::warn!(
            "Transport lost ({}), reconnecting channel {} with {} requests pending",
            error,
            self.channel_id(),
            self.pending.len()
        );

        let mut schedule = ReconnectSchedule::new();
        loop {
            let delay = schedule.next_delay();
            let attempt = async {
                sleep(delay).await;
                let transport = self.connector.connect().await?;
                self.start_io(transport);
                self.handshake(SecurityTokenRequestType::Renew).await
            };

            tokio::select! {
                outcome = attempt => match outcome {
                    Ok(()) => {
                        if let Err(e) = self.state.transition(ChannelState::Open) {
                            self.fail(&e);
                            return false;
                        }
                        log::info!(
                            "Reconnected channel {} after {} attempts",
                            self.channel_id(),
                            schedule.attempts()
                        );
                        return true;
                    }
                    Err(e) if is_transport_fault(&e) || e.status() == StatusCode::BadTimeout => {
                        log::warn!("Reconnect attempt {} failed: {}", schedule.attempts(), e);
                        self.stop_io();
                    }
                    Err(e) => {
                        self.fail(&e);
                        return false;
                    }
                },
                _ = sleep_until(expires_at) => {
                    self.fail(&Error::channel_closed(
                        "token expired before the channel reconnected",
                    ));
                    return false;
                }
            }
        }
    }
}

async fn read_loop(
    inner: Arc<Inner>,
    mut source: Box<dyn FrameSource>,
    generation: u64,
    events: Option<EventSender>,
) {
    loop {
        let frame = match source.read_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("Connection {} read failed: {}", generation, e);
                inner.abort_handshake(&e);
                report(&events, Event::TransportLost { generation, error: e });
                return;
            }
        };
        if let Err(e) = inner.receive(frame) {
            log::error!("Rejected incoming chunk: {}", e);
            inner.abort_handshake(&e);
            report(&events, Event::Fatal { generation, error: e });
            return;
        }
    }
}

async fn write_loop(
    inner: Arc<Inner>,
    mut sink: Box<dyn FrameSink>,
    generation: u64,
    events: Option<EventSender>,
) {
    let queue = Arc::clone(&inner.queue_rx);
    let mut queue = queue.lock().await;
    // The previous writer released the queue, so whatever it left is dead
    inner.fail_interrupted();
    while let Some(mut item) = queue.recv().await {
        if !item.write.begin() {
            log::trace!(
                "Skipping request {} in state {:?}",
                item.request_id,
                item.write.state()
            );
            item.acknowledge(Err(Error::channel_closed("write withdrawn")));
            continue;
        }

        let frame = match inner.protect(&item) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Cannot send request {}: {}", item.request_id, e);
                inner.pending.complete(item.request_id, Err(e.clone()));
                item.write.fail();
                item.acknowledge(Err(e));
                continue;
            }
        };

        *inner.writing.lock() = Some(InFlight {
            request_id: item.request_id,
            write: Arc::clone(&item.write),
        });
        let written = sink.write_frame(frame).await;
        *inner.writing.lock() = None;

        match written {
            Ok(()) => {
                if item.write.written().is_err() {
                    log::trace!("Request {} failed while writing", item.request_id);
                }
                item.acknowledge(Ok(()));
            }
            Err(e) => {
                log::debug!("Connection {} write failed: {}", generation, e);
                inner.pending.complete(item.request_id, Err(e.clone()));
                item.write.fail();
                item.acknowledge(Err(e.clone()));
                inner.abort_handshake(&e);
                report(&events, Event::TransportLost { generation, error: e });
                return;
            }
        }
    }
}

async fn supervise(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<Event>) {
    let mut housekeeping = tokio::time::interval(inner.settings.housekeeping_interval);
    housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let renew_at = inner.current_token().map(|t| t.renew_at());
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    Event::TransportLost { generation, error }
                        if generation == inner.generation() =>
                    {
                        if !inner.recover(error).await {
                            break;
                        }
                    }
                    Event::Fatal { generation, error } if generation == inner.generation() => {
                        inner.fail(&error);
                        break;
                    }
                    event => log::trace!("Ignoring event of an old connection: {:?}", event),
                }
            }
            _ = until(renew_at) => {
                if let Err(e) = inner.handshake(SecurityTokenRequestType::Renew).await {
                    if is_transport_fault(&e) {
                        if !inner.recover(e).await {
                            break;
                        }
                    } else {
                        log::error!("Token renewal failed: {}", e);
                        inner.fail(&e);
                        break;
                    }
                }
            }
            _ = housekeeping.tick() => {
                let expired = inner.pending.expire(inner.settings.operation_timeout);
                if expired > 0 {
                    log::debug!("Expired {} requests", expired);
                }
                if let Some(tokens) = inner.tokens.write().as_mut() {
                    tokens.prune();
                }
            }
        }
    }
    log::debug!("Supervisor of channel {} stopped", inner.channel_id());
}

/// Handle to a submitted request
#[derive(Debug, Clone)]
pub struct ServiceCall {
    request_id: u32,
    write: Arc<WriteOperation>,
    result: AsyncResult<ServiceResponse>,
    channel: Weak<Inner>,
}

impl ServiceCall {
    /// Request id in the sequence header
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Result completing with the response
    pub fn result(&self) -> &AsyncResult<ServiceResponse> {
        &self.result
    }

    /// Progress of the request onto the wire
    pub fn write_state(&self) -> WriteState {
        self.write.state()
    }

    /// Await the response for at most `timeout`
    pub async fn wait(&self, timeout: Duration) -> Result<ServiceResponse> {
        self.result.wait(timeout).await
    }

    /// Withdraw the request before it is written
    ///
    /// Returns false once writing has started. A canceled request completes
    /// with `BadRequestCancelledByClient`.
    pub fn cancel(&self) -> bool {
        if !self.write.cancel() {
            return false;
        }
        let error = Error::new(
            StatusCode::BadRequestCancelledByClient,
            format!("request {} canceled", self.request_id),
        );
        let pending = self
            .channel
            .upgrade()
            .and_then(|inner| inner.pending.remove(self.request_id));
        match pending {
            Some(pending) => {
                pending.read.attempt_fail(error);
            }
            None => {
                self.result.attempt_error(error);
            }
        }
        log::debug!("Canceled request {}", self.request_id);
        true
    }
}

/// Client end of a secure channel
pub struct SecureChannel {
    inner: Arc<Inner>,
}

impl SecureChannel {
    /// Create a closed channel using the built-in policies and providers
    ///
    /// `local` is this client's identity and `server` the certificate of the
    /// server; both are required unless the policy is None.
    pub fn new(
        settings: ChannelSettings,
        local: Option<KeyPair>,
        server: Option<Certificate>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        Self::with_registries(
            settings,
            local,
            server,
            connector,
            &PolicyRegistry::shared(),
            &ProviderRegistry::builtin(),
        )
    }

    /// Create a closed channel resolving policy and provider in the given registries
    pub fn with_registries(
        settings: ChannelSettings,
        local: Option<KeyPair>,
        server: Option<Certificate>,
        connector: Arc<dyn Connector>,
        policies: &PolicyRegistry,
        providers: &ProviderRegistry,
    ) -> Result<Self> {
        let policy = policies.get(&settings.policy_uri)?;
        let mode = SecurityMode::new(policy, settings.security_mode)?;
        let security = SecurityConfiguration::new(mode, local, server)?;
        let provider = providers.get(&settings.provider)?;
        let (queue, queue_rx) = mpsc::unbounded_channel();

        log::debug!(
            "Created channel with policy {} mode {} provider {}",
            settings.policy_uri,
            settings.security_mode,
            provider.name()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                security,
                provider,
                connector,
                state: StateMachine::new(),
                disposed: AtomicBool::new(false),
                channel_id: AtomicU32::new(0),
                tokens: RwLock::new(None),
                pending: PendingTable::new(),
                next_request_id: AtomicU32::new(1),
                handshake: Mutex::new(None),
                send_sequence: Mutex::new(SequenceCounter::new()),
                recv_sequence: Mutex::new(SequenceValidator::new()),
                queue,
                queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
                writing: Mutex::new(None),
                events: Mutex::new(None),
                generation: AtomicU64::new(0),
                io_tasks: Mutex::new(Vec::new()),
                supervisor: Mutex::new(None),
            }),
        })
    }

    /// Channel settings
    pub fn settings(&self) -> &ChannelSettings {
        &self.inner.settings
    }

    /// Lifecycle state
    pub fn state(&self) -> ChannelState {
        self.inner.state.current()
    }

    /// Channel id assigned by the server, 0 before the first open
    pub fn channel_id(&self) -> u32 {
        self.inner.channel_id()
    }

    /// Id of the token protecting new messages
    pub fn token_id(&self) -> Option<u32> {
        self.inner.current_token().map(|t| t.token_id())
    }

    /// Number of requests waiting for a response
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Connect and negotiate the first token
    ///
    /// Only legal from `Closed`; any other state is `BadInternalError`.
    pub async fn open(&self) -> Result<()> {
        let inner = &self.inner;
        inner.check_disposed()?;
        if !inner
            .state
            .transition_from(ChannelState::Closed, ChannelState::Opening)
        {
            return Err(Error::internal(format!(
                "cannot open a channel that is {}",
                inner.state.current()
            )));
        }

        inner.pending.reopen();
        *inner.recv_sequence.lock() = SequenceValidator::new();
        let (events, events_rx) = mpsc::unbounded_channel();
        *inner.events.lock() = Some(events);

        let opened = async {
            let transport = inner.connector.connect().await?;
            inner.start_io(transport);
            inner.handshake(SecurityTokenRequestType::Issue).await
        }
        .await;

        if let Err(e) = opened {
            log::error!("Opening channel failed: {}", e);
            inner.teardown(&e);
            inner.state.transition(ChannelState::Closed)?;
            return Err(e);
        }

        inner.state.transition(ChannelState::Open)?;
        let supervisor = tokio::spawn(supervise(Arc::clone(inner), events_rx));
        *inner.supervisor.lock() = Some(supervisor);
        log::info!(
            "Opened channel {} ({} {})",
            inner.channel_id(),
            inner.security.mode().policy().uri,
            inner.security.mode().message_mode()
        );
        Ok(())
    }

    /// Submit a request and get a handle to it
    ///
    /// Fails with `BadSecureChannelClosed` unless the channel is open.
    pub fn submit(&self, request: ServiceRequest) -> Result<ServiceCall> {
        let inner = &self.inner;
        inner.check_disposed()?;
        let state = inner.state.current();
        if state != ChannelState::Open {
            return Err(Error::channel_closed(format!("channel is {}", state)));
        }

        let request_id = inner.next_request_id();
        let pending = Arc::new(PendingRequest::new(request_id));
        inner.pending.insert(Arc::clone(&pending))?;
        if let Err(e) = inner.enqueue(
            MessageType::Message,
            request_id,
            request.to_body(),
            Arc::clone(&pending.write),
            None,
        ) {
            inner.pending.complete(request_id, Err(e.clone()));
            return Err(e);
        }
        log::trace!("Queued request {} (type {})", request_id, request.type_id);

        Ok(ServiceCall {
            request_id,
            write: Arc::clone(&pending.write),
            result: pending.result().clone(),
            channel: Arc::downgrade(inner),
        })
    }

    /// Submit a request; submission errors complete the result immediately
    pub fn service_request_async(&self, request: ServiceRequest) -> AsyncResult<ServiceResponse> {
        match self.submit(request) {
            Ok(call) => call.result,
            Err(e) => AsyncResult::failed(e),
        }
    }

    /// Submit a request and await its response within the operation timeout
    pub async fn service_request(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        self.service_request_async(request)
            .wait(self.inner.settings.operation_timeout)
            .await
    }

    /// Submit a request and block the calling thread for its response
    ///
    /// Must not be called from an async context.
    pub fn service_request_blocking(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        self.service_request_async(request)
            .wait_for_result_timeout(self.inner.settings.operation_timeout)
    }

    /// Close the channel
    ///
    /// Sends a best effort close message and fails every pending request
    /// with `BadSecureChannelClosed`. Closing a closed channel does nothing.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        inner.check_disposed()?;
        let previous = inner.state.current();
        if previous == ChannelState::Closed || !inner.state.try_transition(ChannelState::Closing) {
            return Ok(());
        }

        if let Some(supervisor) = inner.supervisor.lock().take() {
            supervisor.abort();
        }
        if previous == ChannelState::Open {
            self.send_close().await;
        }

        inner.teardown(&Error::channel_closed("closed by the client"));
        inner.state.transition(ChannelState::Closed)?;
        log::info!("Closed channel {}", inner.channel_id());
        Ok(())
    }

    async fn send_close(&self) {
        let inner = &self.inner;
        let write = Arc::new(WriteOperation::new());
        let (ack, done) = oneshot::channel();
        let body = encode_body(CLOSE_SECURE_CHANNEL_REQUEST, &[]);
        let request_id = inner.next_request_id();
        if let Err(e) = inner.enqueue(
            MessageType::Close,
            request_id,
            body,
            Arc::clone(&write),
            Some(ack),
        ) {
            log::debug!("Close message not queued: {}", e);
            return;
        }

        match tokio::time::timeout(inner.settings.close_timeout, done).await {
            Ok(Ok(Ok(()))) => log::debug!("Sent close for channel {}", inner.channel_id()),
            Ok(Ok(Err(e))) => log::debug!("Close message not sent: {}", e),
            _ => {
                write.fail();
                log::debug!("Close message not sent within {:?}", inner.settings.close_timeout);
            }
        }
    }

    /// Close and release the channel; every later call fails with `BadInternalError`
    pub async fn dispose(&self) -> Result<()> {
        self.close().await?;
        self.inner.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        if let Some(supervisor) = self.inner.supervisor.lock().take() {
            supervisor.abort();
        }
        self.inner
            .pending
            .close(&Error::channel_closed("channel dropped"));
        self.inner.stop_io();
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("channel_id", &self.channel_id())
            .field("state", &self.state())
            .field("policy", &self.inner.security.mode().policy().uri)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RequestChannel for SecureChannel {
    fn request_async(&self, request: ServiceRequest) -> AsyncResult<ServiceResponse> {
        self.service_request_async(request)
    }

    fn operation_timeout(&self) -> Duration {
        self.inner.settings.operation_timeout
    }
}
