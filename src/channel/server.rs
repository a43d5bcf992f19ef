//! Server secure channel
//!
//! A [`ServerSecureChannel`] answers one client. It validates open and renew
//! requests against its endpoint binding and trust list, issues tokens and
//! passes decoded service requests to a [`ServiceHandler`]. Each request is
//! handled on its own task, so responses are written in completion order,
//! each under the token the request arrived with.
//!
//! Channel state outlives the connection: [`ServerSecureChannel::serve`] may
//! be called again with a new transport after a loss, and responses that
//! could not be written meanwhile are delivered first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::config::ServerSettings;
use super::protection::{
    decode_asymmetric, decode_symmetric, encode_asymmetric, encode_error, encode_symmetric,
    AsymmetricHeaders, SizeLimit,
};
use super::sequence::{SequenceCounter, SequenceValidator};
use super::tokens::TokenSet;
use crate::crypto::{
    Certificate, CryptoProvider, KeyPair, PolicyRegistry, ProviderRegistry, SecurityToken,
    TokenParams,
};
use crate::message::body::{
    ChannelSecurityToken, OpenSecureChannelRequest, OpenSecureChannelResponse,
    SecurityTokenRequestType, ServiceFault, OPEN_SECURE_CHANNEL_REQUEST, PROTOCOL_VERSION,
};
use crate::message::header::{MessageHeader, MessageType, SequenceHeader};
use crate::security::SecurityMode;
use crate::service::{ServiceHandler, ServiceRequest, ServiceResponse};
use crate::status::{Error, Result, StatusCode};
use crate::transport::{FrameSink, Transport};

static NEXT_CHANNEL_ID: AtomicU32 = AtomicU32::new(1);

fn allocate_channel_id() -> u32 {
    loop {
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Client certificates the server accepts
#[derive(Debug, Clone, Default)]
pub struct TrustList {
    certificates: Vec<Certificate>,
}

impl TrustList {
    /// Trust exactly these certificates
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    /// Trust one more certificate
    pub fn add(&mut self, certificate: Certificate) {
        self.certificates.push(certificate);
    }

    /// Trusted certificate with this encoding
    pub fn find(&self, der: &[u8]) -> Option<&Certificate> {
        self.certificates
            .iter()
            .find(|c| c.as_bytes().as_ref() == der)
    }

    /// Number of trusted certificates
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// True when no client can be trusted
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// Security state established by the first open
#[derive(Debug, Clone)]
struct Session {
    mode: SecurityMode,
    client_certificate: Option<Certificate>,
    tokens: TokenSet,
}

/// Outcome of one incoming chunk
enum Received {
    Continue,
    Closed,
}

/// A validated open or renew request
struct OpenRequest {
    mode: SecurityMode,
    client_certificate: Option<Certificate>,
    sequence: SequenceHeader,
    request: OpenSecureChannelRequest,
}

/// The sink of the connection being served
struct Attached {
    connection: u64,
    sink: Box<dyn FrameSink>,
}

struct ServerInner {
    settings: ServerSettings,
    key_pair: Option<KeyPair>,
    trust_list: TrustList,
    policies: Arc<PolicyRegistry>,
    provider: Arc<dyn CryptoProvider>,
    channel_id: u32,

    session: RwLock<Option<Session>>,
    next_token_id: AtomicU32,
    send_sequence: Mutex<SequenceCounter>,
    recv_sequence: Mutex<SequenceValidator>,

    writer: tokio::sync::Mutex<Option<Attached>>,
    connections: AtomicU64,
    /// Responses produced while no transport was attached
    outbox: Mutex<VecDeque<Bytes>>,
    disconnect: watch::Sender<u64>,
}

impl ServerInner {
    fn next_token_id(&self) -> u32 {
        loop {
            let id = self.next_token_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Protect and write a frame, assigning its sequence number under the writer lock
    ///
    /// Frames that cannot be written are kept for the next connection.
    async fn send<F>(&self, protect: F) -> Result<()>
    where
        F: FnOnce(SequenceHeader) -> Result<Bytes>,
        F: Send,
    {
        let mut writer = self.writer.lock().await;
        let sequence_number = self.send_sequence.lock().next();
        let frame = protect(SequenceHeader {
            sequence_number,
            request_id: 0,
        })?;

        match writer.as_mut() {
            Some(attached) => {
                if let Err(e) = attached.sink.write_frame(frame.clone()).await {
                    log::debug!("Write failed, keeping response for the next connection: {}", e);
                    *writer = None;
                    self.outbox.lock().push_back(frame);
                }
            }
            None => self.outbox.lock().push_back(frame),
        }
        Ok(())
    }

    /// Write a service response under the token its request used
    async fn respond(&self, token: Arc<SecurityToken>, request_id: u32, response: ServiceResponse) {
        let mode = match self.session.read().as_ref() {
            Some(session) => session.mode.clone(),
            None => {
                log::debug!("Dropping response {}, channel closed", request_id);
                return;
            }
        };
        let limit = SizeLimit::response(self.settings.max_message_size);
        let protect = |body: Bytes| {
            let token = Arc::clone(&token);
            let mode = mode.clone();
            move |sequence: SequenceHeader| {
                encode_symmetric(
                    &*self.provider,
                    &mode,
                    &token,
                    MessageType::Message,
                    SequenceHeader {
                        request_id,
                        ..sequence
                    },
                    &body,
                    limit,
                )
            }
        };

        let sent = match self.send(protect(response.to_body())).await {
            Err(e) if e.status() == StatusCode::BadResponseTooLarge => {
                log::warn!("Response to request {} too large: {}", request_id, e);
                let fault = ServiceResponse::fault(&ServiceFault::from(&e));
                self.send(protect(fault.to_body())).await
            }
            sent => sent,
        };
        if let Err(e) = sent {
            log::error!("Cannot send response to request {}: {}", request_id, e);
        }
    }

    fn receive_open(&self, frame: &Bytes) -> Result<OpenRequest> {
        let headers = AsymmetricHeaders::decode(frame)?;
        let uri = &headers.security.policy_uri;
        if !self.settings.endpoint.accepts_policy(uri) {
            return Err(Error::new(
                StatusCode::BadSecurityPolicyRejected,
                format!("policy {} not offered by {}", uri, self.settings.endpoint.url),
            ));
        }
        let policy = self.policies.get(uri)?;

        let client_certificate = if policy.is_none() {
            None
        } else {
            let local = self.key_pair.as_ref().ok_or_else(|| {
                Error::new(StatusCode::BadCertificateInvalid, "server has no key pair")
            })?;
            let thumbprint = local.certificate.thumbprint();
            if headers.security.receiver_thumbprint.as_deref() != Some(&thumbprint[..]) {
                return Err(Error::new(
                    StatusCode::BadCertificateInvalid,
                    "request encrypted for another certificate",
                ));
            }
            let der = headers.security.sender_certificate.as_ref().ok_or_else(|| {
                Error::new(StatusCode::BadCertificateInvalid, "request carries no certificate")
            })?;
            let certificate = self.trust_list.find(der).cloned().ok_or_else(|| {
                Error::new(
                    StatusCode::BadCertificateUntrusted,
                    "client certificate is not trusted",
                )
            })?;
            certificate.check_time_valid(Utc::now())?;
            policy.check_key_length(certificate.public_key().bit_length())?;
            Some(certificate)
        };

        let (sequence, body) = decode_asymmetric(
            &*self.provider,
            &policy,
            self.key_pair.as_ref(),
            client_certificate.as_ref().map(Certificate::public_key),
            &headers,
            frame,
        )?;

        let request = ServiceRequest::from_body(body)?;
        if request.type_id != OPEN_SECURE_CHANNEL_REQUEST {
            return Err(Error::new(
                StatusCode::BadRequestTypeInvalid,
                format!("type {} in an open chunk", request.type_id),
            ));
        }
        let request = OpenSecureChannelRequest::decode(&mut request.body.clone())?;
        if !self.settings.endpoint.accepts(uri, request.security_mode) {
            return Err(Error::new(
                StatusCode::BadSecurityModeRejected,
                format!("mode {} not offered with {}", request.security_mode, uri),
            ));
        }
        let mode = SecurityMode::new(policy, request.security_mode)?;

        if request.request_type == SecurityTokenRequestType::Renew {
            let session = self.session.read();
            let Some(session) = session.as_ref() else {
                return Err(Error::new(
                    StatusCode::BadSecureChannelIdInvalid,
                    "renew without an open channel",
                ));
            };
            if headers.header.channel_id != self.channel_id {
                return Err(Error::new(
                    StatusCode::BadSecureChannelIdInvalid,
                    format!("renew for channel {}", headers.header.channel_id),
                ));
            }
            if session.mode.policy().uri != mode.policy().uri
                || session.mode.message_mode() != mode.message_mode()
            {
                return Err(Error::new(
                    StatusCode::BadSecurityPolicyRejected,
                    "renew changes the security of the channel",
                ));
            }
            if session.client_certificate.as_ref().map(Certificate::as_bytes)
                != client_certificate.as_ref().map(Certificate::as_bytes)
            {
                return Err(Error::new(
                    StatusCode::BadCertificateInvalid,
                    "renew from another client certificate",
                ));
            }
        }

        Ok(OpenRequest {
            mode,
            client_certificate,
            sequence,
            request,
        })
    }

    async fn handle_open(&self, frame: Bytes) -> Result<()> {
        let OpenRequest {
            mode,
            client_certificate,
            sequence,
            request,
        } = self.receive_open(&frame)?;
        let renewing = request.request_type == SecurityTokenRequestType::Renew;
        if !renewing {
            *self.recv_sequence.lock() = SequenceValidator::new();
        }
        self.recv_sequence.lock().check(sequence.sequence_number)?;

        let policy = mode.policy().clone();
        let nonce = self.provider.random_bytes(policy.nonce_length);
        let params = TokenParams {
            channel_id: self.channel_id,
            token_id: self.next_token_id(),
            created_at: Utc::now(),
            lifetime: self.settings.revise_lifetime(request.requested_lifetime),
        };
        let token = SecurityToken::derive(
            &*self.provider,
            &policy,
            params,
            &nonce,
            &request.client_nonce,
        )?;

        {
            let mut session = self.session.write();
            if renewing {
                let session = session.as_mut().ok_or_else(|| {
                    Error::new(StatusCode::BadSecureChannelIdInvalid, "channel closed during renew")
                })?;
                session.tokens.activate(token);
            } else {
                *session = Some(Session {
                    mode,
                    client_certificate: client_certificate.clone(),
                    tokens: TokenSet::new(token),
                });
            }
        }
        log::info!(
            "{} token {} on channel {}, lifetime {} ms",
            if renewing { "Renewed" } else { "Issued" },
            params.token_id,
            self.channel_id,
            params.lifetime.as_millis()
        );

        let response = OpenSecureChannelResponse {
            server_protocol_version: PROTOCOL_VERSION,
            security_token: ChannelSecurityToken {
                channel_id: self.channel_id,
                token_id: params.token_id,
                created_at: params.created_at,
                revised_lifetime: params.lifetime,
            },
            server_nonce: Bytes::from(nonce),
        };
        let body = response.to_body();
        let limit = SizeLimit::response(self.settings.max_message_size);
        self.send(|header| {
            encode_asymmetric(
                &*self.provider,
                &policy,
                self.key_pair.as_ref(),
                client_certificate.as_ref(),
                self.channel_id,
                SequenceHeader {
                    request_id: sequence.request_id,
                    ..header
                },
                &body,
                limit,
            )
        })
        .await
    }

    fn receive_symmetric(
        &self,
        frame: Bytes,
    ) -> Result<(Arc<SecurityToken>, SequenceHeader, Bytes)> {
        // Snapshot, so no lock is held while verifying
        let (mode, tokens) = match self.session.read().as_ref() {
            Some(session) => (session.mode.clone(), session.tokens.clone()),
            None => {
                return Err(Error::new(
                    StatusCode::BadSecureChannelIdInvalid,
                    "message before the channel was opened",
                ))
            }
        };
        let chunk = decode_symmetric(&*self.provider, &mode, &tokens, frame)?;
        self.recv_sequence
            .lock()
            .check(chunk.sequence.sequence_number)?;
        Ok((chunk.token, chunk.sequence, chunk.body))
    }

    /// Forget the tokens and any undelivered responses
    fn end_session(&self) {
        *self.session.write() = None;
        let dropped = {
            let mut outbox = self.outbox.lock();
            let dropped = outbox.len();
            outbox.clear();
            dropped
        };
        if dropped > 0 {
            log::debug!("Dropped {} undelivered responses of channel {}", dropped, self.channel_id);
        }
    }

    fn prune_tokens(&self) {
        if let Some(session) = self.session.write().as_mut() {
            session.tokens.prune();
        }
    }
}

/// Server end of a secure channel
#[derive(Clone)]
pub struct ServerSecureChannel {
    inner: Arc<ServerInner>,
}

impl ServerSecureChannel {
    /// Create a channel using the built-in policies and providers
    ///
    /// `key_pair` is the server identity, required by every policy but None.
    /// Clients must present a certificate from `trust_list`.
    pub fn new(
        settings: ServerSettings,
        key_pair: Option<KeyPair>,
        trust_list: TrustList,
    ) -> Result<Self> {
        Self::with_registries(
            settings,
            key_pair,
            trust_list,
            PolicyRegistry::shared(),
            &ProviderRegistry::builtin(),
        )
    }

    /// Create a channel resolving policies and provider in the given registries
    pub fn with_registries(
        settings: ServerSettings,
        key_pair: Option<KeyPair>,
        trust_list: TrustList,
        policies: Arc<PolicyRegistry>,
        providers: &ProviderRegistry,
    ) -> Result<Self> {
        for binding in &settings.endpoint.modes {
            let policy = policies.get(&binding.policy_uri)?;
            SecurityMode::new(policy.clone(), binding.mode)?;
            if !policy.is_none() {
                let key_pair = key_pair.as_ref().ok_or_else(|| {
                    Error::new(
                        StatusCode::BadCertificateInvalid,
                        format!("policy {} requires a server key pair", policy.uri),
                    )
                })?;
                policy.check_key_length(key_pair.private_key.bit_length())?;
            }
        }
        let provider = providers.get(&settings.provider)?;
        let (disconnect, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(ServerInner {
                settings,
                key_pair,
                trust_list,
                policies,
                provider,
                channel_id: allocate_channel_id(),
                session: RwLock::new(None),
                next_token_id: AtomicU32::new(1),
                send_sequence: Mutex::new(SequenceCounter::new()),
                recv_sequence: Mutex::new(SequenceValidator::new()),
                writer: tokio::sync::Mutex::new(None),
                connections: AtomicU64::new(0),
                outbox: Mutex::new(VecDeque::new()),
                disconnect,
            }),
        })
    }

    /// Channel id handed to the client
    pub fn channel_id(&self) -> u32 {
        self.inner.channel_id
    }

    /// Id of the newest token, if the channel is open
    pub fn current_token_id(&self) -> Option<u32> {
        self.inner
            .session
            .read()
            .as_ref()
            .map(|s| s.tokens.current().token_id())
    }

    /// True once a client opened the channel and until it closes it
    pub fn is_open(&self) -> bool {
        self.inner.session.read().is_some()
    }

    /// Responses waiting for a connection
    pub fn queued_responses(&self) -> usize {
        self.inner.outbox.lock().len()
    }

    /// Drop the transport currently being served
    ///
    /// The channel stays open; a client may reconnect and renew.
    pub fn disconnect(&self) {
        self.inner.disconnect.send_modify(|epoch| *epoch += 1);
    }

    /// Serve one connection until it ends
    ///
    /// Returns `Ok` when the client closes the channel. Transport loss is
    /// returned as an error and leaves the channel open for the next
    /// connection. Protocol and security faults close the channel: they are
    /// reported to the client with an `ERR` message, then returned.
    pub async fn serve(
        &self,
        transport: Transport,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<()> {
        let Transport { mut source, sink } = transport;
        let mut disconnect = self.inner.disconnect.subscribe();
        let connection = self.attach(sink).await?;

        loop {
            let frame = tokio::select! {
                frame = source.read_frame() => frame,
                _ = disconnect.changed() => {
                    log::info!("Dropping connection of channel {}", self.inner.channel_id);
                    self.detach(connection).await;
                    return Err(Error::new(
                        StatusCode::BadConnectionClosed,
                        "disconnected by the server",
                    ));
                }
            };

            let outcome = match frame {
                Ok(frame) => self.receive(frame, &handler).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(Received::Continue) => {}
                Ok(Received::Closed) => {
                    log::info!("Client closed channel {}", self.inner.channel_id);
                    self.inner.end_session();
                    self.detach(connection).await;
                    return Ok(());
                }
                Err(e) if matches!(
                    e.status(),
                    StatusCode::BadConnectionClosed | StatusCode::BadCommunicationError
                ) =>
                {
                    log::info!("Connection of channel {} lost: {}", self.inner.channel_id, e);
                    self.detach(connection).await;
                    return Err(e);
                }
                Err(e) => {
                    log::error!("Channel {} failed: {}", self.inner.channel_id, e);
                    self.inner.end_session();
                    self.report(&e, connection).await;
                    return Err(e);
                }
            }
        }
    }

    /// Install a sink and deliver what accumulated without one
    async fn attach(&self, sink: Box<dyn FrameSink>) -> Result<u64> {
        let connection = self.inner.connections.fetch_add(1, Ordering::SeqCst) + 1;
        let mut writer = self.inner.writer.lock().await;
        let attached = writer.insert(Attached { connection, sink });
        loop {
            let Some(frame) = self.inner.outbox.lock().pop_front() else {
                break;
            };
            if let Err(e) = attached.sink.write_frame(frame.clone()).await {
                self.inner.outbox.lock().push_front(frame);
                *writer = None;
                return Err(e);
            }
        }
        log::debug!("Attached connection {} to channel {}", connection, self.inner.channel_id);
        Ok(connection)
    }

    /// Take the sink of `connection`, unless a newer connection replaced it
    async fn take_sink(&self, connection: u64) -> Option<Box<dyn FrameSink>> {
        let mut writer = self.inner.writer.lock().await;
        match writer.as_ref() {
            Some(attached) if attached.connection == connection => {
                writer.take().map(|attached| attached.sink)
            }
            _ => None,
        }
    }

    async fn detach(&self, connection: u64) {
        if let Some(mut sink) = self.take_sink(connection).await {
            if let Err(e) = sink.close().await {
                log::debug!("Closing transport failed: {}", e);
            }
        }
    }

    /// Send an unprotected error message and drop the connection
    async fn report(&self, error: &Error, connection: u64) {
        let mut payload = BytesMut::new();
        ServiceFault::from(error).encode(&mut payload);
        let frame = encode_error(self.inner.channel_id, &payload);
        if let Some(mut sink) = self.take_sink(connection).await {
            if let Err(e) = sink.write_frame(frame).await {
                log::debug!("Error message not sent: {}", e);
            }
            if let Err(e) = sink.close().await {
                log::debug!("Closing transport failed: {}", e);
            }
        }
    }

    async fn receive(&self, frame: Bytes, handler: &Arc<dyn ServiceHandler>) -> Result<Received> {
        let header = MessageHeader::decode(&mut frame.clone())?;
        match header.message_type {
            MessageType::Open => {
                self.inner.handle_open(frame).await?;
                Ok(Received::Continue)
            }
            MessageType::Message => {
                let (token, sequence, body) = self.inner.receive_symmetric(frame)?;
                let request = ServiceRequest::from_body(body)?;
                log::trace!(
                    "Request {} (type {}) under token {}",
                    sequence.request_id,
                    request.type_id,
                    token.token_id()
                );

                let inner = Arc::clone(&self.inner);
                let handler = Arc::clone(handler);
                tokio::spawn(async move {
                    let response = match handler.handle(request).await {
                        Ok(response) => response,
                        Err(e) => {
                            log::debug!("Request {} failed: {}", sequence.request_id, e);
                            ServiceResponse::fault(&ServiceFault::from(&e))
                        }
                    };
                    inner.respond(token, sequence.request_id, response).await;
                });
                self.inner.prune_tokens();
                Ok(Received::Continue)
            }
            MessageType::Close => {
                self.inner.receive_symmetric(frame)?;
                Ok(Received::Closed)
            }
            MessageType::Error => Err(Error::new(
                StatusCode::BadTcpMessageTypeInvalid,
                "client sent an error message",
            )),
        }
    }
}

impl std::fmt::Debug for ServerSecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSecureChannel")
            .field("channel_id", &self.inner.channel_id)
            .field("endpoint", &self.inner.settings.endpoint.url)
            .field("open", &self.is_open())
            .finish()
    }
}
