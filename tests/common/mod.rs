//! Fixtures shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::RsaPrivateKey;
use tokio::time::Instant;

use uasc_rs::channel::{
    ChannelSettings, EndpointBinding, SecureChannel, SecurityModeBinding, ServerSecureChannel,
    ServerSettings, TrustList,
};
use uasc_rs::crypto::{Certificate, KeyPair, PrivateKey, PublicKey, POLICY_URI_BASIC128RSA15};
use uasc_rs::security::MessageSecurityMode;
use uasc_rs::service::{ServiceHandler, ServiceRequest, ServiceResponse};
use uasc_rs::transport::{Connector, FrameSink, StreamTransport, Transport};
use uasc_rs::{Error, Result, StatusCode};

pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Request type answered by [`EchoHandler`]
pub const ECHO_REQUEST: u32 = 1000;

/// Response type of [`EchoHandler`]
pub const ECHO_RESPONSE: u32 = 1003;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn generate(seed: u64) -> KeyPair {
    let mut rng = StdRng::seed_from_u64(seed);
    let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let public = private.to_public_key();
    let der = public.to_pkcs1_der().unwrap().as_bytes().to_vec();
    KeyPair::new(
        Certificate::new(der, PublicKey::new(public)),
        PrivateKey::new(private),
    )
    .unwrap()
}

pub fn client_key_pair() -> KeyPair {
    static PAIR: OnceLock<KeyPair> = OnceLock::new();
    PAIR.get_or_init(|| generate(0xc11e_0001)).clone()
}

pub fn server_key_pair() -> KeyPair {
    static PAIR: OnceLock<KeyPair> = OnceLock::new();
    PAIR.get_or_init(|| generate(0x5e4e_0002)).clone()
}

pub fn stranger_key_pair() -> KeyPair {
    static PAIR: OnceLock<KeyPair> = OnceLock::new();
    PAIR.get_or_init(|| generate(0x0bad_0003)).clone()
}

/// Echo request that the handler answers after `delay`
pub fn echo(delay: Duration, payload: &[u8]) -> ServiceRequest {
    let mut body = BytesMut::new();
    body.put_u32_le(delay.as_millis() as u32);
    body.put_slice(payload);
    ServiceRequest::new(ECHO_REQUEST, body.freeze())
}

/// Payload of an echo response
pub fn echoed(response: &ServiceResponse) -> Bytes {
    assert_eq!(response.type_id, ECHO_RESPONSE);
    response.body.slice(4..)
}

/// Answers echo requests after the delay they carry
#[derive(Debug, Default)]
pub struct EchoHandler {
    pub handled: AtomicUsize,
}

#[async_trait]
impl ServiceHandler for EchoHandler {
    async fn handle(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        if request.type_id != ECHO_REQUEST {
            return Err(Error::new(
                StatusCode::BadServiceUnsupported,
                format!("no service {}", request.type_id),
            ));
        }
        let mut body = request.body.clone();
        if body.remaining() < 4 {
            return Err(Error::decoding("echo request without delay"));
        }
        let delay = Duration::from_millis(u64::from(body.get_u32_le()));
        tokio::time::sleep(delay).await;
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(ServiceResponse::new(ECHO_RESPONSE, request.body))
    }
}

/// Misbehaviour of the client's outgoing writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkFault {
    #[default]
    Healthy,

    /// Writes never complete
    Stall,

    /// The last byte of every `MSG` chunk is flipped
    Tamper,
}

/// Client sink applying the connector's current fault to each write
struct FaultySink {
    inner: Box<dyn FrameSink>,
    fault: Arc<Mutex<SinkFault>>,
}

#[async_trait]
impl FrameSink for FaultySink {
    async fn write_frame(&mut self, frame: Bytes) -> Result<()> {
        let fault = *self.fault.lock();
        match fault {
            SinkFault::Healthy => self.inner.write_frame(frame).await,
            SinkFault::Stall => std::future::pending().await,
            SinkFault::Tamper if frame.starts_with(b"MSG") => {
                let mut tampered = BytesMut::from(&frame[..]);
                let last = tampered.len() - 1;
                tampered[last] ^= 0xff;
                self.inner.write_frame(tampered.freeze()).await
            }
            SinkFault::Tamper => self.inner.write_frame(frame).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

/// In-memory connector serving every connection with one server channel
pub struct MemoryConnector {
    pub server: ServerSecureChannel,
    pub handler: Arc<EchoHandler>,
    stateful: bool,
    sink_fault: Arc<Mutex<SinkFault>>,
    /// Connection attempts to refuse before accepting again
    refuse: AtomicUsize,
    attempts: Mutex<Vec<Instant>>,
}

impl MemoryConnector {
    pub fn new(server: ServerSecureChannel, stateful: bool) -> Arc<Self> {
        Arc::new(Self {
            server,
            handler: Arc::new(EchoHandler::default()),
            stateful,
            sink_fault: Arc::new(Mutex::new(SinkFault::Healthy)),
            refuse: AtomicUsize::new(0),
            attempts: Mutex::new(Vec::new()),
        })
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Apply `fault` to client writes from now on, on every connection
    pub fn set_sink_fault(&self, fault: SinkFault) {
        *self.sink_fault.lock() = fault;
    }

    /// Times of every connection attempt
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Transport> {
        self.attempts.lock().push(Instant::now());
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::new(StatusCode::BadCommunicationError, "connection refused"));
        }

        let (client, server) = tokio::io::duplex(MAX_MESSAGE_SIZE);
        let channel = self.server.clone();
        let handler: Arc<dyn ServiceHandler> = self.handler.clone();
        tokio::spawn(async move {
            let transport = StreamTransport::new(server, MAX_MESSAGE_SIZE);
            if let Err(e) = channel.serve(transport, handler).await {
                log::debug!("Server connection ended: {}", e);
            }
        });
        let Transport { source, sink } = StreamTransport::new(client, MAX_MESSAGE_SIZE);
        let sink = FaultySink {
            inner: sink,
            fault: Arc::clone(&self.sink_fault),
        };
        Ok(Transport::new(source, Box::new(sink)))
    }

    fn is_stateful(&self) -> bool {
        self.stateful
    }
}

pub fn secured_server_settings() -> ServerSettings {
    ServerSettings {
        endpoint: EndpointBinding {
            url: "opc.tcp://localhost:4840".to_string(),
            modes: vec![
                SecurityModeBinding::new(POLICY_URI_BASIC128RSA15, MessageSecurityMode::Sign),
                SecurityModeBinding::new(
                    POLICY_URI_BASIC128RSA15,
                    MessageSecurityMode::SignAndEncrypt,
                ),
            ],
        },
        max_message_size: MAX_MESSAGE_SIZE,
        ..Default::default()
    }
}

pub fn secured_client_settings(mode: MessageSecurityMode) -> ChannelSettings {
    ChannelSettings {
        policy_uri: POLICY_URI_BASIC128RSA15.to_string(),
        security_mode: mode,
        max_message_size: MAX_MESSAGE_SIZE,
        ..Default::default()
    }
}

/// A Basic128Rsa15 server trusting the client identity
pub fn secured_server() -> ServerSecureChannel {
    ServerSecureChannel::new(
        secured_server_settings(),
        Some(server_key_pair()),
        TrustList::new(vec![client_key_pair().certificate]),
    )
    .unwrap()
}

/// A client and its connector to a fresh Basic128Rsa15 server
pub fn secured_pair(
    settings: ChannelSettings,
    stateful: bool,
) -> (SecureChannel, Arc<MemoryConnector>) {
    let connector = MemoryConnector::new(secured_server(), stateful);
    let channel = SecureChannel::new(
        settings,
        Some(client_key_pair()),
        Some(server_key_pair().certificate),
        connector.clone(),
    )
    .unwrap();
    (channel, connector)
}

/// A client and its connector to a fresh server without security
pub fn open_pair(settings: ChannelSettings) -> (SecureChannel, Arc<MemoryConnector>) {
    let server = ServerSecureChannel::new(
        ServerSettings {
            max_message_size: MAX_MESSAGE_SIZE,
            ..Default::default()
        },
        None,
        TrustList::default(),
    )
    .unwrap();
    let connector = MemoryConnector::new(server, false);
    let channel = SecureChannel::new(settings, None, None, connector.clone()).unwrap();
    (channel, connector)
}
