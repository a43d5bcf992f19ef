//! Service dispatch
//!
//! A secure channel moves opaque service bodies: a `u32` type id followed by
//! the encoded payload. [`RequestChannel`] is that untyped contract.
//! [`ChannelService`] puts typed messages on top of it through the
//! [`ServiceMessage`] and [`ServiceRequestType`] traits, surfacing service
//! faults as [`Error::ServiceFault`] and mismatched responses as
//! `BadUnknownResponse`.
//!
//! On the server side a [`ServiceHandler`] answers decoded requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::message::body::{decode_body, encode_body, ServiceFault, SERVICE_FAULT};
use crate::status::{Error, Result, StatusCode};
use crate::sync::AsyncResult;

/// An untyped service request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Encoding type id of the request
    pub type_id: u32,

    /// Encoded payload
    pub body: Bytes,
}

impl ServiceRequest {
    /// A request of service `type_id` with an encoded body
    pub fn new(type_id: u32, body: impl Into<Bytes>) -> Self {
        Self {
            type_id,
            body: body.into(),
        }
    }

    /// Encode a typed message
    pub fn from_message<M: ServiceMessage>(message: &M) -> Self {
        let mut buf = BytesMut::new();
        message.encode(&mut buf);
        Self::new(M::TYPE_ID, buf.freeze())
    }

    /// Message body including the type id
    pub fn to_body(&self) -> Bytes {
        encode_body(self.type_id, &self.body)
    }

    /// Split a message body into type id and payload
    pub fn from_body(body: Bytes) -> Result<Self> {
        let (type_id, body) = decode_body(body)?;
        Ok(Self { type_id, body })
    }
}

/// An untyped service response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    /// Encoding type id of the response
    pub type_id: u32,

    /// Encoded payload
    pub body: Bytes,
}

impl ServiceResponse {
    /// A response of type `type_id` with an encoded body
    pub fn new(type_id: u32, body: impl Into<Bytes>) -> Self {
        Self {
            type_id,
            body: body.into(),
        }
    }

    /// Encode a typed message
    pub fn from_message<M: ServiceMessage>(message: &M) -> Self {
        let mut buf = BytesMut::new();
        message.encode(&mut buf);
        Self::new(M::TYPE_ID, buf.freeze())
    }

    /// Response carrying a service fault
    pub fn fault(fault: &ServiceFault) -> Self {
        let mut buf = BytesMut::new();
        fault.encode(&mut buf);
        Self::new(SERVICE_FAULT, buf.freeze())
    }

    /// True if the response is a service fault
    pub fn is_fault(&self) -> bool {
        self.type_id == SERVICE_FAULT
    }

    /// Message body including the type id
    pub fn to_body(&self) -> Bytes {
        encode_body(self.type_id, &self.body)
    }

    /// Split a message body into type id and payload
    pub fn from_body(body: Bytes) -> Result<Self> {
        let (type_id, body) = decode_body(body)?;
        Ok(Self { type_id, body })
    }

    /// Decode into the expected message type
    ///
    /// Service faults become [`Error::ServiceFault`]; any other unexpected
    /// type id is `BadUnknownResponse`.
    pub fn decode<M: ServiceMessage>(self) -> Result<M> {
        let mut body = self.body;
        if self.type_id == SERVICE_FAULT {
            return Err(ServiceFault::decode(&mut body)?.into());
        }
        if self.type_id != M::TYPE_ID {
            return Err(Error::new(
                StatusCode::BadUnknownResponse,
                format!(
                    "expected response type {}, got {}",
                    M::TYPE_ID,
                    self.type_id
                ),
            ));
        }
        M::decode(&mut body)
    }
}

/// A message with a stable encoding type id
pub trait ServiceMessage: Sized + Clone + Send + 'static {
    /// Encoding type id
    const TYPE_ID: u32;

    /// Encode the payload
    fn encode(&self, buf: &mut BytesMut);

    /// Decode the payload
    fn decode(buf: &mut Bytes) -> Result<Self>;
}

/// A request message and the response it expects
pub trait ServiceRequestType: ServiceMessage {
    /// Response message type
    type Response: ServiceMessage;
}

/// Untyped request/response contract of a channel
#[async_trait]
pub trait RequestChannel: Send + Sync {
    /// Submit a request; the result completes with its response
    fn request_async(&self, request: ServiceRequest) -> AsyncResult<ServiceResponse>;

    /// Bound on waiting for a response
    fn operation_timeout(&self) -> Duration;

    /// Submit a request and wait for its response
    async fn request(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        let timeout = self.operation_timeout();
        self.request_async(request).wait(timeout).await
    }
}

#[async_trait]
impl<C: RequestChannel + ?Sized> RequestChannel for Arc<C> {
    fn request_async(&self, request: ServiceRequest) -> AsyncResult<ServiceResponse> {
        (**self).request_async(request)
    }

    fn operation_timeout(&self) -> Duration {
        (**self).operation_timeout()
    }
}

/// Typed calls over a [`RequestChannel`]
#[derive(Debug, Clone)]
pub struct ChannelService<C> {
    channel: C,
}

impl<C: RequestChannel> ChannelService<C> {
    /// Issue requests over `channel`
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// The underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Call a service and wait for its typed response
    pub async fn call<R: ServiceRequestType>(&self, request: &R) -> Result<R::Response> {
        self.channel
            .request(ServiceRequest::from_message(request))
            .await?
            .decode()
    }

    /// Call a service without waiting
    pub fn call_async<R: ServiceRequestType>(&self, request: &R) -> AsyncResult<R::Response> {
        self.channel
            .request_async(ServiceRequest::from_message(request))
            .map(ServiceResponse::decode::<R::Response>)
    }
}

/// Server side service implementation
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Answer one request
    ///
    /// An error is sent back to the client as a service fault.
    async fn handle(&self, request: ServiceRequest) -> Result<ServiceResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::codec;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct ReadValue {
        node: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct ReadValueResult {
        value: i32,
    }

    impl ServiceMessage for ReadValue {
        const TYPE_ID: u32 = 631;

        fn encode(&self, buf: &mut BytesMut) {
            codec::write_string(buf, &self.node);
        }

        fn decode(buf: &mut Bytes) -> Result<Self> {
            Ok(Self {
                node: codec::read_string(buf)?,
            })
        }
    }

    impl ServiceMessage for ReadValueResult {
        const TYPE_ID: u32 = 634;

        fn encode(&self, buf: &mut BytesMut) {
            bytes::BufMut::put_i32_le(buf, self.value);
        }

        fn decode(buf: &mut Bytes) -> Result<Self> {
            Ok(Self {
                value: codec::read_i32(buf)?,
            })
        }
    }

    impl ServiceRequestType for ReadValue {
        type Response = ReadValueResult;
    }

    /// Answers every request with a canned response
    struct CannedChannel {
        response: ServiceResponse,
        seen: Mutex<Vec<ServiceRequest>>,
    }

    impl RequestChannel for CannedChannel {
        fn request_async(&self, request: ServiceRequest) -> AsyncResult<ServiceResponse> {
            self.seen.lock().push(request);
            AsyncResult::completed(self.response.clone())
        }

        fn operation_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    fn service(response: ServiceResponse) -> ChannelService<Arc<CannedChannel>> {
        ChannelService::new(Arc::new(CannedChannel {
            response,
            seen: Mutex::new(Vec::new()),
        }))
    }

    #[tokio::test]
    async fn test_typed_call() {
        let service = service(ServiceResponse::from_message(&ReadValueResult { value: 42 }));
        let request = ReadValue {
            node: "ns=2;s=Pump".to_string(),
        };
        assert_eq!(service.call(&request).await.unwrap().value, 42);

        let seen = service.channel().seen.lock();
        assert_eq!(seen[0].type_id, 631);
        assert_eq!(ReadValue::decode(&mut seen[0].body.clone()).unwrap(), request);
    }

    #[tokio::test]
    async fn test_fault_surfaces_as_service_fault() {
        let fault = ServiceFault::new(StatusCode::BadServiceUnsupported, "no such service");
        let service = service(ServiceResponse::fault(&fault));
        let err = service
            .call(&ReadValue {
                node: String::new(),
            })
            .await
            .unwrap_err();
        assert!(err.is_service_fault());
        assert_eq!(err.status(), StatusCode::BadServiceUnsupported);
    }

    #[test]
    fn test_unexpected_type_is_unknown_response() {
        let service = service(ServiceResponse::new(999, Bytes::new()));
        let result = service.call_async(&ReadValue {
            node: String::new(),
        });
        let err = result.get_error().unwrap();
        assert_eq!(err.status(), StatusCode::BadUnknownResponse);
        assert!(!err.is_service_fault());
    }

    #[test]
    fn test_body_round_trip() {
        let request = ServiceRequest::new(631, Bytes::from_static(b"abc"));
        assert_eq!(ServiceRequest::from_body(request.to_body()).unwrap(), request);
        assert!(ServiceResponse::fault(&ServiceFault::new(StatusCode::BadTimeout, "")).is_fault());
    }
}
