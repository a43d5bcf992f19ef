mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::*;
use uasc_rs::channel::{SecureChannel, ServerSecureChannel, TrustList};
use uasc_rs::security::MessageSecurityMode;
use uasc_rs::service::ServiceRequest;
use uasc_rs::sync::{ChannelState, ResultStatus, WriteState};
use uasc_rs::{ChannelSettings, StatusCode};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_correlate() {
    init_logging();
    let (channel, _connector) =
        secured_pair(secured_client_settings(MessageSecurityMode::SignAndEncrypt), false);
    channel.open().await.unwrap();
    assert_eq!(channel.state(), ChannelState::Open);
    assert_ne!(channel.channel_id(), 0);
    let channel = Arc::new(channel);

    // Later submissions are answered first
    let tasks: Vec<_> = (0..8u64)
        .map(|i| {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let payload = format!("task {}", i);
                let call = channel
                    .submit(echo(Duration::from_millis(80 - i * 10), payload.as_bytes()))
                    .unwrap();
                let response = call.wait(Duration::from_secs(10)).await.unwrap();
                assert_eq!(call.write_state(), WriteState::Written);
                (payload, call.request_id(), echoed(&response))
            })
        })
        .collect();

    let blocking = {
        let channel = Arc::clone(&channel);
        std::thread::spawn(move || {
            channel
                .service_request_blocking(echo(Duration::from_millis(40), b"thread"))
                .map(|response| echoed(&response))
        })
    };

    let mut ids = Vec::new();
    for task in tasks {
        let (payload, request_id, body) = task.await.unwrap();
        assert_eq!(body, Bytes::from(payload));
        ids.push(request_id);
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8);

    let body = tokio::task::spawn_blocking(move || blocking.join())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(&body[..], b"thread");
    assert_eq!(channel.pending_count(), 0);

    channel.close().await.unwrap();
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_sign_only_channel() {
    init_logging();
    let (channel, connector) =
        secured_pair(secured_client_settings(MessageSecurityMode::Sign), false);
    channel.open().await.unwrap();

    let response = channel
        .service_request(echo(Duration::ZERO, b"signed"))
        .await
        .unwrap();
    assert_eq!(&echoed(&response)[..], b"signed");
    assert_eq!(connector.handler.handled.load(Ordering::SeqCst), 1);
    channel.dispose().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unsecured_channel() {
    init_logging();
    let (channel, connector) = open_pair(ChannelSettings::default());
    channel.open().await.unwrap();
    assert_eq!(channel.token_id(), connector.server.current_token_id());

    let response = channel
        .service_request(echo(Duration::ZERO, b"plain"))
        .await
        .unwrap();
    assert_eq!(&echoed(&response)[..], b"plain");
    channel.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_wait_times_out_without_leaking() {
    init_logging();
    let (channel, _connector) = open_pair(ChannelSettings::default());
    channel.open().await.unwrap();

    let result = channel.service_request_async(echo(Duration::from_secs(1), b"late"));
    let err = result.wait(Duration::ZERO).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BadTimeout);
    assert_eq!(result.status(), ResultStatus::Waiting);
    assert_eq!(channel.pending_count(), 1);

    // The real response still arrives and clears the entry
    let response = result.wait(Duration::from_secs(10)).await.unwrap();
    assert_eq!(&echoed(&response)[..], b"late");
    assert_eq!(channel.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_expires() {
    init_logging();
    let settings = ChannelSettings {
        operation_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let (channel, _connector) = open_pair(settings);
    channel.open().await.unwrap();

    let call = channel
        .submit(echo(Duration::from_secs(600), b"slow"))
        .unwrap();
    let err = call.wait(Duration::from_secs(60)).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BadTimeout);
    assert_eq!(channel.pending_count(), 0);
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_write() {
    init_logging();
    let (channel, connector) = open_pair(ChannelSettings::default());
    channel.open().await.unwrap();

    let call = channel.submit(echo(Duration::ZERO, b"never")).unwrap();
    assert!(call.cancel());
    let err = call.result().get_error().unwrap();
    assert_eq!(err.status(), StatusCode::BadRequestCancelledByClient);
    assert_eq!(call.write_state(), WriteState::Canceled);
    assert_eq!(channel.pending_count(), 0);

    // The channel keeps working and the canceled request was never handled
    let response = channel
        .service_request(echo(Duration::ZERO, b"next"))
        .await
        .unwrap();
    assert_eq!(&echoed(&response)[..], b"next");
    assert_eq!(connector.handler.handled.load(Ordering::SeqCst), 1);
    assert!(!call.cancel());
}

#[tokio::test(start_paused = true)]
async fn test_close_fails_pending_requests() {
    init_logging();
    let (channel, connector) = open_pair(ChannelSettings::default());
    channel.open().await.unwrap();

    let call = channel
        .submit(echo(Duration::from_secs(30), b"pending"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    channel.close().await.unwrap();

    let err = call.result().get_error().unwrap();
    assert_eq!(err.status(), StatusCode::BadSecureChannelClosed);
    assert_eq!(channel.pending_count(), 0);

    let err = channel
        .submit(echo(Duration::ZERO, b"after close"))
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BadSecureChannelClosed);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!connector.server.is_open());

    // Closing twice is harmless
    channel.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reopen_after_close() {
    init_logging();
    let (channel, _connector) =
        secured_pair(secured_client_settings(MessageSecurityMode::SignAndEncrypt), false);
    channel.open().await.unwrap();
    let first = channel.token_id().unwrap();
    channel.close().await.unwrap();
    assert_eq!(channel.token_id(), None);

    channel.open().await.unwrap();
    assert_ne!(channel.token_id().unwrap(), first);
    let response = channel
        .service_request(echo(Duration::ZERO, b"again"))
        .await
        .unwrap();
    assert_eq!(&echoed(&response)[..], b"again");
}

#[tokio::test(start_paused = true)]
async fn test_open_twice_rejected() {
    init_logging();
    let (channel, _connector) = open_pair(ChannelSettings::default());
    channel.open().await.unwrap();
    let err = channel.open().await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BadInternalError);
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_service_is_fault() {
    init_logging();
    let (channel, _connector) = open_pair(ChannelSettings::default());
    channel.open().await.unwrap();

    let response = channel
        .service_request(ServiceRequest::new(4242, Bytes::new()))
        .await
        .unwrap();
    assert!(response.is_fault());
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_tampered_message_closes_server_channel() {
    init_logging();
    let (channel, connector) =
        secured_pair(secured_client_settings(MessageSecurityMode::SignAndEncrypt), true);
    channel.open().await.unwrap();
    assert!(connector.server.is_open());

    connector.set_sink_fault(SinkFault::Tamper);
    let err = channel
        .service_request(echo(Duration::ZERO, b"tampered"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BadSecureChannelClosed);
    assert_eq!(channel.state(), ChannelState::Closed);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!connector.server.is_open());
    assert_eq!(connector.server.current_token_id(), None);
    assert_eq!(connector.handler.handled.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_untrusted_client_rejected() {
    init_logging();
    let server = ServerSecureChannel::new(
        secured_server_settings(),
        Some(server_key_pair()),
        TrustList::new(vec![stranger_key_pair().certificate]),
    )
    .unwrap();
    let connector = MemoryConnector::new(server, false);
    let channel = SecureChannel::new(
        secured_client_settings(MessageSecurityMode::SignAndEncrypt),
        Some(client_key_pair()),
        Some(server_key_pair().certificate),
        connector,
    )
    .unwrap();

    let err = channel.open().await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BadCertificateUntrusted);
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_server_certificate_rejected() {
    init_logging();
    let connector = MemoryConnector::new(secured_server(), false);
    // The client expects another server, so the request is encrypted for it
    let channel = SecureChannel::new(
        secured_client_settings(MessageSecurityMode::SignAndEncrypt),
        Some(client_key_pair()),
        Some(stranger_key_pair().certificate),
        connector,
    )
    .unwrap();

    let err = channel.open().await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BadCertificateInvalid);
    assert_eq!(channel.state(), ChannelState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_unoffered_mode_rejected() {
    init_logging();
    // The server only offers None
    let (_, connector) = open_pair(ChannelSettings::default());
    let channel = SecureChannel::new(
        secured_client_settings(MessageSecurityMode::SignAndEncrypt),
        Some(client_key_pair()),
        Some(server_key_pair().certificate),
        connector,
    )
    .unwrap();

    let err = channel.open().await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BadSecurityPolicyRejected);
}

#[test]
fn test_blocking_request() {
    init_logging();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let (channel, _connector) = open_pair(ChannelSettings::default());
    runtime.block_on(channel.open()).unwrap();

    let response = channel
        .service_request_blocking(echo(Duration::ZERO, b"blocking"))
        .unwrap();
    assert_eq!(&echoed(&response)[..], b"blocking");
    runtime.block_on(channel.close()).unwrap();
}
