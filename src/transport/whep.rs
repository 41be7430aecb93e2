//! WHEP signaling and the low-latency WebRTC transport.
//!
//! Negotiation sequence:
//!
//! 1. Create a peer connection with one receive-only video and one
//!    receive-only audio transceiver.
//! 2. Create the local offer and wait for ICE gathering to complete, bounded
//!    by the gathering timeout (3s by default).
//! 3. `POST` the offer to `{base}/whep` as `application/sdp`.
//! 4. Require `201 Created`; the body is the SDP answer.
//! 5. Apply the answer. Incoming tracks are attached to the sink and the
//!    peer connection state is monitored for loss.
//!
//! Every failure along the way is just "negotiation failed" to the manager.
//!
//! The offer request runs in its own task so that a session the server
//! created is still recorded, and deleted on teardown, when the negotiation
//! itself is cancelled. The `DELETE` is best-effort: failures are only
//! logged, and a process exit can still leave the session to expire on the
//! server.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

use crate::error::{Error, Result};
use crate::sink::SinkSource;
use crate::state::TransportKind;

use super::{LossNotifier, NegotiationContext, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Content type of WHEP offers and answers.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Default bound on ICE candidate gathering.
pub const DEFAULT_GATHERING_TIMEOUT: Duration = Duration::from_millis(3000);

// ============================================================================
// WhepClient
// ============================================================================

/// Answer returned by a WHEP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhepAnswer {
    /// Remote SDP answer.
    pub sdp: String,
    /// Session resource from the `Location` header, if the server sent one.
    pub resource: Option<Url>,
}

/// HTTP side of WHEP.
#[derive(Debug, Clone)]
pub struct WhepClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl WhepClient {
    /// Creates a client posting offers to `endpoint`.
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    /// Signaling endpoint URL.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Submits an offer and returns the answer.
    ///
    /// # Errors
    ///
    /// - [`Error::SignalingStatus`] for any status other than 201
    /// - [`Error::MalformedAnswer`] if the body is not SDP
    /// - [`Error::Http`] on transport errors
    pub async fn offer(&self, sdp: &str) -> Result<WhepAnswer> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(sdp.to_owned())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(Error::signaling_status(status.as_u16()));
        }

        let resource = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|location| self.endpoint.join(location).ok());

        let sdp = response.text().await?;
        if !sdp.trim_start().starts_with("v=") {
            return Err(Error::malformed_answer("answer body is not an SDP document"));
        }

        Ok(WhepAnswer { sdp, resource })
    }

    /// Ends a server-side session.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] if the request fails or is rejected.
    pub async fn delete(&self, resource: &Url) -> Result<()> {
        self.http
            .delete(resource.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

// ============================================================================
// LowLatencyTransport
// ============================================================================

#[derive(Default)]
struct Session {
    peer: Option<Arc<RTCPeerConnection>>,
    resource: Option<Url>,
    torn_down: bool,
}

/// Receive-only WebRTC session negotiated over WHEP.
pub struct LowLatencyTransport {
    client: WhepClient,
    gathering_timeout: Duration,
    ice_servers: Vec<String>,
    session: Arc<Mutex<Session>>,
}

impl LowLatencyTransport {
    /// Creates an unused transport.
    #[must_use]
    pub fn new(client: WhepClient, gathering_timeout: Duration, ice_servers: Vec<String>) -> Self {
        Self {
            client,
            gathering_timeout,
            ice_servers,
            session: Arc::new(Mutex::new(Session::default())),
        }
    }

    async fn build_peer(&self) -> Result<RTCPeerConnection> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        Ok(api.new_peer_connection(config).await?)
    }

    /// Posts the offer from a detached task and records the session resource.
    async fn submit_offer(&self, sdp: String) -> Result<WhepAnswer> {
        let client = self.client.clone();
        let session = Arc::clone(&self.session);

        tokio::spawn(async move {
            let answer = client.offer(&sdp).await?;
            record_resource(&session, &client, answer.resource.clone())?;
            Ok::<_, Error>(answer)
        })
        .await
        .map_err(|e| Error::negotiation(format!("offer task failed: {e}")))?
    }

    /// Registers the peer with the session unless teardown already ran.
    fn adopt(&self, peer: &Arc<RTCPeerConnection>) -> Result<()> {
        let mut session = self.session.lock();
        if session.torn_down {
            close_in_background(Arc::clone(peer));
            return Err(Error::Superseded);
        }
        session.peer = Some(Arc::clone(peer));
        Ok(())
    }
}

#[async_trait]
impl Transport for LowLatencyTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LowLatency
    }

    async fn negotiate(&self, ctx: NegotiationContext) -> Result<()> {
        let generation = ctx.generation();
        let peer = Arc::new(self.build_peer().await?);
        self.adopt(&peer)?;

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            peer.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: Vec::new(),
                }),
            )
            .await?;
        }

        let sink = ctx.sink.clone();
        peer.on_track(Box::new(move |track, _receiver, _transceiver| {
            debug!(%generation, kind = %track.kind(), "Remote track arrived");
            if sink.attach(SinkSource::Track(track)).is_err() {
                debug!(%generation, "Track from superseded session dropped");
            }
            Box::pin(async {})
        }));

        let watcher = Arc::new(PeerStateWatcher::new(ctx.loss.clone()));
        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(%generation, %state, "Peer connection state changed");
            watcher.on_state(state);
            Box::pin(async {})
        }));

        let offer = peer.create_offer(None).await?;
        let mut gathered = peer.gathering_complete_promise().await;
        peer.set_local_description(offer).await?;

        wait_for_gathering(gathered.recv(), self.gathering_timeout).await?;

        let local = peer
            .local_description()
            .await
            .ok_or_else(|| Error::negotiation("local description missing after gathering"))?;

        let answer = self.submit_offer(local.sdp).await?;

        let remote = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| Error::malformed_answer(e.to_string()))?;
        peer.set_remote_description(remote)
            .await
            .map_err(|e| Error::malformed_answer(e.to_string()))?;

        if !ctx.sink.is_current() {
            return Err(Error::Superseded);
        }

        info!(%generation, endpoint = %self.client.endpoint(), "WHEP session established");
        Ok(())
    }

    /// Closes the peer and deletes the server-side session, if any.
    fn teardown(&self) {
        let mut session = self.session.lock();
        session.torn_down = true;

        if let Some(peer) = session.peer.take() {
            close_in_background(peer);
        }
        if let Some(resource) = session.resource.take() {
            delete_in_background(self.client.clone(), resource);
        }
    }
}

// ============================================================================
// Negotiation Helpers
// ============================================================================

/// Waits for ICE gathering to finish, bounded by `limit`.
async fn wait_for_gathering<F: Future>(gathered: F, limit: Duration) -> Result<()> {
    timeout(limit, gathered)
        .await
        .map(|_| ())
        .map_err(|_| Error::gathering_timeout(limit.as_millis() as u64))
}

/// Stores the session resource unless teardown already ran, in which case
/// the session is deleted right away.
fn record_resource(
    session: &Mutex<Session>,
    client: &WhepClient,
    resource: Option<Url>,
) -> Result<()> {
    let mut session = session.lock();
    if session.torn_down {
        if let Some(resource) = resource {
            delete_in_background(client.clone(), resource);
        }
        return Err(Error::Superseded);
    }
    session.resource = resource;
    Ok(())
}

/// Turns the first `Disconnected` or `Failed` peer state into a loss.
///
/// Reports even while negotiation is still running; the manager matches the
/// loss against the generation it is negotiating.
struct PeerStateWatcher {
    loss: LossNotifier,
    reported: AtomicBool,
}

impl PeerStateWatcher {
    fn new(loss: LossNotifier) -> Self {
        Self {
            loss,
            reported: AtomicBool::new(false),
        }
    }

    fn on_state(&self, state: RTCPeerConnectionState) {
        if matches!(
            state,
            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
        ) && !self.reported.swap(true, Ordering::SeqCst)
        {
            self.loss.notify(format!("peer connection {state}"));
        }
    }
}

// ============================================================================
// Background Cleanup
// ============================================================================

fn close_in_background(peer: Arc<RTCPeerConnection>) {
    tokio::spawn(async move {
        if let Err(e) = peer.close().await {
            warn!(error = %e, "Failed to close peer connection");
        }
    });
}

fn delete_in_background(client: WhepClient, resource: Url) {
    tokio::spawn(async move {
        if let Err(e) = client.delete(&resource).await {
            debug!(error = %e, %resource, "WHEP session delete failed");
        }
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_GATHERING_TIMEOUT.as_millis(), 3000);
        assert_eq!(SDP_CONTENT_TYPE, "application/sdp");
    }

    #[tokio::test]
    async fn test_teardown_before_negotiate_is_safe() {
        let client = WhepClient::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/cam/whep").unwrap(),
        );
        let transport = LowLatencyTransport::new(client, DEFAULT_GATHERING_TIMEOUT, Vec::new());

        transport.teardown();
        transport.teardown();
        assert!(transport.session.lock().torn_down);
        assert_eq!(transport.kind(), TransportKind::LowLatency);
    }

    #[test]
    fn test_peer_failure_reports_one_loss() {
        let generation = crate::identifiers::Generation::new(7);
        let (loss, mut losses) = LossNotifier::channel(generation);
        let watcher = PeerStateWatcher::new(loss);

        watcher.on_state(RTCPeerConnectionState::Connecting);
        watcher.on_state(RTCPeerConnectionState::Connected);
        assert!(losses.try_recv().is_err());

        watcher.on_state(RTCPeerConnectionState::Disconnected);
        watcher.on_state(RTCPeerConnectionState::Failed);

        let report = losses.try_recv().unwrap();
        assert_eq!(report.generation, generation);
        assert!(report.reason.contains("disconnected"), "reason: {}", report.reason);
        assert!(losses.try_recv().is_err());
    }

    #[test]
    fn test_failure_before_connect_is_reported() {
        let (loss, mut losses) = LossNotifier::channel(crate::identifiers::Generation::new(1));
        let watcher = PeerStateWatcher::new(loss);

        watcher.on_state(RTCPeerConnectionState::Connecting);
        watcher.on_state(RTCPeerConnectionState::Failed);

        assert!(losses.try_recv().unwrap().reason.contains("failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gathering_bound_is_negotiation_timeout() {
        let err = wait_for_gathering(std::future::pending::<()>(), DEFAULT_GATHERING_TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::GatheringTimeout { timeout_ms: 3000 }));
        assert!(err.is_timeout());
        assert!(err.is_negotiation_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gathering_completes_within_bound() {
        wait_for_gathering(std::future::ready(Some(())), DEFAULT_GATHERING_TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resource_recorded_until_teardown() {
        let client = WhepClient::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/cam/whep").unwrap(),
        );
        let session = Mutex::new(Session::default());
        let resource = Url::parse("http://127.0.0.1:9/cam/whep/abc").unwrap();

        record_resource(&session, &client, Some(resource.clone())).unwrap();
        assert_eq!(session.lock().resource, Some(resource.clone()));

        session.lock().torn_down = true;
        session.lock().resource = None;
        let err = record_resource(&session, &client, Some(resource)).unwrap_err();
        assert!(matches!(err, Error::Superseded));
        assert!(session.lock().resource.is_none());
    }
}
