//! WebRTC peer connections.
//!
//! Frames published on an attached track are forwarded to the remote side
//! as media samples. Payloads are sent as produced by the capture layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use livecast_capture::{MediaTrack, TrackKind};
use livecast_ipc::{IceCandidate, SdpType, SessionDescription};

use crate::config::TransportConfig;
use crate::connection::ConnectionState;
use crate::error::TransportError;
use crate::peer::{PeerHandle, PeerTransport, PeerTransportFactory, TransportEvent};
use crate::TransportResult;

/// Creates webrtc-rs peer connections.
///
/// Captured frames are raw RGBA and are written unencoded onto VP8 tracks,
/// so viewers cannot decode the media yet. Until an encoder sits between
/// the capture layer and the sample writer, this transport covers the
/// signaling and connection lifecycle only.
pub struct RtcTransportFactory {
    config: TransportConfig,
}

impl RtcTransportFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect()
    }
}

#[async_trait]
impl PeerTransportFactory for RtcTransportFactory {
    #[instrument(name = "rtc_create", skip(self))]
    async fn create(&self, viewer_id: &str) -> TransportResult<PeerHandle> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Setup(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            TransportError::Setup(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers(),
            bundle_policy: RTCBundlePolicy::MaxBundle,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            TransportError::Setup(format!("Failed to create peer connection: {}", e))
        })?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let transport = RtcPeerTransport {
            viewer_id: viewer_id.to_string(),
            pc: Arc::new(pc),
            state: Arc::new(RwLock::new(ConnectionState::New)),
            attached: Mutex::new(Vec::new()),
            stream_label: self.config.stream_label.clone(),
            frame_duration: Duration::from_secs(1) / self.config.video_fps.max(1),
            cancel: CancellationToken::new(),
        };
        transport.setup_event_handlers(events_tx);

        debug!("Peer connection created");
        Ok(PeerHandle {
            transport: Arc::new(transport),
            events,
        })
    }
}

/// A webrtc-rs peer connection sending local tracks to one viewer.
pub struct RtcPeerTransport {
    viewer_id: String,
    pc: Arc<RTCPeerConnection>,
    state: Arc<RwLock<ConnectionState>>,
    attached: Mutex<Vec<MediaTrack>>,
    stream_label: String,
    frame_duration: Duration,
    cancel: CancellationToken,
}

impl RtcPeerTransport {
    fn setup_event_handlers(&self, events_tx: mpsc::UnboundedSender<TransportEvent>) {
        let state = Arc::clone(&self.state);
        let viewer_id = self.viewer_id.clone();
        let tx = events_tx.clone();

        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = Arc::clone(&state);
                let viewer_id = viewer_id.clone();
                let tx = tx.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!(viewer_id = %viewer_id, "Peer connection state: {}", new_state);
                    *state.write() = new_state;
                    let _ = tx.send(TransportEvent::StateChanged(new_state));
                })
            }));

        let tx = events_tx;
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let tx = tx.clone();

                Box::pin(async move {
                    let Some(c) = candidate else {
                        return;
                    };
                    match c.to_json() {
                        Ok(init) => {
                            debug!("Local ICE candidate: {}", init.candidate);
                            let _ = tx.send(TransportEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                    }
                })
            }));
    }

    fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
        match kind {
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
        }
    }

    fn to_rtc_description(desc: SessionDescription) -> TransportResult<RTCSessionDescription> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        };
        parsed.map_err(|e| TransportError::InvalidDescription(e.to_string()))
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    #[instrument(skip(self, track), fields(viewer_id = %self.viewer_id, track_id = %track.id()))]
    async fn add_track(&self, track: &MediaTrack) -> TransportResult<()> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let local = Arc::new(TrackLocalStaticSample::new(
            Self::codec_for(track.kind()),
            track.id().to_string(),
            self.stream_label.clone(),
        ));

        self.pc
            .add_transceiver_from_track(
                Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| TransportError::AttachTrack(e.to_string()))?;

        tokio::spawn(forward_frames(
            track.clone(),
            local,
            self.frame_duration,
            self.cancel.child_token(),
        ));

        self.attached.lock().push(track.clone());
        debug!(kind = %track.kind(), "Track attached");
        Ok(())
    }

    fn attached_tracks(&self) -> Vec<MediaTrack> {
        self.attached.lock().clone()
    }

    async fn create_offer(&self) -> TransportResult<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Negotiation(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> TransportResult<()> {
        let desc = Self::to_rtc_description(desc)?;
        self.pc.set_local_description(desc).await.map_err(|e| {
            TransportError::Negotiation(format!("Failed to set local description: {}", e))
        })
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> TransportResult<()> {
        let desc = Self::to_rtc_description(desc)?;
        self.pc.set_remote_description(desc).await.map_err(|e| {
            TransportError::Negotiation(format!("Failed to set remote description: {}", e))
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> TransportResult<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    #[instrument(skip(self), fields(viewer_id = %self.viewer_id))]
    async fn close(&self) -> TransportResult<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.cancel.cancel();

        self.pc
            .close()
            .await
            .map_err(|e| TransportError::Close(e.to_string()))?;

        *self.state.write() = ConnectionState::Closed;
        Ok(())
    }
}

impl Drop for RtcPeerTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn forward_frames(
    track: MediaTrack,
    local: Arc<TrackLocalStaticSample>,
    duration: Duration,
    cancel: CancellationToken,
) {
    let mut frames = track.subscribe_frames();
    let mut sent = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let frame = frames.borrow_and_update().clone();
        let Some(frame) = frame else {
            continue;
        };

        let sample = Sample {
            data: frame.data,
            duration,
            ..Default::default()
        };

        if let Err(e) = local.write_sample(&sample).await {
            debug!("write_sample failed (no peer?): {}", e);
        }
        sent += 1;
    }

    debug!(track_id = %track.id(), frames = sent, "Frame forwarding stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> RtcTransportFactory {
        RtcTransportFactory::new(TransportConfig {
            ice_servers: Vec::new(),
            ..Default::default()
        })
    }

    fn live_video() -> MediaTrack {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        track.mark_live();
        track
    }

    #[tokio::test]
    async fn test_offer_is_send_only_and_bundled() {
        let handle = factory().create("viewer-1").await.unwrap();
        let transport = handle.transport;

        transport.add_track(&live_video()).await.unwrap();
        assert_eq!(transport.attached_tracks().len(), 1);

        let offer = transport.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("a=sendonly"), "{}", offer.sdp);
        assert!(offer.sdp.contains("a=group:BUNDLE"), "{}", offer.sdp);
        assert!(!offer.sdp.contains("a=recvonly"));

        transport.close().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_tracks() {
        let handle = factory().create("viewer-1").await.unwrap();
        let transport = handle.transport;

        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.add_track(&live_video()).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(transport.attached_tracks().is_empty());
    }
}
