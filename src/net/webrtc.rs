//! [`PeerConnector`] binding on the `webrtc` crate

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::{EventHandler, PeerConnection, PeerConnector};
use crate::config::ServerConfig;
use crate::pipeline::{Frame, OutgoingTrack};
use crate::session::{ConnectionEvent, ConnectionState, IceConnectionState, IceGatheringState};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};

/// Turns a stamped frame into the payload written to the engine's track
pub trait SampleEncoder: Send {
    fn encode(&mut self, frame: &Frame) -> anyhow::Result<Bytes>;
}

/// Forwards the packed RGB payload untouched
#[derive(Debug, Default)]
pub struct RawEncoder;

impl SampleEncoder for RawEncoder {
    fn encode(&mut self, frame: &Frame) -> anyhow::Result<Bytes> {
        Ok(frame.data.clone())
    }
}

/// Destination of encoded samples
#[async_trait]
pub(crate) trait SampleWriter: Send + Sync {
    async fn write(&self, sample: &Sample) -> anyhow::Result<()>;
}

#[async_trait]
impl SampleWriter for TrackLocalStaticSample {
    async fn write(&self, sample: &Sample) -> anyhow::Result<()> {
        self.write_sample(sample).await?;
        Ok(())
    }
}

/// Pull frames from `track` and write them out until either side stops
///
/// The track is closed on the way out, so the frame path drops this peer
/// instead of waiting on a slot nobody reads anymore.
pub(crate) async fn pump_frames<W: SampleWriter + ?Sized>(
    peer_id: &str,
    track: &OutgoingTrack,
    encoder: &mut dyn SampleEncoder,
    writer: &W,
    nominal: Duration,
    cancel: &CancellationToken,
) -> u64 {
    let mut last_pts: Option<i64> = None;
    let mut sent = 0u64;
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = track.produce_frame() => match frame {
                Ok(frame) => frame,
                Err(_) => break,
            },
        };

        let duration = sample_duration(&frame, last_pts, nominal);
        last_pts = frame.pts;

        let data = match encoder.encode(&frame) {
            Ok(data) => data,
            Err(e) => {
                warn!("Peer {}: failed to encode frame: {:#}", peer_id, e);
                continue;
            }
        };

        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        if let Err(e) = writer.write(&sample).await {
            error!("Peer {}: failed to write sample: {:#}", peer_id, e);
            break;
        }
        sent += 1;
    }

    track.close().await;
    sent
}

pub type EncoderFactory = Arc<dyn Fn() -> Box<dyn SampleEncoder> + Send + Sync>;

pub(crate) fn create_webrtc_api() -> anyhow::Result<Arc<API>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    Ok(Arc::new(api))
}

pub struct RtcConnector {
    api: Arc<API>,
    config: ServerConfig,
    encoder: EncoderFactory,
}

impl RtcConnector {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        Ok(RtcConnector {
            api: create_webrtc_api()?,
            config,
            encoder: Arc::new(|| Box::new(RawEncoder)),
        })
    }

    /// Use a different encoder for every track created from now on
    pub fn with_encoder(mut self, encoder: EncoderFactory) -> Self {
        self.encoder = encoder;
        self
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn create_connection(&self, peer_id: &str) -> anyhow::Result<Arc<dyn PeerConnection>> {
        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(rtc_config).await?);
        let connection = RtcConnection::new(peer_id, pc, &self.config, (self.encoder)());
        debug!("New peer connection for {}", peer_id);
        Ok(Arc::new(connection))
    }
}

pub struct RtcConnection {
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
    config: ServerConfig,
    encoder: Mutex<Option<Box<dyn SampleEncoder>>>,
    handler: Arc<Mutex<Option<EventHandler>>>,
    connected: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl RtcConnection {
    fn new(
        peer_id: &str,
        pc: Arc<RTCPeerConnection>,
        config: &ServerConfig,
        encoder: Box<dyn SampleEncoder>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handler: Arc<Mutex<Option<EventHandler>>> = Arc::new(Mutex::new(None));
        let (connected_tx, connected) = watch::channel(false);

        // Engine callbacks only enqueue; one task delivers in order, outside
        // the engine's own callback context
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ConnectionEvent>();

        let tx = events_tx.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            if let Some(state) = gathering_state(state) {
                let _ = tx.send(ConnectionEvent::IceGathering(state));
            }
            Box::pin(async {})
        }));

        let tx = events_tx.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            if let Some(state) = ice_connection_state(state) {
                let _ = tx.send(ConnectionEvent::IceConnection(state));
            }
            Box::pin(async {})
        }));

        let tx = events_tx;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            if let Some(state) = connection_state(state) {
                connected_tx.send_replace(state == ConnectionState::Connected);
                let _ = tx.send(ConnectionEvent::ConnectionState(state));
            }
            Box::pin(async {})
        }));

        let dispatch_handler = Arc::clone(&handler);
        let dispatch_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = dispatch_cancel.cancelled() => break,
                    event = events_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let current = dispatch_handler
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                if let Some(handler) = current {
                    handler(event).await;
                }
            }
        });

        RtcConnection {
            peer_id: peer_id.to_string(),
            pc,
            config: config.clone(),
            encoder: Mutex::new(Some(encoder)),
            handler,
            connected,
            cancel,
        }
    }
}

#[async_trait]
impl PeerConnection for RtcConnection {
    async fn add_track(&self, track: Arc<OutgoingTrack>) -> anyhow::Result<()> {
        let mut encoder = self
            .encoder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| anyhow!("a track is already attached"))?;

        let video_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: self.config.video_mime_type.clone(),
                ..Default::default()
            },
            self.config.track_id.clone(),
            self.config.stream_id.clone(),
        ));

        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&video_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .context("adding video track")?;

        // Read incoming RTCP packets
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = rtp_sender.read(&mut rtcp_buf) => {
                        if read.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let cancel = self.cancel.clone();
        let mut connected = self.connected.clone();
        let peer_id = self.peer_id.clone();
        let nominal = self.config.frame_duration();
        tokio::spawn(async move {
            let ready = tokio::select! {
                _ = cancel.cancelled() => false,
                ready = connected.wait_for(|connected| *connected) => ready.is_ok(),
            };
            if !ready {
                track.close().await;
                return;
            }
            info!("Peer {}: frame pump started", peer_id);
            let sent = pump_frames(
                &peer_id,
                &track,
                encoder.as_mut(),
                video_track.as_ref(),
                nominal,
                &cancel,
            )
            .await;
            info!("Peer {}: frame pump exited after {} frames", peer_id, sent);
        });

        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> anyhow::Result<()> {
        self.pc.set_remote_description(into_rtc(description)?).await?;
        Ok(())
    }

    async fn create_answer(&self) -> anyhow::Result<SessionDescription> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, description: SessionDescription) -> anyhow::Result<()> {
        // Outbound candidates travel inside the answer, so wait for gathering
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(into_rtc(description)?).await?;
        let _ = gathered.recv().await;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc
            .local_description()
            .await
            .and_then(|description| from_rtc(description).ok())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.to_string(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        self.pc.close().await?;
        Ok(())
    }

    fn on_event(&self, handler: EventHandler) {
        *self
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
    }
}

fn sample_duration(frame: &Frame, last_pts: Option<i64>, nominal: Duration) -> Duration {
    match (frame.pts, last_pts) {
        (Some(pts), Some(last)) if pts > last => frame.time_base.to_duration(pts - last),
        _ => nominal,
    }
}

fn into_rtc(description: SessionDescription) -> anyhow::Result<RTCSessionDescription> {
    let rtc = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(description.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp)?,
        SdpType::Rollback => return Err(anyhow!("rollback descriptions are not supported")),
    };
    Ok(rtc)
}

fn from_rtc(description: RTCSessionDescription) -> anyhow::Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return Err(anyhow!("unspecified sdp type")),
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

fn gathering_state(state: RTCIceGathererState) -> Option<IceGatheringState> {
    match state {
        RTCIceGathererState::New => Some(IceGatheringState::New),
        RTCIceGathererState::Gathering => Some(IceGatheringState::Gathering),
        RTCIceGathererState::Complete => Some(IceGatheringState::Complete),
        _ => None,
    }
}

fn ice_connection_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        RTCIceConnectionState::Unspecified => None,
    }
}

fn connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}
