//! Session bring-up and lifecycle.
//!
//! The connection owns the peer connection, the data channel, and the A/V
//! channel handles. Bring-up: classify the connect method, resolve the
//! peer (discovery or cloud), create the peer connection with one "data"
//! channel and the two media transceivers, run the SDP exchange through
//! the matching signaling strategy, then wait for the data-channel
//! validation handshake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rsa::RsaPublicKey;
use serde_json::{Value, json};
use tracing::{info, warn};
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

use go2_protocol::{ConnectMethod, ConnectOptions, LOCAL_AP_ADDRESS};

use crate::audio::AudioChannel;
use crate::channel::DataChannel;
use crate::cloud::{CloudClient, TurnServerInfo};
use crate::discovery;
use crate::error::{DriverError, Result};
use crate::lidar::DecoderKind;
use crate::signaling;
use crate::video::VideoChannel;

pub const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Validation must complete within this window or bring-up fails.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const DISCOVERY_WINDOW: Duration = Duration::from_secs(2);

/// How the SDP answer is obtained for this session.
enum Signaler {
    Cloud {
        cloud: CloudClient,
        serial: String,
        token: String,
        public_key: RsaPublicKey,
    },
    Local {
        http: reqwest::Client,
        ip: String,
    },
}

impl Signaler {
    async fn negotiate(&self, offer: &str) -> Result<String> {
        match self {
            Signaler::Cloud {
                cloud,
                serial,
                token,
                public_key,
            } => {
                cloud
                    .send_sdp_to_remote_peer(serial, offer, token, public_key)
                    .await
            }
            Signaler::Local { http, ip } => signaling::exchange_sdp_local(http, ip, offer).await,
        }
    }
}

/// A live session with the device.
pub struct Go2Connection {
    options: ConnectOptions,
    peer: Arc<RTCPeerConnection>,
    data_channel: Arc<DataChannel>,
    audio: AudioChannel,
    video: VideoChannel,
    connected: Arc<AtomicBool>,
}

impl std::fmt::Debug for Go2Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Go2Connection").finish_non_exhaustive()
    }
}

impl Go2Connection {
    /// Establish a session according to the connection descriptor.
    pub async fn connect(options: ConnectOptions) -> Result<Self> {
        options.validate().map_err(DriverError::Config)?;
        info!(?options, "connecting");

        let cloud = CloudClient::new();
        let token = match (&options.username, &options.password) {
            (Some(username), Some(password)) => cloud.fetch_token(username, password).await?,
            _ => String::new(),
        };

        match options.method {
            ConnectMethod::Remote => Self::connect_remote(options, cloud, token).await,
            ConnectMethod::LocalSta => {
                let ip = match options.peer_ip() {
                    Some(ip) => ip.to_string(),
                    None => Self::resolve_serial(&options).await?,
                };
                Self::connect_local(options, token, ip).await
            }
            ConnectMethod::LocalAp => {
                Self::connect_local(options, token, LOCAL_AP_ADDRESS.to_string()).await
            }
        }
    }

    /// LocalSTA with only a serial number: resolve it on the LAN.
    async fn resolve_serial(options: &ConnectOptions) -> Result<String> {
        let serial = options
            .serial
            .as_deref()
            .ok_or_else(|| DriverError::Config("serial required for discovery".to_string()))?;
        let devices = discovery::discover_devices(DISCOVERY_WINDOW).await?;
        devices
            .get(serial)
            .cloned()
            .ok_or(DriverError::NoDeviceFound)
    }

    async fn connect_remote(
        options: ConnectOptions,
        cloud: CloudClient,
        token: String,
    ) -> Result<Self> {
        let serial = options
            .serial
            .clone()
            .ok_or_else(|| DriverError::Config("serial required for remote".to_string()))?;
        let public_key = cloud
            .fetch_public_key()
            .await
            .ok_or_else(|| DriverError::RemoteAuth("relay public key unavailable".to_string()))?;
        let turn = cloud
            .fetch_turn_server_info(&serial, &token, &public_key)
            .await?;

        let ice_servers = vec![
            RTCIceServer {
                urls: vec![turn.realm.clone()],
                username: turn.user.clone(),
                credential: turn.passwd.clone(),
                ..Default::default()
            },
            RTCIceServer {
                urls: vec![STUN_SERVER.to_string()],
                ..Default::default()
            },
        ];
        let signaler = Signaler::Cloud {
            cloud,
            serial,
            token: token.clone(),
            public_key,
        };
        Self::bring_up(options, ice_servers, signaler, token, Some(turn)).await
    }

    async fn connect_local(options: ConnectOptions, token: String, ip: String) -> Result<Self> {
        info!(ip = %ip, "using local peer");
        let signaler = Signaler::Local {
            http: reqwest::Client::new(),
            ip,
        };
        Self::bring_up(options, Vec::new(), signaler, token, None).await
    }

    async fn bring_up(
        options: ConnectOptions,
        ice_servers: Vec<RTCIceServer>,
        signaler: Signaler,
        token: String,
        turn: Option<TurnServerInfo>,
    ) -> Result<Self> {
        let peer = build_peer_connection(ice_servers).await?;

        let channel = peer.create_data_channel("data", None).await?;
        let data_channel = DataChannel::new(channel, options.method == ConnectMethod::Remote);

        peer.add_transceiver_from_kind(
            RTPCodecType::Audio,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Sendrecv,
                send_encodings: Vec::new(),
            }),
        )
        .await?;
        peer.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: Vec::new(),
            }),
        )
        .await?;

        let audio = AudioChannel::new(Arc::clone(&data_channel));
        let video = VideoChannel::new(Arc::clone(&data_channel));
        wire_track_routing(&peer, audio.clone(), video.clone());

        let connected = Arc::new(AtomicBool::new(false));
        wire_state_logging(&peer, Arc::clone(&connected));

        // The device expects a complete (non-trickle) offer: gather ICE
        // before handing the SDP to the signaler.
        let offer = peer.create_offer(None).await?;
        let mut gather_complete = peer.gathering_complete_promise().await;
        peer.set_local_description(offer).await?;
        let _ = gather_complete.recv().await;
        let local = peer
            .local_description()
            .await
            .ok_or_else(|| DriverError::Protocol("local description missing".to_string()))?;

        let mut offer_doc = json!({
            "id": match options.method {
                ConnectMethod::LocalSta => "STA_localNetwork",
                _ => "",
            },
            "sdp": local.sdp,
            "type": local.sdp_type.to_string(),
            "token": token,
        });
        if let (Some(turn), Value::Object(doc)) = (turn, &mut offer_doc) {
            doc.insert("turnserver".to_string(), serde_json::to_value(turn)?);
        }

        let sdp = match signaler.negotiate(&offer_doc.to_string()).await {
            Ok(body) => match parse_answer(&body) {
                Ok(sdp) => sdp,
                Err(e) => {
                    let _ = peer.close().await;
                    return Err(e);
                }
            },
            Err(e) => {
                let _ = peer.close().await;
                return Err(e);
            }
        };

        peer.set_remote_description(RTCSessionDescription::answer(sdp)?)
            .await?;

        if let Err(e) = data_channel.wait_until_ready(OPEN_TIMEOUT).await {
            let _ = peer.close().await;
            return Err(e);
        }
        info!("session established");

        Ok(Self {
            options,
            peer,
            data_channel,
            audio,
            video,
            connected,
        })
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn data_channel(&self) -> &Arc<DataChannel> {
        &self.data_channel
    }

    pub fn audio(&self) -> &AudioChannel {
        &self.audio
    }

    pub fn video(&self) -> &VideoChannel {
        &self.video
    }

    /// ICE-level connectivity, not the validation handshake.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn switch_video_channel(&self, on: bool) -> Result<()> {
        self.data_channel.switch_video_channel(on).await
    }

    pub async fn switch_audio_channel(&self, on: bool) -> Result<()> {
        self.data_channel.switch_audio_channel(on).await
    }

    pub async fn set_decoder(&self, kind: DecoderKind) {
        self.data_channel.set_decoder(kind).await;
    }

    /// Tear the session down. Pending requests fail with ConnectionClosed.
    pub async fn disconnect(&self) -> Result<()> {
        self.peer.close().await?;
        self.data_channel.handle_close().await;
        self.connected.store(false, Ordering::Relaxed);
        info!("disconnected");
        Ok(())
    }

    /// Disconnect, then establish a fresh session with the same descriptor.
    pub async fn reconnect(self) -> Result<Self> {
        let options = self.options.clone();
        if let Err(e) = self.disconnect().await {
            warn!(error = %e, "disconnect before reconnect failed");
        }
        Self::connect(options).await
    }
}

/// Extract the answer SDP from the signaler's reply body. An answer of
/// `"reject"` means another client already holds the session.
fn parse_answer(body: &str) -> Result<String> {
    let answer: Value = serde_json::from_str(body)?;
    let sdp = answer
        .get("sdp")
        .and_then(Value::as_str)
        .ok_or_else(|| DriverError::Protocol("answer without sdp".to_string()))?;
    if sdp == "reject" {
        warn!("peer already has a client connected");
        return Err(DriverError::PeerBusy);
    }
    Ok(sdp.to_string())
}

async fn build_peer_connection(ice_servers: Vec<RTCIceServer>) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };
    Ok(Arc::new(api.new_peer_connection(config).await?))
}

/// Route inbound media tracks to the matching channel handle.
fn wire_track_routing(peer: &RTCPeerConnection, audio: AudioChannel, video: VideoChannel) {
    peer.on_track(Box::new(move |track, _receiver, _transceiver| {
        let audio = audio.clone();
        let video = video.clone();
        Box::pin(async move {
            match track.kind() {
                RTPCodecType::Audio => audio.handle_track(track).await,
                RTPCodecType::Video => video.handle_track(track).await,
                RTPCodecType::Unspecified => {
                    warn!("track of unspecified kind ignored");
                }
            }
        })
    }));
}

fn wire_state_logging(peer: &RTCPeerConnection, connected: Arc<AtomicBool>) {
    peer.on_peer_connection_state_change(Box::new(move |state| {
        match state {
            RTCPeerConnectionState::Connected => {
                connected.store(true, Ordering::Relaxed);
                info!("peer connection established");
            }
            RTCPeerConnectionState::Closed
            | RTCPeerConnectionState::Failed
            | RTCPeerConnectionState::Disconnected => {
                connected.store(false, Ordering::Relaxed);
                warn!(?state, "peer connection lost");
            }
            _ => {
                info!(?state, "peer connection state changed");
            }
        }
        Box::pin(async {})
    }));

    peer.on_ice_connection_state_change(Box::new(|state| {
        info!(?state, "ICE connection state changed");
        Box::pin(async {})
    }));

    peer.on_ice_gathering_state_change(Box::new(|state| {
        info!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));
}
