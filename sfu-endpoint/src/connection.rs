//! Peer connection adapter
//!
//! This module handles:
//! - Creating the native connection with configured and server-proposed ICE servers
//! - Attaching local tracks as send-only transceivers
//! - Keeping enough receive-only transceivers for the tracks the server sends
//! - Offer/answer application and ICE candidates
//! - Connection stability, as seen by the command queue

use tracing::{debug, info};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

use crate::codec::{TrackTypeCounts, TurnServer};
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::transport::{
    DataChannelInit, EncodingParameters, IceCandidate, IceServer, NativeDataChannel, NativeTrack,
    OfferOptions, PeerConnection, PeerConnectionConfig, PeerConnectionEventSender,
    PeerConnectionFactory, SessionDescription, StatsReport, TransceiverId,
    TransceiverInfo, TransceiverInit,
};
use crate::types::TrackKind;

/// ICE servers for a new connection: configured URLs first, then the
/// server's integrated TURN servers.
#[must_use]
pub fn ice_servers(config: &ConnectionConfig, turn_servers: &[TurnServer]) -> Vec<IceServer> {
    let configured = config.ice_servers.iter().map(|url| IceServer {
        urls: vec![url.clone()],
        username: None,
        credential: None,
    });
    let proposed = turn_servers.iter().map(|server| IceServer {
        urls: vec![server.url()],
        username: Some(server.username.clone()),
        credential: Some(server.password.clone()),
    });
    configured.chain(proposed).collect()
}

/// What the adapter needs to attach a local track
#[derive(Debug, Clone)]
pub struct SendTrack {
    pub kind: TrackKind,
    pub track: Option<NativeTrack>,
    pub stream_id: String,
    pub encodings: Vec<EncodingParameters>,
}

pub struct ConnectionAdapter {
    connection: Box<dyn PeerConnection>,
}

impl ConnectionAdapter {
    pub async fn create(
        factory: &dyn PeerConnectionFactory,
        config: &ConnectionConfig,
        turn_servers: &[TurnServer],
        events: PeerConnectionEventSender,
    ) -> Result<Self> {
        let pc_config = PeerConnectionConfig {
            ice_servers: ice_servers(config, turn_servers),
            ice_transport_policy: config.ice_transport_policy,
            bundle_policy: config.bundle_policy,
        };
        let ice_server_count = pc_config.ice_servers.len();

        let connection = factory.create(pc_config, events).await?;
        info!(ice_servers = ice_server_count, "Peer connection created");

        Ok(Self { connection })
    }

    /// Wrap an already created native connection
    #[must_use]
    pub fn from_connection(connection: Box<dyn PeerConnection>) -> Self {
        Self { connection }
    }

    /// Add a send-only transceiver for a local track, muted or not.
    pub async fn attach(&self, send: SendTrack) -> Result<TransceiverId> {
        let kind = send.kind;
        let transceiver = self
            .connection
            .add_transceiver(TransceiverInit {
                kind,
                direction: RTCRtpTransceiverDirection::Sendonly,
                track: send.track,
                stream_ids: vec![send.stream_id],
                send_encodings: send.encodings,
            })
            .await?;

        debug!(%kind, transceiver = transceiver.0, "Local track attached");
        Ok(transceiver)
    }

    pub async fn detach(&self, transceiver: TransceiverId) -> Result<()> {
        self.connection.remove_sender(transceiver).await?;
        debug!(transceiver = transceiver.0, "Local track detached");
        Ok(())
    }

    pub async fn replace_track(
        &self,
        transceiver: TransceiverId,
        track: Option<NativeTrack>,
    ) -> Result<()> {
        self.connection.replace_sender_track(transceiver, track).await?;
        Ok(())
    }

    pub async fn set_encodings(
        &self,
        transceiver: TransceiverId,
        encodings: Vec<EncodingParameters>,
    ) -> Result<()> {
        self.connection.set_send_encodings(transceiver, encodings).await?;
        Ok(())
    }

    /// Add receive-only transceivers until there is one per remote track the
    /// server announced in `offerData`.
    pub async fn ensure_receive_transceivers(&self, counts: TrackTypeCounts) -> Result<()> {
        let transceivers = self.connection.transceivers();
        let receiving = |kind: TrackKind| {
            transceivers
                .iter()
                .filter(|t| t.kind == kind && t.direction == RTCRtpTransceiverDirection::Recvonly)
                .count()
        };

        for (kind, wanted) in [(TrackKind::Audio, counts.audio), (TrackKind::Video, counts.video)] {
            let missing = wanted.saturating_sub(receiving(kind));
            for _ in 0..missing {
                self.connection
                    .add_transceiver(TransceiverInit {
                        kind,
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        track: None,
                        stream_ids: Vec::new(),
                        send_encodings: Vec::new(),
                    })
                    .await?;
            }
            if missing > 0 {
                debug!(%kind, added = missing, "Receive transceivers added");
            }
        }
        Ok(())
    }

    /// Create an offer and apply it locally; mids are assigned from here on.
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        let ice_restart = matches!(
            self.connection.ice_connection_state(),
            RTCIceConnectionState::Disconnected | RTCIceConnectionState::Failed
        );
        if ice_restart {
            info!("Creating offer with ICE restart");
        }

        let offer = self
            .connection
            .create_offer(OfferOptions { ice_restart })
            .await?;
        self.connection.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    pub async fn set_remote_answer(&self, answer: SessionDescription) -> Result<()> {
        self.connection.set_remote_description(answer).await?;
        Ok(())
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.connection.add_ice_candidate(candidate).await?;
        Ok(())
    }

    #[must_use]
    pub fn transceivers(&self) -> Vec<TransceiverInfo> {
        self.connection.transceivers()
    }

    /// Whether `native_id` is currently bound to one of our senders
    #[must_use]
    pub fn is_sending(&self, native_id: &str) -> bool {
        self.connection
            .transceivers()
            .iter()
            .any(|t| t.sender_track_id.as_deref() == Some(native_id))
    }

    /// The queue must not start commands while this holds. A missing
    /// connection is not unstable.
    #[must_use]
    pub fn is_unstable(&self) -> bool {
        let signaling = self.connection.signaling_state();
        let ice = self.connection.ice_connection_state();
        let overall = self.connection.connection_state();

        signaling != RTCSignalingState::Stable
            || !matches!(
                ice,
                RTCIceConnectionState::Connected | RTCIceConnectionState::Completed
            )
            || overall != RTCPeerConnectionState::Connected
    }

    #[must_use]
    pub fn ice_connection_state(&self) -> RTCIceConnectionState {
        self.connection.ice_connection_state()
    }

    pub async fn stats(&self) -> Result<StatsReport> {
        Ok(self.connection.get_stats().await?)
    }

    pub async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Box<dyn NativeDataChannel>> {
        Ok(self.connection.create_data_channel(label, init).await?)
    }

    pub async fn close(&self) -> Result<()> {
        self.connection.close().await?;
        info!("Peer connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_servers_merge_configured_and_proposed() {
        let config = ConnectionConfig {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            ..ConnectionConfig::default()
        };
        let turn = TurnServer {
            server_addr: "10.0.0.1".to_string(),
            server_port: 3478,
            transport: "udp".to_string(),
            username: "user".to_string(),
            password: "secret".to_string(),
        };

        let servers = ice_servers(&config, &[turn]);

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert!(servers[0].username.is_none());
        assert_eq!(servers[1].urls, vec!["turn:10.0.0.1:3478?transport=udp"]);
        assert_eq!(servers[1].credential.as_deref(), Some("secret"));
    }
}
