//! WebRTC endpoint
//!
//! Top-level dispatcher. Decodes media events from the server, drives the
//! offer/answer exchange, keeps both track stores current and re-arms the
//! command queue whenever something that gated it changes.
//!
//! The endpoint is driven from a single task: the host feeds it server media
//! events and native connection events, and forwards
//! [`EndpointEvent::SendMediaEvent`] payloads back to the server.
//!
//! ```rust,ignore
//! let (mut endpoint, mut pc_events) = WebRTCEndpoint::new(config, factory, Arc::new(JsonCodec));
//! let mut events = endpoint.subscribe();
//! endpoint.connect(json!({"name": "alice"}));
//!
//! loop {
//!     tokio::select! {
//!         Some(raw) = socket.next() => endpoint.receive_media_event(&raw).await?,
//!         Some(event) = pc_events.recv() => endpoint.handle_peer_connection_event(event).await,
//!         Some(event) = events.recv() => { /* forward SendMediaEvent, update UI */ }
//!     }
//! }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::codec::{
    ClientIntent, EndpointAnnouncement, MediaEventCodec, ServerEvent, TrackAnnouncement,
    TrackTypeCounts, TurnServer,
};
use crate::config::EndpointConfig;
use crate::connection::ConnectionAdapter;
use crate::data_channel::{DataCallback, DataChannelManager, DataChannelStatus, DataChannelType};
use crate::error::{Error, Result};
use crate::events::{EndpointEvent, EndpointEvents, EventEmitter, Signaler};
use crate::local::{LocalEndpoint, LocalTrack, LocalTrackStore, NewLocalTrack};
use crate::manager::{LocalTrackManager, NegotiationState};
use crate::queue::{
    CommandExecutor, CommandKind, CommandsQueue, Completion, ResolvePolicy, Rollback,
};
use crate::remote::{MetadataParser, RemoteEndpoint, RemoteTrack, RemoteTrackStore};
use crate::transport::{
    IceCandidate, NativeTrack, PeerConnectionEvent, PeerConnectionEventSender,
    PeerConnectionEvents, PeerConnectionFactory, SessionDescription, StatsReport,
};
use crate::types::{
    EndpointId, SimulcastConfig, TrackBandwidthLimit, TrackId, TrackVariant,
};

/// Everything the queue executes commands against
struct EndpointCore {
    config: EndpointConfig,
    factory: Arc<dyn PeerConnectionFactory>,
    pc_events: PeerConnectionEventSender,
    connection: Option<ConnectionAdapter>,
    manager: LocalTrackManager,
    remote: RemoteTrackStore,
    data_channels: DataChannelManager,
    signaler: Signaler,
}

impl EndpointCore {
    fn local_id(&self) -> &EndpointId {
        &self.manager.store().endpoint().id
    }

    fn is_local(&self, endpoint_id: &EndpointId) -> bool {
        !endpoint_id.is_empty() && endpoint_id == self.local_id()
    }

    /// Create the connection on the first `offerData` and attach everything
    /// that was waiting for it.
    async fn ensure_connection(&mut self, turn_servers: &[TurnServer]) -> Result<()> {
        if self.connection.is_none() {
            let connection = ConnectionAdapter::create(
                self.factory.as_ref(),
                &self.config.connection,
                turn_servers,
                self.pc_events.clone(),
            )
            .await?;
            self.connection = Some(connection);
        }

        let Some(connection) = self.connection.as_ref() else {
            return Err(Error::NoConnection);
        };
        self.manager.store_mut().attach_all(connection).await?;
        if self.data_channels.is_pending() {
            self.data_channels.create(connection).await?;
        }
        Ok(())
    }

    async fn send_offer(
        &mut self,
        tracks_types: TrackTypeCounts,
        turn_servers: &[TurnServer],
    ) -> Result<()> {
        self.ensure_connection(turn_servers).await?;
        let connection = self.connection.as_ref().ok_or(Error::NoConnection)?;

        connection.ensure_receive_transceivers(tracks_types).await?;
        let offer = connection.create_offer().await?;

        let store = self.manager.store();
        let mid_to_track_id = store.mid_to_track_id(&connection.transceivers());
        info!(
            tracks = store.tracks().len(),
            mids = mid_to_track_id.len(),
            "Sending SDP offer"
        );
        self.signaler.send(&ClientIntent::SdpOffer {
            offer,
            track_id_to_metadata: store.offer_metadata(),
            track_id_to_bitrates: store.offer_bitrates(),
            mid_to_track_id,
        });

        self.manager.store_mut().mark_offered();
        Ok(())
    }

    /// Undo a command whose round failed before an offer went out.
    async fn roll_back(&mut self, rollback: Rollback) {
        match rollback {
            Rollback::RemoveTrack(track_id) => {
                let removed = self
                    .manager
                    .store_mut()
                    .remove_track(self.connection.as_ref(), &track_id)
                    .await;
                if let Err(e) = removed {
                    warn!(%track_id, error = %e, "Failed to withdraw rejected track");
                }
            }
        }
    }

    async fn apply_answer(
        &mut self,
        answer: SessionDescription,
        mid_to_track_id: &HashMap<String, TrackId>,
    ) {
        self.manager.store_mut().apply_answer(mid_to_track_id);
        self.remote.set_mid_mapping(mid_to_track_id);

        match &self.connection {
            Some(connection) => {
                if let Err(e) = connection.set_remote_answer(answer).await {
                    error!(error = %e, "Failed to apply SDP answer");
                    self.signaler
                        .emit(EndpointEvent::ConnectionError(format!("failed to apply answer: {e}")));
                }
            }
            None => warn!("SDP answer without a peer connection"),
        }

        self.manager.finish_negotiation();
    }

    fn connected(&mut self, endpoint_id: EndpointId, others: Vec<EndpointAnnouncement>) {
        self.manager.store_mut().set_endpoint_id(endpoint_id.clone());

        for announcement in others {
            if self.is_local(&announcement.id) {
                continue;
            }
            self.remote.add_remote_endpoint(announcement);
        }

        let other_endpoints = self.remote.endpoints().into_values().collect();
        self.signaler.emit(EndpointEvent::Connected {
            endpoint_id,
            other_endpoints,
        });
    }

    fn tracks_added(&mut self, endpoint_id: &EndpointId, tracks: HashMap<TrackId, TrackAnnouncement>) {
        if self.is_local(endpoint_id) {
            return;
        }
        // The server follows up with offerData; no command may start meanwhile.
        self.manager.begin_renegotiation();
        if let Err(e) = self.remote.add_tracks(endpoint_id, tracks) {
            warn!(%endpoint_id, error = %e, "Dropping tracksAdded");
        }
    }

    fn tracks_removed(&mut self, endpoint_id: &EndpointId, track_ids: &[TrackId]) {
        if self.is_local(endpoint_id) {
            return;
        }
        self.manager.begin_renegotiation();
        if let Err(e) = self.remote.remove_tracks(endpoint_id, track_ids) {
            warn!(%endpoint_id, error = %e, "Dropping tracksRemoved");
        }
    }

    async fn add_candidate(&self, candidate: IceCandidate) {
        match &self.connection {
            Some(connection) => {
                if let Err(e) = connection.add_ice_candidate(candidate).await {
                    warn!(error = %e, "Failed to add remote ICE candidate");
                }
            }
            None => warn!("Dropping ICE candidate received before the peer connection"),
        }
    }

    fn close_session(&mut self) -> Option<ConnectionAdapter> {
        self.data_channels.reset();
        self.manager.reset();
        self.remote.reset();
        self.connection.take()
    }
}

#[async_trait]
impl CommandExecutor for EndpointCore {
    fn is_negotiation_in_progress(&self) -> bool {
        self.manager.is_negotiation_in_progress()
    }

    fn is_connection_unstable(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ConnectionAdapter::is_unstable)
    }

    fn pre_check(&self, command: &CommandKind) -> Result<()> {
        let connection = self.connection.as_ref();
        match command {
            CommandKind::AddTrack(new) => self.manager.validate_add(
                connection,
                &new.track,
                new.simulcast_config.as_ref().is_some_and(|c| c.enabled),
                &new.max_bandwidth,
            ),
            CommandKind::ReplaceTrack {
                track_id,
                track: Some(native),
            } => {
                let current = self
                    .manager
                    .store()
                    .track(track_id)
                    .and_then(|track| track.track.as_ref());
                // Replacing a track with itself is allowed
                if current.is_some_and(|current| current.id() == native.id()) {
                    return Ok(());
                }
                self.manager.validate_unused(connection, native)
            }
            CommandKind::ReplaceTrack { track: None, .. }
            | CommandKind::RemoveTrack(_)
            | CommandKind::CreateDataChannels => Ok(()),
        }
    }

    async fn execute(&mut self, command: CommandKind) -> Result<()> {
        let connection = self.connection.as_ref();
        match command {
            CommandKind::AddTrack(new) => self.manager.add_track_handler(connection, new).await,
            CommandKind::RemoveTrack(track_id) => {
                self.manager.remove_track_handler(connection, &track_id).await
            }
            CommandKind::ReplaceTrack { track_id, track } => {
                self.manager
                    .replace_track_handler(connection, &track_id, track)
                    .await
            }
            CommandKind::CreateDataChannels => {
                self.data_channels.request();
                if let Some(connection) = connection {
                    self.data_channels.create(connection).await?;
                }
                self.manager.request_renegotiation();
                Ok(())
            }
        }
    }
}

/// Client endpoint of an SFU room
pub struct WebRTCEndpoint {
    core: EndpointCore,
    queue: CommandsQueue,
}

impl WebRTCEndpoint {
    /// Create an endpoint. The returned receiver carries the callbacks of the
    /// native connection; feed them to [`Self::handle_peer_connection_event`].
    pub fn new(
        config: EndpointConfig,
        factory: Arc<dyn PeerConnectionFactory>,
        codec: Arc<dyn MediaEventCodec>,
    ) -> (Self, PeerConnectionEvents) {
        let (pc_events, pc_rx) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new();
        let signaler = Signaler::new(codec, emitter.clone());

        let store = LocalTrackStore::new(config.bitrates.clone(), signaler.clone());
        let core = EndpointCore {
            manager: LocalTrackManager::new(store, signaler.clone()),
            remote: RemoteTrackStore::new(emitter.clone()),
            data_channels: DataChannelManager::new(&config.data_channels, emitter),
            connection: None,
            config,
            factory,
            pc_events,
            signaler,
        };

        (
            Self {
                core,
                queue: CommandsQueue::new(),
            },
            pc_rx,
        )
    }

    pub fn subscribe(&self) -> EndpointEvents {
        self.core.signaler.emitter().subscribe()
    }

    pub fn set_endpoint_metadata_parser(&mut self, parser: MetadataParser) {
        self.core.remote.set_endpoint_parser(parser);
    }

    pub fn set_track_metadata_parser(&mut self, parser: MetadataParser) {
        self.core.remote.set_track_parser(parser);
    }

    /// Ask the server to join with `metadata`
    pub fn connect(&mut self, metadata: Value) {
        info!("Connecting");
        self.core
            .manager
            .store_mut()
            .set_endpoint_metadata(metadata.clone());
        self.core.signaler.send(&ClientIntent::Connect { metadata });
    }

    /// Handle one media event from the server. A malformed event is dropped
    /// and reported; the session goes on.
    pub async fn receive_media_event(&mut self, raw: &[u8]) -> Result<()> {
        let event = match self.core.signaler.codec().decode(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable media event");
                return Err(e.into());
            }
        };
        self.handle_server_event(event).await;
        Ok(())
    }

    /// Dispatch an already decoded server event
    pub async fn handle_server_event(&mut self, event: ServerEvent) {
        debug!(event = event.name(), "Server event");
        let core = &mut self.core;

        match event {
            ServerEvent::Connected {
                endpoint_id,
                other_endpoints,
            } => core.connected(endpoint_id, other_endpoints),

            ServerEvent::OfferData {
                tracks_types,
                turn_servers,
            } => {
                core.manager.begin_renegotiation();
                if let Err(e) = core.send_offer(tracks_types, &turn_servers).await {
                    error!(error = %e, "Failed to create SDP offer");
                    core.signaler
                        .emit(EndpointEvent::ConnectionError(format!("failed to create offer: {e}")));
                    if let Some(rollback) = self.queue.reject_in_flight(e) {
                        core.roll_back(rollback).await;
                    }
                    core.manager.finish_negotiation();
                    self.queue.process_next(core).await;
                }
            }

            ServerEvent::SdpAnswer {
                answer,
                mid_to_track_id,
            } => {
                core.apply_answer(answer, &mid_to_track_id).await;
                self.queue.process_next(core).await;
            }

            ServerEvent::TracksAdded { endpoint_id, tracks } => {
                core.tracks_added(&endpoint_id, tracks);
            }

            ServerEvent::TracksRemoved {
                endpoint_id,
                track_ids,
            } => core.tracks_removed(&endpoint_id, &track_ids),

            ServerEvent::Candidate(candidate) => core.add_candidate(candidate).await,

            ServerEvent::EndpointAdded(announcement) => {
                if !core.is_local(&announcement.id) {
                    core.remote.add_remote_endpoint(announcement);
                }
            }

            ServerEvent::EndpointRemoved { endpoint_id } => {
                if core.is_local(&endpoint_id) {
                    return;
                }
                if let Err(e) = core.remote.remove_remote_endpoint(&endpoint_id) {
                    warn!(error = %e, "Dropping endpointRemoved");
                }
            }

            ServerEvent::EndpointUpdated {
                endpoint_id,
                metadata,
            } => {
                if core.is_local(&endpoint_id) {
                    return;
                }
                if let Err(e) = core.remote.update_remote_endpoint(&endpoint_id, metadata) {
                    warn!(error = %e, "Dropping endpointUpdated");
                }
            }

            ServerEvent::TrackUpdated {
                endpoint_id,
                track_id,
                metadata,
            } => {
                if let Err(e) = core.remote.update_remote_track(&endpoint_id, &track_id, metadata) {
                    warn!(error = %e, "Dropping trackUpdated");
                }
            }

            ServerEvent::TrackVariantSwitched {
                track_id,
                variant,
                reason,
                ..
            } => {
                if let Err(e) = core.remote.set_track_variant(&track_id, variant, reason) {
                    warn!(error = %e, "Dropping trackVariantSwitched");
                }
            }

            ServerEvent::TrackVariantEnabled {
                track_id, variant, ..
            } => {
                if let Err(e) = core.remote.set_variant_enabled(&track_id, variant, true) {
                    warn!(error = %e, "Dropping trackVariantEnabled");
                }
            }

            ServerEvent::TrackVariantDisabled {
                track_id, variant, ..
            } => {
                if let Err(e) = core.remote.set_variant_enabled(&track_id, variant, false) {
                    warn!(error = %e, "Dropping trackVariantDisabled");
                }
            }

            ServerEvent::VadNotification { track_id, status } => {
                if let Err(e) = core.remote.set_vad_status(&track_id, status) {
                    warn!(error = %e, "Dropping vadNotification");
                }
            }

            ServerEvent::BandwidthEstimation { estimation } => {
                core.signaler
                    .emit(EndpointEvent::BandwidthEstimationChanged(estimation));
            }

            ServerEvent::Error { message } => {
                error!(%message, "Signaling error from server");
                core.signaler.emit(EndpointEvent::SignalingError(message));
                self.disconnect().await;
            }
        }
    }

    /// Handle one callback of the native connection
    pub async fn handle_peer_connection_event(&mut self, event: PeerConnectionEvent) {
        let core = &mut self.core;

        match event {
            PeerConnectionEvent::Track {
                mid,
                stream_id,
                track,
            } => {
                if let Err(e) = core.remote.set_ready(&mid, stream_id, track) {
                    warn!(%mid, error = %e, "Inbound track without a known remote track");
                }
            }

            PeerConnectionEvent::IceCandidate(candidate) => {
                core.signaler.send(&ClientIntent::Candidate(candidate));
            }

            PeerConnectionEvent::SignalingStateChange(state) => {
                debug!(%state, "Signaling state changed");
                core.signaler.emit(EndpointEvent::SignalingStateChanged(state));
                self.queue.process_next(core).await;
            }

            PeerConnectionEvent::IceGatheringStateChange(state) => {
                debug!(%state, "ICE gathering state changed");
                self.queue.process_next(core).await;
            }

            PeerConnectionEvent::IceConnectionStateChange(state) => {
                info!(%state, "ICE connection state changed");
                core.signaler
                    .emit(EndpointEvent::IceConnectionStateChanged(state));
                match state {
                    RTCIceConnectionState::Disconnected => {
                        // Renegotiating restarts ICE sooner than the native timeout
                        core.signaler.send(&ClientIntent::RenegotiateTracks);
                    }
                    RTCIceConnectionState::Failed => {
                        core.signaler.emit(EndpointEvent::ConnectionError(
                            "ICE connection failed".to_string(),
                        ));
                    }
                    _ => {}
                }
                self.queue.process_next(core).await;
            }

            PeerConnectionEvent::ConnectionStateChange(state) => {
                info!(%state, "Peer connection state changed");
                core.signaler.emit(EndpointEvent::ConnectionStateChanged(state));
                if state == RTCPeerConnectionState::Failed {
                    core.signaler.emit(EndpointEvent::ConnectionError(
                        "peer connection failed".to_string(),
                    ));
                }
                self.queue.process_next(core).await;
            }

            PeerConnectionEvent::DataChannelOpen { label } => core.data_channels.handle_open(&label),
            PeerConnectionEvent::DataChannelClose { label } => {
                core.data_channels.handle_close(&label);
            }
            PeerConnectionEvent::DataChannelMessage { label, payload } => {
                core.data_channels.handle_message(&label, payload);
            }
        }
    }

    /// Validate, enqueue and re-arm the queue
    async fn submit(&mut self, kind: CommandKind, policy: ResolvePolicy) -> Result<Completion> {
        self.core.pre_check(&kind)?;
        let completion = self.queue.push(kind, policy);
        self.queue.process_next(&mut self.core).await;
        Ok(completion)
    }

    /// Publish `track`. The id is returned immediately; the completion
    /// settles once the server confirmed the track in an answer.
    pub async fn add_track(
        &mut self,
        track: NativeTrack,
        metadata: Value,
        simulcast_config: Option<SimulcastConfig>,
        max_bandwidth: TrackBandwidthLimit,
    ) -> Result<(TrackId, Completion)> {
        let track_id = TrackId::generate(self.core.local_id());
        let completion = self
            .submit(
                CommandKind::AddTrack(NewLocalTrack {
                    track_id: track_id.clone(),
                    track,
                    metadata,
                    simulcast_config,
                    max_bandwidth,
                }),
                ResolvePolicy::AfterRenegotiation,
            )
            .await?;
        Ok((track_id, completion))
    }

    pub async fn remove_track(&mut self, track_id: TrackId) -> Result<Completion> {
        self.submit(
            CommandKind::RemoveTrack(track_id),
            ResolvePolicy::AfterRenegotiation,
        )
        .await
    }

    /// Swap the native track of a local track. `None` mutes it.
    pub async fn replace_track(
        &mut self,
        track_id: TrackId,
        track: Option<NativeTrack>,
    ) -> Result<Completion> {
        self.submit(
            CommandKind::ReplaceTrack { track_id, track },
            ResolvePolicy::OnHandlerResolve,
        )
        .await
    }

    pub fn update_track_metadata(&mut self, track_id: &TrackId, metadata: Value) -> Result<()> {
        self.core
            .manager
            .store_mut()
            .update_track_metadata(track_id, metadata)
    }

    pub fn update_endpoint_metadata(&mut self, metadata: Value) {
        self.core
            .manager
            .store_mut()
            .set_endpoint_metadata(metadata.clone());
        self.core.signaler.send(&ClientIntent::UpdateEndpointMetadata {
            metadata: metadata.clone(),
        });
        self.core
            .signaler
            .emit(EndpointEvent::LocalEndpointMetadataChanged(metadata));
    }

    /// Limit a local track, kbps (`0` = unlimited)
    pub async fn set_track_bandwidth(
        &mut self,
        track_id: &TrackId,
        limit: TrackBandwidthLimit,
    ) -> Result<()> {
        let core = &mut self.core;
        core.manager
            .store_mut()
            .set_track_bandwidth(core.connection.as_ref(), track_id, limit)
            .await
    }

    /// Limit one variant of a simulcast track, kbps
    pub async fn set_encoding_bandwidth(
        &mut self,
        track_id: &TrackId,
        variant: TrackVariant,
        kbps: u64,
    ) -> Result<()> {
        let core = &mut self.core;
        core.manager
            .store_mut()
            .set_encoding_bandwidth(core.connection.as_ref(), track_id, variant, kbps)
            .await
    }

    pub async fn enable_track_encoding(
        &mut self,
        track_id: &TrackId,
        variant: TrackVariant,
    ) -> Result<()> {
        let core = &mut self.core;
        core.manager
            .store_mut()
            .set_encoding_active(core.connection.as_ref(), track_id, variant, true)
            .await
    }

    pub async fn disable_track_encoding(
        &mut self,
        track_id: &TrackId,
        variant: TrackVariant,
    ) -> Result<()> {
        let core = &mut self.core;
        core.manager
            .store_mut()
            .set_encoding_active(core.connection.as_ref(), track_id, variant, false)
            .await
    }

    /// Ask the server to forward `variant` of a remote simulcast track
    pub fn set_target_track_encoding(
        &mut self,
        track_id: &TrackId,
        variant: TrackVariant,
    ) -> Result<()> {
        let track = self
            .core
            .remote
            .track(track_id)
            .ok_or_else(|| Error::NotFound(format!("remote track {track_id}")))?;
        if !track.simulcast_config.as_ref().is_some_and(|c| c.enabled) {
            return Err(Error::Validation(format!(
                "remote track {track_id} is not a simulcast track"
            )));
        }

        self.core.signaler.send(&ClientIntent::SetTargetTrackVariant {
            track_id: track_id.clone(),
            variant,
        });
        self.core
            .signaler
            .emit(EndpointEvent::TargetTrackEncodingRequested {
                track_id: track_id.clone(),
                variant,
            });
        Ok(())
    }

    #[must_use]
    pub fn get_remote_tracks(&self) -> HashMap<TrackId, RemoteTrack> {
        self.core.remote.tracks()
    }

    #[must_use]
    pub fn get_remote_endpoints(&self) -> HashMap<EndpointId, RemoteEndpoint> {
        self.core.remote.endpoints()
    }

    #[must_use]
    pub fn get_remote_endpoint(&self, endpoint_id: &EndpointId) -> Option<RemoteEndpoint> {
        self.core.remote.endpoint(endpoint_id).cloned()
    }

    #[must_use]
    pub fn get_local_tracks(&self) -> HashMap<TrackId, LocalTrack> {
        self.core.manager.store().tracks()
    }

    #[must_use]
    pub fn local_endpoint(&self) -> &LocalEndpoint {
        self.core.manager.store().endpoint()
    }

    #[must_use]
    pub fn negotiation_state(&self) -> NegotiationState {
        self.core.manager.state()
    }

    /// Commands waiting to begin
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    pub async fn get_statistics(&self) -> Result<StatsReport> {
        self.core
            .connection
            .as_ref()
            .ok_or(Error::NoConnection)?
            .stats()
            .await
    }

    /// Negotiate the reliable and lossy data channels
    pub async fn connect_data_channels(&mut self) -> Result<Completion> {
        self.submit(
            CommandKind::CreateDataChannels,
            ResolvePolicy::AfterRenegotiation,
        )
        .await
    }

    pub fn publish_data(&self, channel: DataChannelType, data: Bytes) -> Result<()> {
        self.core.data_channels.publish(channel, data)
    }

    #[must_use]
    pub fn data_channel_status(&self, channel: DataChannelType) -> DataChannelStatus {
        self.core.data_channels.status(channel)
    }

    pub fn on_data(&mut self, channel: DataChannelType, callback: DataCallback) {
        self.core.data_channels.on_data(channel, callback);
    }

    /// Leave the room. Pending commands are rejected, the connection is
    /// closed and both stores are cleared; `connect` may be called again.
    pub async fn disconnect(&mut self) {
        info!("Disconnecting");
        if !self.queue.is_empty() || self.queue.has_in_flight() {
            info!(
                queued = self.queue.len(),
                in_flight = self.queue.has_in_flight(),
                "Rejecting unfinished commands"
            );
        }
        self.queue.clean_up("endpoint disconnected");

        self.core.signaler.send(&ClientIntent::Disconnect);
        self.core.signaler.emit(EndpointEvent::DisconnectRequested);

        if let Some(connection) = self.core.close_session() {
            if let Err(e) = connection.close().await {
                warn!(error = %e, "Failed to close peer connection");
            }
        }

        self.core.signaler.emit(EndpointEvent::Disconnected);
    }
}
