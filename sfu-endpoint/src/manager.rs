//! Local track manager
//!
//! Validates and executes the three track mutations that go through the
//! command queue, and owns the negotiation state that gates the queue.

use tracing::{debug, info};

use crate::codec::ClientIntent;
use crate::connection::ConnectionAdapter;
use crate::error::{Error, Result};
use crate::events::Signaler;
use crate::local::{LocalTrackStore, NewLocalTrack};
use crate::transport::NativeTrack;
use crate::types::{TrackBandwidthLimit, TrackId, TrackKind};

/// Negotiation in progress, if any. Renegotiation and track replacement
/// exclude each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NegotiationState {
    #[default]
    Idle,
    /// An offer/answer round is underway, local or server initiated
    Renegotiating,
    /// A sender track is being swapped
    ReplacingTrack,
}

pub struct LocalTrackManager {
    state: NegotiationState,
    store: LocalTrackStore,
    signaler: Signaler,
}

impl LocalTrackManager {
    pub fn new(store: LocalTrackStore, signaler: Signaler) -> Self {
        Self {
            state: NegotiationState::Idle,
            store,
            signaler,
        }
    }

    #[must_use]
    pub const fn state(&self) -> NegotiationState {
        self.state
    }

    #[must_use]
    pub fn is_negotiation_in_progress(&self) -> bool {
        self.state != NegotiationState::Idle
    }

    fn set_state(&mut self, state: NegotiationState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Negotiation state changed");
            self.state = state;
        }
    }

    /// A renegotiation round started, possibly on the server's initiative.
    pub fn begin_renegotiation(&mut self) {
        self.set_state(NegotiationState::Renegotiating);
    }

    /// The round ended, successfully or not.
    pub fn finish_negotiation(&mut self) {
        self.set_state(NegotiationState::Idle);
    }

    #[must_use]
    pub fn store(&self) -> &LocalTrackStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LocalTrackStore {
        &mut self.store
    }

    /// Pre-flight checks of `add_track`
    pub fn validate_add(
        &self,
        connection: Option<&ConnectionAdapter>,
        track: &NativeTrack,
        simulcast_enabled: bool,
        max_bandwidth: &TrackBandwidthLimit,
    ) -> Result<()> {
        if self.store.endpoint().id.is_empty() {
            return Err(Error::Validation(
                "cannot add tracks before being accepted by server".to_string(),
            ));
        }

        if !simulcast_enabled && !matches!(max_bandwidth, TrackBandwidthLimit::Single(_)) {
            return Err(Error::Validation(
                "simulcast is disabled, bandwidth limit must be a single value".to_string(),
            ));
        }

        if simulcast_enabled && track.kind() == TrackKind::Audio {
            return Err(Error::Validation(
                "simulcast is only supported for video tracks".to_string(),
            ));
        }

        self.validate_unused(connection, track)
    }

    /// The native track must not already be published.
    pub fn validate_unused(
        &self,
        connection: Option<&ConnectionAdapter>,
        track: &NativeTrack,
    ) -> Result<()> {
        let native_id = track.id();
        let in_use = self.store.holds_native_track(native_id)
            || connection.is_some_and(|connection| connection.is_sending(native_id));

        if in_use {
            return Err(Error::Validation(format!(
                "native track {native_id} is already added to the connection"
            )));
        }
        Ok(())
    }

    pub async fn add_track_handler(
        &mut self,
        connection: Option<&ConnectionAdapter>,
        new: NewLocalTrack,
    ) -> Result<()> {
        self.set_state(NegotiationState::Renegotiating);

        match self.store.add_track(connection, new).await {
            Ok(track) => {
                info!(track_id = %track.track_id, "Requesting renegotiation for added track");
                self.signaler.send(&ClientIntent::RenegotiateTracks);
                Ok(())
            }
            Err(e) => {
                self.set_state(NegotiationState::Idle);
                Err(e)
            }
        }
    }

    pub async fn remove_track_handler(
        &mut self,
        connection: Option<&ConnectionAdapter>,
        track_id: &TrackId,
    ) -> Result<()> {
        let connection = connection.ok_or(Error::NoConnection)?;
        self.set_state(NegotiationState::Renegotiating);

        match self.store.remove_track(Some(connection), track_id).await {
            Ok(_) => {
                info!(%track_id, "Requesting renegotiation for removed track");
                self.signaler.send(&ClientIntent::RenegotiateTracks);
                Ok(())
            }
            Err(e) => {
                self.set_state(NegotiationState::Idle);
                Err(e)
            }
        }
    }

    /// Swap the sender's track in place; never renegotiates.
    pub async fn replace_track_handler(
        &mut self,
        connection: Option<&ConnectionAdapter>,
        track_id: &TrackId,
        track: Option<NativeTrack>,
    ) -> Result<()> {
        self.set_state(NegotiationState::ReplacingTrack);
        let result = self.store.replace_track(connection, track_id, track).await;
        self.set_state(NegotiationState::Idle);
        result.map(|_| ())
    }

    /// Request a round so that data channels get negotiated.
    pub fn request_renegotiation(&mut self) {
        self.set_state(NegotiationState::Renegotiating);
        self.signaler.send(&ClientIntent::RenegotiateTracks);
    }

    /// Back to a fresh session
    pub fn reset(&mut self) {
        self.store.reset();
        self.set_state(NegotiationState::Idle);
    }
}
