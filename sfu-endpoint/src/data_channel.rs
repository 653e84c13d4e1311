//! Auxiliary data channels
//!
//! Two channels are negotiated together with the media: a reliable (ordered)
//! one and a lossy one (unordered, no retransmissions). Each advances
//! `Init -> Creating -> Open -> Closed` on its own; the manager reports ready
//! once, the first time both are open.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DataChannelConfig;
use crate::connection::ConnectionAdapter;
use crate::error::{Error, Result};
use crate::events::{EndpointEvent, EventEmitter};
use crate::transport::{DataChannelInit, DataChannelPayload, NativeDataChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataChannelType {
    Reliable,
    Lossy,
}

impl DataChannelType {
    const fn init(self) -> DataChannelInit {
        match self {
            Self::Reliable => DataChannelInit {
                ordered: true,
                max_retransmits: None,
            },
            Self::Lossy => DataChannelInit {
                ordered: false,
                max_retransmits: Some(0),
            },
        }
    }
}

impl fmt::Display for DataChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable => f.write_str("reliable"),
            Self::Lossy => f.write_str("lossy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelStatus {
    Init,
    Creating,
    Open,
    Closed,
}

impl DataChannelStatus {
    /// `Init -> Closed` is not a transition: a channel closes only once created.
    const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::Creating)
                | (Self::Creating, Self::Open)
                | (Self::Creating, Self::Closed)
                | (Self::Open, Self::Closed)
        )
    }
}

/// Receives every payload of one channel, normalized to bytes
pub type DataCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

struct ManagedChannel {
    kind: DataChannelType,
    label: String,
    status: DataChannelStatus,
    native: Option<Box<dyn NativeDataChannel>>,
    callback: Option<DataCallback>,
}

impl ManagedChannel {
    fn new(kind: DataChannelType, label: String) -> Self {
        Self {
            kind,
            label,
            status: DataChannelStatus::Init,
            native: None,
            callback: None,
        }
    }

    fn transition(&mut self, next: DataChannelStatus) -> bool {
        if !self.status.can_become(next) {
            warn!(channel = %self.kind, from = ?self.status, to = ?next, "Ignoring invalid data channel transition");
            return false;
        }
        debug!(channel = %self.kind, from = ?self.status, to = ?next, "Data channel status changed");
        self.status = next;
        true
    }
}

pub struct DataChannelManager {
    reliable: ManagedChannel,
    lossy: ManagedChannel,
    requested: bool,
    ready_notified: bool,
    emitter: EventEmitter,
}

impl DataChannelManager {
    pub fn new(config: &DataChannelConfig, emitter: EventEmitter) -> Self {
        Self {
            reliable: ManagedChannel::new(DataChannelType::Reliable, config.reliable_label.clone()),
            lossy: ManagedChannel::new(DataChannelType::Lossy, config.lossy_label.clone()),
            requested: false,
            ready_notified: false,
            emitter,
        }
    }

    fn channel(&self, kind: DataChannelType) -> &ManagedChannel {
        match kind {
            DataChannelType::Reliable => &self.reliable,
            DataChannelType::Lossy => &self.lossy,
        }
    }

    fn channel_mut(&mut self, kind: DataChannelType) -> &mut ManagedChannel {
        match kind {
            DataChannelType::Reliable => &mut self.reliable,
            DataChannelType::Lossy => &mut self.lossy,
        }
    }

    fn by_label(&mut self, label: &str) -> Option<&mut ManagedChannel> {
        if self.reliable.label == label {
            Some(&mut self.reliable)
        } else if self.lossy.label == label {
            Some(&mut self.lossy)
        } else {
            None
        }
    }

    #[must_use]
    pub fn status(&self, kind: DataChannelType) -> DataChannelStatus {
        self.channel(kind).status
    }

    /// Channels were asked for; they are created with the connection.
    pub fn request(&mut self) {
        self.requested = true;
    }

    /// Requested but not created yet
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.requested
            && (self.reliable.status == DataChannelStatus::Init
                || self.lossy.status == DataChannelStatus::Init)
    }

    /// Create both channels on `connection`; channels already created are kept.
    pub async fn create(&mut self, connection: &ConnectionAdapter) -> Result<()> {
        self.requested = true;

        for channel in [&mut self.reliable, &mut self.lossy] {
            if channel.status != DataChannelStatus::Init {
                continue;
            }
            // Stays in `Init` on failure so the next round retries it
            let native = connection
                .create_data_channel(&channel.label, channel.kind.init())
                .await?;
            channel.native = Some(native);
            channel.transition(DataChannelStatus::Creating);
            info!(channel = %channel.kind, label = %channel.label, "Data channel created");
        }
        Ok(())
    }

    pub fn handle_open(&mut self, label: &str) {
        let Some(channel) = self.by_label(label) else {
            warn!(label, "Open event for unknown data channel");
            return;
        };
        channel.transition(DataChannelStatus::Open);

        if !self.ready_notified
            && self.reliable.status == DataChannelStatus::Open
            && self.lossy.status == DataChannelStatus::Open
        {
            self.ready_notified = true;
            info!("Data channels ready");
            self.emitter.emit(EndpointEvent::DataChannelsReady);
        }
    }

    pub fn handle_close(&mut self, label: &str) {
        match self.by_label(label) {
            Some(channel) => {
                channel.transition(DataChannelStatus::Closed);
            }
            None => warn!(label, "Close event for unknown data channel"),
        }
    }

    pub fn handle_message(&mut self, label: &str, payload: DataChannelPayload) {
        let Some(channel) = self.by_label(label) else {
            warn!(label, "Message on unknown data channel");
            return;
        };
        match &channel.callback {
            Some(callback) => callback(payload.into_bytes()),
            None => debug!(channel = %channel.kind, "No callback for data channel message"),
        }
    }

    /// Register the callback of `kind`, replacing any previous one.
    pub fn on_data(&mut self, kind: DataChannelType, callback: DataCallback) {
        self.channel_mut(kind).callback = Some(callback);
    }

    pub fn publish(&self, kind: DataChannelType, data: Bytes) -> Result<()> {
        let channel = self.channel(kind);
        let native = match (channel.status, &channel.native) {
            (DataChannelStatus::Open, Some(native)) => native,
            (status, _) => {
                return Err(Error::DataChannel(format!(
                    "{kind} channel is {status:?}, not open"
                )))
            }
        };
        native
            .send(data)
            .map_err(|e| Error::DataChannel(format!("{kind} channel send failed: {e:#}")))
    }

    /// Close both channels and start over from `Init`.
    pub fn reset(&mut self) {
        for channel in [&mut self.reliable, &mut self.lossy] {
            if let Some(native) = channel.native.take() {
                native.close();
            }
            channel.status = DataChannelStatus::Init;
        }
        self.requested = false;
        self.ready_notified = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockNativeDataChannel, MockPeerConnection};
    use parking_lot::Mutex;

    fn manager() -> (DataChannelManager, crate::events::EndpointEvents) {
        let emitter = EventEmitter::new();
        let events = emitter.subscribe();
        (DataChannelManager::new(&DataChannelConfig::default(), emitter), events)
    }

    /// Put both channels in `Creating` without a connection
    fn install(manager: &mut DataChannelManager, reliable: MockNativeDataChannel) {
        let mut lossy = MockNativeDataChannel::new();
        lossy.expect_close().return_const(());
        for (channel, native) in [
            (&mut manager.reliable, Box::new(reliable) as Box<dyn NativeDataChannel>),
            (&mut manager.lossy, Box::new(lossy) as Box<dyn NativeDataChannel>),
        ] {
            channel.transition(DataChannelStatus::Creating);
            channel.native = Some(native);
        }
    }

    #[test]
    fn test_ready_fires_once_when_both_open() {
        let (mut manager, mut events) = manager();
        let mut reliable = MockNativeDataChannel::new();
        reliable.expect_close().return_const(());
        install(&mut manager, reliable);

        manager.handle_open("reliable");
        assert!(events.try_recv().is_err());

        manager.handle_open("lossy");
        assert!(matches!(events.try_recv(), Ok(EndpointEvent::DataChannelsReady)));

        manager.handle_close("lossy");
        manager.handle_open("lossy");
        assert!(events.try_recv().is_err());
        assert_eq!(manager.status(DataChannelType::Lossy), DataChannelStatus::Closed);
    }

    #[test]
    fn test_init_cannot_close() {
        let (mut manager, _events) = manager();
        manager.handle_close("reliable");
        assert_eq!(manager.status(DataChannelType::Reliable), DataChannelStatus::Init);
    }

    #[test]
    fn test_publish_requires_open_channel() {
        let (mut manager, _events) = manager();
        let mut reliable = MockNativeDataChannel::new();
        reliable
            .expect_send()
            .withf(|data| data.as_ref() == b"ping")
            .times(1)
            .returning(|_| Ok(()));
        reliable.expect_close().return_const(());

        assert!(matches!(
            manager.publish(DataChannelType::Reliable, Bytes::from_static(b"ping")),
            Err(Error::DataChannel(_))
        ));

        install(&mut manager, reliable);
        assert!(manager
            .publish(DataChannelType::Reliable, Bytes::from_static(b"ping"))
            .is_err());

        manager.handle_open("reliable");
        manager
            .publish(DataChannelType::Reliable, Bytes::from_static(b"ping"))
            .unwrap();
    }

    #[test]
    fn test_payloads_reach_the_channel_callback() {
        let (mut manager, _events) = manager();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        manager.on_data(
            DataChannelType::Lossy,
            Arc::new(move |data| sink.lock().push(data)),
        );

        manager.handle_message("lossy", DataChannelPayload::Text("hi".to_string()));
        manager.handle_message("lossy", DataChannelPayload::Binary(Bytes::from_static(&[7])));
        manager.handle_message("reliable", DataChannelPayload::Text("ignored".to_string()));

        let received = received.lock();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], Bytes::from_static(b"hi"));
        assert_eq!(received[1].as_ref(), &[7]);
    }

    #[test]
    fn test_reset_closes_native_channels() {
        let (mut manager, _events) = manager();
        let mut reliable = MockNativeDataChannel::new();
        reliable.expect_close().times(1).return_const(());
        install(&mut manager, reliable);
        manager.request();

        manager.reset();

        assert_eq!(manager.status(DataChannelType::Reliable), DataChannelStatus::Init);
        assert!(!manager.is_pending());
    }

    fn connection_creating_channels(fail: bool) -> ConnectionAdapter {
        let mut pc = MockPeerConnection::new();
        if fail {
            pc.expect_create_data_channel()
                .returning(|_, _| Err(anyhow::anyhow!("sctp transport not ready")));
        } else {
            pc.expect_create_data_channel().returning(|_, _| {
                let mut native = MockNativeDataChannel::new();
                native.expect_close().return_const(());
                Ok(Box::new(native) as Box<dyn NativeDataChannel>)
            });
        }
        ConnectionAdapter::from_connection(Box::new(pc))
    }

    #[tokio::test]
    async fn test_failed_creation_is_retried() {
        let (mut manager, mut events) = manager();

        let failing = connection_creating_channels(true);
        assert!(manager.create(&failing).await.is_err());
        assert_eq!(manager.status(DataChannelType::Reliable), DataChannelStatus::Init);
        assert!(manager.is_pending());

        let working = connection_creating_channels(false);
        manager.create(&working).await.unwrap();
        assert_eq!(manager.status(DataChannelType::Reliable), DataChannelStatus::Creating);
        assert_eq!(manager.status(DataChannelType::Lossy), DataChannelStatus::Creating);
        assert!(!manager.is_pending());

        manager.handle_open("reliable");
        manager.handle_open("lossy");
        assert!(matches!(events.try_recv(), Ok(EndpointEvent::DataChannelsReady)));
    }

    #[test]
    fn test_lossy_channel_is_unordered_without_retransmits() {
        let init = DataChannelType::Lossy.init();
        assert!(!init.ordered);
        assert_eq!(init.max_retransmits, Some(0));
        assert!(DataChannelType::Reliable.init().ordered);
    }
}
