//! Command queue
//!
//! Every track mutation is a [`Command`]. Commands begin strictly in
//! submission order and only while no negotiation is in progress and the
//! connection is stable. At most one command is in flight: a command resolved
//! after renegotiation keeps its notifier here until the queue can move on.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::local::NewLocalTrack;
use crate::transport::NativeTrack;
use crate::types::TrackId;

/// When a successful command counts as complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePolicy {
    /// As soon as the handler returns
    OnHandlerResolve,
    /// Once the offer/answer round the handler started is over
    AfterRenegotiation,
}

#[derive(Debug)]
pub enum CommandKind {
    AddTrack(NewLocalTrack),
    RemoveTrack(TrackId),
    ReplaceTrack {
        track_id: TrackId,
        track: Option<NativeTrack>,
    },
    CreateDataChannels,
}

impl CommandKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AddTrack(_) => "addTrack",
            Self::RemoveTrack(_) => "removeTrack",
            Self::ReplaceTrack { .. } => "replaceTrack",
            Self::CreateDataChannels => "createDataChannels",
        }
    }
}

type Notifier = oneshot::Sender<Result<()>>;

/// Undo for a command whose renegotiation never completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    /// Withdraw a track that was added to the store
    RemoveTrack(TrackId),
}

impl Rollback {
    fn of(command: &CommandKind) -> Option<Self> {
        match command {
            CommandKind::AddTrack(new) => Some(Self::RemoveTrack(new.track_id.clone())),
            _ => None,
        }
    }
}

struct InFlight {
    notifier: Notifier,
    rollback: Option<Rollback>,
}

pub struct Command {
    kind: CommandKind,
    policy: ResolvePolicy,
    notifier: Notifier,
}

/// Settles with the outcome of a queued command
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Completion {
    /// Outcome, if already settled
    pub fn try_result(&mut self) -> Option<Result<()>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::CommandDropped)),
        }
    }
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::CommandDropped)))
    }
}

/// What the queue drives
#[async_trait]
pub trait CommandExecutor: Send {
    fn is_negotiation_in_progress(&self) -> bool;

    fn is_connection_unstable(&self) -> bool;

    /// Synchronous validation, run at submission and again before execution
    fn pre_check(&self, command: &CommandKind) -> Result<()>;

    async fn execute(&mut self, command: CommandKind) -> Result<()>;
}

#[derive(Default)]
pub struct CommandsQueue {
    commands: VecDeque<Command>,
    in_flight: Option<InFlight>,
}

impl CommandsQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Append a command. The caller re-arms the queue with [`Self::process_next`].
    pub fn push(&mut self, kind: CommandKind, policy: ResolvePolicy) -> Completion {
        let (notifier, rx) = oneshot::channel();
        debug!(command = kind.name(), queued = self.commands.len() + 1, "Command enqueued");
        self.commands.push_back(Command {
            kind,
            policy,
            notifier,
        });
        Completion { rx }
    }

    /// Start as many commands as the gates allow.
    pub async fn process_next<E>(&mut self, executor: &mut E)
    where
        E: CommandExecutor + ?Sized,
    {
        loop {
            if executor.is_negotiation_in_progress() || executor.is_connection_unstable() {
                return;
            }

            if let Some(in_flight) = self.in_flight.take() {
                debug!("Command resolved after renegotiation");
                let _ = in_flight.notifier.send(Ok(()));
            }

            let Some(Command {
                kind,
                policy,
                notifier,
            }) = self.commands.pop_front()
            else {
                return;
            };

            let name = kind.name();
            let rollback = Rollback::of(&kind);
            debug!(command = name, remaining = self.commands.len(), "Command started");

            let outcome = match executor.pre_check(&kind) {
                Ok(()) => executor.execute(kind).await,
                Err(e) => Err(e),
            };

            match (outcome, policy) {
                (Err(e), _) => {
                    warn!(command = name, error = %e, "Command failed");
                    let _ = notifier.send(Err(e));
                }
                (Ok(()), ResolvePolicy::OnHandlerResolve) => {
                    debug!(command = name, "Command resolved");
                    let _ = notifier.send(Ok(()));
                }
                (Ok(()), ResolvePolicy::AfterRenegotiation) => {
                    self.in_flight = Some(InFlight { notifier, rollback });
                }
            }
        }
    }

    /// Reject the in-flight command, e.g. when its offer could not be made.
    /// Returns what the caller has to undo for it.
    pub fn reject_in_flight(&mut self, error: Error) -> Option<Rollback> {
        let in_flight = self.in_flight.take()?;
        warn!(error = %error, "In-flight command rejected");
        let _ = in_flight.notifier.send(Err(error));
        in_flight.rollback
    }

    /// Reject everything, in flight and queued, with a disconnect reason.
    pub fn clean_up(&mut self, reason: &str) {
        if let Some(in_flight) = self.in_flight.take() {
            let _ = in_flight
                .notifier
                .send(Err(Error::Disconnected(reason.to_string())));
        }

        let rejected = self.commands.len();
        for command in self.commands.drain(..) {
            let _ = command
                .notifier
                .send(Err(Error::Disconnected(reason.to_string())));
        }

        if rejected > 0 {
            debug!(rejected, reason, "Queued commands rejected");
        }
    }
}
