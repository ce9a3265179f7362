//! Per-peer actor
//!
//! Each remote peer's [`Negotiation`] runs on its own task and consumes an
//! ordered inbox, so offer, answer and ICE for one peer are applied in arrival
//! order while different peers progress independently.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::negotiation::{Negotiation, NegotiationState, Role};

/// Work item for a peer actor
pub(crate) enum PeerCommand {
    Offer(Value),
    Answer(Value),
    RemoteCandidate(Value),
    LocalCandidate(Value),
    Close(oneshot::Sender<()>),
}

/// Handle to one remote peer's running negotiation
pub struct PeerHandle {
    remote_id: String,
    role: Role,
    commands: mpsc::UnboundedSender<PeerCommand>,
    state: watch::Receiver<NegotiationState>,
    task: JoinHandle<()>,
}

impl PeerHandle {
    /// Spawn the actor. `commands` must feed `inbox`.
    pub(crate) fn spawn(
        negotiation: Negotiation,
        commands: mpsc::UnboundedSender<PeerCommand>,
        inbox: mpsc::UnboundedReceiver<PeerCommand>,
    ) -> Self {
        let remote_id = negotiation.remote_id().to_string();
        let role = negotiation.role();
        let (state_tx, state) = watch::channel(negotiation.state());
        let task = tokio::spawn(run(negotiation, inbox, state_tx));

        Self {
            remote_id,
            role,
            commands,
            state,
            task,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Latest published negotiation state
    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<NegotiationState> {
        self.state.clone()
    }

    pub(crate) fn send(&self, command: PeerCommand) {
        if self.commands.send(command).is_err() {
            debug!("Peer {} actor already stopped", self.remote_id);
        }
    }

    /// Close the connection and wait for the actor to finish
    pub async fn close(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(PeerCommand::Close(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        let _ = self.task.await;
    }
}

async fn run(
    mut negotiation: Negotiation,
    mut inbox: mpsc::UnboundedReceiver<PeerCommand>,
    state: watch::Sender<NegotiationState>,
) {
    negotiation.start().await;
    state.send_replace(negotiation.state());

    while let Some(command) = inbox.recv().await {
        match command {
            PeerCommand::Offer(offer) => negotiation.handle_offer(offer).await,
            PeerCommand::Answer(answer) => negotiation.handle_answer(answer).await,
            PeerCommand::RemoteCandidate(ice) => negotiation.handle_remote_candidate(ice).await,
            PeerCommand::LocalCandidate(ice) => negotiation.send_local_candidate(ice),
            PeerCommand::Close(ack) => {
                negotiation.close().await;
                state.send_replace(negotiation.state());
                let _ = ack.send(());
                return;
            }
        }
        state.send_replace(negotiation.state());
    }

    negotiation.close().await;
    state.send_replace(negotiation.state());
}
