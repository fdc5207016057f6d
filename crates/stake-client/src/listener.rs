//! Event Listener: typed, best-effort program event subscriptions.
//!
//! Events are a hint, never a source of truth. Delivery may be late,
//! duplicated or missing entirely; callers confirm outcomes by reading
//! account state.
//!
//! Handlers run on the transport's delivery thread. Each subscription has a
//! gate that the delivery path holds while a handler runs, so once
//! [`SubscriptionHandle::unsubscribe`] returns no handler invocation for that
//! subscription is in flight or will start.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};

use borsh::BorshDeserialize;
use sol_primitives::{Pubkey, Signature};
use tracing::{debug, error, info, warn};

use crate::error::StakeClientError;
use crate::program::{discriminator, StakeEvent, DISCRIMINATOR_LEN};
use crate::rpc::{LedgerRpc, NotificationSink, ProgramNotification, SubscriptionId};

/// An event type the staking program emits.
pub trait ProgramEvent: BorshDeserialize + Send + 'static {
    /// Event name as declared by the program.
    const NAME: &'static str;

    fn event_discriminator() -> [u8; DISCRIMINATOR_LEN] {
        discriminator("event", Self::NAME)
    }

    /// Decode one payload. `Ok(None)` when the payload is a different event.
    fn decode(payload: &[u8]) -> Result<Option<Self>, StakeClientError> {
        if payload.len() < DISCRIMINATOR_LEN
            || payload[..DISCRIMINATOR_LEN] != Self::event_discriminator()
        {
            return Ok(None);
        }
        let mut body = &payload[DISCRIMINATOR_LEN..];
        Self::deserialize(&mut body)
            .map(Some)
            .map_err(|e| StakeClientError::AccountDecode(format!("{}: {e}", Self::NAME)))
    }
}

impl ProgramEvent for StakeEvent {
    const NAME: &'static str = "StakeEvent";
}

/// A decoded event and the transaction that emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent<E> {
    pub event: E,
    pub signature: Signature,
    pub slot: u64,
}

pub struct EventListener<'a> {
    rpc: &'a dyn LedgerRpc,
    program_id: Pubkey,
}

impl<'a> EventListener<'a> {
    pub fn new(rpc: &'a dyn LedgerRpc, program_id: Pubkey) -> Self {
        Self { rpc, program_id }
    }

    /// Deliver every `E` the program emits to `handler`.
    ///
    /// A panicking handler is logged and does not end the subscription.
    /// Payloads that fail to decode are logged and skipped.
    pub fn subscribe<E, F>(&self, handler: F) -> Result<SubscriptionHandle<'a>, StakeClientError>
    where
        E: ProgramEvent,
        F: FnMut(ObservedEvent<E>) + Send + 'static,
    {
        let gate = Arc::new(Mutex::new(true));
        let sink = gated_sink::<E, F>(Arc::clone(&gate), handler);

        let id = self
            .rpc
            .subscribe_program(&self.program_id, sink)
            .map_err(|e| StakeClientError::Subscription(e.to_string()))?;

        info!(program = %self.program_id, event = E::NAME, subscription = id, "subscribed");
        Ok(SubscriptionHandle {
            rpc: self.rpc,
            id,
            gate,
            closed: false,
            event_name: E::NAME,
        })
    }

    /// Like [`subscribe`](Self::subscribe), but queue events on a channel.
    pub fn subscribe_channel<E>(
        &self,
    ) -> Result<(SubscriptionHandle<'a>, Receiver<ObservedEvent<E>>), StakeClientError>
    where
        E: ProgramEvent,
    {
        let (tx, rx) = mpsc::channel();
        let handle = self.subscribe::<E, _>(move |observed| {
            if tx.send(observed).is_err() {
                debug!(event = E::NAME, "receiver dropped, discarding event");
            }
        })?;
        Ok((handle, rx))
    }
}

fn gated_sink<E, F>(gate: Arc<Mutex<bool>>, mut handler: F) -> NotificationSink
where
    E: ProgramEvent,
    F: FnMut(ObservedEvent<E>) + Send + 'static,
{
    Box::new(move |note: ProgramNotification| {
        let active = gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !*active {
            return;
        }
        for payload in &note.data {
            match E::decode(payload) {
                Ok(Some(event)) => {
                    let observed = ObservedEvent {
                        event,
                        signature: note.signature,
                        slot: note.slot,
                    };
                    if panic::catch_unwind(AssertUnwindSafe(|| handler(observed))).is_err() {
                        error!(event = E::NAME, signature = %note.signature, "event handler panicked");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(signature = %note.signature, error = %e, "skipping undecodable event"),
            }
        }
    })
}

/// A live subscription. Dropping it unsubscribes.
pub struct SubscriptionHandle<'a> {
    rpc: &'a dyn LedgerRpc,
    id: SubscriptionId,
    gate: Arc<Mutex<bool>>,
    closed: bool,
    event_name: &'static str,
}

impl SubscriptionHandle<'_> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        !self.closed
    }

    /// Stop delivery. Once it has succeeded, calling it again is a no-op.
    ///
    /// The handler is cut off before the transport is told, so a transport
    /// error here still leaves no handler running. The transport side stays
    /// open until a later call (or drop) gets through.
    pub fn unsubscribe(&mut self) -> Result<(), StakeClientError> {
        if self.closed {
            return Ok(());
        }
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = false;

        self.rpc
            .unsubscribe_program(self.id)
            .map_err(|e| StakeClientError::Subscription(e.to_string()))?;
        self.closed = true;
        info!(event = self.event_name, subscription = self.id, "unsubscribed");
        Ok(())
    }
}

impl Drop for SubscriptionHandle<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.unsubscribe() {
            warn!(subscription = self.id, error = %e, "unsubscribe on drop failed");
        }
    }
}
