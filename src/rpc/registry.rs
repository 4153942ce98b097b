//! Subscription registry.
//!
//! Owns every live subscription record and is the only thing that turns
//! a peer-supplied handle back into a record. Records are created by
//! Add-Handler calls (repeating) and by calls carrying a callback
//! (one-shot), and are released exactly once: by Remove-Handler, by the
//! single firing of a one-shot callback, or by session cleanup.
//!
//! Access goes through the server's state lock, and the lock is never
//! held while implementation code runs: removal routines and event
//! packing happen after the record has been taken out.

use std::sync::{Arc, Weak};

use log::debug;

use crate::error::Violation;
use crate::schema::MessageId;

use super::dispatch::CallContext;
use super::message::Message;
use super::pack::pack_event;
use super::pool::{Pool, SlotRef};
use super::session::SessionRef;
use super::shared::Core;
use super::value::Value;

/// Implementation-side removal routine for a registered handler.
///
/// Called once, when the subscription dies: on Remove-Handler, or on
/// cleanup after the owning session closed.
pub trait HandlerRegistration: Send {
    fn remove(self: Box<Self>, ctx: &CallContext);
}

impl<F> HandlerRegistration for F
where
    F: FnOnce(&CallContext) + Send,
{
    fn remove(self: Box<Self>, ctx: &CallContext) {
        (*self)(ctx);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// Add-Handler registration; lives until removed.
    Repeating,
    /// Callback argument of a plain call; fires at most once.
    OneShot,
}

pub struct SubscriptionRecord {
    pub session: SessionRef,
    /// The caller's opaque context, echoed in every event.
    pub context: u32,
    /// Operation that created the record; events carry this id.
    pub op: MessageId,
    pub kind: SubscriptionKind,
    pub registration: Option<Box<dyn HandlerRegistration>>,
}

/// Safe reference map from handle to subscription record.
pub struct Registry {
    records: Pool<SubscriptionRecord>,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Pool::with_capacity("subscription", capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count_for(&self, session: SessionRef) -> usize {
        self.records
            .iter()
            .filter(|(_, r)| r.session == session)
            .count()
    }

    /// Allocate a record. Running out of records is fatal.
    pub fn insert(&mut self, record: SubscriptionRecord) -> SlotRef {
        match self.records.alloc(record) {
            Ok(r) => r,
            Err(e) => crate::fatal!("IPC: {}", e),
        }
    }

    /// Store the removal routine once the implementation accepted the
    /// registration. Hands it back if the record is already gone.
    pub fn attach(
        &mut self,
        r: SlotRef,
        registration: Box<dyn HandlerRegistration>,
    ) -> Result<(), Box<dyn HandlerRegistration>> {
        match self.records.get_mut(r) {
            Some(record) => {
                record.registration = Some(registration);
                Ok(())
            }
            None => Err(registration),
        }
    }

    /// Drop a record without running its removal routine.
    pub fn cancel(&mut self, r: SlotRef) -> Option<SubscriptionRecord> {
        self.records.release(r)
    }

    /// Resolve a handle presented to Remove-Handler and take the record.
    ///
    /// The handle must name a live repeating record that `session` created
    /// through `add`; anything else is a forged or stale reference.
    pub fn take_for_remove(
        &mut self,
        session: SessionRef,
        add: MessageId,
        raw: u32,
    ) -> Result<SubscriptionRecord, Violation> {
        let r = SlotRef::from_raw(raw).ok_or(Violation::InvalidReference(raw))?;
        let owned = self.records.get(r).is_some_and(|rec| {
            rec.session == session && rec.op == add && rec.kind == SubscriptionKind::Repeating
        });
        if !owned {
            return Err(Violation::InvalidReference(raw));
        }
        self.records
            .release(r)
            .ok_or(Violation::InvalidReference(raw))
    }

    /// Where an event for `r` goes. One-shot records are released here.
    fn event_target(&mut self, r: SlotRef, kind: SubscriptionKind) -> Option<(SessionRef, u32)> {
        let record = self.records.get(r)?;
        if record.kind != kind {
            crate::fatal!(
                "IPC: notifier kind {:?} used on {:?} subscription",
                kind,
                record.kind
            );
        }
        let target = (record.session, record.context);
        if kind == SubscriptionKind::OneShot {
            self.records.release(r);
        }
        Some(target)
    }

    /// Take every record owned by `session`.
    pub fn release_session(&mut self, session: SessionRef) -> Vec<SubscriptionRecord> {
        self.records
            .release_where(|r| r.session == session)
            .into_iter()
            .map(|(_, rec)| rec)
            .collect()
    }
}

// ── Notifiers ────────────────────────────────────────────────

fn fire(
    core: &Weak<Core>,
    r: SlotRef,
    op: MessageId,
    kind: SubscriptionKind,
    params: &[Value],
) -> bool {
    let Some(core) = core.upgrade() else {
        debug!("IPC: event {} after server shutdown dropped", op);
        return false;
    };
    let Some((session, context)) = core.with_state(|st| st.registry.event_target(r, kind)) else {
        debug!("IPC: event {} for released subscription {:#x} dropped", op, r.raw());
        return false;
    };
    let Some(cb) = core
        .schema
        .operation_by_id(op)
        .and_then(|spec| spec.callback_spec())
    else {
        crate::fatal!("IPC: operation {} has no callback", op);
    };
    let buffer = pack_event(cb, context, params);
    core.trace_tx(session, op, buffer.len());
    core.deliver(session, Message::event(op, buffer));
    true
}

/// Lets the implementation deliver events for one Add-Handler
/// registration. Cheap to clone, usable from any thread; sending through a
/// notifier whose subscription has been removed does nothing.
#[derive(Clone)]
pub struct EventNotifier {
    core: Weak<Core>,
    subscription: SlotRef,
    op: MessageId,
}

impl EventNotifier {
    pub(crate) fn new(core: &Arc<Core>, subscription: SlotRef, op: MessageId) -> Self {
        Self {
            core: Arc::downgrade(core),
            subscription,
            op,
        }
    }

    /// The handle the subscriber was given.
    pub fn handle(&self) -> u32 {
        self.subscription.raw()
    }

    /// Pack `params` against the callback signature and send them to the
    /// subscribing session. Returns `false` if the subscription is gone.
    pub fn notify(&self, params: &[Value]) -> bool {
        fire(
            &self.core,
            self.subscription,
            self.op,
            SubscriptionKind::Repeating,
            params,
        )
    }
}

/// One-shot callback. Consumed by [`notify`](Self::notify); dropping it
/// unfired releases the record silently.
pub struct CallbackNotifier {
    core: Weak<Core>,
    subscription: Option<SlotRef>,
    op: MessageId,
}

impl CallbackNotifier {
    pub(crate) fn new(core: &Arc<Core>, subscription: SlotRef, op: MessageId) -> Self {
        Self {
            core: Arc::downgrade(core),
            subscription: Some(subscription),
            op,
        }
    }

    pub fn notify(mut self, params: &[Value]) -> bool {
        match self.subscription.take() {
            Some(r) => fire(&self.core, r, self.op, SubscriptionKind::OneShot, params),
            None => false,
        }
    }
}

impl Drop for CallbackNotifier {
    fn drop(&mut self) {
        let Some(r) = self.subscription.take() else {
            return;
        };
        if let Some(core) = self.core.upgrade() {
            if core.with_state(|st| st.registry.cancel(r)).is_some() {
                debug!("IPC: callback for operation {} dropped unfired", self.op);
            }
        }
    }
}
