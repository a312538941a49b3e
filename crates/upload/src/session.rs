//! Per-account session store.
//!
//! Queue contents survive navigation and account switches for the life of
//! the process; each signed-in address owns its own queue, balances and
//! last fee snapshot.

use std::collections::HashMap;

use stowage_fees::{Balances, FeeSnapshot, PaymentBalance};

use crate::error::UploadError;
use crate::queue::TaskQueue;
use crate::types::AccountContext;

/// Everything kept for one account.
#[derive(Debug)]
pub struct AccountSession {
    pub context: AccountContext,
    pub queue: TaskQueue,
    pub balances: Option<Balances>,
    /// Download quota being purchased with this batch, in bytes.
    pub quota_bytes: u64,
    pub fees: FeeSnapshot,
}

impl AccountSession {
    fn new(context: AccountContext) -> Self {
        Self {
            queue: TaskQueue::new(context.address.clone()),
            context,
            balances: None,
            quota_bytes: 0,
            fees: FeeSnapshot::checking(),
        }
    }

    /// Balances to run the sufficiency check against, matched to who pays
    /// the bucket's storage. A shared balance reported for a bucket with its
    /// own payment account is treated as unknown.
    pub fn effective_balances(&self) -> Option<Balances> {
        let balances = self.balances?;
        match (self.context.owner_pays_storage(), balances.payment) {
            (true, PaymentBalance::Separate(_)) => Some(Balances {
                payment: PaymentBalance::SameAsOwner,
                ..balances
            }),
            (false, PaymentBalance::SameAsOwner) => None,
            _ => Some(balances),
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    active: Option<String>,
    sessions: HashMap<String, AccountSession>,
}

impl SessionStore {
    /// Makes `context.address` the active account, creating its session on
    /// first use. A known account keeps its queue; its bucket context is
    /// refreshed.
    pub fn switch_account(&mut self, context: AccountContext) {
        let address = context.address.clone();
        match self.sessions.get_mut(&address) {
            Some(session) => session.context = context,
            None => {
                self.sessions
                    .insert(address.clone(), AccountSession::new(context));
            }
        }
        self.active = Some(address);
    }

    /// Signs out without discarding any queue.
    pub fn sign_out(&mut self) {
        self.active = None;
    }

    pub fn active_address(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Result<&AccountSession, UploadError> {
        self.active
            .as_ref()
            .and_then(|a| self.sessions.get(a))
            .ok_or(UploadError::NoAccount)
    }

    pub fn active_mut(&mut self) -> Result<&mut AccountSession, UploadError> {
        self.active
            .as_ref()
            .and_then(|a| self.sessions.get_mut(a))
            .ok_or(UploadError::NoAccount)
    }

    /// Session of any known account, active or not.
    pub fn get_mut(&mut self, address: &str) -> Option<&mut AccountSession> {
        self.sessions.get_mut(address)
    }

    pub fn get(&self, address: &str) -> Option<&AccountSession> {
        self.sessions.get(address)
    }
}
