//! Request coalescing.
//!
//! At most one fetch runs per [`CacheKey`]. The first caller becomes the
//! leader and owns a [`TicketLease`]; everyone arriving while it is in flight
//! gets a [`TicketWaiter`] on the same completion signal and observes the
//! same outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;

use crate::errors::MarketDataError;
use crate::models::{CacheKey, ResolvedSeries};

/// Shared result of one coalesced fetch.
pub type FetchOutcome = Result<ResolvedSeries, MarketDataError>;

type Slot = watch::Receiver<Option<FetchOutcome>>;

/// Registry of in-flight fetches keyed by cache key.
#[derive(Clone, Default)]
pub struct TicketBoard {
    tickets: Arc<Mutex<HashMap<CacheKey, Slot>>>,
}

/// What a caller got from [`TicketBoard::join`].
pub enum TicketRole {
    /// No fetch was in flight; the caller must run it and complete the lease.
    Leader(TicketLease),
    /// Another caller is fetching; wait on its result.
    Follower(TicketWaiter),
}

impl TicketBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_tickets(
        tickets: &Mutex<HashMap<CacheKey, Slot>>,
    ) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        tickets.lock().unwrap_or_else(|poisoned| {
            warn!("Ticket board mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Attach to the in-flight fetch for `key`, or open a new one.
    pub fn join(&self, key: &CacheKey) -> TicketRole {
        let mut tickets = Self::lock_tickets(&self.tickets);

        if let Some(slot) = tickets.get(key) {
            debug!("Ticket: joining in-flight fetch for {}", key);
            return TicketRole::Follower(TicketWaiter {
                key: key.to_string(),
                rx: slot.clone(),
            });
        }

        let (tx, rx) = watch::channel(None);
        tickets.insert(key.clone(), rx);
        debug!("Ticket: opened for {}", key);
        TicketRole::Leader(TicketLease {
            key: key.clone(),
            tx,
            tickets: Arc::clone(&self.tickets),
            completed: false,
        })
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        Self::lock_tickets(&self.tickets).len()
    }
}

/// Ownership of an in-flight fetch.
///
/// Dropping an uncompleted lease releases every waiter with
/// [`MarketDataError::FetchAbandoned`].
pub struct TicketLease {
    key: CacheKey,
    tx: watch::Sender<Option<FetchOutcome>>,
    tickets: Arc<Mutex<HashMap<CacheKey, Slot>>>,
    completed: bool,
}

impl TicketLease {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// A waiter for the leader itself.
    pub fn waiter(&self) -> TicketWaiter {
        TicketWaiter {
            key: self.key.to_string(),
            rx: self.tx.subscribe(),
        }
    }

    /// Publish the outcome to every waiter and retire the ticket.
    pub fn complete(mut self, outcome: FetchOutcome) {
        self.publish(outcome);
    }

    fn publish(&mut self, outcome: FetchOutcome) {
        TicketBoard::lock_tickets(&self.tickets).remove(&self.key);
        self.tx.send_replace(Some(outcome));
        self.completed = true;
    }
}

impl Drop for TicketLease {
    fn drop(&mut self) {
        if !self.completed {
            warn!("Ticket: fetch for {} dropped without a result", self.key);
            let key = self.key.to_string();
            self.publish(Err(MarketDataError::FetchAbandoned { key }));
        }
    }
}

/// A caller's handle on an in-flight fetch.
pub struct TicketWaiter {
    key: String,
    rx: watch::Receiver<Option<FetchOutcome>>,
}

impl TicketWaiter {
    /// Wait for the fetch to finish.
    pub async fn wait(mut self) -> FetchOutcome {
        let abandoned = || {
            Err(MarketDataError::FetchAbandoned {
                key: self.key.clone(),
            })
        };
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or_else(abandoned),
            Err(_) => abandoned(),
        }
    }

    /// Wait at most `timeout`. Giving up does not affect the fetch or other
    /// waiters.
    pub async fn wait_timeout(self, timeout: Duration) -> FetchOutcome {
        let key = self.key.clone();
        tokio::time::timeout(timeout, self.wait())
            .await
            .unwrap_or_else(|_| Err(MarketDataError::WaitTimeout { key }))
    }
}
