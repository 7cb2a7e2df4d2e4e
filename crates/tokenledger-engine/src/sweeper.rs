//! Background expiry of stale reservations.
//!
//! A reservation left ACTIVE past its deadline (caller crashed, operation
//! hung) keeps tokens out of availability forever; the sweeper walks the
//! expiry index on a timer and releases them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use tokenledger_core::Result;

use crate::engine::{ExpireOutcome, ReservationEngine};

/// Counters from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Reservations expired by this pass.
    pub expired: usize,

    /// Reservations another actor resolved first.
    pub already_terminal: usize,
}

/// Periodic reservation sweeper.
pub struct ReservationSweeper {
    engine: Arc<ReservationEngine>,
    interval: Duration,
    batch_size: usize,
}

impl ReservationSweeper {
    /// Create a sweeper over the engine.
    pub fn new(engine: Arc<ReservationEngine>, interval: Duration, batch_size: usize) -> Self {
        Self {
            engine,
            interval,
            batch_size,
        }
    }

    /// Run one sweep pass over reservations past their deadline.
    ///
    /// Already-terminal reservations count as successful no-ops: another
    /// actor committed or released them between the index scan and the
    /// expiry attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn sweep_once(&self) -> Result<SweepStats> {
        let stale = self
            .engine
            .store()
            .list_expired_reservations(Utc::now(), self.batch_size)?;

        let mut stats = SweepStats::default();
        for reservation in stale {
            match self.engine.expire(&reservation.id)? {
                ExpireOutcome::Expired => stats.expired += 1,
                ExpireOutcome::AlreadyTerminal => stats.already_terminal += 1,
            }
        }

        if stats.expired > 0 {
            tracing::info!(
                expired = stats.expired,
                already_terminal = stats.already_terminal,
                "Sweeper pass completed"
            );
        }
        Ok(stats)
    }

    /// Run the sweeper until the shutdown signal flips to `true`.
    ///
    /// Sweep failures are logged and the loop continues; a transient store
    /// error on one pass must not kill the background task.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once() {
                        tracing::error!(error = %err, "Sweeper pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Sweeper shutting down");
                        return;
                    }
                }
            }
        }
    }
}
