//! One-second countdown ticks for time-boxed phases.
//!
//! At most one ticker task runs at a time. Each start bumps a generation
//! number and every tick carries the generation it was produced under, so a
//! tick already queued by a cancelled ticker is discarded on receipt.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::dispatcher::TimerDirective;

/// Interval between ticks.
pub const TICK: Duration = Duration::from_secs(1);

pub struct TimerController {
    generation: u64,
    task: Option<JoinHandle<()>>,
    tick_tx: mpsc::UnboundedSender<u64>,
    tick_rx: mpsc::UnboundedReceiver<u64>,
}

impl TimerController {
    pub fn new() -> Self {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        Self {
            generation: 0,
            task: None,
            tick_tx,
            tick_rx,
        }
    }

    /// Start ticking. Any running ticker is cancelled first.
    pub fn start(&mut self) {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let tx = self.tick_tx.clone();
        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + TICK, TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(generation).is_err() {
                    break;
                }
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Follow the dispatcher's directive.
    pub fn apply(&mut self, directive: TimerDirective) {
        match directive {
            TimerDirective::Keep => {}
            TimerDirective::Start => self.start(),
            TimerDirective::Stop => self.cancel(),
        }
    }

    /// Wait for the next tick of the running ticker.
    ///
    /// Pending forever while stopped. Cancel-safe, so it can sit in a
    /// `tokio::select!`.
    pub async fn tick(&mut self) {
        loop {
            match self.tick_rx.recv().await {
                Some(generation) if generation == self.generation && self.task.is_some() => {
                    return;
                }
                Some(_) => continue,
                // Unreachable while we hold a sender.
                None => std::future::pending::<()>().await,
            }
        }
    }
}

impl Default for TimerController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerController {
    fn drop(&mut self) {
        self.cancel();
    }
}
