//! Poll timer for in-nodes
//!
//! A `Poller` owns at most one timer task. Each tick pushes an empty message
//! into the node's input queue, so polled and externally delivered triggers
//! take the same path.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling(Duration),
}

pub struct Poller {
    node: String,
    trigger_tx: mpsc::Sender<Message>,
    timer: Option<(Duration, JoinHandle<()>)>,
}

impl Poller {
    pub fn new(node: impl Into<String>, trigger_tx: mpsc::Sender<Message>) -> Self {
        Self {
            node: node.into(),
            trigger_tx,
            timer: None,
        }
    }

    pub fn state(&self) -> PollState {
        match &self.timer {
            Some((interval, _)) => PollState::Polling(*interval),
            None => PollState::Idle,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.timer.is_some()
    }

    /// Replace the running timer. A zero interval leaves the poller idle.
    pub async fn set_interval(&mut self, interval: Duration) {
        self.stop().await;

        if interval.is_zero() {
            tracing::debug!("[Poller] {} polling disabled", self.node);
            return;
        }

        tracing::debug!("[Poller] {} creating timer ({:?})", self.node, interval);

        let tx = self.trigger_tx.clone();
        let task = tokio::spawn(async move {
            // First tick after one full interval, not immediately
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if tx.send(Message::new()).await.is_err() {
                    break;
                }
            }
        });

        self.timer = Some((interval, task));
    }

    /// Cancel the timer and wait until its task has finished, so no tick can
    /// be queued after this returns.
    pub async fn stop(&mut self) {
        if let Some((_, task)) = self.timer.take() {
            task.abort();
            let _ = task.await;
            tracing::debug!("[Poller] {} timer stopped", self.node);
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some((_, task)) = self.timer.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(20);

    fn drain(rx: &mut mpsc::Receiver<Message>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[tokio::test]
    async fn test_idle_until_positive_interval() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut poller = Poller::new("test", tx);
        assert_eq!(poller.state(), PollState::Idle);

        poller.set_interval(Duration::ZERO).await;
        assert_eq!(poller.state(), PollState::Idle);

        time::sleep(TICK * 3).await;
        assert_eq!(drain(&mut rx), 0);

        poller.set_interval(TICK).await;
        assert_eq!(poller.state(), PollState::Polling(TICK));
    }

    #[tokio::test]
    async fn test_ticks_are_empty_triggers() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut poller = Poller::new("test", tx);
        poller.set_interval(TICK).await;

        let first = time::timeout(TICK * 10, rx.recv()).await.unwrap().unwrap();
        assert!(first.is_empty());
        let _second = time::timeout(TICK * 10, rx.recv()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_stops_ticks() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut poller = Poller::new("test", tx);
        poller.set_interval(TICK).await;

        time::timeout(TICK * 10, rx.recv()).await.unwrap().unwrap();

        poller.set_interval(Duration::ZERO).await;
        assert_eq!(poller.state(), PollState::Idle);
        drain(&mut rx);

        time::sleep(TICK * 4).await;
        assert_eq!(drain(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_no_tick_after_stop() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut poller = Poller::new("test", tx);
        poller.set_interval(TICK).await;
        time::timeout(TICK * 10, rx.recv()).await.unwrap().unwrap();

        poller.stop().await;
        drain(&mut rx);

        time::sleep(TICK * 4).await;
        assert_eq!(drain(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_single_live_timer() {
        let (tx, mut rx) = mpsc::channel(256);
        let mut poller = Poller::new("test", tx);

        // Restarting repeatedly must not leave extra timers behind
        for _ in 0..5 {
            poller.set_interval(TICK).await;
        }
        time::sleep(TICK * 5 + TICK / 2).await;
        poller.stop().await;

        let ticks = drain(&mut rx);
        assert!(ticks >= 1 && ticks <= 6, "unexpected tick count {}", ticks);
    }

    #[tokio::test]
    async fn test_drop_releases_timer() {
        let (tx, mut rx) = mpsc::channel(64);
        {
            let mut poller = Poller::new("test", tx);
            poller.set_interval(TICK).await;
        }
        // Abort takes effect before the task is polled again on this runtime
        time::sleep(TICK * 3).await;
        assert_eq!(drain(&mut rx), 0);
        assert!(rx.recv().await.is_none());
    }
}
