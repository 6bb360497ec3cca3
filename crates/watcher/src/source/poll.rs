//! Pull-based change source

use super::{ChangeSource, RawNotification, SourceKind};
use crate::error::WatchError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Emits a [`RawNotification::Tick`] every interval
pub struct PollSource {
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl PollSource {
    pub fn new(period: Duration) -> Self {
        Self { period, task: None }
    }
}

#[async_trait]
impl ChangeSource for PollSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Poll
    }

    async fn start(
        &mut self,
        tx: mpsc::UnboundedSender<RawNotification>,
    ) -> Result<(), WatchError> {
        self.stop().await;

        let period = self.period;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if tx.send(RawNotification::Tick).is_err() {
                    break;
                }
            }
        }));

        debug!("Poll source started (interval: {:?})", period);
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_alive(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PollSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_every_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut source = PollSource::new(Duration::from_secs(2));
        assert!(!source.is_alive());

        source.start(tx).await.unwrap();
        assert!(source.is_alive());

        tokio::time::sleep(Duration::from_millis(4_100)).await;
        assert_eq!(rx.recv().await, Some(RawNotification::Tick));
        assert_eq!(rx.recv().await, Some(RawNotification::Tick));
        assert!(rx.try_recv().is_err());

        source.stop().await;
        tokio::task::yield_now().await;
        assert!(!source.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ends_when_receiver_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut source = PollSource::new(Duration::from_millis(100));
        source.start(tx).await.unwrap();
        drop(rx);

        tokio::time::sleep(Duration::from_millis(250)).await;
        tokio::task::yield_now().await;
        assert!(!source.is_alive());
    }
}
