use std::{future, pin::Pin, time::Duration};

use tokio::time::{Instant, Sleep, sleep_until};

/// The boot sync deadline: at most one pending fire.
#[derive(Default)]
pub struct TimeoutTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TimeoutTimer {
    /// Fire after `after`, replacing any earlier deadline.
    pub fn arm(&mut self, after: Duration) {
        let deadline = Instant::now() + after;
        match self.sleep.as_mut() {
            // reuse the armed timer
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(sleep_until(deadline))),
        }
    }

    pub fn disarm(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|sleep| sleep.deadline())
    }

    /// Resolves once when the armed deadline passes, then the timer is
    /// disarmed. Pending forever while disarmed. Cancel safe.
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => future::pending().await,
        }
    }
}
