//! Idle screensaver
//!
//! Idle time walks through a list of timeouts. Reaching the last level
//! blanks the screen; the first input after that only wakes it up.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::ScreensaverConfig;

/// What a timer expiry did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleLevel {
    /// An intermediate level was reached
    Dimmed(usize),
    /// The last level was reached and the screen must go dark
    Blanked,
}

#[derive(Debug)]
pub struct Screensaver {
    /// Delays between successive levels
    timeouts: Vec<Duration>,
    level: usize,
    deadline: Option<Instant>,
}

impl Screensaver {
    pub fn new(config: &ScreensaverConfig, now: Instant) -> Self {
        let timeouts: Vec<Duration> = if config.enabled {
            let mut previous = 0;
            config
                .timeouts_ms
                .iter()
                .map(|&ms| {
                    // Timeouts are absolute idle times; store the gaps
                    let gap = ms.saturating_sub(previous);
                    previous = previous.max(ms);
                    Duration::from_millis(gap)
                })
                .collect()
        } else {
            Vec::new()
        };
        let deadline = timeouts.first().map(|d| now + *d);
        Self {
            timeouts,
            level: 0,
            deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_blanked(&self) -> bool {
        !self.timeouts.is_empty() && self.level == self.timeouts.len()
    }

    /// Advance if the current deadline has passed
    pub fn expire(&mut self, now: Instant) -> Option<IdleLevel> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.level += 1;
        self.deadline = self.timeouts.get(self.level).map(|d| deadline + *d);
        if self.is_blanked() {
            info!("Screensaver blanking the screen");
            Some(IdleLevel::Blanked)
        } else {
            debug!("Screensaver reached idle level {}", self.level);
            Some(IdleLevel::Dimmed(self.level))
        }
    }

    /// Record user input; returns true when it woke a blanked screen
    pub fn activity(&mut self, now: Instant) -> bool {
        let woke = self.is_blanked();
        self.level = 0;
        self.deadline = self.timeouts.first().map(|d| now + *d);
        if woke {
            info!("Screensaver woken by input");
        }
        woke
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(timeouts_ms: Vec<u64>) -> ScreensaverConfig {
        ScreensaverConfig {
            enabled: true,
            timeouts_ms,
        }
    }

    #[test]
    fn levels_advance_until_blank() {
        let start = Instant::now();
        let mut saver = Screensaver::new(&config(vec![100, 300]), start);
        assert_eq!(saver.deadline(), Some(start + Duration::from_millis(100)));
        assert_eq!(saver.expire(start + Duration::from_millis(50)), None);
        assert_eq!(
            saver.expire(start + Duration::from_millis(100)),
            Some(IdleLevel::Dimmed(1))
        );
        assert_eq!(saver.deadline(), Some(start + Duration::from_millis(300)));
        assert_eq!(
            saver.expire(start + Duration::from_millis(300)),
            Some(IdleLevel::Blanked)
        );
        assert_eq!(saver.deadline(), None);
        assert!(saver.activity(start + Duration::from_millis(400)));
        assert!(!saver.is_blanked());
        assert!(!saver.activity(start + Duration::from_millis(410)));
    }

    #[test]
    fn disabled_never_fires() {
        let start = Instant::now();
        let mut saver = Screensaver::new(
            &ScreensaverConfig {
                enabled: false,
                timeouts_ms: vec![1],
            },
            start,
        );
        assert_eq!(saver.deadline(), None);
        assert_eq!(saver.expire(start + Duration::from_secs(10)), None);
        assert!(!saver.activity(start));
    }
}
