//! Reaction to network reachability changes.
use tokio::sync::mpsc;

use super::Command;
use crate::config::ConnectivityConfig;

/// Source of reachability observations.
pub trait ConnectivityProbe {
    fn is_online(&self) -> bool;
}

/// Edge reported by [`ConnectivityWatch::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityChange {
    Lost,
    Restored,
}

/// Latch that turns repeated observations into single edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectivityWatch {
    offline: bool,
}

impl ConnectivityWatch {
    #[must_use]
    pub const fn new() -> Self {
        Self { offline: false }
    }

    #[must_use]
    pub const fn is_offline(&self) -> bool {
        self.offline
    }

    pub const fn observe(&mut self, online: bool) -> Option<ConnectivityChange> {
        match (self.offline, online) {
            (false, false) => {
                self.offline = true;
                Some(ConnectivityChange::Lost)
            }
            (true, true) => {
                self.offline = false;
                Some(ConnectivityChange::Restored)
            }
            _ => None,
        }
    }
}

/// Poll `probe` every `config.check_interval_secs` and forward observations
/// to a running controller. Returns when the controller's command channel
/// closes.
pub async fn watch_connectivity<P>(
    probe: P,
    config: ConnectivityConfig,
    commands: mpsc::Sender<Command>,
) where
    P: ConnectivityProbe + Send,
{
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let online = probe.is_online();
        if commands.send(Command::Connectivity(online)).await.is_err() {
            log::debug!("connectivity watcher stopping: controller gone");
            return;
        }
    }
}
