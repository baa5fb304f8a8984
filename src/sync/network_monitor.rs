//! # Network Monitor
//!
//! Tracks connectivity and foreground visibility for sync scheduling.
//!
//! ## Features
//!
//! - **Connectivity Detection**: platform glue (or the HTTP probe) calls `set_online`
//! - **Visibility**: `set_visible` reports foreground/background changes
//! - **Real-time Updates**: state lives in a `watch` channel; `run` turns transitions
//!   into events and sync triggers

use super::scheduler::{send_trigger, SyncTrigger};
use crate::realtime::EventBus;
use crate::shared::SyncEvent;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Current connectivity and visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub online: bool,
    pub visible: bool,
}

impl Default for Connectivity {
    fn default() -> Self {
        // Assume online initially
        Self {
            online: true,
            visible: true,
        }
    }
}

/// Reactions to a connectivity change
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Transition {
    pub event: Option<SyncEvent>,
    pub trigger: Option<SyncTrigger>,
}

/// What a change from `prev` to `next` should cause
pub(crate) fn transition(prev: Connectivity, next: Connectivity) -> Transition {
    if prev.online != next.online {
        return Transition {
            event: Some(SyncEvent::NetworkStatusChanged {
                is_online: next.online,
            }),
            trigger: next.online.then_some(SyncTrigger::ConnectivityRestored),
        };
    }

    let trigger = (!prev.visible && next.visible && next.online).then_some(SyncTrigger::BecameVisible);
    Transition {
        event: None,
        trigger,
    }
}

#[derive(Debug)]
pub struct NetworkMonitor {
    state: watch::Sender<Connectivity>,
}

impl NetworkMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    /// Report connectivity; returns whether it changed
    pub fn set_online(&self, online: bool) -> bool {
        self.state.send_if_modified(|state| {
            let changed = state.online != online;
            state.online = online;
            changed
        })
    }

    /// Report foreground visibility; returns whether it changed
    pub fn set_visible(&self, visible: bool) -> bool {
        self.state.send_if_modified(|state| {
            let changed = state.visible != visible;
            state.visible = visible;
            changed
        })
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    pub fn is_visible(&self) -> bool {
        self.state.borrow().visible
    }

    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Publish transitions and request passes until the scheduler goes away
    ///
    /// The baseline state is captured when this is called, not when the returned
    /// future is first polled, so changes made right after spawning are seen.
    pub fn run(
        &self,
        triggers: mpsc::Sender<SyncTrigger>,
        events: EventBus,
    ) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.state.subscribe();
        let mut last = *rx.borrow_and_update();

        async move {
            while rx.changed().await.is_ok() {
                let next = *rx.borrow_and_update();
                let Transition { event, trigger } = transition(last, next);
                last = next;

                if let Some(event) = event {
                    tracing::info!(
                        "[NetworkMonitor] Connectivity changed: {}",
                        if next.online { "online" } else { "offline" }
                    );
                    events.publish(event);
                }
                if let Some(trigger) = trigger {
                    if !send_trigger(&triggers, trigger) {
                        break;
                    }
                }
            }
        }
    }

    /// Poll `url` and feed the result into `set_online`
    ///
    /// Any HTTP answer counts as online; only transport failures count as offline.
    pub async fn run_probe(&self, client: reqwest::Client, url: String, interval: Duration) {
        tracing::info!("[NetworkMonitor] Probing {} every {}s", url, interval.as_secs());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let online = match client.get(&url).send().await {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!("[NetworkMonitor] Probe failed: {}", e);
                    false
                }
            };
            self.set_online(online);
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(Connectivity::default())
    }
}
