//! Liveness monitoring for a link.

use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;

use crate::link::{Link, LinkError};

/// Pings the peer periodically and fails once it goes silent.
pub struct HeartbeatMonitor {
    link: Arc<Link>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub const fn new(link: Arc<Link>) -> Self {
        Self { link }
    }

    /// Run until the link closes or stays idle past its idle timeout.
    ///
    /// Returns the reason monitoring ended. Any inbound frame, pongs
    /// included, counts as a sign of life.
    pub async fn run(self) -> LinkError {
        let config = self.link.config().clone();
        let period = config.heartbeat_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.link.closed() => return LinkError::Closed,
                _ = ticker.tick() => {}
            }

            let idle = self.link.idle_for();
            if idle > config.idle_timeout {
                tracing::warn!(peer = %self.link.peer_id(), ?idle, "Peer stopped responding");
                return LinkError::LivenessTimeout(idle);
            }

            if let Err(e) = self.link.ping() {
                return e;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use latensee_core::PeerId;
    use serde_json::Value;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::LinkConfig,
        link::Outbound,
        service::{LocalService, ServiceError},
    };

    struct Idle;

    #[async_trait]
    impl LocalService for Idle {
        async fn dispatch(
            &self,
            _caller: PeerId,
            function: &str,
            _args: Vec<Value>,
        ) -> Result<Value, ServiceError> {
            Err(ServiceError::UnknownFunction(function.to_string()))
        }
    }

    fn config() -> LinkConfig {
        LinkConfig::default()
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_idle_timeout(Duration::from_millis(350))
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let (link, mut rx) = Link::new(Uuid::new_v4(), Arc::new(Idle), config());
        let monitor = tokio::spawn(HeartbeatMonitor::new(Arc::clone(&link)).run());

        let err = monitor.await.unwrap();
        assert!(matches!(
            err,
            LinkError::LivenessTimeout(idle) if idle > Duration::from_millis(350)
        ));

        let mut pings = 0;
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame, Outbound::Ping);
            pings += 1;
        }
        assert!(pings >= 3, "only {pings} pings sent");
    }

    #[tokio::test(start_paused = true)]
    async fn test_responsive_peer_stays_alive() {
        let (link, mut rx) = Link::new(Uuid::new_v4(), Arc::new(Idle), config());
        let monitor = tokio::spawn(HeartbeatMonitor::new(Arc::clone(&link)).run());

        // Answer every ping.
        let ponger = Arc::clone(&link);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if frame == Outbound::Ping {
                    ponger.touch();
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!monitor.is_finished());

        link.close();
        assert!(matches!(monitor.await.unwrap(), LinkError::Closed));
    }
}
