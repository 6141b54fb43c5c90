//! Startup barrier: the day-cycle scheduler and the peripheral loops must not
//! start until both peers are connected. Each accept deposits the peer's
//! sender; waiters are released once, when both slots are filled, and get
//! both senders back.

use super::peer::PeerSender;
use crate::domain::PeerRole;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BarrierFlags {
    pub display_ready: bool,
    pub actuator_ready: bool,
}

impl BarrierFlags {
    pub fn released(&self) -> bool {
        self.display_ready && self.actuator_ready
    }
}

#[derive(Clone, Default)]
struct Slots {
    display: Option<PeerSender>,
    actuator: Option<PeerSender>,
}

impl Slots {
    fn flags(&self) -> BarrierFlags {
        BarrierFlags {
            display_ready: self.display.is_some(),
            actuator_ready: self.actuator.is_some(),
        }
    }

    fn peers(&self) -> Option<Peers> {
        Some(Peers { display: self.display.clone()?, actuator: self.actuator.clone()? })
    }
}

/// both peers, handed to loops started after the barrier
#[derive(Clone)]
pub struct Peers {
    pub display: PeerSender,
    pub actuator: PeerSender,
}

pub struct StartupBarrier {
    slots: watch::Sender<Slots>,
}

impl Default for StartupBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupBarrier {
    pub fn new() -> Self {
        let (slots, _) = watch::channel(Slots::default());
        Self { slots }
    }

    pub fn arrive(&self, sender: PeerSender) {
        let role = sender.role();
        self.slots.send_modify(|slots| match role {
            PeerRole::Display => slots.display = Some(sender),
            PeerRole::Actuator => slots.actuator = Some(sender),
        });
        tracing::debug!(peer = %role, flags = ?self.flags(), "peer arrived at startup barrier");
    }

    pub fn flags(&self) -> BarrierFlags {
        self.slots.borrow().flags()
    }

    pub async fn wait(&self) -> Peers {
        let mut rx = self.slots.subscribe();
        loop {
            let ready = rx.borrow_and_update().peers();
            if let Some(peers) = ready {
                return peers;
            }
            // the sender lives in self and cannot close while we are borrowed
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Framing;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::duplex;

    fn sender(role: PeerRole) -> PeerSender {
        let (ours, _theirs) = duplex(64);
        PeerSender::new(role, Box::new(ours), Framing::Raw)
    }

    #[tokio::test]
    async fn holds_until_both_roles_arrive() {
        let barrier = Arc::new(StartupBarrier::new());
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };

        barrier.arrive(sender(PeerRole::Display));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(barrier.flags(), BarrierFlags { display_ready: true, actuator_ready: false });

        barrier.arrive(sender(PeerRole::Actuator));
        let peers = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(peers.display.role(), PeerRole::Display);
        assert_eq!(peers.actuator.role(), PeerRole::Actuator);
        assert!(barrier.flags().released());
    }

    #[tokio::test]
    async fn waiters_see_arrivals_in_either_order() {
        let barrier = Arc::new(StartupBarrier::new());
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let barrier = barrier.clone();
                tokio::spawn(async move { barrier.wait().await })
            })
            .collect();

        barrier.arrive(sender(PeerRole::Actuator));
        tokio::task::yield_now().await;
        barrier.arrive(sender(PeerRole::Display));
        for waiter in waiters {
            let peers = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
            assert_eq!(peers.display.role(), PeerRole::Display);
            assert_eq!(peers.actuator.role(), PeerRole::Actuator);
        }
    }

    #[tokio::test]
    async fn late_waiters_pass_straight_through() {
        let barrier = StartupBarrier::new();
        barrier.arrive(sender(PeerRole::Actuator));
        barrier.arrive(sender(PeerRole::Display));
        let peers = tokio::time::timeout(Duration::from_millis(100), barrier.wait()).await.unwrap();
        assert_eq!(peers.actuator.role(), PeerRole::Actuator);
    }

    #[tokio::test]
    async fn same_role_twice_does_not_release() {
        let barrier = StartupBarrier::new();
        barrier.arrive(sender(PeerRole::Display));
        barrier.arrive(sender(PeerRole::Display));
        assert!(!barrier.flags().released());
        assert!(tokio::time::timeout(Duration::from_millis(20), barrier.wait()).await.is_err());
    }
}
