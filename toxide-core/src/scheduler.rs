//! Iteration: one tick of network processing and event delivery.
//!
//! A tick snapshots everything the transport received, then applies it one
//! frame at a time. Events a frame produces are queued and dispatched before
//! the next frame is applied, so a handler always sees the state change that
//! triggered it. Periodic work (pings, info pushes, chunk requests, loss of
//! reachability) runs last, and its events are dispatched before the tick
//! returns.

use std::time::Duration;

use crate::callbacks::Guard;
use crate::events;
use crate::protocol::Packet;
use crate::session::{Killed, Session, Tox};
use crate::transport::Received;
use crate::wire;

const IDLE_INTERVAL: Duration = Duration::from_millis(50);
const TRANSFER_INTERVAL: Duration = Duration::from_millis(5);

impl Tox {
    /// Process pending network input and fire callbacks.
    ///
    /// Called from inside a handler, the tick still polls and applies frames,
    /// but the events it produces are delivered by the dispatch loop already
    /// running, after the current handler returns.
    pub fn iterate(&mut self) -> Result<(), Killed> {
        let session = self.session_mut()?;
        session.ticks += 1;
        let inbox = session.transport.poll();
        session.update_self_connection();
        self.dispatch();
        for received in inbox {
            let Some(session) = self.session.as_mut() else {
                return Ok(());
            };
            session.on_frame(received);
            self.dispatch();
        }
        if let Some(session) = self.session.as_mut() {
            session.housekeeping();
            self.dispatch();
        }
        Ok(())
    }

    /// Delay until the next `iterate` call should happen.
    pub fn iteration_interval(&self) -> Result<Duration, Killed> {
        if self.session()?.has_running_transfers() {
            Ok(TRANSFER_INTERVAL)
        } else {
            Ok(IDLE_INTERVAL)
        }
    }

    /// Deliver queued events. Stops if a handler kills the instance.
    fn dispatch(&mut self) {
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        while let Some(session) = self.session.as_mut() {
            let Some(queued) = session.events.pop_front() else {
                break;
            };
            if !session.is_current(queued.guard) {
                tracing::trace!(event = ?queued.event, "stale event dropped");
                continue;
            }
            queued.event.deliver(self);
        }
        self.dispatching = false;
    }
}

impl Session {
    fn update_self_connection(&mut self) {
        let connection = self.transport.connection();
        if connection != self.connection {
            tracing::debug!(?connection, "self connection changed");
            self.connection = connection;
            self.push(Guard::Instance, events::SelfConnectionStatus { connection });
        }
    }

    fn on_frame(&mut self, received: Received) {
        let Received { from, frame } = received;
        let packet = match wire::decode_frame(&frame) {
            Ok((packet, used)) if used == frame.len() => packet,
            Ok(_) => {
                tracing::warn!(%from, "trailing bytes after frame, dropped");
                return;
            }
            Err(e) => {
                tracing::warn!(%from, %e, "malformed frame dropped");
                return;
            }
        };
        tracing::trace!(%from, ?packet, "packet received");
        match packet {
            Packet::FriendRequest { nospam, message } => self.on_friend_request(from, nospam, message),
            Packet::ConferenceJoin { .. }
            | Packet::ConferencePeers { .. }
            | Packet::ConferencePeerJoined { .. }
            | Packet::ConferenceLeave { .. }
            | Packet::ConferencePeerName { .. }
            | Packet::ConferenceTitle { .. }
            | Packet::ConferenceMessage { .. } => self.on_conference_packet(from, packet),
            packet => match self.friend_by_key(&from) {
                Some(number) => self.on_friend_packet(number, packet),
                None => tracing::trace!(%from, "packet from stranger ignored"),
            },
        }
    }

    fn housekeeping(&mut self) {
        let info_dirty = std::mem::take(&mut self.info_dirty);
        self.friend_housekeeping(info_dirty);
        self.conference_housekeeping(info_dirty);
        self.file_housekeeping();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::events::{FriendConnectionStatus, FriendName};
    use crate::identity::Keypair;
    use crate::loopback::Network;
    use crate::options::Options;
    use crate::transport::Connection;

    fn tox() -> Tox {
        let opts = Options {
            local_discovery_enabled: false,
            ..Options::default()
        };
        Tox::with_network(opts, &Network::new()).unwrap()
    }

    #[test]
    fn idle_interval_without_transfers() {
        let tox = tox();
        assert_eq!(tox.iteration_interval(), Ok(IDLE_INTERVAL));
    }

    #[test]
    fn events_for_deleted_friend_are_dropped() {
        let mut tox = tox();
        let a = tox.friend_add_norequest(Keypair::generate().public_key()).unwrap();
        let b = tox.friend_add_norequest(Keypair::generate().public_key()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        tox.on_friend_name(move |tox, e| {
            sink.lock().unwrap().push(e.friend);
            if e.friend == a {
                tox.friend_delete(b).unwrap();
            }
        });
        let session = tox.session_mut().unwrap();
        for friend in [a, b] {
            let key = session.friends.key(friend).unwrap();
            session.push(
                Guard::Friend(key),
                FriendName {
                    friend,
                    name: "x".into(),
                },
            );
        }
        tox.dispatch();
        assert_eq!(*seen.lock().unwrap(), vec![a]);
    }

    #[test]
    fn reused_number_does_not_receive_old_events() {
        let mut tox = tox();
        let n = tox.friend_add_norequest(Keypair::generate().public_key()).unwrap();
        let session = tox.session_mut().unwrap();
        let old = session.friends.key(n).unwrap();
        session.push(
            Guard::Friend(old),
            FriendConnectionStatus {
                friend: n,
                connection: Connection::Udp,
            },
        );
        tox.friend_delete(n).unwrap();
        assert_eq!(tox.friend_add_norequest(Keypair::generate().public_key()), Ok(n));
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        tox.on_friend_connection_status(move |_, _| *h.lock().unwrap() += 1);
        tox.dispatch();
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[test]
    fn iterate_inside_handler_defers_delivery() {
        let mut tox = tox();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        tox.on_friend_name(move |tox, e| {
            sink.lock().unwrap().push(e.friend);
            let session = tox.session_mut().unwrap();
            if e.friend == 0 {
                session.push(
                    Guard::Instance,
                    FriendName {
                        friend: 2,
                        name: String::new(),
                    },
                );
                tox.iterate().unwrap();
            }
            assert!(tox.dispatching);
        });
        let session = tox.session_mut().unwrap();
        for friend in 0..2 {
            session.push(
                Guard::Instance,
                FriendName {
                    friend,
                    name: String::new(),
                },
            );
        }
        tox.dispatch();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert!(!tox.dispatching);
    }

    #[test]
    fn handler_killing_instance_stops_dispatch() {
        let mut tox = tox();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        tox.on_friend_name(move |tox, _| {
            *h.lock().unwrap() += 1;
            tox.kill();
        });
        let session = tox.session_mut().unwrap();
        for friend in 0..3 {
            session.push(
                Guard::Instance,
                FriendName {
                    friend,
                    name: String::new(),
                },
            );
        }
        tox.dispatch();
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(tox.iterate(), Err(Killed));
    }
}
