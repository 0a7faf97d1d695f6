//! Callback registry: one optional handler per event kind.
//!
//! Handlers run only inside `Tox::iterate`, one event at a time, and receive
//! the instance mutably so they can act on it (accept a friend request, answer
//! a chunk request, ...). While a handler runs it is taken out of its slot;
//! it goes back afterwards unless the handler replaced or removed itself.

use std::panic::{self, AssertUnwindSafe};

use crate::events;
use crate::session::Tox;
use crate::slot::SlotKey;

/// Boxed handler for events of type `E`. Captured state plays the role of the
/// user context value.
pub type Handler<E> = Box<dyn FnMut(&mut Tox, &E) + Send>;

pub struct CallbackSlot<E> {
    handler: Option<Handler<E>>,
    revision: u64,
}

impl<E> Default for CallbackSlot<E> {
    fn default() -> Self {
        Self {
            handler: None,
            revision: 0,
        }
    }
}

/// An event kind a handler can be registered for.
pub trait Notification: Sized + 'static {
    #[doc(hidden)]
    fn slot(callbacks: &mut Callbacks) -> &mut CallbackSlot<Self>;
}

/// What a queued event refers to. Events whose friend or conference is gone
/// by the time they are dispatched are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Guard {
    Instance,
    Friend(SlotKey),
    Conference(SlotKey),
}

pub(crate) struct Queued {
    pub guard: Guard,
    pub event: Event,
}

macro_rules! notifications {
    ($($payload:ident => $field:ident, $on:ident;)*) => {
        #[derive(Debug, Clone)]
        pub(crate) enum Event {
            $($payload(events::$payload),)*
        }

        $(
            impl From<events::$payload> for Event {
                fn from(e: events::$payload) -> Self {
                    Event::$payload(e)
                }
            }

            impl Notification for events::$payload {
                fn slot(callbacks: &mut Callbacks) -> &mut CallbackSlot<Self> {
                    &mut callbacks.$field
                }
            }
        )*

        #[derive(Default)]
        pub struct Callbacks {
            $($field: CallbackSlot<events::$payload>,)*
        }

        impl Event {
            pub(crate) fn deliver(self, tox: &mut Tox) {
                match self {
                    $(Event::$payload(e) => tox.notify(e),)*
                }
            }
        }

        impl Tox {
            $(
                #[doc = concat!("Register the handler for [`events::", stringify!($payload), "`], replacing any previous one.")]
                pub fn $on<F>(&mut self, handler: F)
                where
                    F: FnMut(&mut Tox, &events::$payload) + Send + 'static,
                {
                    self.set_callback::<events::$payload>(Some(Box::new(handler)));
                }
            )*
        }
    };
}

notifications! {
    SelfConnectionStatus => self_connection_status, on_self_connection_status;
    FriendRequest => friend_request, on_friend_request;
    FriendMessage => friend_message, on_friend_message;
    FriendReadReceipt => friend_read_receipt, on_friend_read_receipt;
    FriendName => friend_name, on_friend_name;
    FriendStatusMessage => friend_status_message, on_friend_status_message;
    FriendStatus => friend_status, on_friend_status;
    FriendConnectionStatus => friend_connection_status, on_friend_connection_status;
    ConferenceInvite => conference_invite, on_conference_invite;
    ConferenceMessage => conference_message, on_conference_message;
    ConferenceTitle => conference_title, on_conference_title;
    ConferencePeerListChanged => conference_peer_list_changed, on_conference_peer_list_changed;
    FileRecv => file_recv, on_file_recv;
    FileRecvChunk => file_recv_chunk, on_file_recv_chunk;
    FileRecvControl => file_recv_control, on_file_recv_control;
    FileChunkRequest => file_chunk_request, on_file_chunk_request;
}

impl Tox {
    /// Register (`Some`) or unregister (`None`) the handler for event kind `E`.
    pub fn set_callback<E: Notification>(&mut self, handler: Option<Handler<E>>) {
        let slot = E::slot(&mut self.callbacks);
        slot.handler = handler;
        slot.revision = slot.revision.wrapping_add(1);
    }

    /// Run the handler for one event, if any. A panicking handler is logged and
    /// stays registered.
    pub(crate) fn notify<E: Notification>(&mut self, event: E) {
        let slot = E::slot(&mut self.callbacks);
        let Some(mut handler) = slot.handler.take() else {
            return;
        };
        let revision = slot.revision;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(self, &event)));
        if outcome.is_err() {
            tracing::error!(event = std::any::type_name::<E>(), "event handler panicked");
        }
        let slot = E::slot(&mut self.callbacks);
        if slot.revision == revision {
            slot.handler = Some(handler);
        }
    }
}
