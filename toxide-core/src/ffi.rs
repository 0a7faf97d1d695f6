//! C ABI for linking toxide-core as a static library from C or other host languages.
//! Handles are opaque `void*`; every function tolerates a null handle.
//!
//! Callbacks run inside `toxide_iterate` and may call back into the same
//! handle. `toxide_kill` from a callback stops the instance at once; the
//! handle itself is freed when `toxide_iterate` returns, and must not be used
//! after that.

use std::ffi::{c_char, c_void, CStr};
use std::os::raw::c_int;
use std::ptr;
use std::slice;

use crate::events;
use crate::identity::{Address, PublicKey};
use crate::limits::{ADDRESS_SIZE, PUBLIC_KEY_SIZE};
use crate::options::{Options, Savedata};
use crate::protocol::{MessageKind, PROTOCOL_VERSION};
use crate::session::Tox;
use crate::transport::Connection;
use crate::Handler;

pub type FriendRequestCallback = extern "C" fn(
    tox: *mut c_void,
    public_key: *const u8,
    message: *const u8,
    length: usize,
    user_data: *mut c_void,
);

pub type FriendMessageCallback = extern "C" fn(
    tox: *mut c_void,
    friend: u32,
    kind: c_int,
    message: *const u8,
    length: usize,
    user_data: *mut c_void,
);

pub type FriendConnectionStatusCallback =
    extern "C" fn(tox: *mut c_void, friend: u32, connection: c_int, user_data: *mut c_void);

/// Host context pointer, passed back untouched.
struct UserData(*mut c_void);

// The pointer is only handed back to the host's callbacks, on whatever thread
// the host chose to iterate on.
unsafe impl Send for UserData {}

impl UserData {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

fn tox_mut<'a>(h: *mut c_void) -> Option<&'a mut Tox> {
    unsafe { (h as *mut Tox).as_mut() }
}

fn input<'a>(data: *const u8, len: usize) -> Option<&'a [u8]> {
    if data.is_null() {
        let empty: &[u8] = &[];
        return (len == 0).then_some(empty);
    }
    Some(unsafe { slice::from_raw_parts(data, len) })
}

fn input_str<'a>(data: *const u8, len: usize) -> Option<&'a str> {
    std::str::from_utf8(input(data, len)?).ok()
}

fn c_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

/// Copy into a host buffer. Returns bytes written, or -1 if it does not fit.
fn output(bytes: &[u8], out: *mut u8, out_len: usize) -> c_int {
    if out.is_null() || bytes.len() > out_len {
        return -1;
    }
    unsafe {
        out.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
    bytes.len() as c_int
}

fn connection_code(connection: Connection) -> c_int {
    match connection {
        Connection::None => 0,
        Connection::Tcp => 1,
        Connection::Udp => 2,
    }
}

fn message_kind(kind: c_int) -> Option<MessageKind> {
    match kind {
        0 => Some(MessageKind::Normal),
        1 => Some(MessageKind::Action),
        _ => None,
    }
}

/// Protocol version spoken by this build.
#[no_mangle]
pub extern "C" fn toxide_version() -> u8 {
    PROTOCOL_VERSION
}

/// Create an instance on the default network, from savedata if `savedata_len > 0`.
/// Returns an opaque handle, or null on failure.
#[no_mangle]
pub extern "C" fn toxide_new(savedata: *const u8, savedata_len: usize) -> *mut c_void {
    let Some(blob) = input(savedata, savedata_len) else {
        return ptr::null_mut();
    };
    let options = Options {
        savedata: if blob.is_empty() {
            Savedata::Fresh
        } else {
            Savedata::Snapshot(blob.to_vec())
        },
        ..Options::default()
    }
    .with_env();
    match Tox::new(options) {
        Ok(tox) => Box::into_raw(Box::new(tox)) as *mut c_void,
        Err(e) => {
            tracing::warn!(%e, "toxide_new failed");
            ptr::null_mut()
        }
    }
}

/// Destroy an instance. No-op if h is null.
#[no_mangle]
pub extern "C" fn toxide_kill(h: *mut c_void) {
    let Some(tox) = tox_mut(h) else {
        return;
    };
    if tox.dispatching {
        tox.kill();
        tox.free_after_dispatch = true;
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut Tox) };
}

/// Run one tick. Returns 0, or -1 on error. Returns 1 if a callback killed
/// the instance; the handle is freed by then.
#[no_mangle]
pub extern "C" fn toxide_iterate(h: *mut c_void) -> c_int {
    let Some(tox) = tox_mut(h) else {
        return -1;
    };
    let result = tox.iterate();
    if tox.free_after_dispatch {
        let _ = unsafe { Box::from_raw(h as *mut Tox) };
        return 1;
    }
    match result {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Milliseconds until the next tick should run. 0 if h is invalid.
#[no_mangle]
pub extern "C" fn toxide_iteration_interval(h: *mut c_void) -> u32 {
    tox_mut(h)
        .and_then(|tox| tox.iteration_interval().ok())
        .map_or(0, |d| d.as_millis() as u32)
}

/// Set own name (UTF-8). Returns 0, or -1 on error.
#[no_mangle]
pub extern "C" fn toxide_self_set_name(h: *mut c_void, name: *const u8, len: usize) -> c_int {
    let (Some(tox), Some(name)) = (tox_mut(h), input_str(name, len)) else {
        return -1;
    };
    match tox.self_set_name(name) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Copy own name into out_buf. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn toxide_self_get_name(h: *mut c_void, out_buf: *mut u8, out_len: usize) -> c_int {
    match tox_mut(h).map(|tox| tox.self_name()) {
        Some(Ok(name)) => output(name.as_bytes(), out_buf, out_len),
        _ => -1,
    }
}

/// Copy own 38-byte address into out_buf. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn toxide_self_get_address(h: *mut c_void, out_buf: *mut u8, out_len: usize) -> c_int {
    match tox_mut(h).map(|tox| tox.self_address()) {
        Some(Ok(address)) => output(&address.to_bytes(), out_buf, out_len),
        _ => -1,
    }
}

/// Size of the savedata blob, 0 on error.
#[no_mangle]
pub extern "C" fn toxide_get_savedata_size(h: *mut c_void) -> usize {
    tox_mut(h)
        .and_then(|tox| tox.savedata().ok())
        .map_or(0, |blob| blob.len())
}

/// Copy the savedata blob into out_buf. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn toxide_get_savedata(h: *mut c_void, out_buf: *mut u8, out_len: usize) -> c_int {
    match tox_mut(h).map(|tox| tox.savedata()) {
        Some(Ok(blob)) => output(&blob, out_buf, out_len),
        _ => -1,
    }
}

/// Register a bootstrap node. `host` and `public_key_hex` are NUL-terminated.
/// Returns 0, or -1 on error.
#[no_mangle]
pub extern "C" fn toxide_bootstrap(
    h: *mut c_void,
    host: *const c_char,
    port: u16,
    public_key_hex: *const c_char,
) -> c_int {
    let (Some(tox), Some(host), Some(key)) = (tox_mut(h), c_str(host), c_str(public_key_hex)) else {
        return -1;
    };
    match tox.bootstrap(host, port, key) {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!(%e, "toxide_bootstrap failed");
            -1
        }
    }
}

/// Add a friend by 38-byte address. Returns the friend number, or -1 on error.
#[no_mangle]
pub extern "C" fn toxide_friend_add(
    h: *mut c_void,
    address: *const u8,
    message: *const u8,
    len: usize,
) -> i64 {
    let (Some(tox), Some(raw), Some(message)) = (
        tox_mut(h),
        input(address, ADDRESS_SIZE),
        input_str(message, len),
    ) else {
        return -1;
    };
    let Ok(address) = Address::try_from(raw) else {
        return -1;
    };
    tox.friend_add(&address, message).map_or(-1, i64::from)
}

/// Add a friend by 32-byte public key without a request. Returns the friend
/// number, or -1 on error.
#[no_mangle]
pub extern "C" fn toxide_friend_add_norequest(h: *mut c_void, public_key: *const u8) -> i64 {
    let (Some(tox), Some(raw)) = (tox_mut(h), input(public_key, PUBLIC_KEY_SIZE)) else {
        return -1;
    };
    let Ok(key) = PublicKey::try_from(raw) else {
        return -1;
    };
    tox.friend_add_norequest(&key).map_or(-1, i64::from)
}

/// Returns 0, or -1 if the friend does not exist.
#[no_mangle]
pub extern "C" fn toxide_friend_delete(h: *mut c_void, friend: u32) -> c_int {
    match tox_mut(h).map(|tox| tox.friend_delete(friend)) {
        Some(Ok(())) => 0,
        _ => -1,
    }
}

/// `kind`: 0 normal, 1 action. Returns the message id, or -1 on error.
#[no_mangle]
pub extern "C" fn toxide_friend_send_message(
    h: *mut c_void,
    friend: u32,
    kind: c_int,
    message: *const u8,
    len: usize,
) -> i64 {
    let (Some(tox), Some(kind), Some(text)) = (tox_mut(h), message_kind(kind), input_str(message, len))
    else {
        return -1;
    };
    tox.friend_send_message(friend, kind, text).map_or(-1, i64::from)
}

/// Register (or with a null `cb`, clear) the friend request callback.
#[no_mangle]
pub extern "C" fn toxide_callback_friend_request(
    h: *mut c_void,
    cb: Option<FriendRequestCallback>,
    user_data: *mut c_void,
) {
    let Some(tox) = tox_mut(h) else {
        return;
    };
    let user = UserData(user_data);
    let handler = cb.map(|cb| -> Handler<events::FriendRequest> {
        Box::new(move |tox: &mut Tox, e: &events::FriendRequest| {
            let message = e.message.as_bytes();
            cb(
                tox as *mut Tox as *mut c_void,
                e.public_key.as_bytes().as_ptr(),
                message.as_ptr(),
                message.len(),
                user.get(),
            )
        })
    });
    tox.set_callback(handler);
}

/// Register (or with a null `cb`, clear) the friend message callback.
#[no_mangle]
pub extern "C" fn toxide_callback_friend_message(
    h: *mut c_void,
    cb: Option<FriendMessageCallback>,
    user_data: *mut c_void,
) {
    let Some(tox) = tox_mut(h) else {
        return;
    };
    let user = UserData(user_data);
    let handler = cb.map(|cb| -> Handler<events::FriendMessage> {
        Box::new(move |tox: &mut Tox, e: &events::FriendMessage| {
            let kind = match e.kind {
                MessageKind::Normal => 0,
                MessageKind::Action => 1,
            };
            let text = e.text.as_bytes();
            cb(
                tox as *mut Tox as *mut c_void,
                e.friend,
                kind,
                text.as_ptr(),
                text.len(),
                user.get(),
            )
        })
    });
    tox.set_callback(handler);
}

/// Register (or with a null `cb`, clear) the friend connection callback.
/// `connection`: 0 none, 1 TCP, 2 UDP.
#[no_mangle]
pub extern "C" fn toxide_callback_friend_connection_status(
    h: *mut c_void,
    cb: Option<FriendConnectionStatusCallback>,
    user_data: *mut c_void,
) {
    let Some(tox) = tox_mut(h) else {
        return;
    };
    let user = UserData(user_data);
    let handler = cb.map(|cb| -> Handler<events::FriendConnectionStatus> {
        Box::new(move |tox: &mut Tox, e: &events::FriendConnectionStatus| {
            cb(
                tox as *mut Tox as *mut c_void,
                e.friend,
                connection_code(e.connection),
                user.get(),
            )
        })
    });
    tox.set_callback(handler);
}
