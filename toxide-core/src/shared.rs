//! Thread-shareable instance handle.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::session::{Killed, Tox};

/// The instance was created without `thread_safe`; it is handed back.
#[derive(thiserror::Error)]
#[error("instance was not created with thread_safe set")]
pub struct NotThreadSafe(pub Tox);

impl fmt::Debug for NotThreadSafe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NotThreadSafe")
    }
}

/// One instance behind a mutex: every call, including `iterate`, takes the
/// same lock, so the instance stays a single exclusion domain. Handlers get
/// `&mut Tox` directly and must not lock the handle again.
#[derive(Clone)]
pub struct SharedTox {
    inner: Arc<Mutex<Tox>>,
}

impl SharedTox {
    /// Share an instance created with [`Options::thread_safe`](crate::Options::thread_safe).
    pub fn new(tox: Tox) -> Result<Self, NotThreadSafe> {
        if !tox.is_thread_safe() {
            return Err(NotThreadSafe(tox));
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(tox)),
        })
    }

    /// Exclusive access for a sequence of calls.
    pub fn lock(&self) -> MutexGuard<'_, Tox> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one tick and return the delay until the next.
    pub fn iterate(&self) -> Result<Duration, Killed> {
        let mut tox = self.lock();
        tox.iterate()?;
        tox.iteration_interval()
    }
}

impl TryFrom<Tox> for SharedTox {
    type Error = NotThreadSafe;

    fn try_from(tox: Tox) -> Result<Self, NotThreadSafe> {
        Self::new(tox)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::loopback::Network;
    use crate::options::Options;

    fn options(thread_safe: bool) -> Options {
        Options {
            local_discovery_enabled: false,
            thread_safe,
            ..Options::default()
        }
    }

    #[test]
    fn requires_thread_safe_instance() {
        let tox = Tox::with_network(options(false), &Network::new()).unwrap();
        let NotThreadSafe(tox) = SharedTox::new(tox).err().unwrap();
        assert!(tox.is_alive());
        assert!(!tox.is_thread_safe());
    }

    #[test]
    fn driven_from_another_thread() {
        let tox = Tox::with_network(options(true), &Network::new()).unwrap();
        let shared = SharedTox::try_from(tox).unwrap();
        let worker = shared.clone();
        let ticks = thread::spawn(move || {
            for _ in 0..10 {
                worker.iterate().unwrap();
            }
        });
        shared.lock().self_set_name("threaded").unwrap();
        ticks.join().unwrap();
        assert_eq!(shared.lock().self_name().unwrap(), "threaded");
        shared.lock().kill();
        assert_eq!(shared.iterate(), Err(Killed));
    }
}
