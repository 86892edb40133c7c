//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod collectors;

use std::time::{Duration, Instant};

/// Upper bound for anything that is supposed to finish "promptly"
pub fn test_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Run `f` on a separate thread and fail the test if it does not return
/// within [`test_timeout`].
pub fn within_timeout<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    let started = Instant::now();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(test_timeout()) {
        Ok(value) => value,
        Err(_) => panic!("did not finish within {:?}", started.elapsed()),
    }
}
