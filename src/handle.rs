use std::time::{SystemTime, UNIX_EPOCH};

use derive_more::Display;
use rand::RngExt;

/// A unique opaque handle identifying a single observer registration.
///
/// Each registration on a future receives its own handle, which is used to
/// correlate the registration with its eventual dispatch in the logs.
///
/// # Example
///
/// ```
/// use fx_future::ObserverHandle;
///
/// let handle = ObserverHandle::new();
/// println!("Generated handle: {:?}", handle);
/// ```
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("observer {}", handle)]
pub struct ObserverHandle {
    handle: i64,
}

impl ObserverHandle {
    /// Creates a new `ObserverHandle` with a unique identifier.
    ///
    /// # Panics
    ///
    /// This function may panic if the system time goes backward during its execution.
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_secs() as i64;

        let mut rng = rand::rng();
        let random_number: i64 = rng.random();

        Self {
            handle: (timestamp << 32) | (random_number & 0xFFFF_FFFF),
        }
    }

    /// Retrieve the underlying value of the handle.
    pub fn value(&self) -> i64 {
        self.handle
    }
}

impl Default for ObserverHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<i64> for ObserverHandle {
    fn from(value: i64) -> Self {
        Self { handle: value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_new() {
        let result = ObserverHandle::new();

        assert_ne!(
            result.handle, 0,
            "expected a unique id to have been generated"
        );
    }

    #[test]
    fn test_handle_from() {
        let id = 458775i64;

        let result = ObserverHandle::from(id);

        assert_eq!(id, result.handle);
    }
}
