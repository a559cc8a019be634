//==============================================================================
// Sample resources
//==============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::error::ConstructionFailure;

const PAYLOAD_LEN: usize = 256;

/// SharedResource: the thing a demo provider hands out.
///
/// `id` is fresh per construction, so two handles with the same id came from
/// the same construction.
#[derive(Debug)]
pub struct SharedResource {
    id: Uuid,
    attempt: u32,
    payload: Vec<u64>,
}

impl SharedResource {
    fn build(attempt: u32) -> Self {
        SharedResource {
            id: Uuid::new_v4(),
            attempt,
            payload: (0..PAYLOAD_LEN as u64).map(|i| i * i).collect(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Which factory attempt produced this instance (1-based, 0 for `Default`).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// True once every payload slot holds its final value.
    pub fn is_complete(&self) -> bool {
        self.payload.len() == PAYLOAD_LEN
            && self
                .payload
                .iter()
                .enumerate()
                .all(|(i, &v)| v == (i as u64) * (i as u64))
    }
}

impl Default for SharedResource {
    fn default() -> Self {
        SharedResource::build(0)
    }
}

/// ResourceFactory: builds `SharedResource`s slowly and, on request, badly.
///
/// The first `fail_first` calls to `build` return a `ConstructionFailure`;
/// every call sleeps for `delay` first.
#[derive(Debug)]
pub struct ResourceFactory {
    delay: Duration,
    fail_first: u32,
    attempts: AtomicU32,
    constructed: AtomicU32,
}

impl ResourceFactory {
    pub fn new(delay: Duration, fail_first: u32) -> Self {
        ResourceFactory {
            delay,
            fail_first,
            attempts: AtomicU32::new(0),
            constructed: AtomicU32::new(0),
        }
    }

    pub fn build(&self) -> Result<SharedResource, ConstructionFailure> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        if attempt <= self.fail_first {
            return Err(ConstructionFailure::new::<SharedResource>(format!(
                "backend refused attempt {} of {} scheduled failures",
                attempt, self.fail_first
            )));
        }

        let resource = SharedResource::build(attempt);
        self.constructed.fetch_add(1, Ordering::SeqCst);
        debug!(id = %resource.id, attempt, "shared resource built");
        Ok(resource)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful constructions only.
    pub fn constructed(&self) -> u32 {
        self.constructed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::LazyProvider;

    #[test]
    fn test_factory_fails_then_builds() {
        let factory = ResourceFactory::new(Duration::ZERO, 2);

        assert!(factory.build().is_err());
        assert!(factory.build().is_err());
        let resource = factory.build().unwrap();

        assert_eq!(resource.attempt(), 3);
        assert!(resource.is_complete());
        assert_eq!(factory.attempts(), 3);
        assert_eq!(factory.constructed(), 1);
    }

    #[test]
    fn test_each_construction_gets_new_id() {
        let factory = ResourceFactory::new(Duration::ZERO, 0);
        let a = factory.build().unwrap();
        let b = factory.build().unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_default_resource_through_provider() {
        let provider: LazyProvider<SharedResource> = LazyProvider::of_default();
        let first = provider.get_instance().unwrap();
        let second = provider.get_instance().unwrap();

        assert_eq!(first.attempt(), 0);
        assert_eq!(first.id(), second.id());
        assert!(first.is_complete());
    }

    #[test]
    fn test_failure_message_names_resource() {
        let factory = ResourceFactory::new(Duration::ZERO, 1);
        let err = factory.build().unwrap_err();
        assert!(err.resource().ends_with("SharedResource"));
        assert!(err.message().contains("attempt 1 of 1"));
    }
}
