use std::sync::atomic::{AtomicI32, Ordering};

/// Number of feeds still outstanding in the current refresh cycle.
///
/// Readers never see a negative value: a spurious negative read is reset to
/// zero, and decrements stop at zero.
#[derive(Debug, Default)]
pub struct PendingCounter(AtomicI32);

impl PendingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> i32 {
        let value = self.0.load(Ordering::SeqCst);
        if value < 0 {
            // Only swap back the value we saw, so a concurrent set wins
            let _ = self
                .0
                .compare_exchange(value, 0, Ordering::SeqCst, Ordering::SeqCst);
            return 0;
        }
        value
    }

    pub fn set(&self, value: i32) {
        self.0.store(value.max(0), Ordering::SeqCst);
    }

    /// Decrement by one unless already at zero. Returns the new value.
    pub fn decrement(&self) -> i32 {
        match self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v > 0).then(|| v - 1)
            }) {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_decrement_stops_at_zero() {
        let counter = PendingCounter::new();
        counter.set(2);
        assert_eq!(counter.decrement(), 1);
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.decrement(), 0);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_negative_set_clamped() {
        let counter = PendingCounter::new();
        counter.set(-5);
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decrements_never_negative() {
        let counter = Arc::new(PendingCounter::new());
        counter.set(100);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    assert!(counter.decrement() >= 0);
                    assert!(counter.get() >= 0);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counter.get(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(i32),
        Decrement,
        Reset,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-10i32..100).prop_map(Op::Set),
            Just(Op::Decrement),
            Just(Op::Decrement),
            Just(Op::Decrement),
            Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn prop_never_observed_negative(ops in prop::collection::vec(op(), 0..200)) {
            let counter = PendingCounter::new();
            let mut expected: i32 = 0;
            for op in ops {
                match op {
                    Op::Set(v) => {
                        counter.set(v);
                        expected = v.max(0);
                    }
                    Op::Decrement => {
                        counter.decrement();
                        expected = (expected - 1).max(0);
                    }
                    Op::Reset => {
                        counter.reset();
                        expected = 0;
                    }
                }
                prop_assert!(counter.get() >= 0);
                prop_assert_eq!(counter.get(), expected);
            }
        }
    }
}
