#[cfg(test)]
mod tests {
    use crate::keyed::KeyedMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn same_key_is_exclusive() {
        let mutex: KeyedMutex<String> = KeyedMutex::new();
        let inside = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);
        let key = "doc1".to_string();

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        mutex.with(&key, || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                });
            }
        });

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_keys_do_not_block_each_other() {
        let mutex: KeyedMutex<&str> = KeyedMutex::new();
        let barrier = Barrier::new(2);

        // Both threads must be inside their critical sections at once to pass the barrier
        thread::scope(|s| {
            s.spawn(|| mutex.with(&"doc1", || barrier.wait()));
            s.spawn(|| mutex.with(&"doc2", || barrier.wait()));
        });
    }

    #[test]
    fn idle_keys_are_dropped() {
        let mutex: KeyedMutex<u32> = KeyedMutex::new();
        let value = mutex.with(&7, || 42);
        assert_eq!(value, 42);
        assert!(mutex.is_empty());
    }

    #[test]
    fn key_stays_usable_after_a_holder_panics() {
        let mutex: KeyedMutex<&str> = KeyedMutex::new();
        let crashed = panic::catch_unwind(AssertUnwindSafe(|| {
            mutex.with::<()>(&"doc1", || panic!("holder crashed"))
        }));
        assert!(crashed.is_err());

        assert_eq!(mutex.with(&"doc1", || 7), 7);
        assert!(mutex.is_empty());
    }
}
