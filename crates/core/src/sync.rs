use parking_lot::RwLock;

/// Reader-writer protected value accessed through closures.
///
/// Guards never escape the closure, so the lock is released on every exit
/// path, including a panic inside `f`.
#[derive(Debug, Default)]
pub struct Guarded<T> {
    inner: RwLock<T>,
}

impl<T> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Run `f` under the shared lock. Many readers may run concurrently.
    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run `f` under the exclusive lock.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn read_and_write() {
        let g = Guarded::new(1);
        g.with_write(|v| *v += 1);
        assert_eq!(g.with_read(|v| *v), 2);
    }

    #[test]
    fn released_after_panic() {
        let g = Guarded::new(0);
        let result = catch_unwind(AssertUnwindSafe(|| {
            g.with_write(|_| panic!("boom"));
        }));
        assert!(result.is_err());
        // parking_lot does not poison, so the lock is usable again.
        g.with_write(|v| *v = 5);
        assert_eq!(g.with_read(|v| *v), 5);
    }

    #[test]
    fn concurrent_writers() {
        let g = Arc::new(Guarded::new(0u32));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let g = g.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        g.with_write(|v| *v += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(g.with_read(|v| *v), 4000);
    }
}
