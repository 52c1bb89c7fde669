/// Induces random jitter at interleaving-sensitive points in
/// the locking and cache paths, shaking out more thread
/// schedules quickly. Compiles to nothing unless the
/// `runtime_verification` feature is enabled.
pub(crate) fn debug_delay() {
    #[cfg(feature = "runtime_verification")]
    {
        use std::thread;
        use std::time::Duration;

        use rand::{thread_rng, Rng};

        if thread_rng().gen_range(0..100) < 95 {
            thread::yield_now();
        } else {
            thread::sleep(Duration::from_millis(2));
        }
    }
}
