use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

/// Counter set stored in each window of a [`LeapArray`].
pub trait Bucket: Send + Sync {
    /// Zero every counter so the bucket can be reused for a new span.
    fn reset(&self);
}

/// A time aligned slice of a [`LeapArray`].
///
/// The start is atomic so the rotating thread can move an existing window
/// to a new span in place while readers keep their `Arc`.
pub struct Window<B> {
    length_ms: u64,
    start_ms: AtomicU64,
    value: B,
}

impl<B> Window<B> {
    fn new(length_ms: u64, start_ms: u64, value: B) -> Self {
        Self {
            length_ms,
            start_ms: AtomicU64::new(start_ms),
            value,
        }
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms.load(Ordering::Acquire)
    }

    pub fn length_ms(&self) -> u64 {
        self.length_ms
    }

    pub fn value(&self) -> &B {
        &self.value
    }

    /// Whether `time_ms` falls within this window's span.
    pub fn contains(&self, time_ms: u64) -> bool {
        let start = self.start_ms();
        start <= time_ms && time_ms < start + self.length_ms
    }
}

impl<B: Bucket> Window<B> {
    fn reset_to(&self, start_ms: u64) {
        self.value.reset();
        self.start_ms.store(start_ms, Ordering::Release);
    }
}

impl<B> fmt::Debug for Window<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("start_ms", &self.start_ms())
            .field("length_ms", &self.length_ms)
            .finish_non_exhaustive()
    }
}

/// Fixed size circular array of time bucketed windows.
///
/// `interval_ms` is split into `sample_count` windows of `window_length_ms`
/// each; a timestamp maps to slot `(time / window_length_ms) % sample_count`.
/// Rotation never blocks the common path:
///
/// * an empty slot is filled with a compare-and-swap, losers retry;
/// * a slot already aligned to the requested span is returned as is;
/// * a stale slot is reset in place by whichever thread wins the store's
///   single update lock, losers yield and retry.
///
/// Windows older than `interval_ms` stay in the array until reused but are
/// never reported by the read methods.
pub struct LeapArray<B> {
    window_length_ms: u64,
    sample_count: usize,
    interval_ms: u64,
    slots: Box<[ArcSwapOption<Window<B>>]>,
    update_lock: Mutex<()>,
}

impl<B: Bucket + Default> LeapArray<B> {
    /// Creates a store of `sample_count` windows spanning `interval_ms`.
    ///
    /// # Panics
    ///
    /// Panics if `sample_count` is zero or does not divide `interval_ms`
    /// into whole, non-empty windows.
    pub fn new(sample_count: u32, interval_ms: u64) -> Self {
        assert!(sample_count > 0, "sample_count must be non-zero");
        assert!(
            interval_ms % u64::from(sample_count) == 0 && interval_ms >= u64::from(sample_count),
            "interval_ms ({interval_ms}) must be a positive multiple of sample_count ({sample_count})"
        );
        let sample_count = sample_count as usize;
        let slots = (0..sample_count)
            .map(|_| ArcSwapOption::empty())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            window_length_ms: interval_ms / sample_count as u64,
            sample_count,
            interval_ms,
            slots,
            update_lock: Mutex::new(()),
        }
    }

    /// The window covering `time_ms`, created or rotated as needed.
    pub fn current_window(&self, time_ms: u64) -> Arc<Window<B>> {
        let idx = self.index_of(time_ms);
        let window_start = time_ms - time_ms % self.window_length_ms;
        let slot = &self.slots[idx];

        loop {
            let old = slot.load_full();
            match old {
                None => {
                    let fresh = Arc::new(Window::new(
                        self.window_length_ms,
                        window_start,
                        B::default(),
                    ));
                    let empty: Option<Arc<Window<B>>> = None;
                    let previous = slot.compare_and_swap(&empty, Some(Arc::clone(&fresh)));
                    if previous.is_none() {
                        return fresh;
                    }
                    // Another thread installed this slot first
                    std::thread::yield_now();
                }
                Some(old) => {
                    let old_start = old.start_ms();
                    if window_start == old_start {
                        return old;
                    } else if window_start > old_start {
                        if let Some(_guard) = self.update_lock.try_lock() {
                            // Re-check under the lock, a previous winner may have rotated it
                            let current = old.start_ms();
                            if current < window_start {
                                old.reset_to(window_start);
                            }
                            if old.start_ms() == window_start {
                                return old;
                            }
                        } else {
                            std::thread::yield_now();
                        }
                    } else {
                        // Time went backwards: hand out a window nobody else will see
                        return Arc::new(Window::new(
                            self.window_length_ms,
                            window_start,
                            B::default(),
                        ));
                    }
                }
            }
        }
    }

    /// The window immediately preceding the one covering `time_ms`, if it
    /// is still live.
    pub fn previous_window(&self, time_ms: u64) -> Option<Arc<Window<B>>> {
        let previous = time_ms.checked_sub(self.window_length_ms)?;
        let idx = self.index_of(previous);
        let expected_start = previous - previous % self.window_length_ms;
        let window = self.slots[idx].load_full()?;
        if self.is_expired(&window, time_ms) || window.start_ms() != expected_start {
            return None;
        }
        Some(window)
    }

    /// The bucket of the window covering `time_ms`, without rotating.
    pub fn window_value(&self, time_ms: u64) -> Option<Arc<Window<B>>> {
        let window = self.slots[self.index_of(time_ms)].load_full()?;
        window.contains(time_ms).then_some(window)
    }

    /// Every live window at `time_ms`, oldest first.
    pub fn list(&self, time_ms: u64) -> Vec<Arc<Window<B>>> {
        let mut windows: Vec<_> = self
            .slots
            .iter()
            .filter_map(|slot| slot.load_full())
            .filter(|window| !self.is_expired(window, time_ms))
            .collect();
        windows.sort_by_key(|window| window.start_ms());
        windows
    }

    /// Whether `window` has fallen out of the retained interval at `time_ms`.
    pub fn is_expired(&self, window: &Window<B>, time_ms: u64) -> bool {
        time_ms.saturating_sub(window.start_ms()) >= self.interval_ms
    }

    pub fn window_length_ms(&self) -> u64 {
        self.window_length_ms
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Retained span in seconds, the divisor of every rate.
    pub fn interval_sec(&self) -> f64 {
        self.interval_ms as f64 / 1000.0
    }

    fn index_of(&self, time_ms: u64) -> usize {
        ((time_ms / self.window_length_ms) % self.sample_count as u64) as usize
    }
}

impl<B> fmt::Debug for LeapArray<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeapArray")
            .field("window_length_ms", &self.window_length_ms)
            .field("sample_count", &self.sample_count)
            .field("interval_ms", &self.interval_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::time::TimeSource;

    #[derive(Debug, Default)]
    struct Tally(AtomicUsize);

    impl Bucket for Tally {
        fn reset(&self) {
            self.0.store(0, Ordering::Relaxed);
        }
    }

    fn total(array: &LeapArray<Tally>, now: u64) -> usize {
        array
            .list(now)
            .iter()
            .map(|w| w.value().0.load(Ordering::Relaxed))
            .sum()
    }

    #[test]
    fn it_aligns_windows_to_their_length() {
        let array = LeapArray::<Tally>::new(2, 1000);
        let w = array.current_window(1234);
        assert_eq!(w.start_ms(), 1000);
        assert_eq!(w.length_ms(), 500);
        assert!(w.contains(1499));
        assert!(!w.contains(1500));
    }

    #[test]
    fn it_returns_the_same_window_within_a_span() {
        let array = LeapArray::<Tally>::new(2, 1000);
        let a = array.current_window(100);
        a.value().0.fetch_add(3, Ordering::Relaxed);
        let b = array.current_window(499);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(total(&array, 200), total(&array, 450));
    }

    #[test]
    fn it_resets_a_stale_slot_in_place() {
        let array = LeapArray::<Tally>::new(2, 1000);
        let first = array.current_window(100);
        first.value().0.fetch_add(5, Ordering::Relaxed);

        // Same slot one full interval later
        let rotated = array.current_window(1100);
        assert!(Arc::ptr_eq(&first, &rotated));
        assert_eq!(rotated.start_ms(), 1000);
        assert_eq!(rotated.value().0.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn it_hands_out_a_detached_window_when_time_goes_backwards() {
        let array = LeapArray::<Tally>::new(2, 1000);
        let installed = array.current_window(1100);
        let stale = array.current_window(100);
        assert!(!Arc::ptr_eq(&installed, &stale));
        assert_eq!(stale.start_ms(), 0);
        assert_eq!(array.current_window(1100).start_ms(), 1000);
    }

    #[test]
    fn it_hides_expired_windows() {
        let array = LeapArray::<Tally>::new(4, 1000);
        array.current_window(0).value().0.fetch_add(1, Ordering::Relaxed);
        array.current_window(250).value().0.fetch_add(1, Ordering::Relaxed);
        assert_eq!(array.list(999).len(), 2);
        assert_eq!(total(&array, 999), 2);

        // The first window expires exactly one interval after its start
        assert_eq!(total(&array, 1000), 1);
        assert_eq!(total(&array, 1250), 0);
        assert!(array.list(5000).is_empty());
    }

    #[test]
    fn it_lists_windows_oldest_first() {
        let array = LeapArray::<Tally>::new(4, 1000);
        for t in [750, 250, 500, 1000] {
            array.current_window(t);
        }
        let starts: Vec<_> = array.list(1100).iter().map(|w| w.start_ms()).collect();
        assert_eq!(starts, vec![250, 500, 750, 1000]);
    }

    #[test]
    fn it_finds_the_previous_window() {
        let array = LeapArray::<Tally>::new(2, 1000);
        assert!(array.previous_window(100).is_none());

        array.current_window(100).value().0.fetch_add(7, Ordering::Relaxed);
        let prev = array.previous_window(600).expect("previous window");
        assert_eq!(prev.start_ms(), 0);
        assert_eq!(prev.value().0.load(Ordering::Relaxed), 7);

        // Two spans later the slot holds nothing for the preceding span
        assert!(array.previous_window(1600).is_none());
    }

    #[test]
    fn it_reads_without_rotating() {
        let array = LeapArray::<Tally>::new(2, 1000);
        array.current_window(100);
        assert!(array.window_value(200).is_some());
        assert!(array.window_value(1200).is_none());
        assert_eq!(array.current_window(200).start_ms(), 0);
    }

    #[test]
    fn concurrent_first_use_installs_one_window() {
        let array = Arc::new(LeapArray::<Tally>::new(2, 1000));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let array = Arc::clone(&array);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        array.current_window(42).value().0.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(total(&array, 42), 16_000);
    }

    #[test]
    fn concurrent_rotation_conserves_counts() {
        const THREADS: usize = 8;
        const ADDS: usize = 500;
        const SPANS: usize = 6;

        let (clock, mock) = quanta::Clock::mock();
        let time = TimeSource::with_clock(clock);
        mock.increment(Duration::from_millis(250));
        let array = Arc::new(LeapArray::<Tally>::new(2, 1000));
        let barrier = Arc::new(Barrier::new(THREADS));
        // (current window, live total) seen after each span
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let array = Arc::clone(&array);
                let barrier = Arc::clone(&barrier);
                let seen = Arc::clone(&seen);
                let mock = Arc::clone(&mock);
                let time = time.clone();
                thread::spawn(move || {
                    for _ in 0..SPANS {
                        let now = time.now_ms();
                        for _ in 0..ADDS {
                            array.current_window(now).value().0.fetch_add(1, Ordering::Relaxed);
                        }
                        if barrier.wait().is_leader() {
                            let current = array.current_window(now).value().0.load(Ordering::Relaxed);
                            seen.lock().push((current, total(&array, now)));
                            mock.increment(Duration::from_millis(500));
                        }
                        barrier.wait();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let per_span = THREADS * ADDS;
        let seen = seen.lock();
        assert_eq!(seen.len(), SPANS);
        assert_eq!(seen[0], (per_span, per_span));
        // Each slot is reused from span 2 on; only the last two spans are live
        for &(current, live) in &seen[1..] {
            assert_eq!(current, per_span);
            assert_eq!(live, 2 * per_span);
        }
    }

    #[test]
    #[should_panic(expected = "multiple of sample_count")]
    fn it_rejects_uneven_windows() {
        let _ = LeapArray::<Tally>::new(3, 1000);
    }
}
