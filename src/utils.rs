use std::time::{SystemTime, UNIX_EPOCH};

// utility functions

/// microseconds since the epoch.  All packet timestamps and timers in the
/// bridge run off this one clock.
pub fn get_micro_time() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_micros()
}

#[cfg(test)]
mod test_utils {
    use super::*;

    #[test]
    fn micro_time_advances() {
        let t1 = get_micro_time();
        let t2 = get_micro_time();
        assert!(t2 >= t1);
    }
}
