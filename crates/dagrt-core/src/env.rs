//! Recognized environment variables, read with StarPU's exact semantics
//! under the `DAGRT_` prefix: `DAGRT_SCHED`, `DAGRT_PREFETCH`,
//! `DAGRT_CALIBRATE`. Grounded on
//! `original_source/src/core/sched_policy.c`'s `_starpu_init_sched_policy`.

/// Parse an environment variable as a signed integer, the way
/// `starpu_get_env_number` does: absent or unparseable both read as `None`
/// (the source system's `-1` sentinel).
fn env_number(name: &str) -> Option<i64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// `DAGRT_SCHED`: the raw policy name, or `None` if unset. Selection and the
/// `"help"` listing live in [`crate::sched::registry`].
pub fn sched_name() -> Option<String> {
    std::env::var("DAGRT_SCHED").ok()
}

/// Prefetch is enabled by default; `DAGRT_PREFETCH=0` disables it, any other
/// parsed value (or an unset/unparseable variable) leaves it enabled.
pub fn prefetch_enabled() -> bool {
    match env_number("DAGRT_PREFETCH") {
        None => true,
        Some(v) if v < 0 => true,
        Some(v) => v != 0,
    }
}

/// Calibration is disabled by default (level 0); `DAGRT_CALIBRATE=<n>` with
/// `n >= 0` sets the calibration level, a negative or unset value reads as 0.
pub fn calibrate_level() -> u32 {
    match env_number("DAGRT_CALIBRATE") {
        Some(v) if v >= 0 => v as u32,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn prefetch_defaults_to_enabled_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var("DAGRT_PREFETCH") };
        assert!(prefetch_enabled());
    }

    #[test]
    fn prefetch_disabled_by_zero() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("DAGRT_PREFETCH", "0") };
        assert!(!prefetch_enabled());
        unsafe { std::env::remove_var("DAGRT_PREFETCH") };
    }

    #[test]
    fn calibrate_defaults_to_zero() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var("DAGRT_CALIBRATE") };
        assert_eq!(calibrate_level(), 0);
    }

    #[test]
    fn calibrate_reads_positive_level() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("DAGRT_CALIBRATE", "2") };
        assert_eq!(calibrate_level(), 2);
        unsafe { std::env::remove_var("DAGRT_CALIBRATE") };
    }
}
