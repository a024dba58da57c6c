use rustc_hash::FxHashMap;

pub type FastMap<K, V> = FxHashMap<K, V>;

/// Seconds on the site's standard-time clock.
pub type Seconds = f64;

pub trait EqualLen {
    fn validate_lengths(&self) -> bool;
}
