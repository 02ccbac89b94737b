//! Metric recording macros.
//!
//! Each macro expands to nothing unless the `metrics` feature is enabled.

/// Sets a gauge, keyed by a single label.
macro_rules! set {
    (gauge, $metric:path, $key:expr, $value:expr, $amount:expr) => {
        #[cfg(feature = "metrics")]
        metrics::gauge!($metric, $key => $value).set($amount);
    };
}

/// Increments a counter by one, optionally keyed by a single label.
macro_rules! inc {
    (counter, $metric:path, $key:expr => $value:expr) => {
        #[cfg(feature = "metrics")]
        metrics::counter!($metric, $key => $value).increment(1);
    };
    (counter, $metric:path) => {
        #[cfg(feature = "metrics")]
        metrics::counter!($metric).increment(1);
    };
}

/// Records a histogram sample keyed by a single label.
macro_rules! record {
    (histogram, $metric:path, $key:expr, $value:expr, $amount:expr) => {
        #[cfg(feature = "metrics")]
        metrics::histogram!($metric, $key => $value).record($amount);
    };
}
