//! Utility functions and helpers.

/// Run a fallible operation, retrying once if the first attempt fails.
///
/// The first failure is logged as a warning; the second is returned to the
/// caller untouched.
pub fn retry_once<T, E, F>(context: &str, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    match op() {
        Ok(v) => Ok(v),
        Err(e) => {
            tracing::warn!("{} failed, retrying once: {}", context, e);
            op()
        }
    }
}
