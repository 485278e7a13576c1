//! Helper macros, shared with the server crate.

/// Returns early with `$error` when `$predicate` does not hold.
///
/// ```
/// fn check(len: usize) -> Result<(), &'static str> {
///     micro_ws::ensure!(len <= 125, "control frame too long");
///     Ok(())
/// }
/// assert!(check(126).is_err());
/// ```
#[doc(hidden)]
#[macro_export]
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}
