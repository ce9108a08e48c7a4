//! Utility macros for error construction.

/// Creates a [`crate::error::CdcError`] from an error kind and description,
/// with an optional dynamic detail.
///
/// ```rust,ignore
/// let error = cdc_error!(ErrorKind::QueryFailed, "statement rejected");
/// let error = cdc_error!(
///     ErrorKind::QueryFailed,
///     "statement rejected",
///     format!("table `{table}` does not exist")
/// );
/// ```
#[macro_export]
macro_rules! cdc_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::CdcError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::CdcError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Creates a [`crate::error::CdcError`] and returns it from the current
/// function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::cdc_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::cdc_error!($kind, $desc, $detail))
    };
}
