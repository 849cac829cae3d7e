//! Macros for node error handling.
//!
//! Convenience macros for creating and returning [`crate::error::NodeError`]
//! instances without spelling out the tuple conversions at every callsite.

/// Creates a [`crate::error::NodeError`] from an error kind and description.
///
/// An optional third argument attaches dynamic detail, and `source:` attaches
/// an originating error.
#[macro_export]
macro_rules! node_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::NodeError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::NodeError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::NodeError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::NodeError::from(($kind, $desc, $detail)).with_source($source)
    };
}

/// Creates and returns a [`crate::error::NodeError`] from the current function.
///
/// Combines error creation with an early return. Supports the same optional
/// detail and source arguments as [`node_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::node_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::node_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::node_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::node_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
