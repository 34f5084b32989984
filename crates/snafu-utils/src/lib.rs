//! Shared pieces for `snafu` based error handling.
//!
//! - [`Location`]: implicit error data recording where an error was raised.
//! - [`Report`]: prints an error together with its chain of sources.
//! - `GenericError`: an ad-hoc `whatever` error for binaries (requires the
//!   `alloc` feature).

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

use core::{error::Error, fmt};

use snafu::GenerateImplicitData;

/// Source location captured when an error is built.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Location {
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line()
    }

    #[must_use]
    pub fn column(&self) -> u32 {
        self.0.column()
    }
}

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(feature = "alloc")]
pub use self::generic::GenericError;

#[cfg(feature = "alloc")]
mod generic {
    use alloc::{boxed::Box, string::String};

    use snafu::Snafu;

    use super::Location;

    /// Catch-all error carrying a message and an optional source.
    #[derive(Debug, Snafu)]
    #[snafu(whatever, display("{message}"))]
    pub struct GenericError {
        message: String,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source(from(Box<dyn core::error::Error>, Some)))]
        source: Option<Box<dyn core::error::Error>>,
    }

    impl GenericError {
        #[must_use]
        pub fn location(&self) -> Location {
            self.location
        }
    }
}

/// Formats an error followed by every error in its source chain.
///
/// ```text
/// Error: failed to initialize arena
///
/// Caused by:
///    0: invalid arena given: address=0x0, capacity=256
/// ```
pub struct Report<E> {
    error: E,
}

impl<E> fmt::Debug for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {s}")?;
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

impl<E> Report<E> {
    #[must_use]
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E> From<E> for Report<E>
where
    E: Error,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}
