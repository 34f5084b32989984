//! Errors reported by the arena allocator.

use snafu::Snafu;
use snafu_utils::Location;

/// The error type returned by [`ArenaAllocator`](crate::ArenaAllocator)
/// operations.
///
/// Every variant records the caller location that produced it. A failed
/// operation never changes the allocator state.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum ArenaError {
    /// The arena pointer is null, or the buffer cannot hold a single free
    /// block once aligned.
    #[snafu(display("invalid arena given: address={address:#x}, capacity={capacity}"))]
    InvalidArena {
        address: usize,
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// No free block can hold the request, or the free space counter rejected
    /// it before searching.
    #[snafu(display("out of arena space: requested={requested}, free_space={free_space}"))]
    OutOfSpace {
        requested: usize,
        free_space: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// A zero-byte allocation was requested.
    #[snafu(display("allocation size must be greater than zero"))]
    InvalidRequestSize {
        #[snafu(implicit)]
        location: Location,
    },
    /// The pointer does not name a live allocation of this arena.
    #[snafu(display("pointer is not a live allocation of this arena: address={address:#x}"))]
    UndefinedPointer {
        address: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Field-less discriminant of [`ArenaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::IsVariant)]
#[non_exhaustive]
pub enum ArenaErrorKind {
    #[display("invalid arena")]
    InvalidArena,
    #[display("out of space")]
    OutOfSpace,
    #[display("invalid request size")]
    InvalidRequestSize,
    #[display("undefined pointer")]
    UndefinedPointer,
}

impl ArenaError {
    #[must_use]
    pub fn kind(&self) -> ArenaErrorKind {
        match self {
            Self::InvalidArena { .. } => ArenaErrorKind::InvalidArena,
            Self::OutOfSpace { .. } => ArenaErrorKind::OutOfSpace,
            Self::InvalidRequestSize { .. } => ArenaErrorKind::InvalidRequestSize,
            Self::UndefinedPointer { .. } => ArenaErrorKind::UndefinedPointer,
        }
    }

    /// Returns the source location where the error was raised.
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::InvalidArena { location, .. }
            | Self::OutOfSpace { location, .. }
            | Self::InvalidRequestSize { location }
            | Self::UndefinedPointer { location, .. } => *location,
        }
    }
}
