//! Error types for stack allocator construction

use thiserror::Error;

/// Result type for stack allocator operations
pub type Result<T> = std::result::Result<T, StackError>;

/// Errors that can occur while building a stack allocator
///
/// Running out of space during `allocate` is not an error value; it is
/// reported as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// Requested capacity was zero
    #[error("Stack capacity must be greater than zero")]
    ZeroCapacity,

    /// Base alignment is not a power of two
    #[error("Base alignment {alignment} is not a power of two")]
    InvalidAlignment {
        alignment: usize,
    },

    /// Capacity plus alignment padding does not fit in a valid layout
    #[error("Capacity {capacity} with base alignment {alignment} overflows the address space")]
    CapacityOverflow {
        capacity: usize,
        alignment: usize,
    },

    /// Backing memory provider could not satisfy the request
    #[error("Out of memory: failed to acquire {requested} bytes")]
    OutOfMemory {
        requested: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            StackError::InvalidAlignment { alignment: 3 }.to_string(),
            "Base alignment 3 is not a power of two"
        );
        assert_eq!(
            StackError::OutOfMemory { requested: 1031 }.to_string(),
            "Out of memory: failed to acquire 1031 bytes"
        );
    }
}
