//! Stack allocator configuration

use serde::{Deserialize, Serialize};

use crate::error::{Result, StackError};

/// How blocks are laid out in the stack
///
/// Fixed at construction; an allocator never switches mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Every block is preceded by a one-word allocation header that
    /// records how far to rewind on free. Supports any power-of-two alignment
    /// and an alignment offset.
    #[default]
    HeaderCarrying,
    /// No per-block overhead. Alignments are limited to the base alignment and
    /// the returned address is only aligned if every prior size was a multiple
    /// of the requested alignment.
    HeaderFree,
}

impl AllocationMode {
    /// Map the boolean "may exceed base alignment" flag onto a mode
    pub fn from_header_mode(header_mode: bool) -> Self {
        if header_mode {
            Self::HeaderCarrying
        } else {
            Self::HeaderFree
        }
    }

    /// Whether blocks in this mode carry a header
    pub fn carries_header(self) -> bool {
        matches!(self, Self::HeaderCarrying)
    }
}

/// Configuration for a [`StackAllocator`](crate::StackAllocator)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Usable bytes in the stack
    pub capacity: usize,
    /// Alignment of the first address in the stack, a power of two
    pub base_alignment: usize,
    /// Block layout strategy
    pub mode: AllocationMode,
}

impl StackConfig {
    /// Default capacity: 1MB
    pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

    /// Default base alignment: word alignment
    pub const DEFAULT_BASE_ALIGNMENT: usize = core::mem::align_of::<usize>();

    /// Create a config with the given capacity and default alignment and mode
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            base_alignment: Self::DEFAULT_BASE_ALIGNMENT,
            mode: AllocationMode::default(),
        }
    }

    /// Create with capacity in KB
    pub fn with_capacity_kb(kb: usize) -> Self {
        Self::new(kb * 1024)
    }

    /// Create with capacity in MB
    pub fn with_capacity_mb(mb: usize) -> Self {
        Self::new(mb * 1024 * 1024)
    }

    /// Set the base alignment
    pub fn with_base_alignment(mut self, base_alignment: usize) -> Self {
        self.base_alignment = base_alignment;
        self
    }

    /// Set the allocation mode
    pub fn with_mode(mut self, mode: AllocationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bytes requested from the memory provider: capacity plus room for the
    /// worst-case misalignment of the provider's pointer
    pub fn padded_size(&self) -> Option<usize> {
        self.capacity.checked_add(self.base_alignment.checked_sub(1)?)
    }

    /// Check the config can be turned into an allocator
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(StackError::ZeroCapacity);
        }
        if !self.base_alignment.is_power_of_two() {
            return Err(StackError::InvalidAlignment {
                alignment: self.base_alignment,
            });
        }
        match self.padded_size() {
            Some(padded) if padded <= isize::MAX as usize => Ok(()),
            _ => Err(StackError::CapacityOverflow {
                capacity: self.capacity,
                alignment: self.base_alignment,
            }),
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StackConfig::default();
        assert_eq!(config.capacity, 1024 * 1024);
        assert_eq!(config.base_alignment, core::mem::align_of::<usize>());
        assert_eq!(config.mode, AllocationMode::HeaderCarrying);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = StackConfig::with_capacity_kb(4)
            .with_base_alignment(16)
            .with_mode(AllocationMode::HeaderFree);
        assert_eq!(config.capacity, 4096);
        assert_eq!(config.base_alignment, 16);
        assert_eq!(config.padded_size(), Some(4096 + 15));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert_eq!(StackConfig::new(0).validate(), Err(StackError::ZeroCapacity));
        assert_eq!(
            StackConfig::new(64).with_base_alignment(12).validate(),
            Err(StackError::InvalidAlignment { alignment: 12 })
        );
        assert_eq!(
            StackConfig::new(64).with_base_alignment(0).validate(),
            Err(StackError::InvalidAlignment { alignment: 0 })
        );
        assert_eq!(
            StackConfig::new(usize::MAX).with_base_alignment(8).validate(),
            Err(StackError::CapacityOverflow { capacity: usize::MAX, alignment: 8 })
        );
        assert!(matches!(
            StackConfig::new(isize::MAX as usize).with_base_alignment(2).validate(),
            Err(StackError::CapacityOverflow { .. })
        ));
    }

    #[test]
    fn test_mode_from_flag() {
        assert_eq!(AllocationMode::from_header_mode(true), AllocationMode::HeaderCarrying);
        assert_eq!(AllocationMode::from_header_mode(false), AllocationMode::HeaderFree);
        assert!(AllocationMode::HeaderCarrying.carries_header());
        assert!(!AllocationMode::HeaderFree.carries_header());
    }
}
