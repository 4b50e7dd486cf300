//! Utility
pub(crate) mod binary_heap;
