use std::collections::TryReserveError;

use bytemuck::Zeroable;

/// A zero-filled buffer of `len` elements, or an error instead of aborting when the allocation
/// cannot be satisfied.
pub(crate) fn zeroed<T: Zeroable + Copy>(len: usize) -> Result<Vec<T>, TryReserveError> {
    #[cfg(test)]
    crate::testing::check_allocation(len.saturating_mul(size_of::<T>()))?;

    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len)?;
    buffer.resize(len, T::zeroed());
    Ok(buffer)
}

#[test]
fn zero_filled() {
    let buffer: Vec<u32> = zeroed(100).unwrap();
    assert_eq!(buffer.len(), 100);
    assert!(buffer.iter().all(|v| *v == 0));
}

#[test]
fn impossible_size_fails() {
    assert!(zeroed::<u64>(usize::MAX).is_err());
}
