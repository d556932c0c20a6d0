//! Command priority arrays

use super::{ObjectError, Result};

/// Number of command priorities
pub const PRIORITY_ARRAY_SIZE: usize = 16;

/// First present slot, highest priority first, or `default` if none is set
///
/// ```
/// use bacnet_mstp::object::resolve;
///
/// assert_eq!(resolve(&[None, Some(3), Some(9)], 0), 3);
/// assert_eq!(resolve::<u8>(&[None, None], 7), 7);
/// ```
pub fn resolve<T: Copy>(slots: &[Option<T>], default: T) -> T {
    slots.iter().flatten().next().copied().unwrap_or(default)
}

/// Sixteen optional command values, priority 1 first
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityArray<T> {
    slots: [Option<T>; PRIORITY_ARRAY_SIZE],
}

impl<T: Copy> Default for PriorityArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> PriorityArray<T> {
    pub const fn new() -> Self {
        Self {
            slots: [None; PRIORITY_ARRAY_SIZE],
        }
    }

    /// Command `value` at `priority` (1-16)
    pub fn write(&mut self, priority: u8, value: T) -> Result<()> {
        *self.slot_mut(priority)? = Some(value);
        Ok(())
    }

    /// Clear the command at `priority` (1-16)
    pub fn relinquish(&mut self, priority: u8) -> Result<()> {
        *self.slot_mut(priority)? = None;
        Ok(())
    }

    pub fn get(&self, priority: u8) -> Result<Option<T>> {
        let index = index_of(priority)?;
        Ok(self.slots[index])
    }

    /// Priority of the winning command, if any
    pub fn active_priority(&self) -> Option<u8> {
        self.slots
            .iter()
            .position(Option::is_some)
            .map(|index| index as u8 + 1)
    }

    pub fn resolve(&self, default: T) -> T {
        resolve(&self.slots, default)
    }

    pub fn slots(&self) -> &[Option<T>; PRIORITY_ARRAY_SIZE] {
        &self.slots
    }

    fn slot_mut(&mut self, priority: u8) -> Result<&mut Option<T>> {
        let index = index_of(priority)?;
        Ok(&mut self.slots[index])
    }
}

fn index_of(priority: u8) -> Result<usize> {
    if (1..=PRIORITY_ARRAY_SIZE as u8).contains(&priority) {
        Ok(usize::from(priority) - 1)
    } else {
        Err(ObjectError::InvalidPriority(priority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_empty() {
        let empty: [Option<f32>; 0] = [];
        assert_eq!(resolve(&empty, 1.5), 1.5);
        assert_eq!(PriorityArray::<u8>::new().resolve(4), 4);
    }

    #[test]
    fn test_highest_priority_wins() {
        let mut array = PriorityArray::new();
        array.write(16, 1u8).unwrap();
        array.write(8, 2).unwrap();
        assert_eq!(array.resolve(0), 2);
        assert_eq!(array.active_priority(), Some(8));

        array.write(1, 3).unwrap();
        assert_eq!(array.resolve(0), 3);
        assert_eq!(array.active_priority(), Some(1));

        array.relinquish(1).unwrap();
        array.relinquish(8).unwrap();
        assert_eq!(array.resolve(0), 1);
        assert_eq!(array.get(16), Ok(Some(1)));
        assert_eq!(array.get(8), Ok(None));
    }

    #[test]
    fn test_priority_bounds() {
        let mut array = PriorityArray::new();
        assert_eq!(array.write(0, 1u8), Err(ObjectError::InvalidPriority(0)));
        assert_eq!(array.write(17, 1), Err(ObjectError::InvalidPriority(17)));
        assert_eq!(array.relinquish(17), Err(ObjectError::InvalidPriority(17)));
        assert_eq!(array.active_priority(), None);
    }
}
