//! BACnet Object Tables
//!
//! A small set of I/O objects of the kind a field controller on an MS/TP
//! segment exposes: analog and binary inputs and outputs. Each object kind
//! lives in an owned, fixed-capacity [`ObjectTable`] indexed by instance
//! number; all mutation goes through methods that enforce the
//! out-of-service and commandability rules.
//!
//! Commandable outputs resolve their present value from a
//! [`PriorityArray`] with the [`resolve`] reducer.
//!
//! # Example
//!
//! ```
//! use bacnet_mstp::object::{AnalogOutput, ObjectTable};
//!
//! let mut outputs: ObjectTable<AnalogOutput, 4> = ObjectTable::new(|instance| AnalogOutput::new(instance));
//! let valve = outputs.get_mut(2).unwrap();
//! valve.write_present_value(40.0, 8).unwrap();
//! valve.write_present_value(75.0, 3).unwrap();
//! assert_eq!(valve.present_value(), 75.0);
//!
//! valve.relinquish(3).unwrap();
//! assert_eq!(valve.present_value(), 40.0);
//! assert!(outputs.get(4).is_err());
//! ```

use core::fmt::Write;

use bitflags::bitflags;
use thiserror::Error;

pub mod analog;
pub mod binary;
pub mod priority;

pub use analog::{AnalogInput, AnalogOutput, EngineeringUnits};
pub use binary::{BinaryInput, BinaryOutput, BinaryPv, Polarity};
pub use priority::{resolve, PriorityArray, PRIORITY_ARRAY_SIZE};

/// Result type for object operations
pub type Result<T> = core::result::Result<T, ObjectError>;

/// Errors raised by object accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("object instance {0} not found")]
    InstanceNotFound(u32),

    #[error("priority {0} outside 1-16")]
    InvalidPriority(u8),

    #[error("write access denied")]
    WriteAccessDenied,

    #[error("value out of range")]
    ValueOutOfRange,
}

crate::generate_custom_enum! {
    /// BACnet object types used by this crate
    ObjectType {
        AnalogInput = 0,
        AnalogOutput = 1,
        AnalogValue = 2,
        BinaryInput = 3,
        BinaryOutput = 4,
        BinaryValue = 5,
        Device = 8,
    },
    u16,
    128..=1023
}

/// Object identifier (type + instance number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectIdentifier {
    /// Largest instance number a BACnet object identifier can carry
    pub const MAX_INSTANCE: u32 = 0x3F_FFFE;

    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.instance <= Self::MAX_INSTANCE
    }
}

impl From<u32> for ObjectIdentifier {
    /// See clause 20.2.14 of the BACnet standard
    fn from(value: u32) -> Self {
        let object_type = ObjectType::from(((value >> 22) & 0x3FF) as u16);
        Self::new(object_type, value & 0x3F_FFFF)
    }
}

impl From<ObjectIdentifier> for u32 {
    fn from(value: ObjectIdentifier) -> Self {
        let object_type = u32::from(u16::from(value.object_type)) & 0x3FF;
        (object_type << 22) | (value.instance & 0x3F_FFFF)
    }
}

bitflags! {
    /// Status_Flags property
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct StatusFlags: u8 {
        const IN_ALARM = 0x08;
        const FAULT = 0x04;
        const OVERRIDDEN = 0x02;
        const OUT_OF_SERVICE = 0x01;
    }
}

/// Reliability property values the I/O objects report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Reliability {
    #[default]
    NoFaultDetected = 0,
    NoSensor = 1,
    OverRange = 2,
    UnderRange = 3,
    UnreliableOther = 7,
}

/// Fixed-capacity object name
pub type ObjectName = heapless::String<32>;

/// Default name for an object, such as `AI-3`
pub fn default_name(prefix: &str, instance: u32) -> ObjectName {
    let mut name = ObjectName::new();
    // 32 bytes always hold a short prefix and a u32
    let _ = write!(name, "{}-{}", prefix, instance);
    name
}

/// Objects of one kind, with instance numbers `0..N`
#[derive(Debug, Clone)]
pub struct ObjectTable<T, const N: usize> {
    objects: [T; N],
}

impl<T, const N: usize> ObjectTable<T, N> {
    /// Build every object with `init(instance)`
    pub fn new(mut init: impl FnMut(u32) -> T) -> Self {
        Self {
            objects: core::array::from_fn(|index| init(index as u32)),
        }
    }

    pub fn valid_instance(&self, instance: u32) -> bool {
        (instance as usize) < N
    }

    pub fn count(&self) -> usize {
        N
    }

    pub fn get(&self, instance: u32) -> Result<&T> {
        self.objects
            .get(instance as usize)
            .ok_or(ObjectError::InstanceNotFound(instance))
    }

    pub fn get_mut(&mut self, instance: u32) -> Result<&mut T> {
        self.objects
            .get_mut(instance as usize)
            .ok_or(ObjectError::InstanceNotFound(instance))
    }

    /// Objects with their instance numbers
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(index, object)| (index as u32, object))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.objects
            .iter_mut()
            .enumerate()
            .map(|(index, object)| (index as u32, object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_identifier_round_trip() {
        let id = ObjectIdentifier::new(ObjectType::BinaryOutput, 7);
        let raw = u32::from(id);
        assert_eq!(raw, 0x0100_0007);
        assert_eq!(ObjectIdentifier::from(raw), id);
        assert!(id.is_valid());
        assert!(!ObjectIdentifier::new(ObjectType::Device, 0x3F_FFFF).is_valid());
    }

    #[test]
    fn test_proprietary_object_type() {
        let id = ObjectIdentifier::from((200u32 << 22) | 1);
        assert!(matches!(id.object_type, ObjectType::Custom(v) if v.value() == 200));
        assert!(matches!(ObjectType::from(60u16), ObjectType::Reserved(_)));
        assert_eq!(ObjectType::AnalogInput.to_string(), "AnalogInput");
    }

    #[test]
    fn test_table_lookup() {
        let mut table: ObjectTable<u32, 3> = ObjectTable::new(|instance| instance * 10);
        assert_eq!(table.count(), 3);
        assert!(table.valid_instance(2));
        assert!(!table.valid_instance(3));
        assert_eq!(table.get(2), Ok(&20));
        assert_eq!(table.get(3), Err(ObjectError::InstanceNotFound(3)));

        *table.get_mut(1).unwrap() = 99;
        let values: std::vec::Vec<_> = table.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, [0, 99, 20]);
    }

    #[test]
    fn test_default_name() {
        assert_eq!(default_name("BO", 12).as_str(), "BO-12");
    }

    #[test]
    fn test_status_flags_bits() {
        let flags = StatusFlags::FAULT | StatusFlags::OUT_OF_SERVICE;
        assert_eq!(flags.bits(), 0x05);
    }
}
