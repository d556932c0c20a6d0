//! Binary Input and Binary Output objects
//!
//! A binary output may carry minimum on and off times. A command that would
//! switch the output before its minimum time has run is held as a pending
//! transition and applied by [`BinaryOutput::tick`] once the time is up, so
//! the last command always wins eventually.

use core::ops::Not;

use log::debug;

use super::{default_name, ObjectError, ObjectName, PriorityArray, Result, StatusFlags};

/// Binary present value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryPv {
    #[default]
    Inactive,
    Active,
}

impl From<bool> for BinaryPv {
    fn from(value: bool) -> Self {
        if value {
            BinaryPv::Active
        } else {
            BinaryPv::Inactive
        }
    }
}

impl From<BinaryPv> for bool {
    fn from(value: BinaryPv) -> Self {
        value == BinaryPv::Active
    }
}

impl Not for BinaryPv {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            BinaryPv::Active => BinaryPv::Inactive,
            BinaryPv::Inactive => BinaryPv::Active,
        }
    }
}

/// Relationship between the physical level and the present value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Polarity {
    #[default]
    Normal,
    Reverse,
}

impl Polarity {
    fn apply(self, value: BinaryPv) -> BinaryPv {
        match self {
            Polarity::Normal => value,
            Polarity::Reverse => !value,
        }
    }
}

/// Binary Input object
#[derive(Debug, Clone)]
pub struct BinaryInput {
    pub name: ObjectName,
    pub polarity: Polarity,
    present_value: BinaryPv,
    out_of_service: bool,
    changed: bool,
}

impl BinaryInput {
    pub fn new(instance: u32) -> Self {
        Self {
            name: default_name("BI", instance),
            polarity: Polarity::Normal,
            present_value: BinaryPv::Inactive,
            out_of_service: false,
            changed: false,
        }
    }

    pub fn present_value(&self) -> BinaryPv {
        self.present_value
    }

    /// Network write; only accepted while out of service
    pub fn write_present_value(&mut self, value: BinaryPv) -> Result<()> {
        if !self.out_of_service {
            return Err(ObjectError::WriteAccessDenied);
        }
        self.store(value);
        Ok(())
    }

    /// Physical input level; ignored while out of service
    pub fn update_from_input(&mut self, level: bool) {
        if !self.out_of_service {
            self.store(self.polarity.apply(level.into()));
        }
    }

    pub fn out_of_service(&self) -> bool {
        self.out_of_service
    }

    pub fn set_out_of_service(&mut self, out_of_service: bool) {
        self.out_of_service = out_of_service;
    }

    pub fn change_of_value(&self) -> bool {
        self.changed
    }

    pub fn clear_change_of_value(&mut self) {
        self.changed = false;
    }

    pub fn status_flags(&self) -> StatusFlags {
        let mut flags = StatusFlags::empty();
        flags.set(StatusFlags::OUT_OF_SERVICE, self.out_of_service);
        flags
    }

    fn store(&mut self, value: BinaryPv) {
        if value != self.present_value {
            self.present_value = value;
            self.changed = true;
        }
    }
}

/// Binary Output object with minimum on and off times
#[derive(Debug, Clone)]
pub struct BinaryOutput {
    pub name: ObjectName,
    pub polarity: Polarity,
    /// Milliseconds the output stays active before it may switch off
    pub minimum_on_time: u32,
    /// Milliseconds the output stays inactive before it may switch on
    pub minimum_off_time: u32,
    relinquish_default: BinaryPv,
    priority_array: PriorityArray<BinaryPv>,
    present_value: BinaryPv,
    state_changed_at: u32,
    pending: Option<BinaryPv>,
    out_of_service: bool,
    changed: bool,
}

impl BinaryOutput {
    pub fn new(instance: u32) -> Self {
        Self {
            name: default_name("BO", instance),
            polarity: Polarity::Normal,
            minimum_on_time: 0,
            minimum_off_time: 0,
            relinquish_default: BinaryPv::Inactive,
            priority_array: PriorityArray::new(),
            present_value: BinaryPv::Inactive,
            state_changed_at: 0,
            pending: None,
            out_of_service: false,
            changed: false,
        }
    }

    pub fn present_value(&self) -> BinaryPv {
        self.present_value
    }

    /// Level to drive onto the output pin
    pub fn output_level(&self) -> bool {
        self.polarity.apply(self.present_value).into()
    }

    /// Command `value` at `priority` (1-16) at tick `now`
    pub fn write_present_value(&mut self, value: BinaryPv, priority: u8, now: u32) -> Result<()> {
        self.priority_array.write(priority, value)?;
        self.evaluate(now);
        Ok(())
    }

    pub fn relinquish(&mut self, priority: u8, now: u32) -> Result<()> {
        self.priority_array.relinquish(priority)?;
        self.evaluate(now);
        Ok(())
    }

    pub fn set_relinquish_default(&mut self, value: BinaryPv, now: u32) {
        self.relinquish_default = value;
        self.evaluate(now);
    }

    /// Apply a held transition whose minimum time has run out
    pub fn tick(&mut self, now: u32) {
        if self.pending.is_some() {
            self.evaluate(now);
        }
    }

    /// Transition waiting for a minimum on or off time
    pub fn pending_transition(&self) -> Option<BinaryPv> {
        self.pending
    }

    pub fn active_priority(&self) -> Option<u8> {
        self.priority_array.active_priority()
    }

    pub fn out_of_service(&self) -> bool {
        self.out_of_service
    }

    pub fn set_out_of_service(&mut self, out_of_service: bool) {
        self.out_of_service = out_of_service;
    }

    pub fn change_of_value(&self) -> bool {
        self.changed
    }

    pub fn clear_change_of_value(&mut self) {
        self.changed = false;
    }

    pub fn status_flags(&self) -> StatusFlags {
        let mut flags = StatusFlags::empty();
        flags.set(StatusFlags::OUT_OF_SERVICE, self.out_of_service);
        flags
    }

    fn evaluate(&mut self, now: u32) {
        let target = self.priority_array.resolve(self.relinquish_default);
        if target == self.present_value {
            self.pending = None;
            return;
        }

        let minimum = match self.present_value {
            BinaryPv::Active => self.minimum_on_time,
            BinaryPv::Inactive => self.minimum_off_time,
        };
        let time_in_state = now.wrapping_sub(self.state_changed_at);
        if time_in_state < minimum {
            if self.pending != Some(target) {
                debug!("{}: {:?} held for {} ms", self.name, target, minimum - time_in_state);
            }
            self.pending = Some(target);
            return;
        }

        self.present_value = target;
        self.state_changed_at = now;
        self.pending = None;
        self.changed = true;
    }
}
