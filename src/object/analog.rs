//! Analog Input and Analog Output objects

use log::debug;

use super::{default_name, ObjectError, ObjectName, PriorityArray, Reliability, Result, StatusFlags};

/// Engineering units (subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum EngineeringUnits {
    Amperes = 2,
    Volts = 5,
    DegreesCelsius = 62,
    DegreesFahrenheit = 64,
    #[default]
    NoUnits = 95,
    Percent = 98,
    Milliamperes = 119,
}

/// Analog Input object
///
/// The sensor updates the present value until the object is taken out of
/// service; from then on only network writes change it.
#[derive(Debug, Clone)]
pub struct AnalogInput {
    pub name: ObjectName,
    pub units: EngineeringUnits,
    pub reliability: Reliability,
    pub min_pres_value: f32,
    pub max_pres_value: f32,
    pub cov_increment: f32,
    present_value: f32,
    out_of_service: bool,
    changed: bool,
}

impl AnalogInput {
    pub fn new(instance: u32) -> Self {
        Self {
            name: default_name("AI", instance),
            units: EngineeringUnits::NoUnits,
            reliability: Reliability::NoFaultDetected,
            min_pres_value: f32::MIN,
            max_pres_value: f32::MAX,
            cov_increment: 1.0,
            present_value: 0.0,
            out_of_service: false,
            changed: false,
        }
    }

    pub fn present_value(&self) -> f32 {
        self.present_value
    }

    /// Network write; only accepted while out of service
    pub fn write_present_value(&mut self, value: f32) -> Result<()> {
        if !self.out_of_service {
            return Err(ObjectError::WriteAccessDenied);
        }
        self.store(value)
    }

    /// New reading from the sensor; ignored while out of service
    pub fn update_from_sensor(&mut self, value: f32) {
        if self.out_of_service {
            return;
        }
        if value < self.min_pres_value {
            self.reliability = Reliability::UnderRange;
        } else if value > self.max_pres_value {
            self.reliability = Reliability::OverRange;
        } else {
            self.reliability = Reliability::NoFaultDetected;
            // In range, so this cannot fail
            let _ = self.store(value);
        }
    }

    pub fn out_of_service(&self) -> bool {
        self.out_of_service
    }

    pub fn set_out_of_service(&mut self, out_of_service: bool) {
        self.out_of_service = out_of_service;
    }

    /// True once the value has moved by at least the COV increment
    pub fn change_of_value(&self) -> bool {
        self.changed
    }

    pub fn clear_change_of_value(&mut self) {
        self.changed = false;
    }

    pub fn status_flags(&self) -> StatusFlags {
        let mut flags = StatusFlags::empty();
        flags.set(StatusFlags::FAULT, self.reliability != Reliability::NoFaultDetected);
        flags.set(StatusFlags::OUT_OF_SERVICE, self.out_of_service);
        flags
    }

    fn store(&mut self, value: f32) -> Result<()> {
        if !(self.min_pres_value..=self.max_pres_value).contains(&value) {
            return Err(ObjectError::ValueOutOfRange);
        }
        let delta = if value > self.present_value {
            value - self.present_value
        } else {
            self.present_value - value
        };
        if delta >= self.cov_increment {
            self.changed = true;
        }
        self.present_value = value;
        Ok(())
    }
}

/// Analog Output object, commanded through its priority array
#[derive(Debug, Clone)]
pub struct AnalogOutput {
    pub name: ObjectName,
    pub units: EngineeringUnits,
    pub min_pres_value: f32,
    pub max_pres_value: f32,
    relinquish_default: f32,
    priority_array: PriorityArray<f32>,
    present_value: f32,
    out_of_service: bool,
}

impl AnalogOutput {
    pub fn new(instance: u32) -> Self {
        Self {
            name: default_name("AO", instance),
            units: EngineeringUnits::Percent,
            min_pres_value: 0.0,
            max_pres_value: 100.0,
            relinquish_default: 0.0,
            priority_array: PriorityArray::new(),
            present_value: 0.0,
            out_of_service: false,
        }
    }

    pub fn present_value(&self) -> f32 {
        self.present_value
    }

    /// Command `value` at `priority` (1-16)
    pub fn write_present_value(&mut self, value: f32, priority: u8) -> Result<()> {
        if !(self.min_pres_value..=self.max_pres_value).contains(&value) {
            return Err(ObjectError::ValueOutOfRange);
        }
        self.priority_array.write(priority, value)?;
        self.recalculate();
        Ok(())
    }

    pub fn relinquish(&mut self, priority: u8) -> Result<()> {
        self.priority_array.relinquish(priority)?;
        self.recalculate();
        Ok(())
    }

    pub fn relinquish_default(&self) -> f32 {
        self.relinquish_default
    }

    pub fn set_relinquish_default(&mut self, value: f32) {
        self.relinquish_default = value;
        self.recalculate();
    }

    pub fn priority_array(&self) -> &PriorityArray<f32> {
        &self.priority_array
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

    pub fn status_flags(&self) -> StatusFlags {
        let mut flags = StatusFlags::empty();
        flags.set(StatusFlags::OUT_OF_SERVICE, self.out_of_service);
        flags
    }

    fn recalculate(&mut self) {
        let value = self.priority_array.resolve(self.relinquish_default);
        if value != self.present_value {
            debug!("{}: present value {} -> {}", self.name, self.present_value, value);
            self.present_value = value;
        }
    }
}
