use i2cdev::core::I2CDevice;
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("I2C Error: {0}")]
    I2c(#[from] LinuxI2CError),
    #[error("Short read from register 0x{register:02X}: expected {expected} bytes, got {got}")]
    ShortRead { register: u8, expected: usize, got: usize },
}

/// Two-wire peripheral exposing consecutive byte registers.
pub trait RegisterBus {
    fn read_block(&mut self, register: u8, len: u8) -> Result<Vec<u8>, HardwareError>;
    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<(), HardwareError>;
    fn name(&self) -> &str;
}

/// A single peripheral on a Linux `/dev/i2c-N` adapter.
pub struct LinuxI2cBus {
    device: LinuxI2CDevice,
    label: String,
}

impl LinuxI2cBus {
    pub fn open(path: &str, address: u16) -> Result<Self, HardwareError> {
        let device = LinuxI2CDevice::new(path, address)?;
        let label = format!("{}@0x{:02X}", path, address);
        info!("Opened I2C peripheral {}", label);
        Ok(Self { device, label })
    }
}

impl RegisterBus for LinuxI2cBus {
    fn read_block(&mut self, register: u8, len: u8) -> Result<Vec<u8>, HardwareError> {
        let data = self.device.smbus_read_i2c_block_data(register, len)?;
        if data.len() < len as usize {
            return Err(HardwareError::ShortRead {
                register,
                expected: len as usize,
                got: data.len(),
            });
        }
        Ok(data)
    }

    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<(), HardwareError> {
        self.device.smbus_write_i2c_block_data(register, data)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.label
    }
}
