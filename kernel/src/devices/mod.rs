//! Device model: device and driver registries with name-based binding.
//!
//! Discovery is a black box to this module: the arch layer hands over
//! `(name, mmio_base, irq)` tuples and the model registers them. Binding
//! is exact-string matching between a device name and a driver's match
//! table; the canonical per-class names live in [`names`] so discovery
//! and drivers cannot drift apart byte-wise.

use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// Canonical device-class names. One constant per supported class; both
/// the discovery tables and the driver match tables use these.
pub mod names {
    pub const ARM_GENERIC_TIMER: &str = "arm,generic-timer";
    pub const ARM_PL011: &str = "arm,pl011";
    pub const ARM_GIC_V2: &str = "arm,gic-v2";
    pub const NS16550: &str = "ns16550";
    pub const I8253_PIT: &str = "i8253,pit";
    pub const INTEL_8259: &str = "intel,8259";
    pub const RAMDISK0: &str = "ramdisk0";
}

/// Device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Timer,
    Uart,
    InterruptController,
    Block,
    Other,
}

/// Lifecycle state. Only `Active` devices accept I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Registered,
    Probed,
    Initialized,
    Active,
    Failed,
}

/// A registered device.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: &'static str,
    pub kind: DeviceKind,
    pub mmio_base: Option<u64>,
    pub irq: Option<u32>,
    pub bound_driver: Option<&'static str>,
    pub state: DeviceState,
}

impl Device {
    pub fn new(name: &'static str, kind: DeviceKind) -> Self {
        Self {
            name,
            kind,
            mmio_base: None,
            irq: None,
            bound_driver: None,
            state: DeviceState::Registered,
        }
    }

    pub fn with_mmio(mut self, base: u64) -> Self {
        self.mmio_base = Some(base);
        self
    }

    pub fn with_irq(mut self, irq: u32) -> Self {
        self.irq = Some(irq);
        self
    }
}

/// Driver operation table: a fixed record of optional entry points. Any
/// absent slot simply does not participate in the lifecycle or I/O.
#[derive(Clone, Copy, Default)]
pub struct DriverOps {
    pub probe: Option<fn(&mut Device) -> KernelResult<()>>,
    pub init: Option<fn(&mut Device) -> KernelResult<()>>,
    pub start: Option<fn(&mut Device) -> KernelResult<()>>,
    pub stop: Option<fn(&mut Device) -> KernelResult<()>>,
    pub cleanup: Option<fn(&mut Device) -> KernelResult<()>>,
    pub read: Option<fn(&mut Device, &mut [u8]) -> KernelResult<usize>>,
    pub write: Option<fn(&mut Device, &[u8]) -> KernelResult<usize>>,
    pub ioctl: Option<fn(&mut Device, usize, usize) -> KernelResult<usize>>,
}

/// A registered driver.
pub struct Driver {
    pub name: &'static str,
    pub kind: DeviceKind,
    /// Device names this driver binds to, compared byte-for-byte.
    pub match_ids: &'static [&'static str],
    pub ops: DriverOps,
}

/// Device and driver lists plus the binding logic. A single instance
/// backs the kernel; tests build their own.
pub struct DeviceRegistry {
    devices: Vec<Device>,
    drivers: Vec<&'static Driver>,
}

impl DeviceRegistry {
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
            drivers: Vec::new(),
        }
    }

    /// Register a driver. Names are unique.
    pub fn register_driver(&mut self, driver: &'static Driver) -> KernelResult<()> {
        if self.drivers.iter().any(|d| d.name == driver.name) {
            return Err(KernelError::AlreadyExists);
        }
        self.drivers.push(driver);
        log::debug!("driver {} registered", driver.name);
        Ok(())
    }

    /// Register a device and attempt to bind it: the first driver whose
    /// match table contains the device name wins. With no match the
    /// device stays `Registered`.
    pub fn register_device(&mut self, device: Device) -> KernelResult<()> {
        if self.devices.iter().any(|d| d.name == device.name) {
            return Err(KernelError::AlreadyExists);
        }
        self.devices.push(device);
        let index = self.devices.len() - 1;

        let driver = self
            .drivers
            .iter()
            .find(|drv| drv.match_ids.iter().any(|id| *id == self.devices[index].name))
            .copied();

        match driver {
            Some(driver) => self.bind(index, driver),
            None => {
                log::debug!(
                    "device {} registered, no matching driver",
                    self.devices[index].name
                );
                Ok(())
            }
        }
    }

    /// Walk the device through probe -> init -> start. Only one driver
    /// may ever bind a device.
    fn bind(&mut self, index: usize, driver: &'static Driver) -> KernelResult<()> {
        let device = &mut self.devices[index];
        if device.bound_driver.is_some() {
            return Err(KernelError::AlreadyExists);
        }
        device.bound_driver = Some(driver.name);

        let stages: [(Option<fn(&mut Device) -> KernelResult<()>>, DeviceState); 3] = [
            (driver.ops.probe, DeviceState::Probed),
            (driver.ops.init, DeviceState::Initialized),
            (driver.ops.start, DeviceState::Active),
        ];
        for (op, next_state) in stages {
            if let Some(op) = op {
                if let Err(err) = op(device) {
                    log::error!(
                        "device {} failed in {:?} stage: {}",
                        device.name,
                        next_state,
                        err
                    );
                    device.state = DeviceState::Failed;
                    return Err(err);
                }
            }
            device.state = next_state;
        }
        log::info!("device {} bound to {}", device.name, driver.name);
        Ok(())
    }

    fn device_index(&self, name: &str) -> KernelResult<usize> {
        self.devices
            .iter()
            .position(|d| d.name == name)
            .ok_or(KernelError::NoSuchDevice)
    }

    pub fn device_state(&self, name: &str) -> KernelResult<DeviceState> {
        Ok(self.devices[self.device_index(name)?].state)
    }

    pub fn device_info(&self, name: &str) -> KernelResult<Device> {
        Ok(self.devices[self.device_index(name)?].clone())
    }

    fn active_ops(&mut self, name: &str) -> KernelResult<(&'static Driver, &mut Device)> {
        let index = self.device_index(name)?;
        let device = &mut self.devices[index];
        if device.state != DeviceState::Active {
            return Err(KernelError::NotReady);
        }
        let driver_name = device.bound_driver.ok_or(KernelError::NotReady)?;
        let driver = self
            .drivers
            .iter()
            .find(|d| d.name == driver_name)
            .copied()
            .ok_or(KernelError::NotReady)?;
        Ok((driver, device))
    }

    /// Pass a read through to the bound driver.
    pub fn read(&mut self, name: &str, buf: &mut [u8]) -> KernelResult<usize> {
        let (driver, device) = self.active_ops(name)?;
        match driver.ops.read {
            Some(op) => op(device, buf),
            None => Err(KernelError::invalid("device has no read operation")),
        }
    }

    /// Pass a write through to the bound driver.
    pub fn write(&mut self, name: &str, buf: &[u8]) -> KernelResult<usize> {
        let (driver, device) = self.active_ops(name)?;
        match driver.ops.write {
            Some(op) => op(device, buf),
            None => Err(KernelError::invalid("device has no write operation")),
        }
    }

    /// Pass an ioctl through to the bound driver.
    pub fn ioctl(&mut self, name: &str, cmd: usize, arg: usize) -> KernelResult<usize> {
        let (driver, device) = self.active_ops(name)?;
        match driver.ops.ioctl {
            Some(op) => op(device, cmd, arg),
            None => Err(KernelError::invalid("device has no ioctl operation")),
        }
    }

    /// Stop an active device (start's inverse).
    pub fn stop(&mut self, name: &str) -> KernelResult<()> {
        let (driver, device) = self.active_ops(name)?;
        if let Some(op) = driver.ops.stop {
            op(device)?;
        }
        device.state = DeviceState::Initialized;
        Ok(())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Mutex<DeviceRegistry> = Mutex::new(DeviceRegistry::new());

fn with_registry<R>(f: impl FnOnce(&mut DeviceRegistry) -> R) -> R {
    crate::arch::without_interrupts(|| f(&mut REGISTRY.lock()))
}

pub fn register_driver(driver: &'static Driver) -> KernelResult<()> {
    with_registry(|r| r.register_driver(driver))
}

pub fn register_device(device: Device) -> KernelResult<()> {
    with_registry(|r| r.register_device(device))
}

pub fn device_state(name: &str) -> KernelResult<DeviceState> {
    with_registry(|r| r.device_state(name))
}

pub fn device_info(name: &str) -> KernelResult<Device> {
    with_registry(|r| r.device_info(name))
}

pub fn read(name: &str, buf: &mut [u8]) -> KernelResult<usize> {
    with_registry(|r| r.read(name, buf))
}

pub fn write(name: &str, buf: &[u8]) -> KernelResult<usize> {
    with_registry(|r| r.write(name, buf))
}

pub fn ioctl(name: &str, cmd: usize, arg: usize) -> KernelResult<usize> {
    with_registry(|r| r.ioctl(name, cmd, arg))
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static PROBES: AtomicUsize = AtomicUsize::new(0);

    fn probe_ok(_dev: &mut Device) -> KernelResult<()> {
        PROBES.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn init_ok(_dev: &mut Device) -> KernelResult<()> {
        Ok(())
    }

    fn init_fail(_dev: &mut Device) -> KernelResult<()> {
        Err(KernelError::NotReady)
    }

    fn echo_write(_dev: &mut Device, buf: &[u8]) -> KernelResult<usize> {
        Ok(buf.len())
    }

    static TIMER_DRIVER: Driver = Driver {
        name: "test-generic-timer",
        kind: DeviceKind::Timer,
        match_ids: &[names::ARM_GENERIC_TIMER],
        ops: DriverOps {
            probe: Some(probe_ok),
            init: Some(init_ok),
            start: Some(init_ok),
            stop: None,
            cleanup: None,
            read: None,
            write: Some(echo_write),
            ioctl: None,
        },
    };

    static FLAKY_DRIVER: Driver = Driver {
        name: "test-flaky",
        kind: DeviceKind::Other,
        match_ids: &["flaky-device"],
        ops: DriverOps {
            probe: Some(probe_ok),
            init: Some(init_fail),
            start: None,
            stop: None,
            cleanup: None,
            read: None,
            write: None,
            ioctl: None,
        },
    };

    #[test]
    fn exact_name_match_walks_state_machine() {
        let mut reg = DeviceRegistry::new();
        reg.register_driver(&TIMER_DRIVER).expect("driver");
        reg.register_device(Device::new(names::ARM_GENERIC_TIMER, DeviceKind::Timer))
            .expect("device binds");
        assert_eq!(
            reg.device_state(names::ARM_GENERIC_TIMER).expect("exists"),
            DeviceState::Active
        );
        let info = reg.device_info(names::ARM_GENERIC_TIMER).expect("exists");
        assert_eq!(info.bound_driver, Some("test-generic-timer"));
    }

    #[test]
    fn near_miss_name_stays_registered() {
        let mut reg = DeviceRegistry::new();
        reg.register_driver(&TIMER_DRIVER).expect("driver");
        // "generic-timer" != "arm,generic-timer": no binding.
        reg.register_device(Device::new("generic-timer", DeviceKind::Timer))
            .expect("registration itself succeeds");
        assert_eq!(
            reg.device_state("generic-timer").expect("exists"),
            DeviceState::Registered
        );
    }

    #[test]
    fn lifecycle_failure_marks_failed() {
        let mut reg = DeviceRegistry::new();
        reg.register_driver(&FLAKY_DRIVER).expect("driver");
        assert!(reg
            .register_device(Device::new("flaky-device", DeviceKind::Other))
            .is_err());
        assert_eq!(
            reg.device_state("flaky-device").expect("exists"),
            DeviceState::Failed
        );
    }

    #[test]
    fn io_requires_active_state() {
        let mut reg = DeviceRegistry::new();
        reg.register_driver(&FLAKY_DRIVER).expect("driver");
        let _ = reg.register_device(Device::new("flaky-device", DeviceKind::Other));
        assert_eq!(
            reg.write("flaky-device", b"x"),
            Err(KernelError::NotReady)
        );

        reg.register_driver(&TIMER_DRIVER).expect("driver");
        reg.register_device(Device::new(names::ARM_GENERIC_TIMER, DeviceKind::Timer))
            .expect("binds");
        assert_eq!(reg.write(names::ARM_GENERIC_TIMER, b"xy"), Ok(2));
        // Missing op on an active device is an argument error, not NotReady.
        let mut buf = [0u8; 4];
        assert!(matches!(
            reg.read(names::ARM_GENERIC_TIMER, &mut buf),
            Err(KernelError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut reg = DeviceRegistry::new();
        reg.register_driver(&TIMER_DRIVER).expect("driver");
        assert_eq!(
            reg.register_driver(&TIMER_DRIVER),
            Err(KernelError::AlreadyExists)
        );
        reg.register_device(Device::new("dev0", DeviceKind::Other))
            .expect("device");
        assert_eq!(
            reg.register_device(Device::new("dev0", DeviceKind::Other)),
            Err(KernelError::AlreadyExists)
        );
    }

    #[test]
    fn unknown_device_io_is_no_such_device() {
        let mut reg = DeviceRegistry::new();
        let mut buf = [0u8; 1];
        assert_eq!(reg.read("nope", &mut buf), Err(KernelError::NoSuchDevice));
    }
}
