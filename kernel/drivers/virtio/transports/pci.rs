// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the modern [PCI transport mechanism](https://docs.oasis-open.org/virtio/virtio/v1.1/virtio-v1.1.html#x1-720005),
//! which locates its configuration structures using the PCI capability list,
//! rather than the fixed I/O port layout used by the
//! [legacy transport](super::legacy_pci).
//!
//! # Examples
//!
//! ```
//! fn install_pci_device(device: pci::Device) {
//!     let _driver = Transport::new(device).unwrap();
//! }
//! ```

use crate::{DeviceStatus, InterruptStatus};
use interrupts::Irq;
use memory::{PhysAddr, PhysFrame, PhysFrameSize};

/// Identifies the purpose of a virtio PCI capability, as
/// described in section 4.1.4.
///
const COMMON_CFG: u8 = 1;
const NOTIFY_CFG: u8 = 2;
const ISR_CFG: u8 = 3;
const DEVICE_CFG: u8 = 4;

/// Offsets into the common configuration structure, as
/// described in section 4.1.4.3.
///
#[repr(usize)]
#[derive(Clone, Copy, Debug)]
enum CommonOffsets {
    DeviceFeatureSelect = 0x00, // u32
    DeviceFeature = 0x04,       // u32
    DriverFeatureSelect = 0x08, // u32
    DriverFeature = 0x0c,       // u32
    NumQueues = 0x12,           // u16
    DeviceStatus = 0x14,        // u8
    QueueSelect = 0x16,         // u16
    QueueSize = 0x18,           // u16
    QueueEnable = 0x1c,         // u16
    QueueDesc = 0x20,           // u64
    QueueDriver = 0x28,         // u64
    QueueDevice = 0x30,         // u64
}

impl CommonOffsets {
    fn as_usize(&self) -> usize {
        *self as usize
    }
}

/// Describes a VirtIO PCI transport that is for
/// some reason unacceptable.
///
#[derive(Debug)]
pub enum ConfigError {
    /// The device did not expose a required
    /// virtio PCI capability.
    MissingCapability(u8),

    /// A capability referenced a BAR that is
    /// not memory-mapped.
    BadBar,
}

/// Region describes the location of one of the structures
/// referenced by a virtio PCI capability (section 4.1.4).
///
struct Region {
    mmio: mmio::Region,
    offset: usize,
}

impl Region {
    fn read<T: 'static + Copy>(&self, offset: usize) -> T {
        self.mmio.read(self.offset + offset).expect("bad virtio-pci register offset")
    }

    fn write<T: 'static + Copy>(&self, offset: usize, val: T) {
        self.mmio
            .write(self.offset + offset, val)
            .expect("bad virtio-pci register offset");
    }
}

/// Locates the capability of the given type in the device's
/// capability list, mapping the BAR it points into.
///
fn map_capability(device: &pci::Device, cfg_type: u8) -> Result<Region, ConfigError> {
    for cap in device.capabilities.iter() {
        // Vendor-specific capabilities are where virtio hides
        // its configuration structures (section 4.1.4).
        if cap.id != 0x09 || cap.data.len() < 13 {
            continue;
        }

        if cap.data[0] != cfg_type {
            continue;
        }

        let bar = cap.data[1] as usize;
        let offset = u32::from_le_bytes([cap.data[5], cap.data[6], cap.data[7], cap.data[8]]);
        let length = u32::from_le_bytes([cap.data[9], cap.data[10], cap.data[11], cap.data[12]]);

        let bar_addr = match device.bar(bar) {
            pci::Bar::MemoryMapped { addr } => addr,
            pci::Bar::IOMapped { .. } => return Err(ConfigError::BadBar),
        };

        let start = bar_addr + offset as usize;
        let end = start + length.max(1) as usize;
        let start_frame = PhysFrame::containing_address(start, PhysFrameSize::Size4KiB);
        let end_frame = PhysFrame::containing_address(
            PhysAddr::new(end.as_usize() - 1),
            PhysFrameSize::Size4KiB,
        );
        let frame_range = PhysFrame::range_inclusive(start_frame, end_frame);
        let mapped = mmio::Region::map(frame_range);
        let region_offset = start.as_usize() - start_frame.start_address().as_usize();

        return Ok(Region {
            mmio: mapped,
            offset: region_offset,
        });
    }

    Err(ConfigError::MissingCapability(cfg_type))
}

/// Implements VirtIO configuration for the modern PCI transport.
///
pub struct Transport {
    device: pci::Device,
    common: Region,
    notify: Region,
    isr: Region,
    device_cfg: Option<Region>,
}

impl Transport {
    /// Instantiate a PCI transport using the given device.
    ///
    /// `new` iterates through the given PCI capabilities, parsing
    /// the virtio-related structures and returning them.
    ///
    pub fn new(device: pci::Device) -> Result<Self, ConfigError> {
        let common = map_capability(&device, COMMON_CFG)?;
        let notify = map_capability(&device, NOTIFY_CFG)?;
        let isr = map_capability(&device, ISR_CFG)?;
        let device_cfg = map_capability(&device, DEVICE_CFG).ok();

        device.enable_bus_master();

        Ok(Transport {
            device,
            common,
            notify,
            isr,
            device_cfg,
        })
    }
}

impl crate::Transport for Transport {
    fn read_device_config_u8(&self, offset: u16) -> u8 {
        match &self.device_cfg {
            Some(region) => region.read(offset as usize),
            None => 0,
        }
    }

    fn read_irq(&self) -> Irq {
        Irq::new(self.device.interrupt_line).expect("bad IRQ")
    }

    fn read_interrupt_status(&self) -> InterruptStatus {
        let status: u8 = self.isr.read(0);
        InterruptStatus::from_bits_truncate(status)
    }

    fn read_status(&self) -> DeviceStatus {
        let status: u8 = self.common.read(CommonOffsets::DeviceStatus.as_usize());
        DeviceStatus::from_bits_truncate(status)
    }

    fn write_status(&self, device_status: DeviceStatus) {
        self.common
            .write(CommonOffsets::DeviceStatus.as_usize(), device_status.bits());
    }

    fn add_status(&self, device_status: DeviceStatus) {
        let status = self.read_status();
        self.write_status(status | device_status);
    }

    fn has_status(&self, device_status: DeviceStatus) -> bool {
        self.read_status().contains(device_status)
    }

    fn read_device_features(&self) -> u64 {
        self.common.write(CommonOffsets::DeviceFeatureSelect.as_usize(), 0u32);
        let low: u32 = self.common.read(CommonOffsets::DeviceFeature.as_usize());
        self.common.write(CommonOffsets::DeviceFeatureSelect.as_usize(), 1u32);
        let high: u32 = self.common.read(CommonOffsets::DeviceFeature.as_usize());

        (low as u64) | ((high as u64) << 32)
    }

    fn write_driver_features(&self, features: u64) {
        self.common.write(CommonOffsets::DriverFeatureSelect.as_usize(), 0u32);
        self.common
            .write(CommonOffsets::DriverFeature.as_usize(), features as u32);
        self.common.write(CommonOffsets::DriverFeatureSelect.as_usize(), 1u32);
        self.common
            .write(CommonOffsets::DriverFeature.as_usize(), (features >> 32) as u32);
    }

    fn read_num_queues(&self) -> u16 {
        self.common.read(CommonOffsets::NumQueues.as_usize())
    }

    fn select_queue(&self, index: u16) {
        self.common.write(CommonOffsets::QueueSelect.as_usize(), index);
    }

    fn queue_size(&self) -> u16 {
        self.common.read(CommonOffsets::QueueSize.as_usize())
    }

    fn set_queue_size(&self, size: u16) {
        self.common.write(CommonOffsets::QueueSize.as_usize(), size);
    }

    fn notify_queue(&self, queue_index: u16) {
        self.select_queue(queue_index);
        self.notify.write(0, queue_index);
    }

    fn enable_queue(&self) {
        self.common.write(CommonOffsets::QueueEnable.as_usize(), 1u16);
    }

    fn set_queue_descriptor_area(&self, area: PhysAddr) {
        self.common
            .write(CommonOffsets::QueueDesc.as_usize(), area.as_usize() as u64);
    }

    fn set_queue_driver_area(&self, area: PhysAddr) {
        self.common
            .write(CommonOffsets::QueueDriver.as_usize(), area.as_usize() as u64);
    }

    fn set_queue_device_area(&self, area: PhysAddr) {
        self.common
            .write(CommonOffsets::QueueDevice.as_usize(), area.as_usize() as u64);
    }
}
