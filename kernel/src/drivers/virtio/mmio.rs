// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the VirtIO MMIO transport: the register layout through which
//! a driver configures a device and negotiates features, as described in
//! [section 4.2](https://docs.oasis-open.org/virtio/virtio/v1.1/virtio-v1.1.html#x1-1090002)
//! of the VirtIO specification.

use crate::drivers::virtio::features::Network;
use x86_64::VirtAddr;

const MAGIC_VALUE: u32 = 0x000;
const VERSION: u32 = 0x004;
const DEVICE_ID: u32 = 0x008;
const VENDOR_ID: u32 = 0x00c;
const DEVICE_FEATURES: u32 = 0x010;
const DRIVER_FEATURES: u32 = 0x020;
const QUEUE_SEL: u32 = 0x030;
const QUEUE_NUM_MAX: u32 = 0x034;
const QUEUE_NUM: u32 = 0x038;
const QUEUE_READY: u32 = 0x044;
const QUEUE_NOTIFY: u32 = 0x050;
const INTERRUPT_STATUS: u32 = 0x060;
const INTERRUPT_ACK: u32 = 0x064;
const STATUS: u32 = 0x070;
const QUEUE_DESC_LOW: u32 = 0x080;
const QUEUE_DESC_HIGH: u32 = 0x084;
const DRIVER_DESC_LOW: u32 = 0x090;
const DRIVER_DESC_HIGH: u32 = 0x094;
const DEVICE_DESC_LOW: u32 = 0x0a0;
const DEVICE_DESC_HIGH: u32 = 0x0a4;
const CONFIG: u32 = 0x100;

const MAGIC_EXPECTED: u32 = 0x7472_6976;
const VENDOR_EXPECTED: u32 = 0x554d_4551;
const VERSION_EXPECTED: u32 = 2;
const DEVICE_ID_NET: u32 = 1;

bitflags::bitflags! {
    /// StatusFlags mirrors the VirtIO device status register, written by
    /// the driver to advance through device initialisation.
    ///
    pub struct StatusFlags: u32 {
        const ACKNOWLEDGE = 1;
        const DRIVER = 2;
        const DRIVER_OK = 4;
        const FEATURES_OK = 8;
        const DEVICE_NEEDS_RESET = 64;
        const FAILED = 128;
    }
}

/// Error describes why a VirtIO MMIO device could not be initialised. Every
/// variant here represents a device-contract violation: the caller should
/// treat these as fatal, not retry.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    BadMagic(u32),
    BadVersion(u32),
    UnexpectedDevice(u32),
    BadVendor(u32),
    FeaturesNotAccepted,
    QueueUnavailable(u16),
    QueueTooSmall { queue: u16, max: u32 },
}

/// Device is a thin wrapper around the MMIO register block of a single
/// VirtIO device. Every register access is a volatile read or write to the
/// mapped page; there is no caching of device state here.
///
pub struct Device {
    base: VirtAddr,
}

impl Device {
    /// new wraps the MMIO region at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a valid, mapped VirtIO MMIO register block that
    /// outlives the returned `Device`.
    ///
    pub const unsafe fn new(base: VirtAddr) -> Self {
        Device { base }
    }

    #[inline]
    unsafe fn read32(&self, offset: u32) -> u32 {
        core::ptr::read_volatile(self.reg(offset))
    }

    #[inline]
    unsafe fn write32(&self, offset: u32, value: u32) {
        core::ptr::write_volatile(self.reg(offset), value);
    }

    #[inline]
    unsafe fn reg(&self, offset: u32) -> *mut u32 {
        (self.base.as_u64() + offset as u64) as *mut u32
    }

    fn status(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(unsafe { self.read32(STATUS) })
    }

    fn set_status(&self, status: StatusFlags) {
        unsafe { self.write32(STATUS, status.bits()) }
    }

    /// reset clears the status register, returning the device to its
    /// power-on state.
    ///
    pub fn reset(&self) {
        self.set_status(StatusFlags::empty());
    }

    /// check_identity validates the magic value, version, device id, and
    /// vendor id, failing fast if this is not a VirtIO network device.
    ///
    pub fn check_identity(&self) -> Result<(), Error> {
        let magic = unsafe { self.read32(MAGIC_VALUE) };
        if magic != MAGIC_EXPECTED {
            return Err(Error::BadMagic(magic));
        }

        let version = unsafe { self.read32(VERSION) };
        if version != VERSION_EXPECTED {
            return Err(Error::BadVersion(version));
        }

        let device_id = unsafe { self.read32(DEVICE_ID) };
        if device_id != DEVICE_ID_NET {
            return Err(Error::UnexpectedDevice(device_id));
        }

        let vendor = unsafe { self.read32(VENDOR_ID) };
        if vendor != VENDOR_EXPECTED {
            return Err(Error::BadVendor(vendor));
        }

        Ok(())
    }

    /// negotiate_features walks the device through the ACKNOWLEDGE, DRIVER,
    /// and FEATURES_OK handshake, masking the device's offered features
    /// down to just `NET_F_MAC`.
    ///
    pub fn negotiate_features(&self) -> Result<(), Error> {
        self.set_status(StatusFlags::ACKNOWLEDGE);
        self.set_status(self.status() | StatusFlags::DRIVER);

        let offered = unsafe { self.read32(DEVICE_FEATURES) };
        let accepted = offered & Network::MAC.bits() as u32;
        unsafe { self.write32(DRIVER_FEATURES, accepted) };

        self.set_status(self.status() | StatusFlags::FEATURES_OK);
        if !self.status().contains(StatusFlags::FEATURES_OK) {
            return Err(Error::FeaturesNotAccepted);
        }

        Ok(())
    }

    /// configure_queue selects `queue`, validates its maximum size against
    /// `size`, and publishes the physical addresses of the descriptor
    /// table, available ring, and used ring.
    ///
    pub fn configure_queue(
        &self,
        queue: u16,
        size: u16,
        desc: u64,
        driver_area: u64,
        device_area: u64,
    ) -> Result<(), Error> {
        unsafe { self.write32(QUEUE_SEL, queue as u32) };

        if unsafe { self.read32(QUEUE_READY) } != 0 {
            return Err(Error::QueueUnavailable(queue));
        }

        let max = unsafe { self.read32(QUEUE_NUM_MAX) };
        if max == 0 {
            return Err(Error::QueueUnavailable(queue));
        }
        if max < size as u32 {
            return Err(Error::QueueTooSmall { queue, max });
        }

        unsafe {
            self.write32(QUEUE_NUM, size as u32);
            self.write32(QUEUE_DESC_LOW, desc as u32);
            self.write32(QUEUE_DESC_HIGH, (desc >> 32) as u32);
            self.write32(DRIVER_DESC_LOW, driver_area as u32);
            self.write32(DRIVER_DESC_HIGH, (driver_area >> 32) as u32);
            self.write32(DEVICE_DESC_LOW, device_area as u32);
            self.write32(DEVICE_DESC_HIGH, (device_area >> 32) as u32);
            self.write32(QUEUE_READY, 1);
        }

        Ok(())
    }

    /// mark_driver_ok sets the DRIVER_OK status bit, after which the device
    /// may start processing the available rings of every configured queue.
    ///
    pub fn mark_driver_ok(&self) {
        self.set_status(self.status() | StatusFlags::DRIVER_OK);
    }

    /// notify writes `queue` to the QUEUE_NOTIFY register, telling the
    /// device that the available ring for that queue has new entries.
    ///
    pub fn notify(&self, queue: u16) {
        unsafe { self.write32(QUEUE_NOTIFY, queue as u32) };
    }

    /// read_config_u8 reads a single byte from the device-specific
    /// configuration space, which for a network device holds the MAC
    /// address starting at offset 0.
    ///
    pub fn read_config_u8(&self, offset: u32) -> u8 {
        unsafe {
            let ptr = (self.base.as_u64() + CONFIG as u64 + offset as u64) as *const u8;
            core::ptr::read_volatile(ptr)
        }
    }

    /// interrupt_status returns the set bits of the interrupt status
    /// register; this driver polls the used ring rather than acting on
    /// interrupts, but the register is exposed so callers can acknowledge
    /// and clear spurious interrupts.
    ///
    pub fn interrupt_status(&self) -> u32 {
        unsafe { self.read32(INTERRUPT_STATUS) }
    }

    /// ack_interrupt clears the given bits in the interrupt status
    /// register.
    ///
    pub fn ack_interrupt(&self, bits: u32) {
        unsafe { self.write32(INTERRUPT_ACK, bits) };
    }
}
