// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Drives a VirtIO MMIO network device: initialisation, frame
//! transmission, and frame reception over the two virtqueues from
//! [`crate::drivers::virtio::virtqueue`].
//!
//! The two queues are process-wide singletons, installed once by [`init`]
//! and referenced through [`TX`] and [`RX`] for the rest of the device's
//! lifetime; teardown is not supported.

use crate::drivers::virtio::mmio;
use crate::drivers::virtio::virtqueue::{Queue, MAX_FRAME_SIZE, QUEUE_SIZE};
use crate::multitasking::{self, Channel};
use crate::utils::once::Once;
use x86_64::VirtAddr;

const QUEUE_RX: u16 = 0;
const QUEUE_TX: u16 = 1;

/// Error describes why the network device failed to initialise. Every
/// variant is fatal: the caller should halt rather than retry.
///
#[derive(Debug, Clone, Copy)]
pub enum Error {
    Mmio(mmio::Error),
    OutOfMemory,
}

impl From<mmio::Error> for Error {
    fn from(e: mmio::Error) -> Self {
        Error::Mmio(e)
    }
}

static TX: Once<spin::Mutex<Queue>> = Once::new();
static RX: Once<spin::Mutex<Queue>> = Once::new();

/// init brings up the VirtIO network device mapped at `mmio_base`: it
/// validates the device identity, negotiates `NET_F_MAC` only, configures
/// the receive and transmit queues, primes the receive queue with empty
/// chains, and returns the device's MAC address.
///
/// # Safety
///
/// `mmio_base` must point to a valid, mapped VirtIO MMIO register block
/// for a network device.
///
pub unsafe fn init(mmio_base: VirtAddr) -> Result<[u8; 6], Error> {
    let device = mmio::Device::new(mmio_base);

    device.reset();
    device.check_identity()?;
    device.negotiate_features()?;

    let mut rx = Queue::new().ok_or(Error::OutOfMemory)?;
    let mut tx = Queue::new().ok_or(Error::OutOfMemory)?;

    device.configure_queue(
        QUEUE_RX,
        QUEUE_SIZE,
        rx.desc_phys_addr(),
        rx.avail_phys_addr(),
        rx.used_phys_addr(),
    )?;
    device.configure_queue(
        QUEUE_TX,
        QUEUE_SIZE,
        tx.desc_phys_addr(),
        tx.avail_phys_addr(),
        tx.used_phys_addr(),
    )?;

    device.mark_driver_ok();

    let mut mac = [0u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        *byte = device.read_config_u8(i as u32);
    }

    // Prime the receive queue with QUEUE_SIZE / 2 empty chains, one per
    // available buffer slot, so the device has somewhere to DMA incoming
    // frames before the first net_recv call.
    for _ in 0..(QUEUE_SIZE / 2) {
        let (h, d, slot) = rx.alloc2().ok_or(Error::OutOfMemory)?;
        if rx.build_rx_chain(h, d, slot) {
            device.notify(QUEUE_RX);
        }
    }

    MMIO.init(|| device);
    TX.init(|| spin::Mutex::new(tx));
    RX.init(|| spin::Mutex::new(rx));

    Ok(mac)
}

static MMIO: Once<mmio::Device> = Once::new();

/// tx_free_channel identifies the wait channel sleepers park on when the
/// transmit queue has no free descriptors.
///
fn tx_free_channel() -> Channel {
    Channel::from_ptr(&TX as *const _)
}

/// send transmits `data` as a single Ethernet frame.
///
/// Reclaims any transmit chains the device has finished with, then
/// allocates a fresh chain for `data`. Returns `-1` immediately if no
/// chain is available rather than blocking; the caller decides whether to
/// retry.
///
/// # Panics
///
/// Panics if `data` is longer than [`MAX_FRAME_SIZE`].
///
pub fn send(data: &[u8]) -> i32 {
    assert!(data.len() <= MAX_FRAME_SIZE, "virtio: outgoing frame too large");

    let mut tx = TX.lock();

    while tx.has_used() {
        let (head, _len) = tx.take_used();
        tx.free_chain(head);
    }
    multitasking::wakeup(tx_free_channel());

    let (h, d, slot) = match tx.alloc2() {
        Some(triple) => triple,
        None => return -1,
    };

    if tx.build_tx_chain(h, d, slot, data) {
        MMIO.notify(QUEUE_TX);
    }

    0
}

/// recv copies the next completed frame, if any, into `out`, capped at
/// `out.len()`. Returns the number of bytes copied, or 0 if the device has
/// nothing queued.
///
/// # Panics
///
/// Panics if the device reports a frame longer than [`MAX_FRAME_SIZE`]:
/// this is a torn-frame / device-contract violation, not a recoverable
/// condition.
///
pub fn recv(out: &mut [u8]) -> usize {
    let mut rx = RX.lock();

    if !rx.has_used() {
        return 0;
    }

    let (head, len) = rx.take_used();
    let len = len as usize;
    if len > MAX_FRAME_SIZE {
        panic!("virtio: received frame of {} bytes exceeds {}", len, MAX_FRAME_SIZE);
    }

    let copy_len = core::cmp::min(len, out.len());
    let data = rx.data_desc_virt(head);
    unsafe {
        core::ptr::copy_nonoverlapping(data.as_ptr::<u8>(), out.as_mut_ptr(), copy_len);
    }

    rx.free_chain(head);

    match rx.alloc2() {
        Some((h, d, slot)) => {
            if rx.build_rx_chain(h, d, slot) {
                MMIO.notify(QUEUE_RX);
            }
        }
        None => {
            // Every buffer slot is either in flight to the device or
            // awaiting a reader; the next net_recv or net_send reclaim
            // will free one up for replenishment.
        }
    }

    copy_len
}
