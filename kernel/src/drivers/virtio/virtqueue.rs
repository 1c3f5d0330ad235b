// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements a VirtIO split virtqueue: the descriptor table, available
//! ring, and used ring through which a driver and device exchange buffers,
//! as described in
//! [section 2.6](https://docs.oasis-open.org/virtio/virtio/v1.1/virtio-v1.1.html#x1-240006).
//!
//! Each queue here is sized to exactly [`QUEUE_SIZE`] descriptors, split
//! into [`QUEUE_SIZE`] / 2 chains of (header, data) descriptor pairs. This
//! matches the network device's use of a queue: one chain carries exactly
//! one Ethernet frame, split across a fixed virtio-net header and a packet
//! buffer.

use crate::memory;
use crate::utils::bitmap::Bitmap;
use core::sync::atomic::{fence, Ordering};
use x86_64::{PhysAddr, VirtAddr};

/// QUEUE_SIZE is the number of descriptors in each queue (N in the data
/// model). Every chain uses exactly two of them, so a queue can have at
/// most QUEUE_SIZE / 2 in-flight chains.
///
pub const QUEUE_SIZE: u16 = 8;

/// CHAINS is the number of (header, data) chains a queue can have
/// in flight at once.
///
const CHAINS: usize = (QUEUE_SIZE / 2) as usize;

/// MAX_FRAME_SIZE is the largest Ethernet frame this driver will send or
/// receive. A frame larger than this on receive is a device-contract
/// violation and is treated as fatal (see [`Queue::take_used`]).
///
pub const MAX_FRAME_SIZE: usize = 1514;

/// HEADER_SIZE is the size in bytes of the virtio-net header that precedes
/// every frame's payload in a chain.
///
pub const HEADER_SIZE: usize = 16;

bitflags::bitflags! {
    struct DescriptorFlags: u16 {
        const NEXT = 1;
        const WRITE = 2;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct Descriptor {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

#[repr(C)]
struct AvailRing {
    flags: u16,
    idx: u16,
    ring: [u16; QUEUE_SIZE as usize],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct UsedElem {
    id: u32,
    len: u32,
}

#[repr(C)]
struct UsedRing {
    flags: u16,
    idx: u16,
    ring: [UsedElem; QUEUE_SIZE as usize],
}

/// NetHeader is the fixed-format header that precedes every frame's payload
/// in a chain. We never negotiate checksum offload, GSO, or mergeable
/// receive buffers, so every field but the padding stays zeroed.
///
#[repr(C)]
#[derive(Clone, Copy, Default)]
struct NetHeader {
    flags: u8,
    gso_type: u8,
    hdr_len: u16,
    gso_size: u16,
    csum_start: u16,
    csum_offset: u16,
    // Padding out to the 16-byte header length this driver negotiates,
    // since we never enable the mergeable-buffers num_buffers field.
    _reserved: [u8; 6],
}

/// Queue is one direction (RX or TX) of a VirtIO network device: a
/// descriptor table, available ring, used ring, a free bitmap over the
/// descriptor table, and the preallocated header and packet buffers every
/// chain borrows from.
///
/// Every field here lives in its own physical frame, addressable by the
/// device via DMA; `*_virt` fields are the kernel's own view of the same
/// memory through the physical memory window.
///
pub struct Queue {
    desc_phys: PhysAddr,
    avail_phys: PhysAddr,
    used_phys: PhysAddr,
    header_phys: PhysAddr,
    packet_phys: [PhysAddr; CHAINS],

    desc: VirtAddr,
    avail: VirtAddr,
    used: VirtAddr,
    header: VirtAddr,
    packet: [VirtAddr; CHAINS],

    /// free_descriptors tracks which of the QUEUE_SIZE descriptor slots are
    /// unused; a set bit means free.
    free_descriptors: Bitmap,
    /// free_buffers tracks which of the CHAINS header/packet buffer slots
    /// are unused; a set bit means free. Kept distinct from
    /// free_descriptors because a chain's two descriptor indices need not
    /// be adjacent, so the buffer slot a chain uses can't be derived from
    /// its descriptor index.
    free_buffers: Bitmap,
    /// chain_buffer remembers, for each descriptor used as a chain head,
    /// which buffer slot that chain holds, so `free_chain` can release it.
    chain_buffer: [u8; QUEUE_SIZE as usize],

    /// used_idx_consumer is the next used-ring slot this driver will
    /// inspect. It is monotonic modulo 2^16, never stored modulo
    /// QUEUE_SIZE; the ring index is taken modulo QUEUE_SIZE only when the
    /// ring is actually indexed.
    used_idx_consumer: u16,
}

/// Descriptor conservation and the free-chain bookkeeping above are
/// spot-checked by the property tests in `net.rs`, which drive `Queue`
/// directly rather than through the device.
impl Queue {
    /// new allocates the backing frames for a fresh, empty queue. Every
    /// descriptor starts free.
    ///
    pub fn new() -> Option<Queue> {
        let desc_phys = memory::alloc_frame()?;
        let avail_phys = memory::alloc_frame()?;
        let used_phys = memory::alloc_frame()?;
        let header_phys = memory::alloc_frame()?;

        let mut packet_phys = [PhysAddr::new(0); CHAINS];
        for slot in packet_phys.iter_mut() {
            *slot = memory::alloc_frame()?;
        }

        let desc = memory::phys_to_virt(desc_phys);
        let avail = memory::phys_to_virt(avail_phys);
        let used = memory::phys_to_virt(used_phys);
        let header = memory::phys_to_virt(header_phys);
        let mut packet = [VirtAddr::new(0); CHAINS];
        for (virt, phys) in packet.iter_mut().zip(packet_phys.iter()) {
            *virt = memory::phys_to_virt(*phys);
        }

        Some(Queue {
            desc_phys,
            avail_phys,
            used_phys,
            header_phys,
            packet_phys,
            desc,
            avail,
            used,
            header,
            packet,
            free_descriptors: Bitmap::new_set(QUEUE_SIZE as usize),
            free_buffers: Bitmap::new_set(CHAINS),
            chain_buffer: [0; QUEUE_SIZE as usize],
            used_idx_consumer: 0,
        })
    }

    pub fn desc_phys_addr(&self) -> u64 {
        self.desc_phys.as_u64()
    }

    pub fn avail_phys_addr(&self) -> u64 {
        self.avail_phys.as_u64()
    }

    pub fn used_phys_addr(&self) -> u64 {
        self.used_phys.as_u64()
    }

    fn desc_table(&self) -> &mut [Descriptor; QUEUE_SIZE as usize] {
        unsafe { &mut *(self.desc.as_mut_ptr()) }
    }

    fn avail_ring(&self) -> &mut AvailRing {
        unsafe { &mut *(self.avail.as_mut_ptr()) }
    }

    fn used_ring(&self) -> &mut UsedRing {
        unsafe { &mut *(self.used.as_mut_ptr()) }
    }

    fn header_slot(&self, slot: usize) -> &mut NetHeader {
        unsafe { &mut *((self.header.as_u64() as *mut NetHeader).add(slot)) }
    }

    fn packet_slot(&self, slot: usize) -> *mut u8 {
        self.packet[slot].as_mut_ptr()
    }

    /// alloc2 returns two free descriptor indices and a free buffer slot,
    /// or `None` if either the descriptor table or the buffer pool is
    /// exhausted. On partial failure, any descriptor already taken is
    /// returned to the free bitmap before returning `None`.
    ///
    pub fn alloc2(&mut self) -> Option<(u16, u16, usize)> {
        let h = self.free_descriptors.next_set()?;
        self.free_descriptors.unset(h);

        let d = match self.free_descriptors.next_set() {
            Some(d) => d,
            None => {
                self.free_descriptors.set(h);
                return None;
            }
        };
        self.free_descriptors.unset(d);

        let slot = match self.free_buffers.next_set() {
            Some(slot) => slot,
            None => {
                self.free_descriptors.set(h);
                self.free_descriptors.set(d);
                return None;
            }
        };
        self.free_buffers.unset(slot);

        self.chain_buffer[h] = slot as u8;
        Some((h as u16, d as u16, slot))
    }

    /// free_chain releases every descriptor in the chain starting at `head`
    /// and the buffer slot it was using, following `next` links until a
    /// descriptor without the NEXT flag is reached.
    ///
    /// # Panics
    ///
    /// Panics if `head` is out of range or already free: a double free is a
    /// device-contract violation, not a recoverable condition.
    ///
    pub fn free_chain(&mut self, head: u16) {
        let slot = self.chain_buffer[head as usize] as usize;
        self.free_buffers.set(slot);

        let mut i = head as usize;
        loop {
            if self.free_descriptors.get(i) {
                panic!("virtio: double free of descriptor {}", i);
            }
            self.free_descriptors.set(i);

            let desc = self.desc_table()[i];
            if DescriptorFlags::from_bits_truncate(desc.flags).contains(DescriptorFlags::NEXT) {
                i = desc.next as usize;
            } else {
                break;
            }
        }
    }

    /// push_avail publishes descriptor `head` as a new chain on the
    /// available ring and, if the device has not suppressed notifications,
    /// returns `true` to tell the caller to ring the doorbell.
    ///
    fn push_avail(&mut self, head: u16) -> bool {
        let idx = self.avail_ring().idx;
        let slot = (idx % QUEUE_SIZE) as usize;
        self.avail_ring().ring[slot] = head;

        // The device must never observe a ring slot behind an advanced
        // idx, so the ring write happens-before the idx increment.
        fence(Ordering::Release);
        self.avail_ring().idx = idx.wrapping_add(1);

        self.used_ring().flags == 0
    }

    /// build_rx_chain wires up a (header, data) pair to receive a frame
    /// into buffer slot `slot`, and publishes it on the available ring.
    /// Returns whether the device should be notified.
    ///
    pub fn build_rx_chain(&mut self, h: u16, d: u16, slot: usize) -> bool {
        *self.header_slot(slot) = NetHeader::default();

        self.desc_table()[h as usize] = Descriptor {
            addr: self.header_phys.as_u64() + (slot * HEADER_SIZE) as u64,
            len: HEADER_SIZE as u32,
            flags: (DescriptorFlags::WRITE | DescriptorFlags::NEXT).bits(),
            next: d,
        };
        self.desc_table()[d as usize] = Descriptor {
            addr: self.packet_phys[slot].as_u64(),
            len: MAX_FRAME_SIZE as u32,
            flags: DescriptorFlags::WRITE.bits(),
            next: 0,
        };

        self.push_avail(h)
    }

    /// build_tx_chain wires up a (header, data) pair carrying `data` as the
    /// frame payload, and publishes it on the available ring. Returns
    /// whether the device should be notified.
    ///
    /// # Panics
    ///
    /// Panics if `data` is longer than [`MAX_FRAME_SIZE`]; callers must
    /// enforce this as a contract, not treat it as a runtime error.
    ///
    pub fn build_tx_chain(&mut self, h: u16, d: u16, slot: usize, data: &[u8]) -> bool {
        assert!(data.len() <= MAX_FRAME_SIZE, "virtio: outgoing frame too large");

        *self.header_slot(slot) = NetHeader::default();
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.packet_slot(slot), data.len());
        }

        self.desc_table()[h as usize] = Descriptor {
            addr: self.header_phys.as_u64() + (slot * HEADER_SIZE) as u64,
            len: HEADER_SIZE as u32,
            flags: DescriptorFlags::NEXT.bits(),
            next: d,
        };
        self.desc_table()[d as usize] = Descriptor {
            addr: self.packet_phys[slot].as_u64(),
            len: data.len() as u32,
            flags: 0,
            next: 0,
        };

        self.push_avail(h)
    }

    /// has_used reports whether the device has completed at least one more
    /// chain than this driver has consumed. Performs the acquire fence
    /// between reading the used index and any subsequent read of the used
    /// ring's contents.
    ///
    pub fn has_used(&mut self) -> bool {
        let device_idx = self.used_ring().idx;
        fence(Ordering::Acquire);
        self.used_idx_consumer != device_idx
    }

    /// take_used consumes the next used-ring entry, returning the chain's
    /// head descriptor index and the byte length the device reported.
    /// Advances `used_idx_consumer`. Must only be called after `has_used`
    /// returns true.
    ///
    pub fn take_used(&mut self) -> (u16, u32) {
        let slot = (self.used_idx_consumer % QUEUE_SIZE) as usize;
        let elem = self.used_ring().ring[slot];
        self.used_idx_consumer = self.used_idx_consumer.wrapping_add(1);
        (elem.id as u16, elem.len)
    }

    /// data_desc_addr returns the virtual address of the data descriptor
    /// reachable from chain head `head`, for copying a received frame out.
    ///
    pub fn data_desc_virt(&self, head: u16) -> VirtAddr {
        let d = self.desc_table()[head as usize].next;
        let addr = self.desc_table()[d as usize].addr;
        memory::phys_to_virt(PhysAddr::new(addr))
    }
}
