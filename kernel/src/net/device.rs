// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Bridges the virtqueue NIC driver to [`smoltcp::phy::Device`].
//!
//! Unlike a zero-copy device wrapper, every frame crosses this boundary by
//! value: [`crate::drivers::virtio::net::recv`] already copies received
//! frames out of driver-owned DMA memory, and
//! [`crate::drivers::virtio::net::send`] copies outgoing frames back in.
//! This keeps the copy discipline in one place (the driver) rather than
//! threading physical addresses through the protocol engine.

use crate::drivers::virtio::net as virtio_net;
use crate::drivers::virtio::virtqueue::MAX_FRAME_SIZE;
use alloc::vec;
use alloc::vec::Vec;
use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::time::Instant;

/// VirtioDevice adapts the process-wide virtqueue NIC singleton to
/// smoltcp's device trait. It carries no state of its own: the real
/// device state lives behind [`virtio_net::send`] and [`virtio_net::recv`].
///
pub struct VirtioDevice;

impl<'a> Device<'a> for VirtioDevice {
    type RxToken = RecvToken;
    type TxToken = SendToken;

    fn receive(&'a mut self) -> Option<(Self::RxToken, Self::TxToken)> {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let len = virtio_net::recv(&mut buf);
        if len == 0 {
            return None;
        }
        buf.truncate(len);
        Some((RecvToken { buf }, SendToken))
    }

    fn transmit(&'a mut self) -> Option<Self::TxToken> {
        Some(SendToken)
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = MAX_FRAME_SIZE;
        caps.medium = Medium::Ethernet;
        caps
    }
}

/// RecvToken carries a frame already copied out of the driver's receive
/// queue; consuming it just hands the copy to the protocol engine.
///
pub struct RecvToken {
    buf: Vec<u8>,
}

impl RxToken for RecvToken {
    fn consume<R, F>(mut self, _timestamp: Instant, f: F) -> smoltcp::Result<R>
    where
        F: FnOnce(&mut [u8]) -> smoltcp::Result<R>,
    {
        f(&mut self.buf)
    }
}

/// SendToken builds a frame in an owned buffer and copies it into the
/// driver's transmit queue on consumption.
///
pub struct SendToken;

impl TxToken for SendToken {
    fn consume<R, F>(self, _timestamp: Instant, len: usize, f: F) -> smoltcp::Result<R>
    where
        F: FnOnce(&mut [u8]) -> smoltcp::Result<R>,
    {
        let mut buf = vec![0u8; len];
        let result = f(&mut buf)?;

        if virtio_net::send(&buf) != 0 {
            return Err(smoltcp::Error::Exhausted);
        }

        Ok(result)
    }
}
