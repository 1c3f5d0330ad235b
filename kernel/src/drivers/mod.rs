// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Contains modules for the implementation and initialisation of device drivers.
//!
//! ## VirtIO
//!
//! The [VirtIO](virtio) module is a partial implementation of the [Virtual I/O
//! (VirtIO) Device version 1.1 specification](https://docs.oasis-open.org/virtio/virtio/v1.1/virtio-v1.1.html),
//! scoped to the MMIO transport ([section 4.2]) and network devices
//! ([section 5.1]). This is used to provide access to the virtual NIC
//! implemented by the hypervisor.
//!
//! [section 4.2]: https://docs.oasis-open.org/virtio/virtio/v1.1/virtio-v1.1.html#x1-1090002
//! [section 5.1]: https://docs.oasis-open.org/virtio/virtio/v1.1/virtio-v1.1.html#x1-1930005

pub mod virtio;
