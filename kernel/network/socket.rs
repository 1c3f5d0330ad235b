// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the socket-descriptor surface used by the syscall layer.
//!
//! This module is a thin adapter between [`tcp`](super::tcp)'s
//! connection-oriented API and the small, numeric handles that can
//! cross the syscall boundary. It is process-agnostic: descriptors
//! are allocated from a single global table, rather than being scoped
//! to the calling process's own file descriptor table, so this is
//! intentionally a stand-in for a real per-process table, in the same
//! way [`tcp::ACTIVE_PORTS`](super::tcp) stands in for a real
//! port-allocation authority.

use super::tcp::{Connection, DialConfig, Listener, ListenConfig};
use super::Error;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};
use smoltcp::wire::{IpAddress, IpEndpoint, Ipv4Address};
use spin::Mutex;

/// Uniquely identifies an open socket.
///
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct SocketDescriptor(u64);

impl SocketDescriptor {
    /// Wraps a raw numerical value received from a syscall argument.
    ///
    pub fn from_u64(value: u64) -> Self {
        SocketDescriptor(value)
    }

    /// Returns the raw numerical value of this descriptor.
    ///
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// The next value handed out by [`new_socket`].
///
/// Descriptors are never reused, even after the socket they named is
/// closed, so a stale descriptor retained by a misbehaving process
/// can never be silently handed a different socket.
///
static NEXT_DESCRIPTOR: AtomicU64 = AtomicU64::new(1);

/// Either half of a TCP socket, before or after it has been connected
/// or put into the listening state.
///
pub enum Socket {
    /// A socket that has not yet been bound, connected, or put into
    /// the listening state.
    Unbound,

    /// A socket bound to a local address, awaiting a call to
    /// [`listen`] or [`connect`].
    Bound(IpEndpoint),

    /// A server socket, accepting inbound connections.
    Listener(Listener),

    /// An established (or connecting) client or accepted connection.
    Stream(Connection),
}

/// The table of open sockets.
///
/// Entries are only ever removed by [`close`].
///
static SOCKETS: Mutex<BTreeMap<SocketDescriptor, Socket>> = Mutex::new(BTreeMap::new());

/// Creates a new, unbound socket, returning its descriptor.
///
pub fn socket() -> SocketDescriptor {
    let descriptor = SocketDescriptor(NEXT_DESCRIPTOR.fetch_add(1, Ordering::Relaxed));
    SOCKETS.lock().insert(descriptor, Socket::Unbound);

    descriptor
}

/// Binds `descriptor` to `local`.
///
/// `bind` can only be called on a socket that has not yet been bound,
/// connected, or put into the listening state.
///
pub fn bind(descriptor: SocketDescriptor, local: IpEndpoint) -> Result<(), Error> {
    let mut sockets = SOCKETS.lock();
    let socket = sockets
        .get_mut(&descriptor)
        .ok_or(Error::InvalidOperation)?;

    match socket {
        Socket::Unbound => {
            *socket = Socket::Bound(local);
            Ok(())
        }
        _ => Err(Error::InvalidOperation),
    }
}

/// Puts `descriptor` into the listening state, ready to accept
/// inbound connections.
///
/// `descriptor` must already have been bound with [`bind`].
///
pub fn listen(descriptor: SocketDescriptor) -> Result<(), Error> {
    let mut sockets = SOCKETS.lock();
    let socket = sockets
        .get_mut(&descriptor)
        .ok_or(Error::InvalidOperation)?;

    let local = match socket {
        Socket::Bound(local) => *local,
        _ => return Err(Error::InvalidOperation),
    };

    let listener = ListenConfig::default().listen(local)?;
    *socket = Socket::Listener(listener);

    Ok(())
}

/// Accepts the next pending connection on a listening socket,
/// returning the descriptor of the newly-accepted connection.
///
/// `accept` blocks until a connection is available, following
/// [`Listener::accept`]'s blocking discipline.
///
pub fn accept(descriptor: SocketDescriptor) -> Result<SocketDescriptor, Error> {
    // We can't hold SOCKETS locked while Listener::accept blocks, as
    // that would prevent any other socket being used (including
    // bind/connect on a brand new socket) while we wait. Instead, we
    // briefly take the listener out of the table, accept outside the
    // lock, then put it back.
    let mut listener = {
        let mut sockets = SOCKETS.lock();
        let socket = sockets
            .get_mut(&descriptor)
            .ok_or(Error::InvalidOperation)?;

        match core::mem::replace(socket, Socket::Unbound) {
            Socket::Listener(listener) => listener,
            other => {
                *socket = other;
                return Err(Error::InvalidOperation);
            }
        }
    };

    let result = listener.accept();

    let mut sockets = SOCKETS.lock();
    if let Some(socket) = sockets.get_mut(&descriptor) {
        *socket = Socket::Listener(listener);
    }

    let conn = result?;
    let new_descriptor = SocketDescriptor(NEXT_DESCRIPTOR.fetch_add(1, Ordering::Relaxed));
    sockets.insert(new_descriptor, Socket::Stream(conn));

    Ok(new_descriptor)
}

/// Connects `descriptor` to `remote`.
///
/// `connect` blocks until the connection either completes its
/// handshake or fails, following [`DialConfig::dial`]'s blocking
/// discipline.
///
pub fn connect(descriptor: SocketDescriptor, remote: IpEndpoint) -> Result<(), Error> {
    let local = {
        let mut sockets = SOCKETS.lock();
        let socket = sockets
            .get_mut(&descriptor)
            .ok_or(Error::InvalidOperation)?;

        match socket {
            Socket::Unbound => IpEndpoint::UNSPECIFIED,
            Socket::Bound(local) => *local,
            _ => return Err(Error::InvalidOperation),
        }
    };

    let config = DialConfig::default().set_local_addr(local);
    let conn = config.dial(remote)?;

    let mut sockets = SOCKETS.lock();
    if let Some(socket) = sockets.get_mut(&descriptor) {
        *socket = Socket::Stream(conn);
    }

    Ok(())
}

/// Sends `buf` over the stream held by `descriptor`.
///
pub fn write(descriptor: SocketDescriptor, buf: &[u8]) -> Result<usize, Error> {
    with_stream(descriptor, |conn| conn.send(buf))
}

/// Receives bytes from the stream held by `descriptor` into `buf`.
///
pub fn read(descriptor: SocketDescriptor, buf: &mut [u8]) -> Result<usize, Error> {
    with_stream(descriptor, |conn| conn.recv(buf))
}

/// Runs `f` against the [`Connection`] held by `descriptor`, without
/// holding the socket table lock for the duration of `f` (which may
/// block).
///
fn with_stream<T>(
    descriptor: SocketDescriptor,
    f: impl FnOnce(&Connection) -> Result<T, Error>,
) -> Result<T, Error> {
    // Connection's own methods take &self and manage their own
    // locking of the interface, so we only need SOCKETS locked for
    // long enough to borrow the connection out by reference. Safety
    // of holding that reference across f relies on close() being the
    // only thing that removes an entry, and callers being expected
    // not to close a descriptor they are concurrently using.
    let sockets = SOCKETS.lock();
    let socket = sockets
        .get(&descriptor)
        .ok_or(Error::InvalidOperation)?;

    match socket {
        Socket::Stream(conn) => f(conn),
        _ => Err(Error::InvalidOperation),
    }
}

/// Closes the socket held by `descriptor`, freeing its entry in the
/// socket table.
///
/// Closing an already-closed or unknown descriptor is a no-op.
///
pub fn close(descriptor: SocketDescriptor) {
    let socket = SOCKETS.lock().remove(&descriptor);
    match socket {
        Some(Socket::Listener(mut listener)) => listener.close(),
        Some(Socket::Stream(conn)) => conn.close(),
        _ => {}
    }
}

/// Resolves `hostname` to an IPv4 address.
///
pub fn gethostbyname(hostname: &str) -> Result<Ipv4Address, Error> {
    super::dns::resolve(hostname)
}

/// Builds the loopback-free IPv4 socket endpoint used by the syscall
/// layer's `connect`/`bind` arguments.
///
pub fn ipv4_endpoint(addr: u32, port: u16) -> IpEndpoint {
    let octets = addr.to_be_bytes();
    IpEndpoint::new(
        IpAddress::Ipv4(Ipv4Address::new(octets[0], octets[1], octets[2], octets[3])),
        port,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_unique() {
        let a = socket();
        let b = socket();
        assert_ne!(a, b);

        close(a);
        close(b);
    }

    #[test]
    fn bind_then_listen_requires_bound_state() {
        let d = socket();
        assert!(matches!(listen(d), Err(Error::InvalidOperation)));

        close(d);
    }

    #[test]
    fn double_bind_is_rejected() {
        let d = socket();
        let endpoint = ipv4_endpoint(0x7f00_0001, 8080);
        assert!(bind(d, endpoint).is_ok());
        assert!(matches!(bind(d, endpoint), Err(Error::InvalidOperation)));

        close(d);
    }

    #[test]
    fn unknown_descriptor_is_rejected() {
        let bogus = SocketDescriptor(u64::MAX);
        assert!(matches!(
            bind(bogus, ipv4_endpoint(0, 0)),
            Err(Error::InvalidOperation)
        ));
    }

    #[test]
    fn ipv4_endpoint_round_trips_octets() {
        let endpoint = ipv4_endpoint(0x0a00_0001, 53);
        assert_eq!(
            endpoint.addr,
            IpAddress::Ipv4(Ipv4Address::new(10, 0, 0, 1))
        );
        assert_eq!(endpoint.port, 53);
    }

    #[test]
    fn close_is_a_no_op_for_unknown_descriptors() {
        close(SocketDescriptor(u64::MAX));
    }
}
