// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides support for TCP client and server connections.
//!
//! This module includes functionality to [`dial`](DialConfig::dial)
//! servers to create client connections and [`listen`](ListenConfig::listen)
//! as a server for client connections. Note that the API used here is
//! slightly different from [Berkeley sockets](https://en.wikipedia.org/wiki/Berkeley_sockets).
//!
//! ## TCP server
//!
//! To start a TCP server, customise a [`ListenConfig`], then call its
//! [`listen`](ListenConfig::listen) method to listen for inbound
//! connections. The server should then iteratively call
//! [`accept`](Listener::accept) to accept a pending connection.
//!
//! ## TCP client
//!
//! To start a TCP client connection, customise a [`DialConfig`], then
//! call its [`dial`](DialConfig::dial) method to connect to the remote
//! server.
//!
//! ## Remote close while data is still queued
//!
//! [`Connection::recv`] always checks whether bytes remain buffered
//! before it checks whether the peer has closed the connection. This
//! means a reader that arrives after the remote end has sent a FIN
//! still drains every byte that arrived before the FIN; only once the
//! receive buffer is empty does `recv` report [`Error::ConnectionClosed`].
//!
//! # Examples
//!
//! A simple echo server, which services one connection at a time,
//! returning the first Kibibyte received on each connection:
//!
//! ```
//! // Listen on port 80.
//! let config = tcp::ListenConfig::default();
//! let mut listener = config.listen(80).unwrap();
//! let mut buf = [0u8; 1024]; // Our 1 KiB echo buffer.
//!
//! // Process 10 connections.
//! for _ in 0..10 {
//!     let conn = listener.accept().unwrap();
//!     let n = conn.recv(&mut buf[..]).unwrap();
//!     conn.send(&buf[..n]).unwrap();
//!     conn.close();
//! }
//!
//! // Close the listener, rejecting any unaccepted connections.
//! listener.close();
//! ```
//!
//! A naive HTTP request for `http://example.com/`:
//!
//! ```
//! // Create the destination IP endpoint.
//! let config = tcp::DialConfig::default();
//! let addr = (IpAddress::v4(93, 184, 216, 34), 80);
//! let conn = config.dial(addr).unwrap();
//!
//! // Send our HTTP request.
//! conn.send(b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n").unwrap();
//!
//! // Receive and print the first 4 KiB of the response.
//! let mut buf = [0u8; 4096];
//! let n = conn.recv(&mut buf[..]).unwrap();
//! println!("{}", str::from_utf8(&buf[..n]).unwrap());
//!
//! // Close the connection.
//! conn.close();
//! ```

use super::{Error, InterfaceHandle, INTERFACES};
use alloc::collections::BTreeSet;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::min;
use multitasking::thread::{current_thread_waker, prevent_next_sleep, suspend};
use smoltcp::iface::SocketHandle;
use smoltcp::socket::{TcpSocket, TcpSocketBuffer};
use smoltcp::wire::IpEndpoint;
use spin::Mutex;
use x86_64::instructions::interrupts::without_interrupts;

/// Used as the number of bytes in each connection's receive buffer.
///
/// This is sized to comfortably hold several maximum-size Ethernet
/// frames of payload (the distilled design's bounded ring of 8
/// buffered 1514-byte packets), while letting `smoltcp` manage the
/// byte-level bookkeeping instead of a fixed-length descriptor ring.
///
const DEFAULT_RECV_BUFFER_SIZE: usize = 8192;

/// Used as the number of bytes in each connection's send buffer.
///
const DEFAULT_SEND_BUFFER_SIZE: usize = 4096;

/// Contains the set of TCP ports in active use.
///
/// We don't currently remove ports from the list, as the obvious
/// time to remove it would be when the connection is closed, but we
/// don't want to risk confusing the old and the new connection if
/// the port is reused soon after the old connection closed. This
/// would be particularly risky if the FIN packet was lost in transit.
//
// TODO: decide a way to remove used ports from the list.
//
// TODO: use a separate set of used ports for each interface.
//
static ACTIVE_PORTS: Mutex<BTreeSet<u16>> = Mutex::new(BTreeSet::new());

/// Returns a random port number in the range 49152 - 65535.
///
/// The returned port is guaranteed not to be in active use yet.
///
pub fn ephemeral_port() -> u16 {
    let mut active = ACTIVE_PORTS.lock();
    let mut buf = [0u8; 16];

    // Loop until we find a port we're happy to use.
    loop {
        // We give ourselves 8 tries at a time to avoid
        // calling random::read too often.
        random::read(&mut buf[..]);

        for i in 0..(buf.len() / 2) {
            let port = ((buf[i * 2] as u16) << 8) + (buf[i * 2 + 1] as u16);
            if port < 49152 {
                continue;
            }

            if active.contains(&port) {
                continue;
            }

            // Success!
            active.insert(port);
            return port;
        }
    }
}

/// The maximum backlog size for any one Listener.
///
/// If [`listen`](ListenConfig::listen) is called with a larger
/// `backlog` than `MAX_BACKLOG`, then `MAX_BACKLOG` is used instead.
///
pub const MAX_BACKLOG: usize = 128;

/// The default backlog size for a Listener.
///
const DEFAULT_BACKLOG: usize = 16;

/// Contains the configuration options for a TCP server.
///
pub struct ListenConfig {
    // If true, calls to accept on the listener, and send/recv on
    // its connections, will return `Err(Error::NotReady)` if they
    // cannot occur immediately, instead of blocking.
    non_blocking: bool,

    // The max number of pending connections.
    backlog: usize,

    // The receive buffer size for new connections.
    recv_buffer_size: usize,

    // The send buffer size for new connections.
    send_buffer_size: usize,
}

impl Default for ListenConfig {
    /// Returns the default listener configuration.
    ///
    fn default() -> Self {
        ListenConfig {
            non_blocking: false,
            backlog: DEFAULT_BACKLOG,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
        }
    }
}

impl ListenConfig {
    /// Sets new connections to non-blocking mode.
    ///
    /// If a call to [`accept`](Listener::accept) on a non-blocking
    /// listener, or [`send`](Connection::send) or [`recv`](Connection::recv)
    /// on a non-blocking connection would otherwise block, it will
    /// instead return [`Error::NotReady`](super::Error::NotReady).
    ///
    /// Repeating the call at a later time may succeed.
    ///
    pub fn set_non_blocking(self) -> Self {
        ListenConfig {
            non_blocking: true,
            ..self
        }
    }

    /// Sets the maximum number of pending connections that can be
    /// held simultaneously.
    ///
    /// Pending connections are completed by calling [`accept`](Listener::accept).
    /// If the backlog is full and another connection attempt is
    /// received, it may be rejected.
    ///
    /// If the `backlog` is larger than [`MAX_BACKLOG`], the maximum
    /// is used instead.
    ///
    pub fn set_backlog(self, backlog: usize) -> Self {
        let backlog = min(backlog, MAX_BACKLOG);

        ListenConfig { backlog, ..self }
    }

    /// Sets the size of the receive buffer in new connections.
    ///
    pub fn set_recv_buffer_size(self, size: usize) -> Self {
        ListenConfig {
            recv_buffer_size: size,
            ..self
        }
    }

    /// Sets the size of the send buffer in new connections.
    ///
    pub fn set_send_buffer_size(self, size: usize) -> Self {
        ListenConfig {
            send_buffer_size: size,
            ..self
        }
    }

    /// Listen for connections from client peers.
    ///
    /// If the local port is `0`, a random available port will be
    /// chosen. [`local_addr`](Listener::local_addr) can be called to
    /// retrieve the chosen port.
    ///
    pub fn listen<T: Into<IpEndpoint>>(&self, local: T) -> Result<Listener, Error> {
        // Realise the arguments.
        let mut local = local.into();
        if local.port == 0 {
            local.port = ephemeral_port();
        } else {
            let mut active = ACTIVE_PORTS.lock();
            if active.contains(&local.port) {
                return Err(Error::PortInUse);
            }

            active.insert(local.port);
        }

        let iface_handle = InterfaceHandle::new(0); // TODO: get this properly.

        without_interrupts(|| {
            let mut ifaces = INTERFACES.lock();
            let iface = ifaces
                .get_mut(iface_handle.0)
                .expect("invalid interface handle");

            // Fill the backlog of listening sockets.
            let mut backlog = Vec::with_capacity(self.backlog);
            for _ in 0..self.backlog {
                let conn = new_listening_connection(
                    iface,
                    iface_handle,
                    local,
                    self.recv_buffer_size,
                    self.send_buffer_size,
                    self.non_blocking,
                )?;

                backlog.push(conn);
            }

            Ok(Listener {
                iface: iface_handle,
                local,
                backlog,
                listening: true,
                non_blocking: self.non_blocking,
                recv_buffer_size: self.recv_buffer_size,
                send_buffer_size: self.send_buffer_size,
            })
        })
    }
}

/// Creates a fresh `TcpSocket` in the listening state, adds it to
/// `iface`'s socket set, and wraps the handle in a [`Connection`].
///
fn new_listening_connection(
    iface: &mut super::Interface,
    iface_handle: InterfaceHandle,
    local: IpEndpoint,
    recv_buffer_size: usize,
    send_buffer_size: usize,
    non_blocking: bool,
) -> Result<Connection, Error> {
    let recv_buffer = TcpSocketBuffer::new(vec![0u8; recv_buffer_size]);
    let send_buffer = TcpSocketBuffer::new(vec![0u8; send_buffer_size]);
    let mut socket = TcpSocket::new(recv_buffer, send_buffer);
    socket.listen(local)?;

    let sock_handle = iface.iface.add_socket(socket);

    Ok(Connection {
        iface: iface_handle,
        socket: sock_handle,
        non_blocking,
        local,
        remote: IpEndpoint::UNSPECIFIED,
    })
}

/// Represents a TCP server socket.
///
pub struct Listener {
    // The interface that owns this socket.
    iface: InterfaceHandle,

    // The address of the listening server.
    local: IpEndpoint,

    // The backlog of pending connections.
    backlog: Vec<Connection>,

    // Whether we are still listening.
    listening: bool,

    // Whether the listener's APIs will return an error, rather
    // than blocking.
    non_blocking: bool,

    // The receive buffer size for new connections.
    recv_buffer_size: usize,

    // The send buffer size for new connections.
    send_buffer_size: usize,
}

impl Listener {
    /// Accept the next pending connection.
    ///
    /// `accept` will block until a connection is available. If the
    /// Listener has been closed, `accept` returns immediately with
    /// `Err(Error::ListenerClosed)`.
    ///
    pub fn accept(&mut self) -> Result<Connection, Error> {
        if !self.listening {
            return Err(Error::ListenerClosed);
        }

        let waker = current_thread_waker();

        without_interrupts(|| loop {
            let mut ifaces = INTERFACES.lock();
            let iface = ifaces
                .get_mut(self.iface.0)
                .expect("invalid interface handle");

            // See whether any pending connection is ready yet:
            // either the handshake has completed (may_send), or
            // data has already arrived (may_recv).
            let found = self.backlog.iter().position(|conn| {
                let socket = iface.iface.get_socket::<TcpSocket>(conn.socket);
                socket.may_send() || socket.may_recv()
            });

            match found {
                None => {
                    if self.non_blocking {
                        return Err(Error::NotReady);
                    }

                    // Register a waker on every backlog socket, so
                    // whichever one completes its handshake first
                    // wakes us. We expect to be woken more than
                    // once in general, hence the loop.
                    prevent_next_sleep();
                    for conn in self.backlog.iter() {
                        let socket = iface.iface.get_socket::<TcpSocket>(conn.socket);
                        socket.register_recv_waker(&waker);
                    }

                    drop(ifaces);
                    suspend();
                }
                Some(i) => {
                    let mut conn = self.backlog.remove(i);
                    let socket = iface.iface.get_socket::<TcpSocket>(conn.socket);
                    conn.remote = socket.remote_endpoint();

                    // Restore the backlog to its configured depth
                    // immediately, so the next connection attempt
                    // always finds a listening socket waiting.
                    let replacement = new_listening_connection(
                        iface,
                        self.iface,
                        self.local,
                        self.recv_buffer_size,
                        self.send_buffer_size,
                        self.non_blocking,
                    )?;
                    self.backlog.push(replacement);

                    return Ok(conn);
                }
            }
        })
    }

    /// Returns the listener's local address.
    ///
    pub fn local_addr(&self) -> IpEndpoint {
        self.local
    }

    /// Close the listener.
    ///
    /// Calling `close` rejects any future connection attempts, and
    /// any pending connections not yet [`accept`](Listener::accept)ed,
    /// but leaves already-accepted connections intact so a server can
    /// perform a graceful shutdown.
    ///
    pub fn close(&mut self) {
        self.listening = false;
        for conn in self.backlog.iter() {
            conn.close();
        }

        self.backlog.truncate(0);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        without_interrupts(|| {
            for conn in self.backlog.iter() {
                conn.close();
            }
        });
    }
}

/// Contains the configuration options for a TCP client.
///
pub struct DialConfig {
    // If true, calls to send/recv on new connections will return
    // `Err(Error::NotReady)` if they cannot occur immediately,
    // instead of blocking.
    non_blocking: bool,

    // The local address that should be used when opening new,
    // outbound, connections.
    local: IpEndpoint,

    // The receive buffer size for new connections.
    recv_buffer_size: usize,

    // The send buffer size for new connections.
    send_buffer_size: usize,
}

impl Default for DialConfig {
    /// Returns the default dialer configuration.
    ///
    fn default() -> Self {
        DialConfig {
            non_blocking: false,
            local: IpEndpoint::UNSPECIFIED,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
        }
    }
}

impl DialConfig {
    /// Sets new connections to non-blocking mode.
    ///
    pub fn set_non_blocking(self) -> Self {
        DialConfig {
            non_blocking: true,
            ..self
        }
    }

    /// Set the local address used when opening outbound connections.
    ///
    pub fn set_local_addr<T: Into<IpEndpoint>>(self, addr: T) -> Self {
        DialConfig {
            local: addr.into(),
            ..self
        }
    }

    /// Sets the size of the receive buffer in new connections.
    ///
    pub fn set_recv_buffer_size(self, size: usize) -> Self {
        DialConfig {
            recv_buffer_size: size,
            ..self
        }
    }

    /// Sets the size of the send buffer in new connections.
    ///
    pub fn set_send_buffer_size(self, size: usize) -> Self {
        DialConfig {
            send_buffer_size: size,
            ..self
        }
    }

    /// Connect to a remote server.
    ///
    /// `dial` blocks until the connection either completes its
    /// handshake or fails.
    ///
    pub fn dial<T: Into<IpEndpoint>>(&self, remote: T) -> Result<Connection, Error> {
        let remote = remote.into();
        let local = if self.local.port == 0 {
            IpEndpoint {
                port: ephemeral_port(),
                ..self.local
            }
        } else {
            let mut active = ACTIVE_PORTS.lock();
            if active.contains(&self.local.port) {
                return Err(Error::PortInUse);
            }

            active.insert(self.local.port);
            self.local
        };

        let recv_buffer = TcpSocketBuffer::new(vec![0u8; self.recv_buffer_size]);
        let send_buffer = TcpSocketBuffer::new(vec![0u8; self.send_buffer_size]);
        let socket = TcpSocket::new(recv_buffer, send_buffer);
        let iface_handle = InterfaceHandle::new(0); // TODO: get this properly.
        let waker = current_thread_waker();

        let sock_handle = without_interrupts(|| {
            let mut ifaces = INTERFACES.lock();
            let iface = ifaces
                .get_mut(iface_handle.0)
                .expect("invalid interface handle");

            let sock_handle = iface.iface.add_socket(socket);

            // We need a context to call socket.connect; fetching
            // it alongside the socket is the only way smoltcp
            // exposes one.
            let (socket, context) = iface.iface.get_socket_and_context::<TcpSocket>(sock_handle);
            socket.connect(context, remote, local)?;

            // Send the SYN immediately rather than waiting for the
            // background poll thread's next tick.
            iface.poll();

            Ok(sock_handle)
        })?;

        without_interrupts(|| loop {
            let mut ifaces = INTERFACES.lock();
            let iface = ifaces
                .get_mut(iface_handle.0)
                .expect("invalid interface handle");

            let socket = iface.iface.get_socket::<TcpSocket>(sock_handle);
            if !socket.is_open() {
                return Err(Error::ConnectFailure);
            }

            if socket.may_send() {
                return Ok(Connection {
                    iface: iface_handle,
                    socket: sock_handle,
                    non_blocking: self.non_blocking,
                    local,
                    remote,
                });
            }

            if self.non_blocking {
                return Err(Error::NotReady);
            }

            prevent_next_sleep();
            socket.register_send_waker(&waker);

            drop(ifaces);
            suspend();
        })
    }
}

/// Represents a TCP connection.
///
pub struct Connection {
    // The interface that owns this socket.
    iface: InterfaceHandle,

    // The socket we use to send and receive packets.
    socket: SocketHandle,

    // Whether this connection's APIs will return an error, rather
    // than blocking.
    non_blocking: bool,

    // The address at our end of the connection.
    local: IpEndpoint,

    // The address at the other end of the connection.
    remote: IpEndpoint,
}

impl Connection {
    /// Close the connection.
    ///
    /// `close` queues a FIN and attempts to flush it immediately,
    /// but does not wait for the peer to acknowledge it.
    ///
    pub fn close(&self) {
        without_interrupts(|| {
            let mut ifaces = INTERFACES.lock();
            let iface = ifaces
                .get_mut(self.iface.0)
                .expect("invalid interface handle");

            iface.iface.get_socket::<TcpSocket>(self.socket).close();
            iface.poll();
        });
    }

    /// Returns the address of this end of the connection.
    ///
    pub fn local_addr(&self) -> IpEndpoint {
        self.local
    }

    /// Returns the address of the peer of this connection.
    ///
    pub fn remote_addr(&self) -> IpEndpoint {
        self.remote
    }

    /// Send the given byte sequence to the peer.
    ///
    /// Returns the number of bytes sent. If no error is returned,
    /// the number of bytes sent will be the length of `buf`.
    ///
    pub fn send(&self, buf: &[u8]) -> Result<usize, Error> {
        let mut bytes_sent = 0;
        let waker = current_thread_waker();

        without_interrupts(|| loop {
            let mut ifaces = INTERFACES.lock();
            let iface = ifaces
                .get_mut(self.iface.0)
                .expect("invalid interface handle");

            let socket = iface.iface.get_socket::<TcpSocket>(self.socket);
            if !socket.is_open() {
                return Err(Error::ConnectionClosed);
            }

            if !socket.can_send() {
                if self.non_blocking {
                    return Err(Error::NotReady);
                }

                prevent_next_sleep();
                socket.register_send_waker(&waker);

                drop(ifaces);
                suspend();
                continue;
            }

            bytes_sent += socket.send_slice(&buf[bytes_sent..])?;
            iface.poll();

            if bytes_sent == buf.len() {
                return Ok(bytes_sent);
            }
        })
    }

    /// Receive a byte sequence from the peer.
    ///
    /// Returns the number of bytes written to `buf`. If no error is
    /// returned, the number of bytes will be non-zero.
    ///
    /// Bytes that arrived before the peer closed the connection are
    /// always delivered first: `recv` only reports
    /// [`Error::ConnectionClosed`] once the receive buffer has been
    /// fully drained, so a connection that was already closed by the
    /// time a reader calls `recv` still yields every byte the peer
    /// sent before its FIN.
    ///
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let waker = current_thread_waker();

        without_interrupts(|| loop {
            let mut ifaces = INTERFACES.lock();
            let iface = ifaces
                .get_mut(self.iface.0)
                .expect("invalid interface handle");

            let socket = iface.iface.get_socket::<TcpSocket>(self.socket);

            // Check for buffered data before checking whether the
            // connection is closed: a remote FIN must never cause
            // already-arrived bytes to be dropped.
            if socket.can_recv() {
                let bytes_read = socket.recv_slice(buf)?;
                if bytes_read > 0 {
                    return Ok(bytes_read);
                }
            } else if !socket.is_open() {
                return Err(Error::ConnectionClosed);
            }

            if self.non_blocking {
                return Err(Error::NotReady);
            }

            prevent_next_sleep();
            socket.register_recv_waker(&waker);

            drop(ifaces);
            suspend();
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        without_interrupts(|| {
            let mut ifaces = INTERFACES.lock();
            let iface = ifaces
                .get_mut(self.iface.0)
                .expect("invalid interface handle");

            iface.iface.remove_socket(self.socket);

            if self.local.port != 0 {
                ACTIVE_PORTS.lock().remove(&self.local.port);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_ports_are_unique_and_in_range() {
        // We can't bring up a real interface in a unit test, but
        // ephemeral_port only touches ACTIVE_PORTS and random, both
        // of which work outside of kernel init.
        let mut seen = BTreeSet::new();
        for _ in 0..64 {
            let port = ephemeral_port();
            assert!(port >= 49152);
            assert!(!seen.contains(&port), "ephemeral_port returned a duplicate");
            seen.insert(port);
        }

        // Clean up so other tests see a fresh ACTIVE_PORTS set.
        let mut active = ACTIVE_PORTS.lock();
        for port in seen {
            active.remove(&port);
        }
    }

    #[test]
    fn backlog_is_capped_at_max_backlog() {
        let config = ListenConfig::default().set_backlog(MAX_BACKLOG * 4);
        assert_eq!(config.backlog, MAX_BACKLOG);
    }
}
