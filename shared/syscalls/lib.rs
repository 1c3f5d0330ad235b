// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the list of syscalls implemented by the Firefly kernel.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::panic)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]
#![forbid(unsafe_code)]

/// The set of syscalls implemented by the Firefly kernel.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Syscall {
    /// Exit the current thread.
    ExitThread = 0,

    /// Write a message to the current process's
    /// standard output.
    PrintMessage = 3,

    /// Write a message to the current process's
    /// standard error output.
    PrintError = 4,

    /// Read cryptographically-secure pseudorandom
    /// numbers into a memory buffer.
    ReadRandom = 10,

    /// Open a new socket, returning a socket descriptor.
    Socket = 24,

    /// Connect a socket to a remote address.
    SocketConnect = 25,

    /// Bind a socket to a local address.
    SocketBind = 26,

    /// Mark a bound socket as listening for incoming
    /// connections.
    SocketListen = 27,

    /// Accept an incoming connection on a listening
    /// socket.
    SocketAccept = 28,

    /// Resolve a hostname to an IPv4 address.
    GetHostByName = 29,

    /// Read data from a socket into a memory buffer.
    Read = 30,

    /// Write data from a memory buffer to a socket.
    Write = 31,

    /// Close a socket, releasing its resources.
    Close = 32,
    // Ensure new values are added to check_numerical_conversion below.
}

impl Syscall {
    /// Returns the syscall with the given numerical value
    /// or None.
    ///
    pub fn from_usize(num: usize) -> Option<Self> {
        match num {
            0 => Some(Self::ExitThread),
            3 => Some(Self::PrintMessage),
            4 => Some(Self::PrintError),
            10 => Some(Self::ReadRandom),
            24 => Some(Self::Socket),
            25 => Some(Self::SocketConnect),
            26 => Some(Self::SocketBind),
            27 => Some(Self::SocketListen),
            28 => Some(Self::SocketAccept),
            29 => Some(Self::GetHostByName),
            30 => Some(Self::Read),
            31 => Some(Self::Write),
            32 => Some(Self::Close),
            _ => None,
        }
    }
}

/// The set of possible error codes returned by a syscall.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    /// The syscall completed successfully.
    NoError = 0,

    /// The requested syscall does not exist, or has not
    /// been implemented.
    BadSyscall = 1,

    /// An invalid or malformed parameter was provided to
    /// the syscall.
    IllegalParameter = 2,
    // Ensure new values are added to check_numerical_conversion below.
}

impl Error {
    /// Returns the error with the given numerical value
    /// or None.
    ///
    pub fn from_usize(num: usize) -> Option<Self> {
        match num {
            0 => Some(Self::NoError),
            1 => Some(Self::BadSyscall),
            2 => Some(Self::IllegalParameter),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_numerical_conversion() {
        let syscalls = [
            Syscall::ExitThread,
            Syscall::PrintMessage,
            Syscall::PrintError,
            Syscall::ReadRandom,
            Syscall::Socket,
            Syscall::SocketConnect,
            Syscall::SocketBind,
            Syscall::SocketListen,
            Syscall::SocketAccept,
            Syscall::GetHostByName,
            Syscall::Read,
            Syscall::Write,
            Syscall::Close,
        ];

        for syscall in syscalls.iter().copied() {
            assert_eq!(Some(syscall), Syscall::from_usize(syscall as usize));
        }

        let errors = [Error::NoError, Error::BadSyscall, Error::IllegalParameter];

        for error in errors.iter().copied() {
            assert_eq!(Some(error), Error::from_usize(error as usize));
        }
    }
}
