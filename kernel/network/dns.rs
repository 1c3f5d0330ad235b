// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides a minimal DNS client for resolving hostnames to IPv4
//! addresses.
//!
//! Unlike [`tcp`](super::tcp) and [`udp`](super::udp), this module
//! does not wrap a smoltcp socket type, as smoltcp does not include
//! DNS support. Instead, [`resolve`] sends and parses DNS messages
//! directly, using a [`udp::Port`](super::udp::Port) for transport.
//!
//! # Fast paths
//!
//! [`resolve`] recognises two special cases that never touch the
//! network:
//!
//!  - `"localhost"` always resolves to `127.0.0.1`.
//!  - A hostname that is already a dotted-quad IPv4 address (such as
//!    `"10.0.0.1"`) is parsed and returned directly.
//!
//! Anything else is resolved by sending an `A` query to the first
//! DNS server in the interface's DHCP configuration.
//!
//! # Retries
//!
//! DNS is carried over UDP, which is unreliable, so a query that
//! receives no response is retransmitted up to [`MAX_ATTEMPTS`]
//! times, with the timeout doubling after each attempt. A query that
//! is still unanswered after the final attempt fails with
//! [`Error::Timeout`](super::Error::Timeout).
//!
//! A response that is well-formed but negative (for example, an
//! `NXDOMAIN` reply, or a reply with no `A` record) fails with
//! [`Error::ResolutionFailure`](super::Error::ResolutionFailure),
//! which is distinct from a transport-level timeout.

use super::udp;
use super::Error;
use alloc::vec::Vec;
use multitasking::scheduler;
use smoltcp::wire::{IpAddress, IpEndpoint, Ipv4Address};
use time::Duration;

/// The interval between polls while waiting for a response.
///
/// DNS responses are not delivered via a waker here, as a UDP
/// port has no way to wake us only for packets from a specific
/// peer, so we poll at this interval instead.
///
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The UDP port used by DNS servers.
///
const DNS_SERVER_PORT: u16 = 53;

/// The largest number of times a query will be sent before giving
/// up.
///
const MAX_ATTEMPTS: u32 = 4;

/// The timeout used for the first attempt.
///
/// Each subsequent attempt doubles the previous timeout.
///
const INITIAL_TIMEOUT: Duration = Duration::from_millis(500);

/// The largest DNS message we're willing to send or receive.
///
/// This comfortably exceeds the size of any message this client can
/// produce, and is large enough for all but the most heavily-laden
/// responses.
///
const MAX_MESSAGE_SIZE: usize = 512;

/// Standard DNS record type for an IPv4 address.
///
const RECORD_TYPE_A: u16 = 1;

/// Standard DNS record class for the Internet.
///
const RECORD_CLASS_IN: u16 = 1;

/// Resolves `hostname` to its IPv4 address.
///
/// See the [module documentation](self) for the fast paths and
/// retry behaviour this function implements.
///
pub fn resolve(hostname: &str) -> Result<Ipv4Address, Error> {
    if hostname.eq_ignore_ascii_case("localhost") {
        return Ok(Ipv4Address::new(127, 0, 0, 1));
    }

    if let Some(addr) = parse_ipv4_literal(hostname) {
        return Ok(addr);
    }

    let server = dns_server()?;
    let id = query_id();
    let query = encode_query(id, hostname)?;

    let config = udp::Config::default().set_non_blocking();
    let port = config.open(0)?;

    let mut timeout = INITIAL_TIMEOUT;
    let mut buf = [0u8; MAX_MESSAGE_SIZE];
    for attempt in 0..MAX_ATTEMPTS {
        port.send_to(&query, IpEndpoint::new(IpAddress::Ipv4(server), DNS_SERVER_PORT))?;

        let deadline = time::after(timeout);
        loop {
            match port.recv_from(&mut buf[..]) {
                Ok((n, peer)) => {
                    if peer.addr != IpAddress::Ipv4(server) {
                        continue;
                    }

                    match decode_response(id, &buf[..n]) {
                        Some(addr) => return Ok(addr),
                        None => return Err(Error::ResolutionFailure),
                    }
                }
                Err(Error::NotReady) => {
                    if time::now().after(deadline) {
                        break;
                    }

                    scheduler::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(err),
            }
        }

        if attempt + 1 < MAX_ATTEMPTS {
            timeout = timeout * 2;
        }
    }

    Err(Error::Timeout)
}

/// Returns the address of the DNS server to query, using the
/// first DNS server announced in the interface's DHCP
/// configuration.
///
fn dns_server() -> Result<Ipv4Address, Error> {
    let iface = super::InterfaceHandle::new(0);
    let config = iface.dhcp_config().ok_or(Error::NotReady)?;
    config
        .dns_servers
        .iter()
        .find_map(|srv| *srv)
        .ok_or(Error::NotReady)
}

/// Returns a random 16-bit query id.
///
fn query_id() -> u16 {
    let mut buf = [0u8; 2];
    random::read(&mut buf[..]);
    u16::from_be_bytes(buf)
}

/// Parses `hostname` as a dotted-quad IPv4 literal, such as
/// `"192.168.0.1"`.
///
/// Returns `None` if `hostname` is not a valid IPv4 literal.
///
fn parse_ipv4_literal(hostname: &str) -> Option<Ipv4Address> {
    let mut octets = [0u8; 4];
    let mut count = 0;
    for part in hostname.split('.') {
        if count >= 4 {
            return None;
        }

        if part.is_empty() || (part.len() > 1 && part.starts_with('0')) {
            return None;
        }

        octets[count] = part.parse::<u8>().ok()?;
        count += 1;
    }

    if count != 4 {
        return None;
    }

    Some(Ipv4Address::from_bytes(&octets[..]))
}

/// Encodes a standard recursive `A` query for `hostname`.
///
fn encode_query(id: u16, hostname: &str) -> Result<Vec<u8>, Error> {
    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::InvalidAddress);
    }

    let mut msg = Vec::with_capacity(hostname.len() + 16);

    // Header.
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&0x0100u16.to_be_bytes()); // Flags: recursion desired.
    msg.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT.
    msg.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT.
    msg.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT.
    msg.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT.

    // Question: QNAME, QTYPE, QCLASS.
    for label in hostname.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(Error::InvalidAddress);
        }

        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }

    msg.push(0); // Root label.
    msg.extend_from_slice(&RECORD_TYPE_A.to_be_bytes());
    msg.extend_from_slice(&RECORD_CLASS_IN.to_be_bytes());

    Ok(msg)
}

/// Parses a DNS response, returning the first `A` record's address
/// if the response matches `id` and indicates success.
///
/// Returns `None` if the response is for a different query, reports
/// failure (such as `NXDOMAIN`), or cannot be parsed.
///
fn decode_response(id: u16, msg: &[u8]) -> Option<Ipv4Address> {
    if msg.len() < 12 {
        return None;
    }

    let resp_id = u16::from_be_bytes([msg[0], msg[1]]);
    if resp_id != id {
        return None;
    }

    let flags = u16::from_be_bytes([msg[2], msg[3]]);
    let is_response = flags & 0x8000 != 0;
    let rcode = flags & 0x000f;
    if !is_response || rcode != 0 {
        return None;
    }

    let qdcount = u16::from_be_bytes([msg[4], msg[5]]) as usize;
    let ancount = u16::from_be_bytes([msg[6], msg[7]]) as usize;
    if ancount == 0 {
        return None;
    }

    let mut offset = 12;
    for _ in 0..qdcount {
        offset = skip_name(msg, offset)?;
        offset += 4; // QTYPE + QCLASS.
    }

    for _ in 0..ancount {
        offset = skip_name(msg, offset)?;

        if offset + 10 > msg.len() {
            return None;
        }

        let rtype = u16::from_be_bytes([msg[offset], msg[offset + 1]]);
        let rclass = u16::from_be_bytes([msg[offset + 2], msg[offset + 3]]);
        let rdlength = u16::from_be_bytes([msg[offset + 8], msg[offset + 9]]) as usize;
        offset += 10;

        if offset + rdlength > msg.len() {
            return None;
        }

        if rtype == RECORD_TYPE_A && rclass == RECORD_CLASS_IN && rdlength == 4 {
            return Some(Ipv4Address::from_bytes(&msg[offset..offset + 4]));
        }

        offset += rdlength;
    }

    None
}

/// Advances past an encoded name (which may use pointer
/// compression) starting at `offset`, returning the offset of the
/// byte following the name.
///
fn skip_name(msg: &[u8], mut offset: usize) -> Option<usize> {
    loop {
        let len = *msg.get(offset)?;

        if len == 0 {
            return Some(offset + 1);
        }

        if len & 0xc0 == 0xc0 {
            // Pointer compression: a two-byte pointer, and nothing
            // more belongs to this name at this level.
            if offset + 1 >= msg.len() {
                return None;
            }

            return Some(offset + 2);
        }

        if len & 0xc0 != 0 {
            // Reserved label length bits.
            return None;
        }

        offset += 1 + len as usize;
        if offset > msg.len() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_is_not_resolved_over_the_network() {
        assert_eq!(resolve("localhost").unwrap(), Ipv4Address::new(127, 0, 0, 1));
        assert_eq!(resolve("LOCALHOST").unwrap(), Ipv4Address::new(127, 0, 0, 1));
    }

    #[test]
    fn ipv4_literals_are_parsed_directly() {
        assert_eq!(
            parse_ipv4_literal("192.168.0.1"),
            Some(Ipv4Address::new(192, 168, 0, 1))
        );
        assert_eq!(parse_ipv4_literal("0.0.0.0"), Some(Ipv4Address::UNSPECIFIED));
        assert_eq!(parse_ipv4_literal("255.255.255.255"), Some(Ipv4Address::BROADCAST));
    }

    #[test]
    fn non_ipv4_literals_are_rejected() {
        assert_eq!(parse_ipv4_literal("example.com"), None);
        assert_eq!(parse_ipv4_literal("1.2.3"), None);
        assert_eq!(parse_ipv4_literal("1.2.3.4.5"), None);
        assert_eq!(parse_ipv4_literal("1.2.3.256"), None);
        assert_eq!(parse_ipv4_literal("01.2.3.4"), None);
        assert_eq!(parse_ipv4_literal(""), None);
    }

    #[test]
    fn query_encodes_qname_labels_and_counts() {
        let msg = encode_query(0x1234, "example.com").unwrap();
        assert_eq!(&msg[0..2], &0x1234u16.to_be_bytes());
        assert_eq!(&msg[4..6], &1u16.to_be_bytes()); // QDCOUNT == 1.
        assert_eq!(&msg[6..8], &0u16.to_be_bytes()); // ANCOUNT == 0.

        // QNAME: \x07example\x03com\x00.
        let qname = &msg[12..];
        assert_eq!(qname[0], 7);
        assert_eq!(&qname[1..8], b"example");
        assert_eq!(qname[8], 3);
        assert_eq!(&qname[9..12], b"com");
        assert_eq!(qname[12], 0);

        let qtype = u16::from_be_bytes([qname[13], qname[14]]);
        let qclass = u16::from_be_bytes([qname[15], qname[16]]);
        assert_eq!(qtype, RECORD_TYPE_A);
        assert_eq!(qclass, RECORD_CLASS_IN);
    }

    #[test]
    fn overly_long_labels_are_rejected() {
        let label = "a".repeat(64);
        assert!(encode_query(1, &label).is_err());
    }

    fn build_response(id: u16, rcode: u16, answer: Option<Ipv4Address>) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(&id.to_be_bytes());
        let flags = 0x8000 | rcode;
        msg.extend_from_slice(&flags.to_be_bytes());
        msg.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT.
        msg.extend_from_slice(&(answer.is_some() as u16).to_be_bytes()); // ANCOUNT.
        msg.extend_from_slice(&0u16.to_be_bytes());
        msg.extend_from_slice(&0u16.to_be_bytes());

        // Question section, mirrored back as real servers do.
        msg.push(7);
        msg.extend_from_slice(b"example");
        msg.push(3);
        msg.extend_from_slice(b"com");
        msg.push(0);
        msg.extend_from_slice(&RECORD_TYPE_A.to_be_bytes());
        msg.extend_from_slice(&RECORD_CLASS_IN.to_be_bytes());

        if let Some(addr) = answer {
            // Answer name as a compression pointer back to byte 12.
            msg.extend_from_slice(&0xc00cu16.to_be_bytes());
            msg.extend_from_slice(&RECORD_TYPE_A.to_be_bytes());
            msg.extend_from_slice(&RECORD_CLASS_IN.to_be_bytes());
            msg.extend_from_slice(&300u32.to_be_bytes()); // TTL.
            msg.extend_from_slice(&4u16.to_be_bytes()); // RDLENGTH.
            msg.extend_from_slice(&addr.0);
        }

        msg
    }

    #[test]
    fn successful_response_yields_address() {
        let addr = Ipv4Address::new(93, 184, 216, 34);
        let msg = build_response(0x9999, 0, Some(addr));
        assert_eq!(decode_response(0x9999, &msg), Some(addr));
    }

    #[test]
    fn mismatched_id_is_ignored() {
        let msg = build_response(0x9999, 0, Some(Ipv4Address::new(1, 2, 3, 4)));
        assert_eq!(decode_response(0x1111, &msg), None);
    }

    #[test]
    fn nxdomain_yields_no_address() {
        let msg = build_response(42, 3, None); // RCODE 3 == NXDOMAIN.
        assert_eq!(decode_response(42, &msg), None);
    }

    #[test]
    fn empty_answer_section_yields_no_address() {
        let msg = build_response(42, 0, None);
        assert_eq!(decode_response(42, &msg), None);
    }
}
