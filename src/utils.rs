// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{Context, Result};

/// Packs an ipv4 address and a port into the 48-bit tunnel address:
/// the ipv4 octets occupy bits 47..16, the port bits 15..0.
pub fn pack_addr(ip: Ipv4Addr, port: u16) -> u64 {
    (u64::from(u32::from(ip)) << 16) | u64::from(port)
}

/// Reverses [`pack_addr`].
pub fn unpack_addr(addr: u64) -> (Ipv4Addr, u16) {
    let ip = Ipv4Addr::from((addr >> 16) as u32);
    let port = (addr & 0xFFFF) as u16;
    (ip, port)
}

/// Packs an `ip:port` string into the 48-bit tunnel address.
pub fn pack_addr_str(addr: &str) -> Result<u64> {
    let sock: SocketAddrV4 = addr
        .parse()
        .with_context(|| format!("invalid ipv4 address {addr:?}"))?;
    Ok(pack_addr(*sock.ip(), sock.port()))
}

/// Whether the error chain terminates in a network timeout.
///
/// Read loops treat timeouts as idle ticks and keep running; any other
/// transport error tears the session down.
pub fn is_net_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                )
            })
            || cause.downcast_ref::<crate::net::conn::NetTimeout>().is_some()
    })
}
