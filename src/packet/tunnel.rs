// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

use crate::packet::SIZE_LEN;

/// Fixed prefix of a tunnel packet:
/// `size:u16 | addr_hi:u32 | addr_lo:u16 | flag:u8`.
///
/// The two addr fields together hold the 48-bit `ip:port` compaction
/// (ipv4 in the high 32 bits, port in the low 16).
#[repr(C)]
#[derive(Debug, Default, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct TunnelHeader {
    pub size: U16<BigEndian>,
    pub addr_hi: U32<BigEndian>,
    pub addr_lo: U16<BigEndian>,
    pub flag: u8,
}

pub const TUNNEL_HEADER_LEN: usize = SIZE_LEN + 7;

/// Tunnel packet, `9 + N` bytes on the wire:
/// `datasize(2) | client address(6, ip:port) | dataflag(1) | dataload(N)`.
pub struct TunnelPacket<B>(B);

impl TunnelPacket<Vec<u8>> {
    pub fn new(data_size: u16) -> Self {
        let mut packet = Self(vec![0u8; SIZE_LEN + data_size as usize]);
        packet.set_data_size(data_size);
        packet
    }

    pub fn from_parts(addr: u64, flag: u8, data: &[u8]) -> Self {
        let mut packet = Self::new(7 + data.len() as u16);
        packet.set_addr(addr);
        packet.set_data_flag(flag);
        packet.set_payload(data);
        packet
    }
}

impl<B: AsRef<[u8]>> TunnelPacket<B> {
    pub fn wrap(bytes: B) -> Self {
        Self(bytes)
    }

    fn header(&self) -> Option<&TunnelHeader> {
        TunnelHeader::ref_from_prefix(self.0.as_ref()).ok().map(|(h, _)| h)
    }

    pub fn data_size(&self) -> u16 {
        self.header().map(|h| h.size.get()).unwrap_or(0)
    }

    pub fn addr(&self) -> u64 {
        self.header()
            .map(|h| (u64::from(h.addr_hi.get()) << 16) | u64::from(h.addr_lo.get()))
            .unwrap_or(0)
    }

    pub fn data_flag(&self) -> u8 {
        self.header().map(|h| h.flag).unwrap_or(0)
    }

    pub fn payload(&self) -> &[u8] {
        self.0.as_ref().get(TUNNEL_HEADER_LEN..).unwrap_or(&[])
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        let raw = self.0.as_ref();
        raw.len() >= TUNNEL_HEADER_LEN
            && raw.len() == SIZE_LEN + self.data_size() as usize
            && self.data_size() >= 7
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TunnelPacket<B> {
    fn header_mut(&mut self) -> Option<&mut TunnelHeader> {
        TunnelHeader::mut_from_prefix(self.0.as_mut()).ok().map(|(h, _)| h)
    }

    pub fn set_data_size(&mut self, data_size: u16) {
        if let Some(h) = self.header_mut() {
            h.size.set(data_size);
        }
    }

    pub fn set_addr(&mut self, addr: u64) {
        if let Some(h) = self.header_mut() {
            h.addr_hi.set(((addr >> 16) & 0xFFFF_FFFF) as u32);
            h.addr_lo.set((addr & 0xFFFF) as u16);
        }
    }

    pub fn set_data_flag(&mut self, flag: u8) {
        if let Some(h) = self.header_mut() {
            h.flag = flag;
        }
    }

    pub fn set_payload(&mut self, data: &[u8]) {
        let dst = &mut self.0.as_mut()[TUNNEL_HEADER_LEN..];
        let n = dst.len().min(data.len());
        dst[..n].copy_from_slice(&data[..n]);
    }
}
