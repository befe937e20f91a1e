// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16,
};

use crate::packet::SIZE_LEN;

/// Fixed prefix of a basic packet:
/// `size:u16 | flag:u8`, with `size` counting flag plus payload.
#[repr(C)]
#[derive(Debug, Default, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BasicHeader {
    pub size: U16<BigEndian>,
    pub flag: u8,
}

/// Basic packet, `3 + N` bytes on the wire:
/// `datasize(2) | dataflag(1) | dataload(N)`.
///
/// A thin typed view over any byte container; accessors are total and
/// return zero values on truncated frames.
pub struct BasicPacket<B>(B);

pub const BASIC_HEADER_LEN: usize = SIZE_LEN + 1;

impl BasicPacket<Vec<u8>> {
    /// Allocates a packet whose payload region holds `data_size - 1` bytes.
    pub fn new(data_size: u16) -> Self {
        let mut packet = Self(vec![0u8; SIZE_LEN + data_size as usize]);
        packet.set_data_size(data_size);
        packet
    }

    /// Builds a complete packet from a flag and payload.
    pub fn from_parts(flag: u8, data: &[u8]) -> Self {
        let mut packet = Self::new(1 + data.len() as u16);
        packet.set_data_flag(flag);
        packet.set_payload(data);
        packet
    }
}

impl<B: AsRef<[u8]>> BasicPacket<B> {
    pub fn wrap(bytes: B) -> Self {
        Self(bytes)
    }

    fn header(&self) -> Option<&BasicHeader> {
        BasicHeader::ref_from_prefix(self.0.as_ref()).ok().map(|(h, _)| h)
    }

    pub fn data_size(&self) -> u16 {
        self.header().map(|h| h.size.get()).unwrap_or(0)
    }

    pub fn data_flag(&self) -> u8 {
        self.header().map(|h| h.flag).unwrap_or(0)
    }

    pub fn payload(&self) -> &[u8] {
        self.0.as_ref().get(BASIC_HEADER_LEN..).unwrap_or(&[])
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// A frame is valid when it is exactly as long as its size field claims
    /// and the size covers at least the flag byte.
    pub fn is_valid(&self) -> bool {
        let raw = self.0.as_ref();
        raw.len() >= BASIC_HEADER_LEN
            && raw.len() == SIZE_LEN + self.data_size() as usize
            && self.data_size() >= 1
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BasicPacket<B> {
    fn header_mut(&mut self) -> Option<&mut BasicHeader> {
        BasicHeader::mut_from_prefix(self.0.as_mut()).ok().map(|(h, _)| h)
    }

    pub fn set_data_size(&mut self, data_size: u16) {
        if let Some(h) = self.header_mut() {
            h.size.set(data_size);
        }
    }

    pub fn set_data_flag(&mut self, flag: u8) {
        if let Some(h) = self.header_mut() {
            h.flag = flag;
        }
    }

    pub fn set_payload(&mut self, data: &[u8]) {
        let dst = &mut self.0.as_mut()[BASIC_HEADER_LEN..];
        let n = dst.len().min(data.len());
        dst[..n].copy_from_slice(&data[..n]);
    }
}
