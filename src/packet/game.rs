// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bitflags::bitflags;
use md5::{Digest, Md5};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

use crate::packet::SIZE_LEN;

/// Fixed prefix of a game packet:
/// `size:u16 | conn_id:u32 | mid:u8 | aid:u8 | ver:u8 | flag:u8`.
///
/// `size` counts everything after the size field, so a bare header
/// advertises [`GAME_BODY_LEN`].
#[repr(C)]
#[derive(Debug, Default, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct GameHeader {
    pub size: U16<BigEndian>,
    pub conn_id: U32<BigEndian>,
    pub mid: u8,
    pub aid: u8,
    pub ver: u8,
    pub flag: u8,
}

/// Header bytes counted by the size field.
pub const GAME_BODY_LEN: usize = 8;
/// Full header length including the size field.
pub const GAME_HEADER_LEN: usize = SIZE_LEN + GAME_BODY_LEN;
/// MD5 signature length when [`DataFlags::SIGN`] is set.
pub const SIGN_LEN: usize = 16;

bitflags! {
    /// Bits of the game packet's data-flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataFlags: u8 {
        /// An MD5 signature follows the header.
        const SIGN = 0x01;
        /// Signature and payload are XOR-encrypted.
        const XOR = 0x02;
        /// Control command; the command id rides in the `mid` byte.
        const CMD = 0x10;
    }
}

/// Command ids carried in the `mid` byte of a cmd packet.
pub const CMD_PING: u8 = 1;
pub const CMD_REGISTER: u8 = 2;

/// Bidirectional game packet.
///
/// `size(2) | connID(4) | MID(1) | AID(1) | ver(1) | dataflag(1) |
/// [sign(16)] | dataload(N)`. Works as a typed view over any byte
/// container: owned `Vec<u8>` frames on the build path, `&mut [u8]`
/// views over pooled buffers on the read path.
pub struct GamePacket<B>(B);

impl GamePacket<Vec<u8>> {
    pub fn new(data_size: u16) -> Self {
        let mut packet = Self(vec![0u8; SIZE_LEN + data_size as usize]);
        packet.set_data_size(data_size);
        packet
    }

    /// Builds a data packet; the signature, when given, is placed right
    /// after the header and advertised in the flag byte.
    pub fn from_data(data: &[u8], sign: Option<&[u8; SIGN_LEN]>) -> Self {
        let sign_len = if sign.is_some() { SIGN_LEN } else { 0 };
        let mut packet = Self::new((GAME_BODY_LEN + sign_len + data.len()) as u16);
        if let Some(sign) = sign {
            packet.set_data_flag(DataFlags::SIGN.bits());
            packet.0[GAME_HEADER_LEN..GAME_HEADER_LEN + SIGN_LEN].copy_from_slice(sign);
        }
        let at = GAME_HEADER_LEN + sign_len;
        packet.0[at..].copy_from_slice(data);
        packet
    }

    /// Bare control packet carrying `cmd` in the `mid` byte.
    pub fn cmd(cmd: u8) -> Self {
        let mut packet = Self::new(GAME_BODY_LEN as u16);
        packet.set_data_flag(DataFlags::CMD.bits());
        packet.set_mid(cmd);
        packet
    }

    /// The keep-alive packet sent on inter-server links.
    pub fn ping() -> Self {
        Self::cmd(CMD_PING)
    }

    /// Announces a server id right after an inter-server link is dialed.
    pub fn register(sid: u32) -> Self {
        let mut packet = Self::cmd(CMD_REGISTER);
        packet.set_conn_id(sid);
        packet
    }
}

impl<B: AsRef<[u8]>> GamePacket<B> {
    pub fn wrap(bytes: B) -> Self {
        Self(bytes)
    }

    pub fn into_inner(self) -> B {
        self.0
    }

    fn header(&self) -> Option<&GameHeader> {
        GameHeader::ref_from_prefix(self.0.as_ref()).ok().map(|(h, _)| h)
    }

    pub fn data_size(&self) -> u16 {
        self.header().map(|h| h.size.get()).unwrap_or(0)
    }

    pub fn conn_id(&self) -> u32 {
        self.header().map(|h| h.conn_id.get()).unwrap_or(0)
    }

    pub fn mid(&self) -> u8 {
        self.header().map(|h| h.mid).unwrap_or(0)
    }

    pub fn aid(&self) -> u8 {
        self.header().map(|h| h.aid).unwrap_or(0)
    }

    pub fn proto_ver(&self) -> u8 {
        self.header().map(|h| h.ver).unwrap_or(0)
    }

    pub fn data_flag(&self) -> u8 {
        self.header().map(|h| h.flag).unwrap_or(0)
    }

    fn flags(&self) -> DataFlags {
        DataFlags::from_bits_truncate(self.data_flag())
    }

    pub fn has_data_sign(&self) -> bool {
        self.flags().contains(DataFlags::SIGN)
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags().contains(DataFlags::XOR)
    }

    /// Control packet signalled through the flag byte.
    pub fn is_cmd_proto(&self) -> bool {
        self.flags().contains(DataFlags::CMD)
    }

    /// Control packet signalled through the size field: a bare header
    /// carries no proto data at all.
    pub fn is_cmd_size(&self) -> bool {
        self.data_size() as usize == GAME_BODY_LEN
    }

    /// The command id of a cmd packet.
    pub fn cmd_id(&self) -> u8 {
        self.mid()
    }

    pub fn data_sign(&self) -> Option<&[u8]> {
        if !self.has_data_sign() {
            return None;
        }
        self.0.as_ref().get(GAME_HEADER_LEN..GAME_HEADER_LEN + SIGN_LEN)
    }

    pub fn payload(&self) -> &[u8] {
        let at = GAME_HEADER_LEN + if self.has_data_sign() { SIGN_LEN } else { 0 };
        self.0.as_ref().get(at..).unwrap_or(&[])
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Frame-level sanity: the byte run matches the advertised size, the
    /// size covers the header body, and an advertised signature is
    /// actually present.
    pub fn is_valid(&self) -> bool {
        let raw = self.0.as_ref();
        let size = self.data_size() as usize;
        raw.len() >= GAME_HEADER_LEN
            && raw.len() == SIZE_LEN + size
            && size >= GAME_BODY_LEN
            && (!self.has_data_sign() || size >= GAME_BODY_LEN + SIGN_LEN)
    }

    /// MD5 over the payload; what [`GamePacket::data_sign`] is expected to
    /// carry when the sender signs.
    pub fn compute_sign(&self) -> [u8; SIGN_LEN] {
        let mut hasher = Md5::new();
        hasher.update(self.payload());
        hasher.finalize().into()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> GamePacket<B> {
    fn header_mut(&mut self) -> Option<&mut GameHeader> {
        GameHeader::mut_from_prefix(self.0.as_mut()).ok().map(|(h, _)| h)
    }

    pub fn set_data_size(&mut self, data_size: u16) {
        if let Some(h) = self.header_mut() {
            h.size.set(data_size);
        }
    }

    pub fn set_conn_id(&mut self, id: u32) {
        if let Some(h) = self.header_mut() {
            h.conn_id.set(id);
        }
    }

    pub fn set_mid(&mut self, mid: u8) {
        if let Some(h) = self.header_mut() {
            h.mid = mid;
        }
    }

    pub fn set_aid(&mut self, aid: u8) {
        if let Some(h) = self.header_mut() {
            h.aid = aid;
        }
    }

    pub fn set_proto_ver(&mut self, ver: u8) {
        if let Some(h) = self.header_mut() {
            h.ver = ver;
        }
    }

    pub fn set_data_flag(&mut self, flag: u8) {
        if let Some(h) = self.header_mut() {
            h.flag = flag;
        }
    }

    /// XOR-encrypts everything after the header in place and marks the
    /// flag byte. A no-op on frames already marked encrypted.
    pub fn encrypt(&mut self, key: &[u8]) {
        if self.is_encrypted() {
            return;
        }
        self.xor_body(key);
        let flag = self.data_flag() | DataFlags::XOR.bits();
        self.set_data_flag(flag);
    }

    /// Reverses [`GamePacket::encrypt`] and clears the flag bit so the
    /// frame is not decrypted twice along the forwarding path.
    pub fn decrypt(&mut self, key: &[u8]) {
        if !self.is_encrypted() {
            return;
        }
        self.xor_body(key);
        let flag = self.data_flag() & !DataFlags::XOR.bits();
        self.set_data_flag(flag);
    }

    fn xor_body(&mut self, key: &[u8]) {
        if key.is_empty() {
            return;
        }
        let raw = self.0.as_mut();
        if raw.len() <= GAME_HEADER_LEN {
            return;
        }
        for (i, b) in raw[GAME_HEADER_LEN..].iter_mut().enumerate() {
            *b ^= key[i % key.len()];
        }
    }
}
