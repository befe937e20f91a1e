// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;

use crate::{packet::game::GamePacket, route::RouteRequest};

/// A game request lifted out of a wire packet.
///
/// Owns its payload and signature, so it can outlive the pooled frame it
/// was read from and move freely into the router's dispatch task.
#[derive(Debug, Clone)]
pub struct Request {
    pub mid: u8,
    pub aid: u8,
    pub pver: u8,
    pub data: Bytes,
    pub sign: Option<Bytes>,
}

impl Request {
    /// Extracts the request fields from an already decrypted, validated
    /// non-cmd packet.
    pub fn from_packet<B: AsRef<[u8]>>(packet: &GamePacket<B>) -> Self {
        Self {
            mid: packet.mid(),
            aid: packet.aid(),
            pver: packet.proto_ver(),
            data: Bytes::copy_from_slice(packet.payload()),
            sign: packet
                .data_sign()
                .map(Bytes::copy_from_slice),
        }
    }
}

impl RouteRequest for Request {
    fn mid(&self) -> u8 {
        self.mid
    }

    fn aid(&self) -> u8 {
        self.aid
    }

    fn proto_ver(&self) -> u8 {
        self.pver
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn sign(&self) -> Option<&[u8]> {
        self.sign.as_deref()
    }
}
