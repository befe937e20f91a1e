// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;

use crate::{
    packet::{XOR_KEY, game::GamePacket},
    route::OutProtocol,
};

/// A response headed back to a client: routing ids echoed from the
/// request plus the marshalled handler result.
pub struct Response {
    pub conn_id: u32,
    pub mid: u8,
    pub aid: u8,
    pub pver: u8,
    pub pflag: u8,
    pub result: Arc<dyn OutProtocol>,
}

impl Response {
    /// Marshals into an encrypted game packet ready for the wire.
    pub fn into_packet(self) -> Result<GamePacket<Vec<u8>>> {
        let out = self.result.marshal()?;
        let mut packet = GamePacket::from_data(&out, None);
        packet.set_conn_id(self.conn_id);
        packet.set_mid(self.mid);
        packet.set_aid(self.aid);
        packet.set_proto_ver(self.pver);
        packet.set_data_flag(self.pflag);
        packet.encrypt(XOR_KEY);
        Ok(packet)
    }
}
