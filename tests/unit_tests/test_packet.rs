// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use gamegate_rs::{
    packet::{
        XOR_KEY,
        basic::BasicPacket,
        game::{CMD_PING, CMD_REGISTER, GAME_HEADER_LEN, GamePacket, SIGN_LEN},
        tunnel::TunnelPacket,
    },
    utils::pack_addr_str,
};
use hex_literal::hex;

#[test]
fn test_basic_packet_layout() {
    let packet = BasicPacket::from_parts(0xAB, b"xyz");
    // size counts flag + payload; flag sits at byte 2, payload from 3.
    assert_eq!(packet.as_bytes(), hex!("0004 AB 78797A"));
    assert_eq!(packet.data_size(), 4);
    assert_eq!(packet.data_flag(), 0xAB);
    assert_eq!(packet.payload(), b"xyz");
    assert!(packet.is_valid());
}

#[test]
fn test_basic_packet_wrap_truncated() {
    let packet = BasicPacket::wrap(&b"\x00"[..]);
    assert_eq!(packet.data_size(), 0);
    assert_eq!(packet.data_flag(), 0);
    assert!(packet.payload().is_empty());
    assert!(!packet.is_valid());
}

#[test]
fn test_tunnel_packet_layout() {
    let addr = pack_addr_str("10.1.2.3:9527").expect("pack addr");
    let packet = TunnelPacket::from_parts(addr, 0x02, b"ok");
    let raw = packet.as_bytes();
    assert_eq!(raw.len(), 2 + 7 + 2);
    // size(2) | addr48(6) | flag(1) | payload.
    assert_eq!(&raw[..2], &[0x00, 0x09]);
    assert_eq!(&raw[2..8], hex!("0A010203 2537"));
    assert_eq!(raw[8], 0x02);
    assert_eq!(&raw[9..], b"ok");
    assert_eq!(packet.addr(), addr);
    assert!(packet.is_valid());
}

#[test]
fn test_game_packet_header_fields() {
    let mut packet = GamePacket::from_data(b"payload", None);
    packet.set_conn_id(0xDEADBEEF);
    packet.set_mid(3);
    packet.set_aid(9);
    packet.set_proto_ver(2);

    assert_eq!(packet.as_bytes().len(), GAME_HEADER_LEN + 7);
    assert_eq!(packet.data_size() as usize, 8 + 7);
    assert_eq!(packet.conn_id(), 0xDEADBEEF);
    assert_eq!(packet.mid(), 3);
    assert_eq!(packet.aid(), 9);
    assert_eq!(packet.proto_ver(), 2);
    assert_eq!(packet.payload(), b"payload");
    assert!(packet.is_valid());
    assert!(!packet.has_data_sign());
    assert!(!packet.is_cmd_proto());
    assert!(!packet.is_cmd_size());
}

#[test]
fn test_game_packet_encrypt_roundtrip() {
    let mut packet = GamePacket::from_data(b"secret stuff", None);
    packet.set_conn_id(7);
    let plain = packet.as_bytes().to_vec();

    packet.encrypt(XOR_KEY);
    assert!(packet.is_encrypted());
    assert_ne!(packet.as_bytes(), &plain[..]);
    // Header stays readable while encrypted.
    assert_eq!(packet.conn_id(), 7);

    // Encrypt is a no-op on an already encrypted frame.
    let once = packet.as_bytes().to_vec();
    packet.encrypt(XOR_KEY);
    assert_eq!(packet.as_bytes(), &once[..]);

    packet.decrypt(XOR_KEY);
    assert!(!packet.is_encrypted());
    assert_eq!(packet.as_bytes(), &plain[..]);

    // Decrypt on a clear frame is a no-op too.
    packet.decrypt(XOR_KEY);
    assert_eq!(packet.as_bytes(), &plain[..]);
}

#[test]
fn test_game_packet_signature() {
    let payload = b"signed payload";
    let sign = GamePacket::from_data(payload, None).compute_sign();
    let packet = GamePacket::from_data(payload, Some(&sign));

    assert!(packet.is_valid());
    assert!(packet.has_data_sign());
    assert_eq!(packet.data_sign(), Some(&sign[..]));
    assert_eq!(packet.payload(), payload);
    assert_eq!(packet.data_size() as usize, 8 + SIGN_LEN + payload.len());
    assert_eq!(packet.compute_sign(), sign);
}

#[test]
fn test_game_packet_sign_flag_without_sign_is_invalid() {
    // A frame advertising a signature must actually carry one.
    let mut packet = GamePacket::from_data(b"abc", None);
    let flag = packet.data_flag() | 0x01;
    packet.set_data_flag(flag);
    assert!(!packet.is_valid());
}

#[test]
fn test_game_packet_cmds() {
    let ping = GamePacket::ping();
    assert!(ping.is_valid());
    assert!(ping.is_cmd_proto());
    assert!(ping.is_cmd_size());
    assert_eq!(ping.cmd_id(), CMD_PING);
    assert_eq!(ping.as_bytes().len(), GAME_HEADER_LEN);

    let register = GamePacket::register(42);
    assert!(register.is_cmd_proto());
    assert_eq!(register.cmd_id(), CMD_REGISTER);
    assert_eq!(register.conn_id(), 42);
}

#[test]
fn test_game_packet_truncated_is_invalid() {
    let packet = GamePacket::from_data(b"abcdef", None);
    let raw = packet.as_bytes();
    let truncated = GamePacket::wrap(&raw[..raw.len() - 1]);
    assert!(!truncated.is_valid());

    let short = GamePacket::wrap(&raw[..4]);
    assert!(!short.is_valid());
    assert_eq!(short.conn_id(), 0);
}
