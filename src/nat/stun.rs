//! Minimal STUN binding request/response wire format (RFC 5389 subset):
//! just enough to learn our server-reflexive address.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use rand::RngCore;

use super::error::StunError;

const MAGIC_COOKIE: u32 = 0x2112_A442;
const MSG_TYPE_BINDING_REQUEST: u16 = 0x0001;
const MSG_TYPE_BINDING_SUCCESS: u16 = 0x0101;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const FAMILY_IPV4: u8 = 0x01;

pub type TransactionId = [u8; 12];

/// Builds a 20-byte STUN Binding Request with a fresh random transaction id.
pub fn encode_binding_request() -> (Vec<u8>, TransactionId) {
    let mut txn_id = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut txn_id);

    let mut buf = Vec::with_capacity(20);
    buf.extend_from_slice(&MSG_TYPE_BINDING_REQUEST.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // length: no attributes
    buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buf.extend_from_slice(&txn_id);

    (buf, txn_id)
}

/// Parses a STUN Binding Success Response, returning the mapped address.
/// Prefers XOR-MAPPED-ADDRESS over plain MAPPED-ADDRESS when both are
/// present, per the design note.
pub fn parse_binding_response(
    data: &[u8],
    expected_txn: &TransactionId,
) -> Result<SocketAddr, StunError> {
    if data.len() < 20 {
        return Err(StunError::ResponseTooShort { len: data.len() });
    }

    let msg_type = u16::from_be_bytes([data[0], data[1]]);
    if msg_type != MSG_TYPE_BINDING_SUCCESS {
        return Err(StunError::UnexpectedMessageType(msg_type));
    }

    let length = u16::from_be_bytes([data[2], data[3]]) as usize;
    let cookie = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if cookie != MAGIC_COOKIE {
        return Err(StunError::MagicCookieMismatch);
    }

    let txn_id = &data[8..20];
    if txn_id != expected_txn {
        return Err(StunError::TransactionIdMismatch);
    }

    let attrs_end = (20 + length).min(data.len());
    let mut offset = 20;
    let mut mapped_address: Option<SocketAddr> = None;
    let mut xor_mapped_address: Option<SocketAddr> = None;

    while offset + 4 <= attrs_end {
        let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let value_start = offset + 4;
        let value_end = value_start + attr_len;
        if value_end > data.len() {
            break;
        }
        let value = &data[value_start..value_end];

        match attr_type {
            ATTR_MAPPED_ADDRESS => {
                if let Ok(addr) = parse_mapped_address(value) {
                    mapped_address = Some(addr);
                }
            }
            ATTR_XOR_MAPPED_ADDRESS => {
                if let Ok(addr) = parse_xor_mapped_address(value) {
                    xor_mapped_address = Some(addr);
                }
            }
            _ => {}
        }

        // attributes are padded to a 4-byte boundary
        let padded_len = (attr_len + 3) & !3;
        offset = value_start + padded_len;
    }

    xor_mapped_address
        .or(mapped_address)
        .ok_or(StunError::MissingMappedAddress)
}

fn parse_mapped_address(value: &[u8]) -> Result<SocketAddr, StunError> {
    if value.len() < 8 {
        return Err(StunError::ResponseTooShort { len: value.len() });
    }
    let family = value[1];
    if family != FAMILY_IPV4 {
        return Err(StunError::UnsupportedAddressFamily(family));
    }
    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = Ipv4Addr::new(value[4], value[5], value[6], value[7]);
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

fn parse_xor_mapped_address(value: &[u8]) -> Result<SocketAddr, StunError> {
    if value.len() < 8 {
        return Err(StunError::ResponseTooShort { len: value.len() });
    }
    let family = value[1];
    if family != FAMILY_IPV4 {
        return Err(StunError::UnsupportedAddressFamily(family));
    }
    let cookie_bytes = MAGIC_COOKIE.to_be_bytes();

    let xport = u16::from_be_bytes([value[2], value[3]]);
    let port = xport ^ u16::from_be_bytes([cookie_bytes[0], cookie_bytes[1]]);

    let mut addr_bytes = [0u8; 4];
    for i in 0..4 {
        addr_bytes[i] = value[4 + i] ^ cookie_bytes[i];
    }
    let ip = Ipv4Addr::from(addr_bytes);
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_xor_mapped_response(txn_id: &TransactionId, ip: Ipv4Addr, port: u16) -> Vec<u8> {
        let cookie_bytes = MAGIC_COOKIE.to_be_bytes();
        let xport = port ^ u16::from_be_bytes([cookie_bytes[0], cookie_bytes[1]]);
        let mut xaddr = [0u8; 4];
        let ip_octets = ip.octets();
        for i in 0..4 {
            xaddr[i] = ip_octets[i] ^ cookie_bytes[i];
        }

        let mut attr_value = vec![0u8, FAMILY_IPV4];
        attr_value.extend_from_slice(&xport.to_be_bytes());
        attr_value.extend_from_slice(&xaddr);

        let mut body = Vec::new();
        body.extend_from_slice(&ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
        body.extend_from_slice(&(attr_value.len() as u16).to_be_bytes());
        body.extend_from_slice(&attr_value);

        let mut packet = Vec::new();
        packet.extend_from_slice(&MSG_TYPE_BINDING_SUCCESS.to_be_bytes());
        packet.extend_from_slice(&(body.len() as u16).to_be_bytes());
        packet.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        packet.extend_from_slice(txn_id);
        packet.extend_from_slice(&body);
        packet
    }

    #[test]
    fn roundtrip_xor_mapped_address() {
        let (_, txn_id) = encode_binding_request();
        let response = build_xor_mapped_response(&txn_id, Ipv4Addr::new(203, 0, 113, 1), 12345);
        let addr = parse_binding_response(&response, &txn_id).unwrap();
        assert_eq!(addr, SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 1), 12345)));
    }

    #[test]
    fn mismatched_transaction_id_rejected() {
        let (_, txn_id) = encode_binding_request();
        let (_, other_txn) = encode_binding_request();
        let response = build_xor_mapped_response(&txn_id, Ipv4Addr::new(1, 2, 3, 4), 1);
        let err = parse_binding_response(&response, &other_txn).unwrap_err();
        assert!(matches!(err, StunError::TransactionIdMismatch));
    }

    #[test]
    fn wrong_magic_cookie_rejected() {
        let (_, txn_id) = encode_binding_request();
        let mut response = build_xor_mapped_response(&txn_id, Ipv4Addr::new(1, 2, 3, 4), 1);
        response[4] = 0xff;
        let err = parse_binding_response(&response, &txn_id).unwrap_err();
        assert!(matches!(err, StunError::MagicCookieMismatch));
    }

    #[test]
    fn request_header_has_expected_shape() {
        let (buf, txn_id) = encode_binding_request();
        assert_eq!(buf.len(), 20);
        assert_eq!(&buf[0..2], &MSG_TYPE_BINDING_REQUEST.to_be_bytes());
        assert_eq!(&buf[4..8], &MAGIC_COOKIE.to_be_bytes());
        assert_eq!(&buf[8..20], &txn_id);
    }
}
