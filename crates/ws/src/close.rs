//! Close status codes, [RFC 6455 Section 7.4](https://www.rfc-editor.org/rfc/rfc6455#section-7.4).

use crate::error::WsError;

pub const NORMAL: u16 = 1000;
pub const GOING_AWAY: u16 = 1001;
pub const PROTOCOL_ERROR: u16 = 1002;
pub const UNSUPPORTED_DATA: u16 = 1003;
pub const INVALID_PAYLOAD: u16 = 1007;
pub const POLICY_VIOLATION: u16 = 1008;
pub const MESSAGE_TOO_BIG: u16 = 1009;
pub const MANDATORY_EXTENSION: u16 = 1010;
pub const INTERNAL_ERROR: u16 = 1011;

/// Whether `code` may appear in a CLOSE frame received from a peer.
///
/// Accepts the registered codes that an endpoint may send and the
/// 3000-4999 range reserved for libraries and applications. Everything else
/// below 3000, including the "no status" and "abnormal" placeholders 1005
/// and 1006, is rejected.
pub fn is_valid_code(code: u16) -> bool {
    matches!(
        code,
        NORMAL
            | GOING_AWAY
            | PROTOCOL_ERROR
            | UNSUPPORTED_DATA
            | INVALID_PAYLOAD
            | POLICY_VIOLATION
            | MESSAGE_TOO_BIG
            | MANDATORY_EXTENSION
            | INTERNAL_ERROR
            | 3000..=4999
    )
}

/// Picks the status code to echo for a received CLOSE payload.
///
/// An empty payload carries no status and is answered with 1000. A lone
/// byte can't hold a status code.
///
/// # Errors
///
/// [`WsError::InvalidClosePayload`] for a one byte payload and
/// [`WsError::InvalidCloseCode`] for a code outside the allowed set.
pub fn parse_close_payload(payload: &[u8]) -> Result<u16, WsError> {
    match payload {
        [] => Ok(NORMAL),
        [_] => Err(WsError::InvalidClosePayload),
        [hi, lo, ..] => {
            let code = u16::from_be_bytes([*hi, *lo]);
            if is_valid_code(code) { Ok(code) } else { Err(WsError::invalid_close_code(code)) }
        }
    }
}

/// Builds a CLOSE payload: the big-endian code followed by the reason.
pub fn close_payload(code: u16, reason: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + reason.len());
    buf.extend_from_slice(&code.to_be_bytes());
    buf.extend_from_slice(reason);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exactly_the_allowed_codes() {
        let allowed = [1000, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011];
        for code in 1000..3000 {
            assert_eq!(is_valid_code(code), allowed.contains(&code), "code {code}");
        }
        for code in 3000..5000 {
            assert!(is_valid_code(code), "code {code}");
        }
    }

    #[test]
    fn rejects_placeholders_and_out_of_range() {
        for code in [0, 999, 1004, 1005, 1006, 1012, 1013, 1014, 1015, 2999, 5000, u16::MAX] {
            assert!(!is_valid_code(code), "code {code}");
        }
    }

    #[test]
    fn close_payload_parsing() {
        assert_eq!(parse_close_payload(&[]).unwrap(), NORMAL);
        assert_eq!(parse_close_payload(&[0x03, 0xe8]).unwrap(), 1000);
        assert_eq!(parse_close_payload(b"\x0f\xa0bye").unwrap(), 4000);
        assert!(matches!(parse_close_payload(&[0x03]), Err(WsError::InvalidClosePayload)));
        assert!(matches!(parse_close_payload(&[0x03, 0xed]), Err(WsError::InvalidCloseCode { code: 1005 })));
    }

    #[test]
    fn build_payload() {
        assert_eq!(close_payload(1001, b"bye"), b"\x03\xe9bye");
        assert_eq!(close_payload(NORMAL, b""), vec![0x03, 0xe8]);
    }
}
