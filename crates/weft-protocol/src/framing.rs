//! Line-oriented base64 record framing.
//!
//! Stream bridges carry serialized messages over plain byte streams. Each
//! record is the base64 encoding (standard alphabet) of the binary header
//! and payload, terminated by a single newline. The decoder accepts exactly
//! the byte stream produced by the encoder and rejects anything else:
//! records that are not valid base64 fail with [`Error::Framing`], records
//! whose decoded bytes do not form a message fail with `Error::Decode`.

use std::io;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use weft_core::{
    error::{Error, Result},
    message::{Message, MessageId},
};

use crate::codec::{decode_message, encode_message};

/// Encodes a message as one framed record (base64 + `\n`), appending the
/// bytes to `out`.
pub fn encode_record(msg_id: MessageId, message: &Message, out: &mut Vec<u8>) -> io::Result<()> {
    let mut raw = Vec::with_capacity(64 + message.payload.len());
    encode_message(msg_id, message, &mut raw)?;

    let mut encoded = String::with_capacity(raw.len() * 4 / 3 + 4);
    STANDARD.encode_string(&raw, &mut encoded);
    out.extend_from_slice(encoded.as_bytes());
    out.push(b'\n');
    Ok(())
}

/// Decodes one framed record into a message.
///
/// The record may or may not include the terminating newline.
pub fn decode_record(record: &[u8]) -> Result<(MessageId, Message)> {
    let line = match record.split_last() {
        Some((b'\n', rest)) => rest,
        _ => record,
    };
    let raw = STANDARD
        .decode(line)
        .map_err(|error| Error::Framing(error.to_string()))?;
    decode_message(&raw)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use weft_core::{identifier::Identifier, message::Priority};

    use super::*;

    #[test]
    fn test_record_round_trip() {
        let msg_id = MessageId::new(Identifier::new("eagiTest"), Identifier::new("hello"));
        let mut msg = Message::with_payload(vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        msg.set_target_id(77).set_source_id(33).set_sequence_no(5);
        msg.set_priority(Priority::Low);
        msg.age = Duration::from_micros(250);

        let mut record = Vec::new();
        encode_record(msg_id, &msg, &mut record).unwrap();

        assert_eq!(*record.last().unwrap(), b'\n');
        // Everything before the newline is base64 alphabet
        for &b in &record[..record.len() - 1] {
            assert!(
                b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=',
                "unexpected byte {b:#x} in record",
            );
        }

        let (decoded_id, decoded) = decode_record(&record).unwrap();
        assert_eq!(decoded_id, msg_id);
        assert_eq!(decoded.target_id, 77);
        assert_eq!(decoded.source_id, 33);
        assert_eq!(decoded.sequence_no, 5);
        assert_eq!(decoded.priority, Priority::Low);
        assert_eq!(decoded.content(), msg.content());
    }

    #[test]
    fn test_record_without_newline() {
        let msg_id = MessageId::new(Identifier::new("eagiTest"), Identifier::new("bare"));
        let msg = Message::with_payload(vec![0xde, 0xad]);

        let mut record = Vec::new();
        encode_record(msg_id, &msg, &mut record).unwrap();
        record.pop();

        let (decoded_id, decoded) = decode_record(&record).unwrap();
        assert_eq!(decoded_id, msg_id);
        assert_eq!(decoded.content(), &[0xde, 0xad]);
    }

    #[test]
    fn test_record_rejects_garbage() {
        assert!(matches!(
            decode_record(b"not base64 at all!\n"),
            Err(Error::Framing(_)),
        ));
        // Valid base64, truncated header
        assert!(matches!(decode_record(b"AAAA\n"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_base64_identity_on_arbitrary_bytes() {
        // encode/decode must be the identity for any payload bytes
        let mut payload = Vec::with_capacity(4096);
        let mut state: u32 = 0x12345678;
        for _ in 0..4096 {
            // xorshift
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            payload.push(state as u8);
        }

        let msg_id = MessageId::new(Identifier::new("eagiTest"), Identifier::new("noise"));
        let msg = Message::with_payload(payload.clone());

        let mut record = Vec::new();
        encode_record(msg_id, &msg, &mut record).unwrap();
        let (_, decoded) = decode_record(&record).unwrap();
        assert_eq!(decoded.content(), payload.as_slice());
    }
}
