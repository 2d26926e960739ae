//! Message header serialization and deserialization.
//!
//! Provides the binary encoding of a message envelope for transmission
//! between bus nodes. All multi-byte fields are big-endian.

use std::{
    io::{self, Cursor, Read, Write},
    time::Duration,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use weft_core::{
    error::{Error, Result},
    identifier::Identifier,
    message::{Message, MessageId, Payload, Priority, VerificationBits},
};

/// Encodes a message id and envelope into the provided buffer (appends bytes).
///
/// Layout: class, method, target, source, sequence (u64 each), priority,
/// hop count, verification bits (u8 each), age in microseconds (u64),
/// payload length (u32) and the payload bytes.
pub fn encode_message(
    msg_id: MessageId,
    message: &Message,
    buffer: &mut Vec<u8>,
) -> io::Result<()> {
    buffer.write_u64::<BigEndian>(msg_id.class.value())?;
    buffer.write_u64::<BigEndian>(msg_id.method.value())?;
    buffer.write_u64::<BigEndian>(message.target_id)?;
    buffer.write_u64::<BigEndian>(message.source_id)?;
    buffer.write_u64::<BigEndian>(message.sequence_no)?;
    buffer.write_u8(message.priority.to_u8())?;
    buffer.write_u8(message.hop_count)?;
    buffer.write_u8(message.verification.bits())?;
    buffer.write_u64::<BigEndian>(message.age.as_micros() as u64)?;
    buffer.write_u32::<BigEndian>(message.payload.len() as u32)?;
    buffer.write_all(message.payload.as_slice())?;
    Ok(())
}

/// Decodes a message id and envelope from a byte slice.
pub fn decode_message(data: &[u8]) -> Result<(MessageId, Message)> {
    read_message(data).map_err(|error| Error::Decode(error.to_string()))
}

fn read_message(data: &[u8]) -> io::Result<(MessageId, Message)> {
    let mut cursor = Cursor::new(data);

    let class = Identifier::from_value(cursor.read_u64::<BigEndian>()?);
    let method = Identifier::from_value(cursor.read_u64::<BigEndian>()?);
    let target_id = cursor.read_u64::<BigEndian>()?;
    let source_id = cursor.read_u64::<BigEndian>()?;
    let sequence_no = cursor.read_u64::<BigEndian>()?;
    let priority = Priority::from_u8(cursor.read_u8()?);
    let hop_count = cursor.read_u8()?;
    let verification = VerificationBits::from_bits(cursor.read_u8()?);
    let age = Duration::from_micros(cursor.read_u64::<BigEndian>()?);
    let payload_len = cursor.read_u32::<BigEndian>()? as usize;

    let remaining = data.len().saturating_sub(cursor.position() as usize);
    if payload_len > remaining {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "payload length exceeds buffer",
        ));
    }
    let mut payload = vec![0u8; payload_len];
    cursor.read_exact(&mut payload)?;

    let mut message = Message::with_payload(Payload::from(payload));
    message.target_id = target_id;
    message.source_id = source_id;
    message.sequence_no = sequence_no;
    message.priority = priority;
    message.hop_count = hop_count;
    message.verification = verification;
    message.age = age;

    Ok((MessageId::new(class, method), message))
}
