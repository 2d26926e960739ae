//! Wire payload codecs for control messages.
//!
//! The special messages interpreted by routers and bridges carry compact
//! binary payloads. Each payload type here provides `encode` and `decode`
//! in the same style as the header codec; all fields are big-endian.
//! Malformed payloads decode to [`Error::Decode`].

use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use weft_core::{
    connection::{ConnectionKind, ConnectionStatistics},
    error::{Error, Result},
    identifier::Identifier,
    message::{EndpointId, MessageId, Payload},
};

fn decode_with<T>(
    data: &[u8],
    read: impl FnOnce(&mut Cursor<&[u8]>) -> io::Result<T>,
) -> Result<T> {
    let mut cursor = Cursor::new(data);
    read(&mut cursor).map_err(|error| Error::Decode(error.to_string()))
}

/// Encodes a message id for subscription payloads.
pub fn encode_message_id(msg_id: MessageId, buffer: &mut Vec<u8>) -> io::Result<()> {
    buffer.write_u64::<BigEndian>(msg_id.class.value())?;
    buffer.write_u64::<BigEndian>(msg_id.method.value())?;
    Ok(())
}

/// Decodes a message id from a subscription payload.
pub fn decode_message_id(data: &[u8]) -> Result<MessageId> {
    decode_with(data, |cursor| {
        let class = Identifier::from_value(cursor.read_u64::<BigEndian>()?);
        let method = Identifier::from_value(cursor.read_u64::<BigEndian>()?);
        Ok(MessageId::new(class, method))
    })
}

/// Describes one link of a router in topology responses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouterTopologyInfo {
    /// Id of the responding router.
    pub router_id: EndpointId,
    /// Id of the node on the other side of the link.
    pub remote_id: EndpointId,
    /// Process instance id of the responding router.
    pub instance_id: u64,
    /// Kind of the link's connection.
    pub connection_kind: ConnectionKind,
}

impl RouterTopologyInfo {
    /// Encodes the topology record into the buffer.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.write_u64::<BigEndian>(self.router_id)?;
        buffer.write_u64::<BigEndian>(self.remote_id)?;
        buffer.write_u64::<BigEndian>(self.instance_id)?;
        buffer.write_u8(self.connection_kind.to_u8())?;
        Ok(())
    }

    /// Decodes a topology record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode_with(data, |cursor| {
            Ok(Self {
                router_id: cursor.read_u64::<BigEndian>()?,
                remote_id: cursor.read_u64::<BigEndian>()?,
                instance_id: cursor.read_u64::<BigEndian>()?,
                connection_kind: ConnectionKind::from_u8(cursor.read_u8()?),
            })
        })
    }
}

/// Describes a bridge and its stream peer in topology responses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeTopologyInfo {
    /// Id of the responding bridge.
    pub bridge_id: EndpointId,
    /// Id of the bridge on the opposite end of the byte stream.
    pub opposite_id: EndpointId,
    /// Process instance id of the responding bridge.
    pub instance_id: u64,
}

impl BridgeTopologyInfo {
    /// Encodes the topology record into the buffer.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.write_u64::<BigEndian>(self.bridge_id)?;
        buffer.write_u64::<BigEndian>(self.opposite_id)?;
        buffer.write_u64::<BigEndian>(self.instance_id)?;
        Ok(())
    }

    /// Decodes a topology record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode_with(data, |cursor| {
            Ok(Self {
                bridge_id: cursor.read_u64::<BigEndian>()?,
                opposite_id: cursor.read_u64::<BigEndian>()?,
                instance_id: cursor.read_u64::<BigEndian>()?,
            })
        })
    }
}

/// Counters accumulated by a router, reported on stats queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouterStatistics {
    /// Total messages forwarded on any link.
    pub forwarded_messages: i64,
    /// Total messages dropped (age, hops, failed sends).
    pub dropped_messages: i64,
    /// Rolling messages-per-second over the stats window.
    pub messages_per_second: i32,
    /// Smoothed average message age in microseconds.
    pub message_age_us: i32,
    /// Seconds since the router started.
    pub uptime_seconds: i64,
}

impl RouterStatistics {
    /// Encodes the statistics record into the buffer.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.write_i64::<BigEndian>(self.forwarded_messages)?;
        buffer.write_i64::<BigEndian>(self.dropped_messages)?;
        buffer.write_i32::<BigEndian>(self.messages_per_second)?;
        buffer.write_i32::<BigEndian>(self.message_age_us)?;
        buffer.write_i64::<BigEndian>(self.uptime_seconds)?;
        Ok(())
    }

    /// Decodes a statistics record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode_with(data, |cursor| {
            Ok(Self {
                forwarded_messages: cursor.read_i64::<BigEndian>()?,
                dropped_messages: cursor.read_i64::<BigEndian>()?,
                messages_per_second: cursor.read_i32::<BigEndian>()?,
                message_age_us: cursor.read_i32::<BigEndian>()?,
                uptime_seconds: cursor.read_i64::<BigEndian>()?,
            })
        })
    }
}

/// Counters accumulated by a bridge, reported on stats queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeStatistics {
    /// Total messages forwarded from the input stream to the connection.
    pub forwarded_messages: i64,
    /// Total messages dropped on the input-to-connection direction.
    pub dropped_messages: i64,
    /// Rolling messages-per-second over the stats window.
    pub messages_per_second: i32,
    /// Average message age in milliseconds.
    pub message_age_milliseconds: i32,
    /// Seconds since the bridge started.
    pub uptime_seconds: i64,
}

impl BridgeStatistics {
    /// Encodes the statistics record into the buffer.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.write_i64::<BigEndian>(self.forwarded_messages)?;
        buffer.write_i64::<BigEndian>(self.dropped_messages)?;
        buffer.write_i32::<BigEndian>(self.messages_per_second)?;
        buffer.write_i32::<BigEndian>(self.message_age_milliseconds)?;
        buffer.write_i64::<BigEndian>(self.uptime_seconds)?;
        Ok(())
    }

    /// Decodes a statistics record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode_with(data, |cursor| {
            Ok(Self {
                forwarded_messages: cursor.read_i64::<BigEndian>()?,
                dropped_messages: cursor.read_i64::<BigEndian>()?,
                messages_per_second: cursor.read_i32::<BigEndian>()?,
                message_age_milliseconds: cursor.read_i32::<BigEndian>()?,
                uptime_seconds: cursor.read_i64::<BigEndian>()?,
            })
        })
    }
}

/// Counters accumulated by an endpoint, reported on stats queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EndpointStatistics {
    /// Total messages sent by the endpoint.
    pub sent_messages: i64,
    /// Total messages received by the endpoint.
    pub received_messages: i64,
    /// Total messages the endpoint dropped unhandled.
    pub dropped_messages: i64,
    /// Seconds since the endpoint started.
    pub uptime_seconds: i64,
}

impl EndpointStatistics {
    /// Encodes the statistics record into the buffer.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.write_i64::<BigEndian>(self.sent_messages)?;
        buffer.write_i64::<BigEndian>(self.received_messages)?;
        buffer.write_i64::<BigEndian>(self.dropped_messages)?;
        buffer.write_i64::<BigEndian>(self.uptime_seconds)?;
        Ok(())
    }

    /// Decodes a statistics record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode_with(data, |cursor| {
            Ok(Self {
                sent_messages: cursor.read_i64::<BigEndian>()?,
                received_messages: cursor.read_i64::<BigEndian>()?,
                dropped_messages: cursor.read_i64::<BigEndian>()?,
                uptime_seconds: cursor.read_i64::<BigEndian>()?,
            })
        })
    }
}

/// Encodes connection statistics for `statsConn` responses.
pub fn encode_connection_statistics(
    stats: &ConnectionStatistics,
    buffer: &mut Vec<u8>,
) -> io::Result<()> {
    buffer.write_u64::<BigEndian>(stats.local_id)?;
    buffer.write_u64::<BigEndian>(stats.remote_id)?;
    buffer.write_f32::<BigEndian>(stats.block_usage_ratio)?;
    buffer.write_f32::<BigEndian>(stats.bytes_per_second)?;
    Ok(())
}

/// Decodes connection statistics from a `statsConn` payload.
pub fn decode_connection_statistics(data: &[u8]) -> Result<ConnectionStatistics> {
    decode_with(data, |cursor| {
        Ok(ConnectionStatistics {
            local_id: cursor.read_u64::<BigEndian>()?,
            remote_id: cursor.read_u64::<BigEndian>()?,
            block_usage_ratio: cursor.read_f32::<BigEndian>()?,
            bytes_per_second: cursor.read_f32::<BigEndian>()?,
        })
    })
}

/// Average message age advertised to endpoints for flow control.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageFlowInfo {
    /// Average message age in milliseconds.
    pub avg_msg_age_ms: u32,
}

impl MessageFlowInfo {
    /// Encodes the flow record into the buffer.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.write_u32::<BigEndian>(self.avg_msg_age_ms)?;
        Ok(())
    }

    /// Decodes a flow record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode_with(data, |cursor| {
            Ok(Self { avg_msg_age_ms: cursor.read_u32::<BigEndian>()? })
        })
    }
}

/// One fragment of a blob in transfer.
///
/// Besides the fragment window, the payload carries the message id of the
/// blob content so the final target can dispatch the completed blob without
/// any out-of-band state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobFragment {
    /// Message id of the blob content.
    pub content_id: MessageId,
    /// Id assigned to the blob by the target side.
    pub blob_id: u64,
    /// Byte offset of this fragment within the blob.
    pub offset: u64,
    /// Total size of the blob in bytes.
    pub total_size: u64,
    /// The fragment bytes.
    pub data: Payload,
}

impl BlobFragment {
    /// Encodes the fragment into the buffer.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.write_u64::<BigEndian>(self.content_id.class.value())?;
        buffer.write_u64::<BigEndian>(self.content_id.method.value())?;
        buffer.write_u64::<BigEndian>(self.blob_id)?;
        buffer.write_u64::<BigEndian>(self.offset)?;
        buffer.write_u64::<BigEndian>(self.total_size)?;
        buffer.write_u32::<BigEndian>(self.data.len() as u32)?;
        buffer.write_all(self.data.as_slice())?;
        Ok(())
    }

    /// Decodes a fragment.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode_with(data, |cursor| {
            let class = Identifier::from_value(cursor.read_u64::<BigEndian>()?);
            let method = Identifier::from_value(cursor.read_u64::<BigEndian>()?);
            let blob_id = cursor.read_u64::<BigEndian>()?;
            let offset = cursor.read_u64::<BigEndian>()?;
            let total_size = cursor.read_u64::<BigEndian>()?;
            let len = cursor.read_u32::<BigEndian>()? as usize;
            let remaining = data.len().saturating_sub(cursor.position() as usize);
            if len > remaining {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "fragment length exceeds buffer",
                ));
            }
            let mut bytes = vec![0u8; len];
            cursor.read_exact(&mut bytes)?;
            Ok(Self {
                content_id: MessageId::new(class, method),
                blob_id,
                offset,
                total_size,
                data: Payload::from(bytes),
            })
        })
    }
}

/// Request to resend a missing window of a blob.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlobResendRequest {
    /// Id assigned to the blob by the target side.
    pub blob_id: u64,
    /// Byte offset of the missing window.
    pub offset: u64,
    /// Length of the missing window in bytes.
    pub length: u64,
}

impl BlobResendRequest {
    /// Encodes the resend request into the buffer.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.write_u64::<BigEndian>(self.blob_id)?;
        buffer.write_u64::<BigEndian>(self.offset)?;
        buffer.write_u64::<BigEndian>(self.length)?;
        Ok(())
    }

    /// Decodes a resend request.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode_with(data, |cursor| {
            Ok(Self {
                blob_id: cursor.read_u64::<BigEndian>()?,
                offset: cursor.read_u64::<BigEndian>()?,
                length: cursor.read_u64::<BigEndian>()?,
            })
        })
    }
}

/// Announcement of an upcoming blob so receivers can size storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobPrepareInfo {
    /// Message id of the blob content.
    pub content_id: MessageId,
    /// Id assigned to the blob by the target side.
    pub blob_id: u64,
    /// Total size of the blob in bytes.
    pub total_size: u64,
    /// Free-form information bytes describing the blob content.
    pub info: Vec<u8>,
}

impl BlobPrepareInfo {
    /// Encodes the prepare record into the buffer.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.write_u64::<BigEndian>(self.content_id.class.value())?;
        buffer.write_u64::<BigEndian>(self.content_id.method.value())?;
        buffer.write_u64::<BigEndian>(self.blob_id)?;
        buffer.write_u64::<BigEndian>(self.total_size)?;
        buffer.write_u32::<BigEndian>(self.info.len() as u32)?;
        buffer.write_all(&self.info)?;
        Ok(())
    }

    /// Decodes a prepare record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode_with(data, |cursor| {
            let class = Identifier::from_value(cursor.read_u64::<BigEndian>()?);
            let method = Identifier::from_value(cursor.read_u64::<BigEndian>()?);
            let blob_id = cursor.read_u64::<BigEndian>()?;
            let total_size = cursor.read_u64::<BigEndian>()?;
            let len = cursor.read_u32::<BigEndian>()? as usize;
            let remaining = data.len().saturating_sub(cursor.position() as usize);
            if len > remaining {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "info length exceeds buffer",
                ));
            }
            let mut info = vec![0u8; len];
            cursor.read_exact(&mut info)?;
            Ok(Self { content_id: MessageId::new(class, method), blob_id, total_size, info })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_payload_round_trip() {
        let msg_id = MessageId::new(Identifier::new("eagiTest"), Identifier::new("ping"));
        let mut buffer = Vec::new();
        encode_message_id(msg_id, &mut buffer).unwrap();
        assert_eq!(decode_message_id(&buffer).unwrap(), msg_id);
    }

    #[test]
    fn test_truncated_payload_is_a_decode_error() {
        let msg_id = MessageId::new(Identifier::new("eagiTest"), Identifier::new("ping"));
        let mut buffer = Vec::new();
        encode_message_id(msg_id, &mut buffer).unwrap();
        buffer.truncate(5);
        assert!(matches!(decode_message_id(&buffer), Err(Error::Decode(_))));
    }

    #[test]
    fn test_router_topology_round_trip() {
        let info = RouterTopologyInfo {
            router_id: 4096,
            remote_id: 4097,
            instance_id: 0xfeed,
            connection_kind: ConnectionKind::InProcess,
        };
        let mut buffer = Vec::new();
        info.encode(&mut buffer).unwrap();
        assert_eq!(RouterTopologyInfo::decode(&buffer).unwrap(), info);
    }

    #[test]
    fn test_router_statistics_round_trip() {
        let stats = RouterStatistics {
            forwarded_messages: 1_000_000,
            dropped_messages: 17,
            messages_per_second: 1234,
            message_age_us: 250,
            uptime_seconds: 3600,
        };
        let mut buffer = Vec::new();
        stats.encode(&mut buffer).unwrap();
        assert_eq!(RouterStatistics::decode(&buffer).unwrap(), stats);
    }

    #[test]
    fn test_bridge_statistics_round_trip() {
        let stats = BridgeStatistics {
            forwarded_messages: 555,
            dropped_messages: 3,
            messages_per_second: 42,
            message_age_milliseconds: 7,
            uptime_seconds: 120,
        };
        let mut buffer = Vec::new();
        stats.encode(&mut buffer).unwrap();
        assert_eq!(BridgeStatistics::decode(&buffer).unwrap(), stats);
    }

    #[test]
    fn test_endpoint_statistics_round_trip() {
        let stats = EndpointStatistics {
            sent_messages: 10,
            received_messages: 20,
            dropped_messages: 1,
            uptime_seconds: 99,
        };
        let mut buffer = Vec::new();
        stats.encode(&mut buffer).unwrap();
        assert_eq!(EndpointStatistics::decode(&buffer).unwrap(), stats);
    }

    #[test]
    fn test_flow_info_and_connection_statistics_round_trip() {
        let flow = MessageFlowInfo { avg_msg_age_ms: 250 };
        let mut buffer = Vec::new();
        flow.encode(&mut buffer).unwrap();
        assert_eq!(MessageFlowInfo::decode(&buffer).unwrap(), flow);

        let stats = ConnectionStatistics {
            local_id: 4096,
            remote_id: 100,
            block_usage_ratio: 0.25,
            bytes_per_second: 1024.0,
        };
        let mut buffer = Vec::new();
        encode_connection_statistics(&stats, &mut buffer).unwrap();
        let decoded = decode_connection_statistics(&buffer).unwrap();
        assert_eq!(decoded.local_id, stats.local_id);
        assert_eq!(decoded.remote_id, stats.remote_id);
        assert_eq!(decoded.block_usage_ratio, stats.block_usage_ratio);
        assert_eq!(decoded.bytes_per_second, stats.bytes_per_second);
    }

    #[test]
    fn test_blob_prepare_round_trip() {
        let prepare = BlobPrepareInfo {
            content_id: MessageId::new(Identifier::new("test"), Identifier::new("ahead")),
            blob_id: 12,
            total_size: 4096,
            info: b"content description".to_vec(),
        };
        let mut buffer = Vec::new();
        prepare.encode(&mut buffer).unwrap();
        assert_eq!(BlobPrepareInfo::decode(&buffer).unwrap(), prepare);
    }

    #[test]
    fn test_blob_fragment_round_trip() {
        let fragment = BlobFragment {
            content_id: MessageId::new(Identifier::new("test"), Identifier::new("payload")),
            blob_id: 42,
            offset: 2048,
            total_size: 4096,
            data: Payload::from(vec![0xaa; 128]),
        };
        let mut buffer = Vec::new();
        fragment.encode(&mut buffer).unwrap();
        assert_eq!(BlobFragment::decode(&buffer).unwrap(), fragment);
    }

    #[test]
    fn test_blob_resend_round_trip() {
        let request = BlobResendRequest { blob_id: 7, offset: 512, length: 1024 };
        let mut buffer = Vec::new();
        request.encode(&mut buffer).unwrap();
        assert_eq!(BlobResendRequest::decode(&buffer).unwrap(), request);
    }

    #[test]
    fn test_blob_fragment_rejects_bad_length() {
        let fragment = BlobFragment {
            content_id: MessageId::new(Identifier::new("test"), Identifier::new("short")),
            blob_id: 1,
            offset: 0,
            total_size: 16,
            data: Payload::from(vec![1; 16]),
        };
        let mut buffer = Vec::new();
        fragment.encode(&mut buffer).unwrap();
        buffer.truncate(buffer.len() - 8);
        assert!(matches!(BlobFragment::decode(&buffer), Err(Error::Decode(_))));
    }
}
