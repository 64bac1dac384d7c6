use crate::errors::TimestampError;

pub const PACKET_SIZE: usize = 188;
pub const SYNC_BYTE: u8 = 0x47;

/// Header fields of one transport stream packet.
#[derive(Debug, Clone, Copy)]
pub struct TsPacket<'a> {
    pub pid: u16,
    pub payload_unit_start: bool,
    pub payload: Option<&'a [u8]>,
}

impl<'a> TsPacket<'a> {
    /// Parse a packet found at `offset` in the segment. The slice may be
    /// shorter than [`PACKET_SIZE`] when it is the end of a prefix.
    pub fn parse(packet: &'a [u8], offset: usize) -> Result<Self, TimestampError> {
        if packet.len() < 4 {
            return Err(TimestampError::Truncated {
                context: "ts packet header",
            });
        }
        if packet[0] != SYNC_BYTE {
            return Err(TimestampError::SyncByteMissing { offset });
        }

        let payload_unit_start = packet[1] & 0x40 != 0;
        let pid = ((packet[1] as u16 & 0x1f) << 8) | packet[2] as u16;
        let adaptation_field_control = (packet[3] >> 4) & 0x03;

        let mut start = 4;
        if adaptation_field_control & 0x02 != 0 {
            let length = *packet.get(4).ok_or(TimestampError::Truncated {
                context: "adaptation field",
            })?;
            start += 1 + length as usize;
        }
        let payload = (adaptation_field_control & 0x01 != 0 && start < packet.len())
            .then(|| &packet[start..]);

        Ok(Self {
            pid,
            payload_unit_start,
            payload,
        })
    }
}

/// PTS from the optional PES header, `None` if the payload is not a PES
/// packet or carries no PTS.
pub fn parse_pes_pts(payload: &[u8]) -> Result<Option<u64>, TimestampError> {
    if payload.len() < 3 || payload[0..3] != [0x00, 0x00, 0x01] {
        return Ok(None);
    }
    if payload.len() < 9 {
        return Err(TimestampError::Truncated {
            context: "pes header",
        });
    }
    let pts_dts_flags = (payload[7] >> 6) & 0b11;
    if pts_dts_flags & 0b10 == 0 {
        return Ok(None);
    }
    let header_data_len = payload[8] as usize;
    if header_data_len < 5 {
        return Err(TimestampError::InvalidField {
            field: "pes header length",
        });
    }
    let b = payload.get(9..14).ok_or(TimestampError::Truncated {
        context: "pes timestamp",
    })?;
    let pts = (((b[0] >> 1) as u64) & 0x07) << 30
        | ((b[1] as u64) << 22)
        | (((b[2] >> 1) as u64) << 15)
        | ((b[3] as u64) << 7)
        | ((b[4] >> 1) as u64);
    Ok(Some(pts))
}

/// Raw 33-bit PTS of the first PES packet that declares one.
pub fn first_pts(segment: &[u8]) -> Result<u64, TimestampError> {
    for (i, chunk) in segment.chunks(PACKET_SIZE).enumerate() {
        let packet = TsPacket::parse(chunk, i * PACKET_SIZE)?;
        if !packet.payload_unit_start {
            continue;
        }
        let Some(payload) = packet.payload else {
            continue;
        };
        if let Some(pts) = parse_pes_pts(payload)? {
            return Ok(pts);
        }
    }
    Err(TimestampError::NoPresentationTimestamp)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Single short packet with a video PES header and a PTS of 2 seconds.
    pub(crate) const PTS_2S_PACKET: [u8; 18] = [
        0x47, 0x41, 0x01, 0x10, // sync, pusi, pid 0x101, payload only
        0x00, 0x00, 0x01, 0xe0, // start code, video stream
        0x00, 0x00, // packet length
        0x80, 0x80, 0x05, // pts only, header data length 5
        0x21, 0x00, 0x0b, 0x7e, 0x41,
    ];

    /// [`PTS_2S_PACKET`] carrying another PTS.
    pub(crate) fn pts_packet(pts: u64) -> Vec<u8> {
        let mut packet = PTS_2S_PACKET.to_vec();
        packet[13..18].copy_from_slice(&encode_pts(pts));
        packet
    }

    fn encode_pts(pts: u64) -> [u8; 5] {
        [
            0x20 | (((pts >> 30) as u8 & 0x07) << 1) | 1,
            (pts >> 22) as u8,
            (((pts >> 15) as u8 & 0x7f) << 1) | 1,
            (pts >> 7) as u8,
            (((pts & 0x7f) as u8) << 1) | 1,
        ]
    }

    #[test]
    fn test_first_pts_from_short_packet() {
        assert_eq!(first_pts(&PTS_2S_PACKET).unwrap(), 180_000);
        assert_eq!(pts_packet(180_000), PTS_2S_PACKET.to_vec());
        assert_eq!(first_pts(&pts_packet(88_920_000)).unwrap(), 88_920_000);
    }

    #[test]
    fn test_skips_packets_without_pes_start() {
        let mut segment = vec![0xffu8; PACKET_SIZE];
        // PAT packet: pusi set but payload is a table, not a PES
        segment[0..5].copy_from_slice(&[0x47, 0x40, 0x00, 0x10, 0x00]);
        let mut adaptation = vec![0xffu8; PACKET_SIZE];
        // adaptation field only
        adaptation[0..6].copy_from_slice(&[0x47, 0x41, 0x01, 0x20, 0xb7, 0x00]);
        segment.extend_from_slice(&adaptation);

        let mut video = vec![0x47, 0x41, 0x01, 0x30, 0x03, 0x00, 0xff, 0xff];
        video.extend_from_slice(&[0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, 0x80, 0xc0, 0x0a]);
        video.extend_from_slice(&encode_pts(8_589_870_000));
        video.extend_from_slice(&encode_pts(8_589_860_000));
        segment.extend_from_slice(&video);

        assert_eq!(first_pts(&segment).unwrap(), 8_589_870_000);
    }

    #[test]
    fn test_missing_sync_byte() {
        let mut segment = vec![0u8; PACKET_SIZE * 2];
        segment[0] = SYNC_BYTE;
        segment[1] = 0x01;
        assert_eq!(
            first_pts(&segment),
            Err(TimestampError::SyncByteMissing { offset: PACKET_SIZE })
        );
    }

    #[test]
    fn test_no_pts_anywhere() {
        let mut segment = vec![0xffu8; PACKET_SIZE];
        segment[0..4].copy_from_slice(&[0x47, 0x01, 0x01, 0x10]);
        assert_eq!(
            first_pts(&segment),
            Err(TimestampError::NoPresentationTimestamp)
        );
    }

    #[test]
    fn test_truncated_pes_header() {
        assert_eq!(
            first_pts(&PTS_2S_PACKET[..15]),
            Err(TimestampError::Truncated {
                context: "pes timestamp"
            })
        );
    }
}
