//! Just enough ISO BMFF walking to read a fragment's decode time.

use crate::errors::TimestampError;
use crate::time::MediaTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxType {
    Moov,
    Trak,
    Mdia,
    Mdhd,
    Moof,
    Traf,
    Tfdt,
    Other([u8; 4]),
}

impl BoxType {
    pub fn from_fourcc(fourcc: [u8; 4]) -> Self {
        match &fourcc {
            b"moov" => BoxType::Moov,
            b"trak" => BoxType::Trak,
            b"mdia" => BoxType::Mdia,
            b"mdhd" => BoxType::Mdhd,
            b"moof" => BoxType::Moof,
            b"traf" => BoxType::Traf,
            b"tfdt" => BoxType::Tfdt,
            _ => BoxType::Other(fourcc),
        }
    }
}

/// A box and a view of its payload.
///
/// `truncated` is set when the declared size runs past the available bytes,
/// which is expected for the last box of a partially fetched segment.
#[derive(Debug, Clone, Copy)]
pub struct Mp4Box<'a> {
    pub box_type: BoxType,
    pub payload: &'a [u8],
    pub truncated: bool,
}

/// Iterates over sibling boxes laid out back to back in `data`.
pub struct BoxIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BoxIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_box(&mut self) -> Result<Mp4Box<'a>, TimestampError> {
        let mut header = Reader::new(&self.data[self.pos..], "box header");
        let size = header.read_u32()? as u64;
        let fourcc = header.read_fourcc()?;
        let (size, header_size) = match size {
            // 64-bit extended size
            1 => (header.read_u64()?, 16u64),
            // extends to the end of the enclosing data
            0 => ((self.data.len() - self.pos) as u64, 8u64),
            size => (size, 8u64),
        };
        if size < header_size {
            return Err(TimestampError::InvalidField { field: "box size" });
        }

        let payload_start = self.pos + header_size as usize;
        let declared_end = (self.pos as u64).saturating_add(size);
        let end = usize::try_from(declared_end)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        self.pos = end;
        Ok(Mp4Box {
            box_type: BoxType::from_fourcc(fourcc),
            payload: &self.data[payload_start.min(end)..end],
            truncated: declared_end > self.data.len() as u64,
        })
    }
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Result<Mp4Box<'a>, TimestampError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let result = self.read_box();
        if result.is_err() {
            self.pos = self.data.len();
        }
        Some(result)
    }
}

/// Length-checked big-endian reads over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], context: &'static str) -> Self {
        Self {
            data,
            pos: 0,
            context,
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], TimestampError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or(TimestampError::Truncated {
                context: self.context,
            })?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn skip(&mut self, count: usize) -> Result<(), TimestampError> {
        if self.data.len() < self.pos + count {
            return Err(TimestampError::Truncated {
                context: self.context,
            });
        }
        self.pos += count;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, TimestampError> {
        Ok(self.take::<1>()?[0])
    }

    fn read_u32(&mut self) -> Result<u32, TimestampError> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    fn read_u64(&mut self) -> Result<u64, TimestampError> {
        Ok(u64::from_be_bytes(self.take()?))
    }

    fn read_fourcc(&mut self) -> Result<[u8; 4], TimestampError> {
        self.take()
    }
}

/// Follow `path` from the top level of `data`, taking the first match at each level.
pub fn find_box<'a>(
    data: &'a [u8],
    path: &[BoxType],
) -> Result<Option<Mp4Box<'a>>, TimestampError> {
    let Some((wanted, rest)) = path.split_first() else {
        return Ok(None);
    };
    for item in BoxIter::new(data) {
        let found = item?;
        if found.box_type != *wanted {
            continue;
        }
        if rest.is_empty() {
            return Ok(Some(found));
        }
        return find_box(found.payload, rest);
    }
    Ok(None)
}

/// Media timescale of the first track, from `moov/trak/mdia/mdhd`.
pub fn timescale(init: &[u8]) -> Result<u32, TimestampError> {
    let mdhd = find_box(
        init,
        &[BoxType::Moov, BoxType::Trak, BoxType::Mdia, BoxType::Mdhd],
    )?
    .ok_or(TimestampError::MissingBox {
        path: "moov/trak/mdia/mdhd",
    })?;

    let mut reader = Reader::new(mdhd.payload, "mdhd");
    let version = reader.read_u8()?;
    reader.skip(3)?;
    // creation and modification times are 64-bit in version 1
    reader.skip(if version == 1 { 16 } else { 8 })?;
    match reader.read_u32()? {
        0 => Err(TimestampError::InvalidField {
            field: "mdhd timescale",
        }),
        timescale => Ok(timescale),
    }
}

/// `baseMediaDecodeTime` of the first track fragment, from `moof/traf/tfdt`.
pub fn base_media_decode_time(segment: &[u8]) -> Result<u64, TimestampError> {
    let tfdt = find_box(segment, &[BoxType::Moof, BoxType::Traf, BoxType::Tfdt])?.ok_or(
        TimestampError::MissingBox {
            path: "moof/traf/tfdt",
        },
    )?;

    let mut reader = Reader::new(tfdt.payload, "tfdt");
    let version = reader.read_u8()?;
    reader.skip(3)?;
    if version == 1 {
        reader.read_u64()
    } else {
        Ok(reader.read_u32()? as u64)
    }
}

/// Start time of a fragment. Without `init` the segment must carry its own
/// `moov` (self-initializing).
pub fn start_time(init: Option<&[u8]>, segment: &[u8]) -> Result<MediaTime, TimestampError> {
    let timescale = timescale(init.unwrap_or(segment))?;
    let decode_time = base_media_decode_time(segment)?;
    Ok(MediaTime::new(decode_time, timescale))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const INIT_SEGMENT: [u8; 48] = [
        0x00, 0x00, 0x00, 0x30, b'm', b'o', b'o', b'v', //
        0x00, 0x00, 0x00, 0x28, b't', b'r', b'a', b'k', //
        0x00, 0x00, 0x00, 0x20, b'm', b'd', b'i', b'a', //
        0x00, 0x00, 0x00, 0x18, b'm', b'd', b'h', b'd', //
        0x00, 0x00, 0x00, 0x00, // version 0, flags
        0x00, 0x00, 0x00, 0x00, // creation time
        0x00, 0x00, 0x00, 0x00, // modification time
        0x00, 0x00, 0x03, 0xe8, // timescale 1000
    ];

    /// Fragment with a version 1 `tfdt` holding `decode_time`.
    pub(crate) fn fragment(decode_time: u64) -> Vec<u8> {
        let mut data = vec![
            0x00, 0x00, 0x00, 0x24, b'm', b'o', b'o', b'f', //
            0x00, 0x00, 0x00, 0x1c, b't', b'r', b'a', b'f', //
            0x00, 0x00, 0x00, 0x14, b't', b'f', b'd', b't', //
            0x01, 0x00, 0x00, 0x00,
        ];
        data.extend_from_slice(&decode_time.to_be_bytes());
        data
    }

    #[test]
    fn test_start_time_from_init_and_fragment() {
        let start = start_time(Some(&INIT_SEGMENT), &fragment(2000)).unwrap();
        assert_eq!(start, MediaTime::new(2, 1));
        assert_eq!(start.as_secs_f64(), 2.0);
    }

    #[test]
    fn test_self_initializing_segment() {
        let mut segment = INIT_SEGMENT.to_vec();
        segment.extend_from_slice(&fragment(190_889_000));
        let start = start_time(None, &segment).unwrap();
        assert_eq!(start, MediaTime::new(190_889, 1));
    }

    #[test]
    fn test_version_0_tfdt() {
        let data = [
            0x00, 0x00, 0x00, 0x20, b'm', b'o', b'o', b'f', //
            0x00, 0x00, 0x00, 0x18, b't', b'r', b'a', b'f', //
            0x00, 0x00, 0x00, 0x10, b't', b'f', b'd', b't', //
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x5f, 0x90,
        ];
        assert_eq!(base_media_decode_time(&data).unwrap(), 90_000);
    }

    #[test]
    fn test_version_1_mdhd() {
        let mut data = vec![
            0x00, 0x00, 0x00, 0x40, b'm', b'o', b'o', b'v', //
            0x00, 0x00, 0x00, 0x38, b't', b'r', b'a', b'k', //
            0x00, 0x00, 0x00, 0x30, b'm', b'd', b'i', b'a', //
            0x00, 0x00, 0x00, 0x28, b'm', b'd', b'h', b'd', //
            0x01, 0x00, 0x00, 0x00,
        ];
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(&48_000u32.to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);
        assert_eq!(timescale(&data).unwrap(), 48_000);
    }

    #[test]
    fn test_truncated_prefix_still_finds_tfdt() {
        let mut data = fragment(4000);
        // declare a much larger moof, as a prefix fetch would see it
        data[0..4].copy_from_slice(&4096u32.to_be_bytes());
        assert_eq!(base_media_decode_time(&data).unwrap(), 4000);
    }

    #[test]
    fn test_missing_and_truncated_boxes() {
        assert_eq!(
            base_media_decode_time(&INIT_SEGMENT),
            Err(TimestampError::MissingBox {
                path: "moof/traf/tfdt"
            })
        );
        let data = fragment(2000);
        assert_eq!(
            base_media_decode_time(&data[..30]),
            Err(TimestampError::Truncated { context: "tfdt" })
        );
        assert_eq!(
            timescale(&data[..5]),
            Err(TimestampError::Truncated {
                context: "box header"
            })
        );
    }
}
