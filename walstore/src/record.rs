//! The framing of a record in a log segment: `[len: u32][crc32: u32][payload: len bytes]`, big
//! endian, where the payload is a json encoded [`Entry`] and the crc covers the payload only.

use std::io;
use std::io::Cursor;
use std::io::Read;

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use kvraft::Entry;

pub(crate) const HEADER_SIZE: usize = 8;

pub(crate) fn encode(entry: &Entry) -> io::Result<Vec<u8>> {
    let payload = serde_json::to_vec(entry)?;

    let mut record = Vec::with_capacity(HEADER_SIZE + payload.len());
    record.write_u32::<BigEndian>(payload.len() as u32)?;
    record.write_u32::<BigEndian>(crc32fast::hash(&payload))?;
    record.extend_from_slice(&payload);
    Ok(record)
}

/// The records decoded from a segment.
#[derive(Debug)]
pub(crate) struct Decoded {
    pub(crate) entries: Vec<Entry>,

    /// The length of the well-formed prefix.
    pub(crate) valid_len: u64,

    /// Why decoding stopped before the end, if it did.
    pub(crate) torn: Option<String>,
}

/// Decode records until the end of `buf` or the first damaged record.
///
/// A record cut short or failing its checksum ends the decoding: it is what a crash in the middle
/// of an append leaves at the tail of the last segment.
pub(crate) fn decode_all(buf: &[u8]) -> io::Result<Decoded> {
    let mut entries = vec![];
    let mut cursor = Cursor::new(buf);

    loop {
        let start = cursor.position();
        let remaining = buf.len() as u64 - start;

        if remaining == 0 {
            return Ok(Decoded {
                entries,
                valid_len: start,
                torn: None,
            });
        }

        if remaining < HEADER_SIZE as u64 {
            return Ok(torn(entries, start, format!("incomplete header at {}", start)));
        }

        let len = cursor.read_u32::<BigEndian>()? as u64;
        let stored_crc = cursor.read_u32::<BigEndian>()?;

        if remaining - (HEADER_SIZE as u64) < len {
            return Ok(torn(entries, start, format!("incomplete payload at {}", start)));
        }

        let mut payload = vec![0; len as usize];
        cursor.read_exact(&mut payload)?;

        let crc = crc32fast::hash(&payload);
        if crc != stored_crc {
            return Ok(torn(
                entries,
                start,
                format!("checksum mismatch at {}: stored {:x}, computed {:x}", start, stored_crc, crc),
            ));
        }

        let entry: Entry = serde_json::from_slice(&payload)?;
        entries.push(entry);
    }
}

fn torn(entries: Vec<Entry>, valid_len: u64, reason: String) -> Decoded {
    Decoded {
        entries,
        valid_len,
        torn: Some(reason),
    }
}
