// vim: tw=80
//! Fixed-layout wire formats
//!
//! Two binary formats live here.  The *scatter record* is what a scanner
//! batches into blobs for the collectors: a 24-byte little-endian header
//! (byte size, timestamp, path length) followed by the raw path bytes, no
//! padding.  The *enumerator stream* is what the external chunk-enumeration
//! tool writes on its stdout: timestamp, byte size, path length, path bytes,
//! then one padding byte before the next record.

use byteorder::{ByteOrder, LittleEndian};

use crate::types::*;

/// Bytes of fixed header preceding the path in a scatter record
pub const RECORD_HEADER: usize = 24;

/// Append one scatter record to `buf`
pub fn encode_record(buf: &mut Vec<u8>, path: &[u8], byte_size: u64,
                     timestamp: u64)
{
    let mut hdr = [0u8; RECORD_HEADER];
    LittleEndian::write_u64(&mut hdr[0..8], byte_size);
    LittleEndian::write_u64(&mut hdr[8..16], timestamp);
    LittleEndian::write_u64(&mut hdr[16..24], path.len() as u64);
    buf.extend_from_slice(&hdr);
    buf.extend_from_slice(path);
}

/// Encoded size of one scatter record for a path of `path_len` bytes
pub fn record_len(path_len: usize) -> usize {
    RECORD_HEADER + path_len
}

/// One decoded scatter record, borrowing the path from the blob
#[derive(Debug, Eq, PartialEq)]
pub struct Record<'a> {
    pub byte_size: u64,
    pub timestamp: u64,
    pub path: &'a [u8],
}

/// Iterate over the scatter records packed into one blob.
///
/// Yields `Err(Malformed)` and stops if the blob does not divide evenly into
/// records; `src` is only used for the error.
pub fn records(blob: &[u8], src: Rank)
    -> impl Iterator<Item = Result<Record<'_>>>
{
    let mut pos = 0;
    let mut poisoned = false;
    std::iter::from_fn(move || {
        if poisoned || pos >= blob.len() {
            return None;
        }
        if blob.len() - pos < RECORD_HEADER {
            poisoned = true;
            return Some(Err(Error::Malformed(src)));
        }
        let byte_size = LittleEndian::read_u64(&blob[pos..pos + 8]);
        let timestamp = LittleEndian::read_u64(&blob[pos + 8..pos + 16]);
        let path_len =
            LittleEndian::read_u64(&blob[pos + 16..pos + 24]) as usize;
        pos += RECORD_HEADER;
        if blob.len() - pos < path_len {
            poisoned = true;
            return Some(Err(Error::Malformed(src)));
        }
        let path = &blob[pos..pos + path_len];
        pos += path_len;
        Some(Ok(Record { byte_size, timestamp, path }))
    })
}

/// One entry read from the enumerator stream
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanEntry {
    pub timestamp: u64,
    pub byte_size: u64,
    pub path: Vec<u8>,
}

/// Incremental decoder for the enumerator stream.
///
/// Input arrives in arbitrary read-sized pieces; a record split across reads
/// is carried over and retried once more input arrives.  A record that is
/// still incomplete when the stream ends is dropped without error.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    carry: Vec<u8>,
    /// A record was consumed right at the end of the last piece; its padding
    /// byte has not been seen yet.
    skip_pad: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        StreamDecoder::default()
    }

    /// Feed one piece of input, appending all completed entries to `out`
    pub fn feed(&mut self, mut input: &[u8], out: &mut Vec<ScanEntry>) {
        if self.skip_pad && !input.is_empty() {
            input = &input[1..];
            self.skip_pad = false;
        }
        self.carry.extend_from_slice(input);
        let mut pos = 0;
        loop {
            let alive = &self.carry[pos..];
            if alive.len() < 3 * 8 {
                break;
            }
            let timestamp = LittleEndian::read_u64(&alive[0..8]);
            let byte_size = LittleEndian::read_u64(&alive[8..16]);
            let path_len = LittleEndian::read_u64(&alive[16..24]) as usize;
            if alive.len() - 24 < path_len {
                break;
            }
            let path = alive[24..24 + path_len].to_vec();
            out.push(ScanEntry { timestamp, byte_size, path });
            pos += 24 + path_len;
            if pos < self.carry.len() {
                pos += 1;
            } else {
                self.skip_pad = true;
            }
        }
        self.carry.drain(..pos);
    }

    /// End of stream.  Returns the number of carried bytes belonging to an
    /// incomplete trailing record, which is silently discarded.
    pub fn finish(self) -> usize {
        self.carry.len()
    }
}

#[cfg(test)]
mod t {
    use super::*;

    fn enumerator_record(ts: u64, size: u64, path: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        let mut w = [0u8; 8];
        LittleEndian::write_u64(&mut w, ts);
        v.extend_from_slice(&w);
        LittleEndian::write_u64(&mut w, size);
        v.extend_from_slice(&w);
        LittleEndian::write_u64(&mut w, path.len() as u64);
        v.extend_from_slice(&w);
        v.extend_from_slice(path);
        v.push(0);
        v
    }

    mod scatter {
        use super::*;

        #[test]
        fn roundtrip() {
            let mut blob = Vec::new();
            encode_record(&mut blob, b"/a/b", 100, 7);
            encode_record(&mut blob, b"/c", 2000, 8);
            let recs = records(&blob, 2)
                .collect::<Result<Vec<_>>>()
                .unwrap();
            assert_eq!(recs, vec![
                Record { byte_size: 100, timestamp: 7, path: b"/a/b" },
                Record { byte_size: 2000, timestamp: 8, path: b"/c" },
            ]);
        }

        #[test]
        fn truncated_blob() {
            let mut blob = Vec::new();
            encode_record(&mut blob, b"/a/b", 100, 7);
            blob.truncate(blob.len() - 1);
            let r = records(&blob, 2).collect::<Result<Vec<_>>>();
            assert!(matches!(r, Err(Error::Malformed(2))));
        }
    }

    mod stream_decoder {
        use super::*;

        #[test]
        fn whole_records() {
            let mut input = enumerator_record(1, 100, b"/x");
            input.extend(enumerator_record(2, 200, b"/yy"));
            let mut out = Vec::new();
            let mut dec = StreamDecoder::new();
            dec.feed(&input, &mut out);
            assert_eq!(out.len(), 2);
            assert_eq!(out[0].path, b"/x");
            assert_eq!(out[1].byte_size, 200);
            assert_eq!(dec.finish(), 0);
        }

        #[test]
        fn split_across_reads() {
            let mut input = enumerator_record(1, 100, b"/some/long/path");
            input.extend(enumerator_record(2, 200, b"/other"));
            for split in 1..input.len() {
                let mut out = Vec::new();
                let mut dec = StreamDecoder::new();
                dec.feed(&input[..split], &mut out);
                dec.feed(&input[split..], &mut out);
                assert_eq!(out.len(), 2, "split at {split}");
                assert_eq!(out[0].path, b"/some/long/path");
                assert_eq!(out[1].path, b"/other");
                assert_eq!(dec.finish(), 0);
            }
        }

        /// A header that claims 50 path bytes with only 10 present must not
        /// produce an entry, and must not be mistaken for anything else.
        #[test]
        fn truncated_final_record() {
            let mut input = enumerator_record(1, 100, b"/ok");
            let mut bad = [0u8; 8];
            LittleEndian::write_u64(&mut bad, 9);
            input.extend_from_slice(&bad);      // timestamp
            input.extend_from_slice(&bad);      // byte size
            LittleEndian::write_u64(&mut bad, 50);
            input.extend_from_slice(&bad);      // path length: 50
            input.extend_from_slice(b"0123456789");
            let mut out = Vec::new();
            let mut dec = StreamDecoder::new();
            dec.feed(&input, &mut out);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].path, b"/ok");
            assert_eq!(dec.finish(), 34);
        }

        #[test]
        fn missing_trailing_pad() {
            let mut input = enumerator_record(1, 100, b"/x");
            input.pop();
            let mut out = Vec::new();
            let mut dec = StreamDecoder::new();
            dec.feed(&input, &mut out);
            assert_eq!(out.len(), 1);
            assert_eq!(dec.finish(), 0);
        }
    }
}
