// vim: tw=80
//! Broadcast work distribution
//!
//! After planning, each collector in turn broadcasts its finalized worklist
//! to the whole collector group as three collective payloads: an item count,
//! the packed fixed-size records, and the concatenated NUL-terminated paths.
//! Only one collector's worklist is in flight at a time, so every
//! participant sees every decision before anyone executes it.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use crate::comm::{self, Comm, Group};
use crate::record::{ChunkRecord, LocationSet};
use crate::types::*;

/// Bytes per packed record in the broadcast payload
const ITEM_LEN: usize = 24;

/// A finalized, path-keyed worklist in gather-arrival order
pub type Worklist = Vec<(String, ChunkRecord)>;

/// Pack a worklist into its three broadcast payloads
pub fn encode(wl: &Worklist) -> (Bytes, Bytes, Bytes) {
    let mut count = [0u8; 8];
    LittleEndian::write_u64(&mut count, wl.len() as u64);
    let mut records = Vec::with_capacity(wl.len() * ITEM_LEN);
    let mut paths = Vec::new();
    for (path, rec) in wl {
        let mut item = [0u8; ITEM_LEN];
        LittleEndian::write_u64(&mut item[0..8], rec.max_chunk_size);
        LittleEndian::write_u64(&mut item[8..16], rec.last_seen);
        LittleEndian::write_u64(&mut item[16..24], rec.locations.bits());
        records.extend_from_slice(&item);
        paths.extend_from_slice(path.as_bytes());
        paths.push(0);
    }
    (
        Bytes::copy_from_slice(&count),
        Bytes::from(records),
        Bytes::from(paths),
    )
}

/// Rebuild a worklist from its broadcast payloads
pub fn decode(count: &[u8], records: &[u8], paths: &[u8], src: Rank)
    -> Result<Worklist>
{
    if count.len() != 8 {
        return Err(Error::Malformed(src));
    }
    let n = LittleEndian::read_u64(count) as usize;
    if records.len() != n * ITEM_LEN {
        return Err(Error::Malformed(src));
    }
    let mut wl = Vec::with_capacity(n);
    let mut poff = 0;
    for i in 0..n {
        let item = &records[i * ITEM_LEN..(i + 1) * ITEM_LEN];
        let rec = ChunkRecord {
            max_chunk_size: LittleEndian::read_u64(&item[0..8]),
            last_seen: LittleEndian::read_u64(&item[8..16]),
            locations: LocationSet::from_bits(
                LittleEndian::read_u64(&item[16..24])
            ),
        };
        let rest = &paths[poff..];
        let nul = rest.iter().position(|b| *b == 0)
            .ok_or(Error::Malformed(src))?;
        let path = std::str::from_utf8(&rest[..nul])
            .map_err(|_| Error::Malformed(src))?
            .to_string();
        poff += nul + 1;
        wl.push((path, rec));
    }
    Ok(wl)
}

/// One turn of the distribution ring: group rank `root` broadcasts its
/// worklist (`mine`), everyone returns the decoded copy.
pub async fn bcast_list<C: Comm>(comm: &mut C, group: &Group, root: usize,
                                 mine: Option<&Worklist>) -> Result<Worklist>
{
    let payloads = mine.map(encode);
    let src = group.member(root);
    let count = comm::bcast(comm, group, root,
        payloads.as_ref().map(|p| p.0.clone())).await?;
    let records = comm::bcast(comm, group, root,
        payloads.as_ref().map(|p| p.1.clone())).await?;
    let paths = comm::bcast(comm, group, root,
        payloads.as_ref().map(|p| p.2.clone())).await?;
    decode(&count, &records, &paths, src)
}

#[cfg(test)]
mod t {
    use super::*;

    fn sample() -> Worklist {
        let mut r1 = ChunkRecord::new();
        r1.observe(0, 100, 5);
        r1.locations.set_owner(2);
        let mut r2 = ChunkRecord::new();
        r2.observe(1, 9000, 6);
        r2.observe(2, 600, 7);
        vec![
            ("/s/chunks/a".to_string(), r1),
            ("/s/chunks/deeper/b".to_string(), r2),
        ]
    }

    mod codec {
        use super::*;

        #[test]
        fn roundtrip() {
            let wl = sample();
            let (c, r, p) = encode(&wl);
            assert_eq!(decode(&c, &r, &p, 1).unwrap(), wl);
        }

        #[test]
        fn empty() {
            let wl = Worklist::new();
            let (c, r, p) = encode(&wl);
            assert!(r.is_empty());
            assert!(p.is_empty());
            assert_eq!(decode(&c, &r, &p, 1).unwrap(), wl);
        }

        #[test]
        fn short_records_rejected() {
            let (c, r, p) = encode(&sample());
            let e = decode(&c, &r[..r.len() - 1], &p, 3).unwrap_err();
            assert!(matches!(e, Error::Malformed(3)));
        }

        #[test]
        fn missing_nul_rejected() {
            let (c, r, p) = encode(&sample());
            let e = decode(&c, &r, &p[..p.len() - 1], 3).unwrap_err();
            assert!(matches!(e, Error::Malformed(3)));
        }
    }

    mod ring {
        use super::*;
        use crate::comm::mem;

        /// Every member of a 3-rank group sees the broadcaster's list
        #[tokio::test]
        async fn one_turn() {
            let group = Group::new(vec![0, 1, 2]);
            let wl = sample();
            let mut tasks = Vec::new();
            for ep in mem::cluster(3) {
                let group = group.clone();
                let wl = wl.clone();
                tasks.push(tokio::spawn(async move {
                    let mut ep = ep;
                    let mine = (ep.rank() == 1).then_some(&wl);
                    bcast_list(&mut ep, &group, 1, mine).await.unwrap()
                }));
            }
            for t in tasks {
                assert_eq!(t.await.unwrap(), sample());
            }
        }
    }
}
