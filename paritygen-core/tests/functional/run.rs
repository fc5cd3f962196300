// vim: tw=80
//! Whole-cluster scenarios

use pretty_assertions::assert_eq;

use paritygen_core::{
    record::ChunkRecord,
    runner::{OperationMode, RunConfig},
    scan::route,
    store::{FileStore, MetadataStore},
};

use super::*;

fn config(mode: OperationMode) -> RunConfig {
    RunConfig {
        mode,
        transfer_buffer: 64,
        ..RunConfig::default()
    }
}

/// The collector holding `path`'s record, by the routing hash
fn stored_record(roots: &[TempDir], path: &Path, ntargets: usize)
    -> Option<ChunkRecord>
{
    let st = route(path.to_str().unwrap().as_bytes(), ntargets) as usize;
    let store = FileStore::open(roots[st].path()).unwrap();
    store.get(path.to_str().unwrap()).unwrap()
}

/// A chunk replicated on every target has a full location set: the planner
/// must skip assignment and no parity object may appear.
#[tokio::test(flavor = "multi_thread")]
async fn full_location_set_skips_assignment() {
    let roots = target_roots(2);
    let chunk = write_chunk(roots[0].path(), "f", &[0xA5; 100]);
    // Both targets report the same chunk path
    let rec = stream_record(7, 100, &chunk);
    write_stream(roots[0].path(), &[rec.clone()]);
    write_stream(roots[1].path(), &[rec]);

    let outcome = run_cluster(&roots, config(OperationMode::Complete)).await;
    assert_eq!(outcome.scan_failures, 0);

    let stored = stored_record(&roots, &chunk, 2).unwrap();
    assert_eq!(stored.locations.owner(), None);
    assert_eq!(stored.locations.members().collect::<Vec<_>>(), vec![0, 1]);
    assert!(!roots[0].path().join("parity").exists());
}

/// One source and one owner: the parity object is the source bytes zero
/// padded to whole windows, behind an 8-byte true-size header.
#[tokio::test(flavor = "multi_thread")]
async fn single_source_parity_is_identity() {
    let roots = target_roots(3);
    let data = (0..100u8).collect::<Vec<_>>();
    let chunk = write_chunk(roots[0].path(), "obj", &data);
    write_stream(roots[0].path(), &[stream_record(7, 100, &chunk)]);

    let outcome = run_cluster(&roots, config(OperationMode::Complete)).await;
    assert_eq!(outcome.scan_failures, 0);

    let stored = stored_record(&roots, &chunk, 3).unwrap();
    let owner = stored.locations.owner().unwrap();
    assert!(owner == 1 || owner == 2);

    // Window 64 bytes, so ceil(100/64) = 2 windows
    let parity = std::fs::read(roots[0].path().join("parity/obj")).unwrap();
    assert_eq!(parity.len(), 8 + 128);
    assert_eq!(&parity[..8], &100u64.to_le_bytes());
    assert_eq!(&parity[8..108], &data[..]);
    assert!(parity[108..].iter().all(|b| *b == 0));
}

/// A parity owner, once persisted, survives a rescan that knows nothing
/// about it.
#[tokio::test(flavor = "multi_thread")]
async fn persisted_owner_preserved() {
    let roots = target_roots(3);
    let data = vec![0x3Cu8; 100];
    let chunk = write_chunk(roots[0].path(), "obj", &data);
    let path = chunk.to_str().unwrap();
    write_stream(roots[0].path(), &[stream_record(9, 100, &chunk)]);

    // History: target 2 already owns this chunk's parity
    let st = route(path.as_bytes(), 3) as usize;
    {
        let mut prev = ChunkRecord::new();
        prev.observe(0, 100, 5);
        prev.locations.set_owner(2);
        let mut store = FileStore::open(roots[st].path()).unwrap();
        store.set(path, &prev).unwrap();
        store.flush().unwrap();
    }

    run_cluster(&roots, config(OperationMode::Complete)).await;

    let stored = stored_record(&roots, &chunk, 3).unwrap();
    assert_eq!(stored.locations.owner(), Some(2));
    // Target 2's collector generated the parity
    let parity = std::fs::read(roots[0].path().join("parity/obj")).unwrap();
    assert_eq!(&parity[..8], &100u64.to_le_bytes());
    assert_eq!(&parity[8..108], &data[..]);
}

/// A truncated final record in the enumerator stream is dropped without
/// crashing the scanner or poisoning the run.
#[tokio::test(flavor = "multi_thread")]
async fn truncated_stream_record_tolerated() {
    let roots = target_roots(2);
    let chunk = write_chunk(roots[0].path(), "good", &[1u8; 10]);
    let mut records = vec![stream_record(3, 10, &chunk)];
    // Header claims a 50-byte path but only 10 bytes follow
    let mut bogus = Vec::new();
    bogus.extend_from_slice(&4u64.to_le_bytes());
    bogus.extend_from_slice(&20u64.to_le_bytes());
    bogus.extend_from_slice(&50u64.to_le_bytes());
    bogus.extend_from_slice(b"0123456789");
    records.push(bogus);
    write_stream(roots[0].path(), &records);

    let outcome = run_cluster(&roots, config(OperationMode::Complete)).await;
    assert_eq!(outcome.scan_failures, 0);

    let stored = stored_record(&roots, &chunk, 2).unwrap();
    assert_eq!(stored.max_chunk_size, 10);
    assert_eq!(stored.locations.members().collect::<Vec<_>>(), vec![0]);
}

/// Partial mode drives the ranged enumerator and still completes the
/// pipeline.
#[tokio::test(flavor = "multi_thread")]
async fn partial_mode_processes_range() {
    let roots = target_roots(2);
    let chunk = write_chunk(roots[0].path(), "obj", &[9u8; 30]);
    write_stream(roots[0].path(), &[stream_record(50, 30, &chunk)]);

    let mode = OperationMode::Partial { from: 0, to: 100 };
    let outcome = run_cluster(&roots, config(mode)).await;
    assert_eq!(outcome.scan_failures, 0);

    let stored = stored_record(&roots, &chunk, 2).unwrap();
    assert_eq!(stored.locations.owner(), Some(1));
    assert_eq!(stored.last_seen, 50);
}
