// vim: tw=80
//! End-to-end runs over the in-process fabric.
//!
//! Each test builds real storage roots under a tempdir, installs stub chunk
//! enumerators on `PATH` that replay a canned `stream.bin` from the root,
//! and drives a whole cluster through [`paritygen_core::runner::run_rank`].

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use tempfile::TempDir;

use paritygen_core::{
    comm::{mem, Comm},
    runner::{run_rank, RunConfig, RunOutcome},
    COORDINATOR,
};

mod run;

/// The stub enumerators.  Both ignore their filtering arguments and replay
/// `<root>/stream.bin` verbatim; an absent stream is an empty target.
const ENUMERATORS: &[(&str, &str)] = &[
    ("bp-find-all-chunks",
     "#!/bin/sh\n\
      [ -f \"$1/../stream.bin\" ] && exec cat \"$1/../stream.bin\"\n\
      exit 0\n"),
    ("audit-find-between",
     "#!/bin/sh\n\
      [ -f \"$3/../stream.bin\" ] && exec cat \"$3/../stream.bin\"\n\
      exit 0\n"),
];

/// Put the stub enumerators on `PATH`, once per test process
fn install_enumerators() {
    static BIN: OnceLock<TempDir> = OnceLock::new();
    BIN.get_or_init(|| {
        let td = TempDir::new().unwrap();
        for (name, body) in ENUMERATORS {
            let path = td.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path,
                std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let path = std::env::var("PATH").unwrap();
        std::env::set_var("PATH",
            format!("{}:{path}", td.path().display()));
        td
    });
}

/// A storage root with a `targetID` file and an empty `chunks/` directory.
/// Numeric ids ascend with the index, so target id i maps to `roots[i]`.
fn target_roots(n: usize) -> Vec<TempDir> {
    (0..n)
        .map(|i| {
            let td = TempDir::new().unwrap();
            std::fs::write(td.path().join("targetID"),
                           format!("{}\n", 10 * (i + 1))).unwrap();
            std::fs::create_dir(td.path().join("chunks")).unwrap();
            td
        })
        .collect()
}

/// One enumerator stream record: timestamp, size, path, NUL pad
fn stream_record(ts: u64, size: u64, path: &Path) -> Vec<u8> {
    let bytes = path.to_str().unwrap().as_bytes();
    let mut v = Vec::new();
    v.extend_from_slice(&ts.to_le_bytes());
    v.extend_from_slice(&size.to_le_bytes());
    v.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    v.extend_from_slice(bytes);
    v.push(0);
    v
}

fn write_stream(root: &Path, records: &[Vec<u8>]) {
    let blob = records.concat();
    std::fs::write(root.join("stream.bin"), blob).unwrap();
}

/// A chunk replica under `<root>/chunks/<name>`, returning its full path
fn write_chunk(root: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = root.join("chunks").join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Drive a whole cluster to completion and return the coordinator's outcome
async fn run_cluster(roots: &[TempDir], config: RunConfig) -> RunOutcome {
    install_enumerators();
    let config = Arc::new(config);
    let mut tasks = Vec::new();
    for ep in mem::cluster(1 + 2 * roots.len()) {
        let config = config.clone();
        let root = (ep.rank() != COORDINATOR).then(|| {
            roots[(ep.rank() as usize - 1) / 2].path().to_path_buf()
        });
        tasks.push(tokio::spawn(run_rank(ep, config, root)));
    }
    let mut outcome = RunOutcome::default();
    for (rank, t) in tasks.into_iter().enumerate() {
        let o = t.await.unwrap()
            .unwrap_or_else(|e| panic!("rank {rank} failed: {e}"));
        if rank == COORDINATOR as usize {
            outcome = o;
        }
    }
    outcome
}
