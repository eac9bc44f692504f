#![cfg(unix)]

use clap::Parser;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vanity_grinder::{
    run_search, Args, GrindConfig, Grinder, IterationOutcome, KeygenWorker, Released,
    SearchOutcome, SearchWorker, WorkspaceManager,
};

const FAKE_KEYGEN: &str = r#"#!/bin/sh
case "$1" in
  grind)
    echo "grind args: $*"
    echo "progress line" >&2
    if [ -r /proc/$$/stat ]; then
      read -r stat < /proc/$$/stat
      set -- $stat
      echo "pid=$1 pgrp=$5"
    fi
    i=1
    body=""
    while [ "$i" -le 64 ]; do
      if [ -z "$body" ]; then body="$i"; else body="$body,$i"; fi
      i=$((i + 1))
    done
    printf '[%s]' "$body" > FakeKey1ab.json
    ;;
  pubkey)
    basename "$2" .json
    ;;
  *)
    exit 2
    ;;
esac
"#;

const FAILING_KEYGEN: &str = "#!/bin/sh\necho \"out of memory\"\nexit 7\n";

fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

// Kept as one test so only a single thread ever forks while the scripts are
// freshly written.
#[test]
fn keygen_worker_drives_external_binary() {
    let dir = TempDir::new().expect("temp dir");
    let fake = install_script(dir.path(), "fake-keygen", FAKE_KEYGEN);
    let failing = install_script(dir.path(), "failing-keygen", FAILING_KEYGEN);

    let worker = KeygenWorker::new(fake.display().to_string());
    worker.ensure_available().expect("fake tool available");

    let root = dir.path().join("workspaces");
    let args = Args::try_parse_from([
        "vanity-grinder".to_string(),
        "--pattern".to_string(),
        "ab:1".to_string(),
        "--threads".to_string(),
        "2".to_string(),
        "--workspace-root".to_string(),
        root.display().to_string(),
        "--database-url".to_string(),
        format!("sqlite://{}", dir.path().join("keys.db").display()),
    ])
    .expect("parse args");
    let config = GrindConfig::from_args(&args);

    let workspace = WorkspaceManager::new(&root).acquire().expect("workspace");
    let outcome = run_search(&worker, &config.grind_request(), &workspace);
    let artifact = workspace.path().join("FakeKey1ab.json");
    assert_eq!(
        outcome,
        SearchOutcome::Success {
            artifacts: vec![artifact.clone()]
        }
    );
    let log = fs::read_to_string(workspace.log_path()).expect("log");
    assert!(log.contains("grind args: grind --ends-with ab:1 --num-threads 2"));
    assert!(log.contains("progress line"));
    #[cfg(target_os = "linux")]
    {
        // A terminal interrupt must not reach the search process.
        let ids: Vec<&str> = log
            .lines()
            .find(|line| line.starts_with("pid="))
            .expect("process ids in log")
            .split(' ')
            .filter_map(|field| field.split_once('=').map(|(_, value)| value))
            .collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
    }
    assert_eq!(
        worker.derive_public_key(&artifact).expect("pubkey"),
        "FakeKey1ab"
    );

    let mut grinder = Grinder::new(&config, worker);
    let report = grinder.run_iteration().expect("iteration");
    assert_eq!(report.outcome, IterationOutcome::Clean);
    assert_eq!(report.released, Released::Removed);
    let row = grinder
        .gate()
        .store()
        .expect("store")
        .keypair("FakeKey1ab")
        .expect("query")
        .expect("row");
    let expected: String = (1..=64u8).map(|b| format!("{b:02x}")).collect();
    assert_eq!(row.private_key_hex, expected);

    let failing_worker = KeygenWorker::new(failing.display().to_string());
    let workspace = WorkspaceManager::new(&root).acquire().expect("workspace");
    assert_eq!(
        run_search(&failing_worker, &config.grind_request(), &workspace),
        SearchOutcome::WorkerFailed {
            reason: "worker exited with code 7".to_string()
        }
    );
    assert!(failing_worker
        .derive_public_key(&workspace.path().join("none.json"))
        .is_err());
}
