mod common;

use std::fs;

use erddap_ingest::das::parse_das;
use erddap_ingest::domain::{DatasetId, Protocol};
use erddap_ingest::store::Store;

use common::{BUOY_DAS, temp_store};

#[test]
fn das_cache_write_read_invalidate() {
    let (_temp, store) = temp_store();
    let id: DatasetId = "buoy".parse().unwrap();
    assert!(store.read_das(&id).unwrap().is_none());

    let doc = parse_das(BUOY_DAS);
    let path = store.write_das(&id, &doc).unwrap();
    assert!(path.ends_with("das/buoy.json"));
    assert_eq!(store.read_das(&id).unwrap(), Some(doc));

    assert!(store.invalidate_das(&id).unwrap());
    assert!(store.read_das(&id).unwrap().is_none());

    store.write_das(&id, &parse_das(BUOY_DAS)).unwrap();
    store.clear_das().unwrap();
    assert!(!store.das_root().as_std_path().exists());
}

#[test]
fn corrupt_cache_entry_is_reported() {
    let (_temp, store) = temp_store();
    let id: DatasetId = "buoy".parse().unwrap();
    store.ensure_das_root().unwrap();
    fs::write(store.das_path(&id).as_std_path(), "not json").unwrap();
    assert!(store.read_das(&id).is_err());
}

#[test]
fn clean_scratch_removes_only_data_files() {
    let (_temp, store) = temp_store();
    store.ensure_scratch_root().unwrap();
    let root = store.scratch_root();
    for name in ["a.csv", "notes.txt"] {
        fs::write(root.join(name).as_std_path(), b"x").unwrap();
    }
    let buoy: DatasetId = "buoy".parse().unwrap();
    let glider: DatasetId = "glider".parse().unwrap();
    for path in [
        store.chunk_path(&buoy, Protocol::Tabledap, 0, 2),
        store.chunk_path(&buoy, Protocol::Tabledap, 1, 2),
        store.chunk_path(&glider, Protocol::Griddap, 0, 1),
    ] {
        Store::write_bytes_atomic(&path, b"x").unwrap();
    }
    fs::write(store.dataset_scratch_dir(&glider).join("keep.txt").as_std_path(), b"x").unwrap();

    assert_eq!(store.clean_scratch().unwrap(), 4);
    assert!(root.join("notes.txt").as_std_path().exists());
    assert!(!root.join("a.csv").as_std_path().exists());
    assert!(!store.dataset_scratch_dir(&buoy).as_std_path().exists());
    assert!(store.dataset_scratch_dir(&glider).join("keep.txt").as_std_path().exists());
}

#[test]
fn datasets_with_suffix_like_ids_get_distinct_files() {
    let (_temp, store) = temp_store();
    let buoy: DatasetId = "buoy".parse().unwrap();
    let buoy_1: DatasetId = "buoy_1".parse().unwrap();

    let chunk = store.chunk_path(&buoy, Protocol::Tabledap, 0, 4);
    let single = store.chunk_path(&buoy_1, Protocol::Tabledap, 0, 1);
    assert_ne!(chunk, single);

    Store::write_bytes_atomic(&chunk, b"chunk").unwrap();
    Store::write_bytes_atomic(&single, b"single").unwrap();
    assert_eq!(fs::read(chunk.as_std_path()).unwrap(), b"chunk");
    assert_eq!(fs::read(single.as_std_path()).unwrap(), b"single");
}
