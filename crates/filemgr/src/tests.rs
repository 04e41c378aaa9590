use super::*;
use common::{KeyFlags, OpenMode};
use tempfile::tempdir;
use types::{KeySegment, KeyType};

fn unsigned_key(position: u16, length: u16, flags: KeyFlags) -> KeyDescriptor {
    KeyDescriptor {
        position,
        length,
        key_type: KeyType::Unsigned,
        flags,
        null_value: 0,
    }
}

fn key_of(value: u32, len: usize) -> types::CompositeKey {
    let mut bytes = value.to_le_bytes().to_vec();
    bytes.truncate(len);
    vec![KeySegment::new(bytes, KeyType::Unsigned, false)]
}

fn record(id: u32, payload: &[u8; 12]) -> Vec<u8> {
    let mut buf = vec![0u8; 16];
    buf[0..4].copy_from_slice(&id.to_le_bytes());
    buf[4..16].copy_from_slice(payload);
    buf
}

fn unique_file(mgr: &mut FileManager, dir: &std::path::Path, name: &str) -> (FileId, PositionBlock) {
    let descriptors = vec![unsigned_key(0, 4, KeyFlags::empty())];
    mgr.create(dir.join(name), 512, 16, descriptors).unwrap()
}

#[test]
fn create_then_reopen_shares_the_descriptor_and_bumps_ref_count() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, pb) = unique_file(&mut mgr, dir.path(), "a.xtr");
    assert_eq!(pb.file_id, id);

    let (id2, pb2) = mgr.open(dir.path().join("a.xtr"), OpenMode::Normal).unwrap();
    assert_eq!(id2, id);
    assert_eq!(pb2.generation, pb.generation);

    mgr.close(id, TxnId(1)).unwrap();
    mgr.close(id, TxnId(1)).unwrap();
}

#[test]
fn opening_a_missing_file_fails() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let err = mgr.open(dir.path().join("missing.xtr"), OpenMode::Normal).unwrap_err();
    assert!(matches!(err, XtError::FileNotFound));
}

#[test]
fn closing_and_recreating_bumps_the_generation_and_invalidates_old_position_blocks() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, pb) = unique_file(&mut mgr, dir.path(), "b.xtr");
    mgr.close(id, TxnId(1)).unwrap();

    let (id2, pb2) = mgr.open(dir.path().join("b.xtr"), OpenMode::Normal).unwrap();
    assert_eq!(id2, id);
    assert_ne!(pb2.generation, pb.generation);
    assert!(mgr.validate(&pb).is_err());
    assert!(mgr.validate(&pb2).is_ok());
}

#[test]
fn insert_and_get_equal_round_trips() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "c.xtr");

    let rec = record(7, b"hello world!");
    let view = mgr.insert(id, TxnId(1), &rec, LockBias::None).unwrap();
    assert_eq!(view.data, rec);

    let found = mgr.get_equal(id, TxnId(1), 0, &key_of(7, 4), LockBias::None).unwrap().unwrap();
    assert_eq!(found.data, rec);
    assert!(mgr.get_equal(id, TxnId(1), 0, &key_of(8, 4), LockBias::None).unwrap().is_none());
}

#[test]
fn get_equal_with_a_shorter_key_buffer_matches_the_leftmost_stored_prefix() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let descriptors = vec![unsigned_key(0, 4, KeyFlags::DUPLICATES)];
    let (id, _pb) = mgr.create(dir.path().join("c2.xtr"), 512, 16, descriptors).unwrap();

    // Two records whose low byte is 7 but whose full 4-byte key differs.
    mgr.insert(id, TxnId(1), &record(7, b"first_______"), LockBias::None).unwrap();
    mgr.insert(id, TxnId(1), &record(7 + 256, b"second______"), LockBias::None).unwrap();
    mgr.insert(id, TxnId(1), &record(9, b"third_______"), LockBias::None).unwrap();

    // A one-byte probe is shorter than the declared 4-byte key length.
    let probe = vec![KeySegment::new(vec![7u8], KeyType::Unsigned, false)];
    let found = mgr.get_equal(id, TxnId(1), 0, &probe, LockBias::None).unwrap().unwrap();
    assert_eq!(&found.data[0..4], &7u32.to_le_bytes());

    let miss = vec![KeySegment::new(vec![200u8], KeyType::Unsigned, false)];
    assert!(mgr.get_equal(id, TxnId(1), 0, &miss, LockBias::None).unwrap().is_none());
}

#[test]
fn unique_index_rejects_duplicate_key_on_insert() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "d.xtr");

    mgr.insert(id, TxnId(1), &record(1, b"first_______"), LockBias::None).unwrap();
    let err = mgr
        .insert(id, TxnId(1), &record(1, b"second______"), LockBias::None)
        .unwrap_err();
    assert!(matches!(err, XtError::DuplicateKey));
}

#[test]
fn get_first_and_get_last_return_extremes_in_key_order() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "e.xtr");

    for n in [5u32, 1, 9, 3] {
        mgr.insert(id, TxnId(1), &record(n, b"payload_____"), LockBias::None).unwrap();
    }
    let first = mgr.get_first(id, TxnId(1), 0, LockBias::None).unwrap().unwrap();
    let last = mgr.get_last(id, TxnId(1), 0, LockBias::None).unwrap().unwrap();
    assert_eq!(&first.data[0..4], &1u32.to_le_bytes());
    assert_eq!(&last.data[0..4], &9u32.to_le_bytes());
}

#[test]
fn step_walks_forward_and_backward_through_the_index() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "f.xtr");

    for n in [1u32, 2, 3] {
        mgr.insert(id, TxnId(1), &record(n, b"payload_____"), LockBias::None).unwrap();
    }
    let first = mgr.get_first(id, TxnId(1), 0, LockBias::None).unwrap().unwrap();
    let second = mgr.step(id, TxnId(1), 0, first.record_id, true, LockBias::None).unwrap().unwrap();
    assert_eq!(&second.data[0..4], &2u32.to_le_bytes());
    let third = mgr.step(id, TxnId(1), 0, second.record_id, true, LockBias::None).unwrap().unwrap();
    assert_eq!(&third.data[0..4], &3u32.to_le_bytes());
    assert!(mgr.step(id, TxnId(1), 0, third.record_id, true, LockBias::None).unwrap().is_none());

    let back = mgr.step(id, TxnId(1), 0, third.record_id, false, LockBias::None).unwrap().unwrap();
    assert_eq!(&back.data[0..4], &2u32.to_le_bytes());
}

#[test]
fn update_changing_the_key_moves_the_index_entry() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "g.xtr");

    let view = mgr.insert(id, TxnId(1), &record(1, b"payload_____"), LockBias::None).unwrap();
    mgr.update(id, TxnId(1), view.record_id, &record(2, b"payload_____"), LockBias::None).unwrap();

    assert!(mgr.get_equal(id, TxnId(1), 0, &key_of(1, 4), LockBias::None).unwrap().is_none());
    let found = mgr.get_equal(id, TxnId(1), 0, &key_of(2, 4), LockBias::None).unwrap().unwrap();
    assert_eq!(found.record_id, view.record_id);
}

#[test]
fn update_keeping_the_key_leaves_the_index_untouched_but_changes_the_payload() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "h.xtr");

    let view = mgr.insert(id, TxnId(1), &record(1, b"old_________"), LockBias::None).unwrap();
    mgr.update(id, TxnId(1), view.record_id, &record(1, b"new_________"), LockBias::None).unwrap();

    let found = mgr.get_equal(id, TxnId(1), 0, &key_of(1, 4), LockBias::None).unwrap().unwrap();
    assert_eq!(&found.data[4..16], b"new_________");
}

#[test]
fn delete_removes_the_record_from_the_index() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "i.xtr");

    let view = mgr.insert(id, TxnId(1), &record(1, b"payload_____"), LockBias::None).unwrap();
    mgr.delete(id, TxnId(1), view.record_id, LockBias::None).unwrap();

    assert!(mgr.get_equal(id, TxnId(1), 0, &key_of(1, 4), LockBias::None).unwrap().is_none());
    assert_eq!(mgr.stat(id).unwrap().record_count, 0);
}

#[test]
fn a_freed_page_is_reused_by_a_later_insert() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "j.xtr");

    let view = mgr.insert(id, TxnId(1), &record(1, b"payload_____"), LockBias::None).unwrap();
    let freed_page = view.record_id.page_id;
    mgr.delete(id, TxnId(1), view.record_id, LockBias::None).unwrap();

    let view2 = mgr.insert(id, TxnId(1), &record(2, b"payload_____"), LockBias::None).unwrap();
    assert_eq!(view2.record_id.page_id, freed_page);
}

#[test]
fn transaction_abort_undoes_insert_effects() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "k.xtr");

    mgr.begin(id, TxnId(1)).unwrap();
    mgr.insert(id, TxnId(1), &record(1, b"payload_____"), LockBias::None).unwrap();
    mgr.abort(id, TxnId(1)).unwrap();

    assert!(mgr.get_equal(id, TxnId(1), 0, &key_of(1, 4), LockBias::None).unwrap().is_none());
    assert_eq!(mgr.stat(id).unwrap().record_count, 0);
}

#[test]
fn transaction_commit_keeps_insert_effects() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "l.xtr");

    mgr.begin(id, TxnId(1)).unwrap();
    mgr.insert(id, TxnId(1), &record(1, b"payload_____"), LockBias::None).unwrap();
    mgr.commit(id, TxnId(1)).unwrap();

    assert!(mgr.get_equal(id, TxnId(1), 0, &key_of(1, 4), LockBias::None).unwrap().is_some());
}

#[test]
fn transaction_abort_into_a_populated_index_leaves_no_orphaned_entry() {
    // Regression: the first record establishes the index's leaf before the
    // transaction begins, so the second insert mutates that pre-existing
    // leaf in place (no split, no root change) rather than allocating a
    // fresh page. Abort must roll that leaf back too, not just the FCR.
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "populated_abort.xtr");

    mgr.insert(id, TxnId(1), &record(1, b"payload_____"), LockBias::None).unwrap();

    mgr.begin(id, TxnId(1)).unwrap();
    mgr.insert(id, TxnId(1), &record(2, b"payload_____"), LockBias::None).unwrap();
    assert!(mgr.get_equal(id, TxnId(1), 0, &key_of(2, 4), LockBias::None).unwrap().is_some());
    mgr.abort(id, TxnId(1)).unwrap();

    assert!(mgr.get_equal(id, TxnId(1), 0, &key_of(2, 4), LockBias::None).unwrap().is_none());
    let still_there = mgr.get_equal(id, TxnId(1), 0, &key_of(1, 4), LockBias::None).unwrap();
    assert!(still_there.is_some());
    assert_eq!(mgr.stat(id).unwrap().record_count, 1);
}

#[test]
fn close_implicitly_aborts_a_running_transaction_and_releases_locks() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "m.xtr");

    mgr.begin(id, TxnId(1)).unwrap();
    let view = mgr
        .insert(id, TxnId(1), &record(1, b"payload_____"), LockBias::SingleWait)
        .unwrap();
    let _ = view;
    mgr.close(id, TxnId(1)).unwrap();

    let (id2, _pb2) = mgr.open(dir.path().join("m.xtr"), OpenMode::Normal).unwrap();
    assert!(mgr.get_equal(id2, TxnId(1), 0, &key_of(1, 4), LockBias::None).unwrap().is_none());
}

#[test]
fn get_equal_with_a_no_wait_bias_fails_immediately_against_a_held_exclusive_lock() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "n.xtr");

    let view = mgr
        .insert(id, TxnId(1), &record(1, b"payload_____"), LockBias::SingleWait)
        .unwrap();

    let err = mgr
        .get_equal(id, TxnId(2), 0, &key_of(1, 4), LockBias::SingleNoWait)
        .unwrap_err();
    assert!(matches!(err, XtError::RecordLocked));

    mgr.unlock_all(id, TxnId(1));
    let found = mgr
        .get_equal(id, TxnId(2), 0, &key_of(1, 4), LockBias::SingleNoWait)
        .unwrap()
        .unwrap();
    assert_eq!(found.record_id, view.record_id);
}

#[test]
fn delete_with_a_no_wait_bias_fails_immediately_against_a_held_exclusive_lock() {
    let dir = tempdir().unwrap();
    let mut mgr = FileManager::new(16);
    let (id, _pb) = unique_file(&mut mgr, dir.path(), "o.xtr");

    let view = mgr
        .insert(id, TxnId(1), &record(1, b"payload_____"), LockBias::SingleWait)
        .unwrap();

    let err = mgr
        .delete(id, TxnId(2), view.record_id, LockBias::SingleNoWait)
        .unwrap_err();
    assert!(matches!(err, XtError::RecordLocked));
    assert_eq!(mgr.stat(id).unwrap().record_count, 1);
}
