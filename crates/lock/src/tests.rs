use super::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn rid(slot: u16) -> RecordId {
    RecordId {
        page_id: common::PageId(0),
        slot,
    }
}

#[test]
fn bias_decodes_known_values() {
    assert_eq!(LockBias::from_i16(0).unwrap(), LockBias::None);
    assert_eq!(LockBias::from_i16(100).unwrap(), LockBias::SingleWait);
    assert_eq!(LockBias::from_i16(200).unwrap(), LockBias::SingleNoWait);
    assert_eq!(LockBias::from_i16(300).unwrap(), LockBias::MultiWait);
    assert_eq!(LockBias::from_i16(400).unwrap(), LockBias::MultiNoWait);
    assert!(LockBias::from_i16(42).is_err());
}

#[test]
fn bias_none_never_takes_a_lock() {
    let mgr = LockManager::new();
    let file = FileId(1);
    mgr.lock_record(TxnId(1), file, rid(0), LockBias::None).unwrap();
    // A second session can still take an exclusive lock immediately.
    mgr.lock_record(TxnId(2), file, rid(0), LockBias::SingleNoWait).unwrap();
}

#[test]
fn no_wait_bias_fails_immediately_on_contention() {
    let mgr = LockManager::new();
    let file = FileId(1);
    mgr.lock_record(TxnId(1), file, rid(0), LockBias::SingleWait).unwrap();

    let err = mgr
        .lock_record(TxnId(2), file, rid(0), LockBias::SingleNoWait)
        .unwrap_err();
    assert!(matches!(err, XtError::RecordLocked));
}

#[test]
fn file_lock_contention_reports_file_locked() {
    let mgr = LockManager::new();
    let file = FileId(7);
    mgr.lock_file(TxnId(1), file, LockBias::MultiWait).unwrap();

    let err = mgr.lock_file(TxnId(2), file, LockBias::MultiNoWait).unwrap_err();
    assert!(matches!(err, XtError::FileLocked));
}

#[test]
fn single_record_lock_is_replaced_on_reposition() {
    let mgr = LockManager::new();
    let file = FileId(1);
    mgr.lock_record(TxnId(1), file, rid(0), LockBias::SingleWait).unwrap();
    mgr.lock_record(TxnId(1), file, rid(1), LockBias::SingleWait).unwrap();

    // rid(0) was released when the session repositioned to rid(1).
    mgr.lock_record(TxnId(2), file, rid(0), LockBias::SingleNoWait).unwrap();
    // rid(1) is still held by session 1.
    let err = mgr
        .lock_record(TxnId(2), file, rid(1), LockBias::SingleNoWait)
        .unwrap_err();
    assert!(matches!(err, XtError::RecordLocked));
}

#[test]
fn multi_record_locks_accumulate() {
    let mgr = LockManager::new();
    let file = FileId(1);
    mgr.lock_record(TxnId(1), file, rid(0), LockBias::MultiWait).unwrap();
    mgr.lock_record(TxnId(1), file, rid(1), LockBias::MultiWait).unwrap();

    for r in [0, 1] {
        let err = mgr
            .lock_record(TxnId(2), file, rid(r), LockBias::SingleNoWait)
            .unwrap_err();
        assert!(matches!(err, XtError::RecordLocked));
    }
}

#[test]
fn release_all_frees_every_lock_held_by_a_session() {
    let mgr = LockManager::new();
    let file = FileId(1);
    mgr.lock_record(TxnId(1), file, rid(0), LockBias::MultiWait).unwrap();
    mgr.lock_record(TxnId(1), file, rid(1), LockBias::MultiWait).unwrap();

    mgr.release_all(TxnId(1));

    mgr.lock_record(TxnId(2), file, rid(0), LockBias::SingleNoWait).unwrap();
    mgr.lock_record(TxnId(2), file, rid(1), LockBias::SingleNoWait).unwrap();
}

#[test]
fn waiter_unblocks_once_holder_releases() {
    let mgr = Arc::new(LockManager::new());
    let file = FileId(3);
    mgr.lock_record(TxnId(1), file, rid(0), LockBias::SingleWait).unwrap();

    let waiter_mgr = Arc::clone(&mgr);
    let handle = thread::spawn(move || {
        waiter_mgr.lock_record(TxnId(2), file, rid(0), LockBias::SingleWait)
    });

    thread::sleep(Duration::from_millis(30));
    mgr.release(TxnId(1), LockKey::Record(file, rid(0)));

    assert!(handle.join().unwrap().is_ok());
}

#[test]
fn mutual_wait_is_reported_as_deadlock() {
    let mgr = Arc::new(LockManager::new());
    let file = FileId(4);
    mgr.lock_record(TxnId(1), file, rid(0), LockBias::SingleWait).unwrap();
    mgr.lock_record(TxnId(2), file, rid(1), LockBias::SingleWait).unwrap();

    let mgr2 = Arc::clone(&mgr);
    let handle = thread::spawn(move || mgr2.lock_record(TxnId(1), file, rid(1), LockBias::SingleWait));
    thread::sleep(Duration::from_millis(30));

    let err = mgr.lock_record(TxnId(2), file, rid(0), LockBias::SingleWait).unwrap_err();
    assert!(matches!(err, XtError::Deadlock));

    // Break the first waiter loose so the spawned thread can finish.
    mgr.release(TxnId(2), LockKey::Record(file, rid(1)));
    let _ = handle.join();
}
