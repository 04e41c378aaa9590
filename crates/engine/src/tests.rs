use super::*;
use common::{EngineConfig, KeyFlags, PositionBlock};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use types::KeyType;

const WAIT_BIAS: u16 = 100;
const NO_WAIT_BIAS: u16 = 200;
const MULTI_WAIT_BIAS: u16 = 300;

fn engine_in(dir: &std::path::Path) -> Engine {
    let config = EngineConfig::builder()
        .data_dir(dir.to_path_buf())
        .buffer_pool_pages(16)
        .build();
    Engine::new(&config)
}

fn create_spec() -> CreateSpec {
    CreateSpec {
        record_length: 16,
        page_size: 512,
        key_descriptors: vec![KeyDescriptor {
            position: 0,
            length: 4,
            key_type: KeyType::Unsigned,
            flags: KeyFlags::empty(),
            null_value: 0,
        }],
    }
}

fn bare_request(operation: u16, path: &str) -> Request {
    Request {
        operation,
        position_block: PositionBlock::null(),
        data: Vec::new(),
        key: Vec::new(),
        key_number: 0,
        file_path: path.to_string(),
        lock_bias: 0,
    }
}

fn create_and_open(engine: &Engine, path: &str) -> PositionBlock {
    let mut req = bare_request(opcode::CREATE, path);
    req.data = create_spec().encode();
    let resp = engine.dispatch(TxnId(1), &req);
    assert_eq!(resp.status_code, StatusCode::Success.code());
    resp.position_block
}

fn record_with_key(key: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 16];
    buf[0..4].copy_from_slice(&key.to_le_bytes());
    buf[4] = 0xAB;
    buf
}

#[test]
fn create_insert_and_get_equal_round_trip() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let session = TxnId(1);
    let pb = create_and_open(&engine, "orders.xtr");

    let mut insert = bare_request(opcode::INSERT, "orders.xtr");
    insert.position_block = pb;
    insert.data = record_with_key(7);
    let inserted = engine.dispatch(session, &insert);
    assert_eq!(inserted.status_code, StatusCode::Success.code());
    assert!(inserted.position_block.positioned);

    let mut get = bare_request(opcode::GET_EQUAL, "orders.xtr");
    get.position_block = pb;
    get.key = 7u32.to_le_bytes().to_vec();
    let found = engine.dispatch(session, &get);
    assert_eq!(found.status_code, StatusCode::Success.code());
    assert_eq!(found.data, record_with_key(7));
    assert_eq!(found.key, 7u32.to_le_bytes());
}

#[test]
fn duplicate_key_on_unique_index_is_rejected() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let session = TxnId(1);
    let pb = create_and_open(&engine, "orders.xtr");

    let mut insert = bare_request(opcode::INSERT, "orders.xtr");
    insert.position_block = pb;
    insert.data = record_with_key(1);
    assert_eq!(
        engine.dispatch(session, &insert).status_code,
        StatusCode::Success.code()
    );

    let second = engine.dispatch(session, &insert);
    assert_eq!(second.status_code, StatusCode::DuplicateKey.code());
}

#[test]
fn get_equal_miss_reports_key_not_found_and_unpositions() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let session = TxnId(1);
    let pb = create_and_open(&engine, "orders.xtr");

    let mut get = bare_request(opcode::GET_EQUAL, "orders.xtr");
    get.position_block = pb;
    get.key = 99u32.to_le_bytes().to_vec();
    let resp = engine.dispatch(session, &get);
    assert_eq!(resp.status_code, StatusCode::KeyNotFound.code());
    assert!(!resp.position_block.positioned);
}

#[test]
fn get_first_and_get_last_bound_the_key_order() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let session = TxnId(1);
    let pb = create_and_open(&engine, "orders.xtr");

    for key in [5u32, 1, 9] {
        let mut insert = bare_request(opcode::INSERT, "orders.xtr");
        insert.position_block = pb;
        insert.data = record_with_key(key);
        engine.dispatch(session, &insert);
    }

    let mut first = bare_request(opcode::GET_FIRST, "orders.xtr");
    first.position_block = pb;
    let first_resp = engine.dispatch(session, &first);
    assert_eq!(first_resp.key, 1u32.to_le_bytes());

    let mut last = bare_request(opcode::GET_LAST, "orders.xtr");
    last.position_block = pb;
    let last_resp = engine.dispatch(session, &last);
    assert_eq!(last_resp.key, 9u32.to_le_bytes());
}

#[test]
fn transaction_abort_reverts_insert_and_unpositions_cursor() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let session = TxnId(1);
    let pb = create_and_open(&engine, "orders.xtr");

    let mut begin = bare_request(opcode::BEGIN, "orders.xtr");
    begin.position_block = pb;
    assert_eq!(
        engine.dispatch(session, &begin).status_code,
        StatusCode::Success.code()
    );

    let mut insert = bare_request(opcode::INSERT, "orders.xtr");
    insert.position_block = pb;
    insert.data = record_with_key(10);
    engine.dispatch(session, &insert);

    let mut abort = bare_request(opcode::ABORT, "orders.xtr");
    abort.position_block = pb;
    let abort_resp = engine.dispatch(session, &abort);
    assert_eq!(abort_resp.status_code, StatusCode::Success.code());
    assert!(!abort_resp.position_block.positioned);

    let mut get = bare_request(opcode::GET_EQUAL, "orders.xtr");
    get.position_block = pb;
    get.key = 10u32.to_le_bytes().to_vec();
    let resp = engine.dispatch(session, &get);
    assert_eq!(resp.status_code, StatusCode::KeyNotFound.code());

    let mut stat = bare_request(opcode::STAT, "orders.xtr");
    stat.position_block = pb;
    let stat_resp = engine.dispatch(session, &stat);
    let record_count = u64::from_le_bytes(stat_resp.data[8..16].try_into().unwrap());
    assert_eq!(record_count, 0);
}

#[test]
fn unlock_current_on_an_unpositioned_cursor_returns_invalid_positioning() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let session = TxnId(1);
    let pb = create_and_open(&engine, "orders.xtr");

    let mut unlock = bare_request(opcode::UNLOCK, "orders.xtr");
    unlock.position_block = pb;
    unlock.lock_bias = -2i16 as u16;
    let resp = engine.dispatch(session, &unlock);
    assert_eq!(resp.status_code, StatusCode::InvalidPositioning.code());
}

#[test]
fn update_on_an_unpositioned_cursor_fails_without_touching_the_file() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let session = TxnId(1);
    let pb = create_and_open(&engine, "orders.xtr");

    let mut update = bare_request(opcode::UPDATE, "orders.xtr");
    update.position_block = pb;
    update.data = record_with_key(1);
    let resp = engine.dispatch(session, &update);
    assert_eq!(resp.status_code, StatusCode::InvalidPositioning.code());
}

#[test]
fn step_physical_is_index_agnostic() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let session = TxnId(1);
    let pb = create_and_open(&engine, "orders.xtr");

    for key in [3u32, 1] {
        let mut insert = bare_request(opcode::INSERT, "orders.xtr");
        insert.position_block = pb;
        insert.data = record_with_key(key);
        engine.dispatch(session, &insert);
    }

    let mut step_first = bare_request(opcode::STEP_FIRST, "orders.xtr");
    step_first.position_block = pb;
    let resp = engine.dispatch(session, &step_first);
    assert_eq!(resp.status_code, StatusCode::Success.code());
    // Physical order follows insertion/page order, not key order: 3 was
    // inserted before 1, so it lands in the first slot of the first page.
    assert_eq!(resp.data, record_with_key(3));

    let mut step_next = bare_request(opcode::STEP_NEXT, "orders.xtr");
    step_next.position_block = resp.position_block;
    let next = engine.dispatch(session, &step_next);
    assert_eq!(next.data, record_with_key(1));

    let mut step_next_again = bare_request(opcode::STEP_NEXT, "orders.xtr");
    step_next_again.position_block = next.position_block;
    let end = engine.dispatch(session, &step_next_again);
    assert_eq!(end.status_code, StatusCode::EndOfFile.code());
}

#[test]
fn unrecognized_opcode_returns_invalid_operation() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let pb = create_and_open(&engine, "orders.xtr");
    let mut req = bare_request(255, "orders.xtr");
    req.position_block = pb;
    let resp = engine.dispatch(TxnId(1), &req);
    assert_eq!(resp.status_code, StatusCode::InvalidOperation.code());
}

#[test]
fn transaction_abort_into_a_populated_index_does_not_orphan_the_leaf_entry() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let session = TxnId(1);
    let pb = create_and_open(&engine, "orders.xtr");

    let mut first_insert = bare_request(opcode::INSERT, "orders.xtr");
    first_insert.position_block = pb;
    first_insert.data = record_with_key(1);
    assert_eq!(
        engine.dispatch(session, &first_insert).status_code,
        StatusCode::Success.code()
    );

    let mut begin = bare_request(opcode::BEGIN, "orders.xtr");
    begin.position_block = pb;
    engine.dispatch(session, &begin);

    let mut insert = bare_request(opcode::INSERT, "orders.xtr");
    insert.position_block = pb;
    insert.data = record_with_key(2);
    engine.dispatch(session, &insert);

    let mut get_mid_txn = bare_request(opcode::GET_EQUAL, "orders.xtr");
    get_mid_txn.position_block = pb;
    get_mid_txn.key = 2u32.to_le_bytes().to_vec();
    assert_eq!(
        engine.dispatch(session, &get_mid_txn).status_code,
        StatusCode::Success.code()
    );

    let mut abort = bare_request(opcode::ABORT, "orders.xtr");
    abort.position_block = pb;
    assert_eq!(
        engine.dispatch(session, &abort).status_code,
        StatusCode::Success.code()
    );

    let mut get_after_abort = bare_request(opcode::GET_EQUAL, "orders.xtr");
    get_after_abort.position_block = pb;
    get_after_abort.key = 2u32.to_le_bytes().to_vec();
    let resp = engine.dispatch(session, &get_after_abort);
    assert_eq!(resp.status_code, StatusCode::KeyNotFound.code());

    let mut get_survivor = bare_request(opcode::GET_EQUAL, "orders.xtr");
    get_survivor.position_block = pb;
    get_survivor.key = 1u32.to_le_bytes().to_vec();
    assert_eq!(
        engine.dispatch(session, &get_survivor).status_code,
        StatusCode::Success.code()
    );
}

#[test]
fn get_equal_with_a_partial_key_matches_the_leftmost_stored_prefix() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let session = TxnId(1);
    let pb = create_and_open(&engine, "orders.xtr");

    for key in [0x0100u32, 0x0101u32, 0x0300u32] {
        let mut insert = bare_request(opcode::INSERT, "orders.xtr");
        insert.position_block = pb;
        insert.data = record_with_key(key);
        assert_eq!(
            engine.dispatch(session, &insert).status_code,
            StatusCode::Success.code()
        );
    }

    let mut get = bare_request(opcode::GET_EQUAL, "orders.xtr");
    get.position_block = pb;
    get.key = vec![0x00u8, 0x01u8];
    let resp = engine.dispatch(session, &get);
    assert_eq!(resp.status_code, StatusCode::Success.code());
    assert_eq!(resp.data, record_with_key(0x0100));

    let mut miss = bare_request(opcode::GET_EQUAL, "orders.xtr");
    miss.position_block = pb;
    miss.key = vec![0x00u8, 0x02u8];
    assert_eq!(
        engine.dispatch(session, &miss).status_code,
        StatusCode::KeyNotFound.code()
    );
}

#[test]
fn get_equal_with_a_no_wait_bias_is_blocked_by_a_held_exclusive_lock() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let pb = create_and_open(&engine, "orders.xtr");

    let mut insert = bare_request(opcode::INSERT, "orders.xtr");
    insert.position_block = pb;
    insert.data = record_with_key(1);
    insert.lock_bias = WAIT_BIAS;
    engine.dispatch(TxnId(1), &insert);

    let mut get = bare_request(opcode::GET_EQUAL, "orders.xtr");
    get.position_block = pb;
    get.key = 1u32.to_le_bytes().to_vec();
    get.lock_bias = NO_WAIT_BIAS;
    let resp = engine.dispatch(TxnId(2), &get);
    assert_eq!(resp.status_code, StatusCode::RecordLocked.code());
}

#[test]
fn update_with_a_no_wait_bias_is_blocked_by_a_held_exclusive_lock() {
    let dir = tempdir().unwrap();
    let engine = engine_in(dir.path());
    let pb = create_and_open(&engine, "orders.xtr");

    let mut insert = bare_request(opcode::INSERT, "orders.xtr");
    insert.position_block = pb;
    insert.data = record_with_key(1);
    insert.lock_bias = WAIT_BIAS;
    let inserted = engine.dispatch(TxnId(1), &insert);

    let mut update = bare_request(opcode::UPDATE, "orders.xtr");
    update.position_block = inserted.position_block;
    update.data = record_with_key(1);
    update.lock_bias = NO_WAIT_BIAS;
    let resp = engine.dispatch(TxnId(2), &update);
    assert_eq!(resp.status_code, StatusCode::RecordLocked.code());
}

#[test]
fn two_sessions_updating_each_others_locked_record_deadlock() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(engine_in(dir.path()));
    let pb = create_and_open(&engine, "orders.xtr");

    // Multi-record bias, unlike single-record bias, accumulates locks
    // instead of releasing the holder's previous one on each acquisition
    // -- required here so each session still holds its first lock when it
    // reaches for the other's.
    let mut insert_a = bare_request(opcode::INSERT, "orders.xtr");
    insert_a.position_block = pb;
    insert_a.data = record_with_key(1);
    insert_a.lock_bias = MULTI_WAIT_BIAS;
    let a = engine.dispatch(TxnId(1), &insert_a);

    let mut insert_b = bare_request(opcode::INSERT, "orders.xtr");
    insert_b.position_block = pb;
    insert_b.data = record_with_key(2);
    insert_b.lock_bias = MULTI_WAIT_BIAS;
    let b = engine.dispatch(TxnId(2), &insert_b);

    // Session 1 locks record 2 (waits, since session 2 holds it); session
    // 2 then tries to lock record 1 (held by session 1), closing a cycle.
    let engine_for_thread = Arc::clone(&engine);
    let b_position = b.position_block;
    let handle = thread::spawn(move || {
        let mut update_b = bare_request(opcode::UPDATE, "orders.xtr");
        update_b.position_block = b_position;
        update_b.data = record_with_key(2);
        update_b.lock_bias = MULTI_WAIT_BIAS;
        engine_for_thread.dispatch(TxnId(1), &update_b)
    });

    thread::sleep(Duration::from_millis(30));

    let mut update_a = bare_request(opcode::UPDATE, "orders.xtr");
    update_a.position_block = a.position_block;
    update_a.data = record_with_key(1);
    update_a.lock_bias = MULTI_WAIT_BIAS;
    let resp = engine.dispatch(TxnId(2), &update_a);
    assert_eq!(resp.status_code, StatusCode::Deadlock.code());

    let _ = handle.join();
}
