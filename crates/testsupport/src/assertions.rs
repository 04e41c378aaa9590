//! Custom assertion helpers for engine- and wire-level tests.

use common::StatusCode;
use pretty_assertions::assert_eq as assert_eq_pretty;
use protocol::Response;

/// Assert that `response` carries a `Success` status code.
///
/// # Example
///
/// ```no_run
/// use testsupport::prelude::*;
/// # fn example(response: protocol::Response) {
/// assert_success(&response);
/// # }
/// ```
pub fn assert_success(response: &Response) {
    assert_eq!(
        response.status_code,
        StatusCode::Success.code(),
        "expected Success, got status {} ({:?})",
        response.status_code,
        StatusCode::from_code(response.status_code)
    );
}

/// Assert that `response` carries exactly `expected`.
pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(
        response.status_code,
        expected.code(),
        "expected status {:?}, got {:?}",
        expected,
        StatusCode::from_code(response.status_code)
    );
}

/// Assert that `response.data` equals `expected` byte-for-byte.
pub fn assert_record_eq(response: &Response, expected: &[u8]) {
    assert_eq_pretty!(response.data, expected.to_vec(), "record mismatch");
}

/// Assert that the response's cursor is positioned on a record.
pub fn assert_positioned(response: &Response) {
    assert!(
        response.position_block.positioned,
        "expected cursor to be positioned, got {}",
        common::pretty::format_position_block(&response.position_block)
    );
}

/// Assert that the response's cursor is unpositioned, as the engine leaves
/// it after a miss (`KeyNotFound`/`EndOfFile`) or an abort.
pub fn assert_unpositioned(response: &Response) {
    assert!(
        !response.position_block.positioned,
        "expected cursor to be unpositioned, got {}",
        common::pretty::format_position_block(&response.position_block)
    );
}
