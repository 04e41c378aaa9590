//! Batch request execution against a bare [`Engine`], for tests that want
//! to drive a sequence of operations without standing up a TCP server.

use common::{PositionBlock, TxnId};
use engine::Engine;
use protocol::Request;

/// Run `requests` in order through `engine` under `session`, threading each
/// response's `position_block` into the next request so a caller can write
/// a script of bare opcodes without manually tracking the cursor.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
/// use protocol::opcode;
///
/// let ctx = TestContext::new();
/// let create = ctx
///     .create_file("orders.xtr", unique_unsigned_key_spec(16, 4096))
///     .unwrap();
///
/// let mut insert = ctx.blank_request(opcode::INSERT);
/// insert.position_block = create.position_block;
/// insert.data = record_with_u32_key(16, 1, b"hello");
///
/// let responses = run_script(ctx.engine(), ctx.session(), vec![insert]);
/// assert_eq!(responses.len(), 1);
/// assert_success(&responses[0]);
/// ```
pub fn run_script(engine: &Engine, session: TxnId, requests: Vec<Request>) -> Vec<protocol::Response> {
    let mut position_block = PositionBlock::null();
    let mut responses = Vec::with_capacity(requests.len());
    for mut request in requests {
        if request.position_block.is_null() && !position_block.is_null() {
            request.position_block = position_block;
        }
        let response = engine.dispatch(session, &request);
        position_block = response.position_block;
        responses.push(response);
    }
    responses
}
