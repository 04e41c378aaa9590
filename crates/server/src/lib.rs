//! Accept loop for the Xtrieve wire protocol.
//!
//! [`run`] owns nothing but the listener and a shared [`Engine`]; each
//! accepted connection gets its own session id and is handled independently
//! until it disconnects or sends `Close`.

use common::{FileId, TxnId};
use engine::Engine;
use log::{debug, info, warn};
use protocol::Response;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// Accept connections from `listener` until the socket is closed or the
/// process is asked to shut down, dispatching every request against
/// `engine`.
pub async fn run(listener: TcpListener, engine: Arc<Engine>) -> anyhow::Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        info!("accepted connection from {addr}");
        let engine = engine.clone();
        tokio::spawn(async move {
            let session = engine.new_session();
            let file_id = handle_connection(socket, &engine, session).await;
            engine.end_session(file_id, session);
            info!("closed connection from {addr}, session={}", session.0);
        });
    }
}

/// Drive one connection: read a request, dispatch it on a blocking thread
/// (the engine's file lock may block on a lock wait), write the response,
/// repeat. Returns the last file the connection had open, if any, so the
/// caller can release its session on teardown.
async fn handle_connection(
    mut socket: TcpStream,
    engine: &Arc<Engine>,
    session: TxnId,
) -> Option<FileId> {
    let mut file_id = None;
    loop {
        let request = match protocol::Request::read_from(&mut socket).await {
            Ok(request) => request,
            Err(err) if is_eof(&err) => break,
            Err(err) => {
                warn!("session={} read error: {err}", session.0);
                break;
            }
        };

        let engine = engine.clone();
        let op = request.operation;
        let dispatch_result =
            tokio::task::spawn_blocking(move || engine.dispatch(session, &request)).await;
        let response = match dispatch_result {
            Ok(response) => response,
            Err(join_err) => {
                warn!("session={} dispatch task failed: {join_err}", session.0);
                break;
            }
        };

        debug!(
            "session={} op={op} status={}",
            session.0, response.status_code
        );
        file_id = file_id_of(&response);

        if let Err(err) = response.write_to(&mut socket).await {
            warn!("session={} write error: {err}", session.0);
            break;
        }

        if op == protocol::opcode::CLOSE && response.status_code == common::StatusCode::Success.code() {
            file_id = None;
        }
    }
    file_id
}

fn file_id_of(response: &Response) -> Option<FileId> {
    if response.position_block.is_null() {
        None
    } else {
        Some(response.position_block.file_id)
    }
}

fn is_eof(err: &common::XtError) -> bool {
    matches!(err, common::XtError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}
