//! Per-connection transaction driver.
//!
//! One connection is one task on its worker's thread. The synchronous
//! driver advances the transaction through
//! `Read -> Serve -> PrepareResponse -> Send -> Done`, falling through
//! stages until one would block; the async wrapper then awaits the
//! readiness the blocked stage asked for and re-enters. Keep-alive loops
//! back to `Read` via `finalize_transaction`, which carries any
//! already-buffered bytes of the next request forward.

use crate::http::{
    client::Client,
    types::{Status, Step, TxnState},
};
use tokio::io::Interest;

pub(crate) enum ServeOutcome {
    /// A stage would block; re-arm for this readiness and come back.
    Blocked(Interest),
    /// The connection is finished (cleanly or not) and must be closed.
    Close,
}

/// Advance the connection as far as it will go without blocking.
pub(crate) fn connection_serve(client: &mut Client) -> ServeOutcome {
    loop {
        match client.ta.state {
            TxnState::Read => match client.recv_request() {
                Ok(Step::Advanced) => {}
                Ok(Step::Blocked) => return ServeOutcome::Blocked(Interest::READABLE),
                Err(Status::Hangup) => return ServeOutcome::Close,
                Err(status) => {
                    client.ta.resp_status = status;
                    client.ta.state = TxnState::PrepareResponse;
                }
            },
            TxnState::Serve => match client.serve_request() {
                Ok(Step::Advanced) => {}
                // suspended handlers only ever wait on payload bytes
                Ok(Step::Blocked) => return ServeOutcome::Blocked(Interest::READABLE),
                Err(Status::Hangup) => return ServeOutcome::Close,
                Err(status) => {
                    client.ta.resp_status = status;
                    client.ta.state = TxnState::PrepareResponse;
                }
            },
            TxnState::PrepareResponse => {
                if client.prepare_response().is_err() {
                    return ServeOutcome::Close;
                }
            }
            TxnState::Send => match client.send_response() {
                Ok(Step::Advanced) => {}
                Ok(Step::Blocked) => return ServeOutcome::Blocked(Interest::WRITABLE),
                Err(()) => return ServeOutcome::Close,
            },
            TxnState::Done => client.finalize_transaction(),
        }
    }
}

/// Serve the connection to completion, then hand the slot back.
pub(crate) async fn drive_connection(mut client: Client) -> Client {
    loop {
        match connection_serve(&mut client) {
            ServeOutcome::Close => break,
            ServeOutcome::Blocked(interest) => {
                let Some(sock) = client.sock.as_ref() else {
                    break;
                };
                if sock.ready(interest).await.is_err() {
                    break;
                }
            }
        }
    }
    // closes the socket and scrubs the slot for its next renter
    client.sock = None;
    client.reset();
    client
}
