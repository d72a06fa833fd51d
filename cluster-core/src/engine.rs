//! The redirection engine: given a cluster's current state and one or more
//! commands, resolves a connection by slot, dispatches, classifies the
//! reply, and retries redirected or transiently-failed sub-commands until
//! they succeed or the retry ceiling is hit.

use crate::error::ClusterError;
use crate::node::NodeAddr;
use crate::parser;
use crate::query::SubQuery;
use crate::state::ClusterState;
use crate::transport::{CommandOutcome, Reply, Transport, TopologyDiscovery, Command};

enum Classified {
    Success(Reply),
    Moved(u16, NodeAddr),
    Ask(u16, NodeAddr),
    Transient(String),
}

/// Parses a `MOVED`/`ASK` error line. Anything that doesn't match the
/// `<KEYWORD> <slot> <host>:<port>` shape (including an empty target, or a
/// slot that doesn't parse) is left for the caller to treat as a plain
/// transient error, per the testable property that malformed redirects
/// degrade to a retry rather than a panic.
fn parse_redirect(keyword: &str, msg: &str) -> Option<(u16, NodeAddr)> {
    let mut parts = msg.split_whitespace();
    if parts.next()? != keyword {
        return None;
    }
    let slot: u16 = parts.next()?.parse().ok()?;
    let node = NodeAddr::parse(parts.next()?)?;
    Some((slot, node))
}

fn classify(outcome: CommandOutcome) -> Classified {
    match outcome {
        CommandOutcome::Ok(reply) => Classified::Success(reply),
        CommandOutcome::ServerError(msg) => {
            if let Some((slot, node)) = parse_redirect("MOVED", &msg) {
                Classified::Moved(slot, node)
            } else if let Some((slot, node)) = parse_redirect("ASK", &msg) {
                Classified::Ask(slot, node)
            } else {
                Classified::Transient(msg)
            }
        }
    }
}

/// Drives a single sub-query's retry loop to completion. An explicit loop,
/// not recursion, so a query that keeps redirecting never grows the stack.
async fn run_one<T, D>(state: &ClusterState<T, D>, mut sq: SubQuery<T::Handle>) -> Result<Reply, ClusterError>
where
    T: Transport,
    D: TopologyDiscovery<T>,
{
    let ttl = state.retry_params().request_ttl;
    loop {
        if sq.retries >= ttl {
            return Err(sq.fail(ClusterError::NoConnection));
        }

        let conn = match sq.connection.take() {
            Some(conn) => conn,
            None => match state.get_connection_by_slot(sq.slot) {
                Some((conn, version)) => {
                    sq.version_observed = version;
                    conn
                }
                None => {
                    state.request_refresh(sq.version_observed);
                    sq.retries += 1;
                    sq.last_error = Some(ClusterError::NoConnection);
                    continue;
                }
            },
        };

        if sq.retries > 0 {
            tokio::time::sleep(state.retry_params().retry_delay).await;
        }

        let to_send = sq.to_send();
        let sent: Result<Vec<CommandOutcome>, _> = if to_send.len() == 1 {
            state
                .transport()
                .send_one(&conn, &to_send[0])
                .await
                .map(|o| vec![o])
        } else {
            state.transport().send_pipeline(&conn, &to_send).await
        };

        let outcomes = match sent {
            Ok(outcomes) => outcomes,
            Err(e) => {
                sq.retries += 1;
                sq.last_error = Some(e.into());
                continue;
            }
        };

        let real = if sq.asking {
            outcomes.into_iter().nth(1)
        } else {
            outcomes.into_iter().next()
        };
        let real = match real {
            Some(outcome) => outcome,
            None => {
                sq.retries += 1;
                sq.last_error = Some(ClusterError::TransientServerError(
                    "transport returned no reply".into(),
                ));
                continue;
            }
        };

        match classify(real) {
            Classified::Success(reply) => return Ok(reply),
            Classified::Moved(slot, node) => {
                state.request_refresh(sq.version_observed);
                match state.get_or_open_connection(&node).await {
                    Some(conn) => {
                        sq.connection = Some(conn);
                        sq.asking = false;
                        sq.retries += 1;
                        continue;
                    }
                    None => return Err(ClusterError::Moved { slot, node }),
                }
            }
            Classified::Ask(slot, node) => match state.get_or_open_connection(&node).await {
                Some(conn) => {
                    sq.connection = Some(conn);
                    sq.asking = true;
                    sq.retries += 1;
                    continue;
                }
                None => return Err(ClusterError::Ask { slot, node }),
            },
            Classified::Transient(msg) => {
                sq.retries += 1;
                sq.last_error = Some(ClusterError::TransientServerError(msg));
                continue;
            }
        }
    }
}

/// Dispatches a full pipeline (a single command is just a pipeline of one).
///
/// The first attempt always goes through in one batch on a single
/// connection, the one the first keyed sub-command's slot resolves to; that
/// matches how the server itself would behave if every key actually lived
/// there. Whatever comes back `MOVED`/`ASK`/transient is peeled off and
/// retried individually, each on its own connection, until it succeeds or
/// exhausts its retry budget.
pub(crate) async fn dispatch<T, D>(
    state: &ClusterState<T, D>,
    commands: Vec<Command>,
) -> Result<Vec<Result<Reply, ClusterError>>, ClusterError>
where
    T: Transport,
    D: TopologyDiscovery<T>,
{
    if commands.is_empty() {
        return Err(ClusterError::EmptyPipeline);
    }
    let n = commands.len();
    if n > 1 && !parser::check_same_slot(&commands) {
        tracing::warn!(cluster = %state.name(), "pipeline spans more than one slot");
    }

    let mut results: Vec<Option<Result<Reply, ClusterError>>> = (0..n).map(|_| None).collect();
    let mut pending: Vec<SubQuery<T::Handle>> = Vec::new();
    for (index, command) in commands.into_iter().enumerate() {
        match parser::key_of(&command).map(parser::slot_of) {
            Some(slot) => pending.push(SubQuery::new(index, command, slot)),
            None => results[index] = Some(Err(ClusterError::InvalidClusterKey)),
        }
    }

    if !pending.is_empty() {
        let rep_slot = pending[0].slot;
        let batch: Vec<Command> = pending.iter().map(|sq| sq.original.clone()).collect();

        let retry_queue = match state.get_connection_by_slot(rep_slot) {
            None => {
                state.request_refresh(0);
                pending
                    .into_iter()
                    .map(|mut sq| {
                        sq.retries += 1;
                        sq.last_error = Some(ClusterError::NoConnection);
                        sq
                    })
                    .collect::<Vec<_>>()
            }
            Some((conn, version)) => {
                // Same rule as `run_one`: a lone command goes through
                // `send_one`, only an actual pipeline pays for `send_pipeline`.
                let sent = if batch.len() == 1 {
                    state
                        .transport()
                        .send_one(&conn, &batch[0])
                        .await
                        .map(|o| vec![o])
                } else {
                    state.transport().send_pipeline(&conn, &batch).await
                };
                match sent {
                    Err(e) => pending
                        .into_iter()
                        .map(|mut sq| {
                            sq.retries += 1;
                            sq.last_error = Some(e.clone().into());
                            sq
                        })
                        .collect::<Vec<_>>(),
                    Ok(outcomes) => {
                        let mut retry_queue = Vec::new();
                        for (mut sq, outcome) in pending.into_iter().zip(outcomes.into_iter()) {
                            sq.version_observed = version;
                            match classify(outcome) {
                                Classified::Success(reply) => {
                                    results[sq.index] = Some(Ok(reply));
                                }
                                Classified::Moved(slot, node) => {
                                    state.request_refresh(version);
                                    match state.get_or_open_connection(&node).await {
                                        Some(h) => {
                                            sq.connection = Some(h);
                                            sq.retries += 1;
                                            retry_queue.push(sq);
                                        }
                                        None => {
                                            results[sq.index] = Some(Err(ClusterError::Moved { slot, node }));
                                        }
                                    }
                                }
                                Classified::Ask(slot, node) => {
                                    match state.get_or_open_connection(&node).await {
                                        Some(h) => {
                                            sq.connection = Some(h);
                                            sq.asking = true;
                                            sq.retries += 1;
                                            retry_queue.push(sq);
                                        }
                                        None => {
                                            results[sq.index] = Some(Err(ClusterError::Ask { slot, node }));
                                        }
                                    }
                                }
                                Classified::Transient(msg) => {
                                    sq.retries += 1;
                                    sq.last_error = Some(ClusterError::TransientServerError(msg));
                                    retry_queue.push(sq);
                                }
                            }
                        }
                        retry_queue
                    }
                }
            }
        };

        for sq in retry_queue {
            let index = sq.index;
            results[index] = Some(run_one(state, sq).await);
        }
    }

    Ok(results.into_iter().map(|r| r.expect("every index filled")).collect())
}

pub(crate) async fn dispatch_single<T, D>(
    state: &ClusterState<T, D>,
    command: Command,
) -> Result<Reply, ClusterError>
where
    T: Transport,
    D: TopologyDiscovery<T>,
{
    dispatch(state, vec![command]).await?.remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_moved() {
        let (slot, node) = parse_redirect("MOVED", "MOVED 3999 127.0.0.1:7001").unwrap();
        assert_eq!(slot, 3999);
        assert_eq!(node, NodeAddr::new("127.0.0.1", 7001));
    }

    #[test]
    fn parses_ask() {
        let (slot, node) = parse_redirect("ASK", "ASK 3999 127.0.0.1:7002").unwrap();
        assert_eq!(slot, 3999);
        assert_eq!(node, NodeAddr::new("127.0.0.1", 7002));
    }

    #[test]
    fn rejects_wrong_keyword() {
        assert!(parse_redirect("MOVED", "ASK 3999 127.0.0.1:7002").is_none());
    }

    #[test]
    fn malformed_redirect_falls_through_to_transient() {
        for msg in ["MOVED", "MOVED abc 127.0.0.1:7001", "MOVED 3999", "MOVED 3999 "] {
            match classify(CommandOutcome::ServerError(msg.to_string())) {
                Classified::Transient(_) => {}
                _ => panic!("expected {msg:?} to classify as transient"),
            }
        }
    }

    #[test]
    fn classifies_plain_error_as_transient() {
        match classify(CommandOutcome::ServerError("TRYAGAIN".to_string())) {
            Classified::Transient(msg) => assert_eq!(msg, "TRYAGAIN"),
            _ => panic!("expected transient"),
        }
    }

    #[test]
    fn classifies_ok_as_success() {
        match classify(CommandOutcome::Ok(b"PONG".to_vec())) {
            Classified::Success(reply) => assert_eq!(reply, b"PONG"),
            _ => panic!("expected success"),
        }
    }
}
