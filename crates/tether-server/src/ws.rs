//! WebSocket connection lifecycle: reader/writer split, frame dispatch,
//! and the read-marking side effects of `enterChat`.

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use tether_core::ids::UserId;
use tether_core::protocol::{ClientFrame, CLOSE_UNSUPPORTED_DATA};
use tether_store::messages::MessageRepo;

use crate::registry::{ConnId, Outbound};
use crate::server::AppState;

#[derive(Debug, PartialEq, Eq)]
enum FrameOutcome {
    Continue,
    Close(u16, &'static str),
}

/// Run one connection to completion. The writer task drains the outbound
/// queue; the reader task dispatches inbound frames. Either side ending
/// tears the connection down.
pub async fn run_connection(
    socket: WebSocket,
    conn_id: ConnId,
    mut rx: mpsc::Receiver<Outbound>,
    state: AppState,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = conn_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Event(text) => {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Ping => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(conn_id = %writer_cid, "sent ping");
                }
                Outbound::Close { code, reason } => {
                    let _ = ws_tx
                        .send(WsMessage::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let reader_cid = conn_id.clone();
    let reader_state = state.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    match handle_frame(&reader_state, &reader_cid, &text).await {
                        FrameOutcome::Continue => {}
                        FrameOutcome::Close(code, reason) => {
                            reader_state.registry.close(&reader_cid, code, reason);
                            break;
                        }
                    }
                }
                WsMessage::Pong(_) => {
                    reader_state.registry.record_pong(&reader_cid);
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum replies with pong automatically
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    state.registry.unregister(&conn_id);
    tracing::info!(conn_id = %conn_id, "connection closed");
}

/// Dispatch one inbound text frame.
async fn handle_frame(state: &AppState, conn_id: &ConnId, raw: &str) -> FrameOutcome {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(conn_id = %conn_id, %err, "malformed frame");
            return FrameOutcome::Close(CLOSE_UNSUPPORTED_DATA, "malformed frame");
        }
    };

    match frame {
        ClientFrame::Join { user_id } => match state.registry.bind(conn_id, &user_id) {
            Ok(user_id) => {
                tracing::info!(conn_id = %conn_id, user = %user_id, "connection bound");
                FrameOutcome::Continue
            }
            Err(err) => FrameOutcome::Close(err.close_code(), err.reason()),
        },
        ClientFrame::EnterChat { chat_with } => {
            if !UserId::is_valid(&chat_with) {
                tracing::warn!(conn_id = %conn_id, chat_with, "ignoring enterChat with bad id");
                return FrameOutcome::Continue;
            }
            let counterpart = UserId::from_raw(chat_with);
            let Some(viewer) = state.registry.enter_chat(conn_id, counterpart.clone()) else {
                tracing::warn!(conn_id = %conn_id, "enterChat on unbound connection");
                return FrameOutcome::Continue;
            };

            // Opening the conversation marks it read.
            let messages = MessageRepo::new(state.db.clone());
            match messages.mark_conversation_read(&viewer, &counterpart) {
                Ok(marked) if marked > 0 => {
                    state.delivery.conversation_read(&viewer, &counterpart);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(viewer = %viewer, %err, "mark read on enterChat failed");
                }
            }
            FrameOutcome::Continue
        }
        ClientFrame::LeaveChat => {
            state.registry.leave_chat(conn_id);
            FrameOutcome::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_state;
    use tether_core::protocol::CLOSE_POLICY_VIOLATION;
    use tether_store::users::UserRepo;

    async fn registered(state: &AppState) -> (ConnId, mpsc::Receiver<Outbound>) {
        state.registry.register()
    }

    #[tokio::test]
    async fn malformed_frame_closes_1003() {
        let state = test_state();
        let (conn, _rx) = registered(&state).await;

        let outcome = handle_frame(&state, &conn, "{definitely not json").await;
        assert_eq!(
            outcome,
            FrameOutcome::Close(CLOSE_UNSUPPORTED_DATA, "malformed frame")
        );
    }

    #[tokio::test]
    async fn unknown_frame_type_closes_1003() {
        let state = test_state();
        let (conn, _rx) = registered(&state).await;

        let outcome = handle_frame(&state, &conn, r#"{"type":"teleport"}"#).await;
        assert!(matches!(outcome, FrameOutcome::Close(code, _) if code == CLOSE_UNSUPPORTED_DATA));
    }

    #[tokio::test]
    async fn join_with_bad_id_closes_1008() {
        let state = test_state();
        let (conn, _rx) = registered(&state).await;

        let outcome =
            handle_frame(&state, &conn, r#"{"type":"join","userId":"not-an-id"}"#).await;
        assert!(matches!(outcome, FrameOutcome::Close(code, _) if code == CLOSE_POLICY_VIOLATION));
    }

    #[tokio::test]
    async fn second_join_closes_1008() {
        let state = test_state();
        let (conn, _rx) = registered(&state).await;

        let join = format!(r#"{{"type":"join","userId":"{}"}}"#, "a".repeat(24));
        assert_eq!(handle_frame(&state, &conn, &join).await, FrameOutcome::Continue);

        let rejoin = format!(r#"{{"type":"join","userId":"{}"}}"#, "b".repeat(24));
        let outcome = handle_frame(&state, &conn, &rejoin).await;
        assert!(matches!(outcome, FrameOutcome::Close(code, _) if code == CLOSE_POLICY_VIOLATION));
    }

    #[tokio::test]
    async fn enter_chat_marks_conversation_read() {
        let state = test_state();
        let users = UserRepo::new(state.db.clone());
        let alice = users.create("alice", "alice@example.com", "hash").unwrap();
        let bob = users.create("bob", "bob@example.com", "hash").unwrap();

        let messages = MessageRepo::new(state.db.clone());
        messages.create(&alice.id, &bob.id, "hi bob", false).unwrap();

        let (conn, _rx) = registered(&state).await;
        let join = format!(r#"{{"type":"join","userId":"{}"}}"#, bob.id);
        handle_frame(&state, &conn, &join).await;

        let enter = format!(r#"{{"type":"enterChat","chatWith":"{}"}}"#, alice.id);
        assert_eq!(handle_frame(&state, &conn, &enter).await, FrameOutcome::Continue);

        assert!(messages.unread_counts(&bob.id).unwrap().is_empty());
        assert_eq!(
            state.registry.active_chat_partner(&bob.id),
            Some(alice.id.clone())
        );
    }

    #[tokio::test]
    async fn enter_chat_with_bad_id_is_ignored() {
        let state = test_state();
        let (conn, _rx) = registered(&state).await;

        let join = format!(r#"{{"type":"join","userId":"{}"}}"#, "a".repeat(24));
        handle_frame(&state, &conn, &join).await;

        let outcome =
            handle_frame(&state, &conn, r#"{"type":"enterChat","chatWith":"nope"}"#).await;
        assert_eq!(outcome, FrameOutcome::Continue);
    }

    #[tokio::test]
    async fn leave_chat_clears_partner() {
        let state = test_state();
        let (conn, _rx) = registered(&state).await;

        let user = "a".repeat(24);
        let join = format!(r#"{{"type":"join","userId":"{user}"}}"#);
        handle_frame(&state, &conn, &join).await;
        let enter = format!(r#"{{"type":"enterChat","chatWith":"{}"}}"#, "b".repeat(24));
        handle_frame(&state, &conn, &enter).await;

        handle_frame(&state, &conn, r#"{"type":"leaveChat"}"#).await;
        assert_eq!(
            state
                .registry
                .active_chat_partner(&UserId::from_raw(user)),
            None
        );
    }
}
