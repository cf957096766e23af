use aviator_execution::{Outbound, PlaceWager, WagerError};
use aviator_types::{ClientMessage, ConnectionId, PlayerInfo, ServerMessage, WagerSlot};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::identity::{Identity, IdentityError};
use crate::{lock, AppState};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Per-connection state.
#[derive(Debug)]
pub struct Session {
    pub connection: ConnectionId,
    pub identity: Option<Identity>,
}

impl Session {
    pub fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            identity: None,
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut session = Session::new(state.next_connection_id());
    let connection = session.connection;
    let mut broadcast_rx = state.broadcaster.subscribe();
    info!(%connection, "connection opened");

    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let payload = match serde_json::to_string(&message) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(?err, "failed to encode outbound message");
                    continue;
                }
            };
            if sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    let broadcast_task = {
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let message = match broadcast_rx.recv().await {
                    Ok(Outbound::Broadcast(message)) => message,
                    Ok(Outbound::Direct {
                        connection: target,
                        message,
                    }) if target == connection => message,
                    Ok(Outbound::Direct { .. }) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%connection, skipped, "subscriber lagged; skipped messages");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(message).is_err() {
                    break;
                }
            }
        })
    };

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(inbound) => {
                    let now_ms = state.clock.now_ms();
                    let outbound = handle_client_message(&state, &mut session, inbound, now_ms);
                    deliver(&state, connection, &tx, outbound);
                }
                Err(err) => {
                    warn!(%connection, ?err, "invalid inbound message");
                    let _ = tx.send(ServerMessage::error("Invalid message", None));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    disconnect(&state, &session);
    info!(%connection, "connection closed");
    write_task.abort();
    broadcast_task.abort();
}

/// Send replies for this connection straight to its writer and everything
/// else through the broadcaster.
fn deliver(
    state: &AppState,
    connection: ConnectionId,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    outbound: Vec<Outbound>,
) {
    for message in outbound {
        match message {
            Outbound::Direct {
                connection: target,
                message,
            } if target == connection => {
                let _ = tx.send(message);
            }
            other => state.dispatch([other]),
        }
    }
}

pub fn disconnect(state: &AppState, session: &Session) {
    let outbound = lock(&state.engine).disconnect(session.connection);
    state.dispatch(outbound);
    if let Some(identity) = &session.identity {
        state.identity.release(identity);
    }
}

/// Apply one client request and return the resulting messages.
pub fn handle_client_message(
    state: &AppState,
    session: &mut Session,
    message: ClientMessage,
    now_ms: u64,
) -> Vec<Outbound> {
    let connection = session.connection;
    match message {
        ClientMessage::EnterRoom { token } => {
            let identity = state.identity.authenticate(connection, token.as_deref());
            if let Some(previous) = session.identity.take() {
                if previous.user_id() != identity.user_id() {
                    state.identity.release(&previous);
                }
            }
            let balance = state.identity.balance(identity.user_id()).unwrap_or(0.0);
            info!(
                %connection,
                user_id = %identity.user_id(),
                authenticated = identity.authenticated,
                "entered room"
            );
            let mut outbound = vec![Outbound::direct(
                connection,
                ServerMessage::MyInfo(PlayerInfo {
                    user_id: identity.display.user_id.clone(),
                    name: identity.display.name.clone(),
                    avatar: identity.display.avatar.clone(),
                    balance,
                    authenticated: identity.authenticated,
                }),
            )];
            let welcome = lock(&state.engine).welcome(connection, now_ms);
            outbound.extend(
                welcome
                    .into_iter()
                    .map(|message| Outbound::direct(connection, message)),
            );
            session.identity = Some(identity);
            outbound
        }
        ClientMessage::PlaceBet {
            stake,
            target,
            slot,
            auto,
        } => match &session.identity {
            Some(identity) => place_bet(state, connection, identity, stake, target, slot, auto, now_ms),
            None => vec![not_in_room(connection, slot)],
        },
        ClientMessage::CashOut { slot, .. } => match &session.identity {
            Some(_) => cash_out(state, connection, slot, now_ms),
            None => vec![not_in_room(connection, slot)],
        },
    }
}

fn not_in_room(connection: ConnectionId, slot: WagerSlot) -> Outbound {
    Outbound::direct(connection, ServerMessage::error("Enter the room first", Some(slot)))
}

fn rejected(connection: ConnectionId, slot: WagerSlot, err: WagerError) -> Vec<Outbound> {
    debug!(%connection, slot = slot.as_str(), "request rejected: {err}");
    vec![Outbound::direct(
        connection,
        ServerMessage::error(err.to_string(), Some(slot)),
    )]
}

#[allow(clippy::too_many_arguments)]
fn place_bet(
    state: &AppState,
    connection: ConnectionId,
    identity: &Identity,
    stake: f64,
    target: f64,
    slot: WagerSlot,
    auto: bool,
    now_ms: u64,
) -> Vec<Outbound> {
    let user_id = identity.user_id();
    let mut engine = lock(&state.engine);
    let balance = state.identity.balance(user_id).unwrap_or(0.0);
    if let Err(err) = engine.validate(now_ms, stake, balance) {
        return rejected(connection, slot, err);
    }

    let balance = match state.identity.adjust_balance(user_id, -stake) {
        Ok(balance) => balance,
        Err(IdentityError::InsufficientBalance) => {
            return rejected(connection, slot, WagerError::InsufficientBalance)
        }
        Err(err) => {
            warn!(%connection, %user_id, "failed to debit stake: {err}");
            return vec![Outbound::direct(
                connection,
                ServerMessage::error("Unable to place bet", Some(slot)),
            )];
        }
    };

    let request = PlaceWager {
        connection,
        slot,
        stake,
        target,
        auto,
        player: identity.display.clone(),
    };
    match engine.place(now_ms, request) {
        Ok(mut outbound) => {
            outbound.push(Outbound::direct(connection, ServerMessage::Balance { balance }));
            outbound
        }
        Err(err) => {
            if let Err(refund) = state.identity.adjust_balance(user_id, stake) {
                warn!(%connection, %user_id, stake, "failed to refund rejected stake: {refund}");
            }
            rejected(connection, slot, err)
        }
    }
}

fn cash_out(state: &AppState, connection: ConnectionId, slot: WagerSlot, now_ms: u64) -> Vec<Outbound> {
    let mut engine = lock(&state.engine);
    let (cash_out, mut outbound) = match engine.cash_out(now_ms, connection, slot) {
        Ok(result) => result,
        Err(err) => return rejected(connection, slot, err),
    };
    match state
        .identity
        .adjust_balance(&cash_out.user_id, cash_out.payout)
    {
        Ok(balance) => outbound.push(Outbound::direct(connection, ServerMessage::Balance { balance })),
        Err(err) => warn!(
            %connection,
            user_id = %cash_out.user_id,
            payout = cash_out.payout,
            "failed to credit cash out: {err}"
        ),
    }
    outbound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use aviator_types::Phase;

    fn directs(outbound: &[Outbound]) -> Vec<&ServerMessage> {
        outbound
            .iter()
            .filter_map(|message| match message {
                Outbound::Direct { message, .. } => Some(message),
                Outbound::Broadcast(_) => None,
            })
            .collect()
    }

    fn error_message(outbound: &[Outbound]) -> Option<String> {
        directs(outbound).into_iter().find_map(|message| match message {
            ServerMessage::Error { message, .. } => Some(message.clone()),
            _ => None,
        })
    }

    fn balance(outbound: &[Outbound]) -> Option<f64> {
        directs(outbound).into_iter().find_map(|message| match message {
            ServerMessage::Balance { balance } => Some(*balance),
            _ => None,
        })
    }

    fn enter(state: &AppState, token: Option<&str>) -> Session {
        let mut session = Session::new(state.next_connection_id());
        let outbound = handle_client_message(
            state,
            &mut session,
            ClientMessage::EnterRoom {
                token: token.map(str::to_string),
            },
            0,
        );
        assert!(matches!(
            directs(&outbound)[0],
            ServerMessage::MyInfo(_)
        ));
        session
    }

    fn bet(stake: f64, slot: WagerSlot) -> ClientMessage {
        ClientMessage::PlaceBet {
            stake,
            target: 2.0,
            slot,
            auto: false,
        }
    }

    #[test]
    fn test_enter_room_sends_identity_and_snapshot() {
        let state = test_support::state();
        let mut session = Session::new(state.next_connection_id());
        let outbound = handle_client_message(
            &state,
            &mut session,
            ClientMessage::EnterRoom {
                token: Some("secret".to_string()),
            },
            0,
        );
        let messages = directs(&outbound);
        let ServerMessage::MyInfo(info) = messages[0] else {
            panic!("expected player info");
        };
        assert_eq!(info.user_id, "alice");
        assert_eq!(info.balance, 100.0);
        assert!(info.authenticated);
        assert!(matches!(messages[1], ServerMessage::GameState(_)));
        assert!(messages
            .iter()
            .any(|message| matches!(message, ServerMessage::BetLimits(_))));
        assert!(session.identity.is_some());
    }

    #[test]
    fn test_requests_before_entering_are_rejected() {
        let state = test_support::state();
        let mut session = Session::new(state.next_connection_id());
        let outbound = handle_client_message(&state, &mut session, bet(10.0, WagerSlot::Primary), 0);
        assert_eq!(error_message(&outbound).as_deref(), Some("Enter the room first"));
    }

    #[test]
    fn test_place_bet_debits_balance() {
        let state = test_support::state();
        let mut session = enter(&state, None);
        let outbound = handle_client_message(&state, &mut session, bet(50.0, WagerSlot::Primary), 0);
        assert_eq!(error_message(&outbound), None);
        assert_eq!(balance(&outbound), Some(950.0));
        assert!(outbound
            .iter()
            .any(|message| matches!(message, Outbound::Broadcast(ServerMessage::Wagers { .. }))));

        // Same slot again: rejected and refunded.
        let outbound = handle_client_message(&state, &mut session, bet(50.0, WagerSlot::Primary), 0);
        assert_eq!(
            error_message(&outbound).as_deref(),
            Some("Bet already placed for this slot")
        );
        let user_id = session.identity.as_ref().unwrap().user_id().to_string();
        assert_eq!(state.identity.balance(&user_id), Some(950.0));
    }

    #[test]
    fn test_place_bet_validation_errors() {
        let state = test_support::state();
        let mut session = enter(&state, Some("secret"));
        let cases = [
            (0.5, "Minimum bet is 1"),
            (5_000.0, "Maximum bet is 1000"),
            (150.0, "Insufficient balance"),
        ];
        for (stake, expected) in cases {
            let outbound =
                handle_client_message(&state, &mut session, bet(stake, WagerSlot::Primary), 0);
            assert_eq!(error_message(&outbound).as_deref(), Some(expected));
        }
        assert_eq!(state.identity.balance("alice"), Some(100.0));

        let outbound = handle_client_message(&state, &mut session, bet(10.0, WagerSlot::Primary), 6_000);
        assert_eq!(
            error_message(&outbound).as_deref(),
            Some("Betting phase has ended")
        );
    }

    #[test]
    fn test_cash_out_before_flight_is_rejected() {
        let state = test_support::state();
        let mut session = enter(&state, None);
        handle_client_message(&state, &mut session, bet(10.0, WagerSlot::Secondary), 0);
        let outbound = handle_client_message(
            &state,
            &mut session,
            ClientMessage::CashOut {
                slot: WagerSlot::Secondary,
                multiplier: Some(50.0),
            },
            100,
        );
        assert_eq!(
            error_message(&outbound).as_deref(),
            Some("Cannot cash out at this time")
        );
        assert_eq!(lock(&state.engine).phase(), Phase::Betting);
    }

    #[test]
    fn test_disconnect_forfeits_wagers_and_demo_wallet() {
        let state = test_support::state();
        let mut session = enter(&state, None);
        handle_client_message(&state, &mut session, bet(10.0, WagerSlot::Primary), 0);
        assert_eq!(lock(&state.engine).ledger().len(), 1);

        let mut receiver = state.broadcaster.subscribe();
        disconnect(&state, &session);
        assert!(lock(&state.engine).ledger().is_empty());
        assert!(matches!(
            receiver.try_recv().unwrap(),
            Outbound::Broadcast(ServerMessage::Wagers { wagers }) if wagers.is_empty()
        ));
        let user_id = session.identity.as_ref().unwrap().user_id().to_string();
        assert_eq!(state.identity.balance(&user_id), None);
    }

    #[test]
    fn test_reentering_with_token_releases_guest_wallet() {
        let state = test_support::state();
        let mut session = enter(&state, None);
        let guest = session.identity.as_ref().unwrap().user_id().to_string();
        assert_eq!(state.identity.balance(&guest), Some(1_000.0));

        // Entering again as the same guest keeps the wallet.
        handle_client_message(&state, &mut session, ClientMessage::EnterRoom { token: None }, 0);
        assert_eq!(state.identity.balance(&guest), Some(1_000.0));

        handle_client_message(
            &state,
            &mut session,
            ClientMessage::EnterRoom {
                token: Some("secret".to_string()),
            },
            0,
        );
        assert_eq!(session.identity.as_ref().unwrap().user_id(), "alice");
        assert_eq!(state.identity.balance(&guest), None);

        disconnect(&state, &session);
        assert_eq!(state.identity.balance(&guest), None);
        assert_eq!(state.identity.balance("alice"), Some(100.0));
    }
}
