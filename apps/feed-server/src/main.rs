//! Collaborative feed WebSocket server
//! Assigns canonical item ids and sequence numbers, confirms submissions
//! back to their submitter and broadcasts feed events and presence to
//! every other collaborator in the room.

use feed::{
    FeedId, FeedItem, FeedMessage, ItemId, ItemState, Payload, PresenceEntry, PresenceSet,
    PresenceUpdate, RemoteEvent, TempId, UserId,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

type Tx = mpsc::UnboundedSender<Message>;
type RoomMap = Arc<RwLock<HashMap<FeedId, Room>>>;

/// Server-side room state
struct Room {
    users: HashMap<UserId, Connection>,
    items: Vec<FeedItem>,
    next_sequence: u64,
    presence: PresenceSet,
}

/// One connected collaborator
struct Connection {
    tx: Tx,
}

impl Room {
    fn new() -> Self {
        Self {
            users: HashMap::new(),
            items: Vec::new(),
            next_sequence: 1,
            presence: PresenceSet::new(),
        }
    }

    fn add_user(&mut self, user_id: UserId, display_name: &str, tx: Tx) {
        self.users.insert(user_id, Connection { tx });
        self.presence.join(user_id, display_name);
    }

    fn remove_user(&mut self, user_id: UserId) {
        self.users.remove(&user_id);
        self.presence.leave(user_id);
    }

    /// Turn a submission into a canonical item: assign the id, the next
    /// sequence and the authoritative timestamp, and append to the log.
    fn confirm(&mut self, temp_id: TempId, author_id: UserId, payload: Payload) -> FeedItem {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let item = FeedItem {
            id: Some(ItemId::new(format!("itm-{}", uuid::Uuid::new_v4()))),
            temp_id: Some(temp_id),
            sequence: Some(sequence),
            author_id,
            payload,
            created_at: chrono::Utc::now(),
            state: ItemState::Confirmed,
        };
        self.items.push(item.clone());
        item
    }

    fn items_since(&self, since: Option<u64>) -> Vec<FeedItem> {
        match since {
            None => self.items.clone(),
            Some(sequence) => self
                .items
                .iter()
                .filter(|item| item.sequence.is_some_and(|s| s > sequence))
                .cloned()
                .collect(),
        }
    }

    fn member_list(&self) -> Vec<PresenceEntry> {
        self.presence.members().into_iter().cloned().collect()
    }

    fn broadcast(&self, msg: &FeedMessage, exclude_user: Option<UserId>) {
        let json = match serde_json::to_string(msg) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                return;
            }
        };

        for (user_id, conn) in &self.users {
            if Some(*user_id) == exclude_user {
                continue;
            }

            if let Err(e) = conn.tx.send(Message::Text(json.clone())) {
                error!("Failed to send to user {}: {}", user_id.0, e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("feed_server=debug,feed=debug")
        .init();

    let addr = "127.0.0.1:9090";
    let listener = TcpListener::bind(&addr).await?;
    info!("Feed server listening on: {}", addr);

    let rooms: RoomMap = Arc::new(RwLock::new(HashMap::new()));

    while let Ok((stream, addr)) = listener.accept().await {
        info!("New connection from: {}", addr);
        tokio::spawn(handle_connection(stream, addr, rooms.clone()));
    }

    Ok(())
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, rooms: RoomMap) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    info!("WebSocket connection established: {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Task to send messages to the client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                error!("Failed to send message: {}", e);
                break;
            }
        }
    });

    // Handle incoming messages
    let mut feed_id: Option<FeedId> = None;
    let mut user_id: Option<UserId> = None;

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                error!("Error receiving message: {}", e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let result =
                    handle_feed_message(&text, &rooms, &tx, &mut feed_id, &mut user_id).await;

                if let Err(e) = result {
                    error!("Error handling message: {}", e);
                    let error_msg = FeedMessage::Error {
                        message: e.to_string(),
                    };
                    if let Ok(json) = serde_json::to_string(&error_msg) {
                        let _ = tx.send(Message::Text(json));
                    }
                }
            }
            Message::Ping(data) => {
                let _ = tx.send(Message::Pong(data));
            }
            Message::Close(_) => {
                info!("Client requested close");
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    if let (Some(fid), Some(uid)) = (feed_id, user_id) {
        let mut rooms_lock = rooms.write().await;
        if let Some(room) = rooms_lock.get_mut(&fid) {
            info!("User {} left feed {}", uid.0, fid.0);
            room.remove_user(uid);

            // Broadcast user left
            let msg = FeedMessage::Presence {
                update: PresenceUpdate::Left { user_id: uid },
            };
            room.broadcast(&msg, None);

            // Remove room if empty
            if room.users.is_empty() {
                info!("Feed {} is empty, removing", fid.0);
                rooms_lock.remove(&fid);
            }
        }
    }

    send_task.abort();
    info!("Connection closed: {}", addr);
}

async fn handle_feed_message(
    text: &str,
    rooms: &RoomMap,
    tx: &Tx,
    current_feed: &mut Option<FeedId>,
    current_user: &mut Option<UserId>,
) -> anyhow::Result<()> {
    let msg: FeedMessage = serde_json::from_str(text)?;

    match msg {
        FeedMessage::Connect {
            feed_id,
            user_id,
            display_name,
        } => {
            info!("User {} connecting to feed {}", display_name, feed_id.0);

            let mut rooms_lock = rooms.write().await;
            let room = rooms_lock.entry(feed_id).or_insert_with(Room::new);

            room.add_user(user_id, &display_name, tx.clone());
            *current_feed = Some(feed_id);
            *current_user = Some(user_id);

            // Send the canonical log and current members to the newcomer
            let connected_msg = FeedMessage::Connected {
                feed_id,
                user_id,
                items: room.items_since(None),
                presence: room.member_list(),
            };
            let json = serde_json::to_string(&connected_msg)?;
            tx.send(Message::Text(json))?;

            // Broadcast the join to everyone else
            let presence_msg = FeedMessage::Presence {
                update: PresenceUpdate::Joined {
                    user_id,
                    display_name: display_name.clone(),
                },
            };
            room.broadcast(&presence_msg, Some(user_id));

            info!("User {} joined feed {}", display_name, feed_id.0);
        }

        FeedMessage::Submit {
            temp_id,
            author_id,
            payload,
        } => {
            let feed_id = current_feed
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Not connected to any feed"))?;

            let mut rooms_lock = rooms.write().await;
            let room = rooms_lock
                .get_mut(feed_id)
                .ok_or_else(|| anyhow::anyhow!("Feed not found"))?;

            let item = room.confirm(temp_id, author_id, payload);
            room.presence.touch(author_id);

            // Confirm directly to the submitter
            let confirm_msg = FeedMessage::Confirmed { item: item.clone() };
            let json = serde_json::to_string(&confirm_msg)?;
            tx.send(Message::Text(json))?;

            // Broadcast the insert to everyone else
            let event_msg = FeedMessage::Event {
                event: RemoteEvent::insert(item),
            };
            room.broadcast(&event_msg, *current_user);
        }

        FeedMessage::SyncRequest { since } => {
            let feed_id = current_feed
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Not connected to any feed"))?;

            let rooms_lock = rooms.read().await;
            let room = rooms_lock
                .get(feed_id)
                .ok_or_else(|| anyhow::anyhow!("Feed not found"))?;

            let response = FeedMessage::SyncResponse {
                items: room.items_since(since),
            };
            let json = serde_json::to_string(&response)?;
            tx.send(Message::Text(json))?;
        }

        FeedMessage::Presence { update } => {
            let feed_id = current_feed
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Not connected to any feed"))?;

            let mut rooms_lock = rooms.write().await;
            if let Some(room) = rooms_lock.get_mut(feed_id) {
                match &update {
                    PresenceUpdate::Joined {
                        user_id,
                        display_name,
                    } => room.presence.join(*user_id, display_name.clone()),
                    PresenceUpdate::Left { user_id } => room.presence.leave(*user_id),
                }
                room.broadcast(&FeedMessage::Presence { update }, *current_user);
            }
        }

        FeedMessage::Ping => {
            let json = serde_json::to_string(&FeedMessage::Pong)?;
            tx.send(Message::Text(json))?;
        }

        FeedMessage::Pong => {}

        _ => {
            warn!("Unexpected message type from client");
        }
    }

    Ok(())
}
