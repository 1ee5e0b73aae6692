//! Multi-peer scenarios driven directly through the engine.
//!
//! Each connection is represented by the receiving half of its outbound
//! queue, so the exact sequence of messages every peer observes can be
//! asserted without a network.

use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

use textsync_server::sync::protocol::{
    ClientMessage, ServerMessage, Snapshot, TextChangeBroadcast,
};
use textsync_server::sync::{
    Channel, ChannelLimit, EngineConfig, RateLimitConfig, SyncEngine,
};

struct Peer {
    id: String,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Peer {
    fn join(engine: &SyncEngine) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = engine.connect(tx).expect("connect");
        Self { id, rx }
    }

    fn messages(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            messages.push(msg);
        }
        messages
    }

    fn user_counts(&mut self) -> Vec<usize> {
        self.messages()
            .into_iter()
            .filter_map(|msg| match msg {
                ServerMessage::UserCount(n) => Some(n),
                _ => None,
            })
            .collect()
    }
}

#[test]
fn three_peers_edit_and_leave() {
    let engine = SyncEngine::with_defaults();

    let mut a = Peer::join(&engine);
    let mut b = Peer::join(&engine);
    let mut c = Peer::join(&engine);

    // Everyone saw an init followed by the counts broadcast since they joined
    let a_msgs = a.messages();
    assert_eq!(
        a_msgs[0],
        ServerMessage::Init(Snapshot {
            content: String::new(),
            version: 0,
            connection_id: a.id.clone(),
        })
    );
    let a_counts: Vec<_> = a_msgs
        .iter()
        .filter_map(|m| match m {
            ServerMessage::UserCount(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(a_counts, vec![1, 2, 3]);
    assert_eq!(b.user_counts(), vec![2, 3]);
    assert_eq!(c.user_counts(), vec![3]);

    engine.handle_message(&a.id, ClientMessage::TextChange { content: "hi".into() });

    let expected = ServerMessage::TextChange(TextChangeBroadcast {
        content: "hi".to_string(),
        version: 1,
        sender_id: a.id.clone(),
    });
    assert!(a.messages().is_empty());
    assert_eq!(b.messages(), vec![expected.clone()]);
    assert_eq!(c.messages(), vec![expected]);

    engine.disconnect(&b.id, "client closed");

    let left = vec![ServerMessage::UserCount(2), ServerMessage::PeerLeft(b.id.clone())];
    assert_eq!(a.messages(), left);
    assert_eq!(c.messages(), left);
    assert_eq!(engine.user_count(), 2);
}

#[test]
fn late_joiner_receives_current_snapshot() {
    let engine = SyncEngine::with_defaults();
    let a = Peer::join(&engine);

    engine.handle_message(&a.id, ClientMessage::TextChange { content: "draft".into() });
    engine.handle_message(
        &a.id,
        ClientMessage::Operation(json!({"type": "insert", "position": 5, "content": " two"})),
    );

    let mut late = Peer::join(&engine);
    assert_eq!(
        late.messages()[0],
        ServerMessage::Init(Snapshot {
            content: "draft two".to_string(),
            version: 2,
            connection_id: late.id.clone(),
        })
    );
}

#[test]
fn last_write_wins_across_peers() {
    let engine = SyncEngine::with_defaults();
    let a = Peer::join(&engine);
    let b = Peer::join(&engine);

    engine.handle_message(&a.id, ClientMessage::TextChange { content: "A".into() });
    engine.handle_message(&b.id, ClientMessage::TextChange { content: "B".into() });

    assert_eq!(engine.document(), ("B".to_string(), 2));
}

#[test]
fn version_counts_only_accepted_mutations() {
    let config = EngineConfig::default().with_rate_limits(
        RateLimitConfig::default()
            .with_limit(Channel::Edit, ChannelLimit::new(2, Duration::from_secs(60)))
            .with_limit(Channel::Operation, ChannelLimit::new(2, Duration::from_secs(60))),
    );
    let engine = SyncEngine::new(config);
    let mut a = Peer::join(&engine);
    a.messages();

    for i in 0..4 {
        engine.handle_message(&a.id, ClientMessage::TextChange { content: i.to_string() });
    }
    assert_eq!(engine.document(), ("1".to_string(), 2));

    // Invalid operation consumes budget but never a version
    engine.handle_message(&a.id, ClientMessage::Operation(json!({"type": "move"})));
    engine.handle_message(
        &a.id,
        ClientMessage::Operation(json!({"type": "delete", "position": 0, "length": 1})),
    );
    engine.handle_message(
        &a.id,
        ClientMessage::Operation(json!({"type": "delete", "position": 0, "length": 1})),
    );
    assert_eq!(engine.document(), (String::new(), 3));

    let errors = a
        .messages()
        .into_iter()
        .filter(|m| matches!(m, ServerMessage::Error(_)))
        .count();
    assert_eq!(errors, 4);
}

#[test]
fn channels_have_independent_budgets() {
    let config = EngineConfig::default().with_rate_limits(
        RateLimitConfig::default()
            .with_limit(Channel::Edit, ChannelLimit::new(1, Duration::from_secs(60))),
    );
    let engine = SyncEngine::new(config);
    let a = Peer::join(&engine);
    let mut b = Peer::join(&engine);

    engine.handle_message(&a.id, ClientMessage::TextChange { content: "one".into() });
    engine.handle_message(&a.id, ClientMessage::TextChange { content: "two".into() });
    engine.handle_message(
        &a.id,
        ClientMessage::Operation(json!({"type": "insert", "position": 3, "content": "!"})),
    );
    engine.handle_message(&a.id, ClientMessage::CursorChange { position: 4 });

    assert_eq!(engine.document(), ("one!".to_string(), 2));

    let relayed: Vec<_> = b
        .messages()
        .into_iter()
        .filter(|m| !matches!(m, ServerMessage::UserCount(_) | ServerMessage::Init(_)))
        .collect();
    assert_eq!(relayed.len(), 3);
}

#[test]
fn reconnect_gets_fresh_identity() {
    let engine = SyncEngine::with_defaults();
    let a = Peer::join(&engine);
    engine.disconnect(&a.id, "network");
    engine.disconnect(&a.id, "cleanup");

    let again = Peer::join(&engine);
    assert_ne!(again.id, a.id);
    assert_eq!(engine.user_count(), 1);
    assert!(engine.connection(&a.id).is_none());
}
