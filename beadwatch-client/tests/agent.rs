use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use beadwatch_client::{
    AgentOptions, ClientChannel, ClientError, ClientSyncAgent, ConnectionState,
    Connector, ItemCallbacks, ReconnectPolicy,
};
use beadwatch_model::{
    ChangeEvent, ChangeKind, ClientMessage, ItemId, RepoId, ServerMessage,
    SubscribedPayload,
};
use futures::SinkExt;
use futures::channel::mpsc as fmpsc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Server side of one mock session.
struct MockSession {
    from_client: fmpsc::UnboundedReceiver<ClientMessage>,
    to_client: fmpsc::UnboundedSender<Result<ServerMessage, ClientError>>,
}

impl MockSession {
    async fn expect(&mut self) -> ClientMessage {
        use futures::StreamExt;
        tokio::time::timeout(Duration::from_secs(60), self.from_client.next())
            .await
            .expect("client message in time")
            .expect("client still connected")
    }

    async fn push(&mut self, message: ServerMessage) {
        self.to_client.send(Ok(message)).await.unwrap();
    }
}

struct MockConnector {
    attempts: AtomicUsize,
    fail_first: usize,
    sessions: mpsc::UnboundedSender<MockSession>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> beadwatch_client::Result<ClientChannel> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(ClientError::Connect("connection refused".into()));
        }

        let (client_tx, from_client) = fmpsc::unbounded();
        let (to_client, server_rx) = fmpsc::unbounded();
        self.sessions
            .send(MockSession {
                from_client,
                to_client,
            })
            .map_err(|_| ClientError::Connect("test harness gone".into()))?;

        Ok(ClientChannel {
            outgoing: Box::pin(
                client_tx.sink_map_err(|e| ClientError::Transport(e.to_string())),
            ),
            incoming: Box::pin(server_rx),
        })
    }
}

fn agent_with(
    fail_first: usize,
) -> (ClientSyncAgent, Arc<MockConnector>, mpsc::UnboundedReceiver<MockSession>)
{
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        attempts: AtomicUsize::new(0),
        fail_first,
        sessions: tx,
    });
    let agent = ClientSyncAgent::new(
        connector.clone(),
        AgentOptions {
            policy: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(20),
        },
    );
    (agent, connector, rx)
}

fn change(kind: ChangeKind, repo: &str, item: &str) -> ServerMessage {
    ServerMessage::for_change(ChangeEvent::new(
        kind,
        RepoId::from(repo),
        Some(ItemId::from(item)),
        PathBuf::from(format!("/{repo}/.beads/issues/{item}.md")),
        chrono::Utc::now(),
    ))
}

async fn wait_connected(agent: &ClientSyncAgent) {
    let mut states = agent.state_changes();
    tokio::time::timeout(
        Duration::from_secs(60),
        states.wait_for(ConnectionState::is_connected),
    )
    .await
    .expect("connected in time")
    .expect("state channel open");
}

#[tokio::test(start_paused = true)]
async fn replays_desired_set_on_connect() {
    let (agent, _connector, mut sessions) = agent_with(0);
    agent.subscribe("r1");
    agent.subscribe("r2");
    agent.connect();

    let mut session = sessions.recv().await.unwrap();
    assert_eq!(session.expect().await, ClientMessage::Subscribe("r1".into()));
    assert_eq!(session.expect().await, ClientMessage::Subscribe("r2".into()));
    wait_connected(&agent).await;

    agent.disconnect().await;
    assert_eq!(agent.state(), ConnectionState::Disconnected);
    assert!(agent.is_subscribed_to(&RepoId::from("r1")));
}

#[tokio::test(start_paused = true)]
async fn resubscribes_after_the_server_drops_the_session() {
    let (agent, _connector, mut sessions) = agent_with(0);
    agent.subscribe("r1");
    agent.connect();

    let mut first = sessions.recv().await.unwrap();
    assert_eq!(first.expect().await, ClientMessage::Subscribe("r1".into()));

    // Subscriptions added while connected go out immediately.
    wait_connected(&agent).await;
    agent.subscribe("r2");
    assert_eq!(first.expect().await, ClientMessage::Subscribe("r2".into()));

    drop(first);

    let mut second = sessions.recv().await.unwrap();
    assert_eq!(second.expect().await, ClientMessage::Subscribe("r1".into()));
    assert_eq!(second.expect().await, ClientMessage::Subscribe("r2".into()));
    assert_eq!(agent.retry_count(), 0);

    agent.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn failed_attempts_back_off_and_report() {
    let (agent, connector, mut sessions) = agent_with(3);
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    agent.on_error(move |payload| seen.lock().push(payload.code.clone()));
    agent.subscribe("r1");

    let started = Instant::now();
    agent.connect();

    let mut session = sessions.recv().await.unwrap();
    // 1s + 2s + 4s between the three refused attempts and the fourth.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(7), "waited {waited:?}");
    assert!(waited < Duration::from_secs(8), "waited {waited:?}");
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);

    assert_eq!(session.expect().await, ClientMessage::Subscribe("r1".into()));
    wait_connected(&agent).await;
    assert_eq!(agent.retry_count(), 0);
    assert_eq!(agent.last_error(), None);
    assert_eq!(
        *errors.lock(),
        vec![Some("transport".to_string()); 3]
    );

    agent.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_sends_leave_and_is_not_replayed() {
    let (agent, _connector, mut sessions) = agent_with(0);
    agent.subscribe("r1");
    agent.subscribe("r2");
    agent.connect();

    let mut session = sessions.recv().await.unwrap();
    session.expect().await;
    session.expect().await;
    wait_connected(&agent).await;

    assert!(agent.unsubscribe(&RepoId::from("r1")));
    assert!(!agent.unsubscribe(&RepoId::from("r1")));
    assert_eq!(session.expect().await, ClientMessage::Unsubscribe("r1".into()));

    agent.disconnect().await;
    agent.connect();
    let mut next = sessions.recv().await.unwrap();
    assert_eq!(next.expect().await, ClientMessage::Subscribe("r2".into()));
    agent.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn routes_pushes_and_tracks_acknowledgements() {
    let (agent, _connector, mut sessions) = agent_with(0);
    let hits = Arc::new(Mutex::new(Vec::new()));

    let watched = hits.clone();
    let items = agent.watch_items(
        "r1",
        ItemCallbacks::new()
            .on_changed(move |event: &ChangeEvent| {
                watched
                    .lock()
                    .push(event.item_id().map(|id| id.to_string()));
            }),
    );
    let deleted = Arc::new(AtomicUsize::new(0));
    let d = deleted.clone();
    agent.on_deleted(move |_| {
        d.fetch_add(1, Ordering::SeqCst);
    });

    agent.connect();
    let mut session = sessions.recv().await.unwrap();
    assert_eq!(session.expect().await, ClientMessage::Subscribe("r1".into()));
    wait_connected(&agent).await;

    session
        .push(ServerMessage::Subscribed(SubscribedPayload {
            repo_id: "r1".into(),
            client_count: 1,
        }))
        .await;
    session.push(change(ChangeKind::Modified, "r2", "bd-9")).await;
    session.push(change(ChangeKind::Modified, "r1", "bd-1")).await;
    session.push(change(ChangeKind::Deleted, "r1", "bd-2")).await;

    let mut attempts = 0;
    while deleted.load(Ordering::SeqCst) == 0 && attempts < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        attempts += 1;
    }

    assert_eq!(*hits.lock(), vec![Some("bd-1".to_string())]);
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
    assert_eq!(agent.confirmed_subscriptions(), vec![RepoId::from("r1")]);

    items.stop();
    assert_eq!(session.expect().await, ClientMessage::Unsubscribe("r1".into()));
    assert!(!agent.is_subscribed_to(&RepoId::from("r1")));
    assert!(agent.confirmed_subscriptions().is_empty());

    agent.disconnect().await;
}
