//! Network and hashing contexts running as separate tasks, connected
//! only by channels.

use hashwatch_filter::config::{Capability, Confidence, HashingConfig, HashingMode};
use hashwatch_filter::hashing::{digest_of, HashEngine, KnownHashSet, Sha256Hasher};
use hashwatch_filter::network::{ConfigState, NetworkContext};
use hashwatch_filter::protocol::{
    ChannelError, MessageChannel, NetworkMessage, RequestId, WorkerMessage,
};
use tokio::sync::mpsc;

struct TaskSender<M>(mpsc::UnboundedSender<M>);

impl<M> MessageChannel<M> for TaskSender<M> {
    fn post(&mut self, message: M) -> Result<(), ChannelError> {
        self.0
            .send(message)
            .map_err(|_| ChannelError::Unavailable("hashing task".to_string()))
    }
}

type HashingTask = tokio::task::JoinHandle<(usize, usize)>;

fn spawn_hashing(
    known: KnownHashSet,
) -> (
    TaskSender<WorkerMessage>,
    mpsc::UnboundedReceiver<NetworkMessage>,
    HashingTask,
) {
    let (worker_tx, mut worker_rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<NetworkMessage>();

    let task = tokio::spawn(async move {
        let mut engine = HashEngine::<Sha256Hasher, _>::new(known, TaskSender(reply_tx));
        let mut matches = 0;
        while let Some(message) = worker_rx.recv().await {
            if engine.handle(message).is_some() {
                matches += 1;
            }
        }
        (matches, engine.job_count())
    });

    (TaskSender(worker_tx), reply_rx, task)
}

fn enabled(mode: HashingMode) -> ConfigState {
    ConfigState::new(HashingConfig {
        enabled: true,
        mode,
    })
}

async fn collect_replies(mut replies: mpsc::UnboundedReceiver<NetworkMessage>) -> Vec<String> {
    let mut urls = Vec::new();
    while let Some(NetworkMessage::HashFound { url }) = replies.recv().await {
        urls.push(url);
    }
    urls
}

#[tokio::test]
async fn test_streamed_body_match() {
    let mut known = KnownHashSet::new();
    known.insert(digest_of::<Sha256Hasher>(b"AAABBBCCC"), Confidence::Confirmed);
    let (worker, replies, task) = spawn_hashing(known);

    let mut net = NetworkContext::new(enabled(HashingMode::Most), Capability::Streaming, worker);
    net.start();
    let mut downstream = Vec::new();

    let matching = net.on_response(RequestId::from("7"), "http://x/y").unwrap();
    let other = net.on_response(RequestId::from("8"), "http://x/z").unwrap();
    for chunk in [&b"AAA"[..], b"BBB", b"CCC"] {
        net.on_data(&matching, chunk.to_vec(), &mut downstream);
        net.on_data(&other, b"zzz".to_vec(), &mut downstream);
    }
    net.on_stop(matching);
    net.on_error(other);

    let empty = net.on_response(RequestId::from("9"), "http://x/empty").unwrap();
    net.on_stop(empty);

    assert!(net.registry().is_empty());
    drop(net);

    let (matches, open_jobs) = task.await.unwrap();
    assert_eq!(matches, 1);
    assert_eq!(open_jobs, 0);
    assert_eq!(collect_replies(replies).await, vec!["http://x/y".to_string()]);
}

#[tokio::test]
async fn test_url_only_mode_switch() {
    let mut known = KnownHashSet::new();
    known.insert(digest_of::<Sha256Hasher>(b"http://z"), Confidence::Likely);
    let (worker, replies, task) = spawn_hashing(known);

    let mut net = NetworkContext::new(enabled(HashingMode::Strict), Capability::UrlOnly, worker);
    net.start();

    assert!(net.on_response(RequestId::from("1"), "http://z").is_none());

    net.on_config_change(HashingConfig {
        enabled: true,
        mode: HashingMode::Most,
    });
    assert!(net.on_response(RequestId::from("2"), "http://z").is_none());

    net.on_config_change(HashingConfig {
        enabled: false,
        mode: HashingMode::All,
    });
    assert!(net.on_response(RequestId::from("3"), "http://z").is_none());

    assert!(net.registry().is_empty());
    drop(net);

    let (matches, _) = task.await.unwrap();
    assert_eq!(matches, 1);
    assert_eq!(collect_replies(replies).await, vec!["http://z".to_string()]);
}
