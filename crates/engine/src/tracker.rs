//! Anchoring-chain event tracker.
//!
//! Long-running poller against the anchoring chain's JSON-RPC endpoint:
//! `eth_blockNumber` for the head, then `eth_getLogs` over the next block
//! window, filtered by the emitter contract and the `StateSynced` topic.
//! Matching logs are handed to the [`LogSubscriber`] in `(block, log index)`
//! order, and the cursor is persisted only after the whole batch was
//! delivered, so a crash re-delivers the batch, which the idempotent event
//! store absorbs.
//!
//! The tracker's lifetime is nested inside the manager's: it shares the
//! manager's shutdown `Notify` and stops before `close()` returns control
//! to consensus. RPC failures are logged and retried on the next tick; they
//! never reach the consensus hooks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, warn};

use bridge_common::abi;
use bridge_common::types::{Address, Hash32};
use bridge_store::BridgeStore;

use crate::error::BridgeError;

/// Receiver of anchored logs; the commitment manager implements this.
pub trait LogSubscriber: Send + Sync {
    fn add_log(&self, log: &EthLog);
}

// ════════════════════════════════════════════════════════════════════════════
// LOG SCHEMA
// ════════════════════════════════════════════════════════════════════════════

/// One log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthLog {
    pub address: Address,
    pub topics: Vec<Hash32>,
    /// ABI-encoded non-indexed fields, `0x`-prefixed hex.
    pub data: String,
    /// Hex quantity; absent for pending logs.
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<Hash32>,
}

impl EthLog {
    pub fn data_bytes(&self) -> Result<Vec<u8>, BridgeError> {
        let s = self.data.strip_prefix("0x").unwrap_or(&self.data);
        hex::decode(s).map_err(|e| BridgeError::Decode(format!("log data: {e}")))
    }

    pub fn block_number_u64(&self) -> Option<u64> {
        self.block_number.as_deref().and_then(|q| parse_quantity(q).ok())
    }

    pub fn log_index_u64(&self) -> Option<u64> {
        self.log_index.as_deref().and_then(|q| parse_quantity(q).ok())
    }
}

/// Parses a `0x`-prefixed hex quantity.
fn parse_quantity(q: &str) -> Result<u64, BridgeError> {
    let s = q.strip_prefix("0x").unwrap_or(q);
    u64::from_str_radix(s, 16).map_err(|e| BridgeError::Decode(format!("quantity {q:?}: {e}")))
}

// ════════════════════════════════════════════════════════════════════════════
// JSON-RPC PLUMBING
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RpcResponse<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

async fn rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: serde_json::Value,
    timeout: Duration,
) -> Result<T, String> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });

    let response = client
        .post(url)
        .json(&body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| format!("{method}: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("{method}: HTTP status {}", response.status()));
    }

    let rpc: RpcResponse<T> = response
        .json()
        .await
        .map_err(|e| format!("{method}: invalid response body: {e}"))?;

    if let Some(err) = rpc.error {
        return Err(format!("{method}: rpc error {}: {}", err.code, err.message));
    }
    rpc.result.ok_or_else(|| format!("{method}: response missing result"))
}

// ════════════════════════════════════════════════════════════════════════════
// EVENT TRACKER
// ════════════════════════════════════════════════════════════════════════════

/// Tracker parameters, derived from the bridge configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub rpc_url: String,
    /// Emitter contract on the anchoring chain.
    pub contract: Address,
    pub poll_interval: Duration,
    pub block_batch_size: u64,
    pub start_block: u64,
    pub request_timeout: Duration,
}

/// Polls the anchoring chain and feeds decoded-eligible logs to the
/// subscriber. One instance per engine; `start` spawns the background task.
///
/// The subscriber back-reference is a weak capability, not ownership: the
/// tracker's lifetime is nested inside its owner's, and the loop stops on
/// its own once the subscriber is gone.
pub struct EventTracker {
    config: TrackerConfig,
    store: BridgeStore,
    subscriber: Weak<dyn LogSubscriber>,
    client: reqwest::Client,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl EventTracker {
    pub fn new(
        config: TrackerConfig,
        store: BridgeStore,
        subscriber: Weak<dyn LogSubscriber>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            config,
            store,
            subscriber,
            client: reqwest::Client::new(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
        }
    }

    /// Spawns the poll loop. Errors if already started.
    pub fn start(&self) -> Result<(), BridgeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::Tracker("event tracker already running".into()));
        }

        let config = self.config.clone();
        let store = self.store.clone();
        let subscriber = Weak::clone(&self.subscriber);
        let client = self.client.clone();
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            Self::background_task(config, store, subscriber, client, running, shutdown).await;
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the poll loop. Idempotent; used both by `close()` and to unwind
    /// a partial startup.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    async fn background_task(
        config: TrackerConfig,
        store: BridgeStore,
        subscriber: Weak<dyn LogSubscriber>,
        client: reqwest::Client,
        running: Arc<AtomicBool>,
        shutdown: Arc<Notify>,
    ) {
        debug!(contract = %config.contract, "event tracker started");

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = shutdown.notified() => {
                    running.store(false, Ordering::SeqCst);
                    break;
                }
                _ = tokio::time::sleep(config.poll_interval) => {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    // the strong handle lives only for the cycle
                    let Some(subscriber) = subscriber.upgrade() else {
                        debug!("log subscriber dropped, stopping event tracker");
                        running.store(false, Ordering::SeqCst);
                        break;
                    };
                    if let Err(e) = Self::poll_cycle(&config, &store, &subscriber, &client).await {
                        warn!(error = %e, "event tracker poll failed, will retry");
                    }
                }
            }
        }

        debug!("event tracker stopped");
    }

    /// One head check + one log batch.
    async fn poll_cycle(
        config: &TrackerConfig,
        store: &BridgeStore,
        subscriber: &Arc<dyn LogSubscriber>,
        client: &reqwest::Client,
    ) -> Result<(), String> {
        let head_hex: String = rpc_call(
            client,
            &config.rpc_url,
            "eth_blockNumber",
            json!([]),
            config.request_timeout,
        )
        .await?;
        let head = parse_quantity(&head_hex).map_err(|e| e.to_string())?;

        let from = match store.get_last_processed_block().map_err(|e| e.to_string())? {
            Some(last) => last + 1,
            None => config.start_block,
        };
        if from > head {
            return Ok(());
        }
        let to = head.min(from + config.block_batch_size - 1);

        let params = json!([{
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
            "address": config.contract.to_string(),
            "topics": [abi::state_sync_event_topic().to_string()],
        }]);
        let mut logs: Vec<EthLog> = rpc_call(
            client,
            &config.rpc_url,
            "eth_getLogs",
            params,
            config.request_timeout,
        )
        .await?;

        // deliver in chain order; the contract numbers events in this order
        logs.sort_by_key(|l| (l.block_number_u64().unwrap_or(0), l.log_index_u64().unwrap_or(0)));
        for log in &logs {
            subscriber.add_log(log);
        }

        store
            .set_last_processed_block(to)
            .map_err(|e| e.to_string())?;

        if !logs.is_empty() {
            debug!(from, to, count = logs.len(), "delivered anchored logs");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_common::types::StateSyncEvent;
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Recorder {
        logs: Mutex<Vec<EthLog>>,
    }

    impl LogSubscriber for Recorder {
        fn add_log(&self, log: &EthLog) {
            self.logs.lock().push(log.clone());
        }
    }

    fn log_json(ev: &StateSyncEvent, block: u64, index: u64, contract: &Address) -> serde_json::Value {
        let mut id_word = [0u8; 32];
        id_word[24..].copy_from_slice(&ev.id.to_be_bytes());
        let mut sender = [0u8; 32];
        sender[12..].copy_from_slice(ev.sender.as_bytes());
        let mut receiver = [0u8; 32];
        receiver[12..].copy_from_slice(ev.receiver.as_bytes());

        // data region: offset word + length word + padded payload
        let mut data = Vec::new();
        data.extend_from_slice(&{
            let mut w = [0u8; 32];
            w[31] = 32;
            w
        });
        let mut len_word = [0u8; 32];
        len_word[24..].copy_from_slice(&(ev.data.len() as u64).to_be_bytes());
        data.extend_from_slice(&len_word);
        data.extend_from_slice(&ev.data);
        data.resize((data.len() + 31) / 32 * 32, 0);

        json!({
            "address": contract.to_string(),
            "topics": [
                abi::state_sync_event_topic().to_string(),
                format!("0x{}", hex::encode(id_word)),
                format!("0x{}", hex::encode(sender)),
                format!("0x{}", hex::encode(receiver)),
            ],
            "data": format!("0x{}", hex::encode(data)),
            "blockNumber": format!("0x{block:x}"),
            "logIndex": format!("0x{index:x}"),
            "transactionHash": format!("0x{}", hex::encode([7u8; 32])),
        })
    }

    fn sample_event(id: u64) -> StateSyncEvent {
        StateSyncEvent {
            id,
            sender: Address::from_bytes([0x11; 20]),
            receiver: Address::from_bytes([0x22; 20]),
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity("0x14").unwrap(), 20);
        assert_eq!(parse_quantity("ff").unwrap(), 255);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tracker_delivers_logs_in_order_and_advances_cursor() {
        let server = MockServer::start().await;
        let contract = Address::from_bytes([0xCC; 20]);

        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x14"
            })))
            .mount(&server)
            .await;

        // served out of order on purpose; the tracker must sort
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({"method": "eth_getLogs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": [
                    log_json(&sample_event(1), 6, 0, &contract),
                    log_json(&sample_event(0), 5, 0, &contract),
                ]
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = BridgeStore::open(dir.path()).unwrap();
        let recorder = Arc::new(Recorder::default());
        // the strong handle must outlive the tracker or the loop stops itself
        let subscriber: Arc<dyn LogSubscriber> = recorder.clone();
        let shutdown = Arc::new(Notify::new());

        let tracker = EventTracker::new(
            TrackerConfig {
                rpc_url: server.uri(),
                contract,
                poll_interval: Duration::from_millis(30),
                block_batch_size: 1000,
                start_block: 0,
                request_timeout: Duration::from_secs(2),
            },
            store.clone(),
            Arc::downgrade(&subscriber),
            Arc::clone(&shutdown),
        );
        tracker.start().unwrap();
        assert!(tracker.start().is_err()); // no duplicate task

        // wait for at least one delivered batch
        for _ in 0..100 {
            if recorder.logs.lock().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        {
            let logs = recorder.logs.lock();
            assert!(logs.len() >= 2);
            assert_eq!(logs[0].block_number_u64(), Some(5));
            assert_eq!(logs[1].block_number_u64(), Some(6));
            let ev = abi::decode_event_log(&logs[0].topics, &logs[0].data_bytes().unwrap()).unwrap();
            assert_eq!(ev, sample_event(0));
        }
        assert_eq!(store.get_last_processed_block().unwrap(), Some(20));

        shutdown.notify_waiters();
        for _ in 0..100 {
            if !tracker.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!tracker.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tracker_survives_rpc_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = BridgeStore::open(dir.path()).unwrap();
        let subscriber: Arc<dyn LogSubscriber> = Arc::new(Recorder::default());
        let shutdown = Arc::new(Notify::new());

        let tracker = EventTracker::new(
            TrackerConfig {
                rpc_url: server.uri(),
                contract: Address::from_bytes([0xCC; 20]),
                poll_interval: Duration::from_millis(20),
                block_batch_size: 10,
                start_block: 0,
                request_timeout: Duration::from_secs(1),
            },
            store,
            Arc::downgrade(&subscriber),
            Arc::clone(&shutdown),
        );
        tracker.start().unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(tracker.is_running()); // errors do not kill the loop

        shutdown.notify_waiters();
        for _ in 0..100 {
            if !tracker.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tracker did not stop");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tracker_stops_once_its_subscriber_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x0"
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = BridgeStore::open(dir.path()).unwrap();
        let subscriber: Arc<dyn LogSubscriber> = Arc::new(Recorder::default());
        let shutdown = Arc::new(Notify::new());

        let tracker = EventTracker::new(
            TrackerConfig {
                rpc_url: server.uri(),
                contract: Address::from_bytes([0xCC; 20]),
                poll_interval: Duration::from_millis(20),
                block_batch_size: 10,
                start_block: 0,
                request_timeout: Duration::from_secs(1),
            },
            store,
            Arc::downgrade(&subscriber),
            shutdown,
        );
        tracker.start().unwrap();

        // no explicit shutdown: dropping the last strong handle is enough
        drop(subscriber);
        for _ in 0..100 {
            if !tracker.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tracker kept running without a subscriber");
    }
}
