//! End-to-end flow: three validators ingest the same anchored events from a
//! mock JSON-RPC endpoint, gossip votes over an in-process hub, reach quorum,
//! and materialize proofs from a finalized commitment submission.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bridge_common::abi;
use bridge_common::crypto::{self, BlsKey};
use bridge_common::merkle::verify_proof;
use bridge_common::types::{Address, StateSyncEvent};
use bridge_common::validator::{ValidatorAccount, ValidatorSet};
use bridge_engine::{
    BlockTx, BridgeConfig, BridgeError, CommitmentManager, FinalizedBlock, GossipHub,
    PostBlockRequest, PostEpochRequest, StateSyncBridge, SystemStateProvider,
};
use bridge_store::BridgeStore;

const SENDER_CONTRACT: Address = Address([0xAA; 20]);
const RECEIVER_CONTRACT: Address = Address([0xBB; 20]);

struct FixedSystemState(u64);

impl SystemStateProvider for FixedSystemState {
    fn next_committed_index(&self) -> Result<u64, BridgeError> {
        Ok(self.0)
    }
}

fn sample_event(id: u64) -> StateSyncEvent {
    StateSyncEvent {
        id,
        sender: Address::from_bytes([0x11; 20]),
        receiver: Address::from_bytes([0x22; 20]),
        data: vec![id as u8, 0xAB],
    }
}

fn log_json(ev: &StateSyncEvent, block: u64, index: u64) -> serde_json::Value {
    let mut id_word = [0u8; 32];
    id_word[24..].copy_from_slice(&ev.id.to_be_bytes());
    let mut sender = [0u8; 32];
    sender[12..].copy_from_slice(ev.sender.as_bytes());
    let mut receiver = [0u8; 32];
    receiver[12..].copy_from_slice(ev.receiver.as_bytes());

    let mut data = vec![0u8; 32];
    data[31] = 32;
    let mut len_word = [0u8; 32];
    len_word[24..].copy_from_slice(&(ev.data.len() as u64).to_be_bytes());
    data.extend_from_slice(&len_word);
    data.extend_from_slice(&ev.data);
    data.resize((data.len() + 31) / 32 * 32, 0);

    json!({
        "address": SENDER_CONTRACT.to_string(),
        "topics": [
            abi::state_sync_event_topic().to_string(),
            format!("0x{}", hex::encode(id_word)),
            format!("0x{}", hex::encode(sender)),
            format!("0x{}", hex::encode(receiver)),
        ],
        "data": format!("0x{}", hex::encode(data)),
        "blockNumber": format!("0x{block:x}"),
        "logIndex": format!("0x{index:x}"),
    })
}

async fn mock_anchoring_chain(events: &[StateSyncEvent]) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_blockNumber"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": "0x69"
        })))
        .mount(&server)
        .await;

    let logs: Vec<serde_json::Value> = events
        .iter()
        .enumerate()
        .map(|(i, ev)| log_json(ev, 100 + i as u64, 0))
        .collect();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getLogs"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": logs
        })))
        .mount(&server)
        .await;

    server
}

fn spawn_manager(
    key: &BlsKey,
    hub: &GossipHub,
    rpc_url: &str,
) -> (TempDir, Arc<CommitmentManager>) {
    let dir = TempDir::new().unwrap();
    let store = BridgeStore::open(dir.path()).unwrap();
    let mut config = BridgeConfig::new(SENDER_CONTRACT, RECEIVER_CONTRACT, rpc_url);
    config.poll_interval = Duration::from_millis(50);
    let manager = Arc::new(CommitmentManager::new(
        config,
        store,
        Arc::new(key.clone()),
        Arc::new(hub.clone()),
    ));
    (dir, manager)
}

#[tokio::test(flavor = "multi_thread")]
async fn three_validators_reach_quorum_and_serve_proofs() {
    let events: Vec<StateSyncEvent> = (10..=13).map(sample_event).collect();
    let server = mock_anchoring_chain(&events).await;

    let keys: Vec<BlsKey> = (1..=4u8)
        .map(|i| BlsKey::from_seed(&[i; 32]).unwrap())
        .collect();
    let validator_set = Arc::new(ValidatorSet::new(
        keys.iter()
            .map(|k| ValidatorAccount {
                address: k.address(),
                bls_key: k.public_key_bytes(),
            })
            .collect(),
    ));

    // three of four validators run; quorum is 3
    let hub = GossipHub::new();
    let mut managers = Vec::new();
    let mut dirs = Vec::new();
    for key in &keys[..3] {
        let (dir, manager) = spawn_manager(key, &hub, &server.uri());
        Arc::clone(&manager).init().unwrap();
        dirs.push(dir);
        managers.push(manager);
    }

    for manager in &managers {
        manager
            .post_epoch(&PostEpochRequest {
                new_epoch_id: 7,
                validator_set: Arc::clone(&validator_set),
                system_state: Arc::new(FixedSystemState(10)),
            })
            .unwrap();
    }

    // wait until the first validator can assemble a quorum-signed commitment
    let mut signed = None;
    for _ in 0..200 {
        if let Some(found) = managers[0].commitment().unwrap() {
            if found.message.to_id == 13 {
                signed = Some(found);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let signed = signed.expect("quorum commitment never assembled");

    assert_eq!(signed.message.from_id, 10);
    assert_eq!(signed.message.to_id, 13);
    assert_eq!(signed.bitmap.popcount(), 3);
    assert!(crypto::verify_aggregate(
        &signed.public_keys,
        &signed.message.digest(),
        &signed.agg_signature
    ));

    // a finalized block carrying the submission materializes proofs
    let block = PostBlockRequest {
        block: FinalizedBlock {
            number: 500,
            transactions: vec![BlockTx {
                to: Some(RECEIVER_CONTRACT),
                input: abi::encode_commit_input(&signed),
            }],
        },
    };
    managers[0].post_block(&block).unwrap();

    for (i, ev) in events.iter().enumerate() {
        let proof = managers[0].state_sync_proof(ev.id).unwrap();
        assert_eq!(&proof.event, ev);
        assert!(verify_proof(
            &proof.proof,
            i as u64,
            &proof.event.leaf_hash(),
            &signed.message.merkle_root
        ));
    }

    // a validator that never saw the submission has no proof to serve
    assert!(matches!(
        managers[1].state_sync_proof(10),
        Err(BridgeError::NotFound(10))
    ));
    // until the block reaches it too
    managers[1].post_block(&block).unwrap();
    assert!(managers[1].state_sync_proof(10).is_ok());

    for manager in &managers {
        manager.close();
    }
}
