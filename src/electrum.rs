//! Electrum protocol client: newline-delimited JSON-RPC over TCP.
//!
//! One connection is opened lazily and reused. Any transport failure or
//! timeout drops it so the next call reconnects.

use crate::blockchain::{MerkleProof, Txid};
use crate::error::{FacadeError, Result};
use crate::sources::{IndexingClient, TransactionSource, UnspentOutput};
use crate::transaction::{TransactionRecord, ENRICHMENT_SOURCE};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct ElectrumClient {
    address: String,
    timeout: Duration,
    next_id: AtomicU64,
    connection: Mutex<Option<Connection>>,
}

impl ElectrumClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            next_id: AtomicU64::new(1),
            connection: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sends one request. The outer error is transport, the inner one is the
    /// server's own error message.
    pub async fn call(&self, method: &str, params: Value) -> Result<std::result::Result<Value, String>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.connection.lock().await;

        let outcome = tokio::time::timeout(
            self.timeout,
            self.exchange_on(&mut guard, id, method, &params),
        )
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(FacadeError::Transport(format!(
                "{} timed out after {:?}",
                method, self.timeout
            ))),
        };
        if let Err(e) = &result {
            warn!(address = %self.address, method, error = %e, "dropping electrum connection");
            *guard = None;
        }
        result
    }

    async fn exchange_on(
        &self,
        slot: &mut Option<Connection>,
        id: u64,
        method: &str,
        params: &Value,
    ) -> Result<std::result::Result<Value, String>> {
        let connection = match slot {
            Some(connection) => connection,
            None => slot.insert(self.connect().await?),
        };
        exchange(connection, id, method, params).await
    }

    async fn connect(&self) -> Result<Connection> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| FacadeError::Transport(format!("connect to {}: {}", self.address, e)))?;
        let (read, write) = stream.into_split();
        debug!(address = %self.address, "electrum connection established");
        Ok(Connection {
            reader: BufReader::new(read),
            writer: write,
        })
    }
}

async fn exchange(
    connection: &mut Connection,
    id: u64,
    method: &str,
    params: &Value,
) -> Result<std::result::Result<Value, String>> {
    let mut request = serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    }))?;
    request.push(b'\n');
    connection
        .writer
        .write_all(&request)
        .await
        .map_err(|e| FacadeError::Transport(e.to_string()))?;
    connection
        .writer
        .flush()
        .await
        .map_err(|e| FacadeError::Transport(e.to_string()))?;

    let mut line = String::new();
    loop {
        line.clear();
        let read = connection
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| FacadeError::Transport(e.to_string()))?;
        if read == 0 {
            return Err(FacadeError::Transport("connection closed by server".into()));
        }

        let mut reply: Value = serde_json::from_str(line.trim())
            .map_err(|e| FacadeError::Protocol(format!("unparseable reply: {}", e)))?;
        // Subscription notifications carry no id.
        if reply.get("id").and_then(Value::as_u64) != Some(id) {
            continue;
        }

        return match reply.get_mut("error").map(Value::take) {
            Some(Value::Null) | None => Ok(Ok(reply
                .get_mut("result")
                .map(Value::take)
                .unwrap_or(Value::Null))),
            Some(error) => {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                Ok(Err(message))
            }
        };
    }
}

fn unexpected(method: &str, value: &Value) -> FacadeError {
    FacadeError::Protocol(format!("{} returned unexpected {}", method, value))
}

#[async_trait]
impl IndexingClient for ElectrumClient {
    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Option<Vec<u8>>> {
        const METHOD: &str = "blockchain.transaction.get";
        match self.call(METHOD, json!([txid.to_string(), false])).await? {
            Ok(Value::String(raw)) => hex::decode(&raw)
                .map(Some)
                .map_err(|e| FacadeError::Protocol(format!("{}: {}", METHOD, e))),
            Ok(other) => Err(unexpected(METHOD, &other)),
            Err(message) => {
                debug!(txid = %txid, reason = %message, "electrum does not have transaction");
                Ok(None)
            }
        }
    }

    async fn get_merkle_proof(&self, txid: &Txid, height: u32) -> Result<Option<MerkleProof>> {
        const METHOD: &str = "blockchain.transaction.get_merkle";
        match self.call(METHOD, json!([txid.to_string(), height])).await? {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(serde_json::from_value(value).map_err(|e| {
                FacadeError::Protocol(format!("{}: {}", METHOD, e))
            })?)),
            Err(message) => {
                debug!(txid = %txid, height, reason = %message, "electrum has no merkle proof");
                Ok(None)
            }
        }
    }

    async fn estimate_fee(&self, blocks: u32) -> Result<f64> {
        const METHOD: &str = "blockchain.estimatefee";
        match self.call(METHOD, json!([blocks])).await? {
            Ok(value) => value.as_f64().ok_or_else(|| unexpected(METHOD, &value)),
            Err(message) => Err(FacadeError::Protocol(format!("{}: {}", METHOD, message))),
        }
    }

    async fn list_unspent(&self, script_hash: &str) -> Result<Vec<UnspentOutput>> {
        const METHOD: &str = "blockchain.scripthash.listunspent";
        match self.call(METHOD, json!([script_hash])).await? {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| FacadeError::Protocol(format!("{}: {}", METHOD, e))),
            Err(message) => Err(FacadeError::Protocol(format!("{}: {}", METHOD, message))),
        }
    }
}

#[async_trait]
impl TransactionSource for ElectrumClient {
    fn name(&self) -> &str {
        ENRICHMENT_SOURCE
    }

    async fn get_raw_transaction(
        &self,
        txid: &Txid,
        verbose: bool,
    ) -> Result<Option<TransactionRecord>> {
        if !verbose {
            let raw = IndexingClient::get_raw_transaction(self, txid).await?;
            return Ok(raw.map(|raw| {
                let mut record = TransactionRecord::new(*txid, ENRICHMENT_SOURCE);
                record.set_rawtx(&raw);
                record
            }));
        }

        const METHOD: &str = "blockchain.transaction.get";
        match self.call(METHOD, json!([txid.to_string(), true])).await? {
            Ok(value) => TransactionRecord::from_verbose(*txid, ENRICHMENT_SOURCE, value).map(Some),
            Err(message) => {
                debug!(txid = %txid, reason = %message, "electrum does not have transaction");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use tokio::net::TcpListener;

    /// Serves one connection, answering each request with `respond(method, params)`.
    async fn fake_server(
        respond: fn(&str, &Value) -> Value,
    ) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let method = request["method"].as_str().unwrap().to_string();
                let mut reply = respond(&method, &request["params"]);
                reply["id"] = request["id"].clone();
                // A notification first, which the client has to skip.
                let notification = json!({"jsonrpc": "2.0", "method": "blockchain.headers.subscribe", "params": []});
                let out = format!("{}\n{}\n", notification, reply);
                write.write_all(out.as_bytes()).await.unwrap();
            }
        });
        (address, handle)
    }

    fn responder(method: &str, params: &Value) -> Value {
        match method {
            "blockchain.transaction.get" if params[1] == json!(true) => json!({
                "result": {"txid": params[0], "confirmations": 3, "hex": "00"}
            }),
            "blockchain.transaction.get" if params[0] == json!("00".repeat(32)) => json!({
                "error": {"code": 2, "message": "No such mempool or blockchain transaction"}
            }),
            "blockchain.transaction.get" => json!({"result": "0100"}),
            "blockchain.transaction.get_merkle" => json!({
                "result": {"block_height": params[1], "merkle": [], "pos": 0}
            }),
            "blockchain.estimatefee" => json!({"result": 0.00012}),
            "blockchain.scripthash.listunspent" => json!({"result": []}),
            _ => json!({"error": {"code": -32601, "message": "unknown method"}}),
        }
    }

    #[tokio::test]
    async fn test_indexing_calls() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let (address, _server) = fake_server(responder).await;
            let client = ElectrumClient::new(address, Duration::from_secs(2));
            let txid = Txid::from_byte_array([1u8; 32]);

            let raw = IndexingClient::get_raw_transaction(&client, &txid).await.unwrap();
            assert_eq!(raw, Some(vec![0x01, 0x00]));

            let proof = client.get_merkle_proof(&txid, 77).await.unwrap().unwrap();
            assert_eq!(proof.block_height, 77);
            assert_eq!(proof.pos, 0);

            assert_eq!(client.estimate_fee(6).await.unwrap(), 0.00012);
            assert!(client.list_unspent("ab").await.unwrap().is_empty());

            let missing = Txid::from_byte_array([0u8; 32]);
            let unknown = IndexingClient::get_raw_transaction(&client, &missing)
                .await
                .unwrap();
            assert!(unknown.is_none());
        })
        .await
        .expect("test_indexing_calls timed out");
    }

    #[tokio::test]
    async fn test_verbose_source_record() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let (address, _server) = fake_server(responder).await;
            let client = ElectrumClient::new(address, Duration::from_secs(2));
            let txid = Txid::from_byte_array([7u8; 32]);

            let record = TransactionSource::get_raw_transaction(&client, &txid, true)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.source, "electrum");
            assert_eq!(record.extra["confirmations"], json!(3));

            let compact = TransactionSource::get_raw_transaction(&client, &txid, false)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(compact.rawtx.as_deref(), Some("0100"));
        })
        .await
        .expect("test_verbose_source_record timed out");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap().to_string();
            drop(listener);

            let client = ElectrumClient::new(address, Duration::from_secs(1));
            let err = client.estimate_fee(2).await.unwrap_err();
            assert!(matches!(err, FacadeError::Transport(_)));
        })
        .await
        .expect("test_unreachable_server_is_transport_error timed out");
    }
}
