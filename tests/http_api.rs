//! HTTP API tests against a live server on an ephemeral port.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use withdrawal_orchestrator::http::HttpServer;
use withdrawal_orchestrator::lifecycle::Shutdown;

mod common;
use common::{destination, eth, source, MockChain};

struct TestServer {
    addr: SocketAddr,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), std::io::Error>>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(chain: Arc<MockChain>) -> Self {
        let config = common::test_config();
        let service = Arc::new(common::service(chain));
        let server = HttpServer::new(service, &config.server);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        let handle = tokio::spawn(async move { server.run(listener, rx).await });

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()
            .unwrap();

        Self {
            addr,
            shutdown,
            handle,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let res = self.client.get(self.url(path)).send().await.unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let res = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap())
    }

    async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_health_reflects_chain() {
    let chain = MockChain::new();
    let server = TestServer::start(chain.clone()).await;

    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connected"], true);

    chain.set_down(true);
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 503);
    assert_eq!(body["connected"], false);

    server.stop().await;
}

#[tokio::test]
async fn test_nonce_endpoints() {
    let chain = MockChain::new();
    chain.set_nonce(source(), 137);
    let server = TestServer::start(chain).await;

    let (status, body) = server.get(&format!("/nonce/{}", source())).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["nonce"], 137);

    let (status, body) = server
        .post(
            "/validate-nonce",
            json!({ "address": source().to_string(), "nonce": 136 }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["is_valid"], false);
    assert_eq!(body["data"]["current_nonce"], 137);

    let (status, body) = server.get("/nonce/0x1234").await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("Invalid address"));

    server.stop().await;
}

#[tokio::test]
async fn test_create_transaction_envelope() {
    let chain = MockChain::new();
    chain.set_balance(source(), eth(1));
    let server = TestServer::start(chain).await;

    let (status, body) = server
        .post(
            "/create-transaction",
            json!({
                "from_address": source().to_string(),
                "to_address": destination().to_string(),
                "amount_eth": 0.001
            }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["ready_to_sign"], true);
    assert_eq!(body["data"]["transaction"]["gas_limit"], 21_000);
    assert!(body["error"].is_null());

    let (status, body) = server
        .post(
            "/create-transaction",
            json!({
                "from_address": source().to_string(),
                "to_address": destination().to_string(),
                "amount_eth": "-1"
            }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);

    server.stop().await;
}

#[tokio::test]
async fn test_warehouse_errors_map_to_status() {
    let chain = MockChain::new();
    let server = TestServer::start(chain).await;

    let (status, body) = server
        .get(&format!("/warehouse/withdrawals/{}", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);

    let (status, body) = server
        .post(
            "/warehouse/withdrawals",
            json!({
                "source_address": source().to_string(),
                "destination_address": destination().to_string(),
                "amount_eth": "1",
                "private_key": "not-a-key"
            }),
        )
        .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("Wallet"));

    let (status, body) = server.get("/warehouse/withdrawals").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"], json!([]));

    let (status, _) = server.get("/no-such-route").await;
    assert_eq!(status, 404);

    server.stop().await;
}

#[tokio::test]
async fn test_request_id_is_returned() {
    let chain = MockChain::new();
    let server = TestServer::start(chain).await;

    let res = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap();
    assert!(res.headers().contains_key("x-request-id"));

    server.stop().await;
}
