use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use sendwave_api::app::services::AppServices;
use sendwave_core::UserId;
use sendwave_infra::config::DeliveryConfig;
use sendwave_infra::contacts::InMemoryContactLists;
use sendwave_infra::delivery::NoThrottle;
use sendwave_infra::gateway::DryRunGateway;
use sendwave_infra::jobs::JobExecutorHandle;
use sendwave_infra::pipeline::{DeliveryPipeline, PipelineParts};
use serde_json::{json, Value};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    workers: Option<JobExecutorHandle>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod with a dry-run gateway, no throttle, and an ephemeral port.
        let config = DeliveryConfig {
            worker_count: 2,
            poll_interval_ms: 5,
            ..DeliveryConfig::default()
        };
        let contacts = InMemoryContactLists::arc();
        let mut parts = PipelineParts::in_memory(contacts.clone(), Arc::new(DryRunGateway));
        parts.throttle = Arc::new(NoThrottle);
        let pipeline = DeliveryPipeline::new(&config, parts).expect("valid pipeline");
        let services = Arc::new(AppServices::new(pipeline, contacts));
        let workers = services.spawn_workers().expect("workers start");

        let app = sendwave_api::app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            workers: Some(workers),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        if let Some(workers) = self.workers.take() {
            workers.shutdown();
        }
    }
}

struct Caller {
    client: reqwest::Client,
    user: UserId,
}

impl Caller {
    fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            user: UserId::new(),
        }
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        self.client.get(url).header("x-user-id", self.user.to_string())
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        self.client.post(url).header("x-user-id", self.user.to_string())
    }
}

async fn topup_plan(srv: &TestServer, caller: &Caller) {
    let res = caller
        .post(srv.url("/wallet/topup"))
        .json(&json!({ "plan_type": "30d" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
}

async fn create_campaign(srv: &TestServer, caller: &Caller, phones: &[&str]) -> String {
    let contacts: Vec<Value> = phones
        .iter()
        .enumerate()
        .map(|(i, p)| json!({ "name": format!("Contact {i}"), "phone": p }))
        .collect();
    let res = caller
        .post(srv.url("/contact-lists"))
        .json(&json!({ "contacts": contacts }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let list: Value = res.json().await.unwrap();

    let res = caller
        .post(srv.url("/campaigns"))
        .json(&json!({
            "name": "launch",
            "list_id": list["id"],
            "template_body": "Hi {{name}}, we are live",
            "template_variables": ["name"],
            "throttle_min_seconds": 1,
            "throttle_max_seconds": 1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["status"], "DRAFT");
    assert_eq!(created["recipient_count"], phones.len());
    created["id"].as_str().unwrap().to_string()
}

async fn progress_eventually(srv: &TestServer, caller: &Caller, id: &str, status: &str) -> Value {
    // Workers run in the background; poll until the aggregator settles.
    for _ in 0..200 {
        let res = caller
            .get(srv.url(&format!("/campaigns/{id}/progress")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if body["status"] == status {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    panic!("campaign {id} did not reach {status} within timeout");
}

#[tokio::test]
async fn user_header_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/campaigns"))
        .header("x-user-id", "not-a-uuid")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn user_context_is_derived_from_header() {
    let srv = TestServer::spawn().await;
    let caller = Caller::new();

    let res = caller.get(srv.url("/whoami")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["user_id"].as_str().unwrap(), caller.user.to_string());
}

#[tokio::test]
async fn campaign_lifecycle_create_start_complete_export() {
    let srv = TestServer::spawn().await;
    let caller = Caller::new();
    topup_plan(&srv, &caller).await;
    let id = create_campaign(&srv, &caller, &["+15550001", "+15550002", "+15550003"]).await;

    let res = caller
        .post(srv.url(&format!("/campaigns/{id}/start")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let progress = progress_eventually(&srv, &caller, &id, "COMPLETED").await;
    assert_eq!(progress["total"], 3);
    assert_eq!(progress["sent"], 3);
    assert_eq!(progress["failed"], 0);

    // 2000 plan points, 2 per delivered recipient.
    let res = caller.get(srv.url("/wallet")).send().await.unwrap();
    let wallet: Value = res.json().await.unwrap();
    assert_eq!(wallet["balance"], 1994);

    let res = caller
        .get(srv.url("/wallet/transactions?limit=10"))
        .send()
        .await
        .unwrap();
    let txns: Value = res.json().await.unwrap();
    let deducts = txns["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|t| t["type"] == "deduct")
        .count();
    assert_eq!(deducts, 3);

    let res = caller
        .get(srv.url(&format!("/campaigns/{id}/export")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(
        res.headers()[reqwest::header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );
    let csv = res.text().await.unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("name,phone,status,sent_at,read_at,last_error"));
    assert_eq!(lines.filter(|l| l.contains(",sent,")).count(), 3);

    // Read receipt on one recipient.
    let res = caller
        .get(srv.url(&format!("/campaigns/{id}/recipients")))
        .send()
        .await
        .unwrap();
    let recipients: Value = res.json().await.unwrap();
    let first = recipients["items"][0]["id"].as_str().unwrap().to_string();
    let res = caller
        .post(srv.url(&format!("/recipients/{first}/read")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let read: Value = res.json().await.unwrap();
    assert_eq!(read["status"], "READ");
    assert!(read["read_at"].is_string());
}

#[tokio::test]
async fn start_without_points_is_unprocessable() {
    let srv = TestServer::spawn().await;
    let caller = Caller::new();
    let id = create_campaign(&srv, &caller, &["+15550001"]).await;

    let res = caller
        .post(srv.url(&format!("/campaigns/{id}/start")))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "insufficient_balance");

    let res = caller.get(srv.url("/queue")).send().await.unwrap();
    let stats: Value = res.json().await.unwrap();
    assert_eq!(stats["enqueued_total"], 0);
}

#[tokio::test]
async fn bad_transitions_conflict() {
    let srv = TestServer::spawn().await;
    let caller = Caller::new();
    let id = create_campaign(&srv, &caller, &["+15550001"]).await;

    let res = caller
        .post(srv.url(&format!("/campaigns/{id}/resume")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");

    let res = caller
        .post(srv.url(&format!("/campaigns/{id}/cancel")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cancelled: Value = res.json().await.unwrap();
    assert_eq!(cancelled["status"], "CANCELLED");

    let res = caller
        .post(srv.url(&format!("/campaigns/{id}/start")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn campaigns_are_scoped_to_their_owner() {
    let srv = TestServer::spawn().await;
    let owner = Caller::new();
    let other = Caller::new();
    let id = create_campaign(&srv, &owner, &["+15550001"]).await;

    let res = other
        .get(srv.url(&format!("/campaigns/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = other
        .post(srv.url(&format!("/campaigns/{id}/cancel")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = other.get(srv.url("/campaigns")).send().await.unwrap();
    let listed: Value = res.json().await.unwrap();
    assert!(listed["items"].as_array().unwrap().is_empty());

    let res = owner.get(srv.url("/campaigns/not-an-id")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_contact_list_is_not_found() {
    let srv = TestServer::spawn().await;
    let caller = Caller::new();

    let res = caller
        .post(srv.url("/campaigns"))
        .json(&json!({
            "name": "ghost",
            "list_id": uuid::Uuid::now_v7().to_string(),
            "template_body": "hello",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn progress_stream_ends_when_campaign_is_terminal() {
    let srv = TestServer::spawn().await;
    let caller = Caller::new();
    topup_plan(&srv, &caller).await;
    let id = create_campaign(&srv, &caller, &["+15550001", "+15550002"]).await;
    caller
        .post(srv.url(&format!("/campaigns/{id}/start")))
        .send()
        .await
        .unwrap();
    progress_eventually(&srv, &caller, &id, "COMPLETED").await;

    let res = caller
        .get(srv.url(&format!("/campaigns/{id}/stream")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // The body ends once the terminal snapshot has been sent.
    let body = tokio::time::timeout(Duration::from_secs(5), res.text())
        .await
        .expect("stream closed")
        .unwrap();
    assert!(body.contains("event: progress"));
    assert!(body.contains("\"status\":\"COMPLETED\""));
}
