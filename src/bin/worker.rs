//! Queue worker binary.
//!
//! One process runs one role, selected by the first CLI argument or the
//! `WORKER_ROLE` env var:
//!
//! - `data-changes`: fan out data-change envelopes to the downstream topics
//! - `search-indexer`: apply index requests against the search backend
//! - `outbound-emailer`: render and send requested emails
//! - `webhook-executor`: deliver signed payloads to registered webhooks
//!
//! Environment variables:
//! - `WORKER_ROLE`: role when no CLI argument is given
//! - `DDB_WORKERS_CONFIG`: path to the TOML config (default: config/workers.toml)
//! - `DDB_WORKER_NAME`: consumer name (default: hostname or UUID)
//! - `CEASE_OPERATION`: when "true", handlers drop every message
//! - `DATA_CHANGES_TOPIC_NAME`, `OUTBOUND_EMAILS_TOPIC_NAME`,
//!   `SEARCH_INDEXING_TOPIC_NAME`, `WEBHOOK_EXECUTION_REQUESTS_TOPIC_NAME`,
//!   `USER_AGGREGATOR_TOPIC_NAME`: topic overrides
//! - `RUST_LOG`: logging level (default: "info")

use std::env;
use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::redis::streams::{StreamReadOptions, StreamReadReply};
use deadpool_redis::redis::{cmd, AsyncCommands, Value as RedisValue};
use deadpool_redis::{Config as RedisPoolConfig, Pool, Runtime};
use tracing::{debug, error, info, warn};

use ddb_workers::analytics::{EventReporter, NoopReporter, PostHogReporter};
use ddb_workers::config::{RuntimeEnv, ServiceConfig};
use ddb_workers::email::{EmailRenderer, NoopEmailer, SendGridEmailer};
use ddb_workers::queue::RedisStreamPublisher;
use ddb_workers::search::{IndexProvider, MeilisearchProvider, NoopProvider};
use ddb_workers::shutdown::ShutdownSignal;
use ddb_workers::store::{DataStore, PostgresStore};
use ddb_workers::workers::{
    EmailWorker, FanOutWorker, SearchIndexWorker, WebhookExecutionWorker, WorkerError,
};

/// Idle time threshold for claiming pending messages (in milliseconds).
const PENDING_IDLE_THRESHOLD_MS: u64 = 30_000;

/// Timeout for outbound HTTP calls (webhooks, email, analytics).
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    DataChanges,
    SearchIndexer,
    OutboundEmailer,
    WebhookExecutor,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "data-changes" => Some(Role::DataChanges),
            "search-indexer" => Some(Role::SearchIndexer),
            "outbound-emailer" => Some(Role::OutboundEmailer),
            "webhook-executor" => Some(Role::WebhookExecutor),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Role::DataChanges => "data-changes",
            Role::SearchIndexer => "search-indexer",
            Role::OutboundEmailer => "outbound-emailer",
            Role::WebhookExecutor => "webhook-executor",
        }
    }

    fn topic<'a>(&self, env: &'a RuntimeEnv) -> &'a str {
        match self {
            Role::DataChanges => &env.data_changes_topic,
            Role::SearchIndexer => &env.search_indexing_topic,
            Role::OutboundEmailer => &env.outbound_emails_topic,
            Role::WebhookExecutor => &env.webhook_execution_topic,
        }
    }
}

/// The role's message handler, dispatched per delivery.
enum Handler {
    FanOut(Arc<FanOutWorker>),
    Search(SearchIndexWorker),
    Email(EmailWorker),
    Webhook(WebhookExecutionWorker),
}

impl Handler {
    async fn handle(&self, raw: &[u8]) -> Result<(), WorkerError> {
        match self {
            Handler::FanOut(worker) => Arc::clone(worker).handle(raw).await,
            Handler::Search(worker) => worker.handle(raw).await,
            Handler::Email(worker) => worker.handle(raw).await,
            Handler::Webhook(worker) => worker.handle(raw).await,
        }
    }
}

fn get_worker_name() -> String {
    if let Ok(name) = env::var("DDB_WORKER_NAME") {
        return name;
    }

    if let Ok(hostname) = hostname::get() {
        if let Some(name) = hostname.to_str() {
            return format!("worker-{name}");
        }
    }

    format!("worker-{}", uuid::Uuid::new_v4())
}

fn build_reporter(
    config: &ServiceConfig,
    client: &reqwest::Client,
) -> Arc<dyn EventReporter> {
    if config.analytics.provider == "posthog" {
        Arc::new(PostHogReporter::new(
            client.clone(),
            config.analytics.host.clone(),
            config.analytics.api_key.clone(),
        ))
    } else {
        Arc::new(NoopReporter)
    }
}

fn build_handler(
    role: Role,
    config: &ServiceConfig,
    runtime: &RuntimeEnv,
    pool: &Pool,
    store: Arc<dyn DataStore>,
    client: &reqwest::Client,
) -> Result<Handler, Box<dyn std::error::Error>> {
    let handler = match role {
        Role::DataChanges => Handler::FanOut(Arc::new(FanOutWorker::new(
            store,
            build_reporter(config, client),
            Arc::new(RedisStreamPublisher::new(
                pool.clone(),
                runtime.outbound_emails_topic.clone(),
            )),
            Arc::new(RedisStreamPublisher::new(
                pool.clone(),
                runtime.search_indexing_topic.clone(),
            )),
            Arc::new(RedisStreamPublisher::new(
                pool.clone(),
                runtime.webhook_execution_topic.clone(),
            )),
            runtime.cease_operation,
        ))),
        Role::SearchIndexer => {
            let provider: Arc<dyn IndexProvider> = if config.search.provider == "meilisearch" {
                Arc::new(MeilisearchProvider::new(
                    &config.search.url,
                    &config.search.api_key,
                )?)
            } else {
                Arc::new(NoopProvider)
            };

            Handler::Search(SearchIndexWorker::new(
                store,
                provider,
                runtime.cease_operation,
            ))
        }
        Role::OutboundEmailer => {
            let provider: Arc<dyn ddb_workers::email::EmailProvider> =
                if config.email.provider == "sendgrid" {
                    Arc::new(SendGridEmailer::new(
                        client.clone(),
                        config.email.api_key.clone(),
                    ))
                } else {
                    Arc::new(NoopEmailer)
                };

            let renderer = EmailRenderer {
                public_url: config.app.public_url.clone(),
                from_address: config.email.from_address.clone(),
                from_name: config.email.from_name.clone(),
            };

            Handler::Email(EmailWorker::new(
                store,
                provider,
                renderer,
                build_reporter(config, client),
                runtime.cease_operation,
            ))
        }
        Role::WebhookExecutor => Handler::Webhook(WebhookExecutionWorker::new(
            store,
            client.clone(),
            runtime.cease_operation,
        )),
    };

    Ok(handler)
}

/// Extract the `data` field carrying the JSON message body.
fn extract_data(
    map: &std::collections::HashMap<String, RedisValue>,
) -> Option<Vec<u8>> {
    match map.get("data") {
        Some(RedisValue::BulkString(bytes)) => Some(bytes.clone()),
        Some(RedisValue::SimpleString(s)) => Some(s.clone().into_bytes()),
        _ => None,
    }
}

/// Claim pending messages idle past the threshold, so deliveries stuck on a
/// dead consumer get replayed here. The caller must run every returned entry
/// through the handler and ack it, or it stays stranded in this consumer's
/// pending list.
async fn claim_pending_messages(
    conn: &mut deadpool_redis::Connection,
    topic: &str,
    consumer_group: &str,
    worker_name: &str,
) -> Vec<(String, std::collections::HashMap<String, RedisValue>)> {
    type ClaimReply = (
        String,
        Vec<(String, std::collections::HashMap<String, RedisValue>)>,
    );

    let result: Result<ClaimReply, _> = cmd("XAUTOCLAIM")
        .arg(topic)
        .arg(consumer_group)
        .arg(worker_name)
        .arg(PENDING_IDLE_THRESHOLD_MS)
        .arg("0-0")
        .arg("COUNT")
        .arg(10)
        .query_async(conn)
        .await;

    match result {
        Ok((_, messages)) => {
            if !messages.is_empty() {
                info!(
                    count = messages.len(),
                    "Claimed pending messages from previous workers"
                );
            }
            messages
        }
        Err(e) => {
            debug!(error = %e, "XAUTOCLAIM failed, skipping pending recovery");
            Vec::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let role_arg = env::args()
        .nth(1)
        .or_else(|| env::var("WORKER_ROLE").ok())
        .unwrap_or_default();

    let Some(role) = Role::parse(&role_arg) else {
        error!(
            role = %role_arg,
            "Unknown role; expected data-changes, search-indexer, outbound-emailer, or webhook-executor"
        );
        std::process::exit(2);
    };

    let config = ServiceConfig::load()?;
    let runtime = RuntimeEnv::from_env();

    let worker_name = get_worker_name();
    let consumer_group = config.worker.consumer_group.clone();
    let topic = role.topic(&runtime).to_string();

    info!(
        role = role.as_str(),
        worker_name = %worker_name,
        consumer_group = %consumer_group,
        topic = %topic,
        cease_operation = runtime.cease_operation,
        "Worker starting"
    );

    if runtime.cease_operation {
        warn!("CEASE_OPERATION is set to true, messages will be consumed and dropped");
    }

    let pool = RedisPoolConfig::from_url(config.redis.url.clone())
        .create_pool(Some(Runtime::Tokio1))?;

    let store: Arc<dyn DataStore> = Arc::new(PostgresStore::connect(&config.database.url).await?);

    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

    let handler = build_handler(role, &config, &runtime, &pool, store, &client)?;

    let mut conn = pool.get().await?;

    let create_group_result: Result<(), _> = cmd("XGROUP")
        .arg("CREATE")
        .arg(&topic)
        .arg(&consumer_group)
        .arg("$")
        .arg("MKSTREAM")
        .query_async(&mut conn)
        .await;

    match create_group_result {
        Ok(()) => info!(consumer_group = %consumer_group, "Created consumer group"),
        Err(e) => {
            if e.to_string().contains("BUSYGROUP") {
                info!(consumer_group = %consumer_group, "Consumer group already exists");
            } else {
                error!(error = %e, "Failed to create consumer group");
                return Err(Box::new(e) as Box<dyn std::error::Error>);
            }
        }
    }

    let mut messages_handled: u64 = 0;
    let mut messages_failed: u64 = 0;

    // Claimed leftovers from crashed consumers never reappear under ">", so
    // they get handled and acked here before the live loop starts.
    let claimed = claim_pending_messages(&mut conn, &topic, &consumer_group, &worker_name).await;
    for (id, map) in claimed {
        match extract_data(&map) {
            Some(raw) => match handler.handle(&raw).await {
                Ok(()) => {
                    messages_handled += 1;
                    debug!(id = %id, "Claimed message handled");
                }
                Err(e) => {
                    messages_failed += 1;
                    error!(id = %id, error = %e, "Claimed message handling failed");
                }
            },
            None => {
                warn!(id = %id, "Claimed message lacks a data field, skipping");
            }
        }

        let ack_result: Result<(), _> = conn.xack(&topic, &consumer_group, &[&id]).await;
        if let Err(e) = ack_result {
            error!(id = %id, error = %e, "Failed to ACK claimed message");
        }
    }

    drop(conn);

    let shutdown = ShutdownSignal::new();
    let mut shutdown_receiver = shutdown.subscribe();

    info!(topic = %topic, "Listening for messages");

    let mut shutting_down = false;

    loop {
        if shutdown_receiver.try_recv().is_ok() {
            shutting_down = true;
        }

        if shutting_down {
            info!(
                messages_handled = messages_handled,
                messages_failed = messages_failed,
                "Worker shutting down gracefully"
            );
            break;
        }

        let mut conn = match pool.get().await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Failed to get Redis connection");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        let opts = StreamReadOptions::default()
            .group(&consumer_group, &worker_name)
            .block(2000)
            .count(10);

        let keys = [topic.as_str()];
        let result: Result<StreamReadReply, _> = tokio::select! {
            _ = shutdown.wait() => {
                info!("Shutdown signal received during read, finishing");
                shutting_down = true;
                continue;
            }
            result = conn.xread_options(&keys, &[">"], &opts) => result,
        };

        match result {
            Ok(reply) => {
                for stream_key in reply.keys {
                    for element in stream_key.ids {
                        let id = element.id.clone();

                        match extract_data(&element.map) {
                            Some(raw) => match handler.handle(&raw).await {
                                Ok(()) => {
                                    messages_handled += 1;
                                    debug!(id = %id, "Message handled");
                                }
                                Err(e) => {
                                    messages_failed += 1;
                                    error!(id = %id, error = %e, "Message handling failed");
                                }
                            },
                            None => {
                                warn!(id = %id, "Message lacks a data field, skipping");
                            }
                        }

                        // ack regardless of outcome: replays cannot fix a
                        // malformed message, and handlers already tolerate
                        // transient downstream failures
                        let ack_result: Result<(), _> =
                            conn.xack(&topic, &consumer_group, &[&id]).await;

                        if let Err(e) = ack_result {
                            error!(id = %id, error = %e, "Failed to ACK message");
                        }
                    }
                }
            }
            Err(e) => {
                let err_str = e.to_string();
                // timeout/nil responses are normal when the topic is quiet
                if !err_str.contains("timed out") && !err_str.contains("response was nil") {
                    warn!(error = %e, "Stream read error");
                }
            }
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn role_names_round_trip() {
        for role in [
            Role::DataChanges,
            Role::SearchIndexer,
            Role::OutboundEmailer,
            Role::WebhookExecutor,
        ] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("janitor"), None);
    }

    #[test]
    fn extract_data_reads_bulk_and_simple_strings() {
        let mut map = HashMap::new();
        map.insert(
            "data".to_string(),
            RedisValue::BulkString(br#"{"id":"x"}"#.to_vec()),
        );
        assert_eq!(extract_data(&map).as_deref(), Some(br#"{"id":"x"}"#.as_slice()));

        let mut map = HashMap::new();
        map.insert(
            "data".to_string(),
            RedisValue::SimpleString("{}".to_string()),
        );
        assert_eq!(extract_data(&map).as_deref(), Some(b"{}".as_slice()));
    }

    #[test]
    fn extract_data_rejects_entries_without_a_body() {
        assert!(extract_data(&HashMap::new()).is_none());

        let mut map = HashMap::new();
        map.insert("data".to_string(), RedisValue::Int(7));
        assert!(extract_data(&map).is_none());
    }

    // Claimed entries arrive with the same field shape as live reads; the
    // body they carry must decode into the handler's input unchanged.
    #[test]
    fn claimed_entry_body_decodes_like_a_live_delivery() {
        let request = ddb_workers::search::IndexRequest::new(
            "r1",
            ddb_workers::search::IndexType::Recipes,
            false,
        );
        let payload = serde_json::to_vec(&request).unwrap();

        let mut map = HashMap::new();
        map.insert("data".to_string(), RedisValue::BulkString(payload));

        let raw = extract_data(&map).expect("claimed entry carries a body");
        let decoded: ddb_workers::search::IndexRequest = serde_json::from_slice(&raw).unwrap();
        assert_eq!(decoded, request);
    }
}
