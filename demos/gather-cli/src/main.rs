//! Gather console messages and target identity from a live DevTools target.
//!
//! Start a browser with remote debugging, then run:
//!
//! ```text
//! cargo run -p gather-cli-demo -- ws://127.0.0.1:9222/devtools/page/<id> https://example.com
//! ```
//!
//! The artifact bundle is printed to stdout as JSON.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webgather_core::{GatherSettings, ListenerId, ProtocolEvent};
use webgather_runner::{
    ActivityError, BaseArtifacts, GatherMode, GatherRunner, Gatherer, GathererDescriptor,
    GathererError, MemoryCache, PassContext,
};
use webgather_session::{ProtocolSession, TargetInfo};
use webgather_transport::WebSocketTransport;

/// Collects `console.*` calls made while the activity runs.
#[derive(Default)]
struct ConsoleMessages {
    messages: Arc<Mutex<Vec<Value>>>,
    listener: Mutex<Option<ListenerId>>,
}

#[async_trait]
impl Gatherer for ConsoleMessages {
    async fn start_instrumentation(&self, ctx: &PassContext<'_>) -> Result<(), GathererError> {
        let messages = Arc::clone(&self.messages);
        let id = ctx.session.on(
            "Runtime.consoleAPICalled",
            Arc::new(move |event: &ProtocolEvent| {
                messages
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(json!({
                        "level": event.params["type"],
                        "args": event.params["args"],
                        "timestamp": event.params["timestamp"],
                    }));
            }),
        );
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
        ctx.session.send_command("Runtime.enable", json!({})).await?;
        Ok(())
    }

    async fn stop_instrumentation(&self, ctx: &PassContext<'_>) -> Result<(), GathererError> {
        if let Some(id) = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take() {
            ctx.session.off(id);
        }
        ctx.session
            .send_command_and_ignore("Runtime.disable", json!({}))
            .await;
        Ok(())
    }

    async fn get_artifact(&self, _ctx: &PassContext<'_>) -> Result<Value, GathererError> {
        let messages = std::mem::take(
            &mut *self.messages.lock().unwrap_or_else(PoisonError::into_inner),
        );
        Ok(Value::Array(messages))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetTargetInfoResult {
    target_info: TargetInfo,
}

/// Records what the session is attached to once the activity has finished.
struct TargetIdentity;

#[async_trait]
impl Gatherer for TargetIdentity {
    async fn get_artifact(&self, ctx: &PassContext<'_>) -> Result<Value, GathererError> {
        let result: GetTargetInfoResult = ctx
            .session
            .send_command_as("Target.getTargetInfo", json!({}))
            .await?;
        ctx.session.set_target_info(result.target_info.clone());
        Ok(serde_json::to_value(result.target_info)?)
    }
}

async fn navigate(session: Arc<ProtocolSession>, url: String) -> Result<(), ActivityError> {
    session.send_command("Page.enable", json!({})).await?;
    let loaded = session.once("Page.loadEventFired");
    let nav = session
        .send_command("Page.navigate", json!({ "url": url }))
        .await?;
    if let Some(error) = nav.get("errorText").and_then(Value::as_str) {
        return Err(format!("navigation to {url} failed: {error}").into());
    }
    loaded.await;
    tracing::info!(%url, "Page loaded");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(endpoint) = args.next() else {
        bail!("usage: gather-cli-demo <devtools-ws-url> [page-url]");
    };
    let url = args.next().unwrap_or_else(|| "https://example.com".to_string());

    let settings = match std::env::var("WEBGATHER_SETTINGS") {
        Ok(json) => GatherSettings::from_json_str(&json).context("invalid WEBGATHER_SETTINGS")?,
        Err(_) => GatherSettings::default(),
    };

    let transport = WebSocketTransport::connect(&endpoint)
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;
    let session = Arc::new(ProtocolSession::new(Arc::new(transport), &settings));
    tracing::info!(session = session.id(), "Attached to target");

    let gatherers = vec![
        GathererDescriptor::new("ConsoleMessages", Arc::new(ConsoleMessages::default()))
            .modes([GatherMode::Navigation, GatherMode::Timespan]),
        GathererDescriptor::new("TargetIdentity", Arc::new(TargetIdentity)),
    ];

    let runner = GatherRunner::new(
        Arc::clone(&session),
        Arc::new(MemoryCache::new()),
        settings,
    );
    let base = BaseArtifacts::capture(&session);
    let activity_session = Arc::clone(&session);
    let outcome = runner
        .run(GatherMode::Navigation, &gatherers, base, move || {
            navigate(activity_session, url)
        })
        .await;

    if let Err(e) = session.dispose().await {
        tracing::warn!(error = %e, "Failed to release session");
    }

    let bundle = outcome?;
    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(())
}
