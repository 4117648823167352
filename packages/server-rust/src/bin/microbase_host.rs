//! `microbase-host`: runs one service with the modules named on the command line.

use anyhow::Context;
use clap::Parser;
use microbase_core::Payload;
use microbase_server::{
    handler_fn, FnModule, HostArgs, HostConfig, ModuleCatalog, ModuleContext, OperationDefinition,
    OperationError, ServiceHostBuilder,
};
use serde_json::Value;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = HostArgs::parse();
    init_tracing(args.log_json);

    let config = HostConfig::from(args);
    let mut builder = ServiceHostBuilder::new(config).with_catalog(demo_catalog());
    builder.mount_configured_modules();

    let mut host = builder.build().context("failed to build service host")?;
    host.start().await.context("failed to start service host")?;
    host.serve(shutdown_signal()).await?;
    Ok(())
}

/// Log level comes from `MICROBASE_LOG`, defaulting to `info`.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("MICROBASE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Modules this binary can mount via `--module key=name`.
fn demo_catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    catalog
        .register(FnModule::new("echo", |_: &ModuleContext<'_>| vec![echo()]))
        .register(FnModule::new("relay", |_: &ModuleContext<'_>| vec![relay()]));
    catalog
}

/// Returns its merged input.
fn echo() -> OperationDefinition {
    OperationDefinition::new(
        "echo",
        handler_fn(|payload: Payload, _| async move { Ok(Value::Object(payload)) }),
    )
    .public()
}

/// Calls `target` with `message`, locally or through the gateway.
fn relay() -> OperationDefinition {
    OperationDefinition::new(
        "relay",
        handler_fn(|mut payload: Payload, ctx| async move {
            let target = match payload.remove("target") {
                Some(Value::String(target)) => target,
                _ => return Err(OperationError::bad_request("`target` must be an operation reference")),
            };
            let message = payload.remove("message").unwrap_or(Value::Object(Payload::new()));
            ctx.call(&target, message).await.map_err(OperationError::from)
        }),
    )
    .public()
}
