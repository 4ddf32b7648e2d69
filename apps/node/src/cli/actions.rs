use std::sync::Arc;
use tokio::select;
use tokio::signal::unix;
use tokio::signal::unix::SignalKind;

use crate::{
    cli::{arguments, node::Node},
    config::NodeConfig,
};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::Targets,
    fmt::format::{DefaultVisitor, Writer},
    layer::Layer,
    prelude::*,
    util::SubscriberInitExt,
    EnvFilter,
};

pub async fn run(args: arguments::Run) -> eyre::Result<()> {
    let config = NodeConfig::from_path(args.config)?;

    let level_filter = config.logger.level;

    let filter = Targets::new()
        .with_target("peer_agent", level_filter)
        .with_target("yuvd", level_filter)
        .with_default(level_filter);

    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::DEBUG.into())
        .from_env()?;

    tracing_subscriber::registry()
        .with(PlainTracer.with_filter(filter))
        .with(env_filter)
        .try_init()?;

    let node = Arc::new(Node::new(config).await?);
    let node_clone = node.clone();

    tokio::spawn(async move {
        if let Err(err) = node_clone.run().await {
            tracing::error!("node cancelled: {:?}", err);
        }
        node_clone.task_tracker.close();
    });

    let mut sigterm =
        unix::signal(SignalKind::terminate()).expect("failed to create SIGTERM signal handler");
    let mut sigint =
        unix::signal(SignalKind::interrupt()).expect("failed to create SIGINT signal handler");

    select! {
        _ = node.cancelled() => {
            tracing::info!("node run failed");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM signal");
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT signal");
        }
    }

    node.shutdown().await;

    Ok(())
}

struct PlainTracer;

impl<S> Layer<S> for PlainTracer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let target = match event.metadata().level() {
            &Level::INFO | &Level::WARN | &Level::ERROR => event
                .metadata()
                .target()
                .split("::")
                .last()
                .unwrap_or_default(),
            _ => event.metadata().target(),
        };

        print!(
            "[{}] {} {}: ",
            chrono::offset::Local::now().format("%Y-%m-%d %H:%M:%S"),
            event.metadata().level(),
            target,
        );

        let mut message = String::new();
        event.record(&mut DefaultVisitor::new(Writer::new(&mut message), true));

        println!("{}", message);
    }
}
