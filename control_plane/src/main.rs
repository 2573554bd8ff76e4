#![warn(
    clippy::pedantic,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::needless_pass_by_value,
    clippy::needless_continue,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::struct_field_names
)]

mod cli;

use clap::Parser;
use cli::Cli;
use futures::StreamExt;
use kube::Client;
use portico_control_plane::controller::{Controller, ControllerParams};
use portico_control_plane::kubernetes::spawn_watches;
use portico_control_plane::kubernetes::state::ClusterState;
use portico_control_plane::kubernetes::status_writer::KubeStatusWriter;
use portico_control_plane::options::Options;
use portico_control_plane::store::SnapshotStore;
use portico_core::crypto::init_crypto;
use portico_core::instrumentation::init_instrumentation;
use portico_core::task::Builder as TaskBuilder;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum MainError {
    #[error("Failed to create Kubernetes client: {0}")]
    KubeClient(#[from] kube::Error),
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), MainError> {
    let args = Cli::parse();

    init_crypto();
    init_instrumentation(args.log_format().into());

    let options = Arc::new(
        Options::builder()
            .controller_name(args.controller_name().clone())
            .workers_per_kind(args.workers())
            .queue_capacity(args.queue_capacity())
            .build(),
    );
    info!(
        "Starting control plane; controller.name={} workers={}",
        options.controller_name(),
        options.workers_per_kind()
    );

    let client = Client::try_default()
        .await
        .inspect_err(|err| error!("Failed to create Kubernetes client: {err}"))?;

    let task_builder = TaskBuilder::default();
    let store = Arc::new(SnapshotStore::new(options.max_store_conflict_retries()));

    let controller = Arc::new(Controller::new(
        ControllerParams::builder()
            .options(options)
            .state(Arc::new(ClusterState::default()))
            .store(store.clone())
            .status_writer(Arc::new(KubeStatusWriter::new(client.clone())))
            .shutdown(task_builder.shutdown_token())
            .build(),
    ));

    controller.spawn_workers(&task_builder);
    spawn_watches(&task_builder, &client, &controller);

    // Stand-in for the translator: every delivered snapshot is logged
    task_builder
        .new_task("snapshot_subscriber")
        .spawn_cancellable(async move {
            let mut updates = store.subscribe().await;
            while let Some(update) = updates.next().await {
                debug!(
                    "Snapshot delivered; gateway_class={} snapshot.deleted={} gateways={} routes={}",
                    update.key(),
                    update.deleted(),
                    update.resources().gateways().len(),
                    update.resources().routes().len()
                );
            }
        });

    {
        let shutdown = task_builder.shutdown_token();
        task_builder.new_task("ctrl_c").spawn_cancellable(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(err) => error!("Failed to listen for ctrl-c: {err}"),
            }
            shutdown.cancel();
        });
    }

    task_builder.join_all().await;
    info!("Control plane stopped");

    Ok(())
}
