use crate::state::ModelSlot;
use inference::{InferenceConfig, NativeService};
use std::time::Instant;
use tokio::task::JoinHandle;

/// Build the service on the blocking pool and publish it to `slot`. On
/// failure the slot stays empty and requests keep getting `ModelNotLoaded`.
pub fn spawn_model_load(config: InferenceConfig, slot: ModelSlot) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        tracing::info!(architecture = %config.architecture, "Loading model");

        match NativeService::from_config(&config) {
            Ok(service) => {
                slot.fill(service);
                tracing::info!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Model loaded"
                );
            }
            Err(err) => {
                tracing::error!(error = ?err, "Model load failed, serving without a model");
            }
        }
    })
}
