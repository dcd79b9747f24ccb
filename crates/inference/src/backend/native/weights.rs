//! Parameter initialization and safetensors persistence.
//!
//! Tensors are keyed `<layer>.weight` and `<layer>.bias`, little-endian f32.

use super::Sequential;
use crate::backend::ModelError;
use memmap2::Mmap;
use safetensors::{Dtype, SafeTensors, serialize, tensor::TensorView};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

/// Deterministic He-uniform initialization: weights drawn from
/// U(-sqrt(6 / fan_in), sqrt(6 / fan_in)), biases zeroed.
pub fn init_he_uniform(network: &mut Sequential, seed: u64) {
    let mut rng = fastrand::Rng::with_seed(seed);

    for (_, layer) in network.layers_mut() {
        let fan_in = layer.fan_in();
        if fan_in == 0 {
            continue;
        }
        let bound = (6.0 / fan_in as f32).sqrt();
        for (param, mut values) in layer.parameters_mut() {
            if param == "weight" {
                values.mapv_inplace(|_| (rng.f32() * 2.0 - 1.0) * bound);
            } else {
                values.fill(0.0);
            }
        }
    }
}

/// Memory-map a safetensors file and load every parameter from it.
///
/// Loading is strict: each parameter must be present as f32 with the exact
/// shape, and the file may not carry tensors the network does not own.
pub fn load_safetensors(network: &mut Sequential, path: &Path) -> Result<(), ModelError> {
    let file = File::open(path)?;
    // SAFETY: mapped read-only; the file is not expected to change while loading.
    let mmap = unsafe { Mmap::map(&file)? };
    let tensors = SafeTensors::deserialize(&mmap)?;

    assign(network, &tensors)?;
    tracing::info!(path = %path.display(), tensors = tensors.names().len(), "Loaded weights");
    Ok(())
}

fn assign(network: &mut Sequential, tensors: &SafeTensors<'_>) -> Result<(), ModelError> {
    let mut consumed = HashSet::new();

    for (layer_name, layer) in network.layers_mut() {
        for (param, mut values) in layer.parameters_mut() {
            let key = format!("{layer_name}.{param}");
            let tensor = tensors
                .tensor(&key)
                .map_err(|_| ModelError::Weights(format!("missing tensor '{key}'")))?;

            if tensor.dtype() != Dtype::F32 {
                return Err(ModelError::Weights(format!(
                    "tensor '{key}' has dtype {:?}, expected F32",
                    tensor.dtype()
                )));
            }
            if tensor.shape() != values.shape() {
                return Err(ModelError::ShapeMismatch {
                    context: key,
                    expected: values.shape().to_vec(),
                    actual: tensor.shape().to_vec(),
                });
            }

            for (dst, bytes) in values.iter_mut().zip(tensor.data().chunks_exact(4)) {
                *dst = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            consumed.insert(key);
        }
    }

    let mut unexpected: Vec<&String> = tensors
        .names()
        .into_iter()
        .filter(|name| !consumed.contains(*name))
        .collect();
    if !unexpected.is_empty() {
        unexpected.sort();
        return Err(ModelError::Weights(format!(
            "unexpected tensors: {unexpected:?}"
        )));
    }
    Ok(())
}

/// Serialize every parameter to safetensors bytes.
pub fn export_safetensors(network: &Sequential) -> Result<Vec<u8>, ModelError> {
    let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = network
        .layers()
        .iter()
        .flat_map(|named| {
            named
                .layer
                .parameters()
                .into_iter()
                .map(move |(param, values)| {
                    (
                        format!("{}.{param}", named.name),
                        values.shape().to_vec(),
                        values.iter().flat_map(|v| v.to_le_bytes()).collect(),
                    )
                })
        })
        .collect();

    let views = buffers
        .iter()
        .map(|(name, shape, bytes)| -> Result<_, ModelError> {
            Ok((
                name.as_str(),
                TensorView::new(Dtype::F32, shape.clone(), bytes)?,
            ))
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    Ok(serialize(views, &None)?)
}

pub fn save_safetensors(network: &Sequential, path: &Path) -> Result<(), ModelError> {
    std::fs::write(path, export_safetensors(network)?)?;
    Ok(())
}
