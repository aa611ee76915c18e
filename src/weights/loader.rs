use std::collections::HashMap;
use std::path::Path;

use candle_core::safetensors::Load;
use candle_core::{Device, Tensor};
use safetensors::SafeTensors;

use super::checkpoint::{Checkpoint, load_checkpoint};
use super::gpt2::gpt2_tensors_from_model;
use crate::error::Result;
use crate::model::{Gpt2HfConfig, GptConfig, GptModel};

/// Parse GPT-2 layout safetensors bytes into a [`Checkpoint`].
///
/// # Errors
/// Returns an error if the buffer is not valid safetensors or a tensor is missing or misshaped.
pub fn checkpoint_from_bytes(data: &[u8], device: &Device) -> Result<Checkpoint> {
    let safetensors = SafeTensors::deserialize(data)?;

    let mut tensors = HashMap::new();
    for (name, view) in safetensors.tensors() {
        tensors.insert(name, view.load(device)?);
    }
    tracing::debug!(tensors = tensors.len(), "parsed safetensors");

    Checkpoint::from_gpt2_tensors(tensors)
}

/// Read a GPT-2 layout `.safetensors` file into a [`Checkpoint`].
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn read_checkpoint(path: &Path, device: &Device) -> Result<Checkpoint> {
    let data = std::fs::read(path)?;
    tracing::debug!(path = %path.display(), bytes = data.len(), "read weights");
    checkpoint_from_bytes(&data, device)
}

/// Resolve the config for a weights file from the `config.json` next to it.
///
/// Accepts the HuggingFace GPT-2 layout or this crate's own layout. Falls back to GPT-2 small
/// when there is no `config.json`.
///
/// # Errors
/// Returns an error if `config.json` exists but cannot be read, parsed or validated.
pub fn load_config_for_weights(weights_path: &Path) -> Result<GptConfig> {
    let Some(parent) = weights_path.parent() else {
        return Ok(GptConfig::default());
    };

    let config_path = parent.join("config.json");
    if !config_path.exists() {
        tracing::info!("no config.json next to weights, using GPT-2 small");
        return Ok(GptConfig::default());
    }

    load_config(&config_path)
}

/// Read a config file in either the HuggingFace GPT-2 layout or this crate's layout.
///
/// # Errors
/// Returns an error if the file cannot be read, matches neither layout, or fails validation.
pub fn load_config(path: &Path) -> Result<GptConfig> {
    let raw = std::fs::read_to_string(path)?;
    let config = match serde_json::from_str::<GptConfig>(&raw) {
        Ok(config) => config,
        Err(_) => serde_json::from_str::<Gpt2HfConfig>(&raw)?.into(),
    };
    config.validate()?;
    tracing::debug!(path = %path.display(), ?config, "loaded config");
    Ok(config)
}

/// Construct a model for `config` and load a GPT-2 layout checkpoint into it.
///
/// # Errors
/// Returns an error if the config is invalid or the checkpoint does not fit the model.
pub fn load_pretrained(weights_path: &Path, config: GptConfig, device: &Device) -> Result<GptModel> {
    let checkpoint = read_checkpoint(weights_path, device)?;
    // Every parameter is overwritten by the load.
    let mut model = GptModel::seeded(config, 0, device)?;
    load_checkpoint(&mut model, &checkpoint)?;

    tracing::info!(
        path = %weights_path.display(),
        layers = model.config().n_layers,
        parameters = model.num_parameters(),
        "loaded pretrained weights"
    );
    Ok(model)
}

/// Write `model` to a `.safetensors` file in the GPT-2 layout.
///
/// # Errors
/// Returns an error if tensor conversion or the write fails.
pub fn save_pretrained(model: &GptModel, path: &Path) -> Result<()> {
    let tensors: HashMap<String, Tensor> = gpt2_tensors_from_model(model)?;
    candle_core::safetensors::save(&tensors, path)?;
    tracing::info!(path = %path.display(), tensors = tensors.len(), "saved weights");
    Ok(())
}
