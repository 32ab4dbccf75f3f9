use crate::{config::LayerConfig, conv::ConvLayer, error::LayerError, malgebra::cube::Cube, traits::ConfigFS};

use tokio::{fs::File, io::AsyncReadExt};
use tokio::io::{AsyncWriteExt, BufWriter};

// On-disk form of a layer: geometry plus filter bank. Forward caches and
// gradient buffers are per-batch state and are not persisted.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
struct SavedLayer {
    config: LayerConfig,
    filters: Vec<Cube>,
}

impl ConfigFS for ConvLayer {
    type OutType = Self;
    async fn read(path: &String) -> Result<Self::OutType, LayerError> {
        if !path.ends_with(".json") {
            return Err(LayerError::NotJson(path.to_string()));
        }
        let mut file = File::open(path).await.map_err(|e| LayerError::io(path, e))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await.map_err(|e| LayerError::io(path, e))?;
        let saved: SavedLayer = serde_json::from_str(&contents)?;

        ConvLayer::from_filters(saved.config, saved.filters)
    }
    async fn save(&self, path: &String) -> Result<(), LayerError> {
        if !path.ends_with(".json") {
            return Err(LayerError::NotJson(path.to_string()));
        }
        let saved = SavedLayer {
            config: self.config.clone(),
            filters: self.filters.clone(),
        };
        let pretty_json = serde_json::to_string_pretty(&saved)?;

        let data_file = File::create(path).await.map_err(|e| LayerError::io(path, e))?;
        let mut data_file = BufWriter::new(data_file);
        data_file.write_all(pretty_json.as_bytes()).await.map_err(|e| LayerError::io(path, e))?;
        data_file.flush().await.map_err(|e| LayerError::io(path, e))?;
        Ok(())
    }
}
