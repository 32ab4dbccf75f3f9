use crate::{error::LayerError, malgebra::cube::Cube};


pub trait ConfigFS {
    type OutType;
    async fn save(&self, path: &String) -> Result<(), LayerError>;
    async fn read(path: &String) -> Result<Self::OutType, LayerError>;
}

/// A trainable layer. Calls on one instance must be serialized by the caller:
/// `backward` refers to the most recent `forward`, and `update_weights`
/// consumes everything accumulated by `backward` since the last update.
pub trait Neural {
    fn forward(&mut self, input: &Cube) -> Cube;
    fn backward(&mut self, upstream: &Cube);
    fn update_weights(&mut self, batch_size: usize);
}
