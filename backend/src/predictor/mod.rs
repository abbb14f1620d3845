pub mod codec;
pub mod config;
pub mod process;

pub use codec::ClassificationResultCodec;
pub use config::PredictorConfig;
pub use process::{InferenceBackend, InferenceProcessClient, ProcessSpawner, TokioSpawner, WorkerProcess};
