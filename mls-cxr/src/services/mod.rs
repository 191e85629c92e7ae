//! Study intake and processing services

pub mod delayed_executor;
pub mod event_dispatcher;
pub mod image_materializer;
pub mod key_resolver;
pub mod study_pipeline;

pub use delayed_executor::{DelayedExecutor, ExecutorConfig};
pub use event_dispatcher::{EventDispatcher, StoreReply};
pub use image_materializer::ImageMaterializer;
pub use key_resolver::{KeyReservation, KeyResolver};
pub use study_pipeline::{StudyOutcome, StudyPipeline};
