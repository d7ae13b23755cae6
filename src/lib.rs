#![forbid(unsafe_code)]

pub mod anim;
pub mod assets;
pub mod blur;
pub mod compositor;
pub mod driver;
pub mod encode;
pub mod error;
pub mod export;
pub mod interp;
pub mod media;
pub mod model;
pub mod raster;
pub mod text;

pub use assets::{AssetStore, TransientStore};
pub use compositor::render_frame;
pub use driver::{CancelToken, OfflineDriver, RealtimeDriver, RenderArtifact, RenderDriver};
pub use encode::OutputFormat;
pub use error::{MontraError, MontraResult};
pub use export::{ExportConfig, ExportOrchestrator, RenderResponse};
pub use interp::interpolate;
pub use model::{AudioTrack, CompositionSpec, EffectKind, MediaKind, TimelineItem};
pub use raster::FrameRgba;
