//! Built-in modules.
//!
//! | module        | kind      | ports                        |
//! |---------------|-----------|------------------------------|
//! | `Camera`      | source    | `output`                     |
//! | `Receiver`    | source    | `output`                     |
//! | `Detector`    | transform | `input{i}` / `output{i}`     |
//! | `Transformer` | transform | `input` / `output`           |
//! | `Classifier`  | transform | `input` / `output`           |
//! | `Tracker`     | transform | `input` / `output`           |
//! | `Throttler`   | transform | `input` / `output`           |
//! | `Strider`     | transform | `input` / `output`           |
//! | `Sender`      | sink      | `input`                      |
//! | `Writer`      | sink      | `input`                      |

pub mod backend;
mod camera;
mod classifier;
mod detector;
mod receiver;
mod sender;
mod strider;
mod throttler;
mod tracker;
mod transformer;
mod writer;

pub use backend::{
    BoundingBox, CaptureDevice, ClassificationBackend, Detection, DetectionBackend,
    IdentityTransform, IouTracker, StaticDetections, StaticScores, SyntheticCapture,
    TrackingBackend, TransformBackend,
};
pub use camera::{Camera, CameraConfig};
pub use classifier::{Classifier, ClassifierConfig};
pub use detector::{Detector, DetectorConfig};
pub use receiver::{Receiver, ReceiverConfig};
pub use sender::{Sender, SenderConfig, DEFAULT_CONNECT_RETRIES, DEFAULT_RETRY_BACKOFF_MS};
pub use strider::{Strider, StriderConfig};
pub use throttler::{Throttler, ThrottlerConfig};
pub use tracker::{Tracker, TrackerConfig};
pub use transformer::{Transformer, TransformerConfig};
pub use writer::{Writer, WriterConfig, WriterFormat};
