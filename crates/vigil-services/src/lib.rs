//! vigil-services: the moving parts of the frame transport.
//!
//! Camera side: `Sender` plus the `FrameSource`s that feed it.
//! Hub side: `Hub` accepts cameras, `Dispatcher` runs detection and the
//! per-camera motion state machine, and sinks consume what it forwards.

pub mod camera;
pub mod connection;
pub mod detector;
pub mod dispatch;
pub mod hub;
pub mod sender;
pub mod sink;
pub mod source;

pub use camera::{new_camera_table, CameraSource, CameraStatus, CameraTable, MotionState};
pub use connection::{new_connection_table, ConnectionState, ConnectionTable};
pub use detector::{detector_from_config, Detector, NoMotion, SizeDelta};
pub use dispatch::Dispatcher;
pub use hub::{Hub, HubReceiver};
pub use sender::{Sender, SenderHandle, SenderState};
pub use sink::{spawn_sink, FrameSink, SinkHandle, SinkInfo, SinkRegistry};
pub use source::{DirectorySource, FrameSource};
