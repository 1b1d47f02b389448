//! プロジェクト層
//!
//! 単一プロジェクトのライフサイクル（service）、全プロジェクトの
//! 管理と揮発アクション障壁（registry）、アーカイブ入出力（importer）

pub mod importer;
pub mod registry;
pub mod service;

pub use importer::{ArchiveCodec, ArchiveEntry, ArchiveFetcher, ExtractedProject};
pub use registry::{ProjectRegistry, SubscriberId, VolatileActions};
pub use service::{ProjectRef, ProjectService, ServiceState};
