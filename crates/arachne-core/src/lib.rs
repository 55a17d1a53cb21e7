pub mod broker;
pub mod error;
pub mod explorer;
pub mod export;
pub mod extractor;
pub mod filter;
pub mod job;
pub mod memory_broker;
pub mod models;
pub mod node;
pub mod orchestrator;
pub mod pool;
pub mod status;
pub mod traits;
pub mod util;
pub mod worker;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use broker::{Broker, keys};
pub use error::AppError;
pub use explorer::{ExplorerFactory, ExplorerWorker};
pub use export::FileExporter;
pub use extractor::{ExtractorFactory, ExtractorWorker};
pub use job::{CrawlConfig, CrawlJob, JobPhase, NodeConfig, OrchestratorConfig, Role, WorkerConfig};
pub use memory_broker::MemoryBroker;
pub use models::{ControlMessage, ExploitItem, FrontierItem, ResultRecord, WorkerAck};
pub use node::{WorkerFactory, WorkerNode};
pub use orchestrator::{Orchestrator, StartRequest, StartResponse, StopResponse};
pub use status::{CompletionEvent, CrawlEvent, CrawlReport, ExportedFiles, StatusSnapshot};
pub use traits::{Fetcher, LinkExtractor, NullSink, ResultSink, TitleExtractor};
