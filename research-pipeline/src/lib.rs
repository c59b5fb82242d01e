pub mod caps;
pub mod discovery;
pub mod guard;
pub mod pipeline;
pub mod progress;
pub mod service;


pub use caps::{cap_thread_comments, cap_total_comments};
pub use discovery::{Discovered, DiscoveryMerger, DiscoveryRequest};
pub use guard::{RunGuard, RunPermit};
pub use pipeline::ResearchPipeline;
pub use progress::{OperationKind, ProgressRegistry, ProgressReporter, ProgressSubscription};
pub use service::{
    AddThreadOutcome, ExpandStatus, ResearchDetail, ResearchService, StartResearch,
    ALREADY_PROCESSED_MESSAGE,
};
