pub mod discovery;
pub mod estimate;
pub mod feature;
pub mod job;
pub mod screen;
pub mod understanding;

pub use discovery::DiscoveryResult;
pub use estimate::CostEstimate;
pub use feature::{AdditionalFeature, Feature, SubPage};
pub use job::{Credentials, Job, JobStatus, ProgressEntry, ProgressKind};
pub use screen::{ScreenRecord, ScreenStatus, ScreenshotPlan};
pub use understanding::{Complexity, ElementKind, InteractiveElement, PageUnderstanding};
