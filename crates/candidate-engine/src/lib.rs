pub mod nadfun;
pub mod provider;
pub mod registry;

pub use nadfun::NadFunClient;
pub use provider::{ProviderError, TokenDataProvider};
pub use registry::{CandidateRegistry, CRAWL_FAN_OUT};
