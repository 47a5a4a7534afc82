pub mod admission;
pub mod error_handling;

pub use admission::{admission_middleware, AdmissionOutcome, AdmissionPipeline, AdmissionState, Denial};
pub use error_handling::{ErrorEnvelope, ErrorTranslator, ExchangeResponse};
