pub mod assistant;
pub mod legal;

pub use assistant::{LegalAssistant, LegalError, LegalResponse, VerificationReport};
pub use legal::nodes::LegalServices;
