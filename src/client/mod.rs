//! Client-side surface of the AI provider: the provider trait, the raw failure
//! surface, classification of failures and validation of model output.

pub mod error_classification;
pub mod provider;
pub mod validation;

pub use error_classification::{ClassifiedError, ClassifierConfig, ErrorClassifier, ProviderFailure};
pub use provider::{AiProvider, AiRequest};
pub use validation::ResponseValidator;
