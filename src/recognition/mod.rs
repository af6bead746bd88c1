//! Celebrity recognition client
//!
//! The recognition service is an external collaborator; this module only
//! translates between its wire shapes and the pipeline's types.

pub mod traits;
#[cfg(feature = "aws")]
pub mod rekognition;

pub use traits::{
    CelebrityRecognizer, Recognition, RecognitionError, RecognitionErrorKind, RecognizedFace,
};
#[cfg(feature = "aws")]
pub use rekognition::RekognitionClient;
