pub mod detect;
pub mod errors;
pub mod formats;
pub mod model;

pub use detect::{Detection, FormatDetector};
pub use errors::{FormatDetectionError, ParseError, ParseWarning};
pub use formats::{PneParser, ToyoParser};
pub use model::{CycleSummary, CyclerFormat, ParsedChannel, RawRecord, StepMode, ToyoVariant};

#[cfg(test)]
mod tests;
