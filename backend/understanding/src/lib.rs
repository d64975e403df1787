pub mod extract;
pub mod parser;
pub mod preprocess;
pub mod prompt;
pub mod vision;

pub use extract::{parse_receipt_json, strip_code_fences};
pub use parser::LlmReceiptParser;
pub use preprocess::{adaptive_threshold, prepare_image, preprocess, PreparedImage};
pub use prompt::EXTRACTION_PROMPT;
pub use vision::{describe_image, VisionProvider};
