pub mod format;
pub mod response;

pub use format::{document_to_api_value, documents_to_api_values};
pub use response::{ApiResponse, ApiResult};
