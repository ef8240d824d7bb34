pub mod client_ip;
pub mod responses;
pub mod router;
pub mod state;
pub mod storage;

pub use client_ip::ClientIp;
pub use responses::{ApiMessage, GeneratedText, json_error, llm_failure_response};
pub use state::AppState;
