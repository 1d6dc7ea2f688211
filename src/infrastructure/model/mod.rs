mod ollama;
mod parser;
mod prompt;
mod traits;
mod types;

pub use ollama::OllamaClient;
pub use parser::{find_matching_brace, parse_reply};
pub use prompt::build_system_prompt;
pub use traits::ChatClient;
pub use types::ModelError;
