//! External service integrations.

pub mod llm_gateway {
    pub use crate::llm_gateway::*;
}

pub mod prompt {
    pub use crate::prompt::*;
}

pub mod sse {
    pub use crate::sse::*;
}
