// Domain-layer modules and shared errors/models
pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}

pub mod partial_json {
    pub use crate::partial_json::*;
}

pub mod chat_session {
    pub use crate::chat_session::*;
}
