// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod error_export {
    pub use crate::error_export::*;
}
