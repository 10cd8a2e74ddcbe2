// Import pipeline and shared errors/models
pub mod importer {
    pub use crate::importer::*;
}

pub mod validator {
    pub use crate::validator::*;
}

pub mod dedup {
    pub use crate::dedup::*;
}

pub mod merge {
    pub use crate::merge::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
