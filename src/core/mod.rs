// Domain-layer modules and shared errors/models
pub mod workflow {
    pub use crate::workflow::*;
}

pub mod disbursement {
    pub use crate::disbursement::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
