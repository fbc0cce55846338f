pub mod entities;
pub mod events;
pub mod geo;
pub mod messaging;
pub mod repositories;

// SQLx 类型映射
pub mod sqlx_impls;

pub use dispatch_errors::{DispatchError, DispatchResult};
pub use entities::*;
pub use events::*;
pub use geo::*;
pub use messaging::*;
pub use repositories::*;
