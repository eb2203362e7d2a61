//! API request handlers

mod events;
mod instances;
mod proxies;
mod safeguards;
mod system;

pub use events::*;
pub use instances::*;
pub use proxies::*;
pub use safeguards::*;
pub use system::*;
