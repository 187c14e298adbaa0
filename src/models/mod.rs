mod backups;
mod devices;
mod events;
mod jobs;
mod templates;

pub use backups::*;
pub use devices::*;
pub use events::*;
pub use jobs::*;
pub use templates::*;
