pub mod files;
pub mod lock;
pub mod model;
pub mod store;

pub use lock::InstallLock;
pub use model::CacheEntry;
pub use store::BinaryCache;
