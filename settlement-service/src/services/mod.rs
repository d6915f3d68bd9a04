pub mod engine;
pub mod ids;
pub mod metrics;
pub mod store;

pub use engine::{EngineSettings, SettlementEngine};
pub use metrics::{get_metrics, init_metrics};
pub use store::{MemoryStore, MongoStore, SettlementStore};
