pub mod bucket;
pub mod config;
pub mod counter;
pub mod gate;
pub mod generator;
pub mod latency;
pub mod probe;
pub mod report;
pub mod server;

pub use bucket::*;
pub use config::*;
pub use counter::*;
pub use gate::*;
pub use generator::*;
pub use latency::*;
pub use probe::*;
pub use report::*;
pub use server::*;
