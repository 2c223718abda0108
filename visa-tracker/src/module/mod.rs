pub mod backup;
pub mod notify;
pub mod pipeline;
pub mod renderer;
pub mod scheduled;
pub mod slots;
pub mod stats;
pub mod subscription;
