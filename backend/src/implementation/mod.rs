pub mod cpu_emulated;

pub use cpu_emulated::{CpuEmulated, EmulatedConfig, EmulatedInstance, FaultPlan};
