//! A simulated probe + MCU backend for the `debug_target` abstraction.
//! Stands in for real SWD/JTAG hardware so the whole stack can be exercised
//! on a desk with no wires attached.

pub mod device;
pub mod probe;
