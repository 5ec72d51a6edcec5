pub mod buffer;
pub mod completion;
pub mod convert;
pub mod device;
pub mod pool;
pub mod session;
