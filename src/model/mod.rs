mod loader;

pub use loader::TorchEngine;
