//! Rust Neural Graph Library
//!
//! Feed-forward and convolutional networks declared in JSON as a graph of
//! layers with branch and merge points, trained by mini-batch gradient
//! descent. Forward passes can run through a compute context that mirrors
//! layer buffers on an accelerator backend.
//!
//! # Modules
//!
//! - `kernels`: Numerical primitives over flat `f32` buffers
//! - `layer_data`: Batched slot storage owned by each layer, with optional device mirror
//! - `device`: Compute context, backend trait and the host reference backend
//! - `layers`: Layer trait, the sigmoid/convolution/max-pool/normalize layers and the factory
//! - `merger`: Gathers several parents' outputs at a convergence point
//! - `network`: Layer graph, traversal and the training loop
//! - `optimizers`: Optimizer trait and SGD
//! - `architecture`: JSON network description
//! - `config`: Training hyperparameters
//! - `utils`: Activations and the seeded RNG

pub mod architecture;
pub mod config;
pub mod device;
pub mod error;
pub mod kernels;
pub mod layer_data;
pub mod layers;
pub mod merger;
pub mod network;
pub mod optimizers;
pub mod utils;

pub use error::{DeviceError, KernelError, NetworkError, Result};
pub use layer_data::{LayerData, Slot};
pub use network::{one_hot, Network, NodeId, TrainingReport};
