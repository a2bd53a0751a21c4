//! Update detection: is a running container's image stale?
//!
//! [`evaluate`] is a pure decision over current and latest image metadata; the
//! [`UpdateScanner`] feeds it from a gateway and a registry client.

pub mod digest;
pub mod engine;
pub mod scanner;

pub use digest::DigestNormalizer;
pub use engine::{CurrentImage, UpdateInfo, evaluate};
pub use scanner::{ContainerUpdate, UpdateScanner};
