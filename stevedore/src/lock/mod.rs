//! Lock artifact, project descriptor and the check tying them together.

mod artifact;
mod descriptor;
mod specifier;
mod verify;
mod version;

pub use artifact::{LOCK_FORMAT_VERSION, LockArtifact, PackageSource, PinnedPackage, inputs_digest};
pub use descriptor::ProjectDescriptor;
pub use specifier::{Operator, Requirement, Specifier, SpecifierSet, normalize_name};
pub use verify::verify_locked;
pub use version::{PreKind, Version};
