// Tests module
// Lifecycle: table transitions, own identity, corruption recovery
// Lookup: name and address lookup with cache revalidation
// Naming: virtual peer names and cluster definitions
// Distribution: seed list publishing, verification and import

pub mod common;
pub mod distribution;
pub mod naming;
