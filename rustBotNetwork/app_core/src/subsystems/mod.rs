/// # NDOC
/// component: `subsystems`
/// purpose: High-level domain subsystem boundaries for long-term platform growth.
/// invariants:
///   - Subsystems own domain contracts and orchestration, not UI transport.
///   - Cross-subsystem calls should happen via typed contracts.
pub mod competitive_intelligence;
