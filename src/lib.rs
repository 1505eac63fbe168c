/// Kubeharness - integration-test harness core for Kubernetes operators
///
/// The pieces a scenario needs to drive a cluster through kubectl:
/// an immutable command model, a process runner, a bounded
/// poll-until-match loop, and a namespace-scoped wrapper that numbers
/// steps and captures cluster logs around each one.
pub mod cluster;
pub mod harness;
pub mod kubectl;
pub mod utils;

pub use harness::TestNamespace;
pub use kubectl::KubeCmd;
pub use utils::command::Runner;
pub use utils::polling::{Matcher, WaitSpec};
