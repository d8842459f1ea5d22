//! kubectl-backed collaborators for clusterback.
//!
//! [`KubectlProvider`] lists resources with `kubectl get -o json` and watches
//! them with `--watch-only --output-watch-events`. [`KubectlApplier`] replays
//! stored documents with `kubectl apply -f -`. Connection settings
//! (`--context`, `--kubeconfig`) come from [`Kubectl`].

pub mod applier;
pub mod command;
pub mod provider;
pub mod watch;

pub use applier::KubectlApplier;
pub use command::{Kubectl, KubectlError, KubectlResult};
pub use provider::KubectlProvider;
pub use watch::WatchDecoder;
