//! Model runtime: fitted scaler and regressor loaded as one versioned bundle

pub mod bundle;
pub mod regressor;
pub mod scaler;

pub use bundle::{ArtifactKind, ArtifactStore, BundleState, ModelBundle};
pub use regressor::{RegressionTree, Regressor};
pub use scaler::StandardScaler;
