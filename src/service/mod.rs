pub mod authorize;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod lifecycle;

pub use authorize::authorize_candidate;
pub use controller::ControllerService;
pub use error::{ServiceError, VersionConflict};
pub use hooks::{HookContext, HookFuture, HookStage, Hooks, LifecycleOperation};
pub use lifecycle::{LifecyclePolicy, LifecycleService};
