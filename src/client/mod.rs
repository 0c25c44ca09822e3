// Client - optimistic mutation coordinator and its push channel

pub mod api;
pub mod coordinator;
pub mod local_view;
pub mod push_loop;
pub mod reconnect;
pub mod ws_connector;

pub use api::{EngagementApi, InProcessApi};
pub use coordinator::{ActionKind, CoordinatorConfig, MutationCoordinator, MutationOutcome};
pub use local_view::{EntityView, LocalView, ViewField, ViewSnapshot};
pub use push_loop::{run_push_loop, HubConnector, PushConnector, PushStream};
pub use reconnect::ReconnectPolicy;
pub use ws_connector::WsPushConnector;
