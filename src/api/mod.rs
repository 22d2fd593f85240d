pub mod handlers;
pub mod resource;
pub mod routes;

pub use handlers::AppState;
pub use resource::{resource_prefix, resource_routes, ApiResource, ResourceAction, ResourceRoute};
pub use routes::create_api_router;
