//! RESTful resource routes
//!
//! A resource named `posts` maps five actions onto two paths:
//!
//! | method | path          | action  |
//! |--------|---------------|---------|
//! | GET    | `/posts`      | index   |
//! | GET    | `/posts/{id}` | show    |
//! | POST   | `/posts`      | store   |
//! | PUT    | `/posts/{id}` | update  |
//! | DELETE | `/posts/{id}` | destroy |

use axum::{
    handler::Handler,
    http::Method,
    routing::{on, MethodFilter, MethodRouter},
    Router,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAction {
    Index,
    Show,
    Store,
    Update,
    Destroy,
}

impl ResourceAction {
    pub const ALL: [ResourceAction; 5] = [
        ResourceAction::Index,
        ResourceAction::Show,
        ResourceAction::Store,
        ResourceAction::Update,
        ResourceAction::Destroy,
    ];

    pub fn method(self) -> Method {
        match self {
            Self::Index | Self::Show => Method::GET,
            Self::Store => Method::POST,
            Self::Update => Method::PUT,
            Self::Destroy => Method::DELETE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Show => "show",
            Self::Store => "store",
            Self::Update => "update",
            Self::Destroy => "destroy",
        }
    }

    /// Whether the action addresses a single member (`{prefix}/{id}`)
    pub fn is_member(self) -> bool {
        matches!(self, Self::Show | Self::Update | Self::Destroy)
    }

    /// Route path for this action under `prefix`
    pub fn path(self, prefix: &str) -> String {
        if self.is_member() {
            format!("{}/{{id}}", prefix.trim_end_matches('/'))
        } else {
            prefix.to_string()
        }
    }

    fn filter(self) -> MethodFilter {
        match self {
            Self::Index | Self::Show => MethodFilter::GET,
            Self::Store => MethodFilter::POST,
            Self::Update => MethodFilter::PUT,
            Self::Destroy => MethodFilter::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRoute {
    pub method: Method,
    pub path: String,
    pub action: ResourceAction,
}

/// `/name` with surrounding slashes normalized
pub fn resource_prefix(name: &str) -> String {
    format!("/{}", name.trim_matches('/'))
}

/// The route table for a resource
pub fn resource_routes(name: &str) -> [ResourceRoute; 5] {
    let prefix = resource_prefix(name);
    ResourceAction::ALL.map(|action| ResourceRoute {
        method: action.method(),
        path: action.path(&prefix),
        action,
    })
}

/// Builds an [`axum::Router`] for a resource from per-action handlers
///
/// Only registered actions are mounted. Apply middleware to the returned
/// router with `route_layer`.
pub struct ApiResource<S = ()> {
    name: String,
    handlers: Vec<(ResourceAction, MethodRouter<S>)>,
}

impl<S> ApiResource<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: Vec::new(),
        }
    }

    pub fn index<H, T>(self, handler: H) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.action(ResourceAction::Index, handler)
    }

    pub fn show<H, T>(self, handler: H) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.action(ResourceAction::Show, handler)
    }

    pub fn store<H, T>(self, handler: H) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.action(ResourceAction::Store, handler)
    }

    pub fn update<H, T>(self, handler: H) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.action(ResourceAction::Update, handler)
    }

    pub fn destroy<H, T>(self, handler: H) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.action(ResourceAction::Destroy, handler)
    }

    /// Register `handler` for `action`, replacing any earlier registration
    pub fn action<H, T>(mut self, action: ResourceAction, handler: H) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.handlers.retain(|(registered, _)| *registered != action);
        self.handlers.push((action, on(action.filter(), handler)));
        self
    }

    /// Routes that will be mounted, in table order
    pub fn routes(&self) -> Vec<ResourceRoute> {
        resource_routes(&self.name)
            .into_iter()
            .filter(|route| self.handlers.iter().any(|(a, _)| *a == route.action))
            .collect()
    }

    pub fn into_router(self) -> Router<S> {
        let prefix = resource_prefix(&self.name);

        self.handlers
            .into_iter()
            .fold(Router::new(), |router, (action, method_router)| {
                router.route(&action.path(&prefix), method_router)
            })
    }
}
