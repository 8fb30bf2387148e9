//! Per-request namespaces.
//!
//! A [`Namespace`] names a family of request-scoped values. For every request the
//! binder opens a fresh [`Scope`], puts it in the request and response extensions,
//! and runs the rest of the pipeline with the scope installed as a tokio task-local.
//! Code deeper in the same request (server-side rendering helpers, for example) can
//! then read and write scoped values with [`Namespace::active`] without being handed
//! the request.
//!
//! The scope only lives as long as the request task. Work spawned onto other tasks
//! does not inherit it; pass the `Scope` explicitly there.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Router,
    body::Body,
    extract::{FromRequestParts, State},
    http::{Extensions, Request, request::Parts},
    middleware::{self, Next},
    response::Response,
};

use crate::error::AppError;

tokio::task_local! {
    static ACTIVE_SCOPES: Vec<Scope>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    name: Arc<str>,
}

impl Namespace {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_scope(&self) -> Scope {
        Scope {
            namespace: self.name.clone(),
            values: Arc::new(Mutex::new(Extensions::new())),
        }
    }

    /// Innermost scope of this namespace for the current task, if any.
    pub fn active(&self) -> Option<Scope> {
        ACTIVE_SCOPES
            .try_with(|scopes| {
                scopes
                    .iter()
                    .rev()
                    .find(|s| s.namespace == self.name)
                    .cloned()
            })
            .ok()
            .flatten()
    }

    /// Run `fut` with `scope` active, on top of any scopes already active.
    pub async fn run<F: Future>(&self, scope: Scope, fut: F) -> F::Output {
        let mut scopes = ACTIVE_SCOPES.try_with(|s| s.clone()).unwrap_or_default();
        scopes.push(scope);
        ACTIVE_SCOPES.scope(scopes, fut).await
    }
}

/// Values bound to one request.
#[derive(Clone)]
pub struct Scope {
    namespace: Arc<str>,
    values: Arc<Mutex<Extensions>>,
}

impl Scope {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.lock().insert(value)
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.lock().get::<T>().cloned()
    }

    pub fn remove<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.lock().remove::<T>()
    }

    fn lock(&self) -> MutexGuard<'_, Extensions> {
        // A panic while holding the lock leaves plain values behind; keep using them.
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<S> FromRequestParts<S> for Scope
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Scope>()
            .cloned()
            .ok_or(AppError::MissingContext)
    }
}

pub fn apply<S>(router: Router<S>, namespace: Namespace) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(namespace, bind_namespace))
}

pub async fn bind_namespace(
    State(namespace): State<Namespace>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let scope = namespace.create_scope();
    req.extensions_mut().insert(scope.clone());

    let mut response = namespace.run(scope.clone(), next.run(req)).await;
    response.extensions_mut().insert(scope);

    response
}
