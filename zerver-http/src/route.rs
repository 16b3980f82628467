//! A single registered route: a method, an `axum`-style path pattern
//! (`{param}` dynamic segments — `axum` 0.8's own `matchit`-based router
//! syntax, reused directly rather than hand-rolling one), the pipeline it
//! drives, and the priority band its requests enter the scheduler under.

use std::sync::Arc;

use axum::http::Method;

use zerver_core::{Pipeline, Priority};

/// One entry in a [`crate::ZerverServer`]'s route table.
pub struct Route {
    pub method: Method,
    pub path: String,
    pub pipeline: Arc<Pipeline>,
    pub priority: Priority,
}

impl Route {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        pipeline: Arc<Pipeline>,
        priority: Priority,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            pipeline,
            priority,
        }
    }
}
