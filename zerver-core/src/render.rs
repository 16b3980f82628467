//! The error renderer seam, per `spec.md` §6: "a function `fn(&mut CtxBase)
//! -> Decision` supplied by configuration; invoked on `Fail` and on
//! runtime-synthesized failures; returns a `Done(Response)`." The
//! interpreter calls through this on every `Decision::Fail` (and on its own
//! synthesized deadline/internal failures) so a request is always completed
//! with a rendered [`Response`] — per `spec.md` §4.3, "never `Failed` once
//! rendered."

use std::sync::Arc;

use crate::context::CtxBase;
use crate::error::Error;
use crate::response::Response;

/// A pluggable renderer turning a failed request's last error into a
/// [`Response`]. Supplied by the application (`zerver-http`'s default, or a
/// custom one) at `Runtime` construction time.
pub type ErrorRenderer = Arc<dyn Fn(&CtxBase, &Error) -> Response + Send + Sync>;

/// The default renderer, matching the teacher's `{error: {type, code,
/// message}}` house style adapted to `spec.md` §7's required
/// `{error, what, key, request_id}` field names.
pub fn default_error_renderer() -> ErrorRenderer {
    Arc::new(|ctx, err| {
        let status = err.kind.status();
        let body = serde_json::json!({
            "error": err.kind,
            "what": err.what,
            "key": err.key,
            "request_id": ctx.request_id().to_string(),
        });
        Response::json(status, &body).unwrap_or_else(|_| Response::empty(500))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::request::{HeaderEntry, ParsedRequest};
    use crate::error::Kind;

    fn ctx() -> CtxBase {
        CtxBase::new(ParsedRequest {
            method: "GET".into(),
            path: "/".into(),
            headers: Vec::<HeaderEntry>::new(),
            path_params: Default::default(),
            query_params: Default::default(),
            client_addr: None,
            body: bytes::Bytes::new(),
        })
    }

    #[test]
    fn default_renderer_maps_kind_to_status() {
        let renderer = default_error_renderer();
        let ctx = ctx();
        let err = Error::new(Kind::NotFound, "record", "42");
        let response = renderer(&ctx, &err);
        assert_eq!(response.status, 404);
        let body = response.body_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json["what"], "record");
        assert_eq!(json["key"], "42");
    }
}
