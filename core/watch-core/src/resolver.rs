//! Handle → DID resolution through the directory service.

use std::sync::Arc;

use crate::client::AtprotoApi;
use crate::error::{Result, WatchError};

pub struct HandleResolver {
    api: Arc<dyn AtprotoApi>,
}

impl HandleResolver {
    pub fn new(api: Arc<dyn AtprotoApi>) -> Self {
        Self { api }
    }

    /// Resolves `handle` (a leading `@` is ignored) to its DID.
    pub fn resolve(&self, handle: &str) -> Result<String> {
        let handle = handle.trim().trim_start_matches('@');
        self.api
            .resolve_handle(handle)
            .map(|response| response.did)
            .map_err(|source| WatchError::Resolution {
                handle: handle.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAtproto;

    #[test]
    fn resolves_known_handles_and_strips_at_sign() {
        let api = Arc::new(FakeAtproto::new());
        api.add_handle("abolition.bsky.social", "did:plc:abolition");
        let resolver = HandleResolver::new(api);
        assert_eq!(
            resolver.resolve("@abolition.bsky.social").expect("resolve"),
            "did:plc:abolition"
        );
    }

    #[test]
    fn unknown_handle_is_a_resolution_error() {
        let resolver = HandleResolver::new(Arc::new(FakeAtproto::new()));
        let err = resolver.resolve("ghost.test").expect_err("should fail");
        assert!(matches!(err, WatchError::Resolution { ref handle, .. } if handle == "ghost.test"));
    }
}
