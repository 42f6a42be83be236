use std::sync::Arc;

use crate::config::Config;
use crate::crypto::cookie::SealedCookieStore;
use crate::groupcache::GroupCache;
use crate::metrics::Metrics;
use crate::router::HostRouter;
use crate::signer::RequestSigner;

#[derive(Clone)]
pub struct ProxyState {
    pub cfg: Arc<Config>,
    pub cookie_store: Arc<SealedCookieStore>,
    pub http: reqwest::Client,
    pub router: Arc<HostRouter>,
    pub signer: Arc<RequestSigner>,
    pub group_cache: Option<Arc<GroupCache>>,
    pub metrics: Metrics,
}
