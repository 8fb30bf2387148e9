/*
 * Responsibility
 * - Shared context attached to the service Router (AppState)
 * - Clone cheap (Arc inside)
 */
use std::sync::Arc;

use crate::config::Config;
use crate::services::fetcher::{ApiGatewayWebFetcher, FetchError, InternalWebFetcher, WebFetcher};

#[derive(Clone)]
pub struct AppState {
    pub web_fetcher: Arc<dyn WebFetcher>,
}

impl AppState {
    pub fn new(web_fetcher: Arc<dyn WebFetcher>) -> Self {
        Self { web_fetcher }
    }

    /// Goes through the API gateway when `API_GATEWAY_HOST` is configured,
    /// otherwise calls services directly.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let web_fetcher: Arc<dyn WebFetcher> = match &config.api_gateway_host {
            Some(host) => Arc::new(ApiGatewayWebFetcher::new(host)?),
            None => Arc::new(InternalWebFetcher::new()?),
        };

        Ok(Self::new(web_fetcher))
    }
}
