//! Request classification.

use std::fmt;

use http::Method;
use swkit_net::{Request, UrlPattern};

use crate::config::WorkerConfig;

/// How an intercepted request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyChoice {
    /// Not intercepted; the host performs its default network handling.
    Bypass,
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl fmt::Display for StrategyChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyChoice::Bypass => "bypass",
            StrategyChoice::CacheFirst => "cache-first",
            StrategyChoice::NetworkFirst => "network-first",
            StrategyChoice::StaleWhileRevalidate => "stale-while-revalidate",
        })
    }
}

/// Picks a [`StrategyChoice`] from the request alone.
#[derive(Debug, Clone)]
pub struct Router {
    static_patterns: Vec<UrlPattern>,
}

impl Router {
    /// Route paths containing any of `static_asset_dirs` cache-first.
    pub fn new<S: AsRef<str>>(static_asset_dirs: &[S]) -> Self {
        Self {
            static_patterns: static_asset_dirs
                .iter()
                .map(|dir| UrlPattern::path_contains(dir.as_ref()))
                .collect(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(&config.static_asset_dirs)
    }

    /// Classify `request`. Rules apply in order; the first match wins.
    pub fn route(&self, request: &Request) -> StrategyChoice {
        if !request.is_http() || request.method != Method::GET {
            return StrategyChoice::Bypass;
        }

        if request.destination.is_static_asset()
            || UrlPattern::any_matches(&self.static_patterns, &request.url)
        {
            return StrategyChoice::CacheFirst;
        }

        if request.is_navigation() {
            return StrategyChoice::NetworkFirst;
        }

        StrategyChoice::StaleWhileRevalidate
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swkit_net::{Destination, RequestMode};
    use url::Url;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_non_http_is_bypassed() {
        let router = Router::default();
        let request = Request::get(url("chrome-extension://abc/content.js"));
        assert_eq!(router.route(&request), StrategyChoice::Bypass);
    }

    #[test]
    fn test_non_get_is_bypassed() {
        let router = Router::default();
        let request = Request::get(url("https://moneyballs.example/api/entries")).method(Method::POST);
        assert_eq!(router.route(&request), StrategyChoice::Bypass);
    }

    #[test]
    fn test_static_dirs_are_cache_first() {
        let router = Router::default();
        for path in ["/vite/css/app.css", "/vite/js/app.js", "/vite/icons/favicon.ico"] {
            let request = Request::get(url(&format!("https://moneyballs.example{path}")));
            assert_eq!(router.route(&request), StrategyChoice::CacheFirst, "{path}");
        }
    }

    #[test]
    fn test_static_destinations_are_cache_first() {
        let router = Router::default();
        let request = Request::get(url("https://cdn.jsdelivr.net/npm/vue@3/dist/vue.global.prod.js"))
            .destination(Destination::Script);
        assert_eq!(router.route(&request), StrategyChoice::CacheFirst);
    }

    #[test]
    fn test_static_rule_wins_over_navigation() {
        let router = Router::default();
        let request = Request::navigate(url("https://moneyballs.example/vite/icons/logo.svg"));
        assert_eq!(router.route(&request), StrategyChoice::CacheFirst);
    }

    #[test]
    fn test_navigation_is_network_first() {
        let router = Router::default();
        let request = Request::navigate(url("https://moneyballs.example/vite/entries"));
        assert_eq!(router.route(&request), StrategyChoice::NetworkFirst);

        let by_mode = Request::get(url("https://moneyballs.example/vite/settings"))
            .mode(RequestMode::Navigate);
        assert_eq!(router.route(&by_mode), StrategyChoice::NetworkFirst);
    }

    #[test]
    fn test_everything_else_is_stale_while_revalidate() {
        let router = Router::default();
        let request = Request::get(url("https://moneyballs.example/vite/manifest.json"))
            .destination(Destination::Manifest);
        assert_eq!(router.route(&request), StrategyChoice::StaleWhileRevalidate);

        let font = Request::get(url("https://fonts.googleapis.com/css?family=Roboto"))
            .destination(Destination::Font);
        assert_eq!(router.route(&font), StrategyChoice::StaleWhileRevalidate);
    }

    #[test]
    fn test_custom_static_dirs() {
        let router = Router::new(&["/assets/"]);
        let request = Request::get(url("https://moneyballs.example/assets/a.js"));
        assert_eq!(router.route(&request), StrategyChoice::CacheFirst);
        let request = Request::get(url("https://moneyballs.example/js/a.js"));
        assert_eq!(router.route(&request), StrategyChoice::StaleWhileRevalidate);
    }
}
