use clap::Parser;

/// Crawl orchestration service.
///
/// This application runs all services:
/// - web: HTTP/WebSocket edge (`/scrape`, `/v1/crawl`, `/v1/crawl/:jobId`)
/// - worker: background dispatch/kickoff job consumer
/// - billing: asynchronous credit-billing aggregator
/// - reaper: periodic expired-crawl sweeper
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TracingFormat {
    /// Use pretty formatter (default in debug mode)
    Pretty,
    /// Use JSON formatter (default in release mode)
    Json,
}

#[derive(clap::ValueEnum, Clone, Debug, PartialEq)]
pub enum ServiceName {
    /// HTTP/WebSocket edge
    Web,
    /// Background dispatch/kickoff job consumer
    Scraper,
    /// Asynchronous credit-billing aggregator
    Billing,
    /// Periodic expired-crawl sweeper
    Reaper,
}

impl ServiceName {
    /// Get all available services
    pub fn all() -> Vec<ServiceName> {
        vec![
            ServiceName::Web,
            ServiceName::Scraper,
            ServiceName::Billing,
            ServiceName::Reaper,
        ]
    }

    /// Convert to string for service registration
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Web => "web",
            ServiceName::Scraper => "scraper",
            ServiceName::Billing => "billing",
            ServiceName::Reaper => "reaper",
        }
    }
}

#[cfg(debug_assertions)]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Pretty;
#[cfg(not(debug_assertions))]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Json;

fn default_tracing_format() -> TracingFormat {
    DEFAULT_TRACING_FORMAT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_as_str() {
        assert_eq!(ServiceName::Web.as_str(), "web");
        assert_eq!(ServiceName::Scraper.as_str(), "scraper");
        assert_eq!(ServiceName::Billing.as_str(), "billing");
        assert_eq!(ServiceName::Reaper.as_str(), "reaper");
    }

    #[test]
    fn test_service_name_all() {
        let all = ServiceName::all();
        assert_eq!(all.len(), 4);
    }
}
