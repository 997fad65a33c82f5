use std::time::Duration;

use tracing::debug;

use crate::config::GraphiteConfig;
use crate::error::{AdapterError, Result};
use crate::metrics_input::MetricsInput;
use crate::model::{QueryRequest, RawSeries};

pub struct GraphiteArgs<URL, USR, PWD>
where
    URL: Into<String>,
    USR: Into<String>,
    PWD: Into<String>,
{
    pub url: URL,
    pub auth: Option<(USR, PWD)>,
    pub timeout: Duration,
}

/// Reads series through graphite-web's render API.
pub struct GraphiteInput {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
}

impl GraphiteInput {
    pub fn new<URL, USR, PWD>(args: GraphiteArgs<URL, USR, PWD>) -> Result<Self>
    where
        URL: Into<String>,
        USR: Into<String>,
        PWD: Into<String>,
    {
        let GraphiteArgs { url, auth, timeout } = args;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            auth: auth.map(|(usr, pwd)| (usr.into(), pwd.into())),
        })
    }

    pub fn from_config(config: &GraphiteConfig) -> Result<Self> {
        let webapp = &config.webapp;
        let auth = webapp
            .username
            .clone()
            .map(|usr| (usr, webapp.password.clone().unwrap_or_default()));

        Self::new(GraphiteArgs {
            url: webapp.base_url(),
            auth,
            timeout: config.request_timeout(),
        })
    }

    pub fn render_url(&self) -> String {
        format!("{}/render", self.url)
    }
}

/// Query string for a render request. Graphite takes epoch seconds for
/// both `from` and `until`.
pub fn render_params(request: &QueryRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("target", request.target.to_string()),
        ("format", "json".to_string()),
    ];
    if let Some(from) = request.interval.from {
        params.push(("from", from.timestamp().to_string()));
    }
    params.push(("until", request.interval.until.timestamp().to_string()));
    params
}

impl MetricsInput for GraphiteInput {
    type Error = AdapterError;

    async fn load_series(&self, request: &QueryRequest) -> Result<Vec<RawSeries>> {
        let params = render_params(request);
        debug!(pattern = %request.target, ?params, "querying render api");

        let mut http_request = self.client.get(self.render_url()).query(&params);
        if let Some((usr, pwd)) = &self.auth {
            http_request = http_request.basic_auth(usr, Some(pwd));
        }

        let response = http_request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Transport(format!(
                "render api answered {status} for target {}",
                request.target
            )));
        }

        let body = response.text().await?;
        let series: Vec<RawSeries> = serde_json::from_str(&body)?;

        debug!(pattern = %request.target, series = series.len(), "render api answered");
        Ok(series)
    }
}
