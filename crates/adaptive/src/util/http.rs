use std::{ops::Deref, time::Duration};

use reqwest::{Client, ClientBuilder};

use crate::AdaptiveResult;

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> AdaptiveResult<Self> {
        let client = builder.build()?;
        Ok(Self { client })
    }

    /// Builds a client whose requests time out after `timeout`.
    pub fn with_timeout(timeout: Duration, user_agent: Option<&str>) -> AdaptiveResult<Self> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(user_agent) = user_agent {
            builder = builder.user_agent(user_agent);
        }
        Self::new(builder)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
