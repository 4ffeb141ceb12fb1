use crate::error::{ClientError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use strata_core::model::{
    IceRestartRequest, IceRestartResponse, IceTrickle, IceTrickleResponse, SendAnswerRequest,
    SendAnswerResponse, SetPublisherRequest, SetPublisherResponse, SfuResponse,
    UpdateMuteStatesRequest, UpdateMuteStatesResponse, UpdateSubscriptionsRequest,
    UpdateSubscriptionsResponse,
};
use tracing::trace;

/// Request/response calls to the SFU, outside the control channel.
///
/// Implementations return transport failures as errors and leave embedded application errors
/// inside the response.
#[async_trait]
pub trait SignalRpc: Send + Sync {
    async fn set_publisher(&self, request: SetPublisherRequest) -> Result<SetPublisherResponse>;

    async fn send_answer(&self, request: SendAnswerRequest) -> Result<SendAnswerResponse>;

    async fn ice_trickle(&self, request: IceTrickle) -> Result<IceTrickleResponse>;

    async fn update_mute_states(
        &self,
        request: UpdateMuteStatesRequest,
    ) -> Result<UpdateMuteStatesResponse>;

    async fn update_subscriptions(
        &self,
        request: UpdateSubscriptionsRequest,
    ) -> Result<UpdateSubscriptionsResponse>;

    async fn ice_restart(&self, request: IceRestartRequest) -> Result<IceRestartResponse>;
}

/// Turns an embedded application error into [`ClientError::Sfu`].
pub fn check_response<R: SfuResponse>(response: R) -> Result<R> {
    match response.error() {
        Some(error) => Err(ClientError::Sfu(error.clone())),
        None => Ok(response),
    }
}

/// JSON-over-HTTP RPC client authenticated with the session token.
pub struct HttpSignalRpc {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpSignalRpc {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{method}", self.base_url);
        trace!(%url, "RPC call");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::Authentication(format!("{method} rejected the token")));
        }
        Ok(response.error_for_status()?.json().await?)
    }
}

#[async_trait]
impl SignalRpc for HttpSignalRpc {
    async fn set_publisher(&self, request: SetPublisherRequest) -> Result<SetPublisherResponse> {
        self.call("SetPublisher", &request).await
    }

    async fn send_answer(&self, request: SendAnswerRequest) -> Result<SendAnswerResponse> {
        self.call("SendAnswer", &request).await
    }

    async fn ice_trickle(&self, request: IceTrickle) -> Result<IceTrickleResponse> {
        self.call("IceTrickle", &request).await
    }

    async fn update_mute_states(
        &self,
        request: UpdateMuteStatesRequest,
    ) -> Result<UpdateMuteStatesResponse> {
        self.call("UpdateMuteStates", &request).await
    }

    async fn update_subscriptions(
        &self,
        request: UpdateSubscriptionsRequest,
    ) -> Result<UpdateSubscriptionsResponse> {
        self.call("UpdateSubscriptions", &request).await
    }

    async fn ice_restart(&self, request: IceRestartRequest) -> Result<IceRestartResponse> {
        self.call("IceRestart", &request).await
    }
}
