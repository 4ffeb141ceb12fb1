use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use strata_client::error::{ClientError, Result};
use strata_client::signaling::SignalRpc;
use strata_core::model::{
    IceRestartRequest, IceRestartResponse, IceTrickle, IceTrickleResponse, SendAnswerRequest,
    SendAnswerResponse, SetPublisherRequest, SetPublisherResponse, SfuError,
    UpdateMuteStatesRequest, UpdateMuteStatesResponse, UpdateSubscriptionsRequest,
    UpdateSubscriptionsResponse,
};
use tokio::sync::Semaphore;

/// A call received by [`MockRpc`].
#[derive(Debug, Clone)]
pub enum RpcCall {
    SetPublisher(SetPublisherRequest),
    SendAnswer(SendAnswerRequest),
    IceTrickle(IceTrickle),
    UpdateMuteStates(UpdateMuteStatesRequest),
    UpdateSubscriptions(UpdateSubscriptionsRequest),
    IceRestart(IceRestartRequest),
}

impl RpcCall {
    pub fn method(&self) -> &'static str {
        match self {
            RpcCall::SetPublisher(_) => "SetPublisher",
            RpcCall::SendAnswer(_) => "SendAnswer",
            RpcCall::IceTrickle(_) => "IceTrickle",
            RpcCall::UpdateMuteStates(_) => "UpdateMuteStates",
            RpcCall::UpdateSubscriptions(_) => "UpdateSubscriptions",
            RpcCall::IceRestart(_) => "IceRestart",
        }
    }
}

/// A scripted failure for the next call of one method.
#[derive(Debug, Clone)]
pub enum MockFailure {
    Transport,
    Sfu(SfuError),
}

/// Records RPCs and answers them, failing where scripted.
pub struct MockRpc {
    calls: Mutex<Vec<RpcCall>>,
    failures: Mutex<HashMap<&'static str, VecDeque<MockFailure>>>,
    publisher_answer: Mutex<String>,
    gates: Mutex<HashMap<&'static str, Arc<Semaphore>>>,
}

impl Default for MockRpc {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            publisher_answer: Mutex::new("v=0\r\ns=publisher-answer\r\n".to_string()),
            gates: Mutex::new(HashMap::new()),
        }
    }
}

impl MockRpc {
    pub fn fail_next(&self, method: &'static str, failure: MockFailure) {
        self.failures
            .lock()
            .entry(method)
            .or_default()
            .push_back(failure);
    }

    /// Holds every later `method` call after it is recorded, until a permit is added to the
    /// returned gate.
    pub fn hold(&self, method: &'static str) -> Arc<Semaphore> {
        self.gates
            .lock()
            .entry(method)
            .or_insert_with(|| Arc::new(Semaphore::new(0)))
            .clone()
    }

    async fn pass_gate(&self, method: &str) {
        let gate = self.gates.lock().get(method).cloned();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
    }

    pub fn calls(&self) -> Vec<RpcCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RpcCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method() == method)
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls_to(method).len()
    }

    fn record(&self, call: RpcCall) -> Result<Option<SfuError>> {
        let method = call.method();
        self.calls.lock().push(call);
        let failure = self
            .failures
            .lock()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        match failure {
            None => Ok(None),
            Some(MockFailure::Transport) => {
                Err(ClientError::Transport(format!("{method} unreachable")))
            }
            Some(MockFailure::Sfu(error)) => Ok(Some(error)),
        }
    }
}

#[async_trait]
impl SignalRpc for MockRpc {
    async fn set_publisher(&self, request: SetPublisherRequest) -> Result<SetPublisherResponse> {
        let session_id = request.session_id;
        let recorded = self.record(RpcCall::SetPublisher(request));
        self.pass_gate("SetPublisher").await;
        let error = recorded?;
        Ok(SetPublisherResponse {
            sdp: self.publisher_answer.lock().clone(),
            session_id: Some(session_id),
            ice_restart: false,
            error,
        })
    }

    async fn send_answer(&self, request: SendAnswerRequest) -> Result<SendAnswerResponse> {
        let error = self.record(RpcCall::SendAnswer(request))?;
        Ok(SendAnswerResponse { error })
    }

    async fn ice_trickle(&self, request: IceTrickle) -> Result<IceTrickleResponse> {
        let error = self.record(RpcCall::IceTrickle(request))?;
        Ok(IceTrickleResponse { error })
    }

    async fn update_mute_states(
        &self,
        request: UpdateMuteStatesRequest,
    ) -> Result<UpdateMuteStatesResponse> {
        let error = self.record(RpcCall::UpdateMuteStates(request))?;
        Ok(UpdateMuteStatesResponse { error })
    }

    async fn update_subscriptions(
        &self,
        request: UpdateSubscriptionsRequest,
    ) -> Result<UpdateSubscriptionsResponse> {
        let error = self.record(RpcCall::UpdateSubscriptions(request))?;
        Ok(UpdateSubscriptionsResponse { error })
    }

    async fn ice_restart(&self, request: IceRestartRequest) -> Result<IceRestartResponse> {
        let error = self.record(RpcCall::IceRestart(request))?;
        Ok(IceRestartResponse { error })
    }
}
