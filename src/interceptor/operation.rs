use serde::Serialize;
use std::error::Error;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use super::{apply_target, CallTarget, InFlight, InterceptorContext};
use crate::context::RequestContext;
use crate::record::{LogType, OperationType};
use crate::utils;

/// Describes a business operation. Recording flags are combined with the
/// global defaults: both have to be on for a field to be captured.
#[derive(Debug, Clone)]
pub struct OperationLog {
    pub module: Option<String>,
    pub operation_type: OperationType,
    pub description: Option<String>,
    pub record_params: bool,
    pub record_result: bool,
    pub record_exception: bool,
    pub target: Option<CallTarget>,
}

impl Default for OperationLog {
    fn default() -> Self {
        Self {
            module: None,
            operation_type: OperationType::Other,
            description: None,
            record_params: true,
            record_result: true,
            record_exception: true,
            target: None,
        }
    }
}

impl OperationLog {
    pub fn new(module: impl Into<String>, operation_type: OperationType) -> Self {
        let module = module.into();
        Self {
            module: (!module.is_empty()).then_some(module),
            operation_type,
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.is_empty()).then_some(description);
        self
    }

    pub fn record_params(mut self, record: bool) -> Self {
        self.record_params = record;
        self
    }

    pub fn record_result(mut self, record: bool) -> Self {
        self.record_result = record;
        self
    }

    pub fn record_exception(mut self, record: bool) -> Self {
        self.record_exception = record;
        self
    }

    pub fn target(mut self, class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        self.target = Some(CallTarget::new(class_name, method_name));
        self
    }
}

/// Records [`LogType::Operation`] entries for explicitly described calls.
#[derive(Clone)]
pub struct OperationLogInterceptor {
    ctx: Arc<InterceptorContext>,
}

impl OperationLogInterceptor {
    pub fn new(ctx: Arc<InterceptorContext>) -> Self {
        OperationLogInterceptor { ctx }
    }

    /// Run `call` and record it as an operation.
    ///
    /// `args` are the call's own arguments; they are rendered as JSON and
    /// stored as the request parameters when the request (if any) carries no
    /// parameters of its own. Unlike access logging, operations are also
    /// recorded outside of any request.
    pub async fn intercept<A, F, Fut, T, E>(
        &self,
        operation: &OperationLog,
        request: Option<&dyn RequestContext>,
        args: &A,
        call: F,
    ) -> Result<T, E>
    where
        A: Serialize + Debug + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + Debug,
        E: Error + 'static,
    {
        let ctx = &*self.ctx;
        let config = ctx.config();
        if !config.operation_active() || ctx.is_excluded(request) {
            return call().await;
        }

        let mut record = ctx.new_record(LogType::Operation, request);
        record.module = operation.module.clone();
        record.operation_type = Some(operation.operation_type.as_str().to_string());
        record.description = operation.description.clone();
        apply_target(&mut record, operation.target.as_ref());

        if operation.record_params && config.record_request_params {
            let params = request.map(utils::request_params).unwrap_or_default();
            let params = if params.is_empty() {
                render_args(args)
            } else {
                Some(params)
            };
            record.request_params = params.and_then(|p| ctx.truncate_request(p));
        }

        let mut in_flight = InFlight::start(ctx, record);
        let outcome = call().await;

        match &outcome {
            Ok(value) => {
                let result = (operation.record_result && config.record_response_result)
                    .then(|| utils::to_json(value))
                    .and_then(|json| ctx.truncate_response(json));
                in_flight.succeed(200, result);
            }
            Err(e) => in_flight.fail(e, operation.record_exception),
        }

        in_flight.finish().await;
        outcome
    }
}

/// JSON of the call arguments; unit and `null` arguments record nothing.
fn render_args<A: Serialize + Debug + ?Sized>(args: &A) -> Option<String> {
    let json = utils::to_json(args);
    (json != "null" && !json.is_empty()).then_some(json)
}
