use buergerbuero::error::AppError;
use buergerbuero::permits::{
    DispatchConfig, EventDispatcher, EventSettings, InMemoryPermitStore, PermitWorkflowService,
    RecordingEventSink, WorkflowError,
};
use chrono::NaiveDate;
use clap::Args;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Expiry date granted when the demo approves the request (YYYY-MM-DD)
    #[arg(long, value_parser = crate::infra::parse_date, default_value = "2026-01-01")]
    pub(crate) valid_until: NaiveDate,
    /// Citizen submitting the demo request
    #[arg(long, default_value_t = 42)]
    pub(crate) citizen_id: u64,
}

/// One step of the walkthrough, printed as JSON.
#[derive(Debug, Serialize)]
struct StepOutcome {
    step: &'static str,
    ok: bool,
    body: Value,
}

impl StepOutcome {
    fn from_result<T: Serialize>(step: &'static str, result: Result<T, WorkflowError>) -> Self {
        match result {
            Ok(value) => Self {
                step,
                ok: true,
                body: serde_json::to_value(value).unwrap_or(Value::Null),
            },
            Err(err) => Self {
                step,
                ok: false,
                body: json!({ "status": err.status_code().as_u16(), "errors": err.messages() }),
            },
        }
    }

    fn print(&self) {
        let rendered = serde_json::to_string_pretty(&self.body).unwrap_or_default();
        let marker = if self.ok { "ok" } else { "refused" };
        println!("\n[{marker}] {}\n{rendered}", self.step);
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        valid_until,
        citizen_id,
    } = args;

    println!("Permit request lifecycle demo");

    let sink = Arc::new(RecordingEventSink::default());
    let (emitter, dispatcher) = EventDispatcher::spawn(sink.clone(), DispatchConfig::default());
    let service = PermitWorkflowService::new(
        Arc::new(InMemoryPermitStore::new()),
        emitter,
        EventSettings::default(),
    );

    StepOutcome::from_result(
        "list open requests on an empty store",
        service.open_permit_requests().await,
    )
    .print();

    let permit = service.create_permit(&json!({ "title": "Parkausweis" })).await;
    let permit_id = permit.as_ref().map(|permit| permit.id.0).unwrap_or_default();
    StepOutcome::from_result("create permit", permit).print();

    let request = service
        .create_permit_request(&json!({ "permit_id": permit_id, "citizen_id": citizen_id }))
        .await;
    let request_id = request
        .as_ref()
        .map(|request| request.id.to_string())
        .unwrap_or_default();
    StepOutcome::from_result("submit permit request", request).print();

    let approval = json!({ "valid_until": valid_until.format("%Y-%m-%d").to_string() });
    StepOutcome::from_result(
        "approve request",
        service.approve_permit_request(&request_id, &approval).await,
    )
    .print();
    StepOutcome::from_result(
        "approve the same request again",
        service.approve_permit_request(&request_id, &approval).await,
    )
    .print();
    StepOutcome::from_result(
        "reject a malformed request id",
        service.reject_permit_request("abc").await,
    )
    .print();

    let dead_letters = dispatcher.dead_letters().clone();
    dispatcher.shutdown().await;

    let published = sink.published();
    println!("\nPublished events ({})", published.len());
    for envelope in &published {
        let body = envelope
            .to_body()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_else(|err| format!("<unserializable: {err}>"));
        println!("  {} -> {body}", envelope.routing_key());
    }

    let dead = dead_letters.snapshot();
    if !dead.is_empty() {
        println!("\nDead letters ({})", dead.len());
        for letter in dead {
            println!("  {} ({:?})", letter.envelope.event_name(), letter.reason);
        }
    }

    Ok(())
}
